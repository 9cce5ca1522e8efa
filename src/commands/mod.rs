//! CLI command implementations
//!
//! Every command reports through [`Output`](crate::output::Output) and
//! returns a [`CliError`](crate::error::CliError) on failure; `main` turns
//! that into the error message and exit code.

mod bootloader;
mod device;
mod list;
mod program;

pub use bootloader::run_write_bootloader;
pub use device::{run_clear_flash, run_load_from_flash, run_query_flash, run_reboot, run_test};
pub use list::run_list;
pub use program::run_program;
