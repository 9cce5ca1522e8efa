//! Bootloader install
//!
//! Boards in bootsel mode mount as a mass storage drive; copying a UF2 image
//! onto it flashes the microcontroller.

use std::path::{Path, PathBuf};

use crate::error::{CliError, Result};
use crate::output::Output;

/// Name the image is written under on the target drive
pub const BOOTLOADER_FILE_NAME: &str = "bootloader.uf2";

pub fn run_write_bootloader(image: &Path, target_dir: &Path, out: &Output) -> Result<PathBuf> {
    let dest = target_dir.join(BOOTLOADER_FILE_NAME);
    out.info(&format!("Writing bootloader to '{}'", dest.display()));

    let data = std::fs::read(image).map_err(CliError::file(image))?;
    std::fs::write(&dest, &data).map_err(CliError::file(&dest))?;

    log::debug!("Wrote {} bytes to {}", data.len(), dest.display());
    Ok(dest)
}
