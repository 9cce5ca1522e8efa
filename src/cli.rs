//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Generate help text for the port argument
fn port_help() -> String {
    let mut help = String::from("Serial port to use instead of auto detection (e.g. /dev/ttyACM0, COM3)");
    if cfg!(feature = "dummy") {
        help.push_str("; \"dummy\" selects the emulated programmer");
    }
    help
}

#[derive(Parser)]
#[command(name = "fabprog")]
#[command(author, version, about = "Fabric FPGA serial programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print one JSON object per line for automation
    #[arg(short, long, global = true)]
    pub json: bool,

    #[arg(short, long, global = true, help = port_help())]
    pub port: Option<String>,

    /// Serial baud rate
    #[arg(long, global = true, default_value_t = fabprog_protocol::protocol::DEFAULT_BAUD)]
    pub baud: u32,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List attached programmers
    List,

    /// Check the programmer works and identify the FPGA
    Test,

    /// Upload a bitstream to the FPGA
    Program {
        /// Bitstream file
        file: PathBuf,

        /// Also store the bitstream in flash and load it on startup
        #[arg(short, long)]
        save: bool,
    },

    /// Clear the bitstream flash so nothing loads on startup
    ClearFlash,

    /// Show the status of the bitstream stored in flash
    QueryFlash,

    /// Configure the FPGA from the bitstream stored in flash
    LoadFromFlash,

    /// Reboot the programmer
    Reboot,

    /// Install a bootloader UF2 image onto a mounted board
    WriteBootloader {
        /// Bootloader UF2 image
        #[arg(short, long)]
        image: PathBuf,

        /// Drive or mount point of the board in bootsel mode (e.g. F:/ or /media/user/RPI-RP2)
        target_dir: PathBuf,
    },
}
