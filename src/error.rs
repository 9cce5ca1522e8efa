//! Driver-level errors

use fabprog_protocol::FabricError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("No device found")]
    NoDevice,

    #[error("Failed to get device info for uri '{0}'")]
    NoDeviceInfo(String),

    #[error("Device failed to detect FPGA")]
    FpgaNotDetected,

    #[error("Bitstream file '{}' is empty", .0.display())]
    EmptyBitstream(PathBuf),

    /// A device operation failed
    #[error("{context}: {source}")]
    Device {
        context: String,
        #[source]
        source: FabricError,
    },

    #[error("{}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn device(context: impl Into<String>) -> impl FnOnce(FabricError) -> Self {
        let context = context.into();
        move |source| CliError::Device { context, source }
    }

    pub fn file(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| CliError::File { path, source }
    }

    /// Process exit code
    pub fn exit_code(&self) -> i32 {
        1
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
