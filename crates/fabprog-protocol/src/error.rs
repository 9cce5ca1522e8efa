//! Error types for Fabric programmer operations

use thiserror::Error;

use crate::protocol::Opcode;

/// Fabric programmer errors
#[derive(Debug, Error)]
pub enum FabricError {
    /// Failed to open the underlying channel
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Device URI with a scheme we cannot open
    #[error("Unsupported device URI: {0}")]
    UnsupportedUri(String),

    /// Frame did not start with the header magic
    #[error("Bad frame magic 0x{0:02X}")]
    BadMagic(u8),

    /// Frame checksum does not match its payload
    #[error("Checksum mismatch: frame carries 0x{expected:02X}, payload sums to 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },

    /// Payload does not fit in a single frame
    #[error("Payload of {0} bytes exceeds the maximum frame payload")]
    PayloadTooLarge(usize),

    /// No frame arrived within the active timeout
    #[error("No response")]
    NoResponse,

    /// Frame payload too short to hold an opcode and counter
    #[error("Malformed packet of {0} bytes")]
    MalformedPacket(usize),

    /// Response body shorter than its fixed layout
    #[error("Truncated {response} response: expected {expected} bytes, got {got}")]
    Truncated {
        response: &'static str,
        expected: usize,
        got: usize,
    },

    /// Device answered with a nonzero error code
    #[error("Device rejected {command} with code {code}")]
    Rejected { command: Opcode, code: i32 },

    /// Response does not echo the request (strict correlation only)
    #[error(
        "Unexpected response opcode 0x{opcode:02X} counter {counter} for {command} (counter {expected_counter})"
    )]
    UnexpectedResponse {
        command: Opcode,
        expected_counter: u8,
        opcode: u8,
        counter: u8,
    },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// I/O error during communication
    #[error("I/O error: {0}")]
    Io(String),

    /// Serial port error
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl FabricError {
    /// Whether the error means nothing answered in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, FabricError::NoResponse)
    }
}

/// Result type for Fabric programmer operations
pub type Result<T> = core::result::Result<T, FabricError>;

impl From<std::io::Error> for FabricError {
    fn from(e: std::io::Error) -> Self {
        FabricError::Io(e.to_string())
    }
}
