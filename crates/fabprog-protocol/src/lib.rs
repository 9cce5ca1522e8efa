//! fabprog-protocol - Fabric serial programmer protocol
//!
//! This crate implements the host side of the protocol spoken by the Fabric
//! programmer firmware, a microcontroller that configures an attached FPGA
//! with bitstreams it receives over USB serial.
//!
//! # Protocol Overview
//!
//! Requests and responses are framed as `[0x1B][len:u16][payload][sum:u8]`.
//! The payload starts with an opcode and a rolling counter followed by a
//! fixed-layout body. Bitstreams are uploaded as a `ProgramDevice` command,
//! a run of deflate-compressed `ProgramBlock` commands and a final
//! `ProgramComplete`. Any nonzero error code aborts the upload.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "serial")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use fabprog_protocol::{FabricProgrammer, NoProgress, SerialConnector, SessionConfig};
//!
//! let mut connector = SerialConnector;
//! let mut programmer = FabricProgrammer::connect(
//!     &mut connector,
//!     "usbserial:///dev/ttyACM0",
//!     SessionConfig::default(),
//! )?;
//!
//! if let Some(info) = programmer.query_device()? {
//!     println!("{}", info);
//! }
//!
//! let bitstream = std::fs::read("top.bin")?;
//! programmer.program_device(&bitstream, false, &mut NoProgress)?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "serial"))]
//! # fn main() {}
//! ```

pub mod block;
pub mod device;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports
pub use device::{FabricProgrammer, NoProgress, ProgramProgress};
pub use discovery::{DeviceService, DiscoveryConfig, ProbeOutcome};
pub use error::{FabricError, Result};
pub use protocol::{
    Command, DeviceInfo, DeviceStatus, FlashStatus, GenericResponse, Opcode, QueryDeviceResponse,
    Response, ResponseKind,
};
pub use session::{Session, SessionConfig};
pub use transport::{Connector, Transport};

#[cfg(feature = "serial")]
pub use transport::serial::{serial_port_names, SerialConnector, SerialTransport};
