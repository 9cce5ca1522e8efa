//! Fabric protocol constants and packet types
//!
//! Every request and response is carried as the payload of one frame and is
//! laid out as `[opcode:u8][counter:u8][body]`. Body integers are little-endian.

use core::fmt;

use crate::error::{FabricError, Result};

/// First byte of every frame
pub const HEADER_MAGIC: u8 = 0x1B;

/// Baud rate the programmer firmware listens on
pub const DEFAULT_BAUD: u32 = 115_200;

/// URI scheme for programmers attached as USB serial devices
pub const USB_SERIAL_SCHEME: &str = "usbserial";

/// Command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Echo = 0x00,
    QueryDevice = 0x01,
    ProgramDevice = 0x02,
    ProgramBlock = 0x03,
    ProgramComplete = 0x04,
    QueryBitstreamFlash = 0x05,
    ProgramBitstreamFromFlash = 0x06,
    ClearBitstreamFlash = 0x07,
    RebootProgrammer = 0x08,
    Unknown = 0xFF,
}

impl Opcode {
    /// Decode an opcode byte, mapping anything unassigned to `Unknown`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Opcode::Echo,
            0x01 => Opcode::QueryDevice,
            0x02 => Opcode::ProgramDevice,
            0x03 => Opcode::ProgramBlock,
            0x04 => Opcode::ProgramComplete,
            0x05 => Opcode::QueryBitstreamFlash,
            0x06 => Opcode::ProgramBitstreamFromFlash,
            0x07 => Opcode::ClearBitstreamFlash,
            0x08 => Opcode::RebootProgrammer,
            _ => Opcode::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Echo => "Echo",
            Opcode::QueryDevice => "QueryDevice",
            Opcode::ProgramDevice => "ProgramDevice",
            Opcode::ProgramBlock => "ProgramBlock",
            Opcode::ProgramComplete => "ProgramComplete",
            Opcode::QueryBitstreamFlash => "QueryBitstreamFlash",
            Opcode::ProgramBitstreamFromFlash => "ProgramBitstreamFromFlash",
            Opcode::ClearBitstreamFlash => "ClearBitstreamFlash",
            Opcode::RebootProgrammer => "RebootProgrammer",
            Opcode::Unknown => "Unknown",
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Start of a bitstream upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgramDevice {
    /// Persist the bitstream to the programmer's flash as well
    pub save_to_flash: bool,
    /// Raw bitstream size in bytes
    pub total_size: u32,
    /// Number of `ProgramBlock` commands that follow
    pub block_count: u32,
    /// End-to-end CRC; the firmware does not check it and hosts send 0
    pub bitstream_crc: u16,
}

/// One compressed bitstream block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramBlock {
    pub block_id: u16,
    /// Uncompressed block length
    pub raw_size: u16,
    /// Sum of the uncompressed bytes mod 256
    pub block_checksum: u8,
    /// Size header plus deflate stream, see [`crate::block::compress_block`]
    pub compressed_block: Vec<u8>,
}

impl ProgramBlock {
    /// Length of the compressed payload as sent on the wire
    pub fn compressed_size(&self) -> u16 {
        self.compressed_block.len() as u16
    }
}

/// A request to the programmer
///
/// Each variant maps onto exactly one opcode. Body layouts are fixed and
/// produced by [`Command::serialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Arbitrary bytes the programmer sends back
    Echo(Vec<u8>),
    QueryDevice,
    ProgramDevice(ProgramDevice),
    ProgramBlock(ProgramBlock),
    ProgramComplete,
    QueryBitstreamFlash,
    ProgramBitstreamFromFlash,
    ClearBitstreamFlash,
    RebootProgrammer,
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Echo(_) => Opcode::Echo,
            Command::QueryDevice => Opcode::QueryDevice,
            Command::ProgramDevice(_) => Opcode::ProgramDevice,
            Command::ProgramBlock(_) => Opcode::ProgramBlock,
            Command::ProgramComplete => Opcode::ProgramComplete,
            Command::QueryBitstreamFlash => Opcode::QueryBitstreamFlash,
            Command::ProgramBitstreamFromFlash => Opcode::ProgramBitstreamFromFlash,
            Command::ClearBitstreamFlash => Opcode::ClearBitstreamFlash,
            Command::RebootProgrammer => Opcode::RebootProgrammer,
        }
    }

    /// The response layout the firmware answers this command with
    ///
    /// `None` means the programmer does not answer (it reboots).
    pub fn expected_response(&self) -> Option<ResponseKind> {
        match self {
            Command::Echo(_) => Some(ResponseKind::Raw),
            Command::QueryDevice => Some(ResponseKind::QueryDevice),
            Command::QueryBitstreamFlash => Some(ResponseKind::QueryBitstreamFlash),
            Command::RebootProgrammer => None,
            Command::ProgramDevice(_)
            | Command::ProgramBlock(_)
            | Command::ProgramComplete
            | Command::ProgramBitstreamFromFlash
            | Command::ClearBitstreamFlash => Some(ResponseKind::Generic),
        }
    }

    /// Serialize the command body (without opcode and counter)
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Command::Echo(data) => data.clone(),
            // One reserved byte, always zero
            Command::QueryDevice => vec![0],
            Command::ProgramDevice(cmd) => {
                let mut body = Vec::with_capacity(11);
                body.push(cmd.save_to_flash as u8);
                body.extend_from_slice(&cmd.total_size.to_le_bytes());
                body.extend_from_slice(&cmd.block_count.to_le_bytes());
                body.extend_from_slice(&cmd.bitstream_crc.to_le_bytes());
                body
            }
            Command::ProgramBlock(cmd) => {
                let mut body = Vec::with_capacity(7 + cmd.compressed_block.len());
                body.extend_from_slice(&cmd.block_id.to_le_bytes());
                body.extend_from_slice(&cmd.compressed_size().to_le_bytes());
                body.extend_from_slice(&cmd.raw_size.to_le_bytes());
                body.push(cmd.block_checksum);
                body.extend_from_slice(&cmd.compressed_block);
                body
            }
            Command::ProgramComplete
            | Command::QueryBitstreamFlash
            | Command::ProgramBitstreamFromFlash
            | Command::ClearBitstreamFlash
            | Command::RebootProgrammer => Vec::new(),
        }
    }

    /// Build the full packet `[opcode, counter] + body`
    pub fn encode_packet(&self, counter: u8) -> Vec<u8> {
        let body = self.serialize();
        let mut packet = Vec::with_capacity(2 + body.len());
        packet.push(self.opcode().into());
        packet.push(counter);
        packet.extend_from_slice(&body);
        packet
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Response layouts, selected by the command that was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Generic,
    QueryDevice,
    QueryBitstreamFlash,
    /// Body passed through untouched
    Raw,
}

/// A fixed-layout response body
pub trait ResponseBody: Sized {
    const KIND: ResponseKind;

    /// Parse the body that follows the opcode and counter bytes
    fn parse(body: &[u8]) -> Result<Self>;
}

/// Status reply shared by most commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericResponse {
    /// 0 on success
    pub error_code: i32,
}

impl GenericResponse {
    pub const SIZE: usize = 4;

    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }
}

impl ResponseBody for GenericResponse {
    const KIND: ResponseKind = ResponseKind::Generic;

    fn parse(body: &[u8]) -> Result<Self> {
        ensure_len(body, Self::SIZE, "generic")?;
        Ok(Self {
            error_code: read_i32(body, 0),
        })
    }
}

/// Reply to `QueryDevice`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDeviceResponse {
    /// 1 when the programmer sees a working FPGA
    pub device_state: u8,
    pub fpga_device_id: u32,
    /// Unique id of the programmer microcontroller
    pub device_uid: [u8; 8],
}

impl QueryDeviceResponse {
    pub const SIZE: usize = 13;

    pub fn is_valid(&self) -> bool {
        self.device_state == 1
    }
}

impl ResponseBody for QueryDeviceResponse {
    const KIND: ResponseKind = ResponseKind::QueryDevice;

    fn parse(body: &[u8]) -> Result<Self> {
        ensure_len(body, Self::SIZE, "query device")?;
        let mut device_uid = [0u8; 8];
        device_uid.copy_from_slice(&body[5..13]);
        Ok(Self {
            device_state: body[0],
            fpga_device_id: read_i32(body, 1) as u32,
            device_uid,
        })
    }
}

/// Reply to `QueryBitstreamFlash`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashStatus {
    /// 0 when the flash holds a valid bitstream
    pub error_code: i32,
    pub program_on_startup: i32,
    pub block_count: i32,
    pub bitstream_size: i32,
    pub crc: u8,
}

impl FlashStatus {
    pub const SIZE: usize = 17;

    pub fn has_valid_bitstream(&self) -> bool {
        self.error_code == 0
    }
}

impl ResponseBody for FlashStatus {
    const KIND: ResponseKind = ResponseKind::QueryBitstreamFlash;

    fn parse(body: &[u8]) -> Result<Self> {
        ensure_len(body, Self::SIZE, "bitstream flash")?;
        Ok(Self {
            error_code: read_i32(body, 0),
            program_on_startup: read_i32(body, 4),
            block_count: read_i32(body, 8),
            bitstream_size: read_i32(body, 12),
            crc: body[16],
        })
    }
}

impl ResponseBody for Vec<u8> {
    const KIND: ResponseKind = ResponseKind::Raw;

    fn parse(body: &[u8]) -> Result<Self> {
        Ok(body.to_vec())
    }
}

/// Any parsed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Generic(GenericResponse),
    QueryDevice(QueryDeviceResponse),
    QueryBitstreamFlash(FlashStatus),
    Raw(Vec<u8>),
}

impl Response {
    /// Parse `body` with the layout `kind` names
    pub fn parse(kind: ResponseKind, body: &[u8]) -> Result<Self> {
        Ok(match kind {
            ResponseKind::Generic => Response::Generic(GenericResponse::parse(body)?),
            ResponseKind::QueryDevice => Response::QueryDevice(QueryDeviceResponse::parse(body)?),
            ResponseKind::QueryBitstreamFlash => {
                Response::QueryBitstreamFlash(FlashStatus::parse(body)?)
            }
            ResponseKind::Raw => Response::Raw(body.to_vec()),
        })
    }
}

/// A decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    /// Opcode byte echoed by the programmer
    pub opcode: u8,
    /// Counter byte echoed by the programmer
    pub counter: u8,
    pub response: Response,
}

// ============================================================================
// Device info
// ============================================================================

/// What a query found on an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceStatus {
    /// Programmer answered but the FPGA was not detected
    #[default]
    Unknown,
    NoResponse,
    /// Programmer answered and reports a working FPGA
    Ok,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Unknown => "unknown",
            DeviceStatus::NoResponse => "noresponse",
            DeviceStatus::Ok => "ok",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A programmer found at a URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub status: DeviceStatus,
    pub fpga_device_id: u32,
    /// e.g. `usbserial:///dev/ttyACM0`
    pub uri: String,
    /// Hex form of the programmer's 8-byte unique id
    pub uid: String,
}

impl DeviceInfo {
    pub fn from_query(response: &QueryDeviceResponse, uri: &str) -> Self {
        let status = if response.is_valid() {
            DeviceStatus::Ok
        } else {
            DeviceStatus::Unknown
        };
        Self {
            status,
            fpga_device_id: response.fpga_device_id,
            uri: uri.to_string(),
            uid: format_uid(&response.device_uid),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (status: {}, fpga: 0x{:08X}, uid: {})",
            self.uri, self.status, self.fpga_device_id, self.uid
        )
    }
}

/// Concatenate the uid bytes as unpadded lowercase hex
///
/// Bytes below 0x10 contribute a single digit. Existing tooling matches
/// programmers by this exact string.
pub fn format_uid(uid: &[u8]) -> String {
    uid.iter().map(|b| format!("{:x}", b)).collect()
}

/// Build the URI for a serial port name
pub fn serial_uri(port: &str) -> String {
    format!("{}://{}", USB_SERIAL_SCHEME, port)
}

/// Extract the serial port name from a `usbserial://` URI
pub fn parse_serial_uri(uri: &str) -> Result<&str> {
    match uri.split_once("://") {
        Some((USB_SERIAL_SCHEME, port)) if !port.is_empty() => Ok(port),
        _ => Err(FabricError::UnsupportedUri(uri.to_string())),
    }
}

fn ensure_len(body: &[u8], expected: usize, response: &'static str) -> Result<()> {
    if body.len() < expected {
        return Err(FabricError::Truncated {
            response,
            expected,
            got: body.len(),
        });
    }
    Ok(())
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}
