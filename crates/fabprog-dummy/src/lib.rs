//! fabprog-dummy - Emulated Fabric programmer for testing
//!
//! This crate provides a dummy programmer that speaks the Fabric protocol
//! from memory. It decodes every request, checks uploads the way the
//! firmware does and answers immediately, so host code can be exercised
//! without hardware.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use fabprog_protocol::block::decompress_block;
use fabprog_protocol::error::{FabricError, Result};
use fabprog_protocol::frame::{checksum, encode_frame, try_decode};
use fabprog_protocol::protocol::Opcode;
use fabprog_protocol::session::DEFAULT_TIMEOUT;
use fabprog_protocol::transport::{Connector, Transport};

/// Error codes the emulated firmware answers with
pub mod codes {
    pub const OK: i32 = 0;
    /// Request body shorter than its layout
    pub const BAD_REQUEST: i32 = 1;
    /// Block or completion without an upload in progress
    pub const NO_UPLOAD: i32 = 2;
    /// Block arrived out of order
    pub const OUT_OF_SEQUENCE: i32 = 3;
    /// Sizes in the block header disagree with its payload
    pub const BAD_BLOCK: i32 = 4;
    /// Block checksum mismatch
    pub const BAD_CHECKSUM: i32 = 5;
    /// Completion before every announced byte arrived
    pub const INCOMPLETE: i32 = 6;
    /// No bitstream stored in flash
    pub const FLASH_EMPTY: i32 = 7;
    pub const UNKNOWN_COMMAND: i32 = -1;
}

/// Misbehaviour to inject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Never answer anything
    Silent,
    /// Answer `ProgramDevice` with this code
    RejectBegin(i32),
    /// Answer the block with this id with `code`
    RejectBlock { block_id: u16, code: i32 },
    /// Answer `ProgramComplete` with this code
    RejectComplete(i32),
    /// Send replies with a broken checksum
    CorruptReplies,
    /// Replies take this long; reads with a shorter timeout see nothing
    ReplyDelay(Duration),
}

/// Configuration for the dummy programmer
#[derive(Debug, Clone)]
pub struct DummyConfig {
    pub fpga_device_id: u32,
    pub uid: [u8; 8],
    /// 1 when the FPGA is detected
    pub device_state: u8,
    pub fault: Option<Fault>,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            fpga_device_id: 0x0112_8043,
            uid: [0xE6, 0x60, 0x38, 0xB7, 0x13, 0x2F, 0x47, 0x2C],
            device_state: 1,
            fault: None,
        }
    }
}

impl DummyConfig {
    pub fn with_fault(fault: Fault) -> Self {
        Self {
            fault: Some(fault),
            ..Self::default()
        }
    }
}

/// Upload in progress
#[derive(Debug)]
struct Upload {
    save_to_flash: bool,
    total_size: usize,
    block_count: usize,
    next_block: usize,
    data: Vec<u8>,
}

/// Bitstream persisted in the emulated flash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBitstream {
    pub data: Vec<u8>,
    pub block_count: usize,
}

/// Dummy Fabric programmer
///
/// Implements [`Transport`]; requests written to it are answered into its
/// read queue.
pub struct DummyFabric {
    name: String,
    config: DummyConfig,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    timeout: Duration,
    received: Vec<Opcode>,
    upload: Option<Upload>,
    configured: Option<Vec<u8>>,
    flash: Option<StoredBitstream>,
    reboots: usize,
}

impl DummyFabric {
    /// Create a new dummy programmer with the given configuration
    pub fn new(name: impl Into<String>, config: DummyConfig) -> Self {
        Self {
            name: name.into(),
            config,
            rx: Vec::new(),
            tx: VecDeque::new(),
            timeout: DEFAULT_TIMEOUT,
            received: Vec::new(),
            upload: None,
            configured: None,
            flash: None,
            reboots: 0,
        }
    }

    /// Create a new dummy programmer with default configuration
    pub fn new_default() -> Self {
        Self::new("dummy", DummyConfig::default())
    }

    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Opcodes of every request received, in order
    pub fn received(&self) -> &[Opcode] {
        &self.received
    }

    /// Bitstream the FPGA was last configured with
    pub fn configured(&self) -> Option<&[u8]> {
        self.configured.as_deref()
    }

    pub fn flash(&self) -> Option<&StoredBitstream> {
        self.flash.as_ref()
    }

    /// Preload the emulated flash
    pub fn set_flash(&mut self, data: Vec<u8>, block_count: usize) {
        self.flash = Some(StoredBitstream { data, block_count });
    }

    pub fn reboots(&self) -> usize {
        self.reboots
    }

    /// Timeout most recently set by the host
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn handle_packet(&mut self, payload: &[u8]) {
        if payload.len() < 2 {
            log::debug!("dummy: dropping {} byte packet", payload.len());
            return;
        }
        let (opcode, counter, body) = (Opcode::from_u8(payload[0]), payload[1], &payload[2..]);
        self.received.push(opcode);

        if self.config.fault == Some(Fault::Silent) {
            return;
        }

        let reply = match opcode {
            Opcode::Echo => Some(body.to_vec()),
            Opcode::QueryDevice => {
                let mut out = vec![self.config.device_state];
                out.extend_from_slice(&self.config.fpga_device_id.to_le_bytes());
                out.extend_from_slice(&self.config.uid);
                Some(out)
            }
            Opcode::ProgramDevice => Some(generic(self.begin_upload(body))),
            Opcode::ProgramBlock => Some(generic(self.accept_block(body))),
            Opcode::ProgramComplete => Some(generic(self.complete_upload())),
            Opcode::QueryBitstreamFlash => Some(self.flash_status()),
            Opcode::ProgramBitstreamFromFlash => Some(generic(match &self.flash {
                Some(stored) => {
                    self.configured = Some(stored.data.clone());
                    codes::OK
                }
                None => codes::FLASH_EMPTY,
            })),
            Opcode::ClearBitstreamFlash => {
                self.flash = None;
                Some(generic(codes::OK))
            }
            Opcode::RebootProgrammer => {
                self.reboots += 1;
                self.upload = None;
                None
            }
            Opcode::Unknown => Some(generic(codes::UNKNOWN_COMMAND)),
        };

        if let Some(body) = reply {
            self.respond(payload[0], counter, &body);
        }
    }

    fn respond(&mut self, opcode: u8, counter: u8, body: &[u8]) {
        let mut packet = vec![opcode, counter];
        packet.extend_from_slice(body);

        // Replies are far below the frame limit
        let Ok(mut frame) = encode_frame(&packet) else {
            return;
        };
        if self.config.fault == Some(Fault::CorruptReplies) {
            if let Some(sum) = frame.last_mut() {
                *sum = sum.wrapping_add(1);
            }
        }
        self.tx.extend(frame);
    }

    fn begin_upload(&mut self, body: &[u8]) -> i32 {
        if body.len() < 11 {
            return codes::BAD_REQUEST;
        }
        if let Some(Fault::RejectBegin(code)) = self.config.fault {
            return code;
        }

        let total_size = u32::from_le_bytes([body[1], body[2], body[3], body[4]]) as usize;
        let block_count = u32::from_le_bytes([body[5], body[6], body[7], body[8]]) as usize;
        self.upload = Some(Upload {
            save_to_flash: body[0] != 0,
            total_size,
            block_count,
            next_block: 0,
            data: Vec::with_capacity(total_size),
        });
        codes::OK
    }

    fn accept_block(&mut self, body: &[u8]) -> i32 {
        if body.len() < 7 {
            return codes::BAD_REQUEST;
        }
        let block_id = u16::from_le_bytes([body[0], body[1]]);
        let compressed_size = u16::from_le_bytes([body[2], body[3]]) as usize;
        let raw_size = u16::from_le_bytes([body[4], body[5]]) as usize;
        let block_checksum = body[6];
        let compressed = &body[7..];

        let fault = self.config.fault;
        let Some(upload) = self.upload.as_mut() else {
            return codes::NO_UPLOAD;
        };
        if block_id as usize != upload.next_block {
            return codes::OUT_OF_SEQUENCE;
        }
        if compressed.len() != compressed_size {
            return codes::BAD_BLOCK;
        }
        let raw = match decompress_block(compressed) {
            Ok(raw) if raw.len() == raw_size => raw,
            _ => return codes::BAD_BLOCK,
        };
        if checksum(&raw) != block_checksum {
            return codes::BAD_CHECKSUM;
        }
        if let Some(Fault::RejectBlock { block_id: id, code }) = fault {
            if id == block_id {
                return code;
            }
        }

        upload.data.extend_from_slice(&raw);
        upload.next_block += 1;
        codes::OK
    }

    fn complete_upload(&mut self) -> i32 {
        let Some(upload) = self.upload.take() else {
            return codes::NO_UPLOAD;
        };
        if upload.next_block != upload.block_count || upload.data.len() != upload.total_size {
            return codes::INCOMPLETE;
        }
        if let Some(Fault::RejectComplete(code)) = self.config.fault {
            return code;
        }

        if upload.save_to_flash {
            self.flash = Some(StoredBitstream {
                data: upload.data.clone(),
                block_count: upload.block_count,
            });
        }
        self.configured = Some(upload.data);
        codes::OK
    }

    fn flash_status(&self) -> Vec<u8> {
        let (code, on_startup, blocks, size, crc) = match &self.flash {
            Some(stored) => (
                codes::OK,
                1,
                stored.block_count as i32,
                stored.data.len() as i32,
                checksum(&stored.data),
            ),
            None => (codes::FLASH_EMPTY, 0, 0, 0, 0),
        };

        let mut out = Vec::with_capacity(17);
        for value in [code, on_startup, blocks, size] {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.push(crc);
        out
    }
}

fn generic(code: i32) -> Vec<u8> {
    code.to_le_bytes().to_vec()
}

impl Transport for DummyFabric {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.rx.extend_from_slice(data);

        loop {
            match try_decode(&self.rx) {
                Ok(Some((payload, used))) => {
                    self.rx.drain(..used);
                    self.handle_packet(&payload);
                }
                Ok(None) => break,
                Err(e) => {
                    log::debug!("dummy: discarding input: {}", e);
                    self.rx.clear();
                    break;
                }
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(Fault::ReplyDelay(delay)) = self.config.fault {
            if self.timeout < delay {
                return Ok(0);
            }
        }

        let n = buf.len().min(self.tx.len());
        for (slot, byte) in buf.iter_mut().zip(self.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.rx.clear();
        self.tx.clear();
        Ok(())
    }
}

/// Hands out dummy programmers by port name
///
/// Ports without a registered programmer fail to open, the way a missing or
/// busy serial port does.
#[derive(Debug, Default)]
pub struct DummyConnector {
    devices: HashMap<String, DummyConfig>,
    order: Vec<String>,
    opened: Vec<String>,
}

impl DummyConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a programmer on `port`
    pub fn with_device(mut self, port: &str, config: DummyConfig) -> Self {
        if self.devices.insert(port.to_string(), config).is_none() {
            self.order.push(port.to_string());
        }
        self
    }

    /// Registered port names, in registration order
    pub fn ports(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Every port an open was attempted on, in order
    pub fn opened(&self) -> &[String] {
        &self.opened
    }
}

impl Connector for DummyConnector {
    type Transport = DummyFabric;

    fn connect(&mut self, port: &str, _baud: u32, timeout: Duration) -> Result<DummyFabric> {
        self.opened.push(port.to_string());

        let config = self
            .devices
            .get(port)
            .cloned()
            .ok_or_else(|| FabricError::ConnectionFailed(format!("{}: no such port", port)))?;

        let mut device = DummyFabric::new(port, config);
        device.set_timeout(timeout)?;
        Ok(device)
    }
}
