//! Fabric programmer device implementation
//!
//! This module provides the main `FabricProgrammer` struct that drives a
//! [`Session`] through device queries, flash management and the multi-step
//! bitstream upload.

use crate::block::{build_block, UploadPlan};
use crate::error::{FabricError, Result};
use crate::protocol::{
    Command, DeviceInfo, FlashStatus, GenericResponse, QueryDeviceResponse,
};
use crate::session::{Session, SessionConfig};
use crate::transport::{Connector, Transport};

/// Receives upload progress
///
/// Implemented by the caller to render progress however it likes; the
/// programmer only reports byte counts.
pub trait ProgramProgress {
    /// Upload accepted by the programmer
    fn begin(&mut self, total_bytes: usize, block_count: usize);

    /// Block about to be sent; `bytes_sent` counts the bytes before it
    fn block(&mut self, block_id: usize, bytes_sent: usize, total_bytes: usize);

    /// Programmer acknowledged the completed upload
    fn complete(&mut self, total_bytes: usize);
}

/// Progress sink that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgramProgress for NoProgress {
    fn begin(&mut self, _total_bytes: usize, _block_count: usize) {}
    fn block(&mut self, _block_id: usize, _bytes_sent: usize, _total_bytes: usize) {}
    fn complete(&mut self, _total_bytes: usize) {}
}

/// Fabric programmer
///
/// Wraps a session with one programmer and exposes the device operations.
pub struct FabricProgrammer<T: Transport> {
    session: Session<T>,
    uri: String,
}

impl<T: Transport> FabricProgrammer<T> {
    /// Create a programmer on an open session
    pub fn new(session: Session<T>, uri: impl Into<String>) -> Self {
        Self {
            session,
            uri: uri.into(),
        }
    }

    /// Open the programmer at `uri` through `connector`
    pub fn connect<C>(connector: &mut C, uri: &str, config: SessionConfig) -> Result<Self>
    where
        C: Connector<Transport = T>,
    {
        let session = Session::connect(connector, uri, config)?;
        Ok(Self::new(session, uri))
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    /// Get a reference to the underlying transport
    pub fn transport(&self) -> &T {
        self.session.transport()
    }

    pub fn into_transport(self) -> T {
        self.session.into_transport()
    }

    /// Query the programmer and the attached FPGA
    ///
    /// Returns `Ok(None)` if nothing answered within the active timeout.
    pub fn query_device(&mut self) -> Result<Option<DeviceInfo>> {
        match self
            .session
            .request::<QueryDeviceResponse>(&Command::QueryDevice)
        {
            Ok(response) => {
                let info = DeviceInfo::from_query(&response, &self.uri);
                log::debug!("{}: {}", self.uri, info);
                Ok(Some(info))
            }
            Err(FabricError::NoResponse) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Upload a bitstream and configure the FPGA with it
    ///
    /// Sends `ProgramDevice`, every block in order, then `ProgramComplete`.
    /// The first failure aborts the upload; nothing is retried and the
    /// programmer is left mid-upload, so callers start over from scratch.
    pub fn program_device(
        &mut self,
        bitstream: &[u8],
        save_to_flash: bool,
        progress: &mut dyn ProgramProgress,
    ) -> Result<()> {
        let plan = UploadPlan::new(bitstream.len())?;
        let total = plan.total_size;

        let begin = plan.begin_command(save_to_flash);
        log::debug!("{}: begin upload {:?}", self.uri, begin);
        self.expect_ok(&Command::ProgramDevice(begin))?;
        progress.begin(total, plan.block_count);

        let mut sent = 0;
        for (index, raw) in plan.chunks(bitstream).enumerate() {
            let block = build_block(index as u16, raw)?;
            log::debug!(
                "{}: block {} / {}, {} -> {} bytes",
                self.uri,
                index + 1,
                plan.block_count,
                block.raw_size,
                block.compressed_size()
            );
            progress.block(index, sent, total);

            self.expect_ok(&Command::ProgramBlock(block))?;
            sent += raw.len();
        }

        self.expect_ok(&Command::ProgramComplete)?;
        progress.complete(total);
        log::debug!("{}: upload of {} bytes complete", self.uri, total);

        Ok(())
    }

    /// Erase the stored bitstream so the FPGA is not configured on startup
    pub fn clear_flash(&mut self) -> Result<()> {
        self.expect_ok(&Command::ClearBitstreamFlash)
    }

    /// Configure the FPGA from the bitstream stored in flash
    pub fn program_from_flash(&mut self) -> Result<()> {
        self.expect_ok(&Command::ProgramBitstreamFromFlash)
    }

    /// Reboot the programmer
    ///
    /// No reply is awaited; the serial link drops while it restarts.
    pub fn reboot_programmer(&mut self) -> Result<()> {
        self.session.send(&Command::RebootProgrammer)?;
        Ok(())
    }

    /// Read the stored bitstream's status
    pub fn query_bitstream_flash(&mut self) -> Result<FlashStatus> {
        self.session.request(&Command::QueryBitstreamFlash)
    }

    /// Send bytes to the programmer and return what it echoes
    pub fn echo(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.session.request(&Command::Echo(data.to_vec()))
    }

    /// Send `command` and require a zero error code
    fn expect_ok(&mut self, command: &Command) -> Result<()> {
        let response: GenericResponse = self.session.request(command)?;
        if !response.is_ok() {
            log::debug!(
                "{}: {} failed with code {}",
                self.uri,
                command.opcode(),
                response.error_code
            );
            return Err(FabricError::Rejected {
                command: command.opcode(),
                code: response.error_code,
            });
        }
        Ok(())
    }
}
