//! Device query and flash management commands

use fabprog_protocol::DeviceStatus;

use crate::connect::{open, Service};
use crate::error::{CliError, Result};
use crate::output::{DeviceData, FlashData, Output};

/// Query the programmer and fail unless it reports a working FPGA
pub fn run_test(service: &mut Service, uri: &str, out: &Output) -> Result<()> {
    out.info(&format!("Testing device at '{}'", uri));

    let info = service
        .query_device_or_get_cached(uri, false)
        .map_err(CliError::device(format!("Failed to query device '{}'", uri)))?
        .ok_or_else(|| CliError::NoDeviceInfo(uri.to_string()))?;

    let device_ok = info.status == DeviceStatus::Ok;
    out.info(&format!("status: {}", info.status));
    out.info(&format!("fpgaDeviceId: 0x{:08X}", info.fpga_device_id));
    out.info(&format!("uid: {}", info.uid));
    out.info(&format!("deviceOk: {}", device_ok as u8));
    out.data(&DeviceData::from(&info));

    if !device_ok {
        return Err(CliError::FpgaNotDetected);
    }
    Ok(())
}

pub fn run_clear_flash(service: &mut Service, uri: &str, out: &Output) -> Result<()> {
    out.info(&format!("Clearing flash on device '{}'", uri));

    let mut programmer = open(service, uri)?;
    programmer.clear_flash().map_err(CliError::device(format!(
        "Failed to clear bitstream flash on device '{}'",
        uri
    )))?;

    out.info(&format!("Flash cleared on device '{}'", uri));
    Ok(())
}

pub fn run_query_flash(service: &mut Service, uri: &str, out: &Output) -> Result<()> {
    out.info(&format!("Query flash on device '{}'", uri));

    let mut programmer = open(service, uri)?;
    let status = programmer.query_bitstream_flash().map_err(CliError::device(format!(
        "Failed to query flash status on device '{}'",
        uri
    )))?;

    out.info(&format!(
        "hasValidBitstream: {}",
        status.has_valid_bitstream() as u8
    ));
    out.info(&format!("programOnStartup: {}", status.program_on_startup));
    out.info(&format!("blockCnt: {}", status.block_count));
    out.info(&format!("bitStreamSz: {}", status.bitstream_size));
    out.info(&format!("crc: {}", status.crc));
    out.data(&FlashData::from(&status));
    Ok(())
}

/// Configure the FPGA from the bitstream stored in flash
pub fn run_load_from_flash(service: &mut Service, uri: &str, out: &Output) -> Result<()> {
    out.info(&format!("Loading bitstream from flash on device '{}'", uri));

    let mut programmer = open(service, uri)?;
    programmer.program_from_flash().map_err(CliError::device(format!(
        "Failed to load bitstream from flash on device '{}'",
        uri
    )))?;

    out.info(&format!("FPGA configured from flash on device '{}'", uri));
    Ok(())
}

pub fn run_reboot(service: &mut Service, uri: &str, out: &Output) -> Result<()> {
    out.info(&format!("Resetting programmer device '{}'", uri));

    let mut programmer = open(service, uri)?;
    programmer.reboot_programmer().map_err(CliError::device(format!(
        "Failed to reset programmer device '{}'",
        uri
    )))?;

    // The link goes down with the programmer; nothing else can follow
    out.info(&format!("Programmer device '{}' rebooted, exiting!", uri));
    Ok(())
}
