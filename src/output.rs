//! User-facing output
//!
//! Messages go to stdout either as `[type] message` lines or, in JSON mode,
//! as one JSON object per line. Diagnostics stay on the `log` facade.

use fabprog_protocol::{DeviceInfo, FlashStatus, ProgramProgress};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::Write;

/// Kind of a user-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Progress,
    Info,
    Warn,
    Error,
}

impl MessageType {
    fn as_str(self) -> &'static str {
        match self {
            MessageType::Progress => "progress",
            MessageType::Info => "info",
            MessageType::Warn => "warn",
            MessageType::Error => "error",
        }
    }
}

#[derive(Serialize)]
struct Message<'a> {
    t: MessageType,
    msg: &'a str,
    c: i32,
}

#[derive(Serialize)]
struct DataEvent<'a, T: Serialize> {
    t: &'static str,
    #[serde(flatten)]
    data: &'a T,
}

/// Device fields reported by `test` and `list`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceData<'a> {
    pub status: &'static str,
    pub fpga_device_id: u32,
    pub uid: &'a str,
    pub uri: &'a str,
}

impl<'a> From<&'a DeviceInfo> for DeviceData<'a> {
    fn from(info: &'a DeviceInfo) -> Self {
        Self {
            status: info.status.as_str(),
            fpga_device_id: info.fpga_device_id,
            uid: &info.uid,
            uri: &info.uri,
        }
    }
}

/// Flash fields reported by `query-flash`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashData {
    pub has_valid_bitstream: u8,
    pub program_on_startup: i32,
    pub block_cnt: i32,
    pub bit_stream_sz: i32,
    pub crc: u8,
}

impl From<&FlashStatus> for FlashData {
    fn from(status: &FlashStatus) -> Self {
        Self {
            has_valid_bitstream: status.has_valid_bitstream() as u8,
            program_on_startup: status.program_on_startup,
            block_cnt: status.block_count,
            bit_stream_sz: status.bitstream_size,
            crc: status.crc,
        }
    }
}

/// Output settings, built once from the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(json: bool, quiet: bool) -> Self {
        Self { json, quiet }
    }

    fn min_level(&self) -> MessageType {
        if self.quiet {
            MessageType::Warn
        } else {
            MessageType::Progress
        }
    }

    /// Format a message, or `None` if it is filtered out
    pub fn render(&self, t: MessageType, msg: &str, code: i32) -> Option<String> {
        if t < self.min_level() {
            return None;
        }
        if self.json {
            serde_json::to_string(&Message { t, msg, c: code }).ok()
        } else {
            Some(format!("[{}] {}", t.as_str(), msg))
        }
    }

    /// Format a data event; only JSON mode carries them
    pub fn render_data<T: Serialize>(&self, data: &T) -> Option<String> {
        if !self.json {
            return None;
        }
        serde_json::to_string(&DataEvent { t: "data", data }).ok()
    }

    pub fn message(&self, t: MessageType, msg: &str, code: i32) {
        if let Some(line) = self.render(t, msg, code) {
            write_line(&line);
        }
    }

    pub fn info(&self, msg: &str) {
        self.message(MessageType::Info, msg, 0);
    }

    pub fn error(&self, msg: &str, code: i32) {
        self.message(MessageType::Error, msg, code);
    }

    pub fn data<T: Serialize>(&self, data: &T) {
        if let Some(line) = self.render_data(data) {
            write_line(&line);
        }
    }

    /// Progress sink for a bitstream upload
    pub fn upload_progress(&self) -> UploadProgress {
        UploadProgress {
            output: *self,
            bar: None,
        }
    }
}

fn write_line(line: &str) {
    let mut stdout = std::io::stdout().lock();
    // A closed stdout is not worth failing the operation for
    let _ = writeln!(stdout, "{}", line).and_then(|_| stdout.flush());
}

/// Renders upload progress as a bar, or as JSON progress events
pub struct UploadProgress {
    output: Output,
    bar: Option<ProgressBar>,
}

impl UploadProgress {
    fn percent(bytes: usize, total: usize) -> usize {
        if total == 0 {
            100
        } else {
            bytes * 100 / total
        }
    }
}

impl ProgramProgress for UploadProgress {
    fn begin(&mut self, total_bytes: usize, block_count: usize) {
        if self.output.json || self.output.quiet {
            self.output.message(
                MessageType::Progress,
                &format!("Uploading {} bytes in {} blocks", total_bytes, block_count),
                0,
            );
            return;
        }

        let pb = ProgressBar::new(total_bytes as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) Uploading")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        self.bar = Some(pb);
    }

    fn block(&mut self, block_id: usize, bytes_sent: usize, total_bytes: usize) {
        match &self.bar {
            Some(pb) => pb.set_position(bytes_sent as u64),
            None => self.output.message(
                MessageType::Progress,
                &format!(
                    "Block {} ({}%)",
                    block_id,
                    Self::percent(bytes_sent, total_bytes)
                ),
                0,
            ),
        }
    }

    fn complete(&mut self, total_bytes: usize) {
        match self.bar.take() {
            Some(pb) => {
                pb.set_position(total_bytes as u64);
                pb.finish_with_message("Upload complete");
            }
            None => self
                .output
                .message(MessageType::Progress, "Upload complete (100%)", 0),
        }
    }
}

impl Drop for UploadProgress {
    fn drop(&mut self) {
        // Leave the terminal clean if the upload was aborted
        if let Some(pb) = self.bar.take() {
            pb.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabprog_protocol::DeviceStatus;

    #[test]
    fn test_plain_format() {
        let out = Output::new(false, false);
        assert_eq!(
            out.render(MessageType::Info, "Found 1 device", 0).unwrap(),
            "[info] Found 1 device"
        );
        assert_eq!(
            out.render(MessageType::Error, "No device found", 1).unwrap(),
            "[error] No device found"
        );
    }

    #[test]
    fn test_json_format() {
        let out = Output::new(true, false);
        assert_eq!(
            out.render(MessageType::Error, "No device found", 1).unwrap(),
            r#"{"t":"error","msg":"No device found","c":1}"#
        );
    }

    #[test]
    fn test_quiet_filters_below_warn() {
        let out = Output::new(false, true);
        assert!(out.render(MessageType::Info, "x", 0).is_none());
        assert!(out.render(MessageType::Progress, "x", 0).is_none());
        assert!(out.render(MessageType::Warn, "x", 0).is_some());
        assert!(out.render(MessageType::Error, "x", 1).is_some());
    }

    #[test]
    fn test_data_only_in_json_mode() {
        let info = DeviceInfo {
            status: DeviceStatus::Ok,
            fpga_device_id: 0x1128043,
            uri: "usbserial://COM3".to_string(),
            uid: "e66038b7132f472c".to_string(),
        };
        let data = DeviceData::from(&info);

        assert!(Output::new(false, false).render_data(&data).is_none());
        assert_eq!(
            Output::new(true, false).render_data(&data).unwrap(),
            r#"{"t":"data","status":"ok","fpgaDeviceId":17989699,"uid":"e66038b7132f472c","uri":"usbserial://COM3"}"#
        );
    }

    #[test]
    fn test_flash_data_fields() {
        let status = FlashStatus {
            error_code: 0,
            program_on_startup: 1,
            block_count: 2,
            bitstream_size: 5000,
            crc: 0x12,
        };
        let line = Output::new(true, false)
            .render_data(&FlashData::from(&status))
            .unwrap();
        assert_eq!(
            line,
            r#"{"t":"data","hasValidBitstream":1,"programOnStartup":1,"blockCnt":2,"bitStreamSz":5000,"crc":18}"#
        );
    }
}
