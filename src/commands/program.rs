//! Program command implementation

use std::path::Path;

use crate::connect::{open, Service};
use crate::error::{CliError, Result};
use crate::output::Output;

/// Upload a bitstream file to the device at `uri`
pub fn run_program(
    service: &mut Service,
    uri: &str,
    file: &Path,
    save: bool,
    out: &Output,
) -> Result<()> {
    let bitstream = std::fs::read(file).map_err(CliError::file(file))?;
    if bitstream.is_empty() {
        return Err(CliError::EmptyBitstream(file.to_path_buf()));
    }

    out.info(&format!(
        "Uploading bitstream '{}' to '{}', is saving: {}",
        file.display(),
        uri,
        save
    ));

    let mut programmer = open(service, uri)?;
    let mut progress = out.upload_progress();
    programmer
        .program_device(&bitstream, save, &mut progress)
        .map_err(CliError::device(format!(
            "Failed to program bitstream on device '{}'",
            uri
        )))?;

    out.info(&format!(
        "Programmed {} bytes on device '{}'",
        bitstream.len(),
        uri
    ));
    Ok(())
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::connect::{service, DUMMY_PORT};
    use fabprog_protocol::protocol::serial_uri;
    use fabprog_protocol::SessionConfig;
    use std::path::PathBuf;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("fabprog-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_program_emulator() {
        let file = temp_file("top.bin", &[0xA5; 10_000]);
        let mut service = service(SessionConfig::default());
        let out = Output::new(true, true);

        run_program(&mut service, &serial_uri(DUMMY_PORT), &file, true, &out).unwrap();
        std::fs::remove_file(file).unwrap();
    }

    #[test]
    fn test_empty_bitstream_rejected() {
        let file = temp_file("empty.bin", &[]);
        let mut service = service(SessionConfig::default());

        let err = run_program(
            &mut service,
            &serial_uri(DUMMY_PORT),
            &file,
            false,
            &Output::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CliError::EmptyBitstream(_)));
        std::fs::remove_file(file).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let mut service = service(SessionConfig::default());
        let err = run_program(
            &mut service,
            &serial_uri(DUMMY_PORT),
            Path::new("/nonexistent/top.bin"),
            false,
            &Output::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CliError::File { .. }));
    }
}
