//! Port selection
//!
//! Serial ports are opened natively. With the `dummy` feature the port name
//! `dummy` opens the emulated programmer instead.

use fabprog_protocol::protocol::serial_uri;
use fabprog_protocol::{
    serial_port_names, Connector, DeviceService, DiscoveryConfig, FabricProgrammer,
    Result as FabricResult, SerialConnector, SessionConfig, Transport,
};
use std::time::Duration;

use crate::error::{CliError, Result};
use crate::output::Output;

/// Port name of the emulated programmer
#[cfg(feature = "dummy")]
pub const DUMMY_PORT: &str = "dummy";

/// Opens serial ports, or the emulated programmer on [`DUMMY_PORT`]
#[derive(Debug)]
pub struct PortConnector {
    serial: SerialConnector,
    #[cfg(feature = "dummy")]
    dummy: fabprog_dummy::DummyConnector,
}

impl PortConnector {
    pub fn new() -> Self {
        Self {
            serial: SerialConnector,
            #[cfg(feature = "dummy")]
            dummy: fabprog_dummy::DummyConnector::new()
                .with_device(DUMMY_PORT, fabprog_dummy::DummyConfig::default()),
        }
    }

    #[cfg(feature = "dummy")]
    fn connect_dummy(
        &mut self,
        port: &str,
        baud: u32,
        timeout: Duration,
    ) -> Option<FabricResult<Box<dyn Transport>>> {
        if port != DUMMY_PORT {
            return None;
        }
        log::debug!("Using emulated programmer");
        Some(
            self.dummy
                .connect(port, baud, timeout)
                .map(|device| Box::new(device) as Box<dyn Transport>),
        )
    }

    #[cfg(not(feature = "dummy"))]
    fn connect_dummy(
        &mut self,
        _port: &str,
        _baud: u32,
        _timeout: Duration,
    ) -> Option<FabricResult<Box<dyn Transport>>> {
        None
    }
}

impl Default for PortConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for PortConnector {
    type Transport = Box<dyn Transport>;

    fn connect(&mut self, port: &str, baud: u32, timeout: Duration) -> FabricResult<Self::Transport> {
        if let Some(result) = self.connect_dummy(port, baud, timeout) {
            return result;
        }
        Ok(Box::new(self.serial.connect(port, baud, timeout)?))
    }
}

pub type Service = DeviceService<PortConnector>;
pub type Programmer = FabricProgrammer<Box<dyn Transport>>;

pub fn service(session: SessionConfig) -> Service {
    let config = DiscoveryConfig {
        session,
        ..DiscoveryConfig::default()
    };
    DeviceService::new(PortConnector::new(), config)
}

/// Ports to probe: the given one, or every serial port on the system
pub fn candidate_ports(port: Option<&str>) -> Result<Vec<String>> {
    match port {
        Some(port) => Ok(vec![port.to_string()]),
        None => serial_port_names().map_err(CliError::device("Failed to enumerate serial ports")),
    }
}

/// URI of the device to operate on
///
/// An explicit port is used as is; otherwise the first programmer found is
/// selected.
pub fn select_device(service: &mut Service, port: Option<&str>, out: &Output) -> Result<String> {
    if let Some(port) = port {
        return Ok(serial_uri(port));
    }

    let ports = candidate_ports(None)?;
    let devices = service.list_devices(&ports, Some(1), true);
    out.info(&format!(
        "Found {} {}",
        devices.len(),
        plural("device", devices.len())
    ));

    let device = devices.into_iter().next().ok_or(CliError::NoDevice)?;
    out.info(&format!("[Auto select] Using device '{}'", device.uri));
    Ok(device.uri)
}

/// Open the programmer at `uri` for a normal-timeout session
pub fn open(service: &mut Service, uri: &str) -> Result<Programmer> {
    let config = service.config().session.clone();
    FabricProgrammer::connect(service.connector_mut(), uri, config)
        .map_err(CliError::device(format!("Failed to create transport for '{}'", uri)))
}

pub fn plural(word: &str, count: usize) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}
