//! List command implementation

use crate::connect::{candidate_ports, plural, Service};
use crate::error::Result;
use crate::output::{DeviceData, Output};

/// Probe the candidate ports and print every programmer found
pub fn run_list(service: &mut Service, port: Option<&str>, out: &Output) -> Result<()> {
    let ports = candidate_ports(port)?;
    log::debug!("Candidate ports: {:?}", ports);

    let devices = service.list_devices(&ports, None, true);
    out.info(&format!(
        "Found {} {}",
        devices.len(),
        plural("device", devices.len())
    ));

    for device in &devices {
        out.info(&device.to_string());
        out.data(&DeviceData::from(device));
    }

    Ok(())
}
