//! Programmer discovery
//!
//! Probes candidate serial ports for a responsive programmer. Ports matching
//! the platform's preferred patterns are tried first with the short probe
//! timeout; then every candidate is tried with the short timeout and finally
//! with the normal one. Candidates are probed one after another.

use std::collections::HashMap;

use crate::device::FabricProgrammer;
use crate::error::{FabricError, Result};
use crate::protocol::{serial_uri, DeviceInfo};
use crate::session::SessionConfig;
use crate::transport::Connector;

/// OS-reserved ports that never host a programmer
pub const IGNORE_PORTS: &[&str] = &["COM1"];

/// Port patterns where programmers usually enumerate, per `std::env::consts::OS`
pub fn preferred_probe_ports(os: &str) -> &'static [&'static str] {
    match os {
        "linux" => &["/dev/ttyACM*"],
        "macos" => &["/dev/cu.usbmodem*"],
        _ => &[],
    }
}

/// Discovery settings
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Port names skipped entirely
    pub ignored_ports: Vec<String>,
    /// Glob patterns (`*`, `?`) probed in the fast first pass
    pub preferred_patterns: Vec<String>,
    /// Settings for every probe session
    pub session: SessionConfig,
}

impl DiscoveryConfig {
    /// Defaults for the given OS name
    pub fn for_os(os: &str) -> Self {
        Self {
            ignored_ports: IGNORE_PORTS.iter().map(|p| p.to_string()).collect(),
            preferred_patterns: preferred_probe_ports(os)
                .iter()
                .map(|p| p.to_string())
                .collect(),
            session: SessionConfig::default(),
        }
    }

    fn is_preferred(&self, port: &str) -> bool {
        self.preferred_patterns
            .iter()
            .any(|pattern| glob_match(pattern, port))
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::for_os(std::env::consts::OS)
    }
}

/// Result of probing one candidate
#[derive(Debug)]
pub enum ProbeOutcome {
    Found(DeviceInfo),
    /// Port opened but nothing answered in time
    NoDevice,
    /// Port could not be opened or the exchange failed
    Failed(FabricError),
}

/// Finds programmers and remembers what it found
///
/// Found devices are cached by URI for the lifetime of the service. Access is
/// single-threaded (`&mut self`).
pub struct DeviceService<C: Connector> {
    connector: C,
    config: DiscoveryConfig,
    cache: HashMap<String, DeviceInfo>,
}

impl<C: Connector> DeviceService<C> {
    pub fn new(connector: C, config: DiscoveryConfig) -> Self {
        Self {
            connector,
            config,
            cache: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    /// Cached device at `uri`, if any
    pub fn cached(&self, uri: &str) -> Option<&DeviceInfo> {
        self.cache.get(uri)
    }

    /// Probe `candidate_ports` for programmers
    ///
    /// Stops as soon as `minimum` devices were found. With `use_cache`, ports
    /// whose URI is already cached are reported without being probed again.
    /// The result holds each URI at most once.
    pub fn list_devices(
        &mut self,
        candidate_ports: &[String],
        minimum: Option<usize>,
        use_cache: bool,
    ) -> Vec<DeviceInfo> {
        let candidates: Vec<&str> = candidate_ports
            .iter()
            .map(String::as_str)
            .filter(|port| !self.config.ignored_ports.iter().any(|i| i == port))
            .collect();

        let mut devices: Vec<DeviceInfo> = Vec::new();

        let preferred: Vec<&str> = candidates
            .iter()
            .copied()
            .filter(|port| self.config.is_preferred(port))
            .collect();
        if !preferred.is_empty() {
            log::debug!("Probing {} preferred port(s) first", preferred.len());
        }

        for port in preferred {
            if self.collect(port, true, use_cache, &mut devices) && reached(&devices, minimum) {
                return devices;
            }
        }

        for fast in [true, false] {
            for &port in &candidates {
                let uri = serial_uri(port);
                if devices.iter().any(|d| d.uri == uri) {
                    continue;
                }
                if self.collect(port, fast, use_cache, &mut devices) && reached(&devices, minimum)
                {
                    return devices;
                }
            }
        }

        devices
    }

    /// Return the cached device at `uri` or query it
    pub fn query_device_or_get_cached(
        &mut self,
        uri: &str,
        fast: bool,
    ) -> Result<Option<DeviceInfo>> {
        if let Some(info) = self.cache.get(uri) {
            return Ok(Some(info.clone()));
        }

        let info = self.query_device(uri, fast)?;
        if let Some(info) = &info {
            self.add_to_cache(info.clone());
        }
        Ok(info)
    }

    /// Open `uri` and query it, bypassing the cache
    pub fn query_device(&mut self, uri: &str, fast: bool) -> Result<Option<DeviceInfo>> {
        log::debug!("query {}", uri);

        let mut programmer =
            FabricProgrammer::connect(&mut self.connector, uri, self.config.session.clone())?;
        if fast {
            programmer.session_mut().set_fast_probe_mode(true)?;
        }
        programmer.query_device()
    }

    /// Probe one port, keeping its failure to itself
    pub fn probe(&mut self, port: &str, fast: bool) -> ProbeOutcome {
        match self.query_device(&serial_uri(port), fast) {
            Ok(Some(info)) => ProbeOutcome::Found(info),
            Ok(None) => ProbeOutcome::NoDevice,
            Err(e) if e.is_timeout() => ProbeOutcome::NoDevice,
            Err(e) => ProbeOutcome::Failed(e),
        }
    }

    fn add_to_cache(&mut self, info: DeviceInfo) {
        self.cache.insert(info.uri.clone(), info);
    }

    /// Probe `port` and record a find; returns whether a device was added
    fn collect(
        &mut self,
        port: &str,
        fast: bool,
        use_cache: bool,
        devices: &mut Vec<DeviceInfo>,
    ) -> bool {
        let uri = serial_uri(port);
        let cached = if use_cache {
            self.cache.get(&uri).cloned()
        } else {
            None
        };

        let outcome = match cached {
            Some(info) => ProbeOutcome::Found(info),
            None => self.probe(port, fast),
        };

        match outcome {
            ProbeOutcome::Found(info) => {
                self.add_to_cache(info.clone());
                if devices.iter().any(|d| d.uri == info.uri) {
                    return false;
                }
                log::debug!("Found {}", info);
                devices.push(info);
                true
            }
            ProbeOutcome::NoDevice => {
                log::trace!("{}: no response (fast: {})", uri, fast);
                false
            }
            ProbeOutcome::Failed(e) => {
                log::debug!("{}: probe failed: {}", uri, e);
                false
            }
        }
    }
}

fn reached(devices: &[DeviceInfo], minimum: Option<usize>) -> bool {
    minimum.is_some_and(|min| devices.len() >= min)
}

/// Shell-style wildcard match supporting `*` and `?`
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` and the text index it is currently matched up to
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("/dev/ttyACM*", "/dev/ttyACM0"));
        assert!(glob_match("/dev/ttyACM*", "/dev/ttyACM"));
        assert!(!glob_match("/dev/ttyACM*", "/dev/ttyUSB0"));
        assert!(glob_match("/dev/cu.usbmodem*", "/dev/cu.usbmodem14201"));
        assert!(!glob_match("/dev/cu.usbmodem*", "/dev/tty.usbmodem14201"));
        assert!(glob_match("COM?", "COM6"));
        assert!(!glob_match("COM?", "COM10"));
        assert!(glob_match("*ACM*", "/dev/ttyACM3"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("", "x"));
    }

    #[test]
    fn test_platform_defaults() {
        let linux = DiscoveryConfig::for_os("linux");
        assert!(linux.is_preferred("/dev/ttyACM0"));
        assert!(!linux.is_preferred("/dev/ttyS0"));
        assert_eq!(linux.ignored_ports, ["COM1"]);

        let mac = DiscoveryConfig::for_os("macos");
        assert!(mac.is_preferred("/dev/cu.usbmodem1101"));

        let windows = DiscoveryConfig::for_os("windows");
        assert!(windows.preferred_patterns.is_empty());
        assert!(!windows.is_preferred("COM3"));
    }

    #[test]
    fn test_reached() {
        assert!(!reached(&[], None));
        assert!(!reached(&[], Some(1)));
        let info = DeviceInfo {
            status: crate::protocol::DeviceStatus::Ok,
            fpga_device_id: 0,
            uri: serial_uri("COM3"),
            uid: String::new(),
        };
        assert!(reached(&[info], Some(1)));
    }
}
