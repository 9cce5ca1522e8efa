//! Transport layer abstraction for programmer communication
//!
//! The protocol only needs a blocking byte pipe with a bounded read timeout.
//! [`Connector`] opens such a pipe for a port name so discovery can probe
//! candidates without knowing what kind of pipe it gets.

use std::time::Duration;

use crate::error::Result;

/// Blocking byte channel to a programmer
pub trait Transport {
    /// Port name this transport was opened on
    fn name(&self) -> &str;

    /// Write all bytes to the transport
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes
    ///
    /// Waits at most the configured timeout and returns 0 if nothing arrived.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Set the read and write timeout
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Discard anything buffered in either direction
    fn clear(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }
}

/// Opens transports by port name
pub trait Connector {
    type Transport: Transport;

    /// Open `port` with the given baud rate and initial timeout
    fn connect(&mut self, port: &str, baud: u32, timeout: Duration) -> Result<Self::Transport>;
}

#[cfg(feature = "serial")]
pub mod serial {
    //! Serial port transport implementation

    use super::*;
    use crate::error::FabricError;
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};

    /// Serial port transport
    pub struct SerialTransport {
        name: String,
        port: Box<dyn SerialPort>,
    }

    impl SerialTransport {
        /// Open a serial port with the specified baud rate and timeout
        pub fn open(device: &str, baud: u32, timeout: Duration) -> Result<Self> {
            let port = serialport::new(device, baud)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(timeout)
                .open()
                .map_err(|e| FabricError::ConnectionFailed(format!("{}: {}", device, e)))?;

            log::debug!("Opened serial port {} at {} baud", device, baud);

            Ok(Self {
                name: device.to_string(),
                port,
            })
        }
    }

    impl Transport for SerialTransport {
        fn name(&self) -> &str {
            &self.name
        }

        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.port.write_all(data)?;
            self.port.flush()?;
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(FabricError::from(e)),
            }
        }

        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.port.set_timeout(timeout)?;
            Ok(())
        }

        fn clear(&mut self) -> Result<()> {
            self.port.clear(ClearBuffer::All)?;
            Ok(())
        }
    }

    /// Opens native serial ports
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SerialConnector;

    impl Connector for SerialConnector {
        type Transport = SerialTransport;

        fn connect(&mut self, port: &str, baud: u32, timeout: Duration) -> Result<SerialTransport> {
            SerialTransport::open(port, baud, timeout)
        }
    }

    /// Names of the serial ports the OS reports
    pub fn serial_port_names() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}
