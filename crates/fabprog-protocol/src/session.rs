//! Command/response session over one transport

use std::time::Duration;

use crate::error::{FabricError, Result};
use crate::frame::{decode_frame, encode_frame};
use crate::protocol::{
    parse_serial_uri, Command, Opcode, Response, ResponseBody, ResponsePacket,
    DEFAULT_BAUD,
};
use crate::transport::{Connector, Transport};

/// Timeout for regular operation, long enough for the FPGA to configure
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout used while probing ports for programmers
pub const FAST_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub baud_rate: u32,
    /// Read/write timeout in normal mode
    pub timeout: Duration,
    /// Read/write timeout in fast-probe mode
    pub fast_timeout: Duration,
    /// Reject responses that do not echo the request's opcode and counter
    pub strict_correlation: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
            fast_timeout: FAST_PROBE_TIMEOUT,
            strict_correlation: false,
        }
    }
}

/// Framed command/response exchange with one programmer
///
/// Owns the transport and the rolling request counter. All I/O blocks for at
/// most the active timeout.
pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    counter: u8,
    fast_probe: bool,
}

impl<T: Transport> Session<T> {
    /// Start a session on an already opened transport
    ///
    /// Applies the normal timeout and drops anything left in the buffers.
    pub fn open(mut transport: T, config: SessionConfig) -> Result<Self> {
        transport.set_timeout(config.timeout)?;
        transport.clear()?;

        Ok(Self {
            transport,
            config,
            counter: 0,
            fast_probe: false,
        })
    }

    /// Open the port a `usbserial://` URI names and start a session on it
    pub fn connect<C>(connector: &mut C, uri: &str, config: SessionConfig) -> Result<Self>
    where
        C: Connector<Transport = T>,
    {
        let port = parse_serial_uri(uri)?;
        log::debug!("Creating serial link for port {}", port);
        let transport = connector.connect(port, config.baud_rate, config.timeout)?;
        Self::open(transport, config)
    }

    /// Switch between the short probe timeout and the normal timeout
    pub fn set_fast_probe_mode(&mut self, enabled: bool) -> Result<()> {
        let timeout = if enabled {
            self.config.fast_timeout
        } else {
            self.config.timeout
        };
        self.transport.set_timeout(timeout)?;
        self.fast_probe = enabled;
        Ok(())
    }

    pub fn is_fast_probe(&self) -> bool {
        self.fast_probe
    }

    /// Counter value carried by the most recent request
    pub fn counter(&self) -> u8 {
        self.counter
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send `command` and, if it has a reply, wait for and parse it
    ///
    /// The reply layout comes from [`Command::expected_response`]; commands
    /// without a reply return `Ok(None)` as soon as they are written.
    pub fn send(&mut self, command: &Command) -> Result<Option<ResponsePacket>> {
        let expected = command.expected_response();
        let counter = self.transmit(command)?;

        let Some(kind) = expected else {
            return Ok(None);
        };

        let (opcode, echoed, body) = self.receive(command.opcode(), counter)?;
        Ok(Some(ResponsePacket {
            opcode,
            counter: echoed,
            response: Response::parse(kind, &body)?,
        }))
    }

    /// Send `command` and parse the reply as `R`
    ///
    /// Fails without sending if `command` is not answered with `R`'s layout.
    pub fn request<R: ResponseBody>(&mut self, command: &Command) -> Result<R> {
        if command.expected_response() != Some(R::KIND) {
            return Err(FabricError::InvalidParameter(format!(
                "{} is not answered with a {:?} response",
                command.opcode(),
                R::KIND
            )));
        }

        let counter = self.transmit(command)?;
        let (_, _, body) = self.receive(command.opcode(), counter)?;
        R::parse(&body)
    }

    /// Frame and write one request, returning the counter it carried
    fn transmit(&mut self, command: &Command) -> Result<u8> {
        self.transport.clear()?;

        self.counter = self.counter.wrapping_add(1);
        let packet = command.encode_packet(self.counter);
        let frame = encode_frame(&packet)?;

        log::trace!(
            "{}: -> {} #{} ({} byte body)",
            self.transport.name(),
            command.opcode(),
            self.counter,
            packet.len() - 2
        );
        self.transport.write(&frame)?;

        Ok(self.counter)
    }

    /// Read one response frame and split it into opcode, counter and body
    fn receive(&mut self, command: Opcode, counter: u8) -> Result<(u8, u8, Vec<u8>)> {
        let payload = decode_frame(&mut self.transport)?.ok_or(FabricError::NoResponse)?;
        if payload.len() < 2 {
            return Err(FabricError::MalformedPacket(payload.len()));
        }

        let (opcode, echoed) = (payload[0], payload[1]);
        log::trace!(
            "{}: <- 0x{:02X} #{} ({} byte body)",
            self.transport.name(),
            opcode,
            echoed,
            payload.len() - 2
        );

        if (opcode != u8::from(command) || echoed != counter) && self.config.strict_correlation {
            return Err(FabricError::UnexpectedResponse {
                command,
                expected_counter: counter,
                opcode,
                counter: echoed,
            });
        }

        Ok((opcode, echoed, payload[2..].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::try_decode;
    use crate::protocol::{GenericResponse, QueryDeviceResponse};
    use std::collections::VecDeque;

    /// Records writes and replays scripted response bytes
    #[derive(Default)]
    struct Scripted {
        written: Vec<u8>,
        replies: VecDeque<Vec<u8>>,
        pending: VecDeque<u8>,
        timeouts: Vec<Duration>,
        clears: usize,
    }

    impl Scripted {
        fn reply(mut self, payload: &[u8]) -> Self {
            self.replies.push_back(encode_frame(payload).unwrap());
            self
        }

        fn sent_packets(&self) -> Vec<Vec<u8>> {
            let mut packets = Vec::new();
            let mut rest = &self.written[..];
            while let Some((payload, used)) = try_decode(rest).unwrap() {
                packets.push(payload);
                rest = &rest[used..];
            }
            packets
        }
    }

    impl Transport for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.written.extend_from_slice(data);
            // The next scripted reply becomes readable once a request went out
            if let Some(reply) = self.replies.pop_front() {
                self.pending.extend(reply);
            }
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let n = buf.len().min(self.pending.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.pending.pop_front().unwrap();
            }
            Ok(n)
        }

        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeouts.push(timeout);
            Ok(())
        }

        fn clear(&mut self) -> Result<()> {
            self.pending.clear();
            self.clears += 1;
            Ok(())
        }
    }

    #[test]
    fn test_open_applies_timeout_and_clears() {
        let session = Session::open(Scripted::default(), SessionConfig::default()).unwrap();
        assert_eq!(session.transport().timeouts, [DEFAULT_TIMEOUT]);
        assert_eq!(session.transport().clears, 1);
        assert_eq!(session.counter(), 0);
    }

    #[test]
    fn test_fast_probe_mode_switches_timeouts() {
        let mut session = Session::open(Scripted::default(), SessionConfig::default()).unwrap();
        session.set_fast_probe_mode(true).unwrap();
        assert!(session.is_fast_probe());
        session.set_fast_probe_mode(false).unwrap();
        assert!(!session.is_fast_probe());
        assert_eq!(
            session.transport().timeouts,
            [DEFAULT_TIMEOUT, FAST_PROBE_TIMEOUT, DEFAULT_TIMEOUT]
        );
    }

    #[test]
    fn test_send_frames_request_and_parses_reply() {
        let transport = Scripted::default().reply(&[0x07, 0x01, 0x00, 0x00, 0x00, 0x00]);
        let mut session = Session::open(transport, SessionConfig::default()).unwrap();

        let packet = session
            .send(&Command::ClearBitstreamFlash)
            .unwrap()
            .unwrap();
        assert_eq!(packet.opcode, 0x07);
        assert_eq!(packet.counter, 1);
        assert_eq!(
            packet.response,
            Response::Generic(GenericResponse { error_code: 0 })
        );

        assert_eq!(session.transport().sent_packets(), [vec![0x07, 0x01]]);
    }

    #[test]
    fn test_send_without_response() {
        let mut session = Session::open(Scripted::default(), SessionConfig::default()).unwrap();
        let reply = session.send(&Command::RebootProgrammer).unwrap();
        assert!(reply.is_none());
        assert_eq!(session.transport().sent_packets(), [vec![0x08, 0x01]]);
    }

    #[test]
    fn test_request_checks_reply_layout() {
        let transport = Scripted::default().reply(&[0x07, 0x01, 0, 0, 0, 0]);
        let mut session = Session::open(transport, SessionConfig::default()).unwrap();

        assert!(matches!(
            session.request::<QueryDeviceResponse>(&Command::ClearBitstreamFlash),
            Err(FabricError::InvalidParameter(_))
        ));
        assert!(matches!(
            session.request::<GenericResponse>(&Command::RebootProgrammer),
            Err(FabricError::InvalidParameter(_))
        ));
        // Nothing went out and the counter did not move
        assert!(session.transport().sent_packets().is_empty());
        assert_eq!(session.counter(), 0);
    }

    #[test]
    fn test_send_parses_layout_of_command() {
        let mut body = vec![0x05, 0x01];
        body.extend_from_slice(&[0; 17]);
        let transport = Scripted::default().reply(&body);
        let mut session = Session::open(transport, SessionConfig::default()).unwrap();

        let packet = session
            .send(&Command::QueryBitstreamFlash)
            .unwrap()
            .unwrap();
        assert!(matches!(packet.response, Response::QueryBitstreamFlash(_)));
    }

    #[test]
    fn test_timeout_is_no_response() {
        let mut session = Session::open(Scripted::default(), SessionConfig::default()).unwrap();
        let err = session
            .request::<GenericResponse>(&Command::ProgramComplete)
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_checksum_error_propagates() {
        let mut transport = Scripted::default();
        transport
            .replies
            .push_back(vec![0x1B, 0x03, 0x00, 0x07, 0x01, 0x00]);
        let mut session = Session::open(transport, SessionConfig::default()).unwrap();
        assert!(matches!(
            session.request::<GenericResponse>(&Command::ClearBitstreamFlash),
            Err(FabricError::Checksum { .. })
        ));
    }

    #[test]
    fn test_short_packet_rejected() {
        let transport = Scripted::default().reply(&[0x07]);
        let mut session = Session::open(transport, SessionConfig::default()).unwrap();
        assert!(matches!(
            session.request::<GenericResponse>(&Command::ClearBitstreamFlash),
            Err(FabricError::MalformedPacket(1))
        ));
    }

    #[test]
    fn test_counter_rolls_over() {
        let mut session = Session::open(Scripted::default(), SessionConfig::default()).unwrap();
        for _ in 0..255 {
            session.send(&Command::RebootProgrammer).unwrap();
        }
        assert_eq!(session.counter(), 255);
        session.send(&Command::RebootProgrammer).unwrap();
        assert_eq!(session.counter(), 0);
        session.send(&Command::RebootProgrammer).unwrap();
        assert_eq!(session.counter(), 1);
    }

    #[test]
    fn test_mismatched_echo_accepted_by_default() {
        let transport = Scripted::default().reply(&[0x01, 0x09, 0, 0, 0, 0]);
        let mut session = Session::open(transport, SessionConfig::default()).unwrap();
        let resp = session
            .request::<GenericResponse>(&Command::ClearBitstreamFlash)
            .unwrap();
        assert!(resp.is_ok());
    }

    #[test]
    fn test_strict_correlation_rejects_mismatch() {
        let config = SessionConfig {
            strict_correlation: true,
            ..SessionConfig::default()
        };
        let transport = Scripted::default().reply(&[0x07, 0x09, 0, 0, 0, 0]);
        let mut session = Session::open(transport, config).unwrap();
        assert!(matches!(
            session.request::<GenericResponse>(&Command::ClearBitstreamFlash),
            Err(FabricError::UnexpectedResponse {
                expected_counter: 1,
                counter: 9,
                ..
            })
        ));
    }

    #[test]
    fn test_stale_bytes_dropped_before_send() {
        let mut transport = Scripted::default().reply(&[0x07, 0x01, 0, 0, 0, 0]);
        transport.pending.extend([0xAA, 0xBB]);
        let mut session = Session::open(transport, SessionConfig::default()).unwrap();
        session.transport_mut().pending.extend([0xCC]);

        let resp = session
            .request::<GenericResponse>(&Command::ClearBitstreamFlash)
            .unwrap();
        assert!(resp.is_ok());
    }
}
