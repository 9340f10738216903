use crate::prelude::*;
use crate::pi30::command::TERMINATOR;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

pub const BAUD_RATE: u32 = 2400;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Inverters need this long after a command before the reply is complete.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);
/// No PI30 query reply is longer than this.
pub const MAX_RESPONSE_LEN: usize = 256;

/// One command/response round trip with the inverter. Implementations never
/// fail: transport problems come back as an empty response.
pub trait Exchange: Send + Sync {
    fn exchange(&self, command: Command) -> RawResponse;

    /// Human readable name of the link, for logs and errors.
    fn port(&self) -> &str;
}

/// Serial link to one inverter. The device is opened for each exchange and
/// closed again when it ends, so nothing holds the port between commands.
#[derive(Clone, Debug)]
pub struct Session {
    port: String,
    timeout: Duration,
    settle: Duration,
}

impl Session {
    pub fn new<S: Into<String>>(port: S, timeout: Duration) -> Self {
        Self {
            port: port.into(),
            timeout,
            settle: SETTLE_DELAY,
        }
    }

    pub fn from_config(inverter: &config::Inverter) -> Self {
        Self::new(inverter.port(), inverter.read_timeout())
    }

    fn open(&self) -> serialport::Result<Box<dyn SerialPort>> {
        serialport::new(&self.port, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.timeout)
            .open()
    }

    fn try_exchange(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut port = self.open()?;
        // drop anything left over from an interrupted exchange
        port.clear(ClearBuffer::Input)?;
        Ok(transact(port.as_mut(), frame, self.settle)?)
    }
}

impl Exchange for Session {
    fn exchange(&self, command: Command) -> RawResponse {
        trace!("{}: TX {} {:02x?}", self.port, command, command.frame());

        match self.try_exchange(command.frame()) {
            Ok(bytes) => {
                let response = RawResponse::from_bytes(&bytes);
                debug!("{}: RX {} {:?}", self.port, command, response.as_str());
                response
            }
            Err(err) => {
                error!("serial error on {} during {}: {}", self.port, command, err);
                RawResponse::empty()
            }
        }
    }

    fn port(&self) -> &str {
        &self.port
    }
}

/// Writes `frame`, waits `settle`, then reads the reply.
pub fn transact<P: Read + Write + ?Sized>(
    port: &mut P,
    frame: &[u8],
    settle: Duration,
) -> io::Result<Vec<u8>> {
    port.write_all(frame)?;
    port.flush()?;

    std::thread::sleep(settle);

    read_response(port)
}

/// Reads until the CR terminator, [`MAX_RESPONSE_LEN`] bytes, or the port's
/// read timeout. A timeout is not an error; whatever arrived is returned.
fn read_response<P: Read + ?Sized>(port: &mut P) -> io::Result<Vec<u8>> {
    let mut buf = [0u8; MAX_RESPONSE_LEN];
    let mut len = 0;

    while len < MAX_RESPONSE_LEN {
        match port.read(&mut buf[len..]) {
            Ok(0) => break,
            Ok(n) => {
                let start = len;
                len += n;
                if buf[start..len].contains(&TERMINATOR) {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(buf[..len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Serves canned chunks, then times out like a quiet serial line.
    #[derive(Default)]
    struct FakePort {
        written: Vec<u8>,
        chunks: VecDeque<io::Result<Vec<u8>>>,
    }

    impl FakePort {
        fn replying(chunks: &[&[u8]]) -> Self {
            Self {
                written: Vec::new(),
                chunks: chunks.iter().map(|c| Ok(c.to_vec())).collect(),
            }
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(Ok(chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            }
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_whole_frame_and_reads_to_terminator() {
        let mut port = FakePort::replying(&[&b"(B"[..], &b"\r"[..], &b"(ignored\r"[..]]);
        let reply = transact(&mut port, Command::Qmodi.frame(), Duration::ZERO).unwrap();

        assert_eq!(port.written, Command::Qmodi.frame());
        assert_eq!(reply, b"(B\r");
        assert_eq!(port.chunks.len(), 1);
    }

    #[test]
    fn timeout_returns_partial_reply() {
        let mut port = FakePort::replying(&[&b"(230.1 50."[..]]);
        let reply = transact(&mut port, Command::Qpigs.frame(), Duration::ZERO).unwrap();
        assert_eq!(reply, b"(230.1 50.");

        let mut port = FakePort::default();
        let reply = transact(&mut port, Command::Qpigs.frame(), Duration::ZERO).unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn read_is_bounded() {
        let noise = vec![b'1'; 200];
        let mut port = FakePort::replying(&[noise.as_slice(), noise.as_slice()]);
        let reply = transact(&mut port, Command::Qpiws.frame(), Duration::ZERO).unwrap();
        assert_eq!(reply.len(), MAX_RESPONSE_LEN);
    }

    #[test]
    fn io_errors_propagate() {
        let mut port = FakePort::default();
        port.chunks
            .push_back(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
        let err = transact(&mut port, Command::Qpigs.frame(), Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn missing_device_gives_empty_response() {
        let session = Session::new("/dev/pi30-bridge-no-such-port", Duration::from_millis(10));
        assert!(session.exchange(Command::Qpigs).is_empty());
    }
}
