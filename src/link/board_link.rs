use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;

use super::protocol::{self, Command, Frame, FrameReader};
use super::{DeviceLink, FramingError, LinkError};
use crate::board::BoardIdentity;
use crate::config::{ConfigError, RESPONSE_TIMEOUT};
use crate::sample::{Sample, Timestamp};

const READ_CHUNK_SIZE: usize = 256;

/// Byte transport underneath a [`BoardLink`].
pub trait Transport: Read + Write + Send {
    /// Bounds how long the next `read` may block.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl Transport for Box<dyn SerialPort> {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout)?;
        Ok(())
    }
}

/// Device link speaking the board's framed protocol over any byte transport.
pub struct BoardLink<T> {
    transport: T,
    reader: FrameReader,
    opened_at: Instant,
}

impl BoardLink<Box<dyn SerialPort>> {
    pub fn open_serial(port: &str, baud_rate: u32) -> Result<Self, ConfigError> {
        if port.trim().is_empty() {
            return Err(ConfigError::InvalidPort(port.to_string()));
        }

        let serial = serialport::new(port, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(RESPONSE_TIMEOUT)
            .open()
            .map_err(|err| ConfigError::Serial {
                port: port.to_string(),
                source: err,
            })?;

        log::info!("opened serial port {} at {} baud", port, baud_rate);

        Ok(BoardLink::new(serial))
    }
}

impl<T: Transport> BoardLink<T> {
    pub fn new(transport: T) -> BoardLink<T> {
        BoardLink {
            transport,
            reader: FrameReader::new(),
            opened_at: Instant::now(),
        }
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn send(&mut self, command: Command, payload: &[u8]) -> Result<(), LinkError> {
        log::trace!("sending {:?} frame, {} bytes payload", command, payload.len());

        let bytes = protocol::build_frame(command, payload);
        self.transport
            .write_all(&bytes)
            .and_then(|_| self.transport.flush())
            .map_err(classify_io_error)
    }

    /// Pulls bytes from the transport until a frame (or a corrupted one) is
    /// available, or `deadline` passes.
    fn next_frame(&mut self, deadline: Instant) -> Result<Frame, LinkError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            if let Some(parsed) = self.reader.next_frame() {
                return parsed.map_err(LinkError::from);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LinkError::Timeout);
            }

            self.transport
                .set_read_timeout(deadline - now)
                .map_err(classify_io_error)?;

            match self.transport.read(&mut chunk) {
                Ok(0) => {
                    return Err(LinkError::Disconnected(
                        "stream closed by remote end (board unplugged?)".into(),
                    ))
                }
                Ok(n) => self.reader.extend(&chunk[..n]),
                Err(err)
                    if err.kind() == ErrorKind::TimedOut || err.kind() == ErrorKind::WouldBlock =>
                {
                    return Err(LinkError::Timeout)
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(classify_io_error(err)),
            }
        }
    }

    /// Sends a request and waits for the response frame with the same command,
    /// skipping any data frames still in flight.
    fn request(&mut self, command: Command, payload: &[u8]) -> Result<Frame, LinkError> {
        self.send(command, payload)?;

        let deadline = Instant::now() + RESPONSE_TIMEOUT;

        loop {
            match self.next_frame(deadline) {
                Ok(frame) if frame.command == command => return Ok(frame),
                Ok(frame) => {
                    log::debug!(
                        "skipping {:?} frame while waiting for {:?}",
                        frame.command,
                        command
                    );
                }
                Err(LinkError::Framing(err)) => {
                    log::warn!("framing error while waiting for {:?}: {}", command, err);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<T: Transport> DeviceLink for BoardLink<T> {
    fn board_id(&mut self) -> Result<BoardIdentity, LinkError> {
        let frame = self.request(Command::Identity, &[])?;

        let text = std::str::from_utf8(&frame.payload)
            .map_err(|_| FramingError::MalformedResponse("identity"))?;
        let (board_id, accel_type) = text
            .split_once('\0')
            .ok_or(FramingError::MalformedResponse("identity"))?;

        Ok(BoardIdentity::new(board_id, accel_type))
    }

    fn query(&mut self, key: u8) -> Result<u32, LinkError> {
        let frame = self.request(Command::Get, &[key])?;

        match frame.payload.as_slice() {
            [k, a, b, c, d] if *k == key => Ok(u32::from_le_bytes([*a, *b, *c, *d])),
            _ => Err(FramingError::MalformedResponse("get").into()),
        }
    }

    fn start_streaming(&mut self) -> Result<(), LinkError> {
        self.send(Command::Start, &[])
    }

    fn stop_streaming(&mut self) -> Result<(), LinkError> {
        self.send(Command::Stop, &[])
    }

    fn read_next_sample(&mut self, timeout: Duration) -> Result<Sample, LinkError> {
        let deadline = Instant::now() + timeout;

        loop {
            let frame = self.next_frame(deadline)?;

            if frame.command != Command::Data {
                log::debug!("ignoring {:?} frame while streaming", frame.command);
                continue;
            }

            let channels = protocol::decode_channels(&frame.payload)?;
            let timestamp = Timestamp::from_elapsed(self.opened_at.elapsed());

            return Ok(Sample::new(timestamp, channels));
        }
    }
}

fn classify_io_error(err: io::Error) -> LinkError {
    match err.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => LinkError::Disconnected(err.to_string()),
        _ => LinkError::Io(err),
    }
}
