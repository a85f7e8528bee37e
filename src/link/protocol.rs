//! Binary framing used by the sampling board firmware.
//!
//! Every frame is `[0xA5 0x5A] [CMD] [LEN] [PAYLOAD; LEN] [CHK]` where `CHK` is the
//! wrapping sum of `CMD`, `LEN` and the payload bytes.

use super::FramingError;

pub const SYNC_1: u8 = 0xA5;
pub const SYNC_2: u8 = 0x5A;

const HEADER_SIZE: usize = 4;
const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Identity,
    Get,
    Start,
    Stop,
    Data,
}

impl Command {
    pub fn to_byte(self) -> u8 {
        match self {
            Command::Identity => b'I',
            Command::Get => b'G',
            Command::Start => b'S',
            Command::Stop => b'X',
            Command::Data => b'D',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Command> {
        match byte {
            b'I' => Some(Command::Identity),
            b'G' => Some(Command::Get),
            b'S' => Some(Command::Start),
            b'X' => Some(Command::Stop),
            b'D' => Some(Command::Data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub payload: Vec<u8>,
}

fn checksum(command: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(command.wrapping_add(payload.len() as u8), |c, &b| {
            c.wrapping_add(b)
        })
}

pub fn build_frame(command: Command, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);

    let cmd = command.to_byte();
    let mut result = Vec::with_capacity(payload.len() + HEADER_SIZE + 1);

    result.push(SYNC_1);
    result.push(SYNC_2);
    result.push(cmd);
    result.push(payload.len() as u8);
    result.extend_from_slice(payload);
    result.push(checksum(cmd, payload));

    result
}

pub fn build_data_frame(channels: &[i16]) -> Vec<u8> {
    let payload = channels
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect::<Vec<u8>>();

    build_frame(Command::Data, &payload)
}

pub fn decode_channels(payload: &[u8]) -> Result<Vec<i16>, FramingError> {
    if payload.len() % 2 != 0 {
        return Err(FramingError::OddPayload(payload.len()));
    }

    Ok(payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Accumulates raw bytes and splits them into frames.
pub struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> FrameReader {
        FrameReader { buffer: Vec::new() }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete frame, a framing error for a corrupted one, or
    /// `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FramingError>> {
        let sync_i = match self
            .buffer
            .windows(2)
            .position(|pair| pair == [SYNC_1, SYNC_2])
        {
            Some(i) => i,
            None => {
                // keep a trailing first sync byte, its pair may still be in flight
                let keep = usize::from(self.buffer.last() == Some(&SYNC_1));
                let skipped = self.buffer.len() - keep;
                if skipped > 0 {
                    log::trace!("skipping {} bytes without sync", skipped);
                    self.buffer.drain(..skipped);
                }
                return None;
            }
        };

        if sync_i > 0 {
            log::trace!("skipping {} bytes before sync", sync_i);
            self.buffer.drain(..sync_i);
        }

        if self.buffer.len() < HEADER_SIZE {
            return None;
        }

        let cmd = self.buffer[2];
        let len = self.buffer[3] as usize;
        let total_len = HEADER_SIZE + len + 1;

        if self.buffer.len() < total_len {
            return None;
        }

        let payload = &self.buffer[HEADER_SIZE..HEADER_SIZE + len];
        let expected = checksum(cmd, payload);
        let actual = self.buffer[total_len - 1];

        if expected != actual {
            if self.is_frame_boundary(total_len) {
                // the length is trustworthy, drop the whole frame so its payload
                // is never rescanned for sync bytes
                self.buffer.drain(..total_len);
            } else {
                // the length byte itself is suspect, only skip the sync byte
                self.buffer.drain(..1);
            }
            return Some(Err(FramingError::BadChecksum { expected, actual }));
        }

        let payload = payload.to_vec();
        self.buffer.drain(..total_len);

        match Command::from_byte(cmd) {
            Some(command) => Some(Ok(Frame { command, payload })),
            None => Some(Err(FramingError::UnknownCommand(cmd))),
        }
    }

    /// Whether `offset` is the end of the buffered data or the start of another frame.
    fn is_frame_boundary(&self, offset: usize) -> bool {
        match &self.buffer[offset..] {
            [] => true,
            [first] => *first == SYNC_1,
            [first, second, ..] => *first == SYNC_1 && *second == SYNC_2,
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}
