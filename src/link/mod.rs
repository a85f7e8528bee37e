use std::time::Duration;

use thiserror::Error;

use crate::board::BoardIdentity;
use crate::sample::Sample;

mod board_link;
#[cfg(test)]
pub(crate) mod mock;
pub mod protocol;

pub use board_link::{BoardLink, Transport};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("checksum mismatch (expected 0x{expected:02X}, got 0x{actual:02X})")]
    BadChecksum { expected: u8, actual: u8 },
    #[error("unknown command byte 0x{0:02X}")]
    UnknownCommand(u8),
    #[error("data payload of {0} bytes is not a whole number of 16-bit channels")]
    OddPayload(usize),
    #[error("frame has {actual} channels, session expects {expected}")]
    WidthMismatch { expected: usize, actual: usize },
    #[error("malformed {0} response")]
    MalformedResponse(&'static str),
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("timed out waiting for the board")]
    Timeout,
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("link disconnected: {0}")]
    Disconnected(String),
    #[error("link IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether the session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::Disconnected(_) | LinkError::Io(_))
    }
}

/// Byte-stream connection to a sampling board, framed into samples.
///
/// A link is owned by exactly one controller while it is streaming.
pub trait DeviceLink: Send {
    /// One-time identity query, issued before streaming starts.
    fn board_id(&mut self) -> Result<BoardIdentity, LinkError>;

    /// Reads a single board setting addressed by a one-character key.
    fn query(&mut self, key: u8) -> Result<u32, LinkError>;

    fn start_streaming(&mut self) -> Result<(), LinkError>;
    fn stop_streaming(&mut self) -> Result<(), LinkError>;

    /// Blocks for at most `timeout` waiting for the next data frame.
    fn read_next_sample(&mut self, timeout: Duration) -> Result<Sample, LinkError>;
}

impl<L: DeviceLink + ?Sized> DeviceLink for Box<L> {
    fn board_id(&mut self) -> Result<BoardIdentity, LinkError> {
        (**self).board_id()
    }

    fn query(&mut self, key: u8) -> Result<u32, LinkError> {
        (**self).query(key)
    }

    fn start_streaming(&mut self) -> Result<(), LinkError> {
        (**self).start_streaming()
    }

    fn stop_streaming(&mut self) -> Result<(), LinkError> {
        (**self).stop_streaming()
    }

    fn read_next_sample(&mut self, timeout: Duration) -> Result<Sample, LinkError> {
        (**self).read_next_sample(timeout)
    }
}
