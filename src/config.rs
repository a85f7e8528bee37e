use std::time::Duration;

use thiserror::Error;

use crate::link::LinkError;

pub const DEFAULT_PORT: &str = "/dev/ttyACM0";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Upper bound for a single blocking read while streaming, so stop requests
/// and deadlines are noticed promptly.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// How long request/response exchanges (identity, settings) may take.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default capacity of a live [`ChannelSink`](crate::sink::ChannelSink).
pub const SAMPLE_BUFFER_SIZE: usize = 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid serial port {0:?}")]
    InvalidPort(String),
    #[error("failed to open serial port {port}: {source}")]
    Serial {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("unsupported board: {0}")]
    UnsupportedBoard(String),
    #[error("unsupported measurement range selector {0}")]
    UnsupportedRange(u32),
    #[error("sample width must be at least one channel")]
    ZeroWidth,
    #[error("no sinks configured")]
    NoSinks,
    #[error("board query failed: {0}")]
    Link(#[from] LinkError),
}

/// Session parameters, fixed when the controller is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub port: String,
    /// Stop after this many collected samples; 0 means unbounded.
    pub max_sample_count: u64,
    /// Stop once this much time has passed since sampling started; `None`
    /// means unbounded.
    pub timeout: Option<Duration>,
    pub read_timeout: Duration,
}

impl SessionConfig {
    pub fn new(port: impl Into<String>) -> SessionConfig {
        SessionConfig {
            port: port.into(),
            max_sample_count: 0,
            timeout: None,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_max_sample_count(mut self, max_sample_count: u64) -> Self {
        self.max_sample_count = max_sample_count;
        self
    }

    /// A zero duration is treated as unbounded, matching the `--timeout 0` flag.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Neither a sample count nor a deadline bounds the session: it only ends
    /// on an explicit stop or a lost link.
    pub fn is_unbounded(&self) -> bool {
        self.max_sample_count == 0 && self.timeout.is_none()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::new(DEFAULT_PORT)
    }
}
