use thiserror::Error;

use crate::sample::ConvertedSample;

mod channel;
mod csv;
mod memory;

pub use self::channel::ChannelSink;
pub use self::csv::CsvSampleSink;
pub use self::memory::{MemorySink, MemorySinkHandle};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink is not open")]
    NotOpen,
    #[error("sink is already closed")]
    Closed,
    #[error("sample has {actual} values, sink expects {expected}")]
    WidthMismatch { expected: usize, actual: usize },
    #[error("sink buffer full, sample discarded")]
    Overflow,
    #[error("sink consumer went away")]
    Disconnected,
}

/// Consumer of converted samples.
///
/// `write` must never block indefinitely: it runs on the sampling thread and
/// anything it waits for stalls the device link. Once `close` has returned
/// `Ok`, every earlier successful `write` is persisted.
pub trait Sink: Send {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<(), SinkError>;
    fn write(&mut self, sample: &ConvertedSample) -> Result<(), SinkError>;
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Per-sink failure summary gathered during a session.
#[derive(Debug)]
pub struct SinkFailure {
    pub sink: String,
    pub failed_writes: u64,
    pub first_error: SinkError,
}

/// Closes every sink, collecting the ones that failed to close.
pub fn close_sinks(sinks: &mut [Box<dyn Sink>]) -> Vec<(String, SinkError)> {
    let mut failures = Vec::new();

    for sink in sinks.iter_mut() {
        if let Err(err) = sink.close() {
            log::error!("failed to close sink {}: {}", sink.name(), err);
            failures.push((sink.name().to_string(), err));
        }
    }

    failures
}

/// Lifecycle shared by the sink implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    Created,
    Open,
    Closed,
}

impl SinkState {
    fn check_writable(self) -> Result<(), SinkError> {
        match self {
            SinkState::Created => Err(SinkError::NotOpen),
            SinkState::Open => Ok(()),
            SinkState::Closed => Err(SinkError::Closed),
        }
    }
}
