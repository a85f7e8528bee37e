//! Host side of the accelmon sampling boards.
//!
//! A [`Controller`] owns a [`DeviceLink`] to the board, reads framed samples
//! from it, converts them to engineering units and fans them out to a list of
//! [`Sink`]s. The loop runs until a sample count is reached, a timeout
//! elapses, a stop is requested through a [`ControllerHandle`], or the link is
//! lost. [`SamplingSession`] runs it on a dedicated thread.

pub mod board;
pub mod config;
pub mod controller;
pub mod converter;
pub mod link;
pub mod sample;
pub mod session;
pub mod sink;

#[cfg(test)]
mod testing;

pub use board::{AccelerometerType, BoardIdentity, ChannelLayout};
pub use config::{ConfigError, SessionConfig};
pub use controller::{
    Controller, ControllerBuilder, ControllerError, ControllerHandle, Counters, SessionReport,
    State, StopReason,
};
pub use converter::Converter;
pub use link::{BoardLink, DeviceLink, FramingError, LinkError};
pub use sample::{ConvertedSample, Sample, Timestamp};
pub use session::SamplingSession;
pub use sink::{ChannelSink, CsvSampleSink, MemorySink, Sink, SinkError};
