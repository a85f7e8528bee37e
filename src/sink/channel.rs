use std::sync::mpsc;

use super::{Sink, SinkError, SinkState};
use crate::config::SAMPLE_BUFFER_SIZE;
use crate::sample::ConvertedSample;

/// Forwards samples to a live consumer through a bounded channel.
///
/// A full channel drops the sample with [`SinkError::Overflow`] instead of
/// stalling the sampling thread.
pub struct ChannelSink {
    name: String,
    state: SinkState,
    sampled_tx: Option<mpsc::SyncSender<ConvertedSample>>,
}

impl ChannelSink {
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
    ) -> (ChannelSink, mpsc::Receiver<ConvertedSample>) {
        let (sampled_tx, sampled_rx) = mpsc::sync_channel(capacity);

        let sink = ChannelSink {
            name: name.into(),
            state: SinkState::Created,
            sampled_tx: Some(sampled_tx),
        };

        (sink, sampled_rx)
    }

    /// Channel sink sized to [`SAMPLE_BUFFER_SIZE`] samples.
    pub fn with_default_capacity(
        name: impl Into<String>,
    ) -> (ChannelSink, mpsc::Receiver<ConvertedSample>) {
        ChannelSink::new(name, SAMPLE_BUFFER_SIZE)
    }
}

impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), SinkError> {
        match self.state {
            SinkState::Closed => Err(SinkError::Closed),
            _ => {
                self.state = SinkState::Open;
                Ok(())
            }
        }
    }

    fn write(&mut self, sample: &ConvertedSample) -> Result<(), SinkError> {
        self.state.check_writable()?;

        let sampled_tx = self.sampled_tx.as_ref().ok_or(SinkError::Closed)?;

        match sampled_tx.try_send(sample.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::TrySendError::Full(_)) => Err(SinkError::Overflow),
            Err(mpsc::TrySendError::Disconnected(_)) => Err(SinkError::Disconnected),
        }
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.state = SinkState::Closed;
        // dropping the sender ends the receiver's iteration
        self.sampled_tx = None;
        Ok(())
    }
}
