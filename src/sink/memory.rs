use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Sink, SinkError, SinkState};
use crate::sample::ConvertedSample;

/// Keeps samples in memory, observable from other threads through a
/// [`MemorySink::handle`] while the session runs.
pub struct MemorySink {
    name: String,
    state: SinkState,
    limit: Option<usize>,
    samples: Arc<Mutex<Vec<ConvertedSample>>>,
}

/// Read side of a [`MemorySink`].
#[derive(Clone)]
pub struct MemorySinkHandle {
    samples: Arc<Mutex<Vec<ConvertedSample>>>,
}

impl MemorySinkHandle {
    pub fn samples(&self) -> Vec<ConvertedSample> {
        lock(&self.samples).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.samples).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock(samples: &Mutex<Vec<ConvertedSample>>) -> MutexGuard<'_, Vec<ConvertedSample>> {
    // a panicking reader cannot leave the vector half-written, keep going
    samples.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> MemorySink {
        MemorySink {
            name: name.into(),
            state: SinkState::Created,
            limit: None,
            samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Refuses samples beyond `limit` with [`SinkError::Overflow`].
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn handle(&self) -> MemorySinkHandle {
        MemorySinkHandle {
            samples: self.samples.clone(),
        }
    }
}

impl Sink for MemorySink {
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

        let mut samples = lock(&self.samples);
        if matches!(self.limit, Some(limit) if samples.len() >= limit) {
            return Err(SinkError::Overflow);
        }

        samples.push(sample.clone());

        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.state = SinkState::Closed;
        Ok(())
    }
}
