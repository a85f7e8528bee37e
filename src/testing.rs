//! Helpers shared by the unit tests.

use std::io;

use crate::sample::ConvertedSample;
use crate::sink::{Sink, SinkError};

/// Sink that fails the writes at the given (zero-based) indices and accepts
/// everything else.
pub struct FailingSink {
    fail_at: Vec<u64>,
    writes: u64,
}

impl FailingSink {
    pub fn failing_at(indices: &[u64]) -> FailingSink {
        FailingSink {
            fail_at: indices.to_vec(),
            writes: 0,
        }
    }
}

impl Sink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn open(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn write(&mut self, _sample: &ConvertedSample) -> Result<(), SinkError> {
        let index = self.writes;
        self.writes += 1;

        if self.fail_at.contains(&index) {
            Err(SinkError::Io(io::Error::new(
                io::ErrorKind::Other,
                "disk full",
            )))
        } else {
            Ok(())
        }
    }

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
