use std::fmt;
use std::time::Duration;

/// Monotonic time of a sample, in microseconds since the link was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_micros(us: u64) -> Timestamp {
        Timestamp(us)
    }

    pub fn from_elapsed(elapsed: Duration) -> Timestamp {
        // saturate instead of wrapping, a session would need to run for ~584k years
        Timestamp(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX))
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 * 1e-6
    }
}

/// Formats as seconds with exactly six decimals, computed from the integer
/// microseconds so no precision is lost.
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

/// One raw multi-channel reading as framed by the device link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    timestamp: Timestamp,
    channels: Vec<i16>,
}

impl Sample {
    pub fn new(timestamp: Timestamp, channels: Vec<i16>) -> Sample {
        Sample {
            timestamp,
            channels,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn channels(&self) -> &[i16] {
        &self.channels
    }

    pub fn width(&self) -> usize {
        self.channels.len()
    }
}

/// A sample after conversion to engineering units.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedSample {
    timestamp: Timestamp,
    values: Vec<f64>,
}

impl ConvertedSample {
    pub fn new(timestamp: Timestamp, values: Vec<f64>) -> ConvertedSample {
        ConvertedSample { timestamp, values }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }
}
