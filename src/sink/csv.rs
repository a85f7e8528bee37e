use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{Sink, SinkError, SinkState};
use crate::sample::ConvertedSample;

const WRITE_BUFFER_CAPACITY: usize = 64 * 1024;

/// Writes one CSV row per sample: the timestamp in seconds followed by one
/// column per channel.
///
/// Values use Rust's shortest round-trip `f64` formatting by default, which
/// never depends on the locale, so parsing a cell gives back the exact value
/// written. [`CsvSampleSink::with_precision`] switches to a fixed number of
/// decimals instead.
pub struct CsvSampleSink {
    name: String,
    path: PathBuf,
    width: usize,
    header: bool,
    precision: Option<usize>,
    state: SinkState,
    writer: Option<BufWriter<File>>,
    rows_written: u64,
}

impl CsvSampleSink {
    pub fn new(path: impl AsRef<Path>, width: usize) -> CsvSampleSink {
        let path = path.as_ref().to_path_buf();

        CsvSampleSink {
            name: format!("csv:{}", path.display()),
            path,
            width,
            header: true,
            precision: None,
            state: SinkState::Created,
            writer: None,
            rows_written: 0,
        }
    }

    pub fn without_header(mut self) -> Self {
        self.header = false;
        self
    }

    /// Writes every value with exactly `decimals` digits after the point.
    pub fn with_precision(mut self, decimals: usize) -> Self {
        self.precision = Some(decimals);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

fn write_csv_row<I, T>(writer: &mut impl Write, items: I) -> std::io::Result<()>
where
    I: IntoIterator<Item = T>,
    T: Display,
{
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            writer.write_all(b",")?;
        }
        write!(writer, "{}", item)?;
    }

    writer.write_all(b"\n")
}

struct Fixed(f64, usize);

impl Display for Fixed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.*}", self.1, self.0)
    }
}

impl Sink for CsvSampleSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), SinkError> {
        match self.state {
            SinkState::Open => return Ok(()),
            SinkState::Closed => return Err(SinkError::Closed),
            SinkState::Created => {}
        }

        let file = File::create(&self.path)?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, file);

        if self.header {
            let columns = std::iter::once("time_s".to_string())
                .chain((0..self.width).map(|i| format!("ch{}", i)));
            write_csv_row(&mut writer, columns)?;
        }

        log::debug!("opened CSV sink {:?} with {} channels", self.path, self.width);

        self.writer = Some(writer);
        self.state = SinkState::Open;

        Ok(())
    }

    fn write(&mut self, sample: &ConvertedSample) -> Result<(), SinkError> {
        self.state.check_writable()?;

        if sample.width() != self.width {
            return Err(SinkError::WidthMismatch {
                expected: self.width,
                actual: sample.width(),
            });
        }

        let writer = self.writer.as_mut().ok_or(SinkError::NotOpen)?;

        write!(writer, "{},", sample.timestamp())?;
        match self.precision {
            Some(decimals) => {
                let cells = sample.values().iter().map(|&value| Fixed(value, decimals));
                write_csv_row(writer, cells)?;
            }
            None => write_csv_row(writer, sample.values())?,
        }

        self.rows_written += 1;

        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.state = SinkState::Closed;

        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|err| err.into_error())?;
            file.sync_all()?;

            log::info!("closed CSV sink {:?} after {} rows", self.path, self.rows_written);
        }

        Ok(())
    }
}
