//! Telemetry record for a monitoring run
//!
//! One comma-separated row per slow-sampler tick:
//! - seconds since scenario start
//! - node count, hourly cost, cumulative cost
//! - pod count, pending pod count, pending pod seconds

use crate::error::TelemetryError;
use crate::models::CostSample;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Header row of the record
pub const HEADER: &str =
    "time,nodes,per hour cost,cumulative cost,pods,pending pods,pending pod seconds";

/// Append-only destination for cost samples
pub trait TelemetrySink: Send {
    fn record(&mut self, sample: &CostSample) -> Result<(), TelemetryError>;

    fn flush(&mut self) -> Result<(), TelemetryError>;

    /// Final flush; every later call fails with [`TelemetryError::Closed`]
    fn close(&mut self) -> Result<(), TelemetryError>;
}

/// CSV writer with a bounded number of unflushed rows
pub struct CsvTelemetrySink<W: Write> {
    writer: BufWriter<W>,
    path: Option<PathBuf>,
    /// Rows buffered before a forced flush
    flush_every: usize,
    unflushed: usize,
    rows: u64,
    closed: bool,
}

impl CsvTelemetrySink<File> {
    /// Create `<dir>/<scenario>-cost-<timestamp>.csv` and write the header
    pub fn create(dir: &Path, scenario: &str) -> Result<Self, TelemetryError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name(scenario, chrono::Local::now()));
        let file = File::create(&path)?;

        let mut sink = Self::from_writer(file)?;
        info!(path = %path.display(), "Writing telemetry");
        sink.path = Some(path);
        Ok(sink)
    }
}

impl<W: Write> CsvTelemetrySink<W> {
    /// Wrap any writer; the header is written immediately
    pub fn from_writer(writer: W) -> Result<Self, TelemetryError> {
        let mut writer = BufWriter::new(writer);
        writeln!(writer, "{HEADER}")?;
        writer.flush()?;
        Ok(Self {
            writer,
            path: None,
            flush_every: 1,
            unflushed: 0,
            rows: 0,
            closed: false,
        })
    }

    pub fn with_flush_every(mut self, rows: usize) -> Self {
        self.flush_every = rows.max(1);
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Data rows written so far
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> Result<W, TelemetryError> {
        self.writer
            .into_inner()
            .map_err(|e| TelemetryError::Io(e.into_error()))
    }

    fn ensure_open(&self) -> Result<(), TelemetryError> {
        if self.closed {
            Err(TelemetryError::Closed)
        } else {
            Ok(())
        }
    }
}

impl<W: Write + Send> TelemetrySink for CsvTelemetrySink<W> {
    fn record(&mut self, sample: &CostSample) -> Result<(), TelemetryError> {
        self.ensure_open()?;
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{}",
            sample.elapsed_secs,
            sample.node_count,
            sample.hourly_cost,
            sample.cumulative_cost,
            sample.pod_count,
            sample.pending_pods,
            sample.pending_pod_seconds
        )?;
        self.rows += 1;
        self.unflushed += 1;

        if self.unflushed >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TelemetryError> {
        self.ensure_open()?;
        self.writer.flush()?;
        self.unflushed = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TelemetryError> {
        self.flush()?;
        self.closed = true;
        debug!(rows = self.rows, "Telemetry closed");
        Ok(())
    }
}

fn file_name(scenario: &str, now: chrono::DateTime<chrono::Local>) -> String {
    let stem: String = scenario
        .chars()
        .map(|c| if c.is_whitespace() || c == '/' { '-' } else { c })
        .collect();
    format!("{}-cost-{}.csv", stem, now.format("%Y_%m_%d_%H_%M_%S"))
}
