//! Storage boundary: bulk writers for a buffered batch.

use crate::core::{Definition, Dimensions, Measurement, PersisterError, Result};
use crate::repository::buffer::MeasurementBuffer;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Writes a whole grouping buffer to a backing store.
///
/// Any failure must come back as `Err`; the caller decides what happens to
/// the buffered data.
pub trait MeasurementWriter: Send {
    /// Write every series in `buffer`.
    fn write(&mut self, buffer: &MeasurementBuffer) -> Result<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

impl<W: MeasurementWriter + ?Sized> MeasurementWriter for Box<W> {
    fn write(&mut self, buffer: &MeasurementBuffer) -> Result<()> {
        (**self).write(buffer)
    }

    fn backend(&self) -> &'static str {
        (**self).backend()
    }
}

/// One series as captured by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenSeries {
    /// Name, tenant and region
    pub definition: Definition,
    /// Dimension set of the series
    pub dimensions: Dimensions,
    /// Samples in arrival order
    pub measurements: Vec<Measurement>,
}

/// In-process sink. Clones share the same storage, so one store can back
/// every processor's writer and be inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    written: Arc<Mutex<Vec<WrittenSeries>>>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, in write order.
    pub fn series(&self) -> Vec<WrittenSeries> {
        self.written.lock().clone()
    }

    /// Series written for one definition.
    pub fn series_for(&self, definition: &Definition) -> Vec<WrittenSeries> {
        self.written
            .lock()
            .iter()
            .filter(|s| &s.definition == definition)
            .cloned()
            .collect()
    }

    /// Total measurements across all written series.
    pub fn measurement_count(&self) -> usize {
        self.written.lock().iter().map(|s| s.measurements.len()).sum()
    }

    /// Number of `write` calls received.
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

impl MeasurementWriter for MemoryStore {
    fn write(&mut self, buffer: &MeasurementBuffer) -> Result<()> {
        let mut written = self.written.lock();
        written.extend(buffer.series().map(|s| WrittenSeries {
            definition: s.definition.clone(),
            dimensions: s.dimensions.clone(),
            measurements: s.measurements.to_vec(),
        }));
        *self.writes.lock() += 1;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Accepts every batch and keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardWriter;

impl MeasurementWriter for DiscardWriter {
    fn write(&mut self, _buffer: &MeasurementBuffer) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "discard"
    }
}

#[derive(Serialize)]
struct SeriesRecord<'a> {
    name: &'a str,
    tenant_id: &'a str,
    region: &'a str,
    dimensions: &'a Dimensions,
    measurements: Vec<MeasurementRecord<'a>>,
}

#[derive(Serialize)]
struct MeasurementRecord<'a> {
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<String>,
    value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    value_meta: Option<&'a BTreeMap<String, String>>,
}

/// Appends one JSON object per series per flush to a file.
///
/// Each flush is serialized in full before anything reaches the output, so a
/// failed write never leaves bytes behind for the next flush to emit.
pub struct JsonLinesWriter<O = File> {
    path: PathBuf,
    out: O,
    /// Last write failed, possibly mid-line
    torn: bool,
}

impl JsonLinesWriter {
    /// Open (creating as needed) `<dir>/measurements-<ordinal>.jsonl`.
    pub fn open(dir: &Path, ordinal: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("measurements-{}.jsonl", ordinal));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: file,
            torn: false,
        })
    }
}

impl<O> JsonLinesWriter<O> {
    /// File this writer appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode(buffer: &MeasurementBuffer) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for series in buffer.series() {
            let record = SeriesRecord {
                name: &series.definition.name,
                tenant_id: &series.definition.tenant_id,
                region: &series.definition.region,
                dimensions: series.dimensions,
                measurements: series
                    .measurements
                    .iter()
                    .map(|m| MeasurementRecord {
                        timestamp: m.timestamp,
                        time: DateTime::<Utc>::from_timestamp_millis(m.timestamp)
                            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
                        value: m.value,
                        value_meta: m.value_meta.as_ref(),
                    })
                    .collect(),
            };
            serde_json::to_writer(&mut bytes, &record)?;
            bytes.push(b'\n');
        }
        Ok(bytes)
    }
}

impl<O: Write + Send> MeasurementWriter for JsonLinesWriter<O> {
    fn write(&mut self, buffer: &MeasurementBuffer) -> Result<()> {
        let mut bytes = Self::encode(buffer)?;
        if self.torn {
            // Terminate the partial line left by the failed write
            bytes.insert(0, b'\n');
        }

        let result = self.out.write_all(&bytes).and_then(|()| self.out.flush());
        self.torn = result.is_err();
        result.map_err(|e| PersisterError::storage(format!("{}: {}", self.path.display(), e)))
    }

    fn backend(&self) -> &'static str {
        "json_lines"
    }
}
