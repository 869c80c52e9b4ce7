//! Newline-delimited JSON input: one array of envelopes per line.

use crate::core::{PersisterError, Result};
use crate::pipeline::MetricBatch;
use crate::provider::MetricDispatcher;
use std::io::BufRead;

/// Totals for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Non-blank lines read
    pub lines: usize,
    /// Arrays handed to the dispatcher
    pub published: usize,
    /// Envelopes inside the published arrays
    pub envelopes: usize,
    /// Lines that could not be decoded
    pub rejected_lines: usize,
}

/// Decode one line into an envelope array.
pub fn decode_line(line: &str, line_number: usize) -> Result<MetricBatch> {
    serde_json::from_str(line).map_err(|e| PersisterError::Decode {
        line: line_number,
        message: e.to_string(),
    })
}

/// Read `reader` to the end, publishing every decodable line.
///
/// Blocks whenever the dispatcher's ring is full. Undecodable lines are
/// logged and skipped; a shut down dispatcher ends the run with an error.
pub fn publish_lines<B: BufRead>(reader: B, dispatcher: &MetricDispatcher) -> Result<IngestStats> {
    let mut stats = IngestStats::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        stats.lines += 1;

        let batch = match decode_line(trimmed, index + 1) {
            Ok(batch) => batch,
            Err(e) => {
                stats.rejected_lines += 1;
                tracing::warn!(error = %e, "Skipping undecodable input line");
                continue;
            },
        };

        stats.envelopes += batch.len();
        dispatcher.publish(batch)?;
        stats.published += 1;
    }

    tracing::debug!(
        lines = stats.lines,
        published = stats.published,
        rejected = stats.rejected_lines,
        "Input exhausted"
    );
    Ok(stats)
}
