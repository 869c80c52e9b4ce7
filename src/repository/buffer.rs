//! Grouping buffer: measurements keyed by series identity.
//!
//! Owned by exactly one repository. Append-only between flushes and emptied
//! wholesale after every flush attempt.

use crate::core::{Definition, Dimensions, Measurement};
use ahash::AHashMap;

/// Definition → Dimensions → measurements in insertion order.
#[derive(Debug, Default)]
pub struct MeasurementBuffer {
    series: AHashMap<Definition, AHashMap<Dimensions, Vec<Measurement>>>,
    measurements: usize,
}

/// One logical time series as presented to a writer.
#[derive(Debug, Clone, Copy)]
pub struct SeriesRef<'a> {
    /// Name, tenant and region
    pub definition: &'a Definition,
    /// Dimension set of the series
    pub dimensions: &'a Dimensions,
    /// Samples in arrival order
    pub measurements: &'a [Measurement],
}

impl MeasurementBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `measurement` to the series `(definition, dimensions)`.
    pub fn put(&mut self, definition: Definition, dimensions: Dimensions, measurement: Measurement) {
        self.series
            .entry(definition)
            .or_default()
            .entry(dimensions)
            .or_default()
            .push(measurement);
        self.measurements += 1;
    }

    /// Measurements appended to one series, if any.
    pub fn get(&self, definition: &Definition, dimensions: &Dimensions) -> Option<&[Measurement]> {
        self.series
            .get(definition)
            .and_then(|by_dims| by_dims.get(dimensions))
            .map(Vec::as_slice)
    }

    /// Every series currently buffered. Series order is unspecified;
    /// measurement order within a series is insertion order.
    pub fn series(&self) -> impl Iterator<Item = SeriesRef<'_>> {
        self.series.iter().flat_map(|(definition, by_dims)| {
            by_dims.iter().map(move |(dimensions, measurements)| SeriesRef {
                definition,
                dimensions,
                measurements,
            })
        })
    }

    /// Number of distinct definitions.
    pub fn definition_count(&self) -> usize {
        self.series.len()
    }

    /// Number of distinct (definition, dimensions) series.
    pub fn series_count(&self) -> usize {
        self.series.values().map(|by_dims| by_dims.len()).sum()
    }

    /// Total buffered measurements.
    pub fn measurement_count(&self) -> usize {
        self.measurements
    }

    /// True when no measurement is buffered.
    pub fn is_empty(&self) -> bool {
        self.measurements == 0
    }

    /// Drop everything. Allocated capacity of the outer map is kept.
    pub fn clear(&mut self) {
        self.series.clear();
        self.measurements = 0;
    }
}
