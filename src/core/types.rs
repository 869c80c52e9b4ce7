//! Domain types: envelopes as received and the series identity they map to.

use crate::core::error::{PersisterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Metadata key carrying the owning tenant
pub const META_TENANT_ID: &str = "tenantId";
/// Metadata key carrying the region
pub const META_REGION: &str = "region";

/// A single metric sample as produced by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name, e.g. `cpu.idle_perc`
    pub name: String,
    /// Dimension key/value pairs
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Sample value
    pub value: f64,
    /// Optional small attached data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_meta: Option<BTreeMap<String, String>>,
}

/// A metric plus delivery metadata as received by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEnvelope {
    /// The metric itself
    pub metric: Metric,
    /// Opaque metadata; must carry `tenantId` and `region`
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

impl MetricEnvelope {
    /// Creates an envelope with the required tenant and region metadata
    pub fn new(metric: Metric, tenant_id: impl Into<String>, region: impl Into<String>) -> Self {
        let mut meta = HashMap::with_capacity(2);
        meta.insert(META_TENANT_ID.to_string(), serde_json::Value::String(tenant_id.into()));
        meta.insert(META_REGION.to_string(), serde_json::Value::String(region.into()));
        Self { metric, meta }
    }

    fn meta_str(&self, key: &str) -> Result<&str> {
        match self.meta.get(key) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s),
            Some(serde_json::Value::String(_)) => {
                Err(PersisterError::malformed(format!("meta.{} is empty", key)))
            },
            Some(other) => Err(PersisterError::malformed(format!(
                "meta.{} must be a string, got {}",
                key, other
            ))),
            None => Err(PersisterError::malformed(format!("meta.{} is missing", key))),
        }
    }

    /// Splits the envelope into its series key and sample.
    pub fn decompose(&self) -> Result<(Definition, Dimensions, Measurement)> {
        let definition = Definition::new(
            self.metric.name.clone(),
            self.meta_str(META_TENANT_ID)?.to_string(),
            self.meta_str(META_REGION)?.to_string(),
        )?;
        let dimensions = Dimensions::from(self.metric.dimensions.clone());
        let measurement = Measurement {
            timestamp: self.metric.timestamp,
            value: self.metric.value,
            value_meta: self.metric.value_meta.clone(),
        };
        Ok((definition, dimensions, measurement))
    }
}

/// Identity of a time series independent of its dimensions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Definition {
    /// Metric name
    pub name: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Region the metric was reported in
    pub region: String,
}

impl Definition {
    /// Creates a new Definition after validation
    pub fn new(name: String, tenant_id: String, region: String) -> Result<Self> {
        if name.is_empty() {
            return Err(PersisterError::malformed("metric name cannot be empty"));
        }
        Ok(Definition {
            name,
            tenant_id,
            region,
        })
    }
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.name, self.tenant_id, self.region)
    }
}

/// Unordered dimension set; equality is set equality
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dimensions(BTreeMap<String, String>);

impl Dimensions {
    /// Returns the value for a dimension key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of key/value pairs
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no dimensions
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<BTreeMap<String, String>> for Dimensions {
    fn from(map: BTreeMap<String, String>) -> Self {
        Dimensions(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Dimensions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Dimensions(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One sample appended to a series at flush time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Sample value
    pub value: f64,
    /// Optional small attached data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_meta: Option<BTreeMap<String, String>>,
}

impl Measurement {
    /// Measurement without value metadata.
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            value_meta: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_metric(value: f64) -> Metric {
        Metric {
            name: "cpu.idle".to_string(),
            dimensions: [("host".to_string(), "a".to_string())].into_iter().collect(),
            timestamp: 1_700_000_000_000,
            value,
            value_meta: None,
        }
    }

    #[test]
    fn test_decompose_envelope() {
        let envelope = MetricEnvelope::new(cpu_metric(10.0), "T1", "R1");
        let (definition, dimensions, measurement) = envelope.decompose().unwrap();

        assert_eq!(definition.name, "cpu.idle");
        assert_eq!(definition.tenant_id, "T1");
        assert_eq!(definition.region, "R1");
        assert_eq!(dimensions.get("host"), Some("a"));
        assert_eq!(measurement.value, 10.0);
        assert_eq!(measurement.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_missing_tenant_is_malformed() {
        let mut envelope = MetricEnvelope::new(cpu_metric(1.0), "T1", "R1");
        envelope.meta.remove(META_TENANT_ID);

        let err = envelope.decompose().unwrap_err();
        assert!(matches!(err, PersisterError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_non_string_region_is_malformed() {
        let mut envelope = MetricEnvelope::new(cpu_metric(1.0), "T1", "R1");
        envelope
            .meta
            .insert(META_REGION.to_string(), serde_json::json!(42));

        assert!(envelope.decompose().is_err());
    }

    #[test]
    fn test_empty_name_is_malformed() {
        let mut metric = cpu_metric(1.0);
        metric.name.clear();
        let envelope = MetricEnvelope::new(metric, "T1", "R1");

        assert!(envelope.decompose().is_err());
    }

    #[test]
    fn test_dimensions_ignore_insertion_order() {
        let a: Dimensions = vec![("host", "a"), ("service", "nova")].into_iter().collect();
        let b: Dimensions = vec![("service", "nova"), ("host", "a")].into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_envelope_json_shape() {
        let json = r#"{
            "metric": {
                "name": "disk.used",
                "dimensions": {"device": "sda"},
                "timestamp": 1000,
                "value": 3.5,
                "value_meta": {"unit": "GB"}
            },
            "meta": {"tenantId": "abc", "region": "useast"}
        }"#;

        let envelope: MetricEnvelope = serde_json::from_str(json).unwrap();
        let (definition, _, measurement) = envelope.decompose().unwrap();
        assert_eq!(definition.to_string(), "disk.used@abc/useast");
        assert_eq!(
            measurement.value_meta.unwrap().get("unit").map(String::as_str),
            Some("GB")
        );
    }
}
