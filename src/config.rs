//! Pipeline configuration
//!
//! Every policy choice the pipeline makes (radix, record type priority,
//! malformed-row and partition-failure handling, zero-exposure cohorts, open
//! age) lives here as data so it can be swapped per dataset.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::records::RecordTypePriority;

/// Default radix of the life table
pub const DEFAULT_RADIX: f64 = 100_000.0;

/// Handling of cohorts with zero population and zero deaths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroExposurePolicy {
    /// Keep the cohort with mx = 0
    #[default]
    Retain,
    /// Drop trailing zero-exposure ages of each (year, gender); interior
    /// ones are kept with mx = 0
    Exclude,
}

/// Configuration for a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Starting cohort size at age 0
    pub radix: f64,

    /// Population record types, best first
    pub record_type_priority: Vec<String>,

    /// Exclude malformed rows instead of failing the run
    pub skip_malformed: bool,

    /// Skip (year, gender) partitions whose data is locally inconsistent
    /// instead of aborting the run
    pub isolate_partition_errors: bool,

    pub zero_exposure: ZeroExposurePolicy,

    /// Close every table with an open interval at this age
    /// If None, the highest age present is the open interval
    pub open_age: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            radix: DEFAULT_RADIX,
            record_type_priority: RecordTypePriority::hmd_default()
                .order()
                .iter()
                .map(|t| t.as_str().to_string())
                .collect(),
            skip_malformed: false,
            isolate_partition_errors: false,
            zero_exposure: ZeroExposurePolicy::Retain,
            open_age: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_json_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn priority(&self) -> RecordTypePriority {
        RecordTypePriority::from_codes(self.record_type_priority.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.radix, 100_000.0);
        assert_eq!(config.record_type_priority, vec!["E", "O", "C", "R", "B"]);
        assert_eq!(config.zero_exposure, ZeroExposurePolicy::Retain);
        assert!(!config.skip_malformed);
        assert_eq!(config.priority(), RecordTypePriority::hmd_default());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{ "radix": 1000.0, "zero_exposure": "exclude", "open_age": 100 }"#,
        )
        .unwrap();

        assert_eq!(config.radix, 1000.0);
        assert_eq!(config.zero_exposure, ZeroExposurePolicy::Exclude);
        assert_eq!(config.open_age, Some(100));
        assert_eq!(config.record_type_priority.len(), 5);
        assert!(!config.isolate_partition_errors);
    }
}
