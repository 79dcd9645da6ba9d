//! Life Tables - reconciliation of vital-statistics extracts into period life tables
//!
//! This library provides:
//! - Ingestion of HMD InputDB deaths and population files
//! - Record normalization and selection among competing population estimates
//! - Lexis-shape aggregation into one cohort per (year, age, gender)
//! - Central mortality rate and probability of death estimation
//! - Life table construction per (year, gender), built in parallel
//! - Reporting slices (e0 by decade, gender comparison, age-group trends)

pub mod config;
pub mod error;
pub mod life_table;
pub mod pipeline;
pub mod records;
pub mod reports;

// Re-export commonly used types
pub use config::{PipelineConfig, ZeroExposurePolicy};
pub use error::{PipelineError, Result};
pub use life_table::{LifeTable, LifeTableBuilder, LifeTableRow, PartitionKey};
pub use pipeline::{Pipeline, PipelineOutput};
pub use records::{CohortKey, CohortRecord, Gender, RawRecord, RecordTypePriority};
