//! Raw extract and cohort record structures, plus ingestion from text files

mod data;
pub mod loader;

pub use data::{
    CohortKey, CohortRecord, Gender, LexisShape, RawRecord, RecordSource, RecordType,
    RecordTypePriority,
};
pub use loader::{load_cohorts, load_input_db, write_cohorts, IngestSummary};
