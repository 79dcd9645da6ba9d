//! Record data structures for raw extracts and reconciled cohorts

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Gender as coded in the source extracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    /// Sex not stated
    Unknown,
    /// Both sexes combined
    Total,
}

impl Gender {
    /// Parse an HMD sex code ("m", "f", "b"); anything else is Unknown
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "m" => Gender::Male,
            "f" => Gender::Female,
            "b" => Gender::Total,
            _ => Gender::Unknown,
        }
    }

    /// Parse a tidy-table label ("Male", "Female")
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Male" => Some(Gender::Male),
            "Female" => Some(Gender::Female),
            _ => None,
        }
    }

    /// Whether this is one of the two per-sex series kept after normalization
    pub fn is_sex_specific(&self) -> bool {
        matches!(self, Gender::Male | Gender::Female)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Unknown => "Unknown",
            Gender::Total => "Total",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lexis shape of a deaths record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LexisShape {
    /// Age-period rectangle
    RR,
    /// Lower triangle
    TL,
    /// Upper triangle
    TU,
    /// Vertical parallelogram (period-cohort)
    VV,
    /// Rectangle by year of birth
    RV,
}

impl LexisShape {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "RR" => Some(LexisShape::RR),
            "TL" => Some(LexisShape::TL),
            "TU" => Some(LexisShape::TU),
            "VV" => Some(LexisShape::VV),
            "RV" => Some(LexisShape::RV),
            _ => None,
        }
    }
}

/// Which quantity a raw record measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordSource {
    /// Population estimate; competing rows are resolved by selection
    Population,
    /// Death count for one Lexis shape; partial rows are summed
    Deaths(LexisShape),
}

/// Provenance/quality tag of a population record (e.g. "E", "O", "C")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordType(String);

impl RecordType {
    pub fn new(code: impl Into<String>) -> Self {
        let code: String = code.into();
        Self(code.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Total order over record types, best first
///
/// Supplied per dataset rather than baked in, so the selection policy can be
/// swapped and tested in isolation. Types not listed rank below every listed
/// type, and a missing type ranks with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTypePriority {
    order: Vec<RecordType>,
}

impl RecordTypePriority {
    pub fn new(order: Vec<RecordType>) -> Self {
        Self { order }
    }

    pub fn from_codes<S: AsRef<str>>(codes: &[S]) -> Self {
        Self::new(codes.iter().map(|c| RecordType::new(c.as_ref())).collect())
    }

    /// HMD population types: estimates, official, census, register, by birth year
    pub fn hmd_default() -> Self {
        Self::from_codes(&["E", "O", "C", "R", "B"])
    }

    /// Rank of a type; lower is better
    pub fn rank(&self, record_type: Option<&RecordType>) -> usize {
        record_type
            .and_then(|t| self.order.iter().position(|o| o == t))
            .unwrap_or(self.order.len())
    }

    pub fn order(&self) -> &[RecordType] {
        &self.order
    }
}

impl Default for RecordTypePriority {
    fn default() -> Self {
        Self::hmd_default()
    }
}

/// Unique identifying tuple for every downstream aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CohortKey {
    pub year: i32,
    pub age: u32,
    pub gender: Gender,
}

impl CohortKey {
    pub fn new(year: i32, age: u32, gender: Gender) -> Self {
        Self { year, age, gender }
    }
}

// Output order is (year, age, gender), matching the tidy table sort.
impl Ord for CohortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.year, self.age, self.gender).cmp(&(other.year, other.age, other.gender))
    }
}

impl PartialOrd for CohortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CohortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(year={}, age={}, gender={})", self.year, self.age, self.gender)
    }
}

/// A single row from the raw vital-statistics extract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub year: i32,
    pub age: u32,

    /// Width of the age interval; None for the open-ended "+" interval
    pub age_interval: Option<u32>,

    pub year_interval: u32,
    pub gender: Gender,
    pub source: RecordSource,

    /// Provenance tag (population rows only)
    pub record_type: Option<RecordType>,

    /// Reference date of the estimate (population rows only)
    pub record_date: Option<NaiveDate>,

    pub population: f64,
    pub deaths: u64,
}

impl RawRecord {
    /// Population estimate row
    pub fn population(
        year: i32,
        age: u32,
        gender: Gender,
        record_type: &str,
        record_date: Option<NaiveDate>,
        population: f64,
    ) -> Self {
        Self {
            year,
            age,
            age_interval: Some(1),
            year_interval: 1,
            gender,
            source: RecordSource::Population,
            record_type: Some(RecordType::new(record_type)),
            record_date,
            population,
            deaths: 0,
        }
    }

    /// Death count row for one Lexis shape
    pub fn deaths(year: i32, age: u32, gender: Gender, lexis: LexisShape, deaths: u64) -> Self {
        Self {
            year,
            age,
            age_interval: Some(1),
            year_interval: 1,
            gender,
            source: RecordSource::Deaths(lexis),
            record_type: None,
            record_date: None,
            population: 0.0,
            deaths,
        }
    }

    pub fn key(&self) -> CohortKey {
        CohortKey::new(self.year, self.age, self.gender)
    }

    pub fn is_population(&self) -> bool {
        matches!(self.source, RecordSource::Population)
    }
}

/// One reconciled (year, age, gender) cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortRecord {
    pub key: CohortKey,
    pub population: f64,
    pub deaths: u64,

    /// Central mortality rate, set by the rate estimator
    pub mx: Option<f64>,

    /// Probability of death over the unit interval, set by the rate estimator
    pub qx: Option<f64>,
}

impl CohortRecord {
    pub fn new(key: CohortKey, population: f64, deaths: u64) -> Self {
        Self {
            key,
            population,
            deaths,
            mx: None,
            qx: None,
        }
    }
}
