//! Life table output structures

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::records::Gender;

/// Partition key of a life table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub year: i32,
    pub gender: Gender,
}

impl PartitionKey {
    pub fn new(year: i32, gender: Gender) -> Self {
        Self { year, gender }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.year, self.gender)
    }
}

/// Input row for the builder: one integer age of one partition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeRate {
    pub age: u32,
    pub mx: f64,
    pub qx: f64,
}

impl AgeRate {
    pub fn new(age: u32, mx: f64, qx: f64) -> Self {
        Self { age, mx, qx }
    }
}

/// A single row of a life table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifeTableRow {
    pub age: u32,

    /// Central mortality rate
    pub mx: f64,

    /// Probability of death in [age, age+1); 1 for the open interval
    pub qx: f64,

    /// Probability of surviving the interval
    pub px: f64,

    /// Survivors to exact age
    pub lx: f64,

    /// Deaths in the interval
    pub dx: f64,

    /// Person-years lived in the interval (Lx)
    pub person_years: f64,

    /// Person-years remaining from this age onward (Tx)
    pub person_years_remaining: f64,

    /// Expectation of life; None when no survivors reach this age
    pub ex: Option<f64>,
}

impl LifeTableRow {
    /// Life expectancy, failing when lx is zero
    pub fn expectancy(&self) -> Result<f64> {
        self.ex.ok_or_else(|| PipelineError::DivisionByZero {
            context: format!("ex at age {} has no survivors (lx = 0)", self.age),
        })
    }
}

/// Complete life table for one (year, gender), ordered by increasing age
///
/// The last row is the open-ended interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifeTable {
    pub key: PartitionKey,
    pub radix: f64,
    pub rows: Vec<LifeTableRow>,
}

impl LifeTable {
    pub fn row(&self, age: u32) -> Option<&LifeTableRow> {
        self.rows.get(age as usize).filter(|r| r.age == age)
    }

    /// Life expectancy at birth
    pub fn e0(&self) -> Option<f64> {
        self.rows.first().and_then(|r| r.ex)
    }

    /// Age of the open-ended last interval
    pub fn open_age(&self) -> Option<u32> {
        self.rows.last().map(|r| r.age)
    }

    /// Ages whose expectancy is undefined because lx is zero
    pub fn undefined_expectancy_ages(&self) -> Vec<u32> {
        self.rows
            .iter()
            .filter(|r| r.ex.is_none())
            .map(|r| r.age)
            .collect()
    }

    /// Expectancy by age with a sentinel substituted where undefined
    pub fn expectancies_or(&self, sentinel: f64) -> Vec<f64> {
        self.rows.iter().map(|r| r.ex.unwrap_or(sentinel)).collect()
    }
}
