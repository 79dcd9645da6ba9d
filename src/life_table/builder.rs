//! Period life table construction
//!
//! Three passes over an age-ordered sequence:
//! - forward: survivorship lx, deaths dx and person-years Lx, trapezoidal
//!   within each closed interval and lx/mx for the open interval
//! - backward: Tx as the running sum of Lx from the oldest age
//! - expectancy: ex = Tx / lx wherever lx > 0
//!
//! The builder keeps no state between calls.

use log::warn;

use super::table::{AgeRate, LifeTable, LifeTableRow, PartitionKey};
use crate::config::DEFAULT_RADIX;
use crate::error::{PipelineError, Result};

/// Builds life tables from complete age sequences
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifeTableBuilder {
    radix: f64,
}

impl LifeTableBuilder {
    pub fn new(radix: f64) -> Self {
        Self { radix }
    }

    pub fn radix(&self) -> f64 {
        self.radix
    }

    pub fn check_radix(&self) -> Result<()> {
        if self.radix.is_finite() && self.radix > 0.0 {
            Ok(())
        } else {
            Err(PipelineError::InvalidRadix { radix: self.radix })
        }
    }

    /// Build the table for one partition
    ///
    /// `rates` must start at age 0 and continue without gaps; its last row is
    /// treated as the open interval, where only mx is used.
    pub fn build(&self, key: PartitionKey, rates: &[AgeRate]) -> Result<LifeTable> {
        self.validate(key, rates)?;

        let n = rates.len();
        let last = n - 1;
        let mut lx = vec![0.0; n];
        let mut dx = vec![0.0; n];
        let mut person_years = vec![0.0; n];

        // Forward pass
        lx[0] = self.radix;
        for x in 0..last {
            let px = 1.0 - rates[x].qx;
            lx[x + 1] = lx[x] * px;
            dx[x] = lx[x] - lx[x + 1];
            person_years[x] = (lx[x] + lx[x + 1]) / 2.0;
        }

        // Open interval: everyone alive at the open age dies in it
        let mx_open = rates[last].mx;
        dx[last] = lx[last];
        person_years[last] = if mx_open > 0.0 { lx[last] / mx_open } else { 0.0 };

        // Backward pass
        let mut tx = vec![0.0; n];
        tx[last] = person_years[last];
        for x in (0..last).rev() {
            tx[x] = tx[x + 1] + person_years[x];
        }

        let rows: Vec<LifeTableRow> = rates
            .iter()
            .enumerate()
            .map(|(x, rate)| {
                let qx = if x == last { 1.0 } else { rate.qx };
                LifeTableRow {
                    age: rate.age,
                    mx: rate.mx,
                    qx,
                    px: 1.0 - qx,
                    lx: lx[x],
                    dx: dx[x],
                    person_years: person_years[x],
                    person_years_remaining: tx[x],
                    ex: if lx[x] > 0.0 { Some(tx[x] / lx[x]) } else { None },
                }
            })
            .collect();

        let undefined = rows.iter().filter(|r| r.ex.is_none()).count();
        if undefined > 0 {
            warn!(
                "Life table {} has {} ages with no survivors; ex undefined there",
                key, undefined
            );
        }

        Ok(LifeTable {
            key,
            radix: self.radix,
            rows,
        })
    }

    fn validate(&self, key: PartitionKey, rates: &[AgeRate]) -> Result<()> {
        self.check_radix()?;
        if rates.is_empty() {
            return Err(PipelineError::EmptySequence {
                year: key.year,
                gender: key.gender,
            });
        }

        let last = rates.len() - 1;
        for (expected, rate) in rates.iter().enumerate() {
            if rate.age != expected as u32 {
                return Err(PipelineError::AgeGap {
                    year: key.year,
                    gender: key.gender,
                    expected: expected as u32,
                    found: rate.age,
                });
            }
            if expected < last && !(0.0..=1.0).contains(&rate.qx) {
                return Err(PipelineError::InvalidProbability {
                    year: key.year,
                    gender: key.gender,
                    age: rate.age,
                    qx: rate.qx,
                });
            }
        }

        let open = &rates[last];
        if !open.mx.is_finite() || open.mx < 0.0 {
            return Err(PipelineError::InvalidRate {
                year: key.year,
                gender: key.gender,
                age: open.age,
                mx: open.mx,
            });
        }
        Ok(())
    }
}

impl Default for LifeTableBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_RADIX)
    }
}
