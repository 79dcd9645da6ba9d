//! Rate estimator: central mortality rate and probability of death
//!
//! mx = deaths / population, and qx = 1 - exp(-mx) under a constant force of
//! mortality over the unit age interval.

use std::collections::BTreeMap;

use crate::config::ZeroExposurePolicy;
use crate::error::{PipelineError, Result};
use crate::records::{CohortRecord, Gender};

/// Convert a central rate to a probability of death over one year of age
pub fn probability_from_rate(mx: f64) -> f64 {
    1.0 - (-mx).exp()
}

/// Central mortality rate for a cohort
///
/// Zero deaths over zero exposure is defined as mx = 0. Deaths with no
/// exposure is a data inconsistency.
pub fn central_rate(cohort: &CohortRecord) -> Result<f64> {
    if cohort.population > 0.0 {
        return Ok(cohort.deaths as f64 / cohort.population);
    }
    if cohort.deaths == 0 {
        return Ok(0.0);
    }
    Err(PipelineError::DivisionByZero {
        context: format!(
            "{} has {} deaths and zero population",
            cohort.key, cohort.deaths
        ),
    })
}

/// Extend a cohort with mx and qx
pub fn estimate(mut cohort: CohortRecord) -> Result<CohortRecord> {
    let mx = central_rate(&cohort)?;
    cohort.mx = Some(mx);
    cohort.qx = Some(probability_from_rate(mx));
    Ok(cohort)
}

/// Zero population and zero deaths
pub fn is_zero_exposure(cohort: &CohortRecord) -> bool {
    cohort.population == 0.0 && cohort.deaths == 0
}

/// Apply the zero-exposure policy, returning the kept cohorts and the number dropped
///
/// `Exclude` only drops zero-exposure ages above the oldest exposed age of
/// each (year, gender), so the open interval moves down to that age. Zero
/// cohorts between exposed ages are kept and rate as mx = 0, leaving the age
/// sequence unbroken.
pub fn apply_zero_exposure(
    cohorts: Vec<CohortRecord>,
    policy: ZeroExposurePolicy,
) -> (Vec<CohortRecord>, usize) {
    if policy == ZeroExposurePolicy::Retain {
        return (cohorts, 0);
    }

    let mut oldest_exposed: BTreeMap<(i32, Gender), u32> = BTreeMap::new();
    for cohort in cohorts.iter().filter(|c| !is_zero_exposure(c)) {
        let oldest = oldest_exposed
            .entry((cohort.key.year, cohort.key.gender))
            .or_insert(cohort.key.age);
        *oldest = (*oldest).max(cohort.key.age);
    }

    let before = cohorts.len();
    let kept: Vec<CohortRecord> = cohorts
        .into_iter()
        .filter(|c| {
            !is_zero_exposure(c)
                || oldest_exposed
                    .get(&(c.key.year, c.key.gender))
                    .is_some_and(|&oldest| c.key.age < oldest)
        })
        .collect();
    let excluded = before - kept.len();
    (kept, excluded)
}
