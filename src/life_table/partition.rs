//! Partition cohorts by (year, gender) and build every table in parallel
//!
//! Each partition's age sequence is assembled privately and handed to a
//! stateless builder, so partitions share nothing and need no locking.
//! Results are collected into an ordered map keyed by partition.

use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};
use rayon::prelude::*;

use super::builder::LifeTableBuilder;
use super::table::{AgeRate, LifeTable, PartitionKey};
use crate::error::{PipelineError, Result};
use crate::pipeline::rates;
use crate::records::{CohortKey, CohortRecord};

/// Group cohorts by partition, each group sorted by age
pub fn partition(cohorts: &[CohortRecord]) -> BTreeMap<PartitionKey, Vec<CohortRecord>> {
    let mut partitions: BTreeMap<PartitionKey, Vec<CohortRecord>> = BTreeMap::new();
    for cohort in cohorts {
        partitions
            .entry(PartitionKey::new(cohort.key.year, cohort.key.gender))
            .or_default()
            .push(cohort.clone());
    }
    for group in partitions.values_mut() {
        group.sort_by_key(|c| c.key.age);
    }
    partitions
}

/// Fail on the first (year, age, gender) that occurs more than once
pub fn check_unique_keys(cohorts: &[CohortRecord]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for cohort in cohorts {
        if !seen.insert(cohort.key) {
            return Err(PipelineError::MalformedInput {
                context: format!("cohort {}", cohort.key),
                reason: "key occurs more than once".to_string(),
            });
        }
    }
    Ok(())
}

/// Merge every age at or above `open_age` into one open interval at `open_age`
///
/// `cohorts` must belong to a single partition and be sorted by age. The
/// merged interval's rates are re-estimated from its summed counts.
pub fn close_at(cohorts: Vec<CohortRecord>, open_age: u32) -> Result<Vec<CohortRecord>> {
    let Some(first_open) = cohorts.iter().position(|c| c.key.age >= open_age) else {
        return Ok(cohorts);
    };

    let mut closed = cohorts;
    let tail = closed.split_off(first_open);
    let key = CohortKey::new(tail[0].key.year, open_age, tail[0].key.gender);
    let population = tail.iter().map(|c| c.population).sum();
    let deaths = tail.iter().map(|c| c.deaths).sum();

    closed.push(rates::estimate(CohortRecord::new(key, population, deaths))?);
    Ok(closed)
}

/// Builder input for one partition, estimating rates not yet set
pub fn age_rates(cohorts: &[CohortRecord]) -> Result<Vec<AgeRate>> {
    cohorts
        .iter()
        .map(|cohort| match (cohort.mx, cohort.qx) {
            (Some(mx), Some(qx)) => Ok(AgeRate::new(cohort.key.age, mx, qx)),
            _ => {
                let mx = rates::central_rate(cohort)?;
                Ok(AgeRate::new(cohort.key.age, mx, rates::probability_from_rate(mx)))
            }
        })
        .collect()
}

/// Assemble and build the table for one partition
pub fn build_partition(
    builder: &LifeTableBuilder,
    key: PartitionKey,
    cohorts: Vec<CohortRecord>,
    open_age: Option<u32>,
) -> Result<LifeTable> {
    let cohorts = match open_age {
        Some(age) => close_at(cohorts, age)?,
        None => cohorts,
    };
    let rates = age_rates(&cohorts)?;
    builder.build(key, &rates)
}

/// Build one table per (year, gender), fanned out across the rayon pool
pub fn build_all(
    builder: &LifeTableBuilder,
    cohorts: &[CohortRecord],
    open_age: Option<u32>,
) -> BTreeMap<PartitionKey, Result<LifeTable>> {
    let partitions: Vec<(PartitionKey, Vec<CohortRecord>)> = partition(cohorts).into_iter().collect();
    info!("Building {} life tables", partitions.len());

    let results: BTreeMap<PartitionKey, Result<LifeTable>> = partitions
        .into_par_iter()
        .map(|(key, group)| {
            let result = build_partition(builder, key, group, open_age);
            (key, result)
        })
        .collect();

    let failed = results.values().filter(|r| r.is_err()).count();
    if failed > 0 {
        warn!("{} of {} life tables failed to build", failed, results.len());
    }
    results
}
