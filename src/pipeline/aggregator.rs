//! Cohort aggregator: sum Lexis-shape partitions into one record per key
//!
//! Unlike selection, every contributing row here is a partial count of the
//! same quantity, so deaths and population are summed. A cohort is emitted
//! only when its key has both population and deaths rows.

use std::collections::BTreeMap;

use log::warn;

use crate::error::{PipelineError, Result};
use crate::records::{CohortKey, CohortRecord, RawRecord};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateSummary {
    pub rows_in: usize,
    pub cohorts_out: usize,
    /// Keys with population rows but no deaths rows
    pub missing_deaths: usize,
    /// Keys with deaths rows but no population rows
    pub missing_population: usize,
    pub deaths_in: u64,
    pub population_in: f64,
    /// Deaths on keys dropped by the join
    pub deaths_dropped: u64,
    /// Population on keys dropped by the join
    pub population_dropped: f64,
}

#[derive(Debug, Default)]
struct Accumulator {
    rows: usize,
    population: f64,
    population_rows: usize,
    deaths: u64,
    deaths_rows: usize,
}

/// Sum records into cohorts and verify that nothing was lost or invented
pub fn aggregate(records: &[RawRecord]) -> Result<(Vec<CohortRecord>, AggregateSummary)> {
    let mut summary = AggregateSummary {
        rows_in: records.len(),
        ..Default::default()
    };
    let mut groups: BTreeMap<CohortKey, Accumulator> = BTreeMap::new();

    for record in records {
        summary.deaths_in += record.deaths;
        summary.population_in += record.population;

        let acc = groups.entry(record.key()).or_default();
        acc.rows += 1;
        acc.deaths += record.deaths;
        acc.population += record.population;
        if record.is_population() {
            acc.population_rows += 1;
        } else {
            acc.deaths_rows += 1;
        }
    }

    let mut cohorts = Vec::with_capacity(groups.len());
    let mut rows_emitted = 0usize;
    let mut rows_dropped = 0usize;

    for (key, acc) in groups {
        if acc.deaths_rows == 0 || acc.population_rows == 0 {
            if acc.deaths_rows == 0 {
                summary.missing_deaths += 1;
            } else {
                summary.missing_population += 1;
            }
            rows_dropped += acc.rows;
            summary.deaths_dropped += acc.deaths;
            summary.population_dropped += acc.population;
            continue;
        }
        rows_emitted += acc.rows;
        cohorts.push(CohortRecord::new(key, acc.population, acc.deaths));
    }

    // Everything that went in must be in an emitted cohort or a dropped key
    let deaths_out = cohorts.iter().map(|c| c.deaths).sum::<u64>() + summary.deaths_dropped;
    let population_out =
        cohorts.iter().map(|c| c.population).sum::<f64>() + summary.population_dropped;
    check_conservation(&summary, rows_emitted + rows_dropped, deaths_out, population_out)?;

    if summary.missing_deaths > 0 || summary.missing_population > 0 {
        warn!(
            "Dropped {} keys without deaths and {} keys without population",
            summary.missing_deaths, summary.missing_population
        );
    }

    summary.cohorts_out = cohorts.len();
    Ok((cohorts, summary))
}

/// Compare input totals with emitted cohorts plus dropped keys
///
/// Record counts and deaths are exact. Population is a floating sum taken in
/// a different order on each side, so it may differ by summation rounding only.
fn check_conservation(
    summary: &AggregateSummary,
    rows_out: usize,
    deaths_out: u64,
    population_out: f64,
) -> Result<()> {
    if rows_out != summary.rows_in {
        return Err(PipelineError::Conservation {
            measure: "records",
            expected: summary.rows_in as f64,
            actual: rows_out as f64,
        });
    }
    if deaths_out != summary.deaths_in {
        return Err(PipelineError::Conservation {
            measure: "deaths",
            expected: summary.deaths_in as f64,
            actual: deaths_out as f64,
        });
    }

    let bound = f64::EPSILON * summary.rows_in.max(1) as f64 * summary.population_in.abs();
    if (population_out - summary.population_in).abs() > bound {
        return Err(PipelineError::Conservation {
            measure: "population",
            expected: summary.population_in,
            actual: population_out,
        });
    }
    Ok(())
}
