//! Record selector: resolve competing population estimates per cohort key
//!
//! Within a key the record with the best type rank wins; among equal ranks the
//! earliest reference date wins (a missing date sorts last). Anything still
//! tied is an error, so output never depends on input row order.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::debug;

use crate::error::{PipelineError, Result};
use crate::records::{CohortKey, RawRecord, RecordTypePriority};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectSummary {
    pub population_rows_in: usize,
    pub population_keys: usize,
    /// Keys that had more than one competing population row
    pub contested_keys: usize,
    pub deaths_rows: usize,
}

/// Sort key of a population row: type rank, then date with missing last
fn selection_rank(record: &RawRecord, priority: &RecordTypePriority) -> (usize, bool, Option<NaiveDate>) {
    (
        priority.rank(record.record_type.as_ref()),
        record.record_date.is_none(),
        record.record_date,
    )
}

/// Pick exactly one population row per key; deaths rows pass through
///
/// Output is ordered by key, each key's population row ahead of its deaths
/// rows, deaths rows in Lexis shape order.
pub fn select(
    records: Vec<RawRecord>,
    priority: &RecordTypePriority,
) -> Result<(Vec<RawRecord>, SelectSummary)> {
    let mut summary = SelectSummary::default();
    let mut groups: BTreeMap<CohortKey, Vec<RawRecord>> = BTreeMap::new();
    let mut output = Vec::with_capacity(records.len());

    for record in records {
        if record.is_population() {
            summary.population_rows_in += 1;
            groups.entry(record.key()).or_default().push(record);
        } else {
            summary.deaths_rows += 1;
            output.push(record);
        }
    }

    summary.population_keys = groups.len();

    for (key, mut group) in groups {
        if group.len() > 1 {
            summary.contested_keys += 1;
        }

        group.sort_by_key(|r| selection_rank(r, priority));

        let best = selection_rank(&group[0], priority);
        let tied = group
            .iter()
            .take_while(|r| selection_rank(r, priority) == best)
            .count();
        if tied > 1 {
            return Err(PipelineError::AmbiguousRecord {
                key,
                count: tied,
                record_type: group[0]
                    .record_type
                    .as_ref()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "<none>".to_string()),
                record_date: group[0]
                    .record_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "<none>".to_string()),
            });
        }

        if group.len() > 1 {
            debug!(
                "Selected type {:?} dated {:?} for {} from {} candidates",
                group[0].record_type,
                group[0].record_date,
                key,
                group.len()
            );
        }
        output.push(group.swap_remove(0));
    }

    output.sort_by(|a, b| a.key().cmp(&b.key()).then(a.source.cmp(&b.source)));
    Ok((output, summary))
}
