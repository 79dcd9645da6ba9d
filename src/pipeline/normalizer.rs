//! Record normalizer: single-year, single-age, per-sex rows only

use log::debug;

use crate::error::{PipelineError, Result};
use crate::records::RawRecord;

/// Counts of rows removed by each filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeSummary {
    pub rows_in: usize,
    pub rows_out: usize,
    pub interval_filtered: usize,
    pub gender_filtered: usize,
    pub malformed_filtered: usize,
}

/// Keep rows with unit age and year intervals and a Male/Female gender
///
/// Order is preserved. Rows whose population is negative or not finite are
/// malformed: they are excluded when `skip_malformed` is set, otherwise the
/// first one aborts normalization.
pub fn normalize(
    records: Vec<RawRecord>,
    skip_malformed: bool,
) -> Result<(Vec<RawRecord>, NormalizeSummary)> {
    let mut summary = NormalizeSummary {
        rows_in: records.len(),
        ..Default::default()
    };
    let mut kept = Vec::with_capacity(records.len());

    for record in records {
        if record.age_interval != Some(1) || record.year_interval != 1 {
            summary.interval_filtered += 1;
            continue;
        }
        if !record.gender.is_sex_specific() {
            summary.gender_filtered += 1;
            continue;
        }
        if !record.population.is_finite() || record.population < 0.0 {
            if !skip_malformed {
                return Err(PipelineError::MalformedInput {
                    context: record.key().to_string(),
                    reason: format!("invalid population {}", record.population),
                });
            }
            debug!("Excluding {} with population {}", record.key(), record.population);
            summary.malformed_filtered += 1;
            continue;
        }
        kept.push(record);
    }

    summary.rows_out = kept.len();
    Ok((kept, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Gender, LexisShape};

    fn deaths(age: u32, gender: Gender) -> RawRecord {
        RawRecord::deaths(1950, age, gender, LexisShape::RR, 10)
    }

    #[test]
    fn test_filters_intervals_and_genders() {
        let mut wide_age = deaths(5, Gender::Male);
        wide_age.age_interval = Some(5);
        let mut open_age = deaths(110, Gender::Male);
        open_age.age_interval = None;
        let mut multi_year = deaths(6, Gender::Female);
        multi_year.year_interval = 5;

        let input = vec![
            deaths(0, Gender::Male),
            wide_age,
            deaths(1, Gender::Total),
            open_age,
            deaths(2, Gender::Unknown),
            multi_year,
            deaths(3, Gender::Female),
        ];

        let (kept, summary) = normalize(input, false).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].age, 0);
        assert_eq!(kept[1].age, 3);
        assert_eq!(summary.interval_filtered, 3);
        assert_eq!(summary.gender_filtered, 2);
        assert_eq!(summary.rows_out, 2);
    }

    #[test]
    fn test_negative_population() {
        let bad = RawRecord::population(1950, 4, Gender::Male, "E", None, -1.0);
        let good = RawRecord::population(1950, 5, Gender::Male, "E", None, 100.0);

        let err = normalize(vec![bad.clone(), good.clone()], false).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput { .. }));

        let (kept, summary) = normalize(vec![bad, good], true).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(summary.malformed_filtered, 1);
    }
}
