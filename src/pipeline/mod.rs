//! Reconciliation pipeline: normalizer, selector, aggregator, rate estimator
//!
//! Each stage consumes its predecessor's output and owns what it returns.
//! `Pipeline` carries the configuration once and runs the stages in order,
//! then hands the rated cohorts to the life table builder.

pub mod aggregator;
pub mod normalizer;
pub mod rates;
pub mod selector;

pub use aggregator::{aggregate, AggregateSummary};
pub use normalizer::{normalize, NormalizeSummary};
pub use selector::{select, SelectSummary};

use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::life_table::{self, LifeTable, LifeTableBuilder, PartitionKey};
use crate::records::{CohortRecord, RawRecord};

/// Counters collected across a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub normalize: NormalizeSummary,
    pub select: SelectSummary,
    pub aggregate: AggregateSummary,
    pub zero_exposure_excluded: usize,
}

/// Output of a full run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Reconciled cohorts with mx and qx, ordered by (year, age, gender)
    pub cohorts: Vec<CohortRecord>,

    pub tables: BTreeMap<PartitionKey, LifeTable>,

    /// Partitions skipped under error isolation, with the reason
    pub skipped: BTreeMap<PartitionKey, String>,

    pub summary: RunSummary,
}

/// Pre-configured pipeline runner
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Normalize, select and aggregate raw rows into one cohort per key
    pub fn reconcile(&self, records: Vec<RawRecord>) -> Result<(Vec<CohortRecord>, RunSummary)> {
        let (normalized, normalize_summary) = normalize(records, self.config.skip_malformed)?;
        info!(
            "Normalized {} rows to {} ({} interval, {} gender, {} malformed filtered)",
            normalize_summary.rows_in,
            normalize_summary.rows_out,
            normalize_summary.interval_filtered,
            normalize_summary.gender_filtered,
            normalize_summary.malformed_filtered
        );

        let (selected, select_summary) = select(normalized, &self.config.priority())?;
        info!(
            "Selected population for {} keys ({} contested)",
            select_summary.population_keys, select_summary.contested_keys
        );

        let (cohorts, aggregate_summary) = aggregate(&selected)?;
        info!(
            "Aggregated {} rows into {} cohorts",
            aggregate_summary.rows_in, aggregate_summary.cohorts_out
        );

        let summary = RunSummary {
            normalize: normalize_summary,
            select: select_summary,
            aggregate: aggregate_summary,
            zero_exposure_excluded: 0,
        };
        Ok((cohorts, summary))
    }

    /// Estimate mx and qx for every retained cohort
    ///
    /// A cohort that cannot be rated fails the run, or under isolation skips
    /// its whole partition (recorded in `skipped`).
    pub fn estimate_rates(
        &self,
        cohorts: Vec<CohortRecord>,
        skipped: &mut BTreeMap<PartitionKey, String>,
    ) -> Result<(Vec<CohortRecord>, usize)> {
        let (retained, excluded) = rates::apply_zero_exposure(cohorts, self.config.zero_exposure);
        if excluded > 0 {
            info!("Excluded {} zero-exposure cohorts", excluded);
        }

        let mut rated = Vec::with_capacity(retained.len());
        let mut failed: BTreeSet<PartitionKey> = BTreeSet::new();

        for cohort in retained {
            let partition = PartitionKey::new(cohort.key.year, cohort.key.gender);
            match rates::estimate(cohort) {
                Ok(cohort) => rated.push(cohort),
                Err(err) => {
                    self.isolate(partition, err, skipped)?;
                    failed.insert(partition);
                }
            }
        }

        rated.retain(|c| !failed.contains(&PartitionKey::new(c.key.year, c.key.gender)));
        Ok((rated, excluded))
    }

    /// Build one life table per (year, gender) partition
    pub fn build_tables(
        &self,
        cohorts: &[CohortRecord],
        skipped: &mut BTreeMap<PartitionKey, String>,
    ) -> Result<BTreeMap<PartitionKey, LifeTable>> {
        let builder = LifeTableBuilder::new(self.config.radix);
        builder.check_radix()?;
        let mut tables = BTreeMap::new();

        for (key, result) in life_table::build_all(&builder, cohorts, self.config.open_age) {
            match result {
                Ok(table) => {
                    tables.insert(key, table);
                }
                Err(err) => self.isolate(key, err, skipped)?,
            }
        }
        Ok(tables)
    }

    /// Run from raw extract rows to life tables
    pub fn run(&self, records: Vec<RawRecord>) -> Result<PipelineOutput> {
        let (cohorts, summary) = self.reconcile(records)?;
        self.finish(cohorts, summary)
    }

    /// Run from already reconciled cohorts (e.g. a tidy cohort table)
    pub fn run_cohorts(&self, cohorts: Vec<CohortRecord>) -> Result<PipelineOutput> {
        life_table::partition::check_unique_keys(&cohorts)?;
        self.finish(cohorts, RunSummary::default())
    }

    fn finish(&self, cohorts: Vec<CohortRecord>, mut summary: RunSummary) -> Result<PipelineOutput> {
        let mut skipped = BTreeMap::new();

        let (mut cohorts, excluded) = self.estimate_rates(cohorts, &mut skipped)?;
        summary.zero_exposure_excluded = excluded;

        let tables = self.build_tables(&cohorts, &mut skipped)?;
        cohorts.retain(|c| !skipped.contains_key(&PartitionKey::new(c.key.year, c.key.gender)));
        cohorts.sort_by_key(|c| c.key);

        info!(
            "Built {} life tables ({} partitions skipped)",
            tables.len(),
            skipped.len()
        );
        Ok(PipelineOutput {
            cohorts,
            tables,
            skipped,
            summary,
        })
    }

    /// Record a partition-local failure when isolation is enabled, else fail
    fn isolate(
        &self,
        key: PartitionKey,
        err: PipelineError,
        skipped: &mut BTreeMap<PartitionKey, String>,
    ) -> Result<()> {
        if !(self.config.isolate_partition_errors && err.is_partition_local()) {
            return Err(err);
        }
        warn!("Skipping partition {}: {}", key, err);
        skipped.entry(key).or_insert_with(|| err.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZeroExposurePolicy;
    use crate::records::{CohortKey, Gender, LexisShape};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    /// Raw rows for one partition: competing population estimates and two
    /// Lexis triangles of deaths at every age
    fn raw_partition(year: i32, gender: Gender, ages: u32) -> Vec<RawRecord> {
        let mut rows = Vec::new();
        for age in 0..ages {
            let population = 10_000.0 - 100.0 * age as f64;
            rows.push(RawRecord::population(
                year,
                age,
                gender,
                "B",
                NaiveDate::from_ymd_opt(year, 1, 1),
                population * 2.0,
            ));
            rows.push(RawRecord::population(
                year,
                age,
                gender,
                "E",
                NaiveDate::from_ymd_opt(year, 7, 1),
                population,
            ));
            rows.push(RawRecord::deaths(year, age, gender, LexisShape::TL, 5 + age as u64));
            rows.push(RawRecord::deaths(year, age, gender, LexisShape::TU, 5 + age as u64));
        }
        rows
    }

    #[test]
    fn test_full_run() {
        let mut raw = raw_partition(1950, Gender::Male, 10);
        raw.extend(raw_partition(1950, Gender::Female, 10));
        raw.extend(raw_partition(1950, Gender::Total, 10));

        let output = Pipeline::default().run(raw).unwrap();

        assert_eq!(output.cohorts.len(), 20);
        assert_eq!(output.tables.len(), 2);
        assert!(output.skipped.is_empty());
        assert_eq!(output.summary.normalize.gender_filtered, 40);
        assert_eq!(output.summary.select.contested_keys, 20);

        let first = &output.cohorts[0];
        assert_eq!(first.key, CohortKey::new(1950, 0, Gender::Male));
        assert_eq!(first.population, 10_000.0);
        assert_eq!(first.deaths, 10);
        assert_eq!(first.mx, Some(0.001));

        let table = &output.tables[&PartitionKey::new(1950, Gender::Male)];
        assert_eq!(table.rows.len(), 10);
        assert_eq!(table.rows[0].lx, 100_000.0);
        assert_relative_eq!(table.rows[0].qx, 1.0 - (-0.001f64).exp());
    }

    #[test]
    fn test_ambiguity_aborts_run() {
        let mut raw = raw_partition(1950, Gender::Male, 3);
        raw.push(RawRecord::population(
            1950,
            1,
            Gender::Male,
            "E",
            NaiveDate::from_ymd_opt(1950, 7, 1),
            1.0,
        ));

        let config = PipelineConfig {
            isolate_partition_errors: true,
            ..Default::default()
        };
        let err = Pipeline::new(config).run(raw).unwrap_err();
        assert!(matches!(err, PipelineError::AmbiguousRecord { .. }));
    }

    fn cohorts_with_inconsistent_female() -> Vec<CohortRecord> {
        let mut cohorts = Vec::new();
        for gender in [Gender::Male, Gender::Female] {
            for age in 0..4 {
                cohorts.push(CohortRecord::new(CohortKey::new(2000, age, gender), 1_000.0, 5));
            }
        }
        // Deaths with no exposure
        cohorts[5].population = 0.0;
        cohorts
    }

    #[test]
    fn test_partition_error_is_fatal_by_default() {
        let err = Pipeline::default()
            .run_cohorts(cohorts_with_inconsistent_female())
            .unwrap_err();
        assert!(matches!(err, PipelineError::DivisionByZero { .. }));
    }

    #[test]
    fn test_partition_error_isolated_on_request() {
        let config = PipelineConfig {
            isolate_partition_errors: true,
            ..Default::default()
        };
        let output = Pipeline::new(config)
            .run_cohorts(cohorts_with_inconsistent_female())
            .unwrap();

        assert_eq!(output.tables.len(), 1);
        assert!(output.tables.contains_key(&PartitionKey::new(2000, Gender::Male)));
        assert!(output.skipped.contains_key(&PartitionKey::new(2000, Gender::Female)));
        assert!(output.cohorts.iter().all(|c| c.key.gender == Gender::Male));
    }

    #[test]
    fn test_zero_exposure_policy() {
        let mut cohorts = vec![
            CohortRecord::new(CohortKey::new(2000, 0, Gender::Male), 1_000.0, 5),
            CohortRecord::new(CohortKey::new(2000, 1, Gender::Male), 800.0, 4),
            CohortRecord::new(CohortKey::new(2000, 2, Gender::Male), 0.0, 0),
        ];

        let retained = Pipeline::default().run_cohorts(cohorts.clone()).unwrap();
        let table = &retained.tables[&PartitionKey::new(2000, Gender::Male)];
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[2].mx, 0.0);
        assert_eq!(table.rows[2].person_years, 0.0);

        let config = PipelineConfig {
            zero_exposure: ZeroExposurePolicy::Exclude,
            ..Default::default()
        };
        cohorts.swap(0, 2);
        let excluded = Pipeline::new(config).run_cohorts(cohorts).unwrap();
        assert_eq!(excluded.summary.zero_exposure_excluded, 1);
        assert_eq!(excluded.tables[&PartitionKey::new(2000, Gender::Male)].rows.len(), 2);
    }

    #[test]
    fn test_radix_must_be_positive() {
        let config = PipelineConfig {
            radix: 0.0,
            ..Default::default()
        };
        let mut cohorts = cohorts_with_inconsistent_female();
        cohorts.truncate(4);

        let err = Pipeline::new(config).run_cohorts(cohorts).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRadix { .. }));
    }

    #[test]
    fn test_repeated_cohort_key_is_malformed() {
        let mut cohorts = cohorts_with_inconsistent_female();
        cohorts.truncate(4);
        cohorts.push(CohortRecord::new(CohortKey::new(2000, 2, Gender::Male), 900.0, 3));

        let err = Pipeline::default().run_cohorts(cohorts).unwrap_err();
        match err {
            PipelineError::MalformedInput { context, .. } => assert!(context.contains("age=2")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_exclude_keeps_interior_zero_exposure_age() {
        let cohorts = vec![
            CohortRecord::new(CohortKey::new(2000, 0, Gender::Male), 1_000.0, 5),
            CohortRecord::new(CohortKey::new(2000, 1, Gender::Male), 0.0, 0),
            CohortRecord::new(CohortKey::new(2000, 2, Gender::Male), 800.0, 4),
        ];
        let config = PipelineConfig {
            zero_exposure: ZeroExposurePolicy::Exclude,
            ..Default::default()
        };

        let output = Pipeline::new(config).run_cohorts(cohorts).unwrap();
        assert_eq!(output.summary.zero_exposure_excluded, 0);

        let table = &output.tables[&PartitionKey::new(2000, Gender::Male)];
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[1].mx, 0.0);
        assert_eq!(table.rows[2].lx, table.rows[1].lx);
        assert_eq!(table.open_age(), Some(2));
    }
}
