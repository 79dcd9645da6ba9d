//! CSV export of rates, life tables and summary slices

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use super::views;
use crate::error::Result;
use crate::pipeline::PipelineOutput;

pub const MORTALITY_RATES_FILE: &str = "mortality_rates.csv";
pub const LIFE_TABLES_FILE: &str = "life_tables.csv";
pub const E0_BY_YEAR_FILE: &str = "e0_by_year.csv";
pub const E0_BY_DECADE_FILE: &str = "e0_by_decade.csv";
pub const GENDER_COMPARISON_FILE: &str = "gender_mortality_comparison.csv";
pub const AGEGROUP_TRENDS_FILE: &str = "agegroup_trends.csv";

/// Serialize rows as CSV with a header line
pub fn write_csv<W: Write, T: Serialize>(writer: W, rows: &[T]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

fn write_file<T: Serialize>(dir: &Path, name: &str, rows: &[T]) -> Result<PathBuf> {
    let path = dir.join(name);
    write_csv(File::create(&path)?, rows)?;
    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(path)
}

/// Write every report for a pipeline run into `dir`
pub fn export_all(dir: &Path, output: &PipelineOutput) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let e0 = views::e0_by_year(&output.tables);
    Ok(vec![
        write_file(dir, MORTALITY_RATES_FILE, &views::mortality_rates(&output.cohorts))?,
        write_file(dir, LIFE_TABLES_FILE, &views::life_table_rows(&output.tables))?,
        write_file(dir, E0_BY_YEAR_FILE, &e0)?,
        write_file(dir, E0_BY_DECADE_FILE, &views::e0_by_decade(&e0))?,
        write_file(
            dir,
            GENDER_COMPARISON_FILE,
            &views::gender_mortality_comparison(&output.cohorts),
        )?,
        write_file(dir, AGEGROUP_TRENDS_FILE, &views::agegroup_trends(&output.cohorts))?,
    ])
}
