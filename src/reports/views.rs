//! Summary slices over rated cohorts and built life tables

use std::collections::BTreeMap;

use serde::Serialize;

use crate::life_table::{LifeTable, PartitionKey};
use crate::records::{CohortRecord, Gender};

/// Cohort counts with their estimated rates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MortalityRateRow {
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Age")]
    pub age: u32,
    #[serde(rename = "Gender")]
    pub gender: Gender,
    #[serde(rename = "Population")]
    pub population: f64,
    #[serde(rename = "Deaths")]
    pub deaths: u64,
    #[serde(rename = "MortalityRate")]
    pub mortality_rate: Option<f64>,
    #[serde(rename = "qx_est")]
    pub qx_est: Option<f64>,
}

pub fn mortality_rates(cohorts: &[CohortRecord]) -> Vec<MortalityRateRow> {
    let mut rows: Vec<MortalityRateRow> = cohorts
        .iter()
        .map(|c| MortalityRateRow {
            year: c.key.year,
            age: c.key.age,
            gender: c.key.gender,
            population: c.population,
            deaths: c.deaths,
            mortality_rate: c.mx,
            qx_est: c.qx,
        })
        .collect();
    rows.sort_by_key(|r| (r.year, r.age, r.gender.as_str()));
    rows
}

/// One life table row flattened with its partition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifeTableExportRow {
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Gender")]
    pub gender: Gender,
    #[serde(rename = "Age")]
    pub age: u32,
    pub mx: f64,
    pub qx: f64,
    pub px: f64,
    pub lx: f64,
    pub dx: f64,
    #[serde(rename = "Lx")]
    pub person_years: f64,
    #[serde(rename = "Tx")]
    pub person_years_remaining: f64,
    pub ex: Option<f64>,
}

/// Tables ordered by year, then gender label
fn by_year_and_label(tables: &BTreeMap<PartitionKey, LifeTable>) -> Vec<&LifeTable> {
    let mut ordered: Vec<&LifeTable> = tables.values().collect();
    ordered.sort_by_key(|t| (t.key.year, t.key.gender.as_str()));
    ordered
}

pub fn life_table_rows(tables: &BTreeMap<PartitionKey, LifeTable>) -> Vec<LifeTableExportRow> {
    by_year_and_label(tables)
        .into_iter()
        .flat_map(|table| {
            table.rows.iter().map(move |row| LifeTableExportRow {
                year: table.key.year,
                gender: table.key.gender,
                age: row.age,
                mx: row.mx,
                qx: row.qx,
                px: row.px,
                lx: row.lx,
                dx: row.dx,
                person_years: row.person_years,
                person_years_remaining: row.person_years_remaining,
                ex: row.ex,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct E0Row {
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Gender")]
    pub gender: Gender,
    pub e0: f64,
}

/// Life expectancy at birth per table; tables with undefined e0 are omitted
pub fn e0_by_year(tables: &BTreeMap<PartitionKey, LifeTable>) -> Vec<E0Row> {
    by_year_and_label(tables)
        .into_iter()
        .filter_map(|table| {
            table.e0().map(|e0| E0Row {
                year: table.key.year,
                gender: table.key.gender,
                e0,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct E0DecadeRow {
    #[serde(rename = "Decade")]
    pub decade: i32,
    #[serde(rename = "Gender")]
    pub gender: Gender,
    pub avg_e0: f64,
}

pub fn decade_of(year: i32) -> i32 {
    year.div_euclid(10) * 10
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Mean e0 per decade and gender, rounded to three decimals
pub fn e0_by_decade(e0: &[E0Row]) -> Vec<E0DecadeRow> {
    let mut groups: BTreeMap<(i32, &'static str), (Gender, f64, usize)> = BTreeMap::new();
    for row in e0 {
        let entry = groups
            .entry((decade_of(row.year), row.gender.as_str()))
            .or_insert((row.gender, 0.0, 0));
        entry.1 += row.e0;
        entry.2 += 1;
    }

    groups
        .into_iter()
        .map(|((decade, _), (gender, sum, count))| E0DecadeRow {
            decade,
            gender,
            avg_e0: round_to(sum / count as f64, 3),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenderComparisonRow {
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Age")]
    pub age: u32,
    pub mx_male: f64,
    pub mx_female: f64,
    pub mx_diff: f64,
}

/// Male and female mx side by side for every (year, age) rated for both
pub fn gender_mortality_comparison(cohorts: &[CohortRecord]) -> Vec<GenderComparisonRow> {
    let mut pairs: BTreeMap<(i32, u32), (Option<f64>, Option<f64>)> = BTreeMap::new();
    for cohort in cohorts {
        let entry = pairs.entry((cohort.key.year, cohort.key.age)).or_default();
        match cohort.key.gender {
            Gender::Male => entry.0 = cohort.mx,
            Gender::Female => entry.1 = cohort.mx,
            Gender::Unknown | Gender::Total => {}
        }
    }

    pairs
        .into_iter()
        .filter_map(|((year, age), pair)| match pair {
            (Some(mx_male), Some(mx_female)) => Some(GenderComparisonRow {
                year,
                age,
                mx_male,
                mx_female,
                mx_diff: mx_male - mx_female,
            }),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgeGroupTrendRow {
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Gender")]
    pub gender: Gender,
    #[serde(rename = "AgeGroupStart")]
    pub age_group_start: u32,
    pub avg_mx_5yr_band: f64,
}

/// Mean mx over five-year age bands per year and gender
pub fn agegroup_trends(cohorts: &[CohortRecord]) -> Vec<AgeGroupTrendRow> {
    let mut bands: BTreeMap<(i32, &'static str, u32), (Gender, f64, usize)> = BTreeMap::new();
    for cohort in cohorts {
        let Some(mx) = cohort.mx else { continue };
        let gender = cohort.key.gender;
        let entry = bands
            .entry((cohort.key.year, gender.as_str(), cohort.key.age / 5 * 5))
            .or_insert((gender, 0.0, 0));
        entry.1 += mx;
        entry.2 += 1;
    }

    bands
        .into_iter()
        .map(|((year, _, age_group_start), (gender, sum, count))| AgeGroupTrendRow {
            year,
            gender,
            age_group_start,
            avg_mx_5yr_band: sum / count as f64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::life_table::{AgeRate, LifeTableBuilder};
    use crate::pipeline::rates;
    use crate::records::CohortKey;
    use approx::assert_relative_eq;

    fn rated(year: i32, age: u32, gender: Gender, population: f64, deaths: u64) -> CohortRecord {
        rates::estimate(CohortRecord::new(CohortKey::new(year, age, gender), population, deaths))
            .unwrap()
    }

    fn table(year: i32, gender: Gender, open_mx: f64) -> LifeTable {
        let rates = vec![AgeRate::new(0, 0.01, 0.01), AgeRate::new(1, open_mx, 0.0)];
        LifeTableBuilder::default()
            .build(PartitionKey::new(year, gender), &rates)
            .unwrap()
    }

    #[test]
    fn test_decade_of() {
        assert_eq!(decade_of(1950), 1950);
        assert_eq!(decade_of(1959), 1950);
        assert_eq!(decade_of(2003), 2000);
    }

    #[test]
    fn test_e0_by_decade_averages_and_rounds() {
        let rows = vec![
            E0Row { year: 1950, gender: Gender::Male, e0: 65.12341 },
            E0Row { year: 1955, gender: Gender::Male, e0: 66.12345 },
            E0Row { year: 1961, gender: Gender::Male, e0: 67.0 },
            E0Row { year: 1950, gender: Gender::Female, e0: 71.0 },
        ];

        let decades = e0_by_decade(&rows);
        assert_eq!(decades.len(), 3);
        assert_eq!(decades[0].decade, 1950);
        assert_eq!(decades[0].gender, Gender::Female);
        assert_eq!(decades[1].gender, Gender::Male);
        assert_relative_eq!(decades[1].avg_e0, 65.623, epsilon = 1e-9);
        assert_eq!(decades[2].decade, 1960);
    }

    #[test]
    fn test_e0_by_year_from_tables() {
        let mut tables = BTreeMap::new();
        for (year, gender, mx) in [(1950, Gender::Male, 0.1), (1950, Gender::Female, 0.05)] {
            let t = table(year, gender, mx);
            tables.insert(t.key, t);
        }

        let e0 = e0_by_year(&tables);
        assert_eq!(e0.len(), 2);
        assert_eq!(e0[0].gender, Gender::Female);
        assert!(e0[0].e0 > e0[1].e0);
        assert_eq!(life_table_rows(&tables).len(), 4);
    }

    #[test]
    fn test_gender_comparison_needs_both_sexes() {
        let cohorts = vec![
            rated(1950, 0, Gender::Male, 1_000.0, 30),
            rated(1950, 0, Gender::Female, 1_000.0, 20),
            rated(1950, 1, Gender::Male, 1_000.0, 5),
        ];

        let comparison = gender_mortality_comparison(&cohorts);
        assert_eq!(comparison.len(), 1);
        assert_relative_eq!(comparison[0].mx_diff, 0.01, epsilon = 1e-15);
    }

    #[test]
    fn test_agegroup_trends() {
        let cohorts: Vec<CohortRecord> = (0..10)
            .map(|age| rated(1950, age, Gender::Female, 1_000.0, age as u64))
            .collect();

        let trends = agegroup_trends(&cohorts);
        assert_eq!(trends.len(), 2);
        assert_eq!(trends[0].age_group_start, 0);
        assert_relative_eq!(trends[0].avg_mx_5yr_band, 0.002, max_relative = 1e-12);
        assert_eq!(trends[1].age_group_start, 5);
        assert_relative_eq!(trends[1].avg_mx_5yr_band, 0.007, max_relative = 1e-12);
    }

    #[test]
    fn test_mortality_rates_sorted() {
        let cohorts = vec![
            rated(1951, 0, Gender::Male, 100.0, 1),
            rated(1950, 1, Gender::Female, 100.0, 1),
            rated(1950, 1, Gender::Male, 100.0, 1),
        ];
        let rows = mortality_rates(&cohorts);
        assert_eq!((rows[0].year, rows[0].age, rows[0].gender), (1950, 1, Gender::Female));
        assert_eq!(rows[1].gender, Gender::Male);
        assert_eq!(rows[2].year, 1951);
    }

    #[test]
    fn test_reports_order_genders_by_label() {
        let cohorts = vec![
            rated(1950, 0, Gender::Male, 1_000.0, 30),
            rated(1950, 0, Gender::Female, 1_000.0, 20),
        ];

        let genders: Vec<Gender> = mortality_rates(&cohorts).iter().map(|r| r.gender).collect();
        assert_eq!(genders, vec![Gender::Female, Gender::Male]);

        let genders: Vec<Gender> = agegroup_trends(&cohorts).iter().map(|r| r.gender).collect();
        assert_eq!(genders, vec![Gender::Female, Gender::Male]);
    }
}
