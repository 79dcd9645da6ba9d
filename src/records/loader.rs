//! Load raw extracts from HMD InputDB text files and the tidy cohort table
//!
//! InputDB files are comma-delimited with padded fields and "." for missing
//! values. Parsing here is purely syntactic; filtering and reconciliation
//! belong to the pipeline.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, info};

use super::{CohortKey, CohortRecord, Gender, LexisShape, RawRecord, RecordSource, RecordType};
use crate::error::{PipelineError, Result};

/// Default population code used for InputDB file names
pub const DEFAULT_POPULATION_CODE: &str = "USA";

/// Counters reported by the ingestion step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub rows_read: usize,
    pub rows_loaded: usize,
    /// Rows whose age is an aggregate or unknown code (UNK, TOT, 110+)
    pub aggregate_codes_skipped: usize,
    /// Rows excluded because they failed validation
    pub malformed_skipped: usize,
}

impl IngestSummary {
    pub fn merge(&mut self, other: &IngestSummary) {
        self.rows_read += other.rows_read;
        self.rows_loaded += other.rows_loaded;
        self.aggregate_codes_skipped += other.aggregate_codes_skipped;
        self.malformed_skipped += other.malformed_skipped;
    }
}

/// Paths of the deaths and population files inside an InputDB directory
pub fn input_db_paths(dir: &Path, population_code: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{}death.txt", population_code)),
        dir.join(format!("{}pop.txt", population_code)),
    )
}

/// Load both deaths and population rows from an InputDB directory
pub fn load_input_db(
    dir: &Path,
    population_code: &str,
    skip_malformed: bool,
) -> Result<(Vec<RawRecord>, IngestSummary)> {
    let (death_path, pop_path) = input_db_paths(dir, population_code);

    let (mut records, mut summary) = load_deaths(&death_path, skip_malformed)?;
    let (population, pop_summary) = load_population(&pop_path, skip_malformed)?;

    records.extend(population);
    summary.merge(&pop_summary);

    info!(
        "Loaded {} raw rows from {} ({} aggregate-code rows skipped, {} malformed rows skipped)",
        summary.rows_loaded,
        dir.display(),
        summary.aggregate_codes_skipped,
        summary.malformed_skipped
    );
    Ok((records, summary))
}

/// Load a deaths file
pub fn load_deaths(path: &Path, skip_malformed: bool) -> Result<(Vec<RawRecord>, IngestSummary)> {
    let file = File::open(path)?;
    load_deaths_from_reader(file, &path.display().to_string(), skip_malformed)
}

/// Load a population file
pub fn load_population(
    path: &Path,
    skip_malformed: bool,
) -> Result<(Vec<RawRecord>, IngestSummary)> {
    let file = File::open(path)?;
    load_population_from_reader(file, &path.display().to_string(), skip_malformed)
}

/// Load deaths rows from any reader
pub fn load_deaths_from_reader<R: Read>(
    reader: R,
    source_name: &str,
    skip_malformed: bool,
) -> Result<(Vec<RawRecord>, IngestSummary)> {
    let mut csv_reader = input_db_reader(reader);
    let columns = ColumnIndex::resolve(
        csv_reader.headers()?,
        &["Year", "YearInterval", "Sex", "Age", "AgeInterval", "Lexis", "Deaths"],
        source_name,
    )?;

    read_rows(&mut csv_reader, source_name, skip_malformed, |row| {
        let Some(age) = parse_age(columns.get(row, "Age")) else {
            return Ok(None);
        };
        let year = parse_int(columns.get(row, "Year"), "Year")?;
        let year_interval = parse_int(columns.get(row, "YearInterval"), "YearInterval")?;
        let age_interval = parse_age_interval(columns.get(row, "AgeInterval"))?;
        let lexis_code = columns.get(row, "Lexis");
        let lexis = LexisShape::from_code(lexis_code)
            .ok_or_else(|| format!("unknown Lexis shape '{}'", lexis_code))?;
        let deaths = parse_count(columns.get(row, "Deaths"))?;

        Ok(Some(RawRecord {
            year: year as i32,
            age,
            age_interval,
            year_interval,
            gender: Gender::from_code(columns.get(row, "Sex")),
            source: RecordSource::Deaths(lexis),
            record_type: None,
            record_date: None,
            population: 0.0,
            deaths,
        }))
    })
}

/// Load population rows from any reader
pub fn load_population_from_reader<R: Read>(
    reader: R,
    source_name: &str,
    skip_malformed: bool,
) -> Result<(Vec<RawRecord>, IngestSummary)> {
    let mut csv_reader = input_db_reader(reader);
    let columns = ColumnIndex::resolve(
        csv_reader.headers()?,
        &["Year", "Sex", "Age", "AgeInterval", "Type", "Day", "Month", "Population"],
        source_name,
    )?;

    read_rows(&mut csv_reader, source_name, skip_malformed, |row| {
        let Some(age) = parse_age(columns.get(row, "Age")) else {
            return Ok(None);
        };
        let year = parse_int(columns.get(row, "Year"), "Year")?;
        let age_interval = parse_age_interval(columns.get(row, "AgeInterval"))?;
        let population = parse_population(columns.get(row, "Population"))?;

        let record_type = match columns.get(row, "Type") {
            "" | "." => None,
            code => Some(RecordType::new(code)),
        };
        let record_date = parse_date(
            year as i32,
            columns.get(row, "Month"),
            columns.get(row, "Day"),
        );

        Ok(Some(RawRecord {
            year: year as i32,
            age,
            age_interval,
            year_interval: 1,
            gender: Gender::from_code(columns.get(row, "Sex")),
            source: RecordSource::Population,
            record_type,
            record_date,
            population,
            deaths: 0,
        }))
    })
}

/// Raw CSV row of the tidy Year-Age-Gender table
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct TidyRow {
    #[serde(rename = "Year")]
    year: i32,
    #[serde(rename = "Age")]
    age: u32,
    #[serde(rename = "Gender")]
    gender: String,
    #[serde(rename = "Population")]
    population: f64,
    #[serde(rename = "Deaths")]
    deaths: u64,
}

impl TidyRow {
    fn to_cohort(self) -> Result<CohortRecord> {
        let gender = Gender::from_label(&self.gender).ok_or_else(|| {
            PipelineError::MalformedInput {
                context: format!("cohort ({}, {})", self.year, self.age),
                reason: format!("unknown Gender: {}", self.gender),
            }
        })?;
        if !self.population.is_finite() || self.population < 0.0 {
            return Err(PipelineError::MalformedInput {
                context: format!("cohort ({}, {}, {})", self.year, self.age, gender),
                reason: format!("invalid Population: {}", self.population),
            });
        }
        Ok(CohortRecord::new(
            CohortKey::new(self.year, self.age, gender),
            self.population,
            self.deaths,
        ))
    }
}

/// Load reconciled cohorts from a tidy CSV file
pub fn load_cohorts<P: AsRef<Path>>(path: P) -> Result<Vec<CohortRecord>> {
    let file = File::open(path)?;
    load_cohorts_from_reader(file)
}

/// Load reconciled cohorts from any reader
pub fn load_cohorts_from_reader<R: Read>(reader: R) -> Result<Vec<CohortRecord>> {
    let mut csv_reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let mut cohorts = Vec::new();
    let mut seen = BTreeSet::new();

    for (index, result) in csv_reader.deserialize().enumerate() {
        let row: TidyRow = result?;
        let cohort = row.to_cohort()?;
        if !seen.insert(cohort.key) {
            return Err(PipelineError::MalformedInput {
                context: format!("cohort table line {}", index + 2),
                reason: format!("duplicate cohort {}", cohort.key),
            });
        }
        cohorts.push(cohort);
    }

    Ok(cohorts)
}

/// Write cohorts as the tidy Year, Age, Gender, Population, Deaths table
pub fn write_cohorts<W: Write>(writer: W, cohorts: &[CohortRecord]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for cohort in cohorts {
        csv_writer.serialize(TidyRow {
            year: cohort.key.year,
            age: cohort.key.age,
            gender: cohort.key.gender.as_str().to_string(),
            population: cohort.population,
            deaths: cohort.deaths,
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

fn input_db_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader)
}

/// Header name to column position
struct ColumnIndex {
    columns: Vec<(&'static str, usize)>,
}

impl ColumnIndex {
    fn resolve(
        headers: &StringRecord,
        required: &[&'static str],
        source_name: &str,
    ) -> Result<Self> {
        let mut columns = Vec::with_capacity(required.len());
        for &name in required {
            let position = headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| PipelineError::MissingColumn {
                    column: name.to_string(),
                    source_name: source_name.to_string(),
                })?;
            columns.push((name, position));
        }
        Ok(Self { columns })
    }

    fn get<'r>(&self, row: &'r StringRecord, name: &str) -> &'r str {
        self.columns
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, i)| row.get(*i))
            .map(str::trim)
            .unwrap_or("")
    }
}

/// Drive a parse closure over every row, applying the malformed-row policy
///
/// The closure returns `Ok(None)` for rows carrying aggregate age codes and
/// `Err(reason)` for rows that fail validation.
fn read_rows<R, F>(
    csv_reader: &mut csv::Reader<R>,
    source_name: &str,
    skip_malformed: bool,
    mut parse: F,
) -> Result<(Vec<RawRecord>, IngestSummary)>
where
    R: Read,
    F: FnMut(&StringRecord) -> std::result::Result<Option<RawRecord>, String>,
{
    let mut records = Vec::new();
    let mut summary = IngestSummary::default();

    for result in csv_reader.records() {
        let row = result?;
        summary.rows_read += 1;

        match parse(&row) {
            Ok(Some(record)) => {
                records.push(record);
                summary.rows_loaded += 1;
            }
            Ok(None) => summary.aggregate_codes_skipped += 1,
            Err(reason) => {
                let line = row.position().map(|p| p.line()).unwrap_or(0);
                let context = format!("{} line {}", source_name, line);
                if !skip_malformed {
                    return Err(PipelineError::MalformedInput { context, reason });
                }
                debug!("Excluding malformed row at {}: {}", context, reason);
                summary.malformed_skipped += 1;
            }
        }
    }

    Ok((records, summary))
}

/// Numeric ages only; UNK, TOT and open codes like "110+" yield None
fn parse_age(value: &str) -> Option<u32> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn parse_int(value: &str, field: &str) -> std::result::Result<u32, String> {
    value
        .parse::<u32>()
        .map_err(|_| format!("non-numeric {} '{}'", field, value))
}

fn parse_age_interval(value: &str) -> std::result::Result<Option<u32>, String> {
    match value {
        "+" | "." | "" => Ok(None),
        v => parse_int(v, "AgeInterval").map(Some),
    }
}

fn parse_count(value: &str) -> std::result::Result<u64, String> {
    let count: f64 = value
        .parse()
        .map_err(|_| format!("non-numeric Deaths '{}'", value))?;
    if !count.is_finite() || count < 0.0 || count.fract() != 0.0 {
        return Err(format!("Deaths must be a non-negative integer, got '{}'", value));
    }
    Ok(count as u64)
}

fn parse_population(value: &str) -> std::result::Result<f64, String> {
    let population: f64 = value
        .parse()
        .map_err(|_| format!("non-numeric Population '{}'", value))?;
    if !population.is_finite() || population < 0.0 {
        return Err(format!("Population must be non-negative, got '{}'", value));
    }
    Ok(population)
}

fn parse_date(year: i32, month: &str, day: &str) -> Option<NaiveDate> {
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEATHS: &str = "\
PopName,Area,Year,YearReg,YearInterval,Sex,Age,AgeInterval,Lexis,RefCode,Access,Deaths,NoteCode1
USA,     1,1950,1950,1,f,0,1,TL,1,O,  1200,.
USA,     1,1950,1950,1,f,0,1,TU,1,O,   300,.
USA,     1,1950,1950,1,m,UNK,.,RR,1,O,   7,.
USA,     1,1950,1950,1,b,1,1,RR,1,O,    90,.
USA,     1,1950,1950,1,m,110,+,RR,1,O,  12,.
";

    const POPULATION: &str = "\
PopName,Area,Sex,Age,AgeInterval,Type,Day,Month,Year,RefCode,Access,Population,NoteCode1
USA,1,f,0,1,E,1,7,1950,1,O,1650000,.
USA,1,f,0,1,C,1,4,1950,1,O,1648000.5,.
USA,1,m,TOT,.,E,1,7,1950,1,O,75000000,.
USA,1,m,5,5,E,.,.,1950,1,O,8000000,.
";

    #[test]
    fn test_load_deaths_from_reader() {
        let (records, summary) =
            load_deaths_from_reader(DEATHS.as_bytes(), "deaths", false).unwrap();

        assert_eq!(summary.rows_read, 5);
        assert_eq!(summary.aggregate_codes_skipped, 1);
        assert_eq!(records.len(), 4);

        assert_eq!(records[0].gender, Gender::Female);
        assert_eq!(records[0].source, RecordSource::Deaths(LexisShape::TL));
        assert_eq!(records[0].deaths, 1200);
        assert_eq!(records[2].gender, Gender::Total);
        assert_eq!(records[3].age_interval, None);
    }

    #[test]
    fn test_load_population_from_reader() {
        let (records, summary) =
            load_population_from_reader(POPULATION.as_bytes(), "pop", false).unwrap();

        assert_eq!(summary.aggregate_codes_skipped, 1);
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].record_type, Some(RecordType::new("E")));
        assert_eq!(records[0].record_date, NaiveDate::from_ymd_opt(1950, 7, 1));
        assert_eq!(records[1].population, 1648000.5);
        assert_eq!(records[2].age_interval, Some(5));
        assert_eq!(records[2].record_date, None);
    }

    #[test]
    fn test_malformed_row_is_fatal_unless_skipped() {
        let data = "\
Year,YearInterval,Sex,Age,AgeInterval,Lexis,Deaths
1950,1,m,3,1,RR,-4
1950,1,m,4,1,RR,20
";
        let err = load_deaths_from_reader(data.as_bytes(), "deaths", false).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput { .. }));

        let (records, summary) = load_deaths_from_reader(data.as_bytes(), "deaths", true).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(summary.malformed_skipped, 1);
    }

    #[test]
    fn test_missing_column() {
        let data = "Year,Sex,Age,Deaths\n1950,m,3,4\n";
        let err = load_deaths_from_reader(data.as_bytes(), "deaths", false).unwrap_err();
        match err {
            PipelineError::MissingColumn { column, .. } => assert_eq!(column, "YearInterval"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_tidy_table_write_then_read() {
        let cohorts = vec![
            CohortRecord::new(CohortKey::new(1950, 0, Gender::Male), 1_700_000.0, 62_000),
            CohortRecord::new(CohortKey::new(1950, 0, Gender::Female), 1_650_000.0, 47_000),
        ];

        let mut buffer = Vec::new();
        write_cohorts(&mut buffer, &cohorts).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("Year,Age,Gender,Population,Deaths"));

        let loaded = load_cohorts_from_reader(text.as_bytes()).unwrap();
        assert_eq!(loaded, cohorts);
    }

    #[test]
    fn test_tidy_table_rejects_unknown_gender() {
        let data = "Year,Age,Gender,Population,Deaths\n1950,0,Both,100,1\n";
        assert!(load_cohorts_from_reader(data.as_bytes()).is_err());
    }

    #[test]
    fn test_tidy_table_rejects_repeated_key() {
        let data = "\
Year,Age,Gender,Population,Deaths
1950,0,Male,1000,10
1950,1,Male,900,9
1950,1,Male,905,9
";
        let err = load_cohorts_from_reader(data.as_bytes()).unwrap_err();
        match err {
            PipelineError::MalformedInput { context, reason } => {
                assert_eq!(context, "cohort table line 4");
                assert!(reason.contains("age=1"), "{}", reason);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
