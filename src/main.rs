//! Life Tables CLI
//!
//! Builds the tidy cohort table from an HMD InputDB directory, and life tables
//! plus summary reports from either the raw extract or a tidy cohort table.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use life_tables::records::loader::{self, DEFAULT_POPULATION_CODE};
use life_tables::reports::export_all;
use life_tables::{Pipeline, PipelineConfig, PipelineOutput};

#[derive(Parser)]
#[command(
    name = "life_tables",
    version,
    about = "Reconcile vital-statistics extracts and build period life tables"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: ConfigArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile an InputDB directory into the tidy Year, Age, Gender table
    Cohorts {
        /// InputDB directory containing <CODE>death.txt and <CODE>pop.txt
        #[arg(long)]
        input: PathBuf,

        /// Population code used in the InputDB file names
        #[arg(long, default_value = DEFAULT_POPULATION_CODE)]
        code: String,

        /// Output CSV path
        #[arg(long)]
        out: PathBuf,
    },

    /// Build life tables and reports from a tidy cohort table
    Tables {
        /// Tidy CSV with Year, Age, Gender, Population, Deaths
        #[arg(long)]
        cohorts: PathBuf,

        /// Directory for the report CSVs
        #[arg(long)]
        outdir: PathBuf,
    },

    /// Run the whole pipeline from an InputDB directory
    Run {
        #[arg(long)]
        input: PathBuf,

        #[arg(long, default_value = DEFAULT_POPULATION_CODE)]
        code: String,

        #[arg(long)]
        outdir: PathBuf,
    },
}

#[derive(Args)]
struct ConfigArgs {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Life table radix (overrides the config file)
    #[arg(long, global = true)]
    radix: Option<f64>,

    /// Close every table with an open interval at this age
    #[arg(long, global = true)]
    open_age: Option<u32>,

    /// Exclude malformed rows instead of failing
    #[arg(long, global = true)]
    skip_malformed: bool,

    /// Skip inconsistent (year, gender) partitions instead of failing
    #[arg(long, global = true)]
    isolate_partitions: bool,
}

impl ConfigArgs {
    fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_path(path)
                .with_context(|| format!("failed to read config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(radix) = self.radix {
            config.radix = radix;
        }
        if self.open_age.is_some() {
            config.open_age = self.open_age;
        }
        config.skip_malformed |= self.skip_malformed;
        config.isolate_partition_errors |= self.isolate_partitions;
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.options.resolve()?;
    let pipeline = Pipeline::new(config);
    let start = Instant::now();

    match cli.command {
        Command::Cohorts { input, code, out } => {
            let (records, _) = loader::load_input_db(&input, &code, pipeline.config().skip_malformed)
                .with_context(|| format!("failed to load InputDB from {}", input.display()))?;
            let (cohorts, _) = pipeline.reconcile(records)?;
            write_tidy(&out, &cohorts)?;
            println!("Wrote {} rows to {}", cohorts.len(), out.display());
        }
        Command::Tables { cohorts, outdir } => {
            let loaded = loader::load_cohorts(&cohorts)
                .with_context(|| format!("failed to load cohorts from {}", cohorts.display()))?;
            let output = pipeline.run_cohorts(loaded)?;
            report(&outdir, &output)?;
        }
        Command::Run { input, code, outdir } => {
            let (records, _) = loader::load_input_db(&input, &code, pipeline.config().skip_malformed)
                .with_context(|| format!("failed to load InputDB from {}", input.display()))?;
            let output = pipeline.run(records)?;
            std::fs::create_dir_all(&outdir)?;
            write_tidy(&outdir.join("year_age_gender.csv"), &output.cohorts)?;
            report(&outdir, &output)?;
        }
    }

    println!("Total time: {:?}", start.elapsed());
    Ok(())
}

fn write_tidy(path: &Path, cohorts: &[life_tables::CohortRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    loader::write_cohorts(file, cohorts)?;
    Ok(())
}

fn report(outdir: &Path, output: &PipelineOutput) -> Result<()> {
    let written = export_all(outdir, output)
        .with_context(|| format!("failed to write reports to {}", outdir.display()))?;

    println!(
        "Built {} life tables from {} cohorts",
        output.tables.len(),
        output.cohorts.len()
    );
    for (key, reason) in &output.skipped {
        println!("  skipped {}: {}", key, reason);
    }
    println!("Outputs in {}:", outdir.display());
    for path in written {
        println!("  - {}", path.display());
    }
    Ok(())
}
