//! Reporting slices and CSV export over pipeline output

pub mod export;
pub mod views;

pub use export::{export_all, write_csv};
pub use views::{
    agegroup_trends, e0_by_decade, e0_by_year, gender_mortality_comparison, life_table_rows,
    mortality_rates,
};
