//! Life table construction for each (year, gender) partition

mod builder;
mod table;
pub mod partition;

pub use builder::LifeTableBuilder;
pub use partition::build_all;
pub use table::{AgeRate, LifeTable, LifeTableRow, PartitionKey};
