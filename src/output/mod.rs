//! Reporting over the local store
//!
//! Lead and run statistics printed by `--stats`.

pub mod stats;

pub use stats::{load_statistics, print_statistics, HarvestStatistics};
