#![deny(missing_docs)]
#![doc = "Q1 benchmark driver: configuration, repeated runs, cross-checks and reports."]

pub mod config;
pub mod driver;
pub mod report;

pub use config::{Config, ConfigError, Overrides};
pub use driver::{load_table, run, verify, RunReport, VerifyOutcome};
