//! Configuration: environment snapshot, runner options and per-test metadata

pub mod metadata;
pub mod types;
