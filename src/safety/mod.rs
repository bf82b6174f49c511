//! Safety: per-test run directories and reference-answer integrity

pub mod checksum;
pub mod workspace;
