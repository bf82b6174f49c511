//! Thin wrappers around Linux kernel primitives.
//!
//! Everything that talks to `/proc`, signals or resource limits lives here.
//! Dependency direction: proc_table -> signal -> supervisor; rlimit stands alone

pub mod proc_table;
pub mod rlimit;
pub mod signal;
pub mod supervisor;
