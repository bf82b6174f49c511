//! judgebox: a fixture-driven test harness for systems-programming exercises
//!
//! Runs a candidate program against every fixture of a problem, isolates
//! each run in its own directory and process session, validates the output
//! through a closed set of checkers and, for networked exercises, drives a
//! scripted multi-connection conversation against the running candidate.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::supervisor`]: Child-subreaper registration and orphan detection
//! - [`kernel::proc_table`]: `/proc` enumeration
//! - [`kernel::signal`]: Signal delivery
//! - [`kernel::rlimit`]: Child CPU accounting and process-count ceilings
//!
//! ## Execution Control ([`exec`])
//! - [`exec::command`]: Command-line and environment construction
//! - [`exec::initializer`]: Scoped setup/teardown helper
//! - [`exec::sandbox`]: Candidate spawning, stream wiring, exit-code checks
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::checker`]: Output checkers
//! - [`verdict::diff`]: Unified line diff
//!
//! ## Safety ([`safety`])
//! - [`safety::workspace`]: Run-directory materialisation
//! - [`safety::checksum`]: Reference-answer tamper detection
//!
//! ## Interactor ([`interactor`])
//! - [`interactor::script`]: Conversation script parser
//! - [`interactor::latch`]: Barrier primitive
//! - [`interactor::connection`]: Per-connection state machine
//! - [`interactor::driver`]: Scheduler and process entry point
//!
//! ## Runner ([`runner`])
//! Fixture discovery, retries, time limits and the suite report.
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Error taxonomy, environment snapshot, runner options
//! - [`config::metadata`]: Per-test metadata records
//!
//! # Design Principles
//!
//! 1. **Kernel as truth** - Orphans come from `/proc`, CPU time from `getrusage`
//! 2. **Detection over prevention** - The reference answer is re-hashed after every run
//! 3. **Explicit context** - No global "current test"; everything is threaded through calls

pub mod cli;
pub mod config;
pub mod exec;
pub mod interactor;
pub mod kernel;
pub mod runner;
pub mod safety;
pub mod verdict;
