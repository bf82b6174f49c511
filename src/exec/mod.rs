//! Execution control
//!
//! Turns a test case into a running candidate: command construction,
//! initializer scoping, process spawning and stream wiring.

pub mod command;
pub mod initializer;
pub mod sandbox;
