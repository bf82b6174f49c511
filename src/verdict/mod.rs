//! Output verification
//!
//! Built-in comparisons are pure functions over (produced, reference);
//! external checkers are delegated to a separate program.

pub mod checker;
pub mod diff;
