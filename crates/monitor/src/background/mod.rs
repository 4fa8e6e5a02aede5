//! Periodic background jobs.

pub mod escalation;
pub mod retention;
pub mod snapshot;
