//! Domain logic for the campaign generation monitor.
//!
//! Everything in this crate is pure: no filesystem, network, or clock access
//! beyond what callers pass in. The `monitor` crate owns I/O and scheduling
//! and drives these types.

pub mod alert;
pub mod brief;
pub mod campaign;
pub mod channels;
pub mod circuit_breaker;
pub mod context;
pub mod error;
pub mod metric_names;
pub mod thresholds;
pub mod types;
pub mod variants;
