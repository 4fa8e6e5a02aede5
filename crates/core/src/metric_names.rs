//! Well-known metric and dependency name constants.
//!
//! Metric names key the threshold engine's rolling windows; dependency names
//! key the per-dependency circuit breakers.

/// Fraction of campaigns that completed generation (1.0 success, 0.0 failure).
pub const METRIC_SUCCESS_RATE: &str = "success_rate";

/// Generation cost divided by the number of produced variants.
pub const METRIC_COST_PER_ASSET: &str = "cost_per_asset";

/// Wall-clock generation duration in seconds.
pub const METRIC_DURATION_SECS: &str = "duration_secs";

/// The external generation service. This is the primary dependency: an open
/// breaker here halts all campaign output.
pub const DEP_GENERATION: &str = "generation";

/// The primary notification channel.
pub const DEP_NOTIFICATION: &str = "notification";

/// The alternate notification channel. It has its own breaker so a failing
/// primary never blocks it.
pub const DEP_NOTIFICATION_ALTERNATE: &str = "notification_alternate";
