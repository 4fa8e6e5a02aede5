use std::time::Duration;

/// Campaigns are keyed by the id declared in their brief.
pub type CampaignId = String;

/// Alert ids are time-ordered UUIDs (v7).
pub type AlertId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Convert a std [`Duration`] into a signed chrono span for timestamp math.
///
/// Durations too large for chrono saturate at roughly a century.
pub fn span(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
