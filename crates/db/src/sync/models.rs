use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Per-entity-type sync bookkeeping, keyed by the remote object name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub object_name: String,
    /// Last attempt, successful or not.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Lower bound of the next incremental window.
    pub last_successful_sync: Option<DateTime<Utc>>,
    /// Cumulative rows written across all successful runs.
    pub total_records: i64,
    pub total_errors: i64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Window start for an entity type that has never synced successfully.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WatermarkDefault {
    Lookback(Duration),
    Fixed(DateTime<Utc>),
}

impl WatermarkDefault {
    pub fn lookback_days(days: u32) -> Self {
        Self::Lookback(Duration::days(i64::from(days)))
    }

    /// Start of the remote system's useful history; used for full resyncs.
    pub fn epoch() -> Self {
        // 2000-01-01T00:00:00Z
        Self::Fixed(DateTime::<Utc>::UNIX_EPOCH + Duration::days(10_957))
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Lookback(window) => now - *window,
            Self::Fixed(at) => *at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn lookback_is_relative_to_now() {
        let now = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();
        let start = WatermarkDefault::lookback_days(30).resolve(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn fixed_ignores_now() {
        let now = Utc::now();
        let start = WatermarkDefault::epoch().resolve(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());
    }
}
