//! Recency guard.
//!
//! Flags items whose last recorded modification is newer than a
//! policy-defined cutoff, so a concurrent edit is never overwritten without a
//! human looking at it first. The guard is a signal only: it forces a review,
//! it never blocks a submission.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};

/// How the freshness cutoff is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecencyPolicy {
    /// The most recent occurrence of `weekday` at `time` (UTC).
    Weekly { weekday: Weekday, time: NaiveTime },
    /// A sliding window ending now.
    Rolling { window: Duration },
    /// Nothing is ever considered fresh.
    Disabled,
}

impl Default for RecencyPolicy {
    fn default() -> Self {
        RecencyPolicy::Weekly {
            weekday: Weekday::Tue,
            time: NaiveTime::from_hms_opt(21, 30, 0).unwrap_or_default(),
        }
    }
}

impl RecencyPolicy {
    /// Cutoff instant relative to `now`, or `None` when disabled.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            RecencyPolicy::Weekly { weekday, time } => {
                let days_back = (7 + now.weekday().num_days_from_monday()
                    - weekday.num_days_from_monday())
                    % 7;
                let date = now.date_naive() - Duration::days(i64::from(days_back));
                let candidate = date.and_time(time).and_utc();
                if candidate > now {
                    Some(candidate - Duration::days(7))
                } else {
                    Some(candidate)
                }
            }
            RecencyPolicy::Rolling { window } => Some(now - window),
            RecencyPolicy::Disabled => None,
        }
    }

    /// Whether a modification at `last_modified` is newer than the cutoff.
    /// Items without history are never fresh.
    pub fn is_fresh(&self, last_modified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match (last_modified, self.cutoff(now)) {
            (Some(ts), Some(cutoff)) => ts > cutoff,
            _ => false,
        }
    }
}
