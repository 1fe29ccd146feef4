use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failed-access counter and lockout window as held on the user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockoutState {
    pub failed_count: u32,
    pub lockout_end: Option<DateTime<Utc>>,
}

impl LockoutState {
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lockout_end.is_some_and(|end| now < end)
    }

    /// Whole minutes until the lockout lifts, rounded up. Zero when not locked.
    #[must_use]
    pub fn minutes_left(&self, now: DateTime<Utc>) -> i64 {
        self.lockout_end
            .map_or(0, |end| minutes_until(end, now))
    }

    /// Apply one failed attempt. Reaching `threshold` opens a lockout window
    /// of `duration` and resets the counter. A window past the end of time
    /// saturates.
    #[must_use]
    pub fn after_failure(
        self,
        threshold: u32,
        duration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let failed_count = self.failed_count.saturating_add(1);
        if threshold > 0 && failed_count >= threshold {
            Self {
                failed_count: 0,
                lockout_end: Some(lockout_end_after(duration, now)),
            }
        } else {
            Self {
                failed_count,
                lockout_end: self.lockout_end,
            }
        }
    }
}

/// `now + duration`, saturating at the latest representable instant.
#[must_use]
pub fn lockout_end_after(duration: chrono::Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_signed(duration)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[must_use]
pub fn minutes_until(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (end - now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    (millis + 59_999) / 60_000
}
