//! Wall-clock access for the cycle loop.

use chrono::{DateTime, Utc};
use std::time::Duration;

pub use wspr_common::next_boundary;

/// Source of UTC wall time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Time left until `t`, zero if it already passed.
pub fn duration_until(clock: &dyn Clock, t: DateTime<Utc>) -> Duration {
    (t - clock.now()).to_std().unwrap_or(Duration::ZERO)
}

/// Sleep until `t` by the given clock.
pub async fn wait_until(clock: &dyn Clock, t: DateTime<Utc>) {
    let remaining = duration_until(clock, t);
    if !remaining.is_zero() {
        tokio::time::sleep(remaining).await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    /// A clock frozen at one instant.
    pub(crate) struct FixedClock(pub DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[test]
    fn test_duration_until_clamps_to_zero() {
        let clock = FixedClock(Utc.with_ymd_and_hms(2025, 12, 27, 10, 1, 30).unwrap());
        let past = Utc.with_ymd_and_hms(2025, 12, 27, 10, 0, 0).unwrap();
        assert_eq!(duration_until(&clock, past), Duration::ZERO);

        let next = next_boundary(clock.now());
        assert_eq!(duration_until(&clock, next), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_wait_until_past_returns_immediately() {
        let clock = SystemClock;
        let started = std::time::Instant::now();
        wait_until(&clock, Utc::now() - chrono::Duration::seconds(5)).await;
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
