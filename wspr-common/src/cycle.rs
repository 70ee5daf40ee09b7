//! WSPR cycle boundaries.
//!
//! Transmissions start at second 0 of every even UTC minute. All jobs
//! in the fleet derive their schedule from these functions, so every
//! job sees the same boundaries.

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};

/// Length of one WSPR cycle in minutes.
pub const CYCLE_MINUTES: i64 = 2;

/// Whether `t` is a cycle boundary (even minute, zero seconds, zero nanos).
pub fn is_boundary(t: DateTime<Utc>) -> bool {
    t.minute() % 2 == 0 && t.second() == 0 && t.nanosecond() == 0
}

/// Next cycle boundary at or after `now`.
///
/// Returns `now` itself when it already sits on a boundary. Otherwise an
/// odd minute rounds up to the following minute and an even minute with
/// any elapsed seconds rounds up by two minutes.
pub fn next_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    if is_boundary(now) {
        return now;
    }

    // Whole-minute truncation cannot fail for dates chrono can represent.
    let minute_start = now
        .duration_trunc(Duration::minutes(1))
        .unwrap_or(now);

    if now.minute() % 2 == 1 {
        minute_start + Duration::minutes(1)
    } else {
        minute_start + Duration::minutes(CYCLE_MINUTES)
    }
}

/// Recording filename for a cycle: `YYYYMMDD_HHMMSS_<kHz>_wspr.wav`.
pub fn recording_filename(boundary: DateTime<Utc>, frequency_khz: f64) -> String {
    format!(
        "{}_{}_wspr.wav",
        boundary.format("%Y%m%d_%H%M%S"),
        frequency_khz.floor() as u64
    )
}

/// Filename the decoder expects: `YYMMDD_HHMM.wav`. The decoder takes
/// its time label from this name.
pub fn decoder_filename(boundary: DateTime<Utc>) -> String {
    format!("{}.wav", boundary.format("%y%m%d_%H%M"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 27, h, m, s).unwrap()
    }

    #[test]
    fn test_boundary_is_returned_unchanged() {
        let t = at(10, 0, 0);
        assert_eq!(next_boundary(t), t);
        assert!(is_boundary(t));
    }

    #[test]
    fn test_even_minute_with_fraction_skips_a_cycle() {
        let t = at(10, 0, 0) + Duration::milliseconds(500);
        assert_eq!(next_boundary(t), at(10, 2, 0));

        let t = at(10, 4, 59);
        assert_eq!(next_boundary(t), at(10, 6, 0));
    }

    #[test]
    fn test_odd_minute_rounds_to_next_minute() {
        assert_eq!(next_boundary(at(10, 1, 0)), at(10, 2, 0));
        assert_eq!(next_boundary(at(10, 1, 30)), at(10, 2, 0));
        assert_eq!(next_boundary(at(23, 59, 1)), Utc.with_ymd_and_hms(2025, 12, 28, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_next_boundary_is_always_a_boundary() {
        let start = at(0, 0, 0);
        for step in 0..(3 * 60 * 4) {
            let now = start + Duration::milliseconds(step * 250 + 7);
            let next = next_boundary(now);
            assert!(is_boundary(next), "{} -> {}", now, next);
            assert!(next >= now);
            assert!(next - now <= Duration::minutes(2));
        }
    }

    #[test]
    fn test_filenames() {
        let t = at(10, 0, 0);
        assert_eq!(recording_filename(t, 14097.0), "20251227_100000_14097_wspr.wav");
        assert_eq!(recording_filename(t, 14095.6), "20251227_100000_14095_wspr.wav");
        assert_eq!(decoder_filename(t), "251227_1000.wav");
    }
}
