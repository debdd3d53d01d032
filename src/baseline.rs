use crate::types::HeartRateSample;
use crate::utils::{duration_from_secs_f64, mean_bpm, seconds_f64};
use chrono::{DateTime, Duration, Utc};

pub const BASELINE_WINDOW_CAP_SECS: f64 = 120.0;
pub const BASELINE_WINDOW_FRACTION: f64 = 0.2;

/// `min(120s, 20% of the workout)`.
pub fn baseline_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    let workout_secs = seconds_f64(end - start);
    duration_from_secs_f64(BASELINE_WINDOW_CAP_SECS.min(workout_secs * BASELINE_WINDOW_FRACTION))
}

/// Mean bpm of every sample at or before `start + baseline_window`.
///
/// `None` when no sample falls in the window; callers treat that as "no
/// fallback reference", not as a failure.
pub fn estimate_baseline(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    samples: &[HeartRateSample],
) -> Option<f64> {
    let cutoff = start + baseline_window(start, end);
    let in_window: Vec<HeartRateSample> = samples
        .iter()
        .filter(|s| s.timestamp <= cutoff)
        .copied()
        .collect();
    mean_bpm(&in_window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
    }

    fn at(secs: i64, bpm: i32) -> HeartRateSample {
        HeartRateSample {
            timestamp: t0() + Duration::seconds(secs),
            bpm,
        }
    }

    #[test]
    fn window_is_capped_at_two_minutes() {
        let w = baseline_window(t0(), t0() + Duration::minutes(60));
        assert_eq!(w, Duration::seconds(120));
    }

    #[test]
    fn short_workout_uses_a_fifth_of_its_length() {
        let w = baseline_window(t0(), t0() + Duration::seconds(300));
        assert_eq!(w, Duration::seconds(60));
    }

    #[test]
    fn averages_samples_up_to_and_including_cutoff() {
        let samples = [at(0, 80), at(30, 90), at(60, 100), at(61, 200)];
        let b = estimate_baseline(t0(), t0() + Duration::seconds(300), &samples).unwrap();
        assert!((b - 90.0).abs() < 1e-9);
    }

    #[test]
    fn undefined_when_window_is_empty() {
        let samples = [at(200, 150)];
        assert_eq!(
            estimate_baseline(t0(), t0() + Duration::seconds(600), &samples),
            None
        );
    }
}
