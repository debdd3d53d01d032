use crate::types::{HeartRateSample, SongPlay};
use chrono::{DateTime, Duration, Utc};

/// Length assumed for a play that never got a stop event.
pub const DEFAULT_PLAY_SECS: i64 = 180;
/// Comparison window immediately before the song starts.
pub const PRIOR_WINDOW_SECS: i64 = 30;

/// Samples while the song played and just before it. Both borrow from the
/// timestamp-ordered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SongWindow<'a> {
    /// `start <= t <= end`
    pub during: &'a [HeartRateSample],
    /// `start - 30s <= t < start`
    pub prior: &'a [HeartRateSample],
}

/// Returns the play's end, filling it in as `start + 3min` when absent.
/// The second value is `true` when the end was synthesized here.
pub fn resolve_end(play: &mut SongPlay) -> (DateTime<Utc>, bool) {
    match play.end {
        Some(end) => (end, false),
        None => {
            let end = play.start + Duration::seconds(DEFAULT_PLAY_SECS);
            play.end = Some(end);
            (end, true)
        }
    }
}

/// `samples` must be sorted by timestamp. Returns `None` when no sample falls
/// inside `[start, end]`, i.e. the play cannot be analyzed.
pub fn extract(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    samples: &[HeartRateSample],
) -> Option<SongWindow<'_>> {
    let lo = samples.partition_point(|s| s.timestamp < start);
    let hi = samples.partition_point(|s| s.timestamp <= end);
    if hi <= lo {
        return None;
    }

    let prior_start = start - Duration::seconds(PRIOR_WINDOW_SECS);
    let prior_lo = samples.partition_point(|s| s.timestamp < prior_start);

    Some(SongWindow {
        during: &samples[lo..hi],
        prior: &samples[prior_lo..lo],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
    }

    fn secs(s: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(s)
    }

    fn stream() -> Vec<HeartRateSample> {
        (0..=20)
            .map(|i| HeartRateSample {
                timestamp: secs(i * 10),
                bpm: 100 + i32::try_from(i).unwrap(),
            })
            .collect()
    }

    #[test]
    fn during_is_inclusive_on_both_ends() {
        let s = stream();
        let w = extract(secs(60), secs(90), &s).unwrap();
        let ts: Vec<_> = w.during.iter().map(|x| x.timestamp).collect();
        assert_eq!(ts, vec![secs(60), secs(70), secs(80), secs(90)]);
    }

    #[test]
    fn prior_excludes_song_start_and_includes_window_start() {
        let s = stream();
        let w = extract(secs(60), secs(90), &s).unwrap();
        let ts: Vec<_> = w.prior.iter().map(|x| x.timestamp).collect();
        assert_eq!(ts, vec![secs(30), secs(40), secs(50)]);
    }

    #[test]
    fn prior_is_empty_at_stream_start() {
        let s = stream();
        let w = extract(secs(0), secs(20), &s).unwrap();
        assert!(w.prior.is_empty());
        assert_eq!(w.during.len(), 3);
    }

    #[test]
    fn no_overlap_is_unanalyzable() {
        let s = stream();
        assert_eq!(extract(secs(201), secs(400), &s), None);
        assert_eq!(extract(secs(61), secs(69), &s), None);
    }

    #[test]
    fn inverted_interval_is_unanalyzable() {
        let s = stream();
        assert_eq!(extract(secs(90), secs(60), &s), None);
    }

    #[test]
    fn missing_end_defaults_to_three_minutes_and_sticks() {
        let mut play = SongPlay {
            id: 1,
            workout_id: 1,
            song_id: 1,
            start: secs(60),
            end: None,
            analysis: None,
        };
        assert_eq!(resolve_end(&mut play), (secs(240), true));
        assert_eq!(play.end, Some(secs(240)));
        assert_eq!(resolve_end(&mut play), (secs(240), false));
    }
}
