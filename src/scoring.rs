use crate::types::{Position, SongPlayAnalysis};
use crate::utils::{mean_bpm, round_to, seconds_f64};
use crate::window::SongWindow;
use chrono::{DateTime, Utc};

pub const WARMUP_RATIO: f64 = 0.2;
pub const COOLDOWN_RATIO: f64 = 0.8;

pub const PEAK_MULTIPLIER: f64 = 1.5;
pub const HIGH_INTENSITY_BPM: f64 = 160.0;
pub const HIGH_INTENSITY_MULTIPLIER: f64 = 1.2;

pub const RECOVERY_MULTIPLIER: f64 = 1.5;
pub const LARGE_DROP_BPM: f64 = 10.0;
pub const LARGE_DROP_MULTIPLIER: f64 = 1.2;

/// Where in the workout timeline a song started.
pub struct Timeline {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Timeline {
    /// Song start offset as a fraction of the workout, clamped to `[0, 1]`.
    /// A zero-length workout puts everything at 0.
    pub fn ratio(&self, song_start: DateTime<Utc>) -> f64 {
        let total = seconds_f64(self.end - self.start);
        if total <= 0.0 {
            return 0.0;
        }
        (seconds_f64(song_start - self.start) / total).clamp(0.0, 1.0)
    }

    pub fn position(&self, song_start: DateTime<Utc>) -> Position {
        classify_ratio(self.ratio(song_start))
    }
}

/// Strict comparisons: exactly 0.2 and exactly 0.8 are both `Peak`.
pub fn classify_ratio(ratio: f64) -> Position {
    if ratio < WARMUP_RATIO {
        Position::Warmup
    } else if ratio > COOLDOWN_RATIO {
        Position::Cooldown
    } else {
        Position::Peak
    }
}

pub fn hype_score(bpm_change: f64, position: Position, avg_bpm: f64) -> f64 {
    if bpm_change <= 0.0 {
        return 0.0;
    }
    let mut score = bpm_change;
    if position == Position::Peak {
        score *= PEAK_MULTIPLIER;
    }
    if avg_bpm > HIGH_INTENSITY_BPM {
        score *= HIGH_INTENSITY_MULTIPLIER;
    }
    score
}

pub fn cooldown_score(bpm_change: f64, position: Position) -> f64 {
    if bpm_change >= 0.0 {
        return 0.0;
    }
    let drop = bpm_change.abs();
    let mut score = drop;
    if position == Position::Cooldown {
        score *= RECOVERY_MULTIPLIER;
    }
    if drop > LARGE_DROP_BPM {
        score *= LARGE_DROP_MULTIPLIER;
    }
    score
}

/// Scores one play. Returns `None` only if `window.during` is empty.
///
/// The change is measured against the 30s before the song, then the workout
/// baseline, then zero. Scores are computed from the unrounded mean and change;
/// only the reported values are rounded, ties to even.
#[allow(clippy::cast_possible_truncation)]
pub fn score_play(
    window: &SongWindow<'_>,
    baseline_bpm: Option<f64>,
    song_start: DateTime<Utc>,
    timeline: &Timeline,
) -> Option<SongPlayAnalysis> {
    let avg = mean_bpm(window.during)?;
    let max_bpm = window.during.iter().map(|s| s.bpm).max()?;
    let min_bpm = window.during.iter().map(|s| s.bpm).min()?;

    let bpm_change = match (mean_bpm(window.prior), baseline_bpm) {
        (Some(prior), _) => avg - prior,
        (None, Some(baseline)) => avg - baseline,
        (None, None) => 0.0,
    };

    let position = timeline.position(song_start);

    Some(SongPlayAnalysis {
        avg_bpm: avg.round_ties_even() as i32,
        max_bpm,
        min_bpm,
        bpm_change: round_to(bpm_change, 1),
        position,
        hype_score: round_to(hype_score(bpm_change, position, avg), 2),
        cooldown_score: round_to(cooldown_score(bpm_change, position), 2),
    })
}
