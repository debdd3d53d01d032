use crate::baseline::estimate_baseline;
use crate::dlog;
use crate::error::{AnalysisError, AnalyzeResult};
use crate::scoring::{Timeline, score_play};
use crate::stats::record_play;
use crate::store::{Database, UnitOfWork, WorkoutStore};
use crate::types::{
    AnalysisResult, AnalyzeOutcome, AnalyzedPlay, EmptyReason, HeartRateSample, ScoreKind,
    SongPlay, UserId, WorkoutId, WorkoutSession, WorkoutStatus,
};
use crate::window;
use chrono::{DateTime, Utc};

/// How many songs each ranked list of a workout result keeps.
pub const TOP_PER_WORKOUT: usize = 10;

pub fn analyze<D: Database>(db: &mut D, workout_id: WorkoutId) -> AnalyzeResult<AnalyzeOutcome> {
    analyze_at(db, workout_id, Utc::now())
}

/// [`analyze`] with an explicit clock, used for `analyzed_at` and
/// `last_played_at`.
///
/// The workout is first claimed (`completed -> analyzing`), so a second caller
/// is rejected before it can touch any stat. Each play then commits its
/// analysis and stat update in its own unit of work, and a last one marks the
/// workout `analyzed`.
///
/// If a play fails, plays already committed stay committed and the claim is
/// released back to `completed`. Running the analysis again picks up where it
/// stopped: plays that already carry an analysis are reported but not folded
/// into the stats a second time.
pub fn analyze_at<D: Database>(
    db: &mut D,
    workout_id: WorkoutId,
    now: DateTime<Utc>,
) -> AnalyzeResult<AnalyzeOutcome> {
    let mut tx = db.begin()?;

    let workout = tx
        .workout(workout_id)?
        .ok_or(AnalysisError::NotFound(workout_id))?;
    if workout.status != WorkoutStatus::Completed {
        return Err(AnalysisError::NotCompleted {
            workout_id,
            status: workout.status,
        });
    }
    let end = workout
        .end
        .ok_or(AnalysisError::MissingEndTime(workout_id))?;

    let mut plays = tx.song_plays(workout_id)?;
    let mut samples = tx.heart_rate_samples(workout_id)?;

    if plays.is_empty() {
        return Ok(AnalyzeOutcome::NothingToAnalyze {
            reason: EmptyReason::NoSongPlays,
        });
    }
    if samples.is_empty() {
        return Ok(AnalyzeOutcome::NothingToAnalyze {
            reason: EmptyReason::NoHeartRateData,
        });
    }

    if !tx.claim_for_analysis(workout_id)? {
        let status = tx
            .workout(workout_id)?
            .map_or(WorkoutStatus::Analyzing, |w| w.status);
        tracing::warn!(workout_id, %status, "analysis claim lost to another caller");
        return Err(AnalysisError::NotCompleted { workout_id, status });
    }
    tx.commit()?;

    samples.sort_by_key(|s| s.timestamp);

    let baseline_bpm = estimate_baseline(workout.start, end, &samples);
    dlog!(
        "workout_id={workout_id} baseline_bpm={baseline_bpm:?} plays={} samples={}",
        plays.len(),
        samples.len()
    );

    let pass = Pass {
        user_id: workout.user_id,
        samples: &samples,
        baseline_bpm,
        timeline: Timeline {
            start: workout.start,
            end,
        },
        now,
    };

    let mut analyzed: Vec<AnalyzedPlay> = Vec::with_capacity(plays.len());
    for play in &mut plays {
        match pass.play(db, play) {
            Ok(Some(done)) => analyzed.push(done),
            Ok(None) => {}
            Err(e) => {
                release_after_failure(db, workout_id, &e);
                return Err(e);
            }
        }
    }

    let finished = db.begin().and_then(|mut tx| {
        tx.finish_analysis(workout_id, now)?;
        tx.commit()
    });
    if let Err(e) = finished {
        let e = AnalysisError::from(e);
        release_after_failure(db, workout_id, &e);
        return Err(e);
    }

    tracing::info!(
        workout_id,
        songs_analyzed = analyzed.len(),
        baseline_bpm = ?baseline_bpm,
        "workout analyzed"
    );

    Ok(AnalyzeOutcome::Analyzed(AnalysisResult {
        workout_id,
        baseline_bpm,
        songs_analyzed: analyzed.len(),
        top_hype_songs: rank(&analyzed, ScoreKind::Hype, TOP_PER_WORKOUT),
        top_cooldown_songs: rank(&analyzed, ScoreKind::Cooldown, TOP_PER_WORKOUT),
    }))
}

/// What every play of one workout is scored against.
struct Pass<'a> {
    user_id: UserId,
    samples: &'a [HeartRateSample],
    baseline_bpm: Option<f64>,
    timeline: Timeline,
    now: DateTime<Utc>,
}

impl Pass<'_> {
    /// Scores one play and commits it with its stat update. Returns `None`
    /// for a play with no samples in its window.
    fn play<D: Database>(
        &self,
        db: &mut D,
        play: &mut SongPlay,
    ) -> AnalyzeResult<Option<AnalyzedPlay>> {
        let mut tx = db.begin()?;

        // Committed by an earlier, interrupted run; its stat already counts it.
        if let Some(analysis) = play.analysis {
            dlog!("song_play_id={} already analyzed", play.id);
            return Ok(Some(AnalyzedPlay {
                song_play_id: play.id,
                song: tx.song(play.song_id)?,
                analysis,
            }));
        }

        let (play_end, synthesized) = window::resolve_end(play);

        let scored = window::extract(play.start, play_end, self.samples)
            .and_then(|w| score_play(&w, self.baseline_bpm, play.start, &self.timeline));

        let Some(analysis) = scored else {
            dlog!(
                "skip song_play_id={} song_id={}: no heart rate samples",
                play.id,
                play.song_id
            );
            if synthesized {
                tx.save_song_play(play)?;
                tx.commit()?;
            }
            return Ok(None);
        };

        play.analysis = Some(analysis);
        tx.save_song_play(play)?;
        record_play(&mut tx, self.user_id, play.song_id, &analysis, self.now)?;
        let song = tx.song(play.song_id)?;
        tx.commit()?;

        Ok(Some(AnalyzedPlay {
            song_play_id: play.id,
            song,
            analysis,
        }))
    }
}

fn release_after_failure<D: Database>(db: &mut D, workout_id: WorkoutId, cause: &AnalysisError) {
    let released = db.begin().and_then(|mut tx| {
        let released = tx.release_analysis(workout_id)?;
        tx.commit()?;
        Ok(released)
    });
    match released {
        Ok(_) => tracing::warn!(
            workout_id,
            error = %cause,
            "analysis failed; workout released for another run"
        ),
        Err(e) => tracing::error!(
            workout_id,
            error = %cause,
            release_error = %e,
            "analysis failed and the workout is still claimed"
        ),
    }
}

/// Hands a workout stuck in `analyzing` (a run that died without cleaning
/// up) back to `completed`, so [`analyze`] accepts it again.
pub fn release_analysis<D: Database>(
    db: &mut D,
    workout_id: WorkoutId,
) -> AnalyzeResult<WorkoutSession> {
    let mut tx = db.begin()?;
    let workout = tx
        .workout(workout_id)?
        .ok_or(AnalysisError::NotFound(workout_id))?;

    if !tx.release_analysis(workout_id)? {
        return Err(AnalysisError::NotAnalyzing {
            workout_id,
            status: workout.status,
        });
    }
    let workout = tx
        .workout(workout_id)?
        .ok_or(AnalysisError::NotFound(workout_id))?;
    tx.commit()?;

    tracing::info!(workout_id, "analysis claim released");
    Ok(workout)
}

/// Plays with a positive `kind` score, highest first, at most `limit`.
/// Equal scores keep their storage order.
pub fn rank(plays: &[AnalyzedPlay], kind: ScoreKind, limit: usize) -> Vec<AnalyzedPlay> {
    let mut ranked: Vec<AnalyzedPlay> = plays
        .iter()
        .filter(|p| kind.of_analysis(&p.analysis) > 0.0)
        .cloned()
        .collect();
    ranked.sort_by(|a, b| {
        kind.of_analysis(&b.analysis)
            .total_cmp(&kind.of_analysis(&a.analysis))
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Position, SongPlayAnalysis};

    fn play(id: i64, hype: f64, cooldown: f64) -> AnalyzedPlay {
        AnalyzedPlay {
            song_play_id: id,
            song: None,
            analysis: SongPlayAnalysis {
                avg_bpm: 140,
                max_bpm: 150,
                min_bpm: 130,
                bpm_change: 0.0,
                position: Position::Peak,
                hype_score: hype,
                cooldown_score: cooldown,
            },
        }
    }

    fn ids(plays: &[AnalyzedPlay]) -> Vec<i64> {
        plays.iter().map(|p| p.song_play_id).collect()
    }

    #[test]
    fn hype_ranking_is_descending() {
        let plays = [play(1, 12.5, 0.0), play(2, 40.0, 0.0), play(3, 5.0, 0.0)];
        let ranked = rank(&plays, ScoreKind::Hype, TOP_PER_WORKOUT);
        assert_eq!(ids(&ranked), vec![2, 1, 3]);
    }

    #[test]
    fn zero_scores_are_left_out() {
        let plays = [play(1, 0.0, 8.0), play(2, 3.0, 0.0), play(3, 0.0, 0.0)];
        assert_eq!(ids(&rank(&plays, ScoreKind::Hype, 10)), vec![2]);
        assert_eq!(ids(&rank(&plays, ScoreKind::Cooldown, 10)), vec![1]);
    }

    #[test]
    fn truncates_to_limit() {
        let plays: Vec<_> = (1..=15)
            .map(|i| play(i, f64::from(i32::try_from(i).unwrap()), 0.0))
            .collect();
        let ranked = rank(&plays, ScoreKind::Hype, TOP_PER_WORKOUT);
        assert_eq!(ranked.len(), 10);
        assert_eq!(ranked[0].song_play_id, 15);
        assert_eq!(ranked[9].song_play_id, 6);
    }

    #[test]
    fn ties_keep_storage_order() {
        let plays = [play(4, 7.0, 0.0), play(2, 9.0, 0.0), play(1, 7.0, 0.0)];
        assert_eq!(ids(&rank(&plays, ScoreKind::Hype, 10)), vec![2, 4, 1]);
    }
}
