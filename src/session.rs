use crate::dlog;
use crate::error::{SessionError, SessionResult};
use crate::store::{Database, UnitOfWork, WorkoutStore};
use crate::types::{
    HeartRateSample, HeartRateSummary, NewSong, NewWorkout, SongPlay, SongPlayId, UserId,
    WorkoutDetails, WorkoutId, WorkoutSession, WorkoutStatus,
};
use chrono::{DateTime, Utc};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Starts a new workout. A user can only have one active workout at a time.
pub fn start_workout<D: Database>(
    db: &mut D,
    user_id: UserId,
    workout_type: Option<String>,
    at: DateTime<Utc>,
) -> SessionResult<WorkoutSession> {
    let mut tx = db.begin()?;

    if let Some(active) = tx.active_workout(user_id)? {
        return Err(SessionError::AlreadyActive(active.id));
    }

    let id = tx.insert_workout(&NewWorkout {
        user_id,
        workout_type,
        status: WorkoutStatus::Active,
        start: at,
        end: None,
    })?;
    let workout = tx.workout(id)?.ok_or(SessionError::NotFound(id))?;
    tx.commit()?;

    tracing::info!(workout_id = id, user_id, "workout started");
    Ok(workout)
}

fn load_active<T: WorkoutStore + ?Sized>(
    tx: &mut T,
    workout_id: WorkoutId,
) -> SessionResult<WorkoutSession> {
    let workout = tx
        .workout(workout_id)?
        .ok_or(SessionError::NotFound(workout_id))?;
    if workout.status != WorkoutStatus::Active {
        return Err(SessionError::NotActive {
            workout_id,
            status: workout.status,
        });
    }
    Ok(workout)
}

pub fn log_heart_rate<D: Database>(
    db: &mut D,
    workout_id: WorkoutId,
    bpm: i32,
    at: DateTime<Utc>,
) -> SessionResult<HeartRateSample> {
    if bpm <= 0 {
        return Err(SessionError::InvalidBpm(bpm));
    }

    let mut tx = db.begin()?;
    load_active(&mut tx, workout_id)?;

    let sample = HeartRateSample { timestamp: at, bpm };
    tx.insert_heart_rate(workout_id, &sample)?;
    tx.commit()?;

    dlog!("hr workout_id={workout_id} bpm={bpm}");
    Ok(sample)
}

/// Records that `song` started playing. The play stays open until
/// [`stop_song_play`] is called; analysis assumes three minutes otherwise.
pub fn log_song_play<D: Database>(
    db: &mut D,
    workout_id: WorkoutId,
    song: &NewSong,
    at: DateTime<Utc>,
) -> SessionResult<SongPlay> {
    let mut tx = db.begin()?;
    load_active(&mut tx, workout_id)?;

    let song_id = tx.find_or_create_song(song)?;
    let play_id = tx.insert_song_play(workout_id, song_id, at, None)?;
    tx.commit()?;

    tracing::info!(workout_id, song_id, play_id, title = %song.title, "song play logged");
    Ok(SongPlay {
        id: play_id,
        workout_id,
        song_id,
        start: at,
        end: None,
        analysis: None,
    })
}

pub fn stop_song_play<D: Database>(
    db: &mut D,
    play_id: SongPlayId,
    at: DateTime<Utc>,
) -> SessionResult<SongPlay> {
    let mut tx = db.begin()?;

    let mut play = tx
        .song_play(play_id)?
        .ok_or(SessionError::SongPlayNotFound(play_id))?;
    load_active(&mut tx, play.workout_id)?;

    if at < play.start {
        return Err(SessionError::InvalidInterval(format!(
            "song play {play_id} cannot end at {} before it started at {}",
            at.to_rfc3339(),
            play.start.to_rfc3339()
        )));
    }

    play.end = Some(at);
    tx.save_song_play(&play)?;
    tx.commit()?;
    Ok(play)
}

/// Adds `new_type` to the workout's comma-separated type list, e.g. a run that
/// turns into HIIT becomes `Running,HIIT`. A type already in the list is not
/// repeated.
pub fn transition_workout<D: Database>(
    db: &mut D,
    workout_id: WorkoutId,
    new_type: &str,
) -> SessionResult<WorkoutSession> {
    let new_type = new_type.trim();
    if new_type.is_empty() || new_type.contains(',') {
        return Err(SessionError::InvalidWorkoutType(new_type.to_string()));
    }

    let mut tx = db.begin()?;
    let workout = load_active(&mut tx, workout_id)?;

    let types = append_workout_type(workout.workout_type.as_deref(), new_type);
    tx.set_workout_type(workout_id, &types)?;
    let workout = tx
        .workout(workout_id)?
        .ok_or(SessionError::NotFound(workout_id))?;
    tx.commit()?;

    tracing::info!(workout_id, workout_type = %types, "workout transitioned");
    Ok(workout)
}

fn append_workout_type(current: Option<&str>, new_type: &str) -> String {
    match current.filter(|c| !c.is_empty()) {
        None => new_type.to_string(),
        Some(c) if c.split(',').any(|t| t == new_type) => c.to_string(),
        Some(c) => format!("{c},{new_type}"),
    }
}

/// The user's workout in progress, if any.
pub fn active_workout<D: Database>(
    db: &mut D,
    user_id: UserId,
) -> SessionResult<Option<WorkoutSession>> {
    let mut tx = db.begin()?;
    Ok(tx.active_workout(user_id)?)
}

/// The user's latest workouts, newest first.
pub fn workout_history<D: Database>(
    db: &mut D,
    user_id: UserId,
    limit: usize,
) -> SessionResult<Vec<WorkoutSession>> {
    let mut tx = db.begin()?;
    Ok(tx.workouts_for_user(user_id, limit)?)
}

pub fn workout_details<D: Database>(
    db: &mut D,
    workout_id: WorkoutId,
) -> SessionResult<WorkoutDetails> {
    let mut tx = db.begin()?;
    let workout = tx
        .workout(workout_id)?
        .ok_or(SessionError::NotFound(workout_id))?;

    let heart_rate_data = tx.heart_rate_samples(workout_id)?;
    let mut song_plays = tx.song_plays(workout_id)?;
    song_plays.sort_by_key(|p| p.start);

    Ok(WorkoutDetails {
        workout,
        heart_rate_data,
        song_plays,
    })
}

/// Integer mean, max and min of the workout's samples.
pub fn summarize(samples: &[HeartRateSample]) -> HeartRateSummary {
    let Some(len) = i64::try_from(samples.len()).ok().filter(|&n| n > 0) else {
        return HeartRateSummary::default();
    };
    let sum: i64 = samples.iter().map(|s| i64::from(s.bpm)).sum();
    HeartRateSummary {
        avg: i32::try_from(sum / len).ok(),
        max: samples.iter().map(|s| s.bpm).max(),
        min: samples.iter().map(|s| s.bpm).min(),
    }
}

/// `active -> completed`, recording the end time and heart-rate summary.
pub fn end_workout<D: Database>(
    db: &mut D,
    workout_id: WorkoutId,
    at: DateTime<Utc>,
) -> SessionResult<WorkoutSession> {
    let mut tx = db.begin()?;
    let workout = load_active(&mut tx, workout_id)?;

    if at < workout.start {
        return Err(SessionError::InvalidInterval(format!(
            "workout {workout_id} cannot end before it started"
        )));
    }

    let summary = summarize(&tx.heart_rate_samples(workout_id)?);
    if !tx.complete_workout(workout_id, at, summary)? {
        return Err(SessionError::NotActive {
            workout_id,
            status: workout.status,
        });
    }
    let workout = tx
        .workout(workout_id)?
        .ok_or(SessionError::NotFound(workout_id))?;
    tx.commit()?;

    tracing::info!(
        workout_id,
        avg_heart_rate = ?summary.avg,
        max_heart_rate = ?summary.max,
        "workout completed"
    );
    Ok(workout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(bpm: i32) -> HeartRateSample {
        HeartRateSample {
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            bpm,
        }
    }

    #[test]
    fn workout_types_accumulate_once() {
        assert_eq!(append_workout_type(None, "HIIT"), "HIIT");
        assert_eq!(append_workout_type(Some(""), "HIIT"), "HIIT");
        assert_eq!(append_workout_type(Some("Running"), "HIIT"), "Running,HIIT");
        assert_eq!(
            append_workout_type(Some("Running,HIIT"), "HIIT"),
            "Running,HIIT"
        );
        // whole entries only
        assert_eq!(append_workout_type(Some("HIIT"), "HI"), "HIIT,HI");
    }

    #[test]
    fn summary_of_nothing_is_empty() {
        assert_eq!(summarize(&[]), HeartRateSummary::default());
    }

    #[test]
    fn summary_mean_is_floored() {
        let s = summarize(&[sample(100), sample(101), sample(150)]);
        assert_eq!(s.avg, Some(117));
        assert_eq!(s.max, Some(150));
        assert_eq!(s.min, Some(100));
    }
}
