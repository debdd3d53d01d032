use crate::session::summarize;
use crate::store::{Database, UnitOfWork, WorkoutStore};
use crate::types::{HeartRateSample, NewSong, NewWorkout, UserId, WorkoutId, WorkoutStatus};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// A finished workout as exported by a recording device (see README for the layout).
#[derive(Debug, Clone, Deserialize)]
pub struct Recording {
    pub user_id: UserId,
    #[serde(default)]
    pub workout_type: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub heart_rate: Vec<HeartRateSample>,
    #[serde(default)]
    pub songs: Vec<RecordedSong>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedSong {
    #[serde(flatten)]
    pub song: NewSong,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

pub fn read_recording(path: &Path) -> Result<Recording> {
    let bytes = fs::read(path).with_context(|| format!("reading recording: {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing recording: {}", path.display()))
}

fn validate(rec: &Recording) -> Result<()> {
    if rec.end_time < rec.start_time {
        bail!(
            "recording ends ({}) before it starts ({})",
            rec.end_time.to_rfc3339(),
            rec.start_time.to_rfc3339()
        );
    }
    if let Some(bad) = rec.heart_rate.iter().find(|s| s.bpm <= 0) {
        bail!(
            "non-positive bpm {} at {}",
            bad.bpm,
            bad.timestamp.to_rfc3339()
        );
    }
    if let Some(bad) = rec
        .songs
        .iter()
        .find(|s| s.end_time.is_some_and(|end| end < s.start_time))
    {
        bail!("song {:?} ends before it starts", bad.song.title);
    }
    Ok(())
}

/// Writes the recording as one `completed` workout, all or nothing.
pub fn ingest_recording<D: Database>(db: &mut D, rec: &Recording) -> Result<WorkoutId> {
    validate(rec)?;

    let mut tx = db.begin()?;

    let workout_id = tx.insert_workout(&NewWorkout {
        user_id: rec.user_id,
        workout_type: rec.workout_type.clone(),
        status: WorkoutStatus::Active,
        start: rec.start_time,
        end: None,
    })?;

    for sample in &rec.heart_rate {
        tx.insert_heart_rate(workout_id, sample)?;
    }

    for played in &rec.songs {
        let song_id = tx.find_or_create_song(&played.song)?;
        tx.insert_song_play(workout_id, song_id, played.start_time, played.end_time)?;
    }

    let summary = summarize(&rec.heart_rate);
    if !tx.complete_workout(workout_id, rec.end_time, summary)? {
        bail!("workout {workout_id} was not active right after insert");
    }

    tx.commit().context("Committing recording import")?;

    tracing::info!(
        workout_id,
        user_id = rec.user_id,
        samples = rec.heart_rate.len(),
        songs = rec.songs.len(),
        "recording imported"
    );
    Ok(workout_id)
}

pub fn ingest_file<D: Database>(db: &mut D, path: &Path) -> Result<WorkoutId> {
    let rec = read_recording(path)?;
    ingest_recording(db, &rec).with_context(|| format!("importing {}", path.display()))
}
