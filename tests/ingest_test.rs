//! # Recording Import Tests
//!
//! ```bash
//! cargo test --test ingest_test
//! ```

use serde_json::json;
use songpulse::ingest::ingest_file;
use songpulse::sqlite_store::SqliteDb;
use songpulse::store::{Database, WorkoutStore};
use songpulse::types::{AnalyzeOutcome, Position, WorkoutStatus};
use songpulse::analyze;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_recording(dir: &TempDir, name: &str, body: &serde_json::Value) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, serde_json::to_vec_pretty(body).unwrap()).unwrap();
    path
}

fn recording() -> serde_json::Value {
    let heart_rate: Vec<_> = (0..=60)
        .map(|i| {
            let bpm = if i < 30 { 100 } else { 150 };
            json!({
                "timestamp": format!("2025-01-15T10:{:02}:{:02}Z", i * 10 / 60, i * 10 % 60),
                "bpm": bpm,
            })
        })
        .collect();

    json!({
        "user_id": 5,
        "workout_type": "Cardio",
        "start_time": "2025-01-15T10:00:00Z",
        "end_time": "2025-01-15T10:10:00Z",
        "heart_rate": heart_rate,
        "songs": [
            {
                "spotify_id": "pump",
                "title": "Pump It",
                "artist": "Black Eyed Peas",
                "start_time": "2025-01-15T10:05:00Z",
                "end_time": "2025-01-15T10:06:00Z"
            },
            {
                "spotify_id": "open",
                "title": "Never Stopped",
                "artist": "Nobody",
                "start_time": "2025-01-15T10:08:00Z"
            }
        ]
    })
}

#[test]
fn imports_a_completed_workout() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_recording(&dir, "run.json", &recording());

    let mut db = SqliteDb::open_in_memory().unwrap();
    let workout_id = ingest_file(&mut db, &path).unwrap();

    let mut tx = db.begin().unwrap();
    let workout = tx.workout(workout_id).unwrap().unwrap();
    assert_eq!(workout.status, WorkoutStatus::Completed);
    assert_eq!(workout.user_id, 5);
    assert_eq!(workout.workout_type.as_deref(), Some("Cardio"));
    assert_eq!(workout.max_heart_rate, Some(150));
    assert_eq!(workout.min_heart_rate, Some(100));
    assert_eq!(tx.heart_rate_samples(workout_id).unwrap().len(), 61);

    let plays = tx.song_plays(workout_id).unwrap();
    assert_eq!(plays.len(), 2);
    assert_eq!(plays[1].end, None);
}

#[test]
fn imported_workout_analyzes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_recording(&dir, "run.json", &recording());

    let mut db = SqliteDb::open_in_memory().unwrap();
    let workout_id = ingest_file(&mut db, &path).unwrap();

    let AnalyzeOutcome::Analyzed(r) = analyze(&mut db, workout_id).unwrap() else {
        panic!("expected an analysis");
    };
    assert_eq!(r.songs_analyzed, 2);
    assert!((r.baseline_bpm.unwrap() - 100.0).abs() < 1e-9);

    // 10:05-10:06 starts exactly at the jump to 150, prior window is all 100
    let pump = &r.top_hype_songs[0];
    assert_eq!(pump.song.as_ref().unwrap().title, "Pump It");
    assert_eq!(pump.analysis.position, Position::Peak);
    assert!((pump.analysis.bpm_change - 50.0).abs() < 1e-9);
    assert!((pump.analysis.hype_score - 75.0).abs() < 1e-9);
}

#[test]
fn rejects_end_before_start_and_writes_nothing() {
    let mut body = recording();
    body["end_time"] = json!("2025-01-15T09:00:00Z");
    let dir = tempfile::tempdir().unwrap();
    let path = write_recording(&dir, "bad.json", &body);

    let mut db = SqliteDb::open_in_memory().unwrap();
    assert!(ingest_file(&mut db, &path).is_err());

    let mut tx = db.begin().unwrap();
    assert_eq!(tx.workout(1).unwrap(), None);
}

#[test]
fn rejects_non_positive_bpm() {
    let mut body = recording();
    body["heart_rate"][3]["bpm"] = json!(0);
    let dir = tempfile::tempdir().unwrap();
    let path = write_recording(&dir, "zero.json", &body);

    let mut db = SqliteDb::open_in_memory().unwrap();
    let err = ingest_file(&mut db, &path).unwrap_err();
    assert!(format!("{err:#}").contains("non-positive bpm"));
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.json");
    fs::write(&path, b"{ not json").unwrap();

    let mut db = SqliteDb::open_in_memory().unwrap();
    let err = ingest_file(&mut db, &path).unwrap_err();
    assert!(format!("{err:#}").contains("parsing recording"));
}
