//! # Workout Lifecycle Tests
//!
//! Start, log and end a workout, then analyze it.
//!
//! ```bash
//! cargo test --test session_test
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use songpulse::session::{
    DEFAULT_HISTORY_LIMIT, active_workout, end_workout, log_heart_rate, log_song_play,
    start_workout, stop_song_play, transition_workout, workout_details, workout_history,
};
use songpulse::sqlite_store::SqliteDb;
use songpulse::store::{Database, WorkoutStore};
use songpulse::types::{AnalyzeOutcome, NewSong, WorkoutStatus};
use songpulse::{SessionError, analyze_at};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 2, 7, 30, 0).unwrap()
}

fn secs(s: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(s)
}

fn tiger() -> NewSong {
    NewSong {
        spotify_id: "2HHtWyy5CgaQbC7XSoOb0e".into(),
        title: "Eye of the Tiger".into(),
        artist: "Survivor".into(),
    }
}

#[test]
fn only_one_active_workout_per_user() {
    let mut db = SqliteDb::open_in_memory().unwrap();
    let first = start_workout(&mut db, 1, Some("Cardio".into()), t0()).unwrap();
    assert_eq!(first.status, WorkoutStatus::Active);

    let err = start_workout(&mut db, 1, None, secs(5)).unwrap_err();
    assert!(matches!(err, SessionError::AlreadyActive(id) if id == first.id));

    // another user is unaffected
    start_workout(&mut db, 2, None, secs(5)).unwrap();
}

#[test]
fn rejects_non_positive_bpm() {
    let mut db = SqliteDb::open_in_memory().unwrap();
    let w = start_workout(&mut db, 1, None, t0()).unwrap();
    assert!(matches!(
        log_heart_rate(&mut db, w.id, 0, secs(10)),
        Err(SessionError::InvalidBpm(0))
    ));
}

#[test]
fn logging_requires_an_active_workout() {
    let mut db = SqliteDb::open_in_memory().unwrap();
    assert!(matches!(
        log_heart_rate(&mut db, 77, 120, t0()),
        Err(SessionError::NotFound(77))
    ));

    let w = start_workout(&mut db, 1, None, t0()).unwrap();
    end_workout(&mut db, w.id, secs(60)).unwrap();

    assert!(matches!(
        log_heart_rate(&mut db, w.id, 120, secs(70)),
        Err(SessionError::NotActive {
            status: WorkoutStatus::Completed,
            ..
        })
    ));
    assert!(matches!(
        log_song_play(&mut db, w.id, &tiger(), secs(70)),
        Err(SessionError::NotActive { .. })
    ));
    assert!(matches!(
        end_workout(&mut db, w.id, secs(80)),
        Err(SessionError::NotActive { .. })
    ));
}

#[test]
fn stop_before_start_is_rejected() {
    let mut db = SqliteDb::open_in_memory().unwrap();
    let w = start_workout(&mut db, 1, None, t0()).unwrap();
    let play = log_song_play(&mut db, w.id, &tiger(), secs(100)).unwrap();
    assert!(matches!(
        stop_song_play(&mut db, play.id, secs(99)),
        Err(SessionError::InvalidInterval(_))
    ));
    assert!(matches!(
        stop_song_play(&mut db, play.id + 100, secs(120)),
        Err(SessionError::SongPlayNotFound(_))
    ));
}

#[test]
fn full_workout_then_analysis() {
    let mut db = SqliteDb::open_in_memory().unwrap();
    let w = start_workout(&mut db, 9, Some("HIIT".into()), t0()).unwrap();

    for (t, bpm) in [(0, 80), (10, 80), (20, 80), (30, 90), (40, 130), (50, 150)] {
        log_heart_rate(&mut db, w.id, bpm, secs(t)).unwrap();
    }
    let play = log_song_play(&mut db, w.id, &tiger(), secs(40)).unwrap();
    stop_song_play(&mut db, play.id, secs(55)).unwrap();

    // same song again resolves to the same song row
    let again = log_song_play(&mut db, w.id, &tiger(), secs(300)).unwrap();
    assert_eq!(again.song_id, play.song_id);

    let done = end_workout(&mut db, w.id, secs(400)).unwrap();
    assert_eq!(done.status, WorkoutStatus::Completed);
    assert_eq!(done.end, Some(secs(400)));
    assert_eq!(done.avg_heart_rate, Some(101));
    assert_eq!(done.max_heart_rate, Some(150));
    assert_eq!(done.min_heart_rate, Some(80));

    let AnalyzeOutcome::Analyzed(r) = analyze_at(&mut db, w.id, secs(500)).unwrap() else {
        panic!("expected an analysis");
    };
    // the second play has no samples in its window
    assert_eq!(r.songs_analyzed, 1);
    let top = &r.top_hype_songs[0];
    assert_eq!(top.song_play_id, play.id);
    // during 130,150 vs prior 80,80,90
    assert_eq!(top.analysis.avg_bpm, 140);
    assert!((top.analysis.bpm_change - 56.7).abs() < 1e-9);

    let mut tx = db.begin().unwrap();
    let stored = tx.workout(w.id).unwrap().unwrap();
    assert_eq!(stored.status, WorkoutStatus::Analyzed);
}

#[test]
fn transition_appends_the_new_type() {
    let mut db = SqliteDb::open_in_memory().unwrap();
    let w = start_workout(&mut db, 1, Some("Running".into()), t0()).unwrap();

    let w2 = transition_workout(&mut db, w.id, "HIIT").unwrap();
    assert_eq!(w2.workout_type.as_deref(), Some("Running,HIIT"));
    let w3 = transition_workout(&mut db, w.id, "Running").unwrap();
    assert_eq!(w3.workout_type.as_deref(), Some("Running,HIIT"));

    assert!(matches!(
        transition_workout(&mut db, w.id, " "),
        Err(SessionError::InvalidWorkoutType(_))
    ));

    end_workout(&mut db, w.id, secs(60)).unwrap();
    assert!(matches!(
        transition_workout(&mut db, w.id, "Cooldown"),
        Err(SessionError::NotActive { .. })
    ));
}

#[test]
fn active_lookup_follows_the_lifecycle() {
    let mut db = SqliteDb::open_in_memory().unwrap();
    assert_eq!(active_workout(&mut db, 1).unwrap(), None);

    let w = start_workout(&mut db, 1, None, t0()).unwrap();
    assert_eq!(active_workout(&mut db, 1).unwrap().map(|a| a.id), Some(w.id));
    assert_eq!(active_workout(&mut db, 2).unwrap(), None);

    end_workout(&mut db, w.id, secs(60)).unwrap();
    assert_eq!(active_workout(&mut db, 1).unwrap(), None);
}

#[test]
fn history_lists_newest_first() {
    let mut db = SqliteDb::open_in_memory().unwrap();
    let mut ids = Vec::new();
    for day in 0..3 {
        let start = t0() + Duration::days(day);
        let w = start_workout(&mut db, 4, None, start).unwrap();
        end_workout(&mut db, w.id, start + Duration::minutes(30)).unwrap();
        ids.push(w.id);
    }
    start_workout(&mut db, 5, None, t0()).unwrap();

    let history = workout_history(&mut db, 4, DEFAULT_HISTORY_LIMIT).unwrap();
    let got: Vec<_> = history.iter().map(|w| w.id).collect();
    ids.reverse();
    assert_eq!(got, ids);
    assert_eq!(workout_history(&mut db, 4, 1).unwrap().len(), 1);
}

#[test]
fn details_order_samples_and_plays_by_time() {
    let mut db = SqliteDb::open_in_memory().unwrap();
    let w = start_workout(&mut db, 1, None, t0()).unwrap();

    for (t, bpm) in [(30, 120), (10, 100), (20, 110)] {
        log_heart_rate(&mut db, w.id, bpm, secs(t)).unwrap();
    }
    let late = log_song_play(&mut db, w.id, &tiger(), secs(200)).unwrap();
    let early = log_song_play(&mut db, w.id, &tiger(), secs(5)).unwrap();

    let d = workout_details(&mut db, w.id).unwrap();
    assert_eq!(d.workout.id, w.id);
    let bpms: Vec<_> = d.heart_rate_data.iter().map(|s| s.bpm).collect();
    assert_eq!(bpms, vec![100, 110, 120]);
    let plays: Vec<_> = d.song_plays.iter().map(|p| p.id).collect();
    assert_eq!(plays, vec![early.id, late.id]);

    assert!(matches!(
        workout_details(&mut db, w.id + 1),
        Err(SessionError::NotFound(_))
    ));
}
