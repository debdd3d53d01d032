use crate::dlog;
use crate::store::{Database, SongStatStore, UnitOfWork, WorkoutStore};
use crate::types::{
    HeartRateSample, HeartRateSummary, NewSong, NewWorkout, ScoreKind, Song, SongId, SongPlay,
    SongPlayAnalysis, SongPlayId, UserId, UserSongStat, WorkoutId, WorkoutSession, WorkoutStatus,
};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use std::path::Path;

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS songs (
      id           INTEGER PRIMARY KEY,
      spotify_id   TEXT UNIQUE,
      title        TEXT NOT NULL,
      artist       TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS workout_sessions (
      id              INTEGER PRIMARY KEY,
      user_id         INTEGER NOT NULL,
      workout_type    TEXT,
      status          TEXT NOT NULL DEFAULT 'active',
      start_ms        INTEGER NOT NULL,
      end_ms          INTEGER,
      analyzed_at_ms  INTEGER,
      avg_heart_rate  INTEGER,
      max_heart_rate  INTEGER,
      min_heart_rate  INTEGER
    );

    CREATE INDEX IF NOT EXISTS workout_sessions_user_idx ON workout_sessions (user_id, status);

    CREATE TABLE IF NOT EXISTS heart_rate_data (
      id          INTEGER PRIMARY KEY,
      workout_id  INTEGER NOT NULL REFERENCES workout_sessions(id) ON DELETE CASCADE,
      ts_ms       INTEGER NOT NULL,
      bpm         INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS heart_rate_data_workout_idx ON heart_rate_data (workout_id, ts_ms);

    CREATE TABLE IF NOT EXISTS song_plays (
      id              INTEGER PRIMARY KEY,
      workout_id      INTEGER NOT NULL REFERENCES workout_sessions(id) ON DELETE CASCADE,
      song_id         INTEGER NOT NULL REFERENCES songs(id),
      start_ms        INTEGER NOT NULL,
      end_ms          INTEGER,
      avg_bpm         INTEGER,
      max_bpm         INTEGER,
      min_bpm         INTEGER,
      bpm_change      REAL,
      position        TEXT,
      hype_score      REAL,
      cooldown_score  REAL
    );

    CREATE INDEX IF NOT EXISTS song_plays_workout_idx ON song_plays (workout_id);

    CREATE TABLE IF NOT EXISTS user_song_stats (
      user_id                  INTEGER NOT NULL,
      song_id                  INTEGER NOT NULL REFERENCES songs(id),
      times_played             INTEGER NOT NULL DEFAULT 0,
      avg_bpm_response         REAL NOT NULL DEFAULT 0,
      personal_hype_score      REAL NOT NULL DEFAULT 0,
      personal_cooldown_score  REAL NOT NULL DEFAULT 0,
      last_played_at_ms        INTEGER,
      PRIMARY KEY (user_id, song_id)
    );
";

const WORKOUT_COLUMNS: &str = "id, user_id, workout_type, status, start_ms, end_ms, \
     analyzed_at_ms, avg_heart_rate, max_heart_rate, min_heart_rate";

const SONG_PLAY_COLUMNS: &str = "id, workout_id, song_id, start_ms, end_ms, avg_bpm, max_bpm, \
     min_bpm, bpm_change, position, hype_score, cooldown_score";

const STAT_COLUMNS: &str = "user_id, song_id, times_played, avg_bpm_response, \
     personal_hype_score, personal_cooldown_score, last_played_at_ms";

/// SQLite-backed store. Timestamps are epoch milliseconds.
pub struct SqliteDb {
    conn: Connection,
}

impl SqliteDb {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Opening SQLite DB: {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Enabling WAL mode")?;
        tracing::info!(path = %path.display(), "using sqlite database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Opening in-memory SQLite DB")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("Enabling foreign keys")?;
        conn.execute_batch(SCHEMA)
            .context("Ensuring SQLite schema")?;
        dlog!("sqlite schema ready");
        Ok(Self { conn })
    }
}

impl Database for SqliteDb {
    type Tx<'a>
        = SqliteTx<'a>
    where
        Self: 'a;

    fn begin(&mut self) -> Result<SqliteTx<'_>> {
        // IMMEDIATE takes the write lock up front so check-then-transition
        // sequences cannot interleave across connections.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Starting SQLite transaction")?;
        Ok(SqliteTx { tx })
    }
}

pub struct SqliteTx<'a> {
    tx: Transaction<'a>,
}

impl UnitOfWork for SqliteTx<'_> {
    fn commit(self) -> Result<()> {
        self.tx.commit().context("Committing SQLite transaction")
    }
}

fn to_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .with_context(|| format!("timestamp out of range: {ms} ms"))
}

fn opt_from_ms(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_ms).transpose()
}

fn workout_from_row(row: &Row<'_>) -> Result<WorkoutSession> {
    let status: String = row.get(3)?;
    Ok(WorkoutSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        workout_type: row.get(2)?,
        status: status.parse()?,
        start: from_ms(row.get(4)?)?,
        end: opt_from_ms(row.get(5)?)?,
        analyzed_at: opt_from_ms(row.get(6)?)?,
        avg_heart_rate: row.get(7)?,
        max_heart_rate: row.get(8)?,
        min_heart_rate: row.get(9)?,
    })
}

fn song_play_from_row(row: &Row<'_>) -> Result<SongPlay> {
    let avg_bpm: Option<i32> = row.get(5)?;
    let position: Option<String> = row.get(9)?;

    let analysis = match (avg_bpm, position) {
        (Some(avg_bpm), Some(position)) => Some(SongPlayAnalysis {
            avg_bpm,
            max_bpm: row.get::<_, Option<i32>>(6)?.unwrap_or(avg_bpm),
            min_bpm: row.get::<_, Option<i32>>(7)?.unwrap_or(avg_bpm),
            bpm_change: row.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
            position: position.parse()?,
            hype_score: row.get::<_, Option<f64>>(10)?.unwrap_or(0.0),
            cooldown_score: row.get::<_, Option<f64>>(11)?.unwrap_or(0.0),
        }),
        _ => None,
    };

    Ok(SongPlay {
        id: row.get(0)?,
        workout_id: row.get(1)?,
        song_id: row.get(2)?,
        start: from_ms(row.get(3)?)?,
        end: opt_from_ms(row.get(4)?)?,
        analysis,
    })
}

fn stat_from_row(row: &Row<'_>) -> Result<UserSongStat> {
    Ok(UserSongStat {
        user_id: row.get(0)?,
        song_id: row.get(1)?,
        times_played: row.get(2)?,
        avg_bpm_response: row.get(3)?,
        personal_hype_score: row.get(4)?,
        personal_cooldown_score: row.get(5)?,
        last_played_at: opt_from_ms(row.get(6)?)?,
    })
}

impl SqliteTx<'_> {
    fn workout_where(&self, filter: &str, param: i64) -> Result<Option<WorkoutSession>> {
        let sql = format!("SELECT {WORKOUT_COLUMNS} FROM workout_sessions WHERE {filter} LIMIT 1");
        let mut stmt = self.tx.prepare(&sql)?;
        let mut rows = stmt.query([param])?;
        rows.next()?.map(workout_from_row).transpose()
    }
}

impl WorkoutStore for SqliteTx<'_> {
    fn workout(&mut self, id: WorkoutId) -> Result<Option<WorkoutSession>> {
        self.workout_where("id = ?1", id)
            .with_context(|| format!("Loading workout {id}"))
    }

    fn active_workout(&mut self, user_id: UserId) -> Result<Option<WorkoutSession>> {
        self.workout_where("user_id = ?1 AND status = 'active' ORDER BY start_ms DESC", user_id)
            .with_context(|| format!("Loading active workout for user {user_id}"))
    }

    fn workouts_for_user(&mut self, user_id: UserId, limit: usize) -> Result<Vec<WorkoutSession>> {
        let sql = format!(
            "SELECT {WORKOUT_COLUMNS} FROM workout_sessions
             WHERE user_id = ?1
             ORDER BY start_ms DESC, id DESC
             LIMIT ?2"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = self.tx.prepare(&sql)?;
        let mut rows = stmt
            .query([user_id, limit])
            .with_context(|| format!("Loading workout history for user {user_id}"))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(workout_from_row(row)?);
        }
        Ok(out)
    }

    fn insert_workout(&mut self, w: &NewWorkout) -> Result<WorkoutId> {
        self.tx
            .execute(
                "INSERT INTO workout_sessions (user_id, workout_type, status, start_ms, end_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    w.user_id,
                    w.workout_type,
                    w.status.as_str(),
                    to_ms(w.start),
                    w.end.map(to_ms),
                ],
            )
            .context("Inserting workout")?;
        Ok(self.tx.last_insert_rowid())
    }

    fn set_workout_type(&mut self, id: WorkoutId, workout_type: &str) -> Result<()> {
        self.tx
            .execute(
                "UPDATE workout_sessions SET workout_type = ?2 WHERE id = ?1",
                params![id, workout_type],
            )
            .with_context(|| format!("Updating type of workout {id}"))?;
        Ok(())
    }

    fn complete_workout(
        &mut self,
        id: WorkoutId,
        end: DateTime<Utc>,
        summary: HeartRateSummary,
    ) -> Result<bool> {
        let n = self
            .tx
            .execute(
                "UPDATE workout_sessions
                 SET status = 'completed', end_ms = ?2,
                     avg_heart_rate = ?3, max_heart_rate = ?4, min_heart_rate = ?5
                 WHERE id = ?1 AND status = 'active'",
                params![id, to_ms(end), summary.avg, summary.max, summary.min],
            )
            .context("Completing workout")?;
        Ok(n == 1)
    }

    fn claim_for_analysis(&mut self, id: WorkoutId) -> Result<bool> {
        let n = self
            .tx
            .execute(
                "UPDATE workout_sessions SET status = ?2 WHERE id = ?1 AND status = ?3",
                params![
                    id,
                    WorkoutStatus::Analyzing.as_str(),
                    WorkoutStatus::Completed.as_str()
                ],
            )
            .context("Claiming workout for analysis")?;
        Ok(n == 1)
    }

    fn release_analysis(&mut self, id: WorkoutId) -> Result<bool> {
        let n = self
            .tx
            .execute(
                "UPDATE workout_sessions SET status = ?2 WHERE id = ?1 AND status = ?3",
                params![
                    id,
                    WorkoutStatus::Completed.as_str(),
                    WorkoutStatus::Analyzing.as_str()
                ],
            )
            .context("Releasing workout analysis claim")?;
        Ok(n == 1)
    }

    fn finish_analysis(&mut self, id: WorkoutId, at: DateTime<Utc>) -> Result<()> {
        self.tx
            .execute(
                "UPDATE workout_sessions SET status = ?2, analyzed_at_ms = ?3 WHERE id = ?1",
                params![id, WorkoutStatus::Analyzed.as_str(), to_ms(at)],
            )
            .context("Marking workout analyzed")?;
        Ok(())
    }

    fn heart_rate_samples(&mut self, workout_id: WorkoutId) -> Result<Vec<HeartRateSample>> {
        let mut stmt = self.tx.prepare(
            "SELECT ts_ms, bpm FROM heart_rate_data WHERE workout_id = ?1 ORDER BY ts_ms, id",
        )?;
        let mut rows = stmt.query([workout_id])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(HeartRateSample {
                timestamp: from_ms(row.get(0)?)?,
                bpm: row.get(1)?,
            });
        }
        Ok(out)
    }

    fn insert_heart_rate(&mut self, workout_id: WorkoutId, sample: &HeartRateSample) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO heart_rate_data (workout_id, ts_ms, bpm) VALUES (?1, ?2, ?3)",
                params![workout_id, to_ms(sample.timestamp), sample.bpm],
            )
            .context("Inserting heart rate sample")?;
        Ok(())
    }

    fn song(&mut self, id: SongId) -> Result<Option<Song>> {
        self.tx
            .query_row(
                "SELECT id, spotify_id, title, artist FROM songs WHERE id = ?1",
                [id],
                |row| {
                    Ok(Song {
                        id: row.get(0)?,
                        spotify_id: row.get(1)?,
                        title: row.get(2)?,
                        artist: row.get(3)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Loading song {id}"))
    }

    fn find_or_create_song(&mut self, song: &NewSong) -> Result<SongId> {
        let existing: Option<SongId> = self
            .tx
            .query_row(
                "SELECT id FROM songs WHERE spotify_id = ?1",
                [&song.spotify_id],
                |row| row.get(0),
            )
            .optional()
            .context("Looking up song by spotify id")?;
        if let Some(id) = existing {
            return Ok(id);
        }

        self.tx
            .execute(
                "INSERT INTO songs (spotify_id, title, artist) VALUES (?1, ?2, ?3)",
                params![song.spotify_id, song.title, song.artist],
            )
            .context("Inserting song")?;
        let id = self.tx.last_insert_rowid();
        dlog!("song_created id={id} spotify_id={}", song.spotify_id);
        Ok(id)
    }

    fn song_plays(&mut self, workout_id: WorkoutId) -> Result<Vec<SongPlay>> {
        let sql =
            format!("SELECT {SONG_PLAY_COLUMNS} FROM song_plays WHERE workout_id = ?1 ORDER BY id");
        let mut stmt = self.tx.prepare(&sql)?;
        let mut rows = stmt.query([workout_id])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(song_play_from_row(row)?);
        }
        Ok(out)
    }

    fn song_play(&mut self, id: SongPlayId) -> Result<Option<SongPlay>> {
        let sql = format!("SELECT {SONG_PLAY_COLUMNS} FROM song_plays WHERE id = ?1");
        let mut stmt = self.tx.prepare(&sql)?;
        let mut rows = stmt.query([id])?;
        rows.next()?.map(song_play_from_row).transpose()
    }

    fn insert_song_play(
        &mut self,
        workout_id: WorkoutId,
        song_id: SongId,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<SongPlayId> {
        self.tx
            .execute(
                "INSERT INTO song_plays (workout_id, song_id, start_ms, end_ms) VALUES (?1, ?2, ?3, ?4)",
                params![workout_id, song_id, to_ms(start), end.map(to_ms)],
            )
            .context("Inserting song play")?;
        Ok(self.tx.last_insert_rowid())
    }

    fn save_song_play(&mut self, play: &SongPlay) -> Result<()> {
        let a = play.analysis.as_ref();
        self.tx
            .execute(
                "UPDATE song_plays
                 SET end_ms = ?2, avg_bpm = ?3, max_bpm = ?4, min_bpm = ?5, bpm_change = ?6,
                     position = ?7, hype_score = ?8, cooldown_score = ?9
                 WHERE id = ?1",
                params![
                    play.id,
                    play.end.map(to_ms),
                    a.map(|a| a.avg_bpm),
                    a.map(|a| a.max_bpm),
                    a.map(|a| a.min_bpm),
                    a.map(|a| a.bpm_change),
                    a.map(|a| a.position.as_str()),
                    a.map(|a| a.hype_score),
                    a.map(|a| a.cooldown_score),
                ],
            )
            .with_context(|| format!("Saving song play {}", play.id))?;
        Ok(())
    }
}

impl SongStatStore for SqliteTx<'_> {
    fn user_song_stat(
        &mut self,
        user_id: UserId,
        song_id: SongId,
    ) -> Result<Option<UserSongStat>> {
        let sql = format!("SELECT {STAT_COLUMNS} FROM user_song_stats WHERE user_id = ?1 AND song_id = ?2");
        let mut stmt = self.tx.prepare(&sql)?;
        let mut rows = stmt.query([user_id, song_id])?;
        rows.next()?.map(stat_from_row).transpose()
    }

    // IMMEDIATE transactions already hold the database write lock.
    fn lock_user_song_stat(
        &mut self,
        user_id: UserId,
        song_id: SongId,
    ) -> Result<Option<UserSongStat>> {
        self.user_song_stat(user_id, song_id)
    }

    fn save_user_song_stat(&mut self, s: &UserSongStat) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO user_song_stats (
                   user_id, song_id, times_played, avg_bpm_response,
                   personal_hype_score, personal_cooldown_score, last_played_at_ms
                 )
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (user_id, song_id) DO UPDATE SET
                   times_played = excluded.times_played,
                   avg_bpm_response = excluded.avg_bpm_response,
                   personal_hype_score = excluded.personal_hype_score,
                   personal_cooldown_score = excluded.personal_cooldown_score,
                   last_played_at_ms = excluded.last_played_at_ms",
                params![
                    s.user_id,
                    s.song_id,
                    s.times_played,
                    s.avg_bpm_response,
                    s.personal_hype_score,
                    s.personal_cooldown_score,
                    s.last_played_at.map(to_ms),
                ],
            )
            .with_context(|| format!("Saving stat user={} song={}", s.user_id, s.song_id))?;
        Ok(())
    }

    fn top_user_song_stats(
        &mut self,
        user_id: UserId,
        kind: ScoreKind,
        limit: usize,
    ) -> Result<Vec<UserSongStat>> {
        let column = match kind {
            ScoreKind::Hype => "personal_hype_score",
            ScoreKind::Cooldown => "personal_cooldown_score",
        };
        let sql = format!(
            "SELECT {STAT_COLUMNS} FROM user_song_stats
             WHERE user_id = ?1 AND {column} > 0
             ORDER BY {column} DESC, song_id
             LIMIT ?2"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = self.tx.prepare(&sql)?;
        let mut rows = stmt.query([user_id, limit])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(stat_from_row(row)?);
        }
        Ok(out)
    }
}
