use crate::store::{Database, SongStatStore, UnitOfWork, WorkoutStore};
use crate::types::{
    HeartRateSample, HeartRateSummary, NewSong, NewWorkout, ScoreKind, Song, SongId, SongPlay,
    SongPlayAnalysis, SongPlayId, UserId, UserSongStat, WorkoutId, WorkoutSession, WorkoutStatus,
};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use postgres::{Client, NoTls, Row, Transaction};

const WORKOUT_COLUMNS: &str = "id, user_id, workout_type, status, start_time, end_time, \
     analyzed_at, avg_heart_rate, max_heart_rate, min_heart_rate";

const SONG_PLAY_COLUMNS: &str = "id, workout_id, song_id, start_time, end_time, avg_bpm, \
     max_bpm, min_bpm, bpm_change, position, hype_score, cooldown_score";

const STAT_COLUMNS: &str = "user_id, song_id, times_played, avg_bpm_response, \
     personal_hype_score, personal_cooldown_score, last_played_at";

/// PostgreSQL-backed store.
pub struct PgDb {
    client: Client,
}

impl PgDb {
    /// Connects to `pg_url`, creating the database if it does not exist yet,
    /// and ensures the schema.
    pub fn connect(pg_url: &str) -> Result<Self> {
        let mut client = connect_or_create_db(pg_url)?;
        ensure_pg_schema(&mut client)?;
        Ok(Self { client })
    }
}

impl Database for PgDb {
    type Tx<'a>
        = PgTx<'a>
    where
        Self: 'a;

    fn begin(&mut self) -> Result<PgTx<'_>> {
        let tx = self
            .client
            .transaction()
            .context("Starting PostgreSQL transaction")?;
        Ok(PgTx { tx })
    }
}

pub struct PgTx<'a> {
    tx: Transaction<'a>,
}

impl UnitOfWork for PgTx<'_> {
    fn commit(self) -> Result<()> {
        self.tx.commit().context("Committing PostgreSQL transaction")
    }
}

/// Connect to `pg_url`. If the database in the URL doesn't exist, create it and retry.
///
/// This requires privileges to CREATE DATABASE.
fn connect_or_create_db(pg_url: &str) -> Result<Client> {
    match Client::connect(pg_url, NoTls) {
        Ok(pg) => return Ok(pg),
        Err(e) if is_db_missing(&e) => {
            tracing::warn!(err = %e, "database does not exist; attempting to create it");
        }
        Err(e) => return Err(e).context("Connecting to PostgreSQL"),
    }

    let (db_name, maintenance_url) = maintenance_url(pg_url)?;
    let mut admin =
        Client::connect(&maintenance_url, NoTls).context("Connecting to maintenance DB")?;

    let exists = admin
        .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&db_name])?
        .is_some();
    if exists {
        tracing::info!(db = %db_name, "database already exists");
    } else {
        tracing::info!(db = %db_name, "creating database");
        create_database(&mut admin, &db_name)?;
    }

    Client::connect(pg_url, NoTls).context("Connecting to PostgreSQL after creating database")
}

fn is_db_missing(e: &postgres::Error) -> bool {
    // 3D000 = invalid_catalog_name
    e.as_db_error().is_some_and(|d| d.code().code() == "3D000")
}

fn create_database(pg: &mut Client, db_name: &str) -> Result<()> {
    if db_name.is_empty()
        || !db_name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        bail!("Refusing to create database with unsafe name: {db_name:?}");
    }

    match pg.batch_execute(&format!("CREATE DATABASE \"{db_name}\"")) {
        Ok(()) => Ok(()),
        // 42P04 = duplicate_database, lost a race with another creator
        Err(e) if e.as_db_error().is_some_and(|d| d.code().code() == "42P04") => Ok(()),
        Err(e) => Err(e).context("Creating database"),
    }
}

/// Splits `postgres://host/dbname?opts` into `dbname` and the same URL
/// pointing at the `postgres` maintenance database.
fn maintenance_url(pg_url: &str) -> Result<(String, String)> {
    let (base, query) = match pg_url.split_once('?') {
        Some((a, b)) => (a, Some(b)),
        None => (pg_url, None),
    };

    let slash = base
        .rfind('/')
        .context("database URL must include a database name (e.g. .../songpulse)")?;
    let db_name = &base[slash + 1..];
    if db_name.is_empty() {
        bail!("database URL must include a database name (e.g. .../songpulse)");
    }

    let mut admin = format!("{}postgres", &base[..=slash]);
    if let Some(q) = query {
        admin.push('?');
        admin.push_str(q);
    }

    Ok((db_name.to_string(), admin))
}

fn ensure_pg_schema(pg: &mut Client) -> Result<()> {
    pg.batch_execute(
        r"
        CREATE TABLE IF NOT EXISTS songs (
          id          bigserial PRIMARY KEY,
          spotify_id  text UNIQUE,
          title       text NOT NULL,
          artist      text NOT NULL
        );

        CREATE TABLE IF NOT EXISTS workout_sessions (
          id              bigserial PRIMARY KEY,
          user_id         bigint NOT NULL,
          workout_type    text,
          status          text NOT NULL DEFAULT 'active',
          start_time      timestamptz NOT NULL,
          end_time        timestamptz,
          analyzed_at     timestamptz,
          avg_heart_rate  int,
          max_heart_rate  int,
          min_heart_rate  int,
          created_at      timestamptz NOT NULL DEFAULT now()
        );

        CREATE INDEX IF NOT EXISTS workout_sessions_user_idx ON workout_sessions (user_id, status);

        CREATE TABLE IF NOT EXISTS heart_rate_data (
          id          bigserial PRIMARY KEY,
          workout_id  bigint NOT NULL REFERENCES workout_sessions(id) ON DELETE CASCADE,
          ts          timestamptz NOT NULL,
          bpm         int NOT NULL
        );

        CREATE INDEX IF NOT EXISTS heart_rate_data_workout_idx ON heart_rate_data (workout_id, ts);

        CREATE TABLE IF NOT EXISTS song_plays (
          id              bigserial PRIMARY KEY,
          workout_id      bigint NOT NULL REFERENCES workout_sessions(id) ON DELETE CASCADE,
          song_id         bigint NOT NULL REFERENCES songs(id),
          start_time      timestamptz NOT NULL,
          end_time        timestamptz,
          avg_bpm         int,
          max_bpm         int,
          min_bpm         int,
          bpm_change      double precision,
          position        text,
          hype_score      double precision,
          cooldown_score  double precision
        );

        CREATE INDEX IF NOT EXISTS song_plays_workout_idx ON song_plays (workout_id);

        CREATE TABLE IF NOT EXISTS user_song_stats (
          user_id                  bigint NOT NULL,
          song_id                  bigint NOT NULL REFERENCES songs(id),
          times_played             bigint NOT NULL DEFAULT 0,
          avg_bpm_response         double precision NOT NULL DEFAULT 0,
          personal_hype_score      double precision NOT NULL DEFAULT 0,
          personal_cooldown_score  double precision NOT NULL DEFAULT 0,
          last_played_at           timestamptz,
          PRIMARY KEY (user_id, song_id)
        );
        ",
    )
    .context("Ensuring PostgreSQL schema")?;
    Ok(())
}

fn workout_from_row(row: &Row) -> Result<WorkoutSession> {
    let status: String = row.try_get(3)?;
    Ok(WorkoutSession {
        id: row.try_get(0)?,
        user_id: row.try_get(1)?,
        workout_type: row.try_get(2)?,
        status: status.parse()?,
        start: row.try_get(4)?,
        end: row.try_get(5)?,
        analyzed_at: row.try_get(6)?,
        avg_heart_rate: row.try_get(7)?,
        max_heart_rate: row.try_get(8)?,
        min_heart_rate: row.try_get(9)?,
    })
}

fn song_play_from_row(row: &Row) -> Result<SongPlay> {
    let avg_bpm: Option<i32> = row.try_get(5)?;
    let position: Option<String> = row.try_get(9)?;

    let analysis = match (avg_bpm, position) {
        (Some(avg_bpm), Some(position)) => Some(SongPlayAnalysis {
            avg_bpm,
            max_bpm: row.try_get::<_, Option<i32>>(6)?.unwrap_or(avg_bpm),
            min_bpm: row.try_get::<_, Option<i32>>(7)?.unwrap_or(avg_bpm),
            bpm_change: row.try_get::<_, Option<f64>>(8)?.unwrap_or(0.0),
            position: position.parse()?,
            hype_score: row.try_get::<_, Option<f64>>(10)?.unwrap_or(0.0),
            cooldown_score: row.try_get::<_, Option<f64>>(11)?.unwrap_or(0.0),
        }),
        _ => None,
    };

    Ok(SongPlay {
        id: row.try_get(0)?,
        workout_id: row.try_get(1)?,
        song_id: row.try_get(2)?,
        start: row.try_get(3)?,
        end: row.try_get(4)?,
        analysis,
    })
}

fn stat_from_row(row: &Row) -> Result<UserSongStat> {
    Ok(UserSongStat {
        user_id: row.try_get(0)?,
        song_id: row.try_get(1)?,
        times_played: row.try_get(2)?,
        avg_bpm_response: row.try_get(3)?,
        personal_hype_score: row.try_get(4)?,
        personal_cooldown_score: row.try_get(5)?,
        last_played_at: row.try_get(6)?,
    })
}

impl WorkoutStore for PgTx<'_> {
    fn workout(&mut self, id: WorkoutId) -> Result<Option<WorkoutSession>> {
        let sql = format!("SELECT {WORKOUT_COLUMNS} FROM workout_sessions WHERE id = $1");
        self.tx
            .query_opt(&sql, &[&id])
            .with_context(|| format!("Loading workout {id}"))?
            .as_ref()
            .map(workout_from_row)
            .transpose()
    }

    fn active_workout(&mut self, user_id: UserId) -> Result<Option<WorkoutSession>> {
        let sql = format!(
            "SELECT {WORKOUT_COLUMNS} FROM workout_sessions
             WHERE user_id = $1 AND status = 'active'
             ORDER BY start_time DESC LIMIT 1"
        );
        self.tx
            .query_opt(&sql, &[&user_id])
            .with_context(|| format!("Loading active workout for user {user_id}"))?
            .as_ref()
            .map(workout_from_row)
            .transpose()
    }

    fn workouts_for_user(&mut self, user_id: UserId, limit: usize) -> Result<Vec<WorkoutSession>> {
        let sql = format!(
            "SELECT {WORKOUT_COLUMNS} FROM workout_sessions
             WHERE user_id = $1
             ORDER BY start_time DESC, id DESC
             LIMIT $2"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .tx
            .query(&sql, &[&user_id, &limit])
            .with_context(|| format!("Loading workout history for user {user_id}"))?;
        rows.iter().map(workout_from_row).collect()
    }

    fn insert_workout(&mut self, w: &NewWorkout) -> Result<WorkoutId> {
        let row = self
            .tx
            .query_one(
                "INSERT INTO workout_sessions (user_id, workout_type, status, start_time, end_time)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING id",
                &[&w.user_id, &w.workout_type, &w.status.as_str(), &w.start, &w.end],
            )
            .context("Inserting workout")?;
        Ok(row.get(0))
    }

    fn set_workout_type(&mut self, id: WorkoutId, workout_type: &str) -> Result<()> {
        self.tx
            .execute(
                "UPDATE workout_sessions SET workout_type = $2 WHERE id = $1",
                &[&id, &workout_type],
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
                 SET status = 'completed', end_time = $2,
                     avg_heart_rate = $3, max_heart_rate = $4, min_heart_rate = $5
                 WHERE id = $1 AND status = 'active'",
                &[&id, &end, &summary.avg, &summary.max, &summary.min],
            )
            .context("Completing workout")?;
        Ok(n == 1)
    }

    fn claim_for_analysis(&mut self, id: WorkoutId) -> Result<bool> {
        // Row lock serializes concurrent claims; the loser re-checks the
        // predicate after the winner commits and updates nothing.
        let n = self
            .tx
            .execute(
                "UPDATE workout_sessions SET status = $2 WHERE id = $1 AND status = $3",
                &[
                    &id,
                    &WorkoutStatus::Analyzing.as_str(),
                    &WorkoutStatus::Completed.as_str(),
                ],
            )
            .context("Claiming workout for analysis")?;
        Ok(n == 1)
    }

    fn release_analysis(&mut self, id: WorkoutId) -> Result<bool> {
        let n = self
            .tx
            .execute(
                "UPDATE workout_sessions SET status = $2 WHERE id = $1 AND status = $3",
                &[
                    &id,
                    &WorkoutStatus::Completed.as_str(),
                    &WorkoutStatus::Analyzing.as_str(),
                ],
            )
            .context("Releasing workout analysis claim")?;
        Ok(n == 1)
    }

    fn finish_analysis(&mut self, id: WorkoutId, at: DateTime<Utc>) -> Result<()> {
        self.tx
            .execute(
                "UPDATE workout_sessions SET status = $2, analyzed_at = $3 WHERE id = $1",
                &[&id, &WorkoutStatus::Analyzed.as_str(), &at],
            )
            .context("Marking workout analyzed")?;
        Ok(())
    }

    fn heart_rate_samples(&mut self, workout_id: WorkoutId) -> Result<Vec<HeartRateSample>> {
        let rows = self
            .tx
            .query(
                "SELECT ts, bpm FROM heart_rate_data WHERE workout_id = $1 ORDER BY ts, id",
                &[&workout_id],
            )
            .context("Loading heart rate samples")?;

        rows.iter()
            .map(|row| -> Result<HeartRateSample> {
                Ok(HeartRateSample {
                    timestamp: row.try_get(0)?,
                    bpm: row.try_get(1)?,
                })
            })
            .collect()
    }

    fn insert_heart_rate(&mut self, workout_id: WorkoutId, sample: &HeartRateSample) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO heart_rate_data (workout_id, ts, bpm) VALUES ($1, $2, $3)",
                &[&workout_id, &sample.timestamp, &sample.bpm],
            )
            .context("Inserting heart rate sample")?;
        Ok(())
    }

    fn song(&mut self, id: SongId) -> Result<Option<Song>> {
        let row = self
            .tx
            .query_opt(
                "SELECT id, spotify_id, title, artist FROM songs WHERE id = $1",
                &[&id],
            )
            .with_context(|| format!("Loading song {id}"))?;
        row.map(|row| -> Result<Song> {
            Ok(Song {
                id: row.try_get(0)?,
                spotify_id: row.try_get(1)?,
                title: row.try_get(2)?,
                artist: row.try_get(3)?,
            })
        })
        .transpose()
    }

    fn find_or_create_song(&mut self, song: &NewSong) -> Result<SongId> {
        // The no-op update makes RETURNING yield the existing id on conflict.
        let row = self
            .tx
            .query_one(
                "INSERT INTO songs (spotify_id, title, artist) VALUES ($1, $2, $3)
                 ON CONFLICT (spotify_id) DO UPDATE SET spotify_id = EXCLUDED.spotify_id
                 RETURNING id",
                &[&song.spotify_id, &song.title, &song.artist],
            )
            .context("Upserting song")?;
        Ok(row.get(0))
    }

    fn song_plays(&mut self, workout_id: WorkoutId) -> Result<Vec<SongPlay>> {
        let sql =
            format!("SELECT {SONG_PLAY_COLUMNS} FROM song_plays WHERE workout_id = $1 ORDER BY id");
        let rows = self
            .tx
            .query(&sql, &[&workout_id])
            .context("Loading song plays")?;
        rows.iter().map(song_play_from_row).collect()
    }

    fn song_play(&mut self, id: SongPlayId) -> Result<Option<SongPlay>> {
        let sql = format!("SELECT {SONG_PLAY_COLUMNS} FROM song_plays WHERE id = $1");
        self.tx
            .query_opt(&sql, &[&id])
            .with_context(|| format!("Loading song play {id}"))?
            .as_ref()
            .map(song_play_from_row)
            .transpose()
    }

    fn insert_song_play(
        &mut self,
        workout_id: WorkoutId,
        song_id: SongId,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<SongPlayId> {
        let row = self
            .tx
            .query_one(
                "INSERT INTO song_plays (workout_id, song_id, start_time, end_time)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id",
                &[&workout_id, &song_id, &start, &end],
            )
            .context("Inserting song play")?;
        Ok(row.get(0))
    }

    fn save_song_play(&mut self, play: &SongPlay) -> Result<()> {
        let a = play.analysis.as_ref();
        let position = a.map(|a| a.position.as_str());
        self.tx
            .execute(
                "UPDATE song_plays
                 SET end_time = $2, avg_bpm = $3, max_bpm = $4, min_bpm = $5, bpm_change = $6,
                     position = $7, hype_score = $8, cooldown_score = $9
                 WHERE id = $1",
                &[
                    &play.id,
                    &play.end,
                    &a.map(|a| a.avg_bpm),
                    &a.map(|a| a.max_bpm),
                    &a.map(|a| a.min_bpm),
                    &a.map(|a| a.bpm_change),
                    &position,
                    &a.map(|a| a.hype_score),
                    &a.map(|a| a.cooldown_score),
                ],
            )
            .with_context(|| format!("Saving song play {}", play.id))?;
        Ok(())
    }
}

impl SongStatStore for PgTx<'_> {
    fn user_song_stat(
        &mut self,
        user_id: UserId,
        song_id: SongId,
    ) -> Result<Option<UserSongStat>> {
        let sql = format!(
            "SELECT {STAT_COLUMNS} FROM user_song_stats WHERE user_id = $1 AND song_id = $2"
        );
        self.tx
            .query_opt(&sql, &[&user_id, &song_id])
            .context("Loading user song stat")?
            .as_ref()
            .map(stat_from_row)
            .transpose()
    }

    fn lock_user_song_stat(
        &mut self,
        user_id: UserId,
        song_id: SongId,
    ) -> Result<Option<UserSongStat>> {
        // FOR UPDATE needs a row even on the first play; a fresh row is all
        // zeros, same as a missing one.
        self.tx
            .execute(
                "INSERT INTO user_song_stats (user_id, song_id) VALUES ($1, $2)
                 ON CONFLICT (user_id, song_id) DO NOTHING",
                &[&user_id, &song_id],
            )
            .context("Reserving user song stat")?;

        let sql = format!(
            "SELECT {STAT_COLUMNS} FROM user_song_stats
             WHERE user_id = $1 AND song_id = $2
             FOR UPDATE"
        );
        self.tx
            .query_opt(&sql, &[&user_id, &song_id])
            .context("Locking user song stat")?
            .as_ref()
            .map(stat_from_row)
            .transpose()
    }

    fn save_user_song_stat(&mut self, s: &UserSongStat) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO user_song_stats (
                   user_id, song_id, times_played, avg_bpm_response,
                   personal_hype_score, personal_cooldown_score, last_played_at
                 )
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (user_id, song_id) DO UPDATE SET
                   times_played = EXCLUDED.times_played,
                   avg_bpm_response = EXCLUDED.avg_bpm_response,
                   personal_hype_score = EXCLUDED.personal_hype_score,
                   personal_cooldown_score = EXCLUDED.personal_cooldown_score,
                   last_played_at = EXCLUDED.last_played_at",
                &[
                    &s.user_id,
                    &s.song_id,
                    &s.times_played,
                    &s.avg_bpm_response,
                    &s.personal_hype_score,
                    &s.personal_cooldown_score,
                    &s.last_played_at,
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
             WHERE user_id = $1 AND {column} > 0
             ORDER BY {column} DESC, song_id
             LIMIT $2"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .tx
            .query(&sql, &[&user_id, &limit])
            .context("Loading top user song stats")?;
        rows.iter().map(stat_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintenance_url_keeps_host_and_query() {
        let (db, admin) =
            maintenance_url("postgres://127.0.0.1:5432/songpulse?sslmode=disable").unwrap();
        assert_eq!(db, "songpulse");
        assert_eq!(admin, "postgres://127.0.0.1:5432/postgres?sslmode=disable");
    }

    #[test]
    fn maintenance_url_requires_a_db_name() {
        assert!(maintenance_url("postgres://127.0.0.1:5432/").is_err());
    }
}
