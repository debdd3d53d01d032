use crate::types::{
    HeartRateSample, HeartRateSummary, NewSong, NewWorkout, ScoreKind, Song, SongId, SongPlay,
    SongPlayId, UserId, UserSongStat, WorkoutId, WorkoutSession,
};
use anyhow::Result;
use chrono::{DateTime, Utc};

pub trait WorkoutStore {
    /// Returns Ok(None) if the workout does not exist.
    fn workout(&mut self, id: WorkoutId) -> Result<Option<WorkoutSession>>;

    /// Returns the user's workout in `active` state, if any.
    fn active_workout(&mut self, user_id: UserId) -> Result<Option<WorkoutSession>>;

    /// The user's workouts, newest start first.
    fn workouts_for_user(&mut self, user_id: UserId, limit: usize) -> Result<Vec<WorkoutSession>>;

    fn insert_workout(&mut self, workout: &NewWorkout) -> Result<WorkoutId>;

    fn set_workout_type(&mut self, id: WorkoutId, workout_type: &str) -> Result<()>;

    /// Moves an `active` workout to `completed`. Returns false if it was not active.
    fn complete_workout(
        &mut self,
        id: WorkoutId,
        end: DateTime<Utc>,
        summary: HeartRateSummary,
    ) -> Result<bool>;

    /// Conditional `completed -> analyzing`. Returns false if the workout was
    /// not `completed` at the time of the update, meaning another caller
    /// owns (or already finished) the analysis.
    fn claim_for_analysis(&mut self, id: WorkoutId) -> Result<bool>;

    /// Conditional `analyzing -> completed`. Returns false if the workout was
    /// not `analyzing`.
    fn release_analysis(&mut self, id: WorkoutId) -> Result<bool>;

    /// `analyzing -> analyzed`, stamping `analyzed_at`.
    fn finish_analysis(&mut self, id: WorkoutId, at: DateTime<Utc>) -> Result<()>;

    /// Ordered by timestamp.
    fn heart_rate_samples(&mut self, workout_id: WorkoutId) -> Result<Vec<HeartRateSample>>;

    fn insert_heart_rate(&mut self, workout_id: WorkoutId, sample: &HeartRateSample) -> Result<()>;

    fn song(&mut self, id: SongId) -> Result<Option<Song>>;

    /// Looks the song up by its Spotify id, creating it if unknown.
    /// Existing metadata is left untouched.
    fn find_or_create_song(&mut self, song: &NewSong) -> Result<SongId>;

    /// In storage (insertion) order.
    fn song_plays(&mut self, workout_id: WorkoutId) -> Result<Vec<SongPlay>>;

    fn song_play(&mut self, id: SongPlayId) -> Result<Option<SongPlay>>;

    fn insert_song_play(
        &mut self,
        workout_id: WorkoutId,
        song_id: SongId,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<SongPlayId>;

    /// Persists the play's end time and analysis fields.
    fn save_song_play(&mut self, play: &SongPlay) -> Result<()>;
}

pub trait SongStatStore {
    /// Returns Ok(None) if the user has no stat for this song yet.
    fn user_song_stat(&mut self, user_id: UserId, song_id: SongId)
    -> Result<Option<UserSongStat>>;

    /// Read for a read-modify-write: the row stays locked until the unit of
    /// work ends. On PostgreSQL this inserts an all-zero row first when none
    /// exists (so there is something to lock) and returns it; that row is
    /// only visible to others if the unit of work commits.
    fn lock_user_song_stat(
        &mut self,
        user_id: UserId,
        song_id: SongId,
    ) -> Result<Option<UserSongStat>>;

    /// Inserts or overwrites the `(user_id, song_id)` row.
    fn save_user_song_stat(&mut self, stat: &UserSongStat) -> Result<()>;

    /// Stats with a positive score of `kind`, highest first.
    fn top_user_song_stats(
        &mut self,
        user_id: UserId,
        kind: ScoreKind,
        limit: usize,
    ) -> Result<Vec<UserSongStat>>;
}

/// Every store call happens inside a unit of work from [`Database::begin`].
/// Dropping it without [`UnitOfWork::commit`] rolls it back.
pub trait UnitOfWork: WorkoutStore + SongStatStore {
    fn commit(self) -> Result<()>;
}

pub trait Database {
    type Tx<'a>: UnitOfWork
    where
        Self: 'a;

    fn begin(&mut self) -> Result<Self::Tx<'_>>;
}
