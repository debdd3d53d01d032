use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type WorkoutId = i64;
pub type UserId = i64;
pub type SongId = i64;
pub type SongPlayId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkoutStatus {
    Active,
    Completed,
    /// Claimed by a running analysis; no other analysis may start.
    Analyzing,
    Analyzed,
}

impl WorkoutStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Analyzing => "analyzing",
            Self::Analyzed => "analyzed",
        }
    }
}

impl fmt::Display for WorkoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkoutStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "active" => Self::Active,
            "completed" => Self::Completed,
            "analyzing" => Self::Analyzing,
            "analyzed" => Self::Analyzed,
            other => bail!("unknown workout status: {other:?}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkoutSession {
    pub id: WorkoutId,
    pub user_id: UserId,
    pub workout_type: Option<String>,
    pub status: WorkoutStatus,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub analyzed_at: Option<DateTime<Utc>>,

    pub avg_heart_rate: Option<i32>,
    pub max_heart_rate: Option<i32>,
    pub min_heart_rate: Option<i32>,
}

impl WorkoutSession {
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end - self.start)
    }
}

/// A workout with everything recorded during it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutDetails {
    pub workout: WorkoutSession,
    /// Ordered by timestamp.
    pub heart_rate_data: Vec<HeartRateSample>,
    /// Ordered by start time.
    pub song_plays: Vec<SongPlay>,
}

/// Fields needed to create a workout row.
#[derive(Debug, Clone)]
pub struct NewWorkout {
    pub user_id: UserId,
    pub workout_type: Option<String>,
    pub status: WorkoutStatus,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

/// Integer mean, max and min over a workout's samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartRateSummary {
    pub avg: Option<i32>,
    pub max: Option<i32>,
    pub min: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub timestamp: DateTime<Utc>,
    pub bpm: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Warmup,
    Peak,
    Cooldown,
}

impl Position {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Peak => "peak",
            Self::Cooldown => "cooldown",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "warmup" => Self::Warmup,
            "peak" => Self::Peak,
            "cooldown" => Self::Cooldown,
            other => bail!("unknown song position: {other:?}"),
        })
    }
}

/// Heart-rate effect of one song play.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SongPlayAnalysis {
    pub avg_bpm: i32,
    pub max_bpm: i32,
    pub min_bpm: i32,
    pub bpm_change: f64,
    pub position: Position,
    pub hype_score: f64,
    pub cooldown_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongPlay {
    pub id: SongPlayId,
    pub workout_id: WorkoutId,
    pub song_id: SongId,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub analysis: Option<SongPlayAnalysis>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Song {
    pub id: SongId,
    pub spotify_id: Option<String>,
    pub title: String,
    pub artist: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewSong {
    pub spotify_id: String,
    pub title: String,
    pub artist: String,
}

/// Running per-user response to one song, averaged over every analyzed play.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSongStat {
    pub user_id: UserId,
    pub song_id: SongId,
    pub times_played: i64,
    pub avg_bpm_response: f64,
    pub personal_hype_score: f64,
    pub personal_cooldown_score: f64,
    pub last_played_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    Hype,
    Cooldown,
}

impl ScoreKind {
    pub const fn of_analysis(self, a: &SongPlayAnalysis) -> f64 {
        match self {
            Self::Hype => a.hype_score,
            Self::Cooldown => a.cooldown_score,
        }
    }

    pub const fn of_stat(self, s: &UserSongStat) -> f64 {
        match self {
            Self::Hype => s.personal_hype_score,
            Self::Cooldown => s.personal_cooldown_score,
        }
    }
}

/// An analyzed play joined with its song metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzedPlay {
    pub song_play_id: SongPlayId,
    pub song: Option<Song>,
    #[serde(flatten)]
    pub analysis: SongPlayAnalysis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub workout_id: WorkoutId,
    pub baseline_bpm: Option<f64>,
    pub songs_analyzed: usize,
    pub top_hype_songs: Vec<AnalyzedPlay>,
    pub top_cooldown_songs: Vec<AnalyzedPlay>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyReason {
    NoSongPlays,
    NoHeartRateData,
}

impl fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoSongPlays => "no songs tracked during this workout",
            Self::NoHeartRateData => "no heart rate data available for analysis",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnalyzeOutcome {
    Analyzed(AnalysisResult),
    NothingToAnalyze { reason: EmptyReason },
}
