use crate::config::{DB_ENV, DEFAULT_DB};
use crate::session::DEFAULT_HISTORY_LIMIT;
use crate::stats::DEFAULT_TOP_LIMIT;
use crate::types::ScoreKind;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "songpulse",
    about = "Match workout heart-rate response to the songs that were playing"
)]
pub struct Cli {
    /// Database: a SQLite file path, `:memory:`, or a postgres:// URL.
    #[arg(long, global = true, env = DB_ENV, default_value = DEFAULT_DB)]
    pub db: String,

    /// Increase log verbosity (-v, -vv). Defaults to INFO.
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Decrease log verbosity (-q, -qq). Defaults to INFO.
    #[arg(short = 'q', long, action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Import a recorded workout (JSON) as a completed workout.
    Ingest {
        file: PathBuf,

        /// Analyze the workout right after importing it.
        #[arg(long)]
        analyze: bool,
    },

    /// Correlate a completed workout's songs with its heart-rate stream.
    Analyze {
        workout_id: i64,

        #[arg(long)]
        json: bool,
    },

    /// Hand a workout stuck in `analyzing` back to `completed`.
    Release { workout_id: i64 },

    /// A user's best hype or cooldown songs across all analyzed workouts.
    Top {
        #[arg(long)]
        user: i64,

        #[arg(long, value_enum, default_value_t = ScoreKind::Hype)]
        kind: ScoreKind,

        #[arg(long, default_value_t = DEFAULT_TOP_LIMIT)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Start a workout for a user.
    Start {
        #[arg(long)]
        user: i64,

        #[arg(long)]
        workout_type: Option<String>,
    },

    /// Switch an active workout to another type (e.g. Running -> HIIT).
    Transition {
        workout_id: i64,
        workout_type: String,
    },

    /// Show the user's workout in progress, if any.
    Active {
        #[arg(long)]
        user: i64,

        #[arg(long)]
        json: bool,
    },

    /// A user's latest workouts, newest first.
    History {
        #[arg(long)]
        user: i64,

        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// A workout with its heart-rate samples and song plays.
    Show {
        workout_id: i64,

        #[arg(long)]
        json: bool,
    },

    /// Log a heart-rate reading on an active workout.
    Hr {
        workout_id: i64,
        bpm: i32,

        /// RFC 3339 timestamp; defaults to now.
        #[arg(long)]
        at: Option<String>,
    },

    /// Log that a song started playing on an active workout.
    Song {
        workout_id: i64,

        #[arg(long)]
        spotify_id: String,

        #[arg(long, default_value = "Unknown")]
        title: String,

        #[arg(long, default_value = "Unknown")]
        artist: String,

        #[arg(long)]
        at: Option<String>,
    },

    /// Mark a song play as stopped.
    StopSong {
        play_id: i64,

        #[arg(long)]
        at: Option<String>,
    },

    /// End an active workout; it becomes ready for analysis.
    End {
        workout_id: i64,

        #[arg(long)]
        at: Option<String>,
    },
}
