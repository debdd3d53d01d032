use crate::types::{SongPlayId, WorkoutId, WorkoutStatus};
use thiserror::Error;

/// Why a workout could not be analyzed.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("workout {0} not found")]
    NotFound(WorkoutId),

    #[error("workout {workout_id} must be completed before analysis (status: {status})")]
    NotCompleted {
        workout_id: WorkoutId,
        status: WorkoutStatus,
    },

    #[error("workout {0} is completed but has no end time")]
    MissingEndTime(WorkoutId),

    #[error("workout {workout_id} has no analysis to release (status: {status})")]
    NotAnalyzing {
        workout_id: WorkoutId,
        status: WorkoutStatus,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl AnalysisError {
    /// True for caller-side precondition failures (as opposed to storage faults).
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotCompleted { .. } | Self::MissingEndTime(_) | Self::NotAnalyzing { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("workout {0} not found")]
    NotFound(WorkoutId),

    #[error("song play {0} not found")]
    SongPlayNotFound(SongPlayId),

    #[error("workout {workout_id} is not active (status: {status})")]
    NotActive {
        workout_id: WorkoutId,
        status: WorkoutStatus,
    },

    #[error("user already has an active workout ({0})")]
    AlreadyActive(WorkoutId),

    #[error("bpm must be positive, got {0}")]
    InvalidBpm(i32),

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("invalid workout type {0:?}")]
    InvalidWorkoutType(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type AnalyzeResult<T> = Result<T, AnalysisError>;
pub type SessionResult<T> = Result<T, SessionError>;
