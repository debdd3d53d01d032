use crate::store::{Database, SongStatStore};
use crate::types::{ScoreKind, SongId, SongPlayAnalysis, UserId, UserSongStat};
use anyhow::Result;
use chrono::{DateTime, Utc};

pub const DEFAULT_TOP_LIMIT: usize = 20;

impl UserSongStat {
    pub const fn new(user_id: UserId, song_id: SongId) -> Self {
        Self {
            user_id,
            song_id,
            times_played: 0,
            avg_bpm_response: 0.0,
            personal_hype_score: 0.0,
            personal_cooldown_score: 0.0,
            last_played_at: None,
        }
    }

    /// Folds one more play into the running means.
    #[allow(clippy::cast_precision_loss)]
    pub fn fold(&mut self, analysis: &SongPlayAnalysis, at: DateTime<Utc>) {
        let n = self.times_played as f64;
        let online = |old: f64, sample: f64| (old * n + sample) / (n + 1.0);

        self.avg_bpm_response = online(self.avg_bpm_response, f64::from(analysis.avg_bpm));
        self.personal_hype_score = online(self.personal_hype_score, analysis.hype_score);
        self.personal_cooldown_score =
            online(self.personal_cooldown_score, analysis.cooldown_score);

        self.times_played += 1;
        self.last_played_at = Some(at);
    }
}

/// Loads (or lazily creates) the stat for `(user_id, song_id)`, folds the
/// analysis in and writes it back through `store`.
pub fn record_play<S: SongStatStore + ?Sized>(
    store: &mut S,
    user_id: UserId,
    song_id: SongId,
    analysis: &SongPlayAnalysis,
    at: DateTime<Utc>,
) -> Result<UserSongStat> {
    let mut stat = store
        .lock_user_song_stat(user_id, song_id)?
        .unwrap_or_else(|| UserSongStat::new(user_id, song_id));
    stat.fold(analysis, at);
    store.save_user_song_stat(&stat)?;
    Ok(stat)
}

/// A user's best songs of `kind` across all analyzed workouts.
pub fn top_songs<D: Database>(
    db: &mut D,
    user_id: UserId,
    kind: ScoreKind,
    limit: usize,
) -> Result<Vec<UserSongStat>> {
    let mut tx = db.begin()?;
    tx.top_user_song_stats(user_id, kind, limit)
}
