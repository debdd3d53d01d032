use crate::pg_store::PgDb;
use crate::sqlite_store::SqliteDb;
use anyhow::Result;
use std::path::PathBuf;

pub const DEFAULT_DB: &str = "songpulse.sqlite";
pub const DB_ENV: &str = "SONGPULSE_DB";

/// Where workouts and stats live, chosen from the `--db` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbTarget {
    Postgres(String),
    Sqlite(PathBuf),
    SqliteMemory,
}

impl DbTarget {
    pub fn parse(value: &str) -> Self {
        if value.starts_with("postgres://") || value.starts_with("postgresql://") {
            Self::Postgres(value.to_string())
        } else if value == ":memory:" {
            Self::SqliteMemory
        } else {
            Self::Sqlite(PathBuf::from(value))
        }
    }
}

/// An opened backend. Callers match on it and run generic code against the
/// concrete [`crate::store::Database`].
pub enum Backend {
    Postgres(PgDb),
    Sqlite(SqliteDb),
}

impl Backend {
    pub fn open(target: &DbTarget) -> Result<Self> {
        Ok(match target {
            DbTarget::Postgres(url) => Self::Postgres(PgDb::connect(url)?),
            DbTarget::Sqlite(path) => Self::Sqlite(SqliteDb::open(path)?),
            DbTarget::SqliteMemory => Self::Sqlite(SqliteDb::open_in_memory()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_backend_from_scheme() {
        assert_eq!(
            DbTarget::parse("postgres://127.0.0.1:5432/songpulse"),
            DbTarget::Postgres("postgres://127.0.0.1:5432/songpulse".into())
        );
        assert!(matches!(
            DbTarget::parse("postgresql://db/songpulse"),
            DbTarget::Postgres(_)
        ));
        assert_eq!(
            DbTarget::parse("data/songpulse.sqlite"),
            DbTarget::Sqlite(PathBuf::from("data/songpulse.sqlite"))
        );
        assert_eq!(DbTarget::parse(":memory:"), DbTarget::SqliteMemory);
    }
}
