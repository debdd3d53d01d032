pub mod analyze;
pub mod baseline;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod pg_store;
pub mod scoring;
pub mod session;
pub mod sqlite_store;
pub mod stats;
pub mod store;
pub mod types;
pub mod utils;
pub mod window;

pub use analyze::{analyze, analyze_at, release_analysis};
pub use error::{AnalysisError, SessionError};
pub use stats::top_songs;
