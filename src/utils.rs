use crate::types::HeartRateSample;
use chrono::{DateTime, Duration, Utc};
use tracing_subscriber::{EnvFilter, fmt};

#[macro_export]
macro_rules! dlog {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*);
    };
}

/// Initialize colorful logging.
///
/// Default level is INFO.
/// - `-v` => DEBUG
/// - `-vv` => TRACE
/// - `-q` => WARN
/// - `-qq` => ERROR
///
/// `RUST_LOG` overrides everything (e.g. `RUST_LOG=trace`).
pub fn init_logging(verbose: u8, quiet: u8) {
    let net = i16::from(verbose) - i16::from(quiet);
    let level = match net {
        i16::MIN..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        2..=i16::MAX => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,songpulse={level}")));

    let show_src = matches!(level, "debug" | "trace");

    fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_target(true)
        .with_level(true)
        .with_file(show_src)
        .with_line_number(show_src)
        .compact()
        .init();
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds().unsigned_abs();
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

/// Seconds as a float, millisecond precision.
#[allow(clippy::cast_precision_loss)]
pub fn seconds_f64(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

#[allow(clippy::cast_possible_truncation)]
pub fn duration_from_secs_f64(secs: f64) -> Duration {
    Duration::milliseconds((secs * 1000.0).round() as i64)
}

/// Arithmetic mean of the samples' bpm, `None` when empty.
#[allow(clippy::cast_precision_loss)]
pub fn mean_bpm(samples: &[HeartRateSample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sum: i64 = samples.iter().map(|s| i64::from(s.bpm)).sum();
    Some(sum as f64 / samples.len() as f64)
}

/// Round to `places` decimals, ties to even (130.5 -> 130, 0.25 -> 0.2).
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round_ties_even() / factor
}

pub fn parse_rfc3339(s: &str) -> anyhow::Result<DateTime<Utc>> {
    let t = DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow::anyhow!("invalid RFC 3339 timestamp {s:?}: {e}"))?;
    Ok(t.with_timezone(&Utc))
}
