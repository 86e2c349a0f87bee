//! Tracing/logging initialization.
//!
//! Logs always go to stderr: stdout of a worker process carries the progress
//! line that the supervisor parses.

use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log format (`json` or `text`).
pub const LOG_FORMAT_ENV: &str = "CONDUIT_LOG_FORMAT";

/// How chatty the process should be, as requested on the command line.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    /// `-v` given this many times (at least once).
    Verbose(u8),
}

impl Verbosity {
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Verbosity::Quiet,
            (false, 0) => Verbosity::Normal,
            (false, n) => Verbosity::Verbose(n),
        }
    }

    /// Default filter directive when `RUST_LOG` is not set.
    pub fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose(1) => "info",
            Verbosity::Verbose(2) => "debug",
            Verbosity::Verbose(_) => "trace",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var(LOG_FORMAT_ENV) {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Initialize tracing/logging for the process.
///
/// `RUST_LOG` wins over `verbosity`. Safe to call multiple times (subsequent
/// calls are no-ops).
pub fn init(verbosity: Verbosity, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = match format {
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_flags_to_levels() {
        assert_eq!(Verbosity::from_flags(true, 3).directive(), "error");
        assert_eq!(Verbosity::from_flags(false, 0).directive(), "warn");
        assert_eq!(Verbosity::from_flags(false, 1).directive(), "info");
        assert_eq!(Verbosity::from_flags(false, 2).directive(), "debug");
        assert_eq!(Verbosity::from_flags(false, 5).directive(), "trace");
    }

    #[test]
    fn init_twice_is_harmless() {
        init(Verbosity::Quiet, LogFormat::Text);
        init(Verbosity::Verbose(2), LogFormat::Json);
    }
}
