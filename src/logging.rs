//! Log subscriber setup for the relay binaries.
//!
//! Output goes to stderr so the diagnostic CLI can keep stdout for its
//! summary. `RUST_LOG` overrides the verbosity chosen on the command line.

use tracing_subscriber::{fmt, EnvFilter};

/// Verbosity selected by `-v` flags or `--quiet`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// 0 = info, 1 = debug, 2+ = trace; `quiet` wins and keeps only errors.
    pub fn from_flags(verbosity: u8, quiet: bool) -> Self {
        if quiet {
            return Self::Error;
        }
        match verbosity {
            0 => Self::Info,
            1 => Self::Debug,
            _ => Self::Trace,
        }
    }

    fn directive(self) -> String {
        let level = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        format!("campus_relay={level},tower_http={level},warn")
    }
}

/// Installs the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}
