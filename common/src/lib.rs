// Copyright 2025 Oxide Computer Company

use slog::{o, Drain, Logger};
use thiserror::Error;

/*
 * Error type shared by the driver and its support code.  Scenario and
 * builder code usually wraps these in anyhow at the binary surface.
 */
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("requested {requested} hosts but only {available} are available")]
    InsufficientHosts { requested: usize, available: usize },

    #[error("scenario {0:?} is not registered")]
    UnknownScenario(String),

    #[error("no device named {0:?} is configured")]
    UnknownDevice(String),

    #[error("invalid size {0:?}")]
    InvalidSize(String),

    #[error("invalid spawn shape: {0}")]
    InvalidShape(String),

    #[error("daemon is {0}, refusing to start another")]
    DaemonBusy(&'static str),

    #[error("daemon is not running")]
    DaemonNotRunning,

    #[error("daemon exited on its own: {0}")]
    DaemonCrashed(String),

    #[error("{program} exited with {status}")]
    CommandFailed {
        program: String,
        status: std::process::ExitStatus,
    },

    #[error("could not launch {program}: {source}")]
    LaunchFailed {
        program: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BenchError>;

/// Convert a size literal like "4k" or "16g" to a count of bytes.
///
/// An optional trailing k/m/g/t/p (either case) scales by binary
/// multiples of 1024.  No suffix means the value already is a byte
/// count.  Anything else is rejected.
pub fn bytes_from_str(text: &str) -> Result<u64> {
    let bad = || BenchError::InvalidSize(text.to_string());
    let t = text.trim();
    if t.is_empty() {
        return Err(bad());
    }

    let (digits, mult) = match t.chars().next_back() {
        Some(c) if c.is_ascii_alphabetic() => {
            let mult: u64 = match c.to_ascii_lowercase() {
                'k' => 1 << 10,
                'm' => 1 << 20,
                'g' => 1 << 30,
                't' => 1 << 40,
                'p' => 1 << 50,
                _ => return Err(bad()),
            };
            (t[..t.len() - 1].trim_end(), mult)
        }
        _ => (t, 1),
    };

    let value: u64 = digits.parse().map_err(|_| bad())?;
    value.checked_mul(mult).ok_or_else(bad)
}

/// Build the root logger used by every component.  Components receive
/// it by argument, there is no global logging state.
pub fn build_logger(quiet: bool) -> Logger {
    let level = if quiet {
        slog::Level::Warning
    } else {
        slog::Level::Info
    };
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator)
        .build()
        .filter_level(level)
        .fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}
