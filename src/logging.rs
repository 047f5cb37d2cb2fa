//! Logging setup.
//!
//! Components only emit `tracing` events; [`init`] is called once from the
//! binary and decides where they go.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Errors raised while parsing logging options or installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Unknown `--log` value.
    #[error("unknown log target {0:?} (expected stderr or systemd)")]
    Target(String),

    /// Unknown `--log-level` value.
    #[error("unknown log level {0:?} (expected debug, info, warning or error)")]
    Level(String),

    /// The journald socket is unavailable.
    #[error("failed to connect to journald: {0}")]
    Journald(#[source] std::io::Error),

    /// A global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Where log events are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogTarget {
    /// Human-readable lines on stderr.
    #[default]
    Stderr,
    /// The systemd journal.
    Systemd,
}

impl FromStr for LogTarget {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stderr" => Ok(Self::Stderr),
            "systemd" | "journald" => Ok(Self::Systemd),
            _ => Err(LoggingError::Target(s.to_string())),
        }
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stderr => "stderr",
            Self::Systemd => "systemd",
        })
    }
}

/// Minimum severity that is logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug and above.
    Debug,
    /// Info and above.
    #[default]
    Info,
    /// Warnings and errors.
    Warning,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// The matching `tracing` level.
    pub fn as_level(self) -> Level {
        match self {
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(LoggingError::Level(s.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, overrides `level`.
pub fn init(target: LogTarget, level: LogLevel) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.as_level().into()));

    match target {
        LogTarget::Stderr => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string())),
        LogTarget::Systemd => {
            let journald = tracing_journald::layer().map_err(LoggingError::Journald)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(journald)
                .try_init()
                .map_err(|e| LoggingError::Init(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_targets() {
        assert_eq!("stderr".parse::<LogTarget>().unwrap(), LogTarget::Stderr);
        assert_eq!("systemd".parse::<LogTarget>().unwrap(), LogTarget::Systemd);
        assert_eq!("SystemD".parse::<LogTarget>().unwrap(), LogTarget::Systemd);
        assert!(matches!(
            "syslog".parse::<LogTarget>(),
            Err(LoggingError::Target(t)) if t == "syslog"
        ));
    }

    #[test]
    fn parses_levels() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("trace".parse::<LogLevel>().is_err());
    }

    #[test]
    fn level_maps_to_tracing() {
        assert_eq!(LogLevel::Warning.as_level(), Level::WARN);
        assert_eq!(LogLevel::default().as_level(), Level::INFO);
    }

    #[test]
    fn display_parses_back() {
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warning, LogLevel::Error] {
            assert_eq!(level.to_string().parse::<LogLevel>().unwrap(), level);
        }
        for target in [LogTarget::Stderr, LogTarget::Systemd] {
            assert_eq!(target.to_string().parse::<LogTarget>().unwrap(), target);
        }
    }
}
