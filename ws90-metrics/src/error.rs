//! Error types for publishing.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors a subscriber can report for a single reading.
///
/// These are contained by the broadcaster: they are logged and never stop
/// delivery to other subscribers or later readings.
#[derive(Debug, Error)]
pub enum PublishError {
    /// A field the publisher needs is absent or unusable.
    #[error("reading has no usable `{0}` field")]
    MissingField(&'static str),

    /// A field is present but could not be interpreted.
    #[error("invalid `{field}` field: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// The publisher's queue is full and the reading was dropped.
    #[error("publisher queue is full, dropping reading")]
    QueueFull,

    /// The publisher's background worker is gone.
    #[error("publisher worker has shut down")]
    Closed,
}

/// Errors raised while registering metric families.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A family with the same exposed name already exists.
    #[error("metric `{0}` is already registered")]
    Duplicate(String),
}

/// Errors raised by the metrics HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen socket could not be bound.
    #[error("failed to bind metrics server on {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Socket-level I/O failure.
    #[error("metrics server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
