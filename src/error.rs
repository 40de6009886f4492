//! Failure taxonomy shared by sources, the monitor and the publisher.
//!
//! Operations return `anyhow::Result`; the variants here ride inside the
//! `anyhow::Error` so callers that care can tell a timeout from an I/O failure
//! with `downcast_ref::<MonitorError>()`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Caller programming error, e.g. pulling frames before `start()`.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Session establishment or broker connection did not complete in time.
    #[error("{operation} timed out after {}", format_timeout(.after))]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// A recorded source could not be opened.
    #[error("cannot open '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration; fatal at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The live session failed for a reason other than a timeout.
    #[error("session failed: {0}")]
    Session(String),
}

impl MonitorError {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// True when `err` carries a [`MonitorError::Timeout`].
    pub fn is_timeout(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<MonitorError>(),
            Some(MonitorError::Timeout { .. })
        )
    }

    /// True when `err` carries a [`MonitorError::IllegalState`].
    pub fn is_illegal_state(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<MonitorError>(),
            Some(MonitorError::IllegalState(_))
        )
    }
}

fn format_timeout(after: &Duration) -> String {
    if after.as_secs() >= 1 && after.subsec_millis() == 0 {
        format!("{} seconds", after.as_secs())
    } else {
        format!("{} ms", after.as_millis())
    }
}
