//! Error types for appmirror-core

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Main error type for the appmirror-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Bad credentials or expired session
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// An expected local artifact is missing
    #[error("not found locally: {}", .0.display())]
    NotFoundLocally(PathBuf),

    /// Network failure or 5xx response
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote has no entity with the requested id
    #[error("not found on remote: {0}")]
    RemoteNotFound(String),

    /// Any other non-success response from the remote
    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// Remote drift detected before a push
    #[error(
        "remote changed since last sync for {} (recorded {}, remote {})",
        .path.display(),
        fmt_watermark(.recorded),
        fmt_watermark(.remote)
    )]
    Conflict {
        path: PathBuf,
        recorded: Option<DateTime<Utc>>,
        remote: Option<DateTime<Utc>>,
    },

    /// The remote accepted an import but did not apply it
    #[error("import {import_id} did not complete: {reason}")]
    ImportFailed { import_id: String, reason: String },

    /// Operation not supported for this entity type
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A sanitized name is already taken by an unrelated entity
    #[error("name '{name}' is already used by {}", .existing.display())]
    NameConflict { name: String, existing: PathBuf },

    /// A record file exists but cannot be decoded
    #[error("malformed record at {}: {message}", .path.display())]
    MalformedRecord { path: PathBuf, message: String },

    /// Secret encryption/decryption error
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a batch operation may log this error and move on to the next item.
    ///
    /// Authentication and configuration problems abort the current scope;
    /// everything tied to a single entity or a flaky network is recoverable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::Authentication(_) | Error::Config(_) | Error::Crypto(_)
        )
    }

    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RemoteUnavailable(_))
    }
}

fn fmt_watermark(ts: &Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "none".to_string())
}

/// Result type alias for appmirror-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(!Error::Authentication("bad password".into()).is_recoverable());
        assert!(Error::RemoteUnavailable("timeout".into()).is_recoverable());
        assert!(Error::RemoteNotFound("app-1".into()).is_recoverable());
        assert!(Error::RemoteUnavailable("503".into()).is_transient());
        assert!(!Error::Remote {
            status: 400,
            message: "bad".into()
        }
        .is_transient());
    }

    #[test]
    fn test_conflict_message_mentions_watermarks() {
        let err = Error::Conflict {
            path: PathBuf::from("studio/flow"),
            recorded: None,
            remote: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("studio/flow"));
        assert!(msg.contains("none"));
    }
}
