//! Error taxonomy for the remote store.
//!
//! Application plumbing uses `anyhow`; calls against the remote API return
//! [`RemoteError`] so callers can tell a retryable hiccup from a row the
//! store will never accept.

use thiserror::Error;

/// HTTP statuses worth retrying: timeout, conflict, too-early, rate limit
/// and the gateway/server family.
const TRANSIENT_STATUSES: &[u16] = &[408, 409, 425, 429, 500, 502, 503, 504];

/// Failure of a single remote call.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("{method} {url} failed: {status} {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("{method} {url} failed: {source}")]
    Transport {
        method: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Rejection produced by a non-HTTP store (the in-memory backend).
    #[error("rejected: {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    /// HTTP status of the failure, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } | RemoteError::Rejected { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Transport { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            other => other
                .status()
                .map(|s| TRANSIENT_STATUSES.contains(&s))
                .unwrap_or(false),
        }
    }

    /// Whether the store rejected the write because of the named unique
    /// constraint (e.g. `artists_source_slug_uniq`).
    pub fn is_unique_violation(&self, constraint: &str) -> bool {
        match self {
            RemoteError::Status { body, .. } => body.contains(constraint),
            RemoteError::Rejected { message, .. } => message.contains(constraint),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16, body: &str) -> RemoteError {
        RemoteError::Status {
            method: "POST".into(),
            url: "http://x/rest/v1/songs".into(),
            status: code,
            body: body.into(),
        }
    }

    #[test]
    fn test_transient_classes() {
        for code in [408, 409, 425, 429, 500, 502, 503, 504] {
            assert!(status(code, "").is_transient(), "{} should retry", code);
        }
        for code in [400, 401, 403, 404, 422] {
            assert!(!status(code, "").is_transient(), "{} should not retry", code);
        }
        assert!(!RemoteError::UnexpectedResponse("x".into()).is_transient());
    }

    #[test]
    fn test_unique_violation_matches_constraint_name() {
        let err = status(
            409,
            r#"{"code":"23505","message":"duplicate key value violates unique constraint \"songs_source_song_key_uniq\""}"#,
        );
        assert!(err.is_unique_violation("songs_source_song_key_uniq"));
        assert!(!err.is_unique_violation("artists_source_slug_uniq"));
    }

    #[test]
    fn test_display_includes_status_and_body() {
        let err = status(400, "bad row");
        assert_eq!(
            err.to_string(),
            "POST http://x/rest/v1/songs failed: 400 bad row"
        );
    }
}
