// ── Core error types ──
//
// User-facing errors from momo-core. Consumers never see STOMP frames or
// HTTP bodies directly; the `From<momo_api::Error>` impl translates
// wire-layer failures into these variants. Nothing on the push path
// returns a `CoreError` to subscribers: it becomes a log line or a
// session state transition instead.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Undecodable payload on {destination}: {message}")]
    Decode {
        destination: String,
        message: String,
    },

    #[error("Collection {collection} does not hold {record} records")]
    CollectionMismatch {
        collection: String,
        record: &'static str,
    },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Local resources ──────────────────────────────────────────────
    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Returns `true` if the server refused the credential.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<momo_api::Error> for CoreError {
    fn from(err: momo_api::Error) -> Self {
        match err {
            momo_api::Error::AuthRejected { message } => CoreError::AuthenticationFailed { message },
            momo_api::Error::Api { status, message } if matches!(status, 401 | 403) => {
                CoreError::AuthenticationFailed { message }
            }
            momo_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_ms: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            momo_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            momo_api::Error::Timeout { timeout_ms, .. } => CoreError::Timeout { timeout_ms },
            momo_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            momo_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            momo_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("closed with code {code}: {reason}"),
            },
            momo_api::Error::Frame(message) => CoreError::Decode {
                destination: String::new(),
                message,
            },
            momo_api::Error::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            momo_api::Error::Deserialization { message, .. } => CoreError::Api {
                message: format!("unexpected response shape: {message}"),
                status: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejection_maps_to_authentication_failed() {
        let err: CoreError = momo_api::Error::AuthRejected {
            message: "bad token".into(),
        }
        .into();
        assert!(err.is_auth_failure());
        assert_eq!(err.to_string(), "Authentication failed: bad token");
    }

    #[test]
    fn forbidden_status_is_auth_failure() {
        let err: CoreError = momo_api::Error::Api {
            status: 403,
            message: "nope".into(),
        }
        .into();
        assert!(err.is_auth_failure());
    }

    #[test]
    fn other_status_keeps_code() {
        let err: CoreError = momo_api::Error::Api {
            status: 500,
            message: "boom".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Api { status: Some(500), .. }));
    }
}
