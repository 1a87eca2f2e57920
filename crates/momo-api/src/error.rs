use thiserror::Error;

/// Top-level error type for the `momo-api` crate.
///
/// Covers every failure mode of the wire layer: the WebSocket upgrade,
/// the STOMP handshake and framing, and the REST collaborator calls.
/// `momo-core` maps these into coarse connectivity status and user-facing
/// errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The server rejected the bearer credential (STOMP ERROR on CONNECT,
    /// HTTP 401/403 on REST or on the upgrade request).
    #[error("Authentication rejected: {message}")]
    AuthRejected { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Operation timed out.
    #[error("Timed out after {timeout_ms}ms waiting for {operation}")]
    Timeout { operation: &'static str, timeout_ms: u64 },

    /// TLS or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── WebSocket / STOMP ───────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the server.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// A frame could not be parsed.
    #[error("Malformed STOMP frame: {0}")]
    Frame(String),

    // ── REST ────────────────────────────────────────────────────────
    /// Non-success response from a REST endpoint.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the server refused the credential.
    pub fn is_auth_rejected(&self) -> bool {
        match self {
            Self::AuthRejected { .. } => true,
            Self::Api { status, .. } => matches!(status, 401 | 403),
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } => {
                true
            }
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
