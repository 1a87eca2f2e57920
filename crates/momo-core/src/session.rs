// ── Session lifecycle types ──
//
// The observable surface of a sync session, and the seam between the
// reconnect driver and whatever opens the underlying link.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use momo_api::{Link, StompConnector};
use secrecy::SecretString;

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No credential, no link, no retries. Only `connect` leaves this state.
    #[default]
    Idle,
    Connecting,
    Connected,
    /// A live link dropped; a retry is scheduled.
    Disconnected,
    /// The last attempt failed. A retry may still be scheduled unless the
    /// retry budget is spent.
    Failed,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Lifecycle notifications, broadcast to every `events()` receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected { reason: String },
    Error { message: String },
}

/// Point-in-time summary of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub state: SessionState,
    pub has_credential: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// Opens one authenticated link per call. Never retries.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, credential: SecretString) -> BoxFuture<'static, Result<Link, momo_api::Error>>;
}

impl Connector for StompConnector {
    fn open(&self, credential: SecretString) -> BoxFuture<'static, Result<Link, momo_api::Error>> {
        let connector = self.clone();
        Box::pin(async move { connector.connect(&credential).await })
    }
}
