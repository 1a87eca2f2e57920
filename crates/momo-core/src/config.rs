// ── Runtime sync configuration ──
//
// These types describe how to reach the backend and how hard to retry.
// They never touch disk: momo-config (or an embedding app) builds a
// `SyncConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use momo_api::{RecordId, TlsMode, UserRole};
use url::Url;

/// Who the signed-in user is; selects the REST collections to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: RecordId,
    pub role: UserRole,
}

/// Delay schedule between reconnection attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    /// Same delay before every attempt.
    Fixed(Duration),
    /// `initial * 2^attempt`, capped at `max`, with ±25% deterministic jitter.
    Exponential { initial: Duration, max: Duration },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential { initial, max } => {
                let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
                let base = initial.as_secs_f64() * 2.0_f64.powi(exponent);
                let capped = base.min(max.as_secs_f64());

                // Deterministic "jitter" seeded from the attempt number.
                let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
                Duration::from_secs_f64((capped * jitter_factor).max(0.0))
            }
        }
    }
}

/// Reconnection policy for the session driver.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub backoff: BackoffPolicy,

    /// Consecutive failed attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,

    /// Keep retrying after the server rejected the credential.
    /// Off by default: the same token will be rejected again.
    pub retry_on_auth_failure: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_retries: None,
            retry_on_auth_failure: false,
        }
    }
}

/// Everything the sync core needs to talk to one backend.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backend base URL, e.g. `http://10.0.2.2:8080`.
    pub server_url: Url,
    /// Signed-in user, required for user-scoped REST loads.
    pub user: Option<UserContext>,
    pub tls: TlsMode,
    /// REST request timeout.
    pub request_timeout: Duration,
    /// Upper bound for WebSocket upgrade plus STOMP `CONNECTED`.
    pub connect_timeout: Duration,
    /// STOMP heart-beat offer `(outgoing_ms, incoming_ms)`.
    pub heart_beat: (u64, u64),
    pub reconnect: ReconnectConfig,
    /// Directory for the offline cache; `None` keeps it in memory.
    pub cache_dir: Option<PathBuf>,
    /// Merges remembered per collection for fenced full loads.
    pub journal_capacity: usize,
}

impl SyncConfig {
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            user: None,
            tls: TlsMode::System,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            heart_beat: (10_000, 10_000),
            reconnect: ReconnectConfig::default(),
            cache_dir: None,
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
        }
    }

    /// Offline cache directory for this session.
    ///
    /// With a signed-in user the cache lives in a per-user subdirectory, so
    /// one account never seeds another's collections.
    pub fn effective_cache_dir(&self) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        Some(match &self.user {
            Some(user) => dir.join(format!(
                "user-{}",
                crate::cache::encode_key(&user.user_id.to_string())
            )),
            None => dir.clone(),
        })
    }
}

pub const DEFAULT_JOURNAL_CAPACITY: usize = 512;
