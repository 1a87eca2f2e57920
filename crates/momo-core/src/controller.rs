// ── Controller ──
//
// Wires the pieces into one object an app holds for the lifetime of a
// signed-in session: the sync client, the store, the offline cache, and
// the REST synchronizer. Push events on the user queues flow straight
// into the reconciler.

use std::sync::{Arc, Mutex, PoisonError};

use momo_api::{RestClient, TransportConfig};
use secrecy::SecretString;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::cache::OfflineCache;
use crate::client::SyncClient;
use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::model::{
    ChatMessage, ChatRoom, InboundEvent, RecordId, RequestItem, RequestStatus, Topic,
};
use crate::reconcile::Reconciler;
use crate::registry::SubscriptionHandle;
use crate::session::{Connector, SessionEvent, SessionState};
use crate::store::{DataStore, ReplaceOutcome};
use crate::sync::Synchronizer;

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: SyncConfig,
    client: SyncClient,
    store: Arc<DataStore>,
    reconciler: Reconciler,
    synchronizer: tokio::sync::Mutex<Option<Synchronizer>>,
    user_topics: Mutex<Vec<SubscriptionHandle>>,
}

impl Controller {
    /// Build a controller speaking STOMP to `config.server_url`. Does not
    /// connect; call [`start`](Self::start).
    pub fn new(config: SyncConfig) -> Result<Self, CoreError> {
        let client = SyncClient::from_config(&config)?;
        Ok(Self::with_client(config, client))
    }

    /// Build a controller on top of a custom link connector.
    pub fn with_connector(config: SyncConfig, connector: Arc<dyn Connector>) -> Self {
        let client = SyncClient::new(connector, config.reconnect.clone());
        Self::with_client(config, client)
    }

    fn with_client(config: SyncConfig, client: SyncClient) -> Self {
        let store = Arc::new(DataStore::with_journal_capacity(config.journal_capacity));
        let cache = match config.effective_cache_dir() {
            Some(dir) => OfflineCache::with_dir(dir),
            None => OfflineCache::in_memory(),
        };
        let reconciler = Reconciler::new(Arc::clone(&store), cache);

        Self {
            inner: Arc::new(ControllerInner {
                config,
                client,
                store,
                reconciler,
                synchronizer: tokio::sync::Mutex::new(None),
                user_topics: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    pub fn client(&self) -> &SyncClient {
        &self.inner.client
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.inner.reconciler
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Authenticate REST with `credential`, subscribe the user queues and
    /// start the push session. Returns once the session driver is running;
    /// follow with [`refresh_all`](Self::refresh_all) for the first load.
    pub async fn start(&self, credential: SecretString) -> Result<(), CoreError> {
        let config = &self.inner.config;
        let transport = TransportConfig {
            tls: config.tls.clone(),
            timeout: config.request_timeout,
        };
        let rest = RestClient::with_token(&config.server_url, &credential, &transport)?;
        let synchronizer = Synchronizer::new(
            rest,
            self.inner.reconciler.clone(),
            config.user.clone(),
        );
        *self.inner.synchronizer.lock().await = Some(synchronizer);

        self.subscribe_user_topics();
        self.inner.client.connect(credential);
        info!(server = %config.server_url, "sync session started");
        Ok(())
    }

    /// Log out: stop the session, drop the REST client, flush the offline
    /// cache and empty the store. Subscribers see empty snapshots; the
    /// cache keeps this user's data for their next start.
    pub async fn shutdown(&self) {
        let handles: Vec<SubscriptionHandle> = self
            .inner
            .user_topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in &handles {
            self.inner.client.unsubscribe(handle);
        }
        self.inner.client.disconnect();
        *self.inner.synchronizer.lock().await = None;
        self.inner.reconciler.cache().flush().await;
        self.inner.store.clear();
        debug!("sync session shut down");
    }

    /// Register listeners for the user's message, request and assignment
    /// queues that merge every event into the store. Idempotent.
    pub fn subscribe_user_topics(&self) {
        let mut handles = self
            .inner
            .user_topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !handles.is_empty() {
            return;
        }
        for topic in [Topic::Messages, Topic::Requests, Topic::Assignments] {
            let reconciler = self.inner.reconciler.clone();
            let handle = self
                .inner
                .client
                .subscribe_topic(&topic, move |event: &InboundEvent| {
                    reconciler.apply_event(event);
                });
            handles.push(handle);
        }
    }

    // ── REST loads ───────────────────────────────────────────────────

    /// Load rooms, requests and assignments, plus the history of every chat
    /// opened so far. Every load runs even if one fails; the first error is
    /// returned.
    pub async fn refresh_all(&self) -> Result<(), CoreError> {
        let sync = self.synchronizer().await?;

        let rooms = sync.load_rooms();
        let user_scoped = async {
            if sync.user().is_none() {
                return Ok(());
            }
            let (requests, assignments) =
                tokio::join!(sync.load_requests(), sync.load_assignments());
            requests.and(assignments).map(|_| ())
        };
        let (rooms, user_scoped) = tokio::join!(rooms, user_scoped);

        let mut result = rooms.map(|_| ()).and(user_scoped);
        for chat_id in self.inner.store.chat_ids() {
            if let Err(e) = sync.load_messages(&chat_id).await {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    pub async fn load_messages(&self, chat_id: &RecordId) -> Result<ReplaceOutcome, CoreError> {
        self.synchronizer().await?.load_messages(chat_id).await
    }

    pub async fn search_unassigned(&self, query: &str) -> Result<ReplaceOutcome, CoreError> {
        self.synchronizer().await?.search_unassigned(query).await
    }

    pub async fn send_message(
        &self,
        chat_id: &RecordId,
        text: &str,
    ) -> Result<ChatMessage, CoreError> {
        self.synchronizer().await?.send_message(chat_id, text).await
    }

    pub async fn create_direct_chat(
        &self,
        manager_id: &RecordId,
        employee_id: &RecordId,
    ) -> Result<ChatRoom, CoreError> {
        self.synchronizer()
            .await?
            .create_direct_chat(manager_id, employee_id)
            .await
    }

    pub async fn create_request(
        &self,
        employee_id: &RecordId,
        message: Option<&str>,
    ) -> Result<RequestItem, CoreError> {
        self.synchronizer()
            .await?
            .create_request(employee_id, message)
            .await
    }

    pub async fn update_request_status(
        &self,
        request_id: &RecordId,
        status: RequestStatus,
    ) -> Result<RequestItem, CoreError> {
        self.synchronizer()
            .await?
            .update_request_status(request_id, status)
            .await
    }

    // ── State observation ────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.inner.client.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.client.watch_state()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.client.events()
    }

    async fn synchronizer(&self) -> Result<Synchronizer, CoreError> {
        self.inner
            .synchronizer
            .lock()
            .await
            .clone()
            .ok_or_else(|| CoreError::Config {
                message: "controller not started".into(),
            })
    }
}
