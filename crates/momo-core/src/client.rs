// ── Sync client ──
//
// One authenticated STOMP session plus the subscription registry that
// outlives it. A background driver task owns the link: it connects,
// re-attaches every registered subscription, pumps frames into the
// dispatcher and, when the link drops, backs off and tries again.
//
// All mutable session state sits behind one mutex that is never held
// across an `.await` or while a listener runs. Every driver carries the
// epoch it was started with; `connect`/`disconnect` bump the epoch, so a
// superseded driver can finish its current step but never touch state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use momo_api::{Frame, Link, LinkEvent, StompConfig, StompConnector};
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ReconnectConfig, SyncConfig};
use crate::dispatch;
use crate::error::CoreError;
use crate::model::{InboundEvent, Topic};
use crate::registry::{ChannelListener, Listener, Registry, SubscriptionHandle};
use crate::session::{Connector, SessionEvent, SessionInfo, SessionState};

const EVENT_CHANNEL_SIZE: usize = 64;

// ── SyncClient ───────────────────────────────────────────────────────

/// Handle to one sync session.
///
/// Cheaply cloneable; all clones share the same link and registry.
/// Subscribing works in every state: entries registered while offline are
/// attached as soon as a connection is up, and stay registered across
/// drops until [`unsubscribe`](Self::unsubscribe).
///
/// [`connect`](Self::connect) spawns the driver task and therefore must be
/// called from within a Tokio runtime.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    reconnect: ReconnectConfig,
    core: Mutex<Core>,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

struct Core {
    state: SessionState,
    credential: Option<SecretString>,
    last_connected_at: Option<DateTime<Utc>>,
    /// Sender half of the current link, present only while `Connected`.
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    registry: Registry,
    epoch: u64,
    cancel: Option<CancellationToken>,
}

impl SyncClient {
    pub fn new(connector: Arc<dyn Connector>, reconnect: ReconnectConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(Inner {
                connector,
                reconnect,
                core: Mutex::new(Core {
                    state: SessionState::Idle,
                    credential: None,
                    last_connected_at: None,
                    outbound: None,
                    registry: Registry::new(),
                    epoch: 0,
                    cancel: None,
                }),
                state_tx,
                events,
            }),
        }
    }

    /// Build a client speaking STOMP to `<server_url>/ws`.
    pub fn from_config(config: &SyncConfig) -> Result<Self, CoreError> {
        let mut stomp = StompConfig::for_server(&config.server_url)?;
        stomp.heart_beat = config.heart_beat;
        stomp.connect_timeout = config.connect_timeout;
        Ok(Self::new(
            Arc::new(StompConnector::new(stomp)),
            config.reconnect.clone(),
        ))
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Start connecting with `credential`.
    ///
    /// No-op while `Connecting` or `Connected`. From `Disconnected` or
    /// `Failed` the pending retry is replaced by an immediate attempt
    /// with the new credential.
    pub fn connect(&self, credential: SecretString) {
        let mut core = self.inner.lock();
        if matches!(
            core.state,
            SessionState::Connecting | SessionState::Connected
        ) {
            debug!(state = ?core.state, "connect ignored, session already active");
            return;
        }

        if let Some(previous) = core.cancel.take() {
            previous.cancel();
        }
        core.epoch += 1;
        let epoch = core.epoch;
        let cancel = CancellationToken::new();
        core.cancel = Some(cancel.clone());
        core.credential = Some(credential.clone());
        self.inner.set_state(&mut core, SessionState::Connecting);
        drop(core);

        debug!(epoch, "starting session driver");
        tokio::spawn(drive(Arc::clone(&self.inner), epoch, credential, cancel));
    }

    /// Tear the session down and return to `Idle`.
    ///
    /// Stops retries, unsubscribes and sends `DISCONNECT` on a live link,
    /// and forgets the credential. Registered subscriptions are kept and
    /// will attach again on the next `connect`. Safe in any state.
    pub fn disconnect(&self) {
        let mut core = self.inner.lock();
        if let Some(cancel) = core.cancel.take() {
            cancel.cancel();
        }
        core.epoch += 1;

        if let Some(outbound) = core.outbound.take() {
            for live_ref in core.registry.live_refs() {
                let _ = outbound.send(Frame::unsubscribe(&live_ref));
            }
            let _ = outbound.send(Frame::disconnect());
        }
        let detached = core.registry.detach_all();
        core.credential = None;

        let was = core.state;
        self.inner.set_state(&mut core, SessionState::Idle);
        if was == SessionState::Connected {
            self.inner.emit(SessionEvent::Disconnected {
                reason: "disconnect requested".into(),
            });
        }
        drop(core);
        info!(detached, "session disconnected");
    }

    /// Fire-and-forget `SEND` of `payload` as JSON.
    ///
    /// Returns `false` (and sends nothing) unless the session is
    /// `Connected`. There is no delivery acknowledgement.
    pub fn send(&self, destination: &str, payload: &impl Serialize) -> bool {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(destination, error = %e, "failed to encode outbound payload");
                return false;
            }
        };
        let core = self.inner.lock();
        if core.state != SessionState::Connected {
            debug!(destination, state = ?core.state, "send dropped, not connected");
            return false;
        }
        core.outbound
            .as_ref()
            .is_some_and(|tx| tx.send(Frame::send(destination, body)).is_ok())
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Register `listener` for `destination`. Never fails; attaches
    /// immediately if the session is connected.
    pub fn subscribe(&self, destination: &str, listener: impl Listener) -> SubscriptionHandle {
        let mut core = self.inner.lock();
        let connected = core.state == SessionState::Connected;
        let Core {
            registry, outbound, ..
        } = &mut *core;

        let handle = registry.insert(destination, Arc::new(listener));
        if connected {
            if let Some(tx) = outbound.as_ref() {
                registry.attach_one(&handle, |frame| tx.send(frame).is_ok());
            }
        }
        debug!(handle = %handle, destination, connected, "subscription registered");
        handle
    }

    pub fn subscribe_topic(&self, topic: &Topic, listener: impl Listener) -> SubscriptionHandle {
        self.subscribe(topic.destination(), listener)
    }

    /// Subscribe and receive events through a channel instead of a callback.
    pub fn subscribe_channel(
        &self,
        destination: &str,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<InboundEvent>) {
        let (listener, rx) = ChannelListener::new();
        (self.subscribe(destination, listener), rx)
    }

    /// Remove a subscription, sending `UNSUBSCRIBE` if it is live.
    ///
    /// Returns `false` if the handle was unknown (already removed).
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut core = self.inner.lock();
        if !core.registry.contains(handle) {
            return false;
        }
        if let Some(live_ref) = core.registry.remove(handle) {
            if let Some(tx) = core.outbound.as_ref() {
                let _ = tx.send(Frame::unsubscribe(&live_ref));
            }
        }
        debug!(handle = %handle, "subscription removed");
        true
    }

    // ── State observation ────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Subscribe to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn info(&self) -> SessionInfo {
        let core = self.inner.lock();
        SessionInfo {
            state: core.state,
            has_credential: core.credential.is_some(),
            last_connected_at: core.last_connected_at,
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.lock().registry.len()
    }

    /// Subscriptions currently attached to the live link.
    pub fn live_subscription_count(&self) -> usize {
        self.inner.lock().registry.live_count()
    }

    pub fn is_live(&self, handle: &SubscriptionHandle) -> bool {
        self.inner.lock().registry.live_ref(handle).is_some()
    }

    /// STOMP subscription id of `handle` on the current link.
    pub fn live_ref(&self, handle: &SubscriptionHandle) -> Option<String> {
        self.inner
            .lock()
            .registry
            .live_ref(handle)
            .map(str::to_owned)
    }
}

// ── Session bookkeeping ──────────────────────────────────────────────

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, core: &mut Core, state: SessionState) {
        core.state = state;
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Mark a (re)connect attempt. `false` if this driver is superseded.
    fn begin_attempt(&self, epoch: u64) -> bool {
        let mut core = self.lock();
        if core.epoch != epoch {
            return false;
        }
        if core.state != SessionState::Connecting {
            self.set_state(&mut core, SessionState::Connecting);
        }
        true
    }

    /// Install a fresh link and attach every registered subscription.
    fn on_connected(&self, epoch: u64, link: &Link) -> bool {
        let mut core = self.lock();
        if core.epoch != epoch {
            return false;
        }
        let tx = link.outbound.clone();
        let attached = core.registry.attach_all(|frame| tx.send(frame).is_ok());
        core.outbound = Some(tx);
        core.last_connected_at = Some(Utc::now());
        self.set_state(&mut core, SessionState::Connected);
        self.emit(SessionEvent::Connected);
        drop(core);

        info!(epoch, attached, "session connected");
        true
    }

    fn on_attempt_failed(&self, epoch: u64, error: &momo_api::Error) -> bool {
        let mut core = self.lock();
        if core.epoch != epoch {
            return false;
        }
        self.set_state(&mut core, SessionState::Failed);
        self.emit(SessionEvent::Error {
            message: error.to_string(),
        });
        drop(core);

        warn!(epoch, error = %error, "connection attempt failed");
        true
    }

    fn on_link_lost(&self, epoch: u64, reason: &str) -> bool {
        let mut core = self.lock();
        if core.epoch != epoch {
            return false;
        }
        core.outbound = None;
        let detached = core.registry.detach_all();
        self.set_state(&mut core, SessionState::Disconnected);
        self.emit(SessionEvent::Disconnected {
            reason: reason.to_owned(),
        });
        drop(core);

        warn!(epoch, detached, reason, "link lost");
        true
    }

    fn give_up(&self, epoch: u64) {
        let mut core = self.lock();
        if core.epoch != epoch {
            return;
        }
        core.cancel = None;
        self.set_state(&mut core, SessionState::Failed);
    }

    fn dispatch(&self, epoch: u64, frame: &Frame) {
        let targets = {
            let core = self.lock();
            if core.epoch != epoch || core.state != SessionState::Connected {
                return;
            }
            core.registry.route(frame)
        };
        dispatch::dispatch(frame, &targets, |target| {
            let core = self.lock();
            core.epoch == epoch && core.registry.is_attached_as(&target.handle, &target.live_ref)
        });
    }
}

// ── Driver ───────────────────────────────────────────────────────────

/// Connect → read until the link drops → back off → reconnect.
async fn drive(inner: Arc<Inner>, epoch: u64, credential: SecretString, cancel: CancellationToken) {
    let mut attempt: u32 = 0;

    loop {
        if !inner.begin_attempt(epoch) {
            break;
        }
        debug!(epoch, attempt, "opening link");

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = inner.connector.open(credential.clone()) => result,
        };

        match opened {
            Ok(link) => {
                attempt = 0;
                if !run_link(&inner, epoch, link, &cancel).await {
                    break;
                }
            }
            Err(e) => {
                if !inner.on_attempt_failed(epoch, &e) {
                    break;
                }
                if e.is_auth_rejected() && !inner.reconnect.retry_on_auth_failure {
                    warn!(epoch, "credential rejected, not retrying");
                    inner.give_up(epoch);
                    break;
                }
            }
        }

        if let Some(max) = inner.reconnect.max_retries {
            if attempt >= max {
                tracing::error!(max_retries = max, "reconnection limit reached, giving up");
                inner.give_up(epoch);
                break;
            }
        }

        let delay = inner.reconnect.backoff.delay(attempt);
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before reconnect"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }

    debug!(epoch, "session driver exiting");
}

/// Serve one link until it closes. Returns `false` when the driver should
/// stop (cancelled or superseded) rather than reconnect.
async fn run_link(inner: &Inner, epoch: u64, mut link: Link, cancel: &CancellationToken) -> bool {
    if !inner.on_connected(epoch, &link) {
        return false;
    }

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            event = link.inbound.recv() => event,
        };
        match event {
            Some(LinkEvent::Frame(frame)) => inner.dispatch(epoch, &frame),
            Some(LinkEvent::Closed(reason)) => return inner.on_link_lost(epoch, &reason),
            None => return inner.on_link_lost(epoch, "link dropped"),
        }
    }
}
