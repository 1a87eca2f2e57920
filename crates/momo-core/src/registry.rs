// ── Subscription registry ──
//
// Maps opaque handles to (destination, listener, live reference).
// Membership is independent of the session: entries are added and removed
// whenever the caller likes, and only the live reference follows the
// connection. The registry itself never talks to the network; attaching
// takes a frame sink so the session decides where SUBSCRIBE frames go.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use momo_api::Frame;
use tokio::sync::mpsc;

use crate::model::InboundEvent;

// ── Handles and listeners ────────────────────────────────────────────

/// Opaque reference returned by `subscribe`, valid until `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(String);

impl SubscriptionHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receives decoded events for one subscription.
///
/// Called on the session's read task, so implementations should hand off
/// anything slow. A panic is caught and logged; it never stops delivery
/// to other listeners or of later frames.
pub trait Listener: Send + Sync + 'static {
    fn on_event(&self, event: &InboundEvent);
}

impl<F> Listener for F
where
    F: Fn(&InboundEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &InboundEvent) {
        self(event);
    }
}

/// Listener that forwards every event into an unbounded channel, for
/// consumers that prefer pulling.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<InboundEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Listener for ChannelListener {
    fn on_event(&self, event: &InboundEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::trace!(
                destination = %event.destination,
                "Channel listener receiver dropped"
            );
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────

struct Entry {
    destination: String,
    listener: Arc<dyn Listener>,
    /// STOMP subscription id while attached to the current link.
    live: Option<String>,
}

/// A listener selected for one inbound frame.
#[derive(Clone)]
pub(crate) struct Target {
    pub handle: SubscriptionHandle,
    pub live_ref: String,
    pub destination: String,
    pub listener: Arc<dyn Listener>,
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: IndexMap<SubscriptionHandle, Entry>,
    next_handle: u64,
    /// Never reset, so a late frame for a dead subscription id can never
    /// match a newer attachment.
    next_ref: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, destination: &str, listener: Arc<dyn Listener>) -> SubscriptionHandle {
        let handle = SubscriptionHandle(format!("h-{}", self.next_handle));
        self.next_handle += 1;
        self.entries.insert(
            handle.clone(),
            Entry {
                destination: destination.to_owned(),
                listener,
                live: None,
            },
        );
        handle
    }

    /// Remove an entry. Returns `Some(live_ref)` when it was attached, so
    /// the caller can send UNSUBSCRIBE; `None` if it was unknown or idle.
    pub fn remove(&mut self, handle: &SubscriptionHandle) -> Option<String> {
        self.entries.shift_remove(handle).and_then(|entry| entry.live)
    }

    pub fn contains(&self, handle: &SubscriptionHandle) -> bool {
        self.entries.contains_key(handle)
    }

    /// Attach every entry lacking a live reference, in subscription order.
    /// `send` returns `false` if the frame could not be queued, leaving
    /// that entry detached.
    pub fn attach_all(&mut self, mut send: impl FnMut(Frame) -> bool) -> usize {
        let mut attached = 0;
        let handles: Vec<SubscriptionHandle> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.live.is_none())
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in handles {
            if self.attach_one(&handle, &mut send) {
                attached += 1;
            }
        }
        attached
    }

    /// Attach a single entry if it exists and is not yet live.
    pub fn attach_one(
        &mut self,
        handle: &SubscriptionHandle,
        mut send: impl FnMut(Frame) -> bool,
    ) -> bool {
        let live_ref = format!("sub-{}", self.next_ref);
        let Some(entry) = self.entries.get_mut(handle) else {
            return false;
        };
        if entry.live.is_some() {
            return false;
        }
        if !send(Frame::subscribe(&live_ref, &entry.destination)) {
            return false;
        }
        tracing::debug!(
            handle = %handle,
            subscription = %live_ref,
            destination = %entry.destination,
            "Subscription attached"
        );
        entry.live = Some(live_ref);
        self.next_ref += 1;
        true
    }

    /// Drop every live reference. Entries stay registered.
    pub fn detach_all(&mut self) -> usize {
        self.entries
            .values_mut()
            .filter_map(|entry| entry.live.take())
            .count()
    }

    /// Live references, for sending UNSUBSCRIBE before a clean close.
    pub fn live_refs(&self) -> Vec<String> {
        self.entries
            .values()
            .filter_map(|entry| entry.live.clone())
            .collect()
    }

    /// Listeners an inbound `MESSAGE` is addressed to.
    ///
    /// The `subscription` header picks exactly one entry. Frames without
    /// it fall back to every live entry on the frame's destination.
    pub fn route(&self, frame: &Frame) -> Vec<Target> {
        if let Some(sub_id) = frame.header("subscription") {
            return self
                .entries
                .iter()
                .filter(|(_, entry)| entry.live.as_deref() == Some(sub_id))
                .map(|(handle, entry)| target(handle, entry, sub_id))
                .collect();
        }
        let Some(destination) = frame.header("destination") else {
            return Vec::new();
        };
        self.entries
            .iter()
            .filter(|(_, entry)| entry.destination == destination)
            .filter_map(|(handle, entry)| {
                entry
                    .live
                    .as_deref()
                    .map(|live_ref| target(handle, entry, live_ref))
            })
            .collect()
    }

    /// Whether `handle` is still attached under `live_ref`.
    pub fn is_attached_as(&self, handle: &SubscriptionHandle, live_ref: &str) -> bool {
        self.live_ref(handle) == Some(live_ref)
    }

    pub fn live_ref(&self, handle: &SubscriptionHandle) -> Option<&str> {
        self.entries.get(handle).and_then(|entry| entry.live.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn live_count(&self) -> usize {
        self.entries.values().filter(|e| e.live.is_some()).count()
    }
}

fn target(handle: &SubscriptionHandle, entry: &Entry, live_ref: &str) -> Target {
    Target {
        handle: handle.clone(),
        live_ref: live_ref.to_owned(),
        destination: entry.destination.clone(),
        listener: Arc::clone(&entry.listener),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use momo_api::Command;

    use super::*;
    use crate::model::REQUESTS_DESTINATION;

    fn noop() -> Arc<dyn Listener> {
        Arc::new(|_: &InboundEvent| {})
    }

    fn message(destination: &str, subscription: Option<&str>) -> Frame {
        let frame = Frame::new(Command::Message).with_header("destination", destination);
        match subscription {
            Some(id) => frame.with_header("subscription", id),
            None => frame,
        }
    }

    #[test]
    fn handles_are_unique() {
        let mut registry = Registry::new();
        let a = registry.insert(REQUESTS_DESTINATION, noop());
        let b = registry.insert(REQUESTS_DESTINATION, noop());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn attach_all_sends_one_subscribe_per_idle_entry() {
        let mut registry = Registry::new();
        let a = registry.insert("/user/queue/a", noop());
        registry.insert("/user/queue/b", noop());

        let mut sent = Vec::new();
        assert_eq!(registry.attach_all(|f| {
            sent.push(f);
            true
        }), 2);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].command, Command::Subscribe);
        assert_eq!(sent[0].header("destination"), Some("/user/queue/a"));
        assert_eq!(registry.live_ref(&a), sent[0].header("id"));

        // Already live entries are skipped.
        assert_eq!(registry.attach_all(|_| true), 0);
    }

    #[test]
    fn failed_send_leaves_entry_detached() {
        let mut registry = Registry::new();
        let a = registry.insert("/user/queue/a", noop());
        assert_eq!(registry.attach_all(|_| false), 0);
        assert!(registry.live_ref(&a).is_none());
    }

    #[test]
    fn detach_keeps_membership_and_new_refs_differ() {
        let mut registry = Registry::new();
        let a = registry.insert("/user/queue/a", noop());
        registry.attach_all(|_| true);
        let first = registry.live_ref(&a).unwrap().to_owned();

        assert_eq!(registry.detach_all(), 1);
        assert!(registry.contains(&a));
        assert_eq!(registry.live_count(), 0);

        registry.attach_all(|_| true);
        assert_ne!(registry.live_ref(&a).unwrap(), first);
    }

    #[test]
    fn remove_reports_live_ref_once() {
        let mut registry = Registry::new();
        let a = registry.insert("/user/queue/a", noop());
        registry.attach_all(|_| true);
        assert!(registry.remove(&a).is_some());
        assert!(registry.remove(&a).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn route_prefers_subscription_header() {
        let mut registry = Registry::new();
        let a = registry.insert(REQUESTS_DESTINATION, noop());
        let b = registry.insert(REQUESTS_DESTINATION, noop());
        registry.attach_all(|_| true);
        let b_ref = registry.live_ref(&b).unwrap().to_owned();

        let targets = registry.route(&message(REQUESTS_DESTINATION, Some(&b_ref)));
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].handle, b);

        let targets = registry.route(&message(REQUESTS_DESTINATION, None));
        let handles: Vec<_> = targets.iter().map(|t| t.handle.clone()).collect();
        assert_eq!(handles, vec![a, b]);
    }

    #[test]
    fn detached_entries_receive_nothing() {
        let mut registry = Registry::new();
        registry.insert(REQUESTS_DESTINATION, noop());
        assert!(registry.route(&message(REQUESTS_DESTINATION, None)).is_empty());
        assert!(registry.route(&message(REQUESTS_DESTINATION, Some("sub-0"))).is_empty());
    }
}
