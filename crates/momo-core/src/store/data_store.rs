// ── Central reactive data store ──
//
// In-memory, authoritative state for every synced collection. Mutations
// go through the `Reconciler`; this type only exposes reads and
// subscriptions to consumers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;

use super::collection::{RecordCollection, Snapshot};
use crate::config::DEFAULT_JOURNAL_CAPACITY;
use crate::model::{
    ChatMessage, ChatRoom, CollectionKey, Employee, InsertPolicy, RecordId, RequestItem,
    TaskAssignment,
};
use crate::stream::{AssignmentFilter, EntityStream, RequestFilter, select};

/// Central reactive store for all synced collections.
///
/// Chat histories are created on first use, one per chat id. Every
/// collection broadcasts its snapshots via `watch` channels.
pub struct DataStore {
    journal_capacity: usize,
    rooms: Arc<RecordCollection<ChatRoom>>,
    messages: DashMap<RecordId, Arc<RecordCollection<ChatMessage>>>,
    requests: Arc<RecordCollection<RequestItem>>,
    assignments: Arc<RecordCollection<TaskAssignment>>,
    unassigned: Arc<RecordCollection<Employee>>,
    pub(crate) last_full_load: watch::Sender<Option<DateTime<Utc>>>,
    pub(crate) last_push_event: watch::Sender<Option<DateTime<Utc>>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::with_journal_capacity(DEFAULT_JOURNAL_CAPACITY)
    }

    pub fn with_journal_capacity(journal_capacity: usize) -> Self {
        let (last_full_load, _) = watch::channel(None);
        let (last_push_event, _) = watch::channel(None);

        Self {
            journal_capacity,
            rooms: Arc::new(RecordCollection::new(
                CollectionKey::Rooms.policy(),
                journal_capacity,
            )),
            messages: DashMap::new(),
            requests: Arc::new(RecordCollection::new(
                CollectionKey::Requests.policy(),
                journal_capacity,
            )),
            assignments: Arc::new(RecordCollection::new(
                CollectionKey::Assignments.policy(),
                journal_capacity,
            )),
            unassigned: Arc::new(RecordCollection::new(
                CollectionKey::Unassigned.policy(),
                journal_capacity,
            )),
            last_full_load,
            last_push_event,
        }
    }

    // ── Collections ──────────────────────────────────────────────────

    pub fn rooms(&self) -> Arc<RecordCollection<ChatRoom>> {
        Arc::clone(&self.rooms)
    }

    /// History of one chat, created empty on first access.
    pub fn messages(&self, chat_id: &RecordId) -> Arc<RecordCollection<ChatMessage>> {
        if let Some(existing) = self.messages.get(chat_id) {
            return Arc::clone(existing.value());
        }
        let entry = self.messages.entry(chat_id.clone()).or_insert_with(|| {
            Arc::new(RecordCollection::new(
                InsertPolicy::Append,
                self.journal_capacity,
            ))
        });
        Arc::clone(entry.value())
    }

    pub fn requests(&self) -> Arc<RecordCollection<RequestItem>> {
        Arc::clone(&self.requests)
    }

    pub fn assignments(&self) -> Arc<RecordCollection<TaskAssignment>> {
        Arc::clone(&self.assignments)
    }

    pub fn unassigned(&self) -> Arc<RecordCollection<Employee>> {
        Arc::clone(&self.unassigned)
    }

    /// Chats that have a history collection.
    pub fn chat_ids(&self) -> Vec<RecordId> {
        self.messages.iter().map(|r| r.key().clone()).collect()
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn rooms_snapshot(&self) -> Snapshot<ChatRoom> {
        self.rooms.snapshot()
    }

    pub fn messages_snapshot(&self, chat_id: &RecordId) -> Snapshot<ChatMessage> {
        self.messages
            .get(chat_id)
            .map_or_else(|| Arc::new(Vec::new()), |col| col.snapshot())
    }

    pub fn requests_snapshot(&self) -> Snapshot<RequestItem> {
        self.requests.snapshot()
    }

    pub fn assignments_snapshot(&self) -> Snapshot<TaskAssignment> {
        self.assignments.snapshot()
    }

    pub fn unassigned_snapshot(&self) -> Snapshot<Employee> {
        self.unassigned.snapshot()
    }

    /// Current requests accepted by `filter`, newest first.
    pub fn requests_matching(&self, filter: &RequestFilter) -> Vec<Arc<RequestItem>> {
        select(&self.requests.snapshot(), filter)
    }

    /// Current assignments accepted by `filter`, newest first.
    pub fn assignments_matching(&self, filter: &AssignmentFilter) -> Vec<Arc<TaskAssignment>> {
        select(&self.assignments.snapshot(), filter)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_rooms(&self) -> EntityStream<ChatRoom> {
        EntityStream::new(self.rooms.subscribe())
    }

    pub fn subscribe_messages(&self, chat_id: &RecordId) -> EntityStream<ChatMessage> {
        EntityStream::new(self.messages(chat_id).subscribe())
    }

    pub fn subscribe_requests(&self) -> EntityStream<RequestItem> {
        EntityStream::new(self.requests.subscribe())
    }

    pub fn subscribe_assignments(&self) -> EntityStream<TaskAssignment> {
        EntityStream::new(self.assignments.subscribe())
    }

    pub fn subscribe_unassigned(&self) -> EntityStream<Employee> {
        EntityStream::new(self.unassigned.subscribe())
    }

    // ── Metadata ─────────────────────────────────────────────────────

    pub fn last_full_load(&self) -> Option<DateTime<Utc>> {
        *self.last_full_load.borrow()
    }

    pub fn last_push_event(&self) -> Option<DateTime<Utc>> {
        *self.last_push_event.borrow()
    }

    pub(crate) fn mark_full_load(&self) {
        self.last_full_load.send_replace(Some(Utc::now()));
    }

    pub(crate) fn mark_push_event(&self) {
        self.last_push_event.send_replace(Some(Utc::now()));
    }

    /// Forget everything (e.g. on logout). Subscribers see empty snapshots.
    pub fn clear(&self) {
        self.rooms.clear();
        for entry in &self.messages {
            entry.value().clear();
        }
        self.requests.clear();
        self.assignments.clear();
        self.unassigned.clear();
        self.last_full_load.send_replace(None);
        self.last_push_event.send_replace(None);
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}
