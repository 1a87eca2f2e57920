// ── Store reconciler ──
//
// The only writer of the DataStore. Every accepted change is followed by
// a cache save of the collection's new snapshot, tagged with the
// collection's sequence number so the cache can never move backwards.

use std::sync::Arc;

use crate::cache::OfflineCache;
use crate::error::CoreError;
use crate::model::{CollectionKey, InboundEvent, Payload, Record};
use crate::store::{
    Commit, DataStore, LoadTicket, MergeOutcome, RecordCollection, ReplaceOutcome,
};

/// Merges pushed and fetched records into the store and the offline cache.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<DataStore>,
    cache: OfflineCache,
}

impl Reconciler {
    pub fn new(store: Arc<DataStore>, cache: OfflineCache) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    pub fn cache(&self) -> &OfflineCache {
        &self.cache
    }

    // ── Record-level ─────────────────────────────────────────────────

    /// Insert `record`, or replace the record with the same id in place.
    pub fn merge_record<T: Record>(
        &self,
        key: &CollectionKey,
        record: T,
    ) -> Result<MergeOutcome, CoreError> {
        let collection = self.collection::<T>(key)?;
        let (outcome, commit) = collection.merge(record);
        self.persist(key, &commit);
        Ok(outcome)
    }

    // ── Collection-level ─────────────────────────────────────────────

    /// Replace the collection wholesale, without fencing.
    ///
    /// Forgets every merge made so far; meant for resets, not for REST
    /// loads that may race push events.
    pub fn replace_collection<T: Record>(
        &self,
        key: &CollectionKey,
        records: Vec<T>,
    ) -> Result<(), CoreError> {
        let collection = self.collection::<T>(key)?;
        let commit = collection.replace(records);
        self.persist(key, &commit);
        Ok(())
    }

    /// Ticket to take before fetching a full snapshot of `key`.
    pub fn load_ticket<T: Record>(&self, key: &CollectionKey) -> Result<LoadTicket, CoreError> {
        Ok(self.collection::<T>(key)?.ticket())
    }

    /// Apply a full snapshot fetched after `ticket` was taken.
    ///
    /// A snapshot older than one already applied is discarded as
    /// [`ReplaceOutcome::Stale`]. Otherwise it replaces the collection and
    /// merges accepted since the ticket are layered back on top.
    pub fn replace_collection_fenced<T: Record>(
        &self,
        key: &CollectionKey,
        records: Vec<T>,
        ticket: LoadTicket,
    ) -> Result<ReplaceOutcome, CoreError> {
        let collection = self.collection::<T>(key)?;
        let count = records.len();
        let (outcome, commit) = collection.replace_fenced(records, ticket);
        match (&outcome, commit) {
            (ReplaceOutcome::Applied { reapplied }, Some(commit)) => {
                tracing::debug!(
                    collection = %key,
                    records = count,
                    reapplied,
                    "full load applied"
                );
                self.persist(key, &commit);
                self.store.mark_full_load();
            }
            _ => {
                tracing::debug!(
                    collection = %key,
                    ticket = ticket.seq(),
                    "discarding stale full load"
                );
            }
        }
        Ok(outcome)
    }

    /// Seed an untouched collection from the offline cache.
    ///
    /// Does nothing once the collection has seen any merge or load, and
    /// does not write back to the cache. Returns the number of records
    /// seeded.
    pub fn seed_from_cache<T: Record>(&self, key: &CollectionKey) -> Result<usize, CoreError> {
        let collection = self.collection::<T>(key)?;
        if collection.is_populated() {
            return Ok(0);
        }
        let cached: Vec<T> = self.cache.load(&key.cache_key());
        if cached.is_empty() {
            return Ok(0);
        }
        let count = cached.len();
        if collection.seed(cached).is_none() {
            return Ok(0);
        }
        tracing::debug!(collection = %key, records = count, "seeded from offline cache");
        Ok(count)
    }

    // ── Push path ────────────────────────────────────────────────────

    /// Merge a decoded push event into its collection.
    ///
    /// Never fails: custom payloads are ignored and anything unexpected is
    /// logged. Returns what happened, if anything.
    pub fn apply_event(&self, event: &InboundEvent) -> Option<MergeOutcome> {
        let result = match &event.payload {
            Payload::Message(message) => self.merge_record(
                &CollectionKey::Messages(message.chat_id.clone()),
                message.clone(),
            ),
            Payload::Request(request) => {
                self.merge_record(&CollectionKey::Requests, request.clone())
            }
            Payload::Assignment(assignment) => {
                self.merge_record(&CollectionKey::Assignments, assignment.clone())
            }
            Payload::Raw(_) => {
                tracing::trace!(
                    destination = %event.destination,
                    "no collection for custom payload"
                );
                return None;
            }
        };

        match result {
            Ok(outcome) => {
                self.store.mark_push_event();
                tracing::trace!(
                    destination = %event.destination,
                    kind = event.kind.as_deref().unwrap_or_default(),
                    ?outcome,
                    "push event merged"
                );
                Some(outcome)
            }
            Err(e) => {
                tracing::warn!(destination = %event.destination, error = %e, "push event not merged");
                None
            }
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn collection<T: Record>(
        &self,
        key: &CollectionKey,
    ) -> Result<Arc<RecordCollection<T>>, CoreError> {
        T::collection(&self.store, key).ok_or_else(|| CoreError::CollectionMismatch {
            collection: key.to_string(),
            record: T::NAME,
        })
    }

    fn persist<T: Record>(&self, key: &CollectionKey, commit: &Commit<T>) {
        self.cache
            .save_versioned(&key.cache_key(), commit.seq, commit.snapshot.as_slice());
    }
}
