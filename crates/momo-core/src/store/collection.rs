// ── Ordered reactive record collection ──
//
// One collection per `CollectionKey`. Records are kept in presentation
// order in an `IndexMap`, so a known identifier is replaced in place and a
// new one is inserted at the front or back per the collection's policy.
// Every mutation bumps a sequence number, republishes a `watch` snapshot,
// and (for merges) lands in a bounded journal used to fence full loads.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use tokio::sync::watch;

use crate::model::{InsertPolicy, Record, RecordId};

/// Point-in-time view of a collection, in presentation order.
pub type Snapshot<T> = Arc<Vec<Arc<T>>>;

/// Sequence number observed before a full load was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadTicket(u64);

impl LoadTicket {
    pub fn seq(self) -> u64 {
        self.0
    }
}

/// What `merge` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced,
}

/// What a fenced full load did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Snapshot applied; `reapplied` newer merges were layered back on top.
    Applied { reapplied: usize },
    /// A load with a newer ticket already landed; nothing changed.
    Stale,
}

/// A change committed to the collection, for cache write-through.
#[derive(Debug, Clone)]
pub(crate) struct Commit<T> {
    pub seq: u64,
    pub snapshot: Snapshot<T>,
}

struct Ledger<T> {
    records: IndexMap<RecordId, Arc<T>>,
    seq: u64,
    /// Ticket of the newest full load applied so far.
    loaded_at: Option<u64>,
    /// Highest sequence number evicted from the journal.
    evicted_up_to: u64,
    journal: VecDeque<(u64, Arc<T>)>,
    populated: bool,
}

/// An ordered, reactive collection for a single record type.
pub struct RecordCollection<T: Record> {
    policy: InsertPolicy,
    journal_capacity: usize,
    ledger: Mutex<Ledger<T>>,
    snapshot: watch::Sender<Snapshot<T>>,
}

impl<T: Record> RecordCollection<T> {
    pub(crate) fn new(policy: InsertPolicy, journal_capacity: usize) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            policy,
            journal_capacity,
            ledger: Mutex::new(Ledger {
                records: IndexMap::new(),
                seq: 0,
                loaded_at: None,
                evicted_up_to: 0,
                journal: VecDeque::new(),
                populated: false,
            }),
            snapshot,
        }
    }

    pub fn policy(&self) -> InsertPolicy {
        self.policy
    }

    /// Insert or replace one record.
    pub(crate) fn merge(&self, record: T) -> (MergeOutcome, Commit<T>) {
        let record = Arc::new(record);
        let mut ledger = self.lock();
        let outcome = upsert(&mut ledger.records, self.policy, Arc::clone(&record));

        ledger.seq += 1;
        let seq = ledger.seq;
        ledger.journal.push_back((seq, record));
        while ledger.journal.len() > self.journal_capacity {
            if let Some((evicted, _)) = ledger.journal.pop_front() {
                ledger.evicted_up_to = evicted;
            }
        }
        ledger.populated = true;

        (outcome, self.publish(&ledger))
    }

    /// Replace the whole collection without fencing (cache seed, reset).
    ///
    /// Also forgets the merge journal: nothing merged before a reset may be
    /// replayed over a later load.
    pub(crate) fn replace(&self, records: Vec<T>) -> Commit<T> {
        let mut ledger = self.lock();
        ledger.records = collect(records);
        ledger.seq += 1;
        ledger.evicted_up_to = ledger.seq;
        ledger.journal.clear();
        ledger.loaded_at = Some(ledger.seq);
        ledger.populated = true;
        self.publish(&ledger)
    }

    /// Fill a collection nothing has touched yet with cached records.
    ///
    /// Checked and applied under one lock, so a merge that lands first
    /// wins and the seed is dropped. A seed is not a load: it does not
    /// fence later full loads.
    pub(crate) fn seed(&self, records: Vec<T>) -> Option<Commit<T>> {
        let mut ledger = self.lock();
        if ledger.populated {
            return None;
        }
        ledger.records = collect(records);
        ledger.seq += 1;
        ledger.populated = true;
        Some(self.publish(&ledger))
    }

    /// Take a ticket to pass to [`replace_fenced`](Self::replace_fenced)
    /// once the full load resolves.
    pub fn ticket(&self) -> LoadTicket {
        LoadTicket(self.lock().seq)
    }

    /// Apply a full load fetched after `ticket` was taken.
    ///
    /// Loads older than one already applied are rejected. Otherwise the
    /// snapshot replaces the collection and every merge newer than the
    /// ticket is re-applied on top, so push events that raced the fetch
    /// survive it.
    pub(crate) fn replace_fenced(
        &self,
        records: Vec<T>,
        ticket: LoadTicket,
    ) -> (ReplaceOutcome, Option<Commit<T>>) {
        let mut ledger = self.lock();
        if ledger.loaded_at.is_some_and(|loaded| loaded > ticket.0) {
            return (ReplaceOutcome::Stale, None);
        }
        if ledger.evicted_up_to > ticket.0 {
            tracing::warn!(
                ticket = ticket.0,
                evicted_up_to = ledger.evicted_up_to,
                "Merge journal overflowed during load; some push updates may be superseded"
            );
        }

        let mut records = collect(records);
        let mut reapplied = 0;
        for (seq, record) in &ledger.journal {
            if *seq > ticket.0 {
                upsert(&mut records, self.policy, Arc::clone(record));
                reapplied += 1;
            }
        }

        ledger.records = records;
        ledger.seq += 1;
        ledger.loaded_at = Some(ticket.0);
        ledger.populated = true;
        let commit = self.publish(&ledger);
        (ReplaceOutcome::Applied { reapplied }, Some(commit))
    }

    /// Drop all records and history.
    pub(crate) fn clear(&self) {
        let mut ledger = self.lock();
        ledger.records.clear();
        ledger.journal.clear();
        ledger.seq += 1;
        ledger.evicted_up_to = ledger.seq;
        ledger.loaded_at = None;
        ledger.populated = false;
        self.publish(&ledger);
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &RecordId) -> Option<Arc<T>> {
        self.lock().records.get(id).cloned()
    }

    /// Current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Snapshot<T> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<T>> {
        self.snapshot.subscribe()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// `true` once any merge or load has touched the collection.
    pub fn is_populated(&self) -> bool {
        self.lock().populated
    }

    /// Sequence number of the last mutation.
    pub fn seq(&self) -> u64 {
        self.lock().seq
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Ledger<T>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rebuild the snapshot and broadcast to subscribers. Called with the
    /// ledger locked so snapshots go out in sequence order.
    fn publish(&self, ledger: &Ledger<T>) -> Commit<T> {
        let snapshot: Snapshot<T> = Arc::new(ledger.records.values().cloned().collect());
        // `send_replace` updates unconditionally, even with zero receivers.
        self.snapshot.send_replace(Arc::clone(&snapshot));
        Commit {
            seq: ledger.seq,
            snapshot,
        }
    }
}

fn upsert<T: Record>(
    records: &mut IndexMap<RecordId, Arc<T>>,
    policy: InsertPolicy,
    record: Arc<T>,
) -> MergeOutcome {
    let id = record.record_id().clone();
    if let Some(slot) = records.get_mut(&id) {
        *slot = record;
        return MergeOutcome::Replaced;
    }
    match policy {
        InsertPolicy::Append => {
            records.insert(id, record);
        }
        InsertPolicy::Prepend => {
            records.shift_insert(0, id, record);
        }
    }
    MergeOutcome::Inserted
}

/// Build an ordered map from a full load; a repeated id keeps its first
/// position and its last value.
fn collect<T: Record>(records: Vec<T>) -> IndexMap<RecordId, Arc<T>> {
    let mut map = IndexMap::with_capacity(records.len());
    for record in records {
        map.insert(record.record_id().clone(), Arc::new(record));
    }
    map
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::{RequestItem, RequestStatus};

    fn request(id: &str, status: &str) -> RequestItem {
        serde_json::from_value(json!({ "id": id, "status": status })).unwrap()
    }

    fn ids<T: Record>(col: &RecordCollection<T>) -> Vec<String> {
        col.snapshot()
            .iter()
            .map(|r| r.record_id().to_string())
            .collect()
    }

    fn feed() -> RecordCollection<RequestItem> {
        RecordCollection::new(InsertPolicy::Prepend, 8)
    }

    #[test]
    fn merge_same_id_twice_keeps_one_record() {
        let col = feed();
        let (first, _) = col.merge(request("r1", "PENDING"));
        let (second, _) = col.merge(request("r1", "PENDING"));
        assert_eq!(first, MergeOutcome::Inserted);
        assert_eq!(second, MergeOutcome::Replaced);
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn replace_in_place_preserves_position() {
        let col = feed();
        col.merge(request("r1", "PENDING"));
        col.merge(request("r2", "PENDING"));
        col.merge(request("r3", "PENDING"));
        assert_eq!(ids(&col), vec!["r3", "r2", "r1"]);

        col.merge(request("r2", "APPROVED"));
        assert_eq!(ids(&col), vec!["r3", "r2", "r1"]);
        assert_eq!(
            col.get(&RecordId::from("r2")).unwrap().status,
            RequestStatus::Approved
        );
    }

    #[test]
    fn append_policy_adds_to_the_end() {
        let col: RecordCollection<RequestItem> = RecordCollection::new(InsertPolicy::Append, 8);
        col.merge(request("a", "PENDING"));
        col.merge(request("b", "PENDING"));
        assert_eq!(ids(&col), vec!["a", "b"]);
    }

    #[test]
    fn replace_dedupes_input() {
        let col = feed();
        col.replace(vec![
            request("r1", "PENDING"),
            request("r2", "PENDING"),
            request("r1", "REJECTED"),
        ]);
        assert_eq!(ids(&col), vec!["r1", "r2"]);
        assert_eq!(
            col.get(&RecordId::from("r1")).unwrap().status,
            RequestStatus::Rejected
        );
    }

    #[test]
    fn fenced_load_reapplies_newer_merges() {
        let col = feed();
        let ticket = col.ticket();

        // Push arrives while the fetch is in flight.
        col.merge(request("r1", "APPROVED"));

        // The fetch was served before the approval.
        let (outcome, commit) =
            col.replace_fenced(vec![request("r1", "PENDING"), request("r2", "PENDING")], ticket);
        assert_eq!(outcome, ReplaceOutcome::Applied { reapplied: 1 });
        assert!(commit.is_some());
        assert_eq!(
            col.get(&RecordId::from("r1")).unwrap().status,
            RequestStatus::Approved
        );
        assert_eq!(col.len(), 2);
    }

    #[test]
    fn merges_before_ticket_are_superseded() {
        let col = feed();
        col.merge(request("gone", "PENDING"));
        let ticket = col.ticket();

        let (outcome, _) = col.replace_fenced(vec![request("r1", "PENDING")], ticket);
        assert_eq!(outcome, ReplaceOutcome::Applied { reapplied: 0 });
        assert_eq!(ids(&col), vec!["r1"]);
    }

    #[test]
    fn older_load_is_stale_after_newer_one() {
        let col = feed();
        let old_ticket = col.ticket();
        col.merge(request("r1", "PENDING"));
        let new_ticket = col.ticket();

        let (applied, _) = col.replace_fenced(vec![request("r1", "APPROVED")], new_ticket);
        assert!(matches!(applied, ReplaceOutcome::Applied { .. }));

        let (stale, commit) = col.replace_fenced(vec![], old_ticket);
        assert_eq!(stale, ReplaceOutcome::Stale);
        assert!(commit.is_none());
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn journal_is_bounded() {
        let col: RecordCollection<RequestItem> = RecordCollection::new(InsertPolicy::Prepend, 2);
        let ticket = col.ticket();
        for i in 0..5 {
            col.merge(request(&format!("r{i}"), "PENDING"));
        }
        let (outcome, _) = col.replace_fenced(vec![], ticket);
        assert_eq!(outcome, ReplaceOutcome::Applied { reapplied: 2 });
    }

    #[test]
    fn commits_carry_increasing_seq() {
        let col = feed();
        let (_, a) = col.merge(request("r1", "PENDING"));
        let b = col.replace(vec![]);
        assert!(b.seq > a.seq);
        assert!(b.snapshot.is_empty());
    }

    #[test]
    fn subscribers_see_updates() {
        let col = feed();
        let mut rx = col.subscribe();
        col.merge(request("r1", "PENDING"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);
    }

    #[test]
    fn seed_only_fills_untouched_collection() {
        let col = feed();
        assert!(col.seed(vec![request("r0", "PENDING")]).is_some());
        assert!(col.seed(vec![request("r9", "PENDING")]).is_none());
        assert_eq!(col.len(), 1);

        let col = feed();
        col.merge(request("r1", "APPROVED"));
        assert!(col.seed(vec![request("r0", "PENDING")]).is_none());
        assert!(col.get(&RecordId::from("r0")).is_none());
        assert!(col.get(&RecordId::from("r1")).is_some());
    }

    #[test]
    fn seed_does_not_fence_pending_load() {
        let col = feed();
        let ticket = col.ticket();
        col.seed(vec![request("cached", "PENDING")]);
        col.merge(request("r1", "APPROVED"));

        let (outcome, _) = col.replace_fenced(vec![request("r2", "PENDING")], ticket);
        assert_eq!(outcome, ReplaceOutcome::Applied { reapplied: 1 });
        assert!(col.get(&RecordId::from("cached")).is_none());
        assert_eq!(col.len(), 2);
    }

    #[test]
    fn clear_resets_population() {
        let col = feed();
        col.merge(request("r1", "PENDING"));
        assert!(col.is_populated());
        col.clear();
        assert!(!col.is_populated());
        assert!(col.snapshot().is_empty());
    }
}
