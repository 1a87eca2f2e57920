// ── Reactive record streams ──
//
// Subscription types for consuming collection changes from the DataStore.

mod filter;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::store::Snapshot;

pub use filter::{AssignmentFilter, RecordFilter, RequestFilter};

/// Records of `snapshot` accepted by `filter`, in collection order.
pub fn select<T, F>(snapshot: &Snapshot<T>, filter: &F) -> Vec<Arc<T>>
where
    F: RecordFilter<T> + ?Sized,
{
    snapshot
        .iter()
        .filter(|record| filter.matches(record))
        .cloned()
        .collect()
}

/// A subscription to one collection.
///
/// Provides both point-in-time snapshot access and change notification
/// via [`changed`](Self::changed) or by converting into a `Stream`.
pub struct EntityStream<T: Clone + Send + Sync + 'static> {
    current: Snapshot<T>,
    receiver: watch::Receiver<Snapshot<T>>,
}

impl<T: Clone + Send + Sync + 'static> EntityStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot<T>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot captured at creation time or by the last `changed()`.
    pub fn current(&self) -> &Snapshot<T> {
        &self.current
    }

    /// Latest snapshot, which may be newer than `current()`.
    pub fn latest(&self) -> Snapshot<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Records of [`current`](Self::current) accepted by `filter`.
    pub fn current_matching<F: RecordFilter<T> + ?Sized>(&self, filter: &F) -> Vec<Arc<T>> {
        select(&self.current, filter)
    }

    /// Like [`changed`](Self::changed), narrowed to the records `filter` accepts.
    pub async fn changed_matching<F: RecordFilter<T> + ?Sized>(
        &mut self,
        filter: &F,
    ) -> Option<Vec<Arc<T>>> {
        let snap = self.changed().await?;
        Some(select(&snap, filter))
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> EntityWatchStream<T> {
        EntityWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
///
/// Yields the current snapshot first, then one per mutation observed.
pub struct EntityWatchStream<T: Clone + Send + Sync + 'static> {
    inner: WatchStream<Snapshot<T>>,
}

impl<T: Clone + Send + Sync + 'static> Stream for EntityWatchStream<T> {
    type Item = Snapshot<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Snapshot<T> is an Arc, so WatchStream is Unpin.
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::json;

    use super::RequestFilter;
    use crate::model::{RecordId, RequestItem, RequestStatus};
    use crate::store::DataStore;

    fn request(id: &str) -> RequestItem {
        serde_json::from_value(json!({ "id": id, "status": "PENDING" })).unwrap()
    }

    fn ids(records: &[std::sync::Arc<RequestItem>]) -> Vec<String> {
        records.iter().map(|r| r.id.to_string()).collect()
    }

    #[tokio::test]
    async fn changed_yields_new_snapshot() {
        let store = DataStore::new();
        let mut stream = store.subscribe_requests();
        assert!(stream.current().is_empty());

        store.requests().merge(request("r1"));
        let snap = stream.changed().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(stream.current().len(), 1);
    }

    #[tokio::test]
    async fn into_stream_starts_with_current_value() {
        let store = DataStore::new();
        store.requests().merge(request("r1"));

        let mut stream = store.subscribe_requests().into_stream();
        let first = stream.next().await.unwrap();
        assert_eq!(first[0].id, RecordId::from("r1"));
    }

    #[tokio::test]
    async fn open_requests_follow_status_changes() {
        let store = DataStore::new();
        store.requests().merge(request("r1"));
        store.requests().merge(request("r2"));

        let mut stream = store.subscribe_requests();
        let open = stream.current_matching(&RequestFilter::Open);
        assert_eq!(ids(&open), vec!["r2", "r1"]);

        let approved: RequestItem =
            serde_json::from_value(json!({ "id": "r1", "status": "APPROVED" })).unwrap();
        store.requests().merge(approved);
        let open = stream.changed_matching(&RequestFilter::Open).await.unwrap();
        assert_eq!(ids(&open), vec!["r2"]);

        let by_closure =
            stream.current_matching(&|r: &RequestItem| r.status == RequestStatus::Approved);
        assert_eq!(ids(&by_closure), vec!["r1"]);
    }
}
