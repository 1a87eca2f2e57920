// ── Reactive data store ──
//
// Ordered record collections with push-based change notification.

mod collection;
mod data_store;

pub(crate) use collection::Commit;
pub use collection::{LoadTicket, MergeOutcome, RecordCollection, ReplaceOutcome, Snapshot};
pub use data_store::DataStore;
