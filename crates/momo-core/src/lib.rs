// momo-core: Real-time sync core between momo-api and the app.
//
// One STOMP session multiplexes the user's push queues; a registry keeps
// subscriptions alive across reconnects; inbound events and REST loads are
// reconciled into a reactive store and a durable offline cache.

pub mod cache;
pub mod client;
pub mod config;
pub mod controller;
mod dispatch;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod session;
pub mod store;
pub mod stream;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::{CacheBackend, FileBackend, MemoryBackend, OfflineCache};
pub use client::SyncClient;
pub use config::{BackoffPolicy, ReconnectConfig, SyncConfig, UserContext};
pub use controller::Controller;
pub use error::CoreError;
pub use reconcile::Reconciler;
pub use registry::{ChannelListener, Listener, SubscriptionHandle};
pub use session::{Connector, SessionEvent, SessionInfo, SessionState};
pub use store::{DataStore, LoadTicket, MergeOutcome, RecordCollection, ReplaceOutcome, Snapshot};
pub use stream::{
    AssignmentFilter, EntityStream, EntityWatchStream, RecordFilter, RequestFilter,
};
pub use sync::Synchronizer;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    // Records
    ChatMessage, ChatRoom, Employee, RecordId, RequestItem, TaskAssignment,
    // Status enums
    AssignmentStatus, ChatType, RequestStatus,
    // Routing
    CollectionKey, InboundEvent, InsertPolicy, Payload, Record, Topic,
};

// Link types, for custom connectors and test doubles.
pub use momo_api::{Link, LinkEvent, LinkPeer, UserRole};
