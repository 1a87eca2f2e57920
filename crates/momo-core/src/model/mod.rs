// ── Domain model ──
//
// Wire records are re-exported from momo-api unchanged. Everything else
// here is what the sync core layers on top of them.

mod collection_key;
mod event;
mod record;
mod topic;

pub use collection_key::{CollectionKey, InsertPolicy};
pub use event::{InboundEvent, Payload};
pub use record::Record;
pub use topic::{ASSIGNMENTS_DESTINATION, MESSAGES_DESTINATION, REQUESTS_DESTINATION, Topic};

pub use momo_api::RecordId;
pub use momo_api::models::{
    AssignmentStatus, ChatMessage, ChatRoom, ChatType, Employee, RequestItem, RequestStatus,
    TaskAssignment,
};
