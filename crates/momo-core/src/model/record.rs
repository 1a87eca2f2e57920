use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{
    ChatMessage, ChatRoom, CollectionKey, Employee, RecordId, RequestItem, TaskAssignment,
};
use crate::store::{DataStore, RecordCollection};

/// A domain record the store and cache know how to hold.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Human-readable type name for logs and errors.
    const NAME: &'static str;

    /// Stable identifier; two records with the same id are the same entity.
    fn record_id(&self) -> &RecordId;

    /// The store collection `key` names, if it holds this record type.
    fn collection(store: &DataStore, key: &CollectionKey) -> Option<Arc<RecordCollection<Self>>>;
}

impl Record for ChatRoom {
    const NAME: &'static str = "chat room";

    fn record_id(&self) -> &RecordId {
        &self.id
    }

    fn collection(store: &DataStore, key: &CollectionKey) -> Option<Arc<RecordCollection<Self>>> {
        matches!(key, CollectionKey::Rooms).then(|| store.rooms())
    }
}

impl Record for ChatMessage {
    const NAME: &'static str = "chat message";

    fn record_id(&self) -> &RecordId {
        &self.id
    }

    fn collection(store: &DataStore, key: &CollectionKey) -> Option<Arc<RecordCollection<Self>>> {
        match key {
            CollectionKey::Messages(chat_id) => Some(store.messages(chat_id)),
            _ => None,
        }
    }
}

impl Record for RequestItem {
    const NAME: &'static str = "request";

    fn record_id(&self) -> &RecordId {
        &self.id
    }

    fn collection(store: &DataStore, key: &CollectionKey) -> Option<Arc<RecordCollection<Self>>> {
        matches!(key, CollectionKey::Requests).then(|| store.requests())
    }
}

impl Record for TaskAssignment {
    const NAME: &'static str = "task assignment";

    fn record_id(&self) -> &RecordId {
        &self.id
    }

    fn collection(store: &DataStore, key: &CollectionKey) -> Option<Arc<RecordCollection<Self>>> {
        matches!(key, CollectionKey::Assignments).then(|| store.assignments())
    }
}

impl Record for Employee {
    const NAME: &'static str = "employee";

    fn record_id(&self) -> &RecordId {
        &self.id
    }

    fn collection(store: &DataStore, key: &CollectionKey) -> Option<Arc<RecordCollection<Self>>> {
        matches!(key, CollectionKey::Unassigned).then(|| store.unassigned())
    }
}
