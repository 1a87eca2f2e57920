use std::fmt;

use momo_api::RecordId;

const ROOMS_CACHE_KEY: &str = "chat_cache_rooms";
const MESSAGES_CACHE_PREFIX: &str = "chat_cache_messages_";

/// Where a record lands when its identifier is new to the collection.
///
/// Known identifiers are always replaced in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPolicy {
    /// Time-ordered lists (chat history).
    Append,
    /// Most-recent-activity-first feeds.
    Prepend,
}

/// Names one collection of the store and its offline cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionKey {
    Rooms,
    Messages(RecordId),
    Requests,
    Assignments,
    Unassigned,
}

impl CollectionKey {
    pub fn cache_key(&self) -> String {
        match self {
            Self::Rooms => ROOMS_CACHE_KEY.to_owned(),
            Self::Messages(chat_id) => format!("{MESSAGES_CACHE_PREFIX}{chat_id}"),
            Self::Requests => "requests".to_owned(),
            Self::Assignments => "assignments".to_owned(),
            Self::Unassigned => "unassigned_employees".to_owned(),
        }
    }

    pub fn policy(&self) -> InsertPolicy {
        match self {
            Self::Messages(_) => InsertPolicy::Append,
            Self::Rooms | Self::Requests | Self::Assignments | Self::Unassigned => {
                InsertPolicy::Prepend
            }
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rooms => f.write_str("rooms"),
            Self::Messages(chat_id) => write!(f, "messages[{chat_id}]"),
            Self::Requests => f.write_str("requests"),
            Self::Assignments => f.write_str("assignments"),
            Self::Unassigned => f.write_str("unassigned"),
        }
    }
}
