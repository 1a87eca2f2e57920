use std::fmt;

/// Per-user queue for chat messages.
pub const MESSAGES_DESTINATION: &str = "/user/queue/messages";
/// Per-user queue for request created/updated notifications.
pub const REQUESTS_DESTINATION: &str = "/user/queue/requests";
/// Per-user queue for task assignment changes.
pub const ASSIGNMENTS_DESTINATION: &str = "/user/queue/assignments";

/// A logical push channel.
///
/// The three known queues decode into typed payloads; anything else is a
/// custom destination delivering raw JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Messages,
    Requests,
    Assignments,
    Custom(String),
}

impl Topic {
    pub fn destination(&self) -> &str {
        match self {
            Self::Messages => MESSAGES_DESTINATION,
            Self::Requests => REQUESTS_DESTINATION,
            Self::Assignments => ASSIGNMENTS_DESTINATION,
            Self::Custom(dest) => dest,
        }
    }

    pub fn from_destination(destination: &str) -> Self {
        match destination {
            MESSAGES_DESTINATION => Self::Messages,
            REQUESTS_DESTINATION => Self::Requests,
            ASSIGNMENTS_DESTINATION => Self::Assignments,
            other => Self::Custom(other.to_owned()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.destination())
    }
}

impl From<&str> for Topic {
    fn from(destination: &str) -> Self {
        Self::from_destination(destination)
    }
}

impl From<String> for Topic {
    fn from(destination: String) -> Self {
        Self::from_destination(&destination)
    }
}
