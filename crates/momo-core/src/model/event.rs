// ── Inbound events ──
//
// Frames are decoded exactly once, at the dispatcher boundary, into a
// tagged union. Envelope handling lives here so nothing downstream ever
// branches on JSON shape.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::topic::Topic;
use super::{ChatMessage, RequestItem, TaskAssignment};
use crate::error::CoreError;

/// A decoded push payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Message(ChatMessage),
    Request(RequestItem),
    Assignment(TaskAssignment),
    /// Body of a custom destination, as parsed JSON.
    Raw(serde_json::Value),
}

/// A decoded payload tagged with the destination it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub destination: String,
    /// Envelope `type`, e.g. `request_created`, when the frame had one.
    pub kind: Option<String>,
    pub payload: Payload,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    payload: T,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Shape<T> {
    Enveloped(Envelope<T>),
    Bare(T),
}

impl InboundEvent {
    /// Decode a frame body according to the topic its destination names.
    ///
    /// Known topics accept both the bare record and the
    /// `{ "type": ..., "payload": record }` envelope.
    pub fn decode(destination: &str, body: &str) -> Result<Self, CoreError> {
        let decode_err = |message: String| CoreError::Decode {
            destination: destination.to_owned(),
            message,
        };

        let (kind, payload) = match Topic::from_destination(destination) {
            Topic::Messages => unwrap_shape(body).map(|(k, m)| (k, Payload::Message(m))),
            Topic::Requests => unwrap_shape(body).map(|(k, r)| (k, Payload::Request(r))),
            Topic::Assignments => {
                unwrap_shape(body).map(|(k, a)| (k, Payload::Assignment(a)))
            }
            Topic::Custom(_) => serde_json::from_str(body).map(|v| (None, Payload::Raw(v))),
        }
        .map_err(|e| decode_err(e.to_string()))?;

        Ok(Self {
            destination: destination.to_owned(),
            kind,
            payload,
        })
    }
}

fn unwrap_shape<T: DeserializeOwned>(body: &str) -> Result<(Option<String>, T), serde_json::Error> {
    Ok(match serde_json::from_str::<Shape<T>>(body)? {
        Shape::Enveloped(env) => (env.kind, env.payload),
        Shape::Bare(record) => (None, record),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{RecordId, RequestStatus};
    use crate::model::topic::{
        ASSIGNMENTS_DESTINATION, MESSAGES_DESTINATION, REQUESTS_DESTINATION,
    };

    #[test]
    fn request_envelope_is_unwrapped() {
        let body = r#"{"type":"request_updated","payload":{"id":"r1","status":"APPROVED"}}"#;
        let event = InboundEvent::decode(REQUESTS_DESTINATION, body).unwrap();
        assert_eq!(event.kind.as_deref(), Some("request_updated"));
        let Payload::Request(req) = event.payload else {
            panic!("expected request payload");
        };
        assert_eq!(req.id, RecordId::from("r1"));
        assert_eq!(req.status, RequestStatus::Approved);
    }

    #[test]
    fn bare_request_is_accepted() {
        let body = r#"{"id":"r1","status":"PENDING"}"#;
        let event = InboundEvent::decode(REQUESTS_DESTINATION, body).unwrap();
        assert!(event.kind.is_none());
        assert!(matches!(event.payload, Payload::Request(_)));
    }

    #[test]
    fn bare_message_decodes() {
        let body = r#"{"id":"m1","chatId":"c1","text":"Hallo"}"#;
        let event = InboundEvent::decode(MESSAGES_DESTINATION, body).unwrap();
        let Payload::Message(msg) = event.payload else {
            panic!("expected message payload");
        };
        assert_eq!(msg.chat_id, RecordId::from("c1"));
    }

    #[test]
    fn enveloped_assignment_decodes() {
        let body = r#"{"type":"assignment_updated","payload":{"id":"a1","status":"ACCEPTED"}}"#;
        let event = InboundEvent::decode(ASSIGNMENTS_DESTINATION, body).unwrap();
        assert!(matches!(event.payload, Payload::Assignment(_)));
    }

    #[test]
    fn custom_destination_keeps_raw_json() {
        let event = InboundEvent::decode("/topic/ping", r#"{"n":1}"#).unwrap();
        assert_eq!(event.payload, Payload::Raw(serde_json::json!({ "n": 1 })));
    }

    #[test]
    fn malformed_body_is_decode_error() {
        let err = InboundEvent::decode(REQUESTS_DESTINATION, "{not json").unwrap_err();
        assert!(matches!(err, CoreError::Decode { .. }));

        let err = InboundEvent::decode(REQUESTS_DESTINATION, r#"{"status":"PENDING"}"#)
            .unwrap_err();
        assert!(matches!(err, CoreError::Decode { .. }), "missing id must not decode");
    }
}
