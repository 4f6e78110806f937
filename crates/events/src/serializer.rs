//! Event and snapshot (de)serialization.
//!
//! Payloads are JSON objects. The event tag is never part of the payload; it is
//! stored beside it and selects the decoder on the way back in.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::event::Event;

/// Decoder for one tag of a closed event enum.
pub type DecodeFn<E> = fn(&JsonValue) -> Result<E, serde_json::Error>;

/// One entry of a static tag → decoder table.
#[derive(Debug)]
pub struct EventDecoder<E: 'static> {
    pub event_type: &'static str,
    pub decode: DecodeFn<E>,
}

impl<E> EventDecoder<E> {
    pub const fn new(event_type: &'static str, decode: DecodeFn<E>) -> Self {
        Self { event_type, decode }
    }
}

/// A closed event enum with its compile-time decoder table.
///
/// `Serialize` must produce the payload of the inner variant only (no tag), which
/// is what `#[serde(untagged)]` does for newtype variants.
pub trait RegisteredEvent: Event + Serialize {
    const DECODERS: &'static [EventDecoder<Self>];
}

/// Encoded form of an event, ready for the event store.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedEvent {
    pub event_type: &'static str,
    pub payload: JsonValue,
}

#[derive(Debug, Error)]
pub enum SerializationError {
    /// The tag is not part of the closed event set (schema/version skew).
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("failed to decode {event_type} payload: {source}")]
    Malformed {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {event_type} payload: {source}")]
    Encode {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot serialization failed: {0}")]
    Snapshot(#[source] serde_json::Error),
}

/// Encode an event into its tag and canonical payload.
pub fn serialize_event<E>(event: &E) -> Result<SerializedEvent, SerializationError>
where
    E: Event + Serialize,
{
    let event_type = event.event_type();
    let payload = serde_json::to_value(event)
        .map_err(|source| SerializationError::Encode { event_type, source })?;
    Ok(SerializedEvent {
        event_type,
        payload,
    })
}

/// Decode a stored payload by tag.
///
/// An unknown tag is always an error; it is never skipped.
pub fn deserialize_event<E>(event_type: &str, payload: &JsonValue) -> Result<E, SerializationError>
where
    E: RegisteredEvent,
{
    let decoder = E::DECODERS
        .iter()
        .find(|d| d.event_type == event_type)
        .ok_or_else(|| SerializationError::UnknownEventType(event_type.to_string()))?;

    (decoder.decode)(payload).map_err(|source| SerializationError::Malformed {
        event_type: event_type.to_string(),
        source,
    })
}

pub fn is_registered<E: RegisteredEvent>(event_type: &str) -> bool {
    E::DECODERS.iter().any(|d| d.event_type == event_type)
}

pub fn registered_event_types<E: RegisteredEvent>() -> impl Iterator<Item = &'static str> {
    E::DECODERS.iter().map(|d| d.event_type)
}

/// Snapshots bypass the tag table: the caller names the state type.
pub fn serialize_snapshot<T: Serialize>(state: &T) -> Result<JsonValue, SerializationError> {
    serde_json::to_value(state).map_err(SerializationError::Snapshot)
}

pub fn deserialize_snapshot<T: DeserializeOwned>(data: &JsonValue) -> Result<T, SerializationError> {
    T::deserialize(data).map_err(SerializationError::Snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct LampLit {
        event_id: Uuid,
        occurred_at: DateTime<Utc>,
        brightness: u8,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct LampOut {
        event_id: Uuid,
        occurred_at: DateTime<Utc>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(untagged)]
    enum LampEvent {
        Lit(LampLit),
        Out(LampOut),
    }

    impl Event for LampEvent {
        fn event_type(&self) -> &'static str {
            match self {
                LampEvent::Lit(_) => "LampLit",
                LampEvent::Out(_) => "LampOut",
            }
        }

        fn event_id(&self) -> Uuid {
            match self {
                LampEvent::Lit(e) => e.event_id,
                LampEvent::Out(e) => e.event_id,
            }
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            match self {
                LampEvent::Lit(e) => e.occurred_at,
                LampEvent::Out(e) => e.occurred_at,
            }
        }
    }

    impl RegisteredEvent for LampEvent {
        const DECODERS: &'static [EventDecoder<Self>] = &[
            EventDecoder::new("LampLit", |v| LampLit::deserialize(v).map(LampEvent::Lit)),
            EventDecoder::new("LampOut", |v| LampOut::deserialize(v).map(LampEvent::Out)),
        ];
    }

    fn lit() -> LampEvent {
        LampEvent::Lit(LampLit {
            event_id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            brightness: 80,
        })
    }

    #[test]
    fn payload_uses_camel_case_and_omits_tag() {
        let encoded = serialize_event(&lit()).unwrap();
        assert_eq!(encoded.event_type, "LampLit");

        let obj = encoded.payload.as_object().unwrap();
        assert!(obj.contains_key("eventId"));
        assert!(obj.contains_key("occurredAt"));
        assert_eq!(obj["brightness"], 80);
        assert!(!obj.contains_key("Lit"));
    }

    #[test]
    fn decode_by_tag_restores_variant() {
        let event = lit();
        let encoded = serialize_event(&event).unwrap();
        let decoded: LampEvent = deserialize_event(encoded.event_type, &encoded.payload).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let encoded = serialize_event(&lit()).unwrap();
        let err = deserialize_event::<LampEvent>("LampExploded", &encoded.payload).unwrap_err();
        match err {
            SerializationError::UnknownEventType(tag) => assert_eq!(tag, "LampExploded"),
            _ => panic!("Expected UnknownEventType"),
        }
    }

    #[test]
    fn wrong_shape_for_tag_is_malformed() {
        let payload = serde_json::json!({ "eventId": Uuid::now_v7() });
        let err = deserialize_event::<LampEvent>("LampLit", &payload).unwrap_err();
        assert!(matches!(err, SerializationError::Malformed { .. }));
    }

    #[test]
    fn registry_lists_every_tag() {
        let tags: Vec<_> = registered_event_types::<LampEvent>().collect();
        assert_eq!(tags, vec!["LampLit", "LampOut"]);
        assert!(is_registered::<LampEvent>("LampOut"));
        assert!(!is_registered::<LampEvent>("lampout"));
    }

    #[test]
    fn snapshot_codec_is_generic() {
        let state = LampOut {
            event_id: Uuid::now_v7(),
            occurred_at: Utc::now(),
        };
        let data = serialize_snapshot(&state).unwrap();
        let back: LampOut = deserialize_snapshot(&data).unwrap();
        assert_eq!(back, state);
    }
}
