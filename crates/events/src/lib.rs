//! Domain events and their wire encoding.
//!
//! Aggregates define closed event enums; each enum registers a static table of
//! tag → decoder functions so stored payloads can be decoded without any runtime
//! type discovery.

pub mod event;
pub mod serializer;

pub use event::Event;
pub use serializer::{
    EventDecoder, RegisteredEvent, SerializationError, SerializedEvent, deserialize_event,
    deserialize_snapshot, is_registered, registered_event_types, serialize_event,
    serialize_snapshot,
};
