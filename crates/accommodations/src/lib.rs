//! Sleeping accommodations domain module (event-sourced).
//!
//! A sleeping accommodation is a bookable unit (room, tent, ...). This crate holds
//! its business rules as deterministic domain logic (no IO, no storage).

pub mod accommodation;

pub use accommodation::{
    AccommodationCommand, AccommodationEvent, AccommodationType, CreateAccommodation,
    SleepingAccommodation, SleepingAccommodationCreated, SleepingAccommodationDeactivated,
    SleepingAccommodationId, SleepingAccommodationReactivated, SleepingAccommodationUpdated,
    UpdateAccommodationDetails,
};
