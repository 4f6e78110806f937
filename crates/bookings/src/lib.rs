//! Bookings domain module (event-sourced).
//!
//! A booking reserves one or more sleeping accommodations for a date range. The
//! aggregate records fine-grained change events (dates, accommodations, notes) so
//! that history views can show exactly what changed.

pub mod booking;
pub mod items;

pub use booking::{
    Booking, BookingAccepted, BookingAccommodationsChanged, BookingCancelled, BookingCommand,
    BookingConfirmed, BookingCreated, BookingDateRangeChanged, BookingEvent, BookingId,
    BookingNotesChanged, BookingRejected, BookingStatus, BookingUpdated, ChangeAccommodations,
    ChangeDateRange, ChangeNotes, CreateBooking, UpdateBooking,
};
pub use items::{AccommodationChange, BookingItem, ChangeType, apply_changes, diff_items, total_persons};
