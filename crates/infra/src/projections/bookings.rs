use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use bunkhouse_bookings::{Booking, BookingEvent, BookingId, BookingItem, BookingStatus, apply_changes, total_persons};
use bunkhouse_core::{AggregateId, AggregateRoot, UserId};
use bunkhouse_events::Event;

use super::{EventApplier, ProjectedReadModel};
use crate::read_model::ReadModel;

/// Queryable booking with its items and computed totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingReadModel {
    pub id: BookingId,
    pub user_id: Option<UserId>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub changed_at: Option<DateTime<Utc>>,
    pub last_event_version: Option<u64>,
    pub booking_items: Vec<BookingItem>,
    pub total_persons: u32,
}

impl BookingReadModel {
    pub fn number_of_nights(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }
}

impl ReadModel for BookingReadModel {
    fn id(&self) -> AggregateId {
        self.id.into()
    }

    fn last_event_version(&self) -> Option<u64> {
        self.last_event_version
    }

    fn set_last_event_version(&mut self, version: u64) {
        self.last_event_version = Some(version);
    }
}

impl ProjectedReadModel for BookingReadModel {
    type Event = BookingEvent;

    const NAME: &'static str = "BookingReadModel";
    const AGGREGATE_TYPE: &'static str = Booking::AGGREGATE_TYPE;
    const APPLIERS: &'static [EventApplier<Self, Self::Event>] = &[
        EventApplier::new(BookingEvent::CREATED, apply_created),
        EventApplier::new(BookingEvent::UPDATED, apply_updated),
        EventApplier::new(BookingEvent::DATE_RANGE_CHANGED, apply_date_range_changed),
        EventApplier::new(BookingEvent::ACCOMMODATIONS_CHANGED, apply_accommodations_changed),
        EventApplier::new(BookingEvent::NOTES_CHANGED, apply_notes_changed),
        EventApplier::new(BookingEvent::CONFIRMED, apply_status_change),
        EventApplier::new(BookingEvent::CANCELLED, apply_status_change),
        EventApplier::new(BookingEvent::ACCEPTED, apply_status_change),
        EventApplier::new(BookingEvent::REJECTED, apply_status_change),
    ];

    fn empty(id: AggregateId) -> Self {
        Self {
            id: BookingId::new(id),
            user_id: None,
            start_date: NaiveDate::default(),
            end_date: NaiveDate::default(),
            status: BookingStatus::Pending,
            notes: None,
            created_at: DateTime::<Utc>::default(),
            changed_at: None,
            last_event_version: None,
            booking_items: Vec::new(),
            total_persons: 0,
        }
    }
}

fn unexpected(expected: &str, got: &BookingEvent) -> String {
    format!("expected {expected}, got {}", got.event_type())
}

fn apply_created(model: &mut BookingReadModel, event: &BookingEvent) -> Result<(), String> {
    let BookingEvent::Created(e) = event else {
        return Err(unexpected(BookingEvent::CREATED, event));
    };
    model.id = e.booking_id;
    model.user_id = Some(e.user_id);
    model.start_date = e.start_date;
    model.end_date = e.end_date;
    model.status = e.status;
    model.notes = e.notes.clone();
    model.created_at = e.occurred_at;
    model.changed_at = None;
    model.booking_items = e.booking_items.clone();
    model.total_persons = total_persons(&e.booking_items);
    Ok(())
}

fn apply_updated(model: &mut BookingReadModel, event: &BookingEvent) -> Result<(), String> {
    let BookingEvent::Updated(e) = event else {
        return Err(unexpected(BookingEvent::UPDATED, event));
    };
    model.start_date = e.start_date;
    model.end_date = e.end_date;
    model.notes = e.notes.clone();
    model.booking_items = e.booking_items.clone();
    model.total_persons = total_persons(&e.booking_items);
    model.changed_at = Some(e.occurred_at);
    Ok(())
}

fn apply_date_range_changed(model: &mut BookingReadModel, event: &BookingEvent) -> Result<(), String> {
    let BookingEvent::DateRangeChanged(e) = event else {
        return Err(unexpected(BookingEvent::DATE_RANGE_CHANGED, event));
    };
    model.start_date = e.new_start_date;
    model.end_date = e.new_end_date;
    model.changed_at = Some(e.occurred_at);
    Ok(())
}

fn apply_accommodations_changed(model: &mut BookingReadModel, event: &BookingEvent) -> Result<(), String> {
    let BookingEvent::AccommodationsChanged(e) = event else {
        return Err(unexpected(BookingEvent::ACCOMMODATIONS_CHANGED, event));
    };
    model.booking_items = apply_changes(&model.booking_items, &e.accommodation_changes);
    model.total_persons = e.new_total_persons;
    model.changed_at = Some(e.occurred_at);
    Ok(())
}

fn apply_notes_changed(model: &mut BookingReadModel, event: &BookingEvent) -> Result<(), String> {
    let BookingEvent::NotesChanged(e) = event else {
        return Err(unexpected(BookingEvent::NOTES_CHANGED, event));
    };
    model.notes = e.new_notes.clone();
    model.changed_at = Some(e.occurred_at);
    Ok(())
}

fn apply_status_change(model: &mut BookingReadModel, event: &BookingEvent) -> Result<(), String> {
    let (status, occurred_at) = match event {
        BookingEvent::Confirmed(e) => (BookingStatus::Confirmed, e.occurred_at),
        BookingEvent::Cancelled(e) => (BookingStatus::Cancelled, e.occurred_at),
        BookingEvent::Accepted(e) => (BookingStatus::Accepted, e.occurred_at),
        BookingEvent::Rejected(e) => (BookingStatus::Rejected, e.occurred_at),
        other => return Err(unexpected("a status change", other)),
    };
    model.status = status;
    model.changed_at = Some(occurred_at);
    Ok(())
}
