//! Booking history view, read straight from the event log.
//!
//! Entries are listed newest first. Status before/after is tracked over the whole
//! stream, so a page that starts mid-history still shows the right statuses. A
//! payload that cannot be decoded becomes a fallback entry instead of failing
//! the view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

use bunkhouse_bookings::{Booking, BookingEvent, BookingId, BookingStatus, ChangeType, total_persons};
use bunkhouse_core::AggregateRoot;

use crate::event_store::{EventStore, EventStoreError, StoredEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub event_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
    pub description: String,
    pub details: String,
    pub status_before: Option<BookingStatus>,
    pub status_after: Option<BookingStatus>,
    pub changes: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingHistory {
    pub booking_id: BookingId,
    pub page: usize,
    pub page_size: usize,
    pub total_events: usize,
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("booking {0} not found")]
    NotFound(BookingId),

    #[error("invalid page request: {0}")]
    InvalidPage(&'static str),

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

pub struct BookingHistoryService<S> {
    store: S,
}

impl<S: EventStore> BookingHistoryService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// One page (1-based) of the booking's history, newest first.
    #[instrument(skip(self), err)]
    pub async fn history(
        &self,
        booking_id: BookingId,
        page: usize,
        page_size: usize,
    ) -> Result<BookingHistory, HistoryError> {
        if page == 0 {
            return Err(HistoryError::InvalidPage("page starts at 1"));
        }
        if page_size == 0 {
            return Err(HistoryError::InvalidPage("page size must be positive"));
        }

        let events: Vec<StoredEvent> = self
            .store
            .get_events(booking_id.into(), None)
            .await?
            .into_iter()
            .filter(|e| e.aggregate_type == Booking::AGGREGATE_TYPE)
            .collect();
        if events.is_empty() {
            return Err(HistoryError::NotFound(booking_id));
        }

        let mut status = None;
        let mut entries: Vec<HistoryEntry> = events.iter().map(|stored| describe(stored, &mut status)).collect();
        entries.reverse();

        let total_events = entries.len();
        let entries = entries
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(BookingHistory {
            booking_id,
            page,
            page_size,
            total_events,
            entries,
        })
    }
}

/// Build the entry for one event and advance the running status.
fn describe(stored: &StoredEvent, status: &mut Option<BookingStatus>) -> HistoryEntry {
    let mut entry = HistoryEntry {
        event_id: stored.event_id,
        event_type: stored.event_type.clone(),
        timestamp: stored.timestamp,
        version: stored.version,
        description: String::new(),
        details: String::new(),
        status_before: *status,
        status_after: *status,
        changes: Map::new(),
    };

    let event = match stored.decode::<BookingEvent>() {
        Ok(event) => event,
        Err(err) => {
            warn!(
                aggregate_id = %stored.aggregate_id,
                version = stored.version,
                event_type = %stored.event_type,
                error = %err,
                "history entry could not be decoded"
            );
            entry.description = "Event could not be processed".to_string();
            entry.details = format!("Failed to decode payload: {err}");
            entry.status_after = None;
            return entry;
        }
    };

    match &event {
        BookingEvent::Created(e) => {
            let persons = total_persons(&e.booking_items);
            entry.description = "Booking created".to_string();
            entry.details = format!("Booking for {persons} person(s) from {} to {}", e.start_date, e.end_date);
            entry.status_after = Some(e.status);
            entry.changes = object(json!({
                "startDate": e.start_date,
                "endDate": e.end_date,
                "totalPersons": persons,
                "accommodationCount": e.booking_items.len(),
                "notes": e.notes.clone().unwrap_or_default(),
            }));
        }
        BookingEvent::Updated(e) => {
            let persons = total_persons(&e.booking_items);
            entry.description = "Booking updated".to_string();
            entry.details = format!("Booking changed: {persons} person(s) from {} to {}", e.start_date, e.end_date);
            entry.changes = object(json!({
                "startDate": e.start_date,
                "endDate": e.end_date,
                "totalPersons": persons,
                "accommodationCount": e.booking_items.len(),
                "notes": e.notes.clone().unwrap_or_default(),
            }));
        }
        BookingEvent::DateRangeChanged(e) => {
            entry.description = "Travel dates changed".to_string();
            entry.details = format!(
                "{} to {} ({} nights) became {} to {} ({} nights)",
                e.previous_start_date, e.previous_end_date, e.previous_nights, e.new_start_date, e.new_end_date, e.new_nights
            );
            if let Some(reason) = &e.change_reason {
                entry.details.push_str(&format!("; reason: {reason}"));
            }
            entry.changes = object(json!({
                "previousStartDate": e.previous_start_date,
                "previousEndDate": e.previous_end_date,
                "newStartDate": e.new_start_date,
                "newEndDate": e.new_end_date,
                "previousNights": e.previous_nights,
                "newNights": e.new_nights,
            }));
        }
        BookingEvent::AccommodationsChanged(e) => {
            let count = |kind: ChangeType| e.accommodation_changes.iter().filter(|c| c.change_type == kind).count();
            entry.description = "Accommodations changed".to_string();
            entry.details = format!(
                "{} added, {} removed, {} modified; persons {} -> {}",
                count(ChangeType::Added),
                count(ChangeType::Removed),
                count(ChangeType::Modified),
                e.previous_total_persons,
                e.new_total_persons
            );
            entry.changes = object(json!({
                "previousTotalPersons": e.previous_total_persons,
                "newTotalPersons": e.new_total_persons,
                "accommodationChanges": e.accommodation_changes,
            }));
        }
        BookingEvent::NotesChanged(e) => {
            entry.description = "Notes changed".to_string();
            entry.details = match &e.new_notes {
                Some(notes) => format!("Notes set to \"{notes}\""),
                None => "Notes removed".to_string(),
            };
            entry.changes = object(json!({
                "previousNotes": e.previous_notes,
                "newNotes": e.new_notes,
            }));
        }
        BookingEvent::Confirmed(_) => {
            entry.description = "Booking confirmed".to_string();
            entry.details = "Booking was confirmed by an administrator".to_string();
            entry.status_after = Some(BookingStatus::Confirmed);
        }
        BookingEvent::Accepted(_) => {
            entry.description = "Booking accepted".to_string();
            entry.details = "Booking was accepted by an administrator".to_string();
            entry.status_after = Some(BookingStatus::Accepted);
        }
        BookingEvent::Rejected(_) => {
            entry.description = "Booking rejected".to_string();
            entry.details = "Booking was rejected by an administrator".to_string();
            entry.status_after = Some(BookingStatus::Rejected);
        }
        BookingEvent::Cancelled(_) => {
            entry.description = "Booking cancelled".to_string();
            entry.details = "Booking was cancelled".to_string();
            entry.status_after = Some(BookingStatus::Cancelled);
        }
    }

    *status = entry.status_after;
    entry
}

fn object(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    }
}
