use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bunkhouse_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use bunkhouse_events::{Event, EventDecoder, RegisteredEvent};

use crate::items::{AccommodationChange, BookingItem, apply_changes, diff_items, total_persons};

/// Booking identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(pub AggregateId);

impl BookingId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl From<AggregateId> for BookingId {
    fn from(value: AggregateId) -> Self {
        Self(value)
    }
}

impl From<BookingId> for AggregateId {
    fn from(value: BookingId) -> Self {
        value.0
    }
}

impl core::fmt::Display for BookingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Booking status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    Accepted,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Cancelled => "Cancelled",
            BookingStatus::Completed => "Completed",
            BookingStatus::Accepted => "Accepted",
            BookingStatus::Rejected => "Rejected",
        }
    }
}

impl core::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for BookingStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(BookingStatus::Pending),
            "Confirmed" => Ok(BookingStatus::Confirmed),
            "Cancelled" => Ok(BookingStatus::Cancelled),
            "Completed" => Ok(BookingStatus::Completed),
            "Accepted" => Ok(BookingStatus::Accepted),
            "Rejected" => Ok(BookingStatus::Rejected),
            other => Err(DomainError::validation(format!("unknown booking status '{other}'"))),
        }
    }
}

/// Aggregate root: Booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    id: BookingId,
    user_id: Option<UserId>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    status: BookingStatus,
    notes: Option<String>,
    items: Vec<BookingItem>,
    created: bool,
}

impl Booking {
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn items(&self) -> &[BookingItem] {
        &self.items
    }

    pub fn total_persons(&self) -> u32 {
        total_persons(&self.items)
    }

    pub fn number_of_nights(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Booking {
    type Id = BookingId;
    const AGGREGATE_TYPE: &'static str = "BookingAggregate";

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Command: CreateBooking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBooking {
    pub user_id: UserId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub items: Vec<BookingItem>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeDateRange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeAccommodations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeAccommodations {
    pub items: Vec<BookingItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeNotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotes {
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateBooking (dates, accommodations and notes in one go).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBooking {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub items: Vec<BookingItem>,
    pub notes: Option<String>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingCommand {
    Create(CreateBooking),
    ChangeDateRange(ChangeDateRange),
    ChangeAccommodations(ChangeAccommodations),
    ChangeNotes(ChangeNotes),
    Update(UpdateBooking),
    Confirm { occurred_at: DateTime<Utc> },
    Cancel { occurred_at: DateTime<Utc> },
    Accept { occurred_at: DateTime<Utc> },
    Reject { occurred_at: DateTime<Utc> },
}

/// Event: BookingCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCreated {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub booking_items: Vec<BookingItem>,
}

/// Event: BookingUpdated (summary emitted after an `Update` command).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingUpdated {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub booking_id: BookingId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub notes: Option<String>,
    pub booking_items: Vec<BookingItem>,
}

/// Event: BookingDateRangeChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDateRangeChanged {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub booking_id: BookingId,
    pub previous_start_date: NaiveDate,
    pub previous_end_date: NaiveDate,
    pub new_start_date: NaiveDate,
    pub new_end_date: NaiveDate,
    pub previous_nights: i64,
    pub new_nights: i64,
    pub change_reason: Option<String>,
}

/// Event: BookingAccommodationsChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingAccommodationsChanged {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub booking_id: BookingId,
    pub accommodation_changes: Vec<AccommodationChange>,
    pub previous_total_persons: u32,
    pub new_total_persons: u32,
}

/// Event: BookingNotesChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingNotesChanged {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub booking_id: BookingId,
    pub previous_notes: Option<String>,
    pub new_notes: Option<String>,
}

macro_rules! status_event {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            pub event_id: Uuid,
            pub occurred_at: DateTime<Utc>,
            pub booking_id: BookingId,
        }
    };
}

status_event!(BookingConfirmed, "Event: BookingConfirmed.");
status_event!(BookingCancelled, "Event: BookingCancelled.");
status_event!(BookingAccepted, "Event: BookingAccepted.");
status_event!(BookingRejected, "Event: BookingRejected.");

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BookingEvent {
    Created(BookingCreated),
    Updated(BookingUpdated),
    DateRangeChanged(BookingDateRangeChanged),
    AccommodationsChanged(BookingAccommodationsChanged),
    NotesChanged(BookingNotesChanged),
    Confirmed(BookingConfirmed),
    Cancelled(BookingCancelled),
    Accepted(BookingAccepted),
    Rejected(BookingRejected),
}

impl BookingEvent {
    pub const CREATED: &'static str = "BookingCreated";
    pub const UPDATED: &'static str = "BookingUpdated";
    pub const DATE_RANGE_CHANGED: &'static str = "BookingDateRangeChanged";
    pub const ACCOMMODATIONS_CHANGED: &'static str = "BookingAccommodationsChanged";
    pub const NOTES_CHANGED: &'static str = "BookingNotesChanged";
    pub const CONFIRMED: &'static str = "BookingConfirmed";
    pub const CANCELLED: &'static str = "BookingCancelled";
    pub const ACCEPTED: &'static str = "BookingAccepted";
    pub const REJECTED: &'static str = "BookingRejected";
}

impl Event for BookingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BookingEvent::Created(_) => Self::CREATED,
            BookingEvent::Updated(_) => Self::UPDATED,
            BookingEvent::DateRangeChanged(_) => Self::DATE_RANGE_CHANGED,
            BookingEvent::AccommodationsChanged(_) => Self::ACCOMMODATIONS_CHANGED,
            BookingEvent::NotesChanged(_) => Self::NOTES_CHANGED,
            BookingEvent::Confirmed(_) => Self::CONFIRMED,
            BookingEvent::Cancelled(_) => Self::CANCELLED,
            BookingEvent::Accepted(_) => Self::ACCEPTED,
            BookingEvent::Rejected(_) => Self::REJECTED,
        }
    }

    fn event_id(&self) -> Uuid {
        match self {
            BookingEvent::Created(e) => e.event_id,
            BookingEvent::Updated(e) => e.event_id,
            BookingEvent::DateRangeChanged(e) => e.event_id,
            BookingEvent::AccommodationsChanged(e) => e.event_id,
            BookingEvent::NotesChanged(e) => e.event_id,
            BookingEvent::Confirmed(e) => e.event_id,
            BookingEvent::Cancelled(e) => e.event_id,
            BookingEvent::Accepted(e) => e.event_id,
            BookingEvent::Rejected(e) => e.event_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BookingEvent::Created(e) => e.occurred_at,
            BookingEvent::Updated(e) => e.occurred_at,
            BookingEvent::DateRangeChanged(e) => e.occurred_at,
            BookingEvent::AccommodationsChanged(e) => e.occurred_at,
            BookingEvent::NotesChanged(e) => e.occurred_at,
            BookingEvent::Confirmed(e) => e.occurred_at,
            BookingEvent::Cancelled(e) => e.occurred_at,
            BookingEvent::Accepted(e) => e.occurred_at,
            BookingEvent::Rejected(e) => e.occurred_at,
        }
    }
}

impl RegisteredEvent for BookingEvent {
    const DECODERS: &'static [EventDecoder<Self>] = &[
        EventDecoder::new(Self::CREATED, |v| BookingCreated::deserialize(v).map(BookingEvent::Created)),
        EventDecoder::new(Self::UPDATED, |v| BookingUpdated::deserialize(v).map(BookingEvent::Updated)),
        EventDecoder::new(Self::DATE_RANGE_CHANGED, |v| {
            BookingDateRangeChanged::deserialize(v).map(BookingEvent::DateRangeChanged)
        }),
        EventDecoder::new(Self::ACCOMMODATIONS_CHANGED, |v| {
            BookingAccommodationsChanged::deserialize(v).map(BookingEvent::AccommodationsChanged)
        }),
        EventDecoder::new(Self::NOTES_CHANGED, |v| {
            BookingNotesChanged::deserialize(v).map(BookingEvent::NotesChanged)
        }),
        EventDecoder::new(Self::CONFIRMED, |v| BookingConfirmed::deserialize(v).map(BookingEvent::Confirmed)),
        EventDecoder::new(Self::CANCELLED, |v| BookingCancelled::deserialize(v).map(BookingEvent::Cancelled)),
        EventDecoder::new(Self::ACCEPTED, |v| BookingAccepted::deserialize(v).map(BookingEvent::Accepted)),
        EventDecoder::new(Self::REJECTED, |v| BookingRejected::deserialize(v).map(BookingEvent::Rejected)),
    ];
}

impl Aggregate for Booking {
    type Command = BookingCommand;
    type Event = BookingEvent;
    type Error = DomainError;

    fn empty(id: BookingId) -> Self {
        Self {
            id,
            user_id: None,
            start_date: NaiveDate::MIN,
            end_date: NaiveDate::MIN,
            status: BookingStatus::Pending,
            notes: None,
            items: Vec::new(),
            created: false,
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BookingEvent::Created(e) => {
                self.id = e.booking_id;
                self.user_id = Some(e.user_id);
                self.start_date = e.start_date;
                self.end_date = e.end_date;
                self.status = e.status;
                self.notes = e.notes.clone();
                self.items = e.booking_items.clone();
                self.created = true;
            }
            BookingEvent::Updated(e) => {
                self.start_date = e.start_date;
                self.end_date = e.end_date;
                self.notes = e.notes.clone();
                self.items = e.booking_items.clone();
            }
            BookingEvent::DateRangeChanged(e) => {
                self.start_date = e.new_start_date;
                self.end_date = e.new_end_date;
            }
            BookingEvent::AccommodationsChanged(e) => {
                self.items = apply_changes(&self.items, &e.accommodation_changes);
            }
            BookingEvent::NotesChanged(e) => {
                self.notes = e.new_notes.clone();
            }
            BookingEvent::Confirmed(_) => self.status = BookingStatus::Confirmed,
            BookingEvent::Cancelled(_) => self.status = BookingStatus::Cancelled,
            BookingEvent::Accepted(_) => self.status = BookingStatus::Accepted,
            BookingEvent::Rejected(_) => self.status = BookingStatus::Rejected,
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BookingCommand::Create(cmd) => self.handle_create(cmd),
            BookingCommand::ChangeDateRange(cmd) => {
                self.ensure_modifiable()?;
                Ok(self
                    .date_range_change(cmd.start_date, cmd.end_date, cmd.reason.clone(), cmd.occurred_at)?
                    .into_iter()
                    .collect())
            }
            BookingCommand::ChangeAccommodations(cmd) => {
                self.ensure_modifiable()?;
                Ok(self
                    .accommodations_change(&cmd.items, cmd.occurred_at)?
                    .into_iter()
                    .collect())
            }
            BookingCommand::ChangeNotes(cmd) => {
                self.ensure_modifiable()?;
                Ok(self
                    .notes_change(cmd.notes.clone(), cmd.occurred_at)
                    .into_iter()
                    .collect())
            }
            BookingCommand::Update(cmd) => self.handle_update(cmd),
            BookingCommand::Confirm { occurred_at } => {
                self.ensure_pending("confirm")?;
                Ok(vec![BookingEvent::Confirmed(BookingConfirmed {
                    event_id: Uuid::now_v7(),
                    occurred_at: *occurred_at,
                    booking_id: self.id,
                })])
            }
            BookingCommand::Accept { occurred_at } => {
                self.ensure_pending("accept")?;
                Ok(vec![BookingEvent::Accepted(BookingAccepted {
                    event_id: Uuid::now_v7(),
                    occurred_at: *occurred_at,
                    booking_id: self.id,
                })])
            }
            BookingCommand::Reject { occurred_at } => {
                self.ensure_pending("reject")?;
                Ok(vec![BookingEvent::Rejected(BookingRejected {
                    event_id: Uuid::now_v7(),
                    occurred_at: *occurred_at,
                    booking_id: self.id,
                })])
            }
            BookingCommand::Cancel { occurred_at } => self.handle_cancel(*occurred_at),
        }
    }
}

impl Booking {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_pending(&self, action: &str) -> Result<(), DomainError> {
        self.ensure_created()?;
        if self.status != BookingStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "cannot {action} booking with status {}",
                self.status
            )));
        }
        Ok(())
    }

    fn ensure_modifiable(&self) -> Result<(), DomainError> {
        self.ensure_created()?;
        match self.status {
            BookingStatus::Cancelled | BookingStatus::Completed | BookingStatus::Rejected => {
                Err(DomainError::invalid_state(format!(
                    "cannot modify booking with status {}",
                    self.status
                )))
            }
            _ => Ok(()),
        }
    }

    fn validate_date_range(start: NaiveDate, end: NaiveDate) -> Result<(), DomainError> {
        if end <= start {
            return Err(DomainError::validation("end date must be after start date"));
        }
        Ok(())
    }

    fn validate_items(items: &[BookingItem]) -> Result<(), DomainError> {
        if items.is_empty() {
            return Err(DomainError::validation("at least one booking item is required"));
        }
        for (idx, item) in items.iter().enumerate() {
            if item.person_count == 0 {
                return Err(DomainError::validation(format!(
                    "person count must be greater than 0 (item {idx})"
                )));
            }
            let duplicate = items[..idx]
                .iter()
                .any(|other| other.sleeping_accommodation_id == item.sleeping_accommodation_id);
            if duplicate {
                return Err(DomainError::validation(format!(
                    "accommodation {} is listed more than once",
                    item.sleeping_accommodation_id
                )));
            }
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateBooking) -> Result<Vec<BookingEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invalid_state("booking already exists"));
        }
        Self::validate_date_range(cmd.start_date, cmd.end_date)?;
        Self::validate_items(&cmd.items)?;

        Ok(vec![BookingEvent::Created(BookingCreated {
            event_id: Uuid::now_v7(),
            occurred_at: cmd.occurred_at,
            booking_id: self.id,
            user_id: cmd.user_id,
            start_date: cmd.start_date,
            end_date: cmd.end_date,
            status: BookingStatus::Pending,
            notes: cmd.notes.clone(),
            booking_items: cmd.items.clone(),
        })])
    }

    fn date_range_change(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<BookingEvent>, DomainError> {
        Self::validate_date_range(start, end)?;
        if self.start_date == start && self.end_date == end {
            return Ok(None);
        }

        Ok(Some(BookingEvent::DateRangeChanged(BookingDateRangeChanged {
            event_id: Uuid::now_v7(),
            occurred_at,
            booking_id: self.id,
            previous_start_date: self.start_date,
            previous_end_date: self.end_date,
            new_start_date: start,
            new_end_date: end,
            previous_nights: self.number_of_nights(),
            new_nights: (end - start).num_days(),
            change_reason: reason,
        })))
    }

    fn accommodations_change(
        &self,
        items: &[BookingItem],
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<BookingEvent>, DomainError> {
        Self::validate_items(items)?;
        let changes = diff_items(&self.items, items);
        if changes.is_empty() {
            return Ok(None);
        }

        Ok(Some(BookingEvent::AccommodationsChanged(BookingAccommodationsChanged {
            event_id: Uuid::now_v7(),
            occurred_at,
            booking_id: self.id,
            accommodation_changes: changes,
            previous_total_persons: total_persons(&self.items),
            new_total_persons: total_persons(items),
        })))
    }

    fn notes_change(&self, notes: Option<String>, occurred_at: DateTime<Utc>) -> Option<BookingEvent> {
        if self.notes == notes {
            return None;
        }

        Some(BookingEvent::NotesChanged(BookingNotesChanged {
            event_id: Uuid::now_v7(),
            occurred_at,
            booking_id: self.id,
            previous_notes: self.notes.clone(),
            new_notes: notes,
        }))
    }

    fn handle_update(&self, cmd: &UpdateBooking) -> Result<Vec<BookingEvent>, DomainError> {
        self.ensure_modifiable()?;

        // The three change sets are independent, so all are computed against the
        // current state; the summary event always follows them.
        let mut events = Vec::with_capacity(4);
        events.extend(self.date_range_change(
            cmd.start_date,
            cmd.end_date,
            cmd.reason.clone(),
            cmd.occurred_at,
        )?);
        events.extend(self.accommodations_change(&cmd.items, cmd.occurred_at)?);
        events.extend(self.notes_change(cmd.notes.clone(), cmd.occurred_at));
        events.push(BookingEvent::Updated(BookingUpdated {
            event_id: Uuid::now_v7(),
            occurred_at: cmd.occurred_at,
            booking_id: self.id,
            start_date: cmd.start_date,
            end_date: cmd.end_date,
            notes: cmd.notes.clone(),
            booking_items: cmd.items.clone(),
        }));
        Ok(events)
    }

    fn handle_cancel(&self, occurred_at: DateTime<Utc>) -> Result<Vec<BookingEvent>, DomainError> {
        self.ensure_created()?;
        match self.status {
            BookingStatus::Cancelled => {
                return Err(DomainError::invalid_state("booking is already cancelled"));
            }
            BookingStatus::Completed => {
                return Err(DomainError::invalid_state("cannot cancel a completed booking"));
            }
            _ => {}
        }

        Ok(vec![BookingEvent::Cancelled(BookingCancelled {
            event_id: Uuid::now_v7(),
            occurred_at,
            booking_id: self.id,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunkhouse_accommodations::SleepingAccommodationId;
    use bunkhouse_core::EventSourced;
    use bunkhouse_events::{deserialize_event, registered_event_types, serialize_event};
    use chrono::TimeZone;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, day).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn acc() -> SleepingAccommodationId {
        SleepingAccommodationId::new(AggregateId::new())
    }

    fn create_cmd(items: Vec<BookingItem>) -> BookingCommand {
        BookingCommand::Create(CreateBooking {
            user_id: UserId::new(),
            start_date: date(10),
            end_date: date(13),
            items,
            notes: Some("late arrival".to_string()),
            occurred_at: now(),
        })
    }

    fn created() -> (EventSourced<Booking>, SleepingAccommodationId) {
        let a = acc();
        let mut booking = EventSourced::<Booking>::new(BookingId::new(AggregateId::new()));
        booking.execute(&create_cmd(vec![BookingItem::new(a, 2)])).unwrap();
        (booking, a)
    }

    #[test]
    fn create_starts_pending_with_items() {
        let (booking, a) = created();
        assert_eq!(booking.status(), BookingStatus::Pending);
        assert_eq!(booking.items(), &[BookingItem::new(a, 2)]);
        assert_eq!(booking.number_of_nights(), 3);
        assert_eq!(booking.total_persons(), 2);
    }

    #[test]
    fn create_validates_dates_and_items() {
        let booking = Booking::empty(BookingId::new(AggregateId::new()));

        let same_day = BookingCommand::Create(CreateBooking {
            user_id: UserId::new(),
            start_date: date(10),
            end_date: date(10),
            items: vec![BookingItem::new(acc(), 1)],
            notes: None,
            occurred_at: now(),
        });
        assert!(matches!(booking.handle(&same_day).unwrap_err(), DomainError::Validation(_)));

        assert!(matches!(
            booking.handle(&create_cmd(vec![])).unwrap_err(),
            DomainError::Validation(_)
        ));

        let a = acc();
        let dup = create_cmd(vec![BookingItem::new(a, 1), BookingItem::new(a, 2)]);
        assert!(matches!(booking.handle(&dup).unwrap_err(), DomainError::Validation(_)));

        let zero = create_cmd(vec![BookingItem::new(acc(), 0)]);
        assert!(matches!(booking.handle(&zero).unwrap_err(), DomainError::Validation(_)));
    }

    #[test]
    fn change_date_range_records_nights() {
        let (mut booking, _) = created();
        let events = booking
            .execute(&BookingCommand::ChangeDateRange(ChangeDateRange {
                start_date: date(11),
                end_date: date(15),
                reason: Some("train delayed".to_string()),
                occurred_at: now(),
            }))
            .unwrap()
            .to_vec();

        match &events[..] {
            [BookingEvent::DateRangeChanged(e)] => {
                assert_eq!(e.previous_nights, 3);
                assert_eq!(e.new_nights, 4);
                assert_eq!(e.previous_start_date, date(10));
                assert_eq!(e.change_reason.as_deref(), Some("train delayed"));
            }
            other => panic!("Expected one DateRangeChanged event, got {other:?}"),
        }
        assert_eq!(booking.start_date(), date(11));
    }

    #[test]
    fn unchanged_values_emit_nothing() {
        let (booking, a) = created();
        let same_dates = BookingCommand::ChangeDateRange(ChangeDateRange {
            start_date: date(10),
            end_date: date(13),
            reason: None,
            occurred_at: now(),
        });
        let same_items = BookingCommand::ChangeAccommodations(ChangeAccommodations {
            items: vec![BookingItem::new(a, 2)],
            occurred_at: now(),
        });
        let same_notes = BookingCommand::ChangeNotes(ChangeNotes {
            notes: Some("late arrival".to_string()),
            occurred_at: now(),
        });

        assert!(booking.handle(&same_dates).unwrap().is_empty());
        assert!(booking.handle(&same_items).unwrap().is_empty());
        assert!(booking.handle(&same_notes).unwrap().is_empty());
    }

    #[test]
    fn update_emits_fine_grained_events_then_summary() {
        let (mut booking, a) = created();
        let b = acc();
        let events = booking
            .execute(&BookingCommand::Update(UpdateBooking {
                start_date: date(10),
                end_date: date(14),
                items: vec![BookingItem::new(a, 2), BookingItem::new(b, 1)],
                notes: Some("late arrival".to_string()),
                reason: None,
                occurred_at: now(),
            }))
            .unwrap()
            .to_vec();

        let tags: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            tags,
            vec![
                BookingEvent::DATE_RANGE_CHANGED,
                BookingEvent::ACCOMMODATIONS_CHANGED,
                BookingEvent::UPDATED
            ]
        );
        assert_eq!(booking.total_persons(), 3);
        assert_eq!(booking.end_date(), date(14));
    }

    #[test]
    fn status_transitions_require_pending() {
        let (mut booking, _) = created();
        booking
            .execute(&BookingCommand::Confirm { occurred_at: now() })
            .unwrap();
        assert_eq!(booking.status(), BookingStatus::Confirmed);

        let err = booking
            .handle(&BookingCommand::Accept { occurred_at: now() })
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        booking
            .execute(&BookingCommand::Cancel { occurred_at: now() })
            .unwrap();
        let err = booking
            .handle(&BookingCommand::Cancel { occurred_at: now() })
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn rejected_booking_cannot_be_modified() {
        let (mut booking, _) = created();
        booking
            .execute(&BookingCommand::Reject { occurred_at: now() })
            .unwrap();

        let err = booking
            .handle(&BookingCommand::ChangeNotes(ChangeNotes {
                notes: None,
                occurred_at: now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn replay_reproduces_live_state() {
        let (mut live, a) = created();
        let b = acc();
        live.execute(&BookingCommand::ChangeAccommodations(ChangeAccommodations {
            items: vec![BookingItem::new(b, 3)],
            occurred_at: now(),
        }))
        .unwrap();
        live.execute(&BookingCommand::ChangeNotes(ChangeNotes {
            notes: None,
            occurred_at: now(),
        }))
        .unwrap();
        live.execute(&BookingCommand::Accept { occurred_at: now() })
            .unwrap();

        let mut replayed = EventSourced::<Booking>::new(live.id());
        for (version, event) in live.uncommitted().iter().enumerate() {
            let encoded = serialize_event(event).unwrap();
            let decoded: BookingEvent = deserialize_event(encoded.event_type, &encoded.payload).unwrap();
            replayed.replay(version as u64, &decoded);
        }

        assert_eq!(replayed.state(), live.state());
        assert_eq!(replayed.items(), &[BookingItem::new(b, 3)]);
        assert!(!replayed.items().iter().any(|i| i.sleeping_accommodation_id == a));
        assert_eq!(replayed.version(), Some(3));
    }

    #[test]
    fn every_registered_tag_round_trips() {
        let (mut booking, a) = created();
        booking
            .execute(&BookingCommand::Update(UpdateBooking {
                start_date: date(12),
                end_date: date(14),
                items: vec![BookingItem::new(a, 4)],
                notes: None,
                reason: Some("more friends".to_string()),
                occurred_at: now(),
            }))
            .unwrap();
        booking.execute(&BookingCommand::Confirm { occurred_at: now() }).unwrap();
        booking.execute(&BookingCommand::Cancel { occurred_at: now() }).unwrap();

        let (mut other, _) = created();
        other.execute(&BookingCommand::Accept { occurred_at: now() }).unwrap();
        let (mut third, _) = created();
        third.execute(&BookingCommand::Reject { occurred_at: now() }).unwrap();

        let all: Vec<_> = booking
            .uncommitted()
            .iter()
            .chain(other.uncommitted())
            .chain(third.uncommitted())
            .cloned()
            .collect();

        for tag in registered_event_types::<BookingEvent>() {
            assert!(all.iter().any(|e| e.event_type() == tag), "no sample for {tag}");
        }
        for event in &all {
            let encoded = serialize_event(event).unwrap();
            let decoded: BookingEvent = deserialize_event(encoded.event_type, &encoded.payload).unwrap();
            assert_eq!(&decoded, event);
        }
    }
}
