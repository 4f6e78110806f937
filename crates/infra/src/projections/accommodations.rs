use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bunkhouse_accommodations::{
    AccommodationEvent, AccommodationType, SleepingAccommodation, SleepingAccommodationCreated,
    SleepingAccommodationDeactivated, SleepingAccommodationId, SleepingAccommodationReactivated,
    SleepingAccommodationUpdated,
};
use bunkhouse_core::{AggregateId, AggregateRoot};
use bunkhouse_events::Event;

use super::{EventApplier, ProjectedReadModel};
use crate::read_model::ReadModel;

/// Queryable sleeping accommodation: current details and availability flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepingAccommodationReadModel {
    pub id: SleepingAccommodationId,
    pub name: String,
    #[serde(rename = "type")]
    pub accommodation_type: AccommodationType,
    pub max_capacity: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub changed_at: Option<DateTime<Utc>>,
    pub last_event_version: Option<u64>,
}

impl ReadModel for SleepingAccommodationReadModel {
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

impl ProjectedReadModel for SleepingAccommodationReadModel {
    type Event = AccommodationEvent;

    const NAME: &'static str = "SleepingAccommodationReadModel";
    const AGGREGATE_TYPE: &'static str = SleepingAccommodation::AGGREGATE_TYPE;
    const APPLIERS: &'static [EventApplier<Self, Self::Event>] = &[
        EventApplier::new(SleepingAccommodationCreated::EVENT_TYPE, apply_created),
        EventApplier::new(SleepingAccommodationUpdated::EVENT_TYPE, apply_updated),
        EventApplier::new(SleepingAccommodationDeactivated::EVENT_TYPE, apply_deactivated),
        EventApplier::new(SleepingAccommodationReactivated::EVENT_TYPE, apply_reactivated),
    ];

    fn empty(id: AggregateId) -> Self {
        Self {
            id: SleepingAccommodationId::new(id),
            name: String::new(),
            accommodation_type: AccommodationType::Room,
            max_capacity: 0,
            is_active: true,
            created_at: DateTime::<Utc>::default(),
            changed_at: None,
            last_event_version: None,
        }
    }
}

fn unexpected(expected: &str, got: &AccommodationEvent) -> String {
    format!("expected {expected}, got {}", got.event_type())
}

fn apply_created(model: &mut SleepingAccommodationReadModel, event: &AccommodationEvent) -> Result<(), String> {
    let AccommodationEvent::Created(e) = event else {
        return Err(unexpected(SleepingAccommodationCreated::EVENT_TYPE, event));
    };
    model.id = e.sleeping_accommodation_id;
    model.name = e.name.clone();
    model.accommodation_type = e.accommodation_type;
    model.max_capacity = e.max_capacity;
    model.is_active = e.is_active;
    model.created_at = e.occurred_at;
    model.changed_at = None;
    Ok(())
}

fn apply_updated(model: &mut SleepingAccommodationReadModel, event: &AccommodationEvent) -> Result<(), String> {
    let AccommodationEvent::Updated(e) = event else {
        return Err(unexpected(SleepingAccommodationUpdated::EVENT_TYPE, event));
    };
    model.name = e.name.clone();
    model.accommodation_type = e.accommodation_type;
    model.max_capacity = e.max_capacity;
    model.changed_at = Some(e.occurred_at);
    Ok(())
}

fn apply_deactivated(model: &mut SleepingAccommodationReadModel, event: &AccommodationEvent) -> Result<(), String> {
    let AccommodationEvent::Deactivated(e) = event else {
        return Err(unexpected(SleepingAccommodationDeactivated::EVENT_TYPE, event));
    };
    model.is_active = false;
    model.changed_at = Some(e.occurred_at);
    Ok(())
}

fn apply_reactivated(model: &mut SleepingAccommodationReadModel, event: &AccommodationEvent) -> Result<(), String> {
    let AccommodationEvent::Reactivated(e) = event else {
        return Err(unexpected(SleepingAccommodationReactivated::EVENT_TYPE, event));
    };
    model.is_active = true;
    model.changed_at = Some(e.occurred_at);
    Ok(())
}
