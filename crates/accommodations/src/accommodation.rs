use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bunkhouse_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use bunkhouse_events::{Event, EventDecoder, RegisteredEvent};

/// Sleeping accommodation identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SleepingAccommodationId(pub AggregateId);

impl SleepingAccommodationId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl From<AggregateId> for SleepingAccommodationId {
    fn from(value: AggregateId) -> Self {
        Self(value)
    }
}

impl From<SleepingAccommodationId> for AggregateId {
    fn from(value: SleepingAccommodationId) -> Self {
        value.0
    }
}

impl core::fmt::Display for SleepingAccommodationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccommodationType {
    Room,
    Tent,
    Camper,
    Other,
}

impl AccommodationType {
    pub fn as_str(self) -> &'static str {
        match self {
            AccommodationType::Room => "Room",
            AccommodationType::Tent => "Tent",
            AccommodationType::Camper => "Camper",
            AccommodationType::Other => "Other",
        }
    }
}

impl core::str::FromStr for AccommodationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Room" => Ok(AccommodationType::Room),
            "Tent" => Ok(AccommodationType::Tent),
            "Camper" => Ok(AccommodationType::Camper),
            "Other" => Ok(AccommodationType::Other),
            other => Err(DomainError::validation(format!(
                "unknown accommodation type '{other}'"
            ))),
        }
    }
}

/// Aggregate root: SleepingAccommodation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepingAccommodation {
    id: SleepingAccommodationId,
    name: String,
    accommodation_type: AccommodationType,
    max_capacity: u32,
    is_active: bool,
    created_at: Option<DateTime<Utc>>,
    changed_at: Option<DateTime<Utc>>,
    created: bool,
}

impl SleepingAccommodation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accommodation_type(&self) -> AccommodationType {
        self.accommodation_type
    }

    pub fn max_capacity(&self) -> u32 {
        self.max_capacity
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        self.changed_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for SleepingAccommodation {
    type Id = SleepingAccommodationId;
    const AGGREGATE_TYPE: &'static str = "SleepingAccommodationAggregate";

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Command: CreateAccommodation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccommodation {
    pub name: String,
    pub accommodation_type: AccommodationType,
    pub max_capacity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateAccommodationDetails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAccommodationDetails {
    pub name: String,
    pub accommodation_type: AccommodationType,
    pub max_capacity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccommodationCommand {
    Create(CreateAccommodation),
    UpdateDetails(UpdateAccommodationDetails),
    Deactivate { occurred_at: DateTime<Utc> },
    Reactivate { occurred_at: DateTime<Utc> },
}

/// Event: SleepingAccommodationCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepingAccommodationCreated {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub sleeping_accommodation_id: SleepingAccommodationId,
    pub name: String,
    #[serde(rename = "type")]
    pub accommodation_type: AccommodationType,
    pub max_capacity: u32,
    pub is_active: bool,
}

impl SleepingAccommodationCreated {
    pub const EVENT_TYPE: &'static str = "SleepingAccommodationCreated";
}

/// Event: SleepingAccommodationUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepingAccommodationUpdated {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub sleeping_accommodation_id: SleepingAccommodationId,
    pub name: String,
    #[serde(rename = "type")]
    pub accommodation_type: AccommodationType,
    pub max_capacity: u32,
}

impl SleepingAccommodationUpdated {
    pub const EVENT_TYPE: &'static str = "SleepingAccommodationUpdated";
}

/// Event: SleepingAccommodationDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepingAccommodationDeactivated {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub sleeping_accommodation_id: SleepingAccommodationId,
}

impl SleepingAccommodationDeactivated {
    pub const EVENT_TYPE: &'static str = "SleepingAccommodationDeactivated";
}

/// Event: SleepingAccommodationReactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepingAccommodationReactivated {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub sleeping_accommodation_id: SleepingAccommodationId,
}

impl SleepingAccommodationReactivated {
    pub const EVENT_TYPE: &'static str = "SleepingAccommodationReactivated";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AccommodationEvent {
    Created(SleepingAccommodationCreated),
    Updated(SleepingAccommodationUpdated),
    Deactivated(SleepingAccommodationDeactivated),
    Reactivated(SleepingAccommodationReactivated),
}

impl Event for AccommodationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccommodationEvent::Created(_) => SleepingAccommodationCreated::EVENT_TYPE,
            AccommodationEvent::Updated(_) => SleepingAccommodationUpdated::EVENT_TYPE,
            AccommodationEvent::Deactivated(_) => SleepingAccommodationDeactivated::EVENT_TYPE,
            AccommodationEvent::Reactivated(_) => SleepingAccommodationReactivated::EVENT_TYPE,
        }
    }

    fn event_id(&self) -> Uuid {
        match self {
            AccommodationEvent::Created(e) => e.event_id,
            AccommodationEvent::Updated(e) => e.event_id,
            AccommodationEvent::Deactivated(e) => e.event_id,
            AccommodationEvent::Reactivated(e) => e.event_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccommodationEvent::Created(e) => e.occurred_at,
            AccommodationEvent::Updated(e) => e.occurred_at,
            AccommodationEvent::Deactivated(e) => e.occurred_at,
            AccommodationEvent::Reactivated(e) => e.occurred_at,
        }
    }
}

impl RegisteredEvent for AccommodationEvent {
    const DECODERS: &'static [EventDecoder<Self>] = &[
        EventDecoder::new(SleepingAccommodationCreated::EVENT_TYPE, |v| {
            SleepingAccommodationCreated::deserialize(v).map(AccommodationEvent::Created)
        }),
        EventDecoder::new(SleepingAccommodationUpdated::EVENT_TYPE, |v| {
            SleepingAccommodationUpdated::deserialize(v).map(AccommodationEvent::Updated)
        }),
        EventDecoder::new(SleepingAccommodationDeactivated::EVENT_TYPE, |v| {
            SleepingAccommodationDeactivated::deserialize(v).map(AccommodationEvent::Deactivated)
        }),
        EventDecoder::new(SleepingAccommodationReactivated::EVENT_TYPE, |v| {
            SleepingAccommodationReactivated::deserialize(v).map(AccommodationEvent::Reactivated)
        }),
    ];
}

impl Aggregate for SleepingAccommodation {
    type Command = AccommodationCommand;
    type Event = AccommodationEvent;
    type Error = DomainError;

    fn empty(id: SleepingAccommodationId) -> Self {
        Self {
            id,
            name: String::new(),
            accommodation_type: AccommodationType::Room,
            max_capacity: 0,
            is_active: false,
            created_at: None,
            changed_at: None,
            created: false,
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccommodationEvent::Created(e) => {
                self.id = e.sleeping_accommodation_id;
                self.name = e.name.clone();
                self.accommodation_type = e.accommodation_type;
                self.max_capacity = e.max_capacity;
                self.is_active = e.is_active;
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            AccommodationEvent::Updated(e) => {
                self.name = e.name.clone();
                self.accommodation_type = e.accommodation_type;
                self.max_capacity = e.max_capacity;
                self.changed_at = Some(e.occurred_at);
            }
            AccommodationEvent::Deactivated(e) => {
                self.is_active = false;
                self.changed_at = Some(e.occurred_at);
            }
            AccommodationEvent::Reactivated(e) => {
                self.is_active = true;
                self.changed_at = Some(e.occurred_at);
            }
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AccommodationCommand::Create(cmd) => self.handle_create(cmd),
            AccommodationCommand::UpdateDetails(cmd) => self.handle_update(cmd),
            AccommodationCommand::Deactivate { occurred_at } => self.handle_deactivate(*occurred_at),
            AccommodationCommand::Reactivate { occurred_at } => self.handle_reactivate(*occurred_at),
        }
    }
}

impl SleepingAccommodation {
    fn validate_details(name: &str, max_capacity: u32) -> Result<(), DomainError> {
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if max_capacity == 0 {
            return Err(DomainError::validation("max capacity must be greater than 0"));
        }
        Ok(())
    }

    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateAccommodation) -> Result<Vec<AccommodationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invalid_state("sleeping accommodation already exists"));
        }
        Self::validate_details(&cmd.name, cmd.max_capacity)?;

        Ok(vec![AccommodationEvent::Created(SleepingAccommodationCreated {
            event_id: Uuid::now_v7(),
            occurred_at: cmd.occurred_at,
            sleeping_accommodation_id: self.id,
            name: cmd.name.clone(),
            accommodation_type: cmd.accommodation_type,
            max_capacity: cmd.max_capacity,
            is_active: true,
        })])
    }

    fn handle_update(
        &self,
        cmd: &UpdateAccommodationDetails,
    ) -> Result<Vec<AccommodationEvent>, DomainError> {
        self.ensure_created()?;
        Self::validate_details(&cmd.name, cmd.max_capacity)?;

        let unchanged = self.name == cmd.name
            && self.accommodation_type == cmd.accommodation_type
            && self.max_capacity == cmd.max_capacity;
        if unchanged {
            return Ok(vec![]);
        }

        Ok(vec![AccommodationEvent::Updated(SleepingAccommodationUpdated {
            event_id: Uuid::now_v7(),
            occurred_at: cmd.occurred_at,
            sleeping_accommodation_id: self.id,
            name: cmd.name.clone(),
            accommodation_type: cmd.accommodation_type,
            max_capacity: cmd.max_capacity,
        })])
    }

    fn handle_deactivate(&self, occurred_at: DateTime<Utc>) -> Result<Vec<AccommodationEvent>, DomainError> {
        self.ensure_created()?;
        if !self.is_active {
            return Err(DomainError::invalid_state("sleeping accommodation is already inactive"));
        }

        Ok(vec![AccommodationEvent::Deactivated(SleepingAccommodationDeactivated {
            event_id: Uuid::now_v7(),
            occurred_at,
            sleeping_accommodation_id: self.id,
        })])
    }

    fn handle_reactivate(&self, occurred_at: DateTime<Utc>) -> Result<Vec<AccommodationEvent>, DomainError> {
        self.ensure_created()?;
        if self.is_active {
            return Err(DomainError::invalid_state("sleeping accommodation is already active"));
        }

        Ok(vec![AccommodationEvent::Reactivated(SleepingAccommodationReactivated {
            event_id: Uuid::now_v7(),
            occurred_at,
            sleeping_accommodation_id: self.id,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunkhouse_core::EventSourced;
    use bunkhouse_events::{deserialize_event, registered_event_types, serialize_event};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn test_id() -> SleepingAccommodationId {
        SleepingAccommodationId::new(AggregateId::new())
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn create_cmd(name: &str, max_capacity: u32) -> AccommodationCommand {
        AccommodationCommand::Create(CreateAccommodation {
            name: name.to_string(),
            accommodation_type: AccommodationType::Room,
            max_capacity,
            occurred_at: at(8),
        })
    }

    fn created() -> EventSourced<SleepingAccommodation> {
        let mut acc = EventSourced::<SleepingAccommodation>::new(test_id());
        acc.execute(&create_cmd("Dormitory", 6)).unwrap();
        acc
    }

    #[test]
    fn create_emits_active_created_event() {
        let acc = created();
        assert_eq!(acc.uncommitted().len(), 1);

        match &acc.uncommitted()[0] {
            AccommodationEvent::Created(e) => {
                assert_eq!(e.sleeping_accommodation_id, acc.id());
                assert_eq!(e.name, "Dormitory");
                assert_eq!(e.max_capacity, 6);
                assert!(e.is_active);
            }
            _ => panic!("Expected Created event"),
        }
        assert!(acc.is_active());
        assert_eq!(acc.created_at(), Some(at(8)));
        assert_eq!(acc.changed_at(), None);
    }

    #[test]
    fn create_rejects_blank_name_and_zero_capacity() {
        let acc = SleepingAccommodation::empty(test_id());

        let err = acc.handle(&create_cmd("  ", 2)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let err = acc.handle(&create_cmd("Tent A", 0)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_twice_is_rejected() {
        let acc = created();
        let err = acc.handle(&create_cmd("Again", 2)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn update_without_changes_emits_nothing() {
        let acc = created();
        let events = acc
            .handle(&AccommodationCommand::UpdateDetails(UpdateAccommodationDetails {
                name: "Dormitory".to_string(),
                accommodation_type: AccommodationType::Room,
                max_capacity: 6,
                occurred_at: at(9),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn update_sets_changed_at() {
        let mut acc = created();
        acc.execute(&AccommodationCommand::UpdateDetails(UpdateAccommodationDetails {
            name: "Big Dormitory".to_string(),
            accommodation_type: AccommodationType::Room,
            max_capacity: 10,
            occurred_at: at(9),
        }))
        .unwrap();

        assert_eq!(acc.name(), "Big Dormitory");
        assert_eq!(acc.max_capacity(), 10);
        assert_eq!(acc.changed_at(), Some(at(9)));
    }

    #[test]
    fn commands_on_missing_accommodation_are_not_found() {
        let acc = SleepingAccommodation::empty(test_id());
        let err = acc
            .handle(&AccommodationCommand::Deactivate { occurred_at: at(9) })
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn deactivate_and_reactivate_guard_current_state() {
        let mut acc = created();

        let err = acc
            .handle(&AccommodationCommand::Reactivate { occurred_at: at(9) })
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        acc.execute(&AccommodationCommand::Deactivate { occurred_at: at(10) })
            .unwrap();
        assert!(!acc.is_active());

        let err = acc
            .handle(&AccommodationCommand::Deactivate { occurred_at: at(11) })
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        acc.execute(&AccommodationCommand::Reactivate { occurred_at: at(12) })
            .unwrap();
        assert!(acc.is_active());
        assert_eq!(acc.changed_at(), Some(at(12)));
    }

    #[test]
    fn every_registered_tag_decodes_its_own_payload() {
        let mut acc = created();
        acc.execute(&AccommodationCommand::UpdateDetails(UpdateAccommodationDetails {
            name: "Tent".to_string(),
            accommodation_type: AccommodationType::Tent,
            max_capacity: 2,
            occurred_at: at(9),
        }))
        .unwrap();
        acc.execute(&AccommodationCommand::Deactivate { occurred_at: at(10) })
            .unwrap();
        acc.execute(&AccommodationCommand::Reactivate { occurred_at: at(11) })
            .unwrap();

        let emitted: Vec<_> = acc.uncommitted().iter().map(|e| e.event_type()).collect();
        let registered: Vec<_> = registered_event_types::<AccommodationEvent>().collect();
        assert_eq!(emitted, registered);

        for event in acc.uncommitted() {
            let encoded = serialize_event(event).unwrap();
            let decoded: AccommodationEvent =
                deserialize_event(encoded.event_type, &encoded.payload).unwrap();
            assert_eq!(&decoded, event);
        }
    }

    #[test]
    fn created_payload_uses_type_field_name() {
        let acc = created();
        let encoded = serialize_event(&acc.uncommitted()[0]).unwrap();
        assert_eq!(encoded.payload["type"], "Room");
        assert_eq!(encoded.payload["maxCapacity"], 6);
        assert_eq!(encoded.payload["isActive"], true);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Update(String, u32),
        Deactivate,
        Reactivate,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            ("[a-z ]{0,8}", 0u32..5).prop_map(|(n, c)| Op::Update(n, c)),
            Just(Op::Deactivate),
            Just(Op::Reactivate),
        ]
    }

    proptest! {
        #[test]
        fn replay_reproduces_state_after_every_command(ops in prop::collection::vec(op_strategy(), 0..20)) {
            let id = test_id();
            let mut live = EventSourced::<SleepingAccommodation>::new(id);
            live.execute(&create_cmd("Start", 3)).unwrap();

            let mut snapshots = vec![(live.uncommitted().len(), live.state().clone())];
            for (i, op) in ops.into_iter().enumerate() {
                let occurred_at = at(0) + chrono::Duration::minutes(i as i64 + 1);
                let cmd = match op {
                    Op::Update(name, max_capacity) => AccommodationCommand::UpdateDetails(UpdateAccommodationDetails {
                        name,
                        accommodation_type: AccommodationType::Other,
                        max_capacity,
                        occurred_at,
                    }),
                    Op::Deactivate => AccommodationCommand::Deactivate { occurred_at },
                    Op::Reactivate => AccommodationCommand::Reactivate { occurred_at },
                };
                let _ = live.execute(&cmd);
                snapshots.push((live.uncommitted().len(), live.state().clone()));
            }

            let history = live.uncommitted().to_vec();
            for (count, expected) in snapshots {
                let mut replayed = EventSourced::<SleepingAccommodation>::new(id);
                for (version, event) in history[..count].iter().enumerate() {
                    replayed.replay(version as u64, event);
                }
                prop_assert_eq!(replayed.state(), &expected);
            }
        }
    }
}
