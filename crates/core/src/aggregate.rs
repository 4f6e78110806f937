//! Aggregate root traits for event-sourced domain models.

use core::fmt;
use core::ops::Deref;

use crate::id::AggregateId;

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier, convertible to the stream id.
    type Id: Copy + Eq + core::hash::Hash + fmt::Debug + Into<AggregateId> + From<AggregateId>;

    /// Stable aggregate type name stored beside every event of the stream.
    const AGGREGATE_TYPE: &'static str;

    /// Returns the aggregate identifier.
    fn id(&self) -> Self::Id;
}

/// Optimistic concurrency expectation for an append.
///
/// Stream versions are 0-based and gap-free; `NoStream` is the "-1" position of
/// an aggregate that has no events yet.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExpectedVersion {
    /// The stream must not exist yet.
    NoStream,
    /// The last stored event must carry exactly this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation matching a stream whose last version is `current`.
    pub fn from_current(current: Option<u64>) -> Self {
        match current {
            Some(v) => ExpectedVersion::Exact(v),
            None => ExpectedVersion::NoStream,
        }
    }

    /// The stream position this expectation refers to (`None` for `NoStream`).
    pub fn current(self) -> Option<u64> {
        match self {
            ExpectedVersion::NoStream => None,
            ExpectedVersion::Exact(v) => Some(v),
        }
    }

    pub fn matches(self, actual: Option<u64>) -> bool {
        self.current() == actual
    }

    /// Version assigned to the first event appended under this expectation.
    pub fn next_version(self) -> u64 {
        match self {
            ExpectedVersion::NoStream => 0,
            ExpectedVersion::Exact(v) => v + 1,
        }
    }

    /// Signed representation used in storage and messages (`-1` for `NoStream`).
    pub fn as_i64(self) -> i64 {
        match self {
            ExpectedVersion::NoStream => -1,
            ExpectedVersion::Exact(v) => v as i64,
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` validates and returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// `apply` is a closed transition function over the aggregate's event enum; it
/// must not fail and must not perform IO.
pub trait Aggregate: AggregateRoot + Sized {
    type Command: fmt::Debug;
    type Event: Clone + fmt::Debug;
    type Error: fmt::Debug;

    /// Create an empty, not-yet-created instance for rehydration.
    fn empty(id: Self::Id) -> Self;

    /// Evolve in-memory state from a single event.
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    ///
    /// Returning an empty vector is valid (e.g. an update that changes nothing).
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

/// An aggregate together with its stream position and the events raised since load.
///
/// `version` is the version of the last persisted event (`None` for a new aggregate).
/// Commands are applied immediately, so callers only ever observe post-mutation state;
/// the raised events stay buffered until the repository commits them.
#[derive(Debug, Clone)]
pub struct EventSourced<A: Aggregate> {
    state: A,
    version: Option<u64>,
    uncommitted: Vec<A::Event>,
}

impl<A: Aggregate> EventSourced<A> {
    /// A brand-new aggregate with no history.
    pub fn new(id: A::Id) -> Self {
        Self {
            state: A::empty(id),
            version: None,
            uncommitted: Vec::new(),
        }
    }

    /// Replay one persisted event during rehydration.
    pub fn replay(&mut self, version: u64, event: &A::Event) {
        self.state.apply(event);
        self.version = Some(version);
    }

    /// Run a command: validate, apply every resulting event, buffer them for `Save`.
    pub fn execute(&mut self, command: &A::Command) -> Result<&[A::Event], A::Error> {
        let events = self.state.handle(command)?;
        let start = self.uncommitted.len();
        for event in events {
            self.state.apply(&event);
            self.uncommitted.push(event);
        }
        Ok(&self.uncommitted[start..])
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn is_new(&self) -> bool {
        self.version.is_none()
    }

    /// Expected version to present to the event store on the next append.
    pub fn expected_version(&self) -> ExpectedVersion {
        ExpectedVersion::from_current(self.version)
    }

    pub fn uncommitted(&self) -> &[A::Event] {
        &self.uncommitted
    }

    /// Clear the buffer after a successful append ending at `last_version`.
    pub fn mark_committed(&mut self, last_version: u64) {
        self.uncommitted.clear();
        self.version = Some(last_version);
    }
}

impl<A: Aggregate> Deref for EventSourced<A> {
    type Target = A;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}
