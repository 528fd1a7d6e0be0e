//! Events and messages.
//!
//! An [`Event`] is a timestamped unit of work held by the [`FutureEventSet`]
//! until it is dispatched. Its kind is a closed set of variants: a [`Message`] delivered
//! to a module's [`handle_event`](crate::model::Model::handle_event) hook, or
//! an [`Action`] closure executed by the kernel.
//!
//! Pending events are totally ordered by time, then priority (lower values
//! first), then insertion sequence.
mod future_event_set;
mod message;

use std::fmt;

use thiserror::Error;

use crate::graph::ComponentId;
use crate::model::{Context, ModelError};
use crate::time::MonotonicTime;

pub use future_event_set::FutureEventSet;
pub use message::{Delivery, HopDelay, Message, Payload};

/// Scheduling priority; lower values are dispatched first among events with
/// the same timestamp.
pub type Priority = i16;

/// Identity of a scheduled event.
///
/// The identifier is assigned when the event is first inserted into the future
/// event set and survives re-scheduling of the same event.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the numeric value of the identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type ActionFn = Box<dyn FnOnce(&mut Context<'_>) -> Result<(), ModelError>>;

/// A named closure executed by the kernel in the context of the root module.
pub struct Action {
    name: String,
    f: ActionFn,
}

impl Action {
    /// Creates a new action.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(&mut Context<'_>) -> Result<(), ModelError> + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }

    /// Returns the name of the action.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn execute(self, cx: &mut Context<'_>) -> Result<(), ModelError> {
        (self.f)(cx)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The payload of an event.
#[derive(Debug)]
pub enum EventKind {
    /// A message delivered to a module.
    Message(Box<Message>),
    /// A closure run by the kernel.
    Action(Action),
}

/// A schedulable unit of work.
#[derive(Debug)]
pub struct Event {
    id: Option<EventId>,
    time: MonotonicTime,
    priority: Priority,
    sequence: u64,
    kind: EventKind,
}

impl Event {
    /// Creates an action event with default priority.
    pub fn action<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(&mut Context<'_>) -> Result<(), ModelError> + 'static,
    {
        Self::new(EventKind::Action(Action::new(name, f)), 0)
    }

    fn new(kind: EventKind, priority: Priority) -> Self {
        Self {
            id: None,
            time: MonotonicTime::EPOCH,
            priority,
            sequence: 0,
            kind,
        }
    }

    /// Sets the scheduling priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        if let EventKind::Message(message) = &mut self.kind {
            message.set_priority(priority);
        }
        self
    }

    /// Returns the identity assigned when the event was first scheduled.
    pub fn id(&self) -> Option<EventId> {
        self.id
    }

    /// Returns the timestamp of the event.
    ///
    /// This is only meaningful once the event has been scheduled.
    pub fn time(&self) -> MonotonicTime {
        self.time
    }

    /// Returns the scheduling priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the insertion sequence number, the final tie-breaker.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the name of the message or action.
    pub fn name(&self) -> &str {
        match &self.kind {
            EventKind::Message(message) => message.name(),
            EventKind::Action(action) => action.name(),
        }
    }

    /// Returns the payload of the event.
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Returns `true` if the event is a message.
    pub fn is_message(&self) -> bool {
        matches!(self.kind, EventKind::Message(_))
    }

    /// Returns the message, if the event is one.
    pub fn as_message(&self) -> Option<&Message> {
        match &self.kind {
            EventKind::Message(message) => Some(message),
            EventKind::Action(_) => None,
        }
    }

    /// Returns the message mutably, if the event is one.
    pub fn as_message_mut(&mut self) -> Option<&mut Message> {
        match &mut self.kind {
            EventKind::Message(message) => Some(message),
            EventKind::Action(_) => None,
        }
    }

    /// Extracts the message, if the event is one.
    pub fn into_message(self) -> Option<Message> {
        match self.kind {
            EventKind::Message(message) => Some(*message),
            EventKind::Action(_) => None,
        }
    }

    /// Returns the module the event is delivered to, `None` for actions.
    pub fn target(&self) -> Option<ComponentId> {
        self.as_message().and_then(Message::arrival_module)
    }

    pub(crate) fn into_kind(self) -> EventKind {
        self.kind
    }

    pub(crate) fn set_time(&mut self, time: MonotonicTime) {
        self.time = time;
    }

    pub(crate) fn set_id(&mut self, id: EventId) {
        self.id = Some(id);
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }
}

impl From<Message> for Event {
    fn from(message: Message) -> Self {
        let priority = message.priority();

        Self::new(EventKind::Message(Box::new(message)), priority)
    }
}

impl From<Action> for Event {
    fn from(action: Action) -> Self {
        Self::new(EventKind::Action(action), 0)
    }
}

/// An error returned when an event cannot be scheduled.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchedulingError {
    /// The scheduled time lies in the past.
    #[error("cannot schedule an event at {scheduled:?}, before the current time {now:?}")]
    InvalidScheduledTime {
        /// Requested time.
        scheduled: MonotonicTime,
        /// Current simulation time.
        now: MonotonicTime,
    },
    /// A message scheduled from outside of a model has no target module.
    #[error("message `{0}` has no target module")]
    NoTarget(String),
}
