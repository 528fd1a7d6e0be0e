use std::any::Any;
use std::fmt;
use std::time::Duration;

use dyn_clone::DynClone;

use super::Priority;
use crate::graph::{ComponentId, GateId};
use crate::time::MonotonicTime;

/// User data attached to a [`Message`].
///
/// This trait is implemented for every `'static` type that is `Clone` and
/// `Debug`, so it never needs to be implemented manually.
pub trait Payload: Any + DynClone + fmt::Debug {
    /// Upcasts to `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Upcasts to `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Upcasts to `Box<dyn Any>`.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any + Clone + fmt::Debug> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

dyn_clone::clone_trait_object!(Payload);

/// How a message reached (or will reach) its arrival module.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// The message was never scheduled.
    #[default]
    Unsent,
    /// Scheduled by a module to itself.
    SelfMessage,
    /// Sent through a chain of connected gates.
    Gate,
    /// Sent directly to an input gate.
    Direct,
    /// Inserted from outside of the simulation.
    External,
}

/// Delay contributed by one connection of a gate chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HopDelay {
    /// Source gate of the connection.
    pub gate: GateId,
    /// Propagation delay of the channel.
    pub propagation_delay: Duration,
    /// Transmission duration of the message over the channel.
    pub transmission_duration: Duration,
}

/// An event that travels between modules.
#[derive(Clone, Debug)]
pub struct Message {
    name: String,
    kind: i16,
    priority: Priority,
    bit_length: u64,
    payload: Option<Box<dyn Payload>>,
    sender_module: Option<ComponentId>,
    sender_gate: Option<GateId>,
    arrival_module: Option<ComponentId>,
    arrival_gate: Option<GateId>,
    sending_time: MonotonicTime,
    hops: Vec<HopDelay>,
    delivery: Delivery,
}

impl Message {
    /// Creates an empty message.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: 0,
            priority: 0,
            bit_length: 0,
            payload: None,
            sender_module: None,
            sender_gate: None,
            arrival_module: None,
            arrival_gate: None,
            sending_time: MonotonicTime::EPOCH,
            hops: Vec::new(),
            delivery: Delivery::Unsent,
        }
    }

    /// Sets the user-defined message kind.
    pub fn with_kind(mut self, kind: i16) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the scheduling priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the length in bits, used to compute transmission durations.
    pub fn with_bit_length(mut self, bit_length: u64) -> Self {
        self.bit_length = bit_length;
        self
    }

    /// Attaches a payload.
    pub fn with_payload<T: Payload>(mut self, payload: T) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    /// Returns the name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the user-defined kind.
    pub fn kind(&self) -> i16 {
        self.kind
    }

    /// Returns the scheduling priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the length in bits.
    pub fn bit_length(&self) -> u64 {
        self.bit_length
    }

    /// Returns the payload if it has type `T`.
    pub fn payload<T: Payload>(&self) -> Option<&T> {
        self.payload
            .as_deref()
            .and_then(|payload| payload.as_any().downcast_ref())
    }

    /// Returns the payload mutably if it has type `T`.
    pub fn payload_mut<T: Payload>(&mut self) -> Option<&mut T> {
        self.payload
            .as_deref_mut()
            .and_then(|payload| payload.as_any_mut().downcast_mut())
    }

    /// Removes and returns the payload if it has type `T`.
    ///
    /// A payload of another type is left in place.
    pub fn take_payload<T: Payload>(&mut self) -> Option<T> {
        if !self.payload.as_deref()?.as_any().is::<T>() {
            return None;
        }

        self.payload
            .take()
            .and_then(|payload| payload.into_any().downcast().ok())
            .map(|payload| *payload)
    }

    /// Returns `true` if a payload is attached.
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Returns the module that sent the message.
    pub fn sender_module(&self) -> Option<ComponentId> {
        self.sender_module
    }

    /// Returns the gate the message was sent through.
    pub fn sender_gate(&self) -> Option<GateId> {
        self.sender_gate
    }

    /// Returns the module the message is delivered to.
    pub fn arrival_module(&self) -> Option<ComponentId> {
        self.arrival_module
    }

    /// Returns the gate the message arrives on; `None` for self-messages.
    pub fn arrival_gate(&self) -> Option<GateId> {
        self.arrival_gate
    }

    /// Returns the time at which the message was sent or scheduled.
    pub fn sending_time(&self) -> MonotonicTime {
        self.sending_time
    }

    /// Returns the per-connection delays of a gate send.
    pub fn hops(&self) -> &[HopDelay] {
        &self.hops
    }

    /// Returns how the message was delivered.
    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Returns `true` if the message was scheduled by a module to itself.
    pub fn is_self_message(&self) -> bool {
        self.delivery == Delivery::SelfMessage
    }

    pub(super) fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    /// Stamps the message before it enters the future event set.
    pub(crate) fn set_route(
        &mut self,
        delivery: Delivery,
        sender: (Option<ComponentId>, Option<GateId>),
        arrival: (ComponentId, Option<GateId>),
        sending_time: MonotonicTime,
        hops: Vec<HopDelay>,
    ) {
        self.delivery = delivery;
        (self.sender_module, self.sender_gate) = sender;
        self.arrival_module = Some(arrival.0);
        self.arrival_gate = arrival.1;
        self.sending_time = sending_time;
        self.hops = hops;
    }
}
