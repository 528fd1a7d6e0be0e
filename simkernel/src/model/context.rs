use std::fmt;
use std::time::Duration;

use crate::event::{Event, EventId, Message, SchedulingError};
use crate::graph::{Channel, ComponentId, GateId, GateType, GraphError, ModuleGraph, ParamValue};
use crate::simulation::kernel::Kernel;
use crate::time::MonotonicTime;

use super::{ModelError, SendError};

/// A local context for models.
///
/// A `Context` is passed to every [`Model`](super::Model) hook and is bound to
/// the module whose hook is running. It gives access to the simulation time,
/// to the module graph and to the scheduling, sending and structural
/// operations of the kernel.
///
/// All changes made through a context take effect immediately: an event
/// scheduled or a module created by a hook is visible to the next dispatch.
///
/// # Examples
///
/// A source that emits a frame through its `out` gate and re-arms a timer.
///
/// ```
/// use std::time::Duration;
/// use simkernel::event::{Event, Message};
/// use simkernel::graph::GateType;
/// use simkernel::model::{Context, Model, ModelError};
///
/// pub struct Source {
///     period: Duration,
/// }
///
/// impl Model for Source {
///     fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
///         cx.add_gate("out", GateType::Output, None)?;
///         if let Some(millis) = cx.parameter("period_ms").and_then(|p| p.as_int()) {
///             self.period = Duration::from_millis(millis as u64);
///         }
///
///         Ok(())
///     }
///
///     fn initialize(&mut self, _stage: usize, cx: &mut Context<'_>) -> Result<(), ModelError> {
///         cx.schedule_in(self.period, Message::new("timer"))?;
///
///         Ok(())
///     }
///
///     fn handle_event(&mut self, event: Event, cx: &mut Context<'_>) -> Result<(), ModelError> {
///         let out = cx.gate("out", None)?;
///         let frame = Message::new(format!("frame@{:?}", cx.time())).with_bit_length(8_000);
///         cx.send(frame, out)?;
///         cx.schedule_in(self.period, event)?;
///
///         Ok(())
///     }
/// }
/// ```
pub struct Context<'a> {
    kernel: &'a mut Kernel,
    module: ComponentId,
}

impl<'a> Context<'a> {
    pub(crate) fn new(kernel: &'a mut Kernel, module: ComponentId) -> Self {
        Self { kernel, module }
    }

    /// Returns the identifier of the module this context is bound to.
    pub fn module_id(&self) -> ComponentId {
        self.module
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> MonotonicTime {
        self.kernel.time
    }

    /// Returns the number of events dispatched so far, the current one
    /// included.
    pub fn event_number(&self) -> u64 {
        self.kernel.event_number
    }

    /// Returns the module graph.
    pub fn graph(&self) -> &ModuleGraph {
        &self.kernel.graph
    }

    /// Returns the full path of the module, such as `net.host[2].app`.
    pub fn full_path(&self) -> String {
        self.kernel.graph.full_path(self.module).unwrap_or_default()
    }

    /// Returns a parameter of the module.
    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.kernel
            .graph
            .component(self.module)
            .and_then(|component| component.parameter(name))
    }

    /// Resolves a gate of the module.
    pub fn gate(&self, name: &str, index: Option<usize>) -> Result<GateId, GraphError> {
        self.kernel.graph.gate_id(self.module, name, index)
    }

    /// Resolves a gate of any module.
    pub fn gate_of(
        &self,
        module: ComponentId,
        name: &str,
        index: Option<usize>,
    ) -> Result<GateId, GraphError> {
        self.kernel.graph.gate_id(module, name, index)
    }

    /// Schedules an event at an absolute time.
    ///
    /// A message becomes a self-message of the module. An error is returned
    /// if the time lies in the past; scheduling for the current time is
    /// allowed.
    pub fn schedule_at(
        &mut self,
        time: MonotonicTime,
        event: impl Into<Event>,
    ) -> Result<EventId, SchedulingError> {
        self.kernel.schedule(Some(self.module), time, event.into())
    }

    /// Schedules an event after a delay.
    pub fn schedule_in(
        &mut self,
        delay: Duration,
        event: impl Into<Event>,
    ) -> Result<EventId, SchedulingError> {
        let time = self.kernel.time + delay;

        self.kernel.schedule(Some(self.module), time, event.into())
    }

    /// Withdraws a pending event and returns it.
    ///
    /// Returns `None` if the event is no longer pending, which makes
    /// cancellation idempotent.
    pub fn cancel_event(&mut self, id: EventId) -> Option<Event> {
        self.kernel.fes.remove(id)
    }

    /// Returns `true` if the event is pending.
    pub fn is_scheduled(&self, id: EventId) -> bool {
        self.kernel.fes.contains(id)
    }

    /// Sends a message through an output gate of the module.
    ///
    /// The arrival time accounts for the delays of all channels along the
    /// gate chain. Returns `None` if a disabled channel dropped the message.
    pub fn send(&mut self, message: Message, gate: GateId) -> Result<Option<EventId>, SendError> {
        self.kernel
            .send(self.module, message, gate, Duration::ZERO)
    }

    /// Sends a message through an output gate of the module after a delay.
    pub fn send_delayed(
        &mut self,
        message: Message,
        gate: GateId,
        delay: Duration,
    ) -> Result<Option<EventId>, SendError> {
        self.kernel.send(self.module, message, gate, delay)
    }

    /// Sends a message directly to an unconnected input gate of any module.
    pub fn send_direct(
        &mut self,
        message: Message,
        propagation_delay: Duration,
        gate: GateId,
    ) -> Result<EventId, SendError> {
        self.kernel
            .send_direct(self.module, message, propagation_delay, gate)
    }

    /// Instantiates a registered type as a child of `parent`.
    ///
    /// The build hook runs immediately, and so do all initialization stages
    /// if the network has already been initialized.
    pub fn create_module(
        &mut self,
        type_name: &str,
        name: &str,
        parent: ComponentId,
        index: Option<usize>,
    ) -> Result<ComponentId, ModelError> {
        self.kernel.instantiate(type_name, name, Some(parent), index)
    }

    /// Deletes a module and its subtree.
    ///
    /// Pending events targeting the deleted modules are dropped. A module may
    /// delete itself, in which case the context must not be used for
    /// structural changes afterwards.
    pub fn delete_module(&mut self, module: ComponentId) -> Result<(), ModelError> {
        self.kernel.delete_module(module)
    }

    /// Moves a module under a new parent.
    pub fn reparent(&mut self, module: ComponentId, new_parent: ComponentId) -> Result<(), GraphError> {
        self.kernel.graph.reparent(module, new_parent)
    }

    /// Adds a gate to the module; `size` makes it a gate vector.
    pub fn add_gate(
        &mut self,
        name: &str,
        gate_type: GateType,
        size: Option<usize>,
    ) -> Result<(), GraphError> {
        self.kernel.graph.add_gate(self.module, name, gate_type, size)
    }

    /// Deletes a gate or gate vector of the module.
    pub fn delete_gate(&mut self, name: &str) -> Result<(), GraphError> {
        self.kernel.graph.delete_gate(self.module, name)
    }

    /// Resizes a gate vector of the module.
    pub fn resize_gate_vector(&mut self, name: &str, size: usize) -> Result<(), GraphError> {
        self.kernel.graph.resize_gate_vector(self.module, name, size)
    }

    /// Connects two gates, optionally through a channel.
    pub fn connect(
        &mut self,
        from: GateId,
        to: GateId,
        channel: Option<Channel>,
    ) -> Result<(), GraphError> {
        self.kernel.graph.connect(from, to, channel)
    }

    /// Removes the outgoing connection of a gate.
    pub fn disconnect(&mut self, from: GateId) -> Result<(), GraphError> {
        self.kernel.graph.disconnect(from)
    }

    /// Sets a parameter of any module.
    pub fn set_parameter(
        &mut self,
        module: ComponentId,
        name: &str,
        value: impl Into<ParamValue>,
    ) -> Result<(), GraphError> {
        self.kernel.graph.set_parameter(module, name, value.into())
    }

    /// Replaces the display string of the module.
    pub fn set_display_string(&mut self, display_string: &str) -> Result<(), GraphError> {
        self.kernel
            .graph
            .set_display_string(self.module, display_string)
    }

    /// Requests the run loop to stop once the current event completes.
    pub fn request_stop(&self) {
        self.kernel.stop.stop();
    }

    /// Returns an error that ends the simulation normally when returned from
    /// a hook.
    pub fn end_simulation(&self, message: impl Into<String>) -> ModelError {
        ModelError::end_simulation(message)
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("module", &self.module)
            .field("time", &self.kernel.time)
            .finish_non_exhaustive()
    }
}
