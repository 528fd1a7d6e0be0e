use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tracing::{debug, info_span, warn};

use crate::event::{Delivery, Event, EventId, EventKind, FutureEventSet, HopDelay, Message, SchedulingError};
use crate::graph::{ComponentId, Direction, GateId, ModuleGraph, ResolutionError, StructuralError};
use crate::model::{Context, Model, ModelError, ModelRegistry, RuntimeFailure, SendError};
use crate::notify::{EventBanner, MessageRoute, Route};
use crate::time::MonotonicTime;

use super::StopHandle;

/// A model instance and its life-cycle bookkeeping.
struct ModelSlot {
    /// `None` while one of the model's hooks is running.
    model: Option<Box<dyn Model>>,
    init_stages: usize,
    init_done: usize,
    finalized: bool,
}

/// State shared by the run loop and the model contexts.
///
/// Everything here is mutated either by the run loop between dispatches or by
/// a model hook running synchronously within a dispatch, so the kernel is
/// never shared across threads.
pub(crate) struct Kernel {
    pub(crate) graph: ModuleGraph,
    pub(crate) fes: FutureEventSet,
    pub(crate) time: MonotonicTime,
    pub(crate) event_number: u64,
    pub(crate) stop: StopHandle,
    /// Set once network initialization begins; modules created afterwards
    /// are initialized as soon as they are built.
    pub(crate) initialization_started: bool,
    registry: ModelRegistry,
    models: HashMap<ComponentId, ModelSlot>,
}

impl Kernel {
    pub(crate) fn new(registry: ModelRegistry, start_time: MonotonicTime) -> Self {
        Self {
            graph: ModuleGraph::new(),
            fes: FutureEventSet::new(),
            time: start_time,
            event_number: 0,
            stop: StopHandle::new(),
            initialization_started: false,
            registry,
            models: HashMap::new(),
        }
    }

    /// Creates a component of a registered type and runs its build hook.
    ///
    /// If the build hook fails, the partially built subtree is deleted again.
    pub(crate) fn instantiate(
        &mut self,
        type_name: &str,
        name: &str,
        parent: Option<ComponentId>,
        index: Option<usize>,
    ) -> Result<ComponentId, ModelError> {
        let model = self.registry.create(type_name)?;
        let id = self.graph.create_component(type_name, name, parent, index)?;
        self.models.insert(
            id,
            ModelSlot {
                init_stages: model.num_init_stages(),
                model: Some(model),
                init_done: 0,
                finalized: false,
            },
        );

        if let Err(err) = self.call_model(id, "build", |model, cx| model.build(cx)) {
            match self.graph.delete_component(id) {
                Ok(deleted) => self.forget(&deleted),
                Err(delete_err) => warn!("could not remove module {id} after a failed build: {delete_err}"),
            }
            return Err(err);
        }

        if self.initialization_started {
            self.initialize_subtree(id)?;
        }

        Ok(id)
    }

    /// Runs all initialization stages over a subtree, parents first within
    /// each stage.
    pub(crate) fn initialize_subtree(&mut self, root: ComponentId) -> Result<(), ModelError> {
        let mut stage = 0;
        loop {
            let mut pending = false;
            for id in self.graph.pre_order(root) {
                let Some(slot) = self.models.get(&id) else {
                    continue;
                };
                if slot.init_done != stage || stage >= slot.init_stages {
                    pending |= slot.init_done < slot.init_stages;
                    continue;
                }

                self.call_model(id, "initialize", |model, cx| model.initialize(stage, cx))?;

                if let Some(slot) = self.models.get_mut(&id) {
                    slot.init_done = stage + 1;
                    pending |= slot.init_done < slot.init_stages;
                }
            }
            if !pending {
                return Ok(());
            }
            stage += 1;
        }
    }

    /// Calls the finalize hook of every module not finalized yet, children
    /// before parents.
    ///
    /// Failures are logged and do not interrupt the pass. Returns the number
    /// of failed hooks.
    pub(crate) fn finalize_all(&mut self) -> usize {
        let Some(root) = self.graph.root() else {
            return 0;
        };

        let mut failures = 0;
        for id in self.graph.post_order(root) {
            match self.models.get_mut(&id) {
                Some(slot) if !slot.finalized => slot.finalized = true,
                _ => continue,
            }
            match self.call_model(id, "finalize", |model, cx| model.finalize(cx)) {
                Ok(()) => {}
                Err(ModelError::Terminate(condition)) => {
                    debug!("end of simulation requested while finalizing module {id}: {condition}");
                }
                Err(ModelError::Failure(failure)) => {
                    warn!("finalization failed: {failure}");
                    failures += 1;
                }
            }
        }

        failures
    }

    /// Delivers an event taken from the future event set.
    pub(crate) fn dispatch(&mut self, event: Event) -> Result<(), ModelError> {
        self.time = event.time();
        self.event_number += 1;

        let id = event
            .id()
            .ok_or_else(|| ModelError::failure("dispatched event was never scheduled"))?;
        let target = event.target();
        let banner = EventBanner {
            event_number: self.event_number,
            time: self.time,
            event: id,
            name: event.name().to_owned(),
            target,
        };
        debug!(
            event_number = banner.event_number,
            path = %target.and_then(|t| self.graph.full_path(t)).unwrap_or_default(),
            "dispatching `{}` at {:?}",
            banner.name,
            banner.time
        );
        self.graph.notifier_mut().event_dispatched(&banner);

        #[cfg(feature = "tracing")]
        let _dispatch = crate::tracing::enter_dispatch(self.time);

        match target {
            Some(target) => self.call_model(target, "handle_event", |model, cx| {
                model.handle_event(event, cx)
            }),
            None => match event.into_kind() {
                EventKind::Action(action) => {
                    let root = self
                        .graph
                        .root()
                        .ok_or_else(|| ModelError::failure("no network to run an action in"))?;
                    self.run_guarded(root, "action", |cx| action.execute(cx))
                }
                EventKind::Message(message) => Err(ModelError::failure(format!(
                    "message `{}` has no target module",
                    message.name()
                ))),
            },
        }
    }

    /// Returns `true` if the event targets a module or gate that no longer
    /// exists.
    pub(crate) fn is_stale(&self, event: &Event) -> bool {
        let Some(message) = event.as_message() else {
            return false;
        };

        match message.arrival_module() {
            Some(module) => {
                !self.graph.contains(module)
                    || message
                        .arrival_gate()
                        .is_some_and(|gate| self.graph.gate(gate).is_none())
            }
            None => true,
        }
    }

    /// Schedules an event.
    ///
    /// A message scheduled by a module becomes a self-message of that module;
    /// a message scheduled from outside must already have a target.
    pub(crate) fn schedule(
        &mut self,
        owner: Option<ComponentId>,
        time: MonotonicTime,
        mut event: Event,
    ) -> Result<EventId, SchedulingError> {
        if time < self.time {
            return Err(SchedulingError::InvalidScheduledTime {
                scheduled: time,
                now: self.time,
            });
        }
        let now = self.time;
        if let Some(message) = event.as_message_mut() {
            match owner {
                Some(owner) => message.set_route(
                    Delivery::SelfMessage,
                    (Some(owner), None),
                    (owner, None),
                    now,
                    Vec::new(),
                ),
                None if message.arrival_module().is_none() => {
                    return Err(SchedulingError::NoTarget(message.name().to_owned()));
                }
                None => {}
            }
        }
        event.set_time(time);

        Ok(self.fes.insert(event))
    }

    /// Inserts a message from outside of the simulation.
    pub(crate) fn inject(
        &mut self,
        time: MonotonicTime,
        target: ComponentId,
        mut message: Message,
    ) -> Result<EventId, super::ExecutionError> {
        if !self.graph.contains(target) {
            return Err(ResolutionError::NoSuchComponent(target).into());
        }
        message.set_route(Delivery::External, (None, None), (target, None), self.time, Vec::new());

        Ok(self.schedule(None, time, message.into())?)
    }

    /// Sends a message through an output gate, after an optional sending
    /// delay.
    ///
    /// Returns `None` if a disabled channel dropped the message.
    pub(crate) fn send(
        &mut self,
        sender: ComponentId,
        mut message: Message,
        gate: GateId,
        delay: Duration,
    ) -> Result<Option<EventId>, SendError> {
        let first = self
            .graph
            .gate(gate)
            .ok_or(ResolutionError::InvalidGate(gate))?;
        if gate.module() != sender {
            return Err(SendError::ForeignGate(self.describe_gate(gate)));
        }
        if first.direction() != Direction::Output {
            return Err(SendError::NotAnOutput(self.describe_gate(gate)));
        }
        if first.next().is_none() {
            return Err(SendError::NotConnected(self.describe_gate(gate)));
        }

        let sending_time = self.time + delay;
        let mut arrival_time = sending_time;
        let mut chain = vec![gate];
        let mut hops = Vec::new();
        let mut dropped = false;
        let mut current = gate;
        loop {
            let current_gate = self
                .graph
                .gate(current)
                .ok_or(ResolutionError::InvalidGate(current))?;
            let Some(next) = current_gate.next() else {
                break;
            };
            if let Some(channel) = current_gate.channel() {
                if channel.disabled {
                    dropped = true;
                    break;
                }
                let hop = channel
                    .transmission_duration(message.bit_length())
                    .map(|transmission_duration| HopDelay {
                        gate: current,
                        propagation_delay: channel.delay,
                        transmission_duration,
                    });
                arrival_time = hop
                    .as_ref()
                    .and_then(|hop| {
                        hop.propagation_delay
                            .checked_add(hop.transmission_duration)
                            .and_then(|delay| arrival_time.checked_add(delay))
                    })
                    .ok_or_else(|| SendError::InvalidDelay(self.describe_gate(current)))?;
                hops.extend(hop);
            }
            chain.push(next);
            current = next;
        }

        let mut record = MessageRoute {
            event: None,
            message: message.name().to_owned(),
            sender,
            sending_time,
            arrival_time,
            route: Route::Gates(chain),
        };
        if dropped {
            debug!(
                "message `{}` dropped by the disabled channel of gate `{}`",
                record.message,
                self.describe_gate(current)
            );
            self.graph.notifier_mut().message_sent(&record);
            return Ok(None);
        }

        let end_gate = self
            .graph
            .gate(current)
            .ok_or(ResolutionError::InvalidGate(current))?;
        if end_gate.direction() != Direction::Input {
            return Err(SendError::DanglingPath(self.describe_gate(gate)));
        }

        message.set_route(
            Delivery::Gate,
            (Some(sender), Some(gate)),
            (current.module(), Some(current)),
            sending_time,
            hops,
        );
        let mut event = Event::from(message);
        event.set_time(arrival_time);
        let id = self.fes.insert(event);

        record.event = Some(id);
        self.graph.notifier_mut().message_sent(&record);

        Ok(Some(id))
    }

    /// Sends a message directly to an input gate of any module.
    pub(crate) fn send_direct(
        &mut self,
        sender: ComponentId,
        mut message: Message,
        propagation_delay: Duration,
        gate: GateId,
    ) -> Result<EventId, SendError> {
        let target = self
            .graph
            .gate(gate)
            .ok_or(ResolutionError::InvalidGate(gate))?;
        if target.direction() != Direction::Input {
            return Err(SendError::NotAnInput(self.describe_gate(gate)));
        }
        if target.prev().is_some() {
            return Err(SendError::ConnectedInput(self.describe_gate(gate)));
        }
        let hops = self.graph.find_path(sender, gate.module())?;

        let sending_time = self.time;
        let arrival_time = sending_time + propagation_delay;
        let name = message.name().to_owned();
        message.set_route(
            Delivery::Direct,
            (Some(sender), None),
            (gate.module(), Some(gate)),
            sending_time,
            Vec::new(),
        );
        let mut event = Event::from(message);
        event.set_time(arrival_time);
        let id = self.fes.insert(event);

        self.graph.notifier_mut().message_sent(&MessageRoute {
            event: Some(id),
            message: name,
            sender,
            sending_time,
            arrival_time,
            route: Route::Direct { hops, gate },
        });

        Ok(id)
    }

    /// Deletes a non-root module, its subtree and all events targeting it.
    pub(crate) fn delete_module(&mut self, id: ComponentId) -> Result<(), ModelError> {
        if self.graph.root() == Some(id) {
            return Err(StructuralError::RootOperation.into());
        }
        let deleted = self.graph.delete_component(id)?;
        self.forget(&deleted);

        Ok(())
    }

    /// Deletes the whole network and resets the run bookkeeping.
    pub(crate) fn teardown(&mut self) {
        if let Some(root) = self.graph.root() {
            if let Err(err) = self.graph.delete_component(root) {
                warn!("network deletion failed: {err}");
            }
        }
        self.models.clear();
        self.fes.clear();
        self.initialization_started = false;
        self.event_number = 0;
    }

    /// Drops the model instances and pending events of deleted modules.
    fn forget(&mut self, deleted: &[ComponentId]) {
        let deleted: HashSet<ComponentId> = deleted.iter().copied().collect();
        self.models.retain(|id, _| !deleted.contains(id));

        let dropped = self
            .fes
            .remove_where(|event| event.target().is_some_and(|target| deleted.contains(&target)));
        if !dropped.is_empty() {
            debug!("{} pending event(s) of deleted modules dropped", dropped.len());
        }
    }

    /// Runs a hook of a module's model.
    fn call_model<R>(
        &mut self,
        module: ComponentId,
        hook: &'static str,
        f: impl FnOnce(&mut dyn Model, &mut Context<'_>) -> Result<R, ModelError>,
    ) -> Result<R, ModelError> {
        let Some(mut model) = self
            .models
            .get_mut(&module)
            .and_then(|slot| slot.model.take())
        else {
            let failure = RuntimeFailure::new(format!("no model instance available for `{hook}`"))
                .in_module(module, self.graph.full_path(module));
            return Err(ModelError::Failure(failure));
        };

        let result = self.run_guarded(module, hook, |cx| f(model.as_mut(), cx));

        // The module may have deleted itself.
        if let Some(slot) = self.models.get_mut(&module) {
            slot.model = Some(model);
        }

        result
    }

    /// Runs a closure with a context bound to `module`, within the module's
    /// span, turning panics into failures.
    fn run_guarded<R>(
        &mut self,
        module: ComponentId,
        hook: &'static str,
        f: impl FnOnce(&mut Context<'_>) -> Result<R, ModelError>,
    ) -> Result<R, ModelError> {
        let path = self.graph.full_path(module);
        let span = info_span!(
            target: env!("CARGO_PKG_NAME"),
            "module",
            path = path.as_deref().unwrap_or_default()
        );
        let _enter = span.enter();

        let result = panic::catch_unwind(AssertUnwindSafe(|| f(&mut Context::new(self, module))));

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ModelError::Failure(failure))) => {
                Err(ModelError::Failure(failure.in_module(module, path)))
            }
            Ok(Err(terminate)) => Err(terminate),
            Err(payload) => Err(ModelError::Failure(
                RuntimeFailure::new(format!(
                    "panic in `{hook}`: {}",
                    panic_message(payload.as_ref())
                ))
                .in_module(module, path),
            )),
        }
    }

    fn describe_gate(&self, gate: GateId) -> String {
        self.graph
            .gate_path(gate)
            .unwrap_or_else(|| gate.to_string())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
