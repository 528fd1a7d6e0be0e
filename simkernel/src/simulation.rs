//! Simulation management.
//!
//! This module contains most notably the [`Simulation`] run-control surface,
//! the [`SimInit`] simulation builder and the [`KernelConfig`] tunables.
//!
//! # Simulation lifecycle
//!
//! The lifecycle of a simulation typically comprises the following stages:
//!
//! 1. registration of component types with [`SimInit::register()`], together
//!    with optional listeners, clock and limits,
//! 2. creation of a [`Simulation`] with [`SimInit::init()`] and set-up of a
//!    network with [`Simulation::setup_network()`], or both at once with
//!    [`SimInit::init_network()`]; the network type is instantiated as the
//!    root module, its build hook creates the rest of the tree and all
//!    modules are then initialized stage by stage,
//! 3. execution with [`Simulation::step()`] or [`Simulation::run()`], which
//!    dispatch events in (time, priority, insertion) order until a stop
//!    condition is met,
//! 4. finalization of all modules, either automatically when the simulation
//!    terminates or explicitly with [`Simulation::finish()`],
//! 5. deletion of the network with [`Simulation::delete_network()`], which
//!    also happens when the simulation is dropped or a new network is set up.
//!
//! # Run state
//!
//! A simulation is always in one of the [`RunState`]s. A network set-up moves
//! it from `Uninitialized` to `Ready`; stepping or running moves it to
//! `Running` and back to `Ready` once the step or run stops without
//! terminating. A normal end of simulation, requested by a model or caused by
//! a limit or by an empty future event set, moves it to `Terminated`, while
//! any other failure moves it to `Error`. Neither state can be resumed.
//!
//! Failures are never returned as errors by the run-control methods: they are
//! reported as a [`StopReason`], logged and surfaced to listeners through a
//! [`LifecycleEvent::Failure`] notification.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use simkernel::event::{Event, Message};
//! use simkernel::model::{Context, Model, ModelError};
//! use simkernel::simulation::{RunMode, RunState, RunUntil, SimInit, StopReason};
//!
//! struct Pinger;
//!
//! impl Model for Pinger {
//!     fn initialize(&mut self, _stage: usize, cx: &mut Context<'_>) -> Result<(), ModelError> {
//!         cx.schedule_in(Duration::from_secs(1), Message::new("ping"))?;
//!
//!         Ok(())
//!     }
//!
//!     fn handle_event(&mut self, event: Event, cx: &mut Context<'_>) -> Result<(), ModelError> {
//!         if cx.event_number() == 3 {
//!             return Err(cx.end_simulation("three pings are enough"));
//!         }
//!         cx.schedule_in(Duration::from_secs(1), event)?;
//!
//!         Ok(())
//!     }
//! }
//!
//! let mut simu = SimInit::new().register("Pinger", || Pinger).init_network("Pinger")?;
//!
//! let reason = simu.run(RunMode::Normal, RunUntil::new())?;
//!
//! assert!(matches!(reason, StopReason::Terminated(_)));
//! assert_eq!(simu.state(), RunState::Terminated);
//! assert_eq!(simu.event_number(), 3);
//! # Ok::<(), simkernel::simulation::ExecutionError>(())
//! ```
pub(crate) mod kernel;
mod sim_init;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::event::{Event, EventId, Message, SchedulingError};
use crate::graph::{ComponentId, ModuleGraph, ResolutionError};
use crate::model::{
    Context, ModelError, ModelRegistry, RuntimeFailure, TerminationCondition, TerminationKind,
};
use crate::notify::{LifecycleEvent, Listener, ListenerId, RunStatus};
use crate::time::{Clock, MonotonicTime, RunTimer, SyncStatus};

use kernel::Kernel;

pub use sim_init::{KernelConfig, SimInit};

/// State of the simulation run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RunState {
    /// No network is set up.
    Uninitialized,
    /// A network is set up and can be run.
    Ready,
    /// Events are being dispatched.
    Running,
    /// The simulation ended normally.
    Terminated,
    /// The simulation stopped on a failure.
    Error,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Terminated => "terminated",
            Self::Error => "error",
        })
    }
}

/// Trade-off between per-event bookkeeping and throughput.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum RunMode {
    /// All stop conditions are checked and listeners are refreshed after
    /// every event.
    #[default]
    Normal,
    /// All stop conditions are checked after every event; listeners are
    /// refreshed periodically.
    Fast,
    /// Time, event-count and stop-request conditions are only checked
    /// periodically and run-until-module is not supported.
    Express,
}

/// Conditions on which a run stops before terminating.
///
/// All conditions are optional and independent; the run stops on the first
/// one met.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunUntil {
    time: Option<MonotonicTime>,
    event_number: Option<u64>,
    event: Option<EventId>,
    module: Option<ComponentId>,
}

impl RunUntil {
    /// Creates a condition set with no condition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops once the next pending event is scheduled at or after `time`.
    ///
    /// The condition is evaluated after each dispatch, so the first event of
    /// the run is always dispatched.
    pub fn time(mut self, time: MonotonicTime) -> Self {
        self.time = Some(time);
        self
    }

    /// Stops once `event_number` events have been dispatched in total.
    pub fn event_number(mut self, event_number: u64) -> Self {
        self.event_number = Some(event_number);
        self
    }

    /// Stops right before dispatching the given event, which is left
    /// pending.
    pub fn event(mut self, event: EventId) -> Self {
        self.event = Some(event);
        self
    }

    /// Stops right before dispatching an event into the subtree of `module`.
    ///
    /// The first event of the run is always dispatched, and the run also
    /// stops right after it if it was delivered into the subtree.
    pub fn module(mut self, module: ComponentId) -> Self {
        self.module = Some(module);
        self
    }
}

/// Why a step or run returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// A single step completed.
    StepCompleted,
    /// No event was pending while external events are expected.
    Interrupted,
    /// The run-until time was reached.
    UntilTime,
    /// The run-until event number was reached.
    UntilEventNumber,
    /// The run-until event is next.
    UntilEvent,
    /// The run-until module was reached.
    UntilModule,
    /// A stop was requested.
    StopRequested,
    /// The simulation terminated normally.
    Terminated(TerminationCondition),
    /// The simulation stopped on a failure.
    Failed(RuntimeFailure),
}

/// A handle requesting a running simulation to stop at the next dispatch
/// boundary.
///
/// The handle can be cloned and sent to other threads.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Requests a stop.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns `true` if a stop was requested and not yet honored.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// An error returned when a run-control operation cannot be performed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// No network is set up.
    #[error("no network is set up")]
    NoNetwork,
    /// The operation is not allowed in the current run state.
    #[error("operation not allowed in the {0} state")]
    InvalidState(RunState),
    /// The network could not be built or initialized.
    #[error("network setup failed: {0}")]
    Setup(RuntimeFailure),
    /// An event could not be scheduled.
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    /// A module could not be resolved.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

/// A discrete-event simulation.
///
/// A `Simulation` owns the module graph, the future event set and the model
/// instances. It is created by [`SimInit`], and its network is deleted when
/// it is dropped.
pub struct Simulation {
    kernel: Kernel,
    state: RunState,
    config: KernelConfig,
    clock: Box<dyn Clock>,
    timer: RunTimer,
    finalized: bool,
    cleaned_up: bool,
    last_refresh: Instant,
}

impl Simulation {
    pub(crate) fn new(registry: ModelRegistry, config: KernelConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            kernel: Kernel::new(registry, config.start_time),
            state: RunState::Uninitialized,
            config,
            clock,
            timer: RunTimer::default(),
            finalized: false,
            cleaned_up: true,
            last_refresh: Instant::now(),
        }
    }

    /// Builds and initializes a network whose root is an instance of
    /// `network_type`, deleting the current network first.
    ///
    /// If building or initializing fails, the partial network is deleted, the
    /// failure is notified to listeners and the simulation is left
    /// `Uninitialized`.
    pub fn setup_network(&mut self, network_type: &str) -> Result<ComponentId, ExecutionError> {
        if self.state == RunState::Running {
            return Err(ExecutionError::InvalidState(self.state));
        }
        self.delete_network();

        self.kernel.time = self.config.start_time;
        self.kernel.stop.clear();
        self.timer.reset();
        self.finalized = false;
        self.cleaned_up = false;

        match self.build_network(network_type) {
            Ok(root) => {
                self.state = RunState::Ready;
                self.clock.synchronize(self.kernel.time);
                info!(
                    "network `{}` set up with {} module(s), {} event(s) scheduled",
                    network_type,
                    self.kernel.graph.len(),
                    self.kernel.fes.len()
                );

                Ok(root)
            }
            Err(err) => {
                let failure = match err {
                    ModelError::Failure(failure) => failure,
                    ModelError::Terminate(condition) => RuntimeFailure::new(format!(
                        "simulation ended during network setup: {condition}"
                    )),
                };
                error!("network setup failed: {failure}");
                self.lifecycle(LifecycleEvent::Failure(failure.clone()));
                self.kernel.teardown();
                self.state = RunState::Uninitialized;
                self.cleaned_up = true;

                Err(ExecutionError::Setup(failure))
            }
        }
    }

    fn build_network(&mut self, network_type: &str) -> Result<ComponentId, ModelError> {
        self.lifecycle(LifecycleEvent::PreNetworkSetup);
        // The root is named after the unqualified type name.
        let name = network_type.rsplit('.').next().unwrap_or(network_type);
        let root = self.kernel.instantiate(network_type, name, None, None)?;
        self.lifecycle(LifecycleEvent::PostNetworkSetup);

        self.lifecycle(LifecycleEvent::PreNetworkInitialize);
        self.kernel.initialization_started = true;
        self.kernel.initialize_subtree(root)?;
        self.lifecycle(LifecycleEvent::PostNetworkInitialize);

        Ok(root)
    }

    /// Dispatches the next event.
    pub fn step(&mut self) -> Result<StopReason, ExecutionError> {
        self.begin_run()?;

        let outcome = self.take_next_event().and_then(|event| match event {
            Some(event) => self
                .kernel
                .dispatch(event)
                .map(|()| StopReason::StepCompleted),
            None => Ok(StopReason::Interrupted),
        });

        Ok(self.end_run(outcome))
    }

    /// Dispatches events until a condition of `until` is met, a stop is
    /// requested or the simulation ends.
    pub fn run(&mut self, mode: RunMode, until: RunUntil) -> Result<StopReason, ExecutionError> {
        self.begin_run()?;

        let mut until = until;
        if mode == RunMode::Express && until.module.take().is_some() {
            warn!("run-until-module is not supported in express mode and is ignored");
        }
        info!("run started in {mode:?} mode at {:?}", self.kernel.time);

        let outcome = self.run_loop(mode, &until);
        let reason = self.end_run(outcome);
        info!(
            "run stopped at {:?} after event #{}: {reason:?}",
            self.kernel.time, self.kernel.event_number
        );

        Ok(reason)
    }

    fn run_loop(&mut self, mode: RunMode, until: &RunUntil) -> Result<StopReason, ModelError> {
        let period = match mode {
            RunMode::Normal => 1,
            RunMode::Fast => self.config.fast_refresh_events.max(1),
            RunMode::Express => self.config.express_check_events.max(1),
        };
        let mut dispatched: u64 = 0;

        loop {
            let Some(event) = self.take_next_event()? else {
                return Ok(StopReason::Interrupted);
            };

            if until.event.is_some_and(|id| event.id() == Some(id)) {
                self.kernel.fes.put_back(event);
                return Ok(StopReason::UntilEvent);
            }
            let module_reached = match (until.module, event.target()) {
                (Some(module), Some(target)) => self.kernel.graph.is_ancestor_of(module, target),
                _ => false,
            };
            if module_reached && dispatched > 0 {
                self.kernel.fes.put_back(event);
                return Ok(StopReason::UntilModule);
            }

            self.kernel.dispatch(event)?;
            dispatched += 1;

            if module_reached {
                return Ok(StopReason::UntilModule);
            }

            let periodic = dispatched % period == 0;
            match mode {
                RunMode::Normal => self.refresh(),
                RunMode::Fast | RunMode::Express if periodic => self.refresh_if_due(),
                _ => {}
            }
            if mode == RunMode::Express && !periodic {
                continue;
            }

            if self.kernel.stop.is_requested() {
                return Ok(StopReason::StopRequested);
            }
            if let Some(time) = until.time {
                if self.kernel.fes.peek_min().is_some_and(|next| next.time() >= time) {
                    return Ok(StopReason::UntilTime);
                }
            }
            if until
                .event_number
                .is_some_and(|event_number| self.kernel.event_number >= event_number)
            {
                return Ok(StopReason::UntilEventNumber);
            }
        }
    }

    /// Takes the next event to dispatch, enforcing limits and discarding
    /// stale events.
    ///
    /// Returns `None` if the future event set is empty and external events
    /// are expected.
    fn take_next_event(&mut self) -> Result<Option<Event>, ModelError> {
        if let Some(limit) = self.config.real_time_limit {
            if self.timer.elapsed() >= limit {
                return Err(ModelError::Terminate(TerminationCondition::new(
                    TerminationKind::RealTimeLimit,
                    "real time limit reached",
                )));
            }
        }

        loop {
            let Some(event) = self.kernel.fes.take_min() else {
                if self.config.external_events {
                    return Ok(None);
                }
                return Err(ModelError::Terminate(TerminationCondition::new(
                    TerminationKind::NoMoreEvents,
                    "no more events",
                )));
            };

            if self.kernel.is_stale(&event) {
                debug!("discarding stale event `{}` scheduled at {:?}", event.name(), event.time());
                continue;
            }

            if let Some(limit) = self.sim_time_limit() {
                if event.time() > limit {
                    self.kernel.fes.put_back(event);
                    self.kernel.time = limit;
                    return Err(ModelError::Terminate(TerminationCondition::new(
                        TerminationKind::SimTimeLimit,
                        "simulation time limit reached",
                    )));
                }
            }

            if let SyncStatus::OutOfSync(lag) = self.clock.synchronize(event.time()) {
                debug!("clock lagging behind simulation time by {lag:?}");
            }

            return Ok(Some(event));
        }
    }

    fn begin_run(&mut self) -> Result<(), ExecutionError> {
        match self.state {
            RunState::Ready => {}
            RunState::Uninitialized => return Err(ExecutionError::NoNetwork),
            state => return Err(ExecutionError::InvalidState(state)),
        }
        self.kernel.stop.clear();
        self.state = RunState::Running;
        self.lifecycle(LifecycleEvent::Resume);
        self.timer.start();

        Ok(())
    }

    fn end_run(&mut self, outcome: Result<StopReason, ModelError>) -> StopReason {
        self.timer.stop();
        self.kernel.stop.clear();

        let reason = match outcome {
            Ok(reason) => {
                self.state = RunState::Ready;
                self.lifecycle(LifecycleEvent::Pause);
                reason
            }
            Err(ModelError::Terminate(condition)) => {
                info!("simulation terminated: {condition}");
                self.state = RunState::Terminated;
                self.lifecycle(LifecycleEvent::Success(condition.clone()));
                self.finalize();
                StopReason::Terminated(condition)
            }
            Err(ModelError::Failure(failure)) => {
                error!("simulation failed: {failure}");
                self.state = RunState::Error;
                self.lifecycle(LifecycleEvent::Failure(failure.clone()));
                StopReason::Failed(failure)
            }
        };
        self.refresh();

        reason
    }

    /// Ends the simulation on user request and finalizes all modules.
    ///
    /// From `Ready` this is a normal termination. From `Terminated` or
    /// `Error` only the finalize pass runs, unless it already did.
    pub fn finish(&mut self) -> Result<(), ExecutionError> {
        match self.state {
            RunState::Uninitialized => return Err(ExecutionError::NoNetwork),
            RunState::Running => return Err(ExecutionError::InvalidState(self.state)),
            RunState::Ready => {
                let condition = TerminationCondition::new(
                    TerminationKind::Finish,
                    "simulation finished on user request",
                );
                info!("simulation terminated: {condition}");
                self.state = RunState::Terminated;
                self.lifecycle(LifecycleEvent::Success(condition));
            }
            RunState::Terminated | RunState::Error => {}
        }
        self.finalize();

        Ok(())
    }

    /// Deletes the network, finalizing it first if the simulation ended.
    ///
    /// Does nothing if no network is set up.
    pub fn delete_network(&mut self) {
        if self.kernel.graph.root().is_none() {
            self.state = RunState::Uninitialized;
            return;
        }
        if matches!(self.state, RunState::Terminated | RunState::Error) {
            self.finalize();
        }
        self.cleanup();

        self.lifecycle(LifecycleEvent::PreNetworkDelete);
        self.kernel.teardown();
        self.lifecycle(LifecycleEvent::PostNetworkDelete);
        self.state = RunState::Uninitialized;
        info!("network deleted");
    }

    fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        self.lifecycle(LifecycleEvent::PreNetworkFinish);
        let failures = self.kernel.finalize_all();
        if failures > 0 {
            warn!("{failures} module(s) failed to finalize");
        } else {
            info!("all modules finalized");
        }
        self.lifecycle(LifecycleEvent::PostNetworkFinish);
    }

    fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        let discarded = self.kernel.fes.len();
        self.kernel.fes.clear();
        self.lifecycle(LifecycleEvent::RunEnd);
        info!("end of run cleanup, {discarded} pending event(s) discarded");
    }

    /// Inserts a message for `target` from outside of the simulation.
    ///
    /// The simulation must be `Ready`.
    pub fn inject(
        &mut self,
        time: MonotonicTime,
        target: ComponentId,
        message: Message,
    ) -> Result<EventId, ExecutionError> {
        self.check_ready()?;

        self.kernel.inject(time, target, message)
    }

    /// Schedules a closure executed in the context of the root module.
    pub fn schedule_action<F>(
        &mut self,
        time: MonotonicTime,
        name: impl Into<String>,
        f: F,
    ) -> Result<EventId, ExecutionError>
    where
        F: FnOnce(&mut Context<'_>) -> Result<(), ModelError> + 'static,
    {
        self.check_ready()?;

        Ok(self.kernel.schedule(None, time, Event::action(name, f))?)
    }

    /// Withdraws a pending event.
    ///
    /// Returns `None` if the event is not pending.
    pub fn cancel_event(&mut self, id: EventId) -> Option<Event> {
        self.kernel.fes.remove(id)
    }

    fn check_ready(&self) -> Result<(), ExecutionError> {
        match self.state {
            RunState::Ready => Ok(()),
            RunState::Uninitialized => Err(ExecutionError::NoNetwork),
            state => Err(ExecutionError::InvalidState(state)),
        }
    }

    /// Registers a listener receiving all notifications.
    pub fn add_listener(&mut self, listener: impl Listener) -> ListenerId {
        self.add_boxed_listener(Box::new(listener))
    }

    pub(crate) fn add_boxed_listener(&mut self, listener: Box<dyn Listener>) -> ListenerId {
        self.kernel.graph.notifier_mut().add(listener, None)
    }

    /// Registers a listener receiving the model changes emitted on
    /// `component` or its descendants, and all other notifications.
    ///
    /// The listener is dropped when `component` is deleted.
    pub fn subscribe(
        &mut self,
        component: ComponentId,
        listener: impl Listener,
    ) -> Result<ListenerId, ResolutionError> {
        if !self.kernel.graph.contains(component) {
            return Err(ResolutionError::NoSuchComponent(component));
        }

        Ok(self
            .kernel
            .graph
            .notifier_mut()
            .add(Box::new(listener), Some(component)))
    }

    /// Unregisters a listener; returns `false` if it was not registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.kernel.graph.notifier_mut().remove(id).is_some()
    }

    /// Returns the run state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> MonotonicTime {
        self.kernel.time
    }

    /// Returns the number of events dispatched since the network was set up.
    pub fn event_number(&self) -> u64 {
        self.kernel.event_number
    }

    /// Returns the wall-clock time spent running since the network was set
    /// up.
    pub fn elapsed_run_time(&self) -> Duration {
        self.timer.elapsed()
    }

    /// Returns the number of pending events.
    pub fn pending_events(&self) -> usize {
        self.kernel.fes.len()
    }

    /// Returns the pending events, in no particular order.
    pub fn future_events(&self) -> impl Iterator<Item = &Event> + '_ {
        self.kernel.fes.iter()
    }

    /// Returns the module graph.
    pub fn graph(&self) -> &ModuleGraph {
        &self.kernel.graph
    }

    /// Returns the configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Returns a handle that can request the simulation to stop.
    ///
    /// A request takes effect at the next dispatch boundary of the current
    /// run; requests made while the simulation is paused are discarded when
    /// the next step or run starts.
    pub fn stop_handle(&self) -> StopHandle {
        self.kernel.stop.clone()
    }

    fn sim_time_limit(&self) -> Option<MonotonicTime> {
        self.config
            .sim_time_limit
            .map(|limit| self.config.start_time + limit)
    }

    fn lifecycle(&mut self, event: LifecycleEvent) {
        self.kernel.graph.notifier_mut().lifecycle(&event);
    }

    fn refresh_if_due(&mut self) {
        if self.last_refresh.elapsed() >= self.config.refresh_interval {
            self.refresh();
        }
    }

    fn refresh(&mut self) {
        self.last_refresh = Instant::now();
        let status = RunStatus {
            state: self.state,
            event_number: self.kernel.event_number,
            time: self.kernel.time,
            pending_events: self.kernel.fes.len(),
            elapsed: self.timer.elapsed(),
        };
        self.kernel.graph.notifier_mut().refresh(&status);
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.delete_network();
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("state", &self.state)
            .field("time", &self.kernel.time)
            .field("event_number", &self.kernel.event_number)
            .field("pending_events", &self.kernel.fes.len())
            .finish_non_exhaustive()
    }
}
