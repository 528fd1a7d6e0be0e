//! A discrete-event simulation kernel for hierarchical networks of modules.
//!
//! Simkernel advances a simulated network of interconnected components by
//! processing timestamped events in causal order. A network is a tree of
//! modules; modules own typed, directional gates, and gates are chained into
//! connection paths, optionally through channels with a propagation delay and
//! a data rate. Messages travel along these paths, or directly from one
//! module to another, and are delivered to the handling hook of the module
//! they arrive at.
//!
//! The kernel is single-threaded and deterministic: pending events are
//! totally ordered by time, then priority, then insertion sequence, and every
//! change made by a model hook is visible to the next dispatch.
//!
//! # A practical overview
//!
//! Simulating a system with simkernel involves three activities:
//!
//! 1. the design of component types, which implement the [`Model`] trait,
//! 2. the description of the network structure, performed by the `build`
//!    hooks of compound modules that create their children and connect
//!    their gates,
//! 3. the execution of the simulation through the run-control surface of
//!    [`Simulation`].
//!
//! [`Model`]: model::Model
//! [`Simulation`]: simulation::Simulation
//!
//! ## Modules, gates and models
//!
//! Each module of the network is an instance of a registered component type.
//! The kernel keeps the structure (names, hierarchy, gates, connections,
//! parameters) in the [`ModuleGraph`](graph::ModuleGraph) and the behavior in
//! the model instance, whose hooks receive a [`Context`](model::Context) bound
//! to the module:
//!
//! * [`build`](model::Model::build) adds gates and children right after the
//!   module is created,
//! * [`initialize`](model::Model::initialize) runs once per initialization
//!   stage, parents before children,
//! * [`handle_event`](model::Model::handle_event) receives the messages
//!   delivered to the module,
//! * [`finalize`](model::Model::finalize) runs at the end of the simulation,
//!   children before parents.
//!
//! A hook ends the simulation normally by returning
//! [`ModelError::Terminate`](model::ModelError::Terminate) and reports a
//! failure with [`ModelError::Failure`](model::ModelError::Failure); a panic in
//! a hook is caught and reported as a failure of that module.
//!
//! ## Running a simulation
//!
//! A [`SimInit`](simulation::SimInit) builder registers the component types
//! and configures the kernel. The network is then set up by instantiating its
//! root type, and run either one event at a time with
//! [`step`](simulation::Simulation::step) or until a stop condition with
//! [`run`](simulation::Simulation::run).
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! use simkernel::event::{Event, Message};
//! use simkernel::graph::{Channel, GateType};
//! use simkernel::model::{Context, Model, ModelError};
//! use simkernel::simulation::{RunMode, RunUntil, SimInit, StopReason};
//! use simkernel::time::MonotonicTime;
//!
//! // A compound module holding a source connected to a sink.
//! struct Net;
//!
//! impl Model for Net {
//!     fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
//!         let net = cx.module_id();
//!         let source = cx.create_module("Source", "source", net, None)?;
//!         let sink = cx.create_module("Sink", "sink", net, None)?;
//!
//!         let out = cx.gate_of(source, "out", None)?;
//!         let input = cx.gate_of(sink, "in", None)?;
//!         cx.connect(out, input, Some(Channel::with_delay(Duration::from_millis(10))))?;
//!
//!         Ok(())
//!     }
//! }
//!
//! // Emits a frame every second.
//! struct Source;
//!
//! impl Model for Source {
//!     fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
//!         cx.add_gate("out", GateType::Output, None)?;
//!
//!         Ok(())
//!     }
//!
//!     fn initialize(&mut self, _stage: usize, cx: &mut Context<'_>) -> Result<(), ModelError> {
//!         cx.schedule_in(Duration::ZERO, Message::new("tick"))?;
//!
//!         Ok(())
//!     }
//!
//!     fn handle_event(&mut self, event: Event, cx: &mut Context<'_>) -> Result<(), ModelError> {
//!         let out = cx.gate("out", None)?;
//!         cx.send(Message::new("frame"), out)?;
//!         cx.schedule_in(Duration::from_secs(1), event)?;
//!
//!         Ok(())
//!     }
//! }
//!
//! // Counts the frames it receives.
//! struct Sink {
//!     received: Rc<Cell<u32>>,
//! }
//!
//! impl Model for Sink {
//!     fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
//!         cx.add_gate("in", GateType::Input, None)?;
//!
//!         Ok(())
//!     }
//!
//!     fn handle_event(&mut self, _event: Event, _cx: &mut Context<'_>) -> Result<(), ModelError> {
//!         self.received.set(self.received.get() + 1);
//!
//!         Ok(())
//!     }
//! }
//!
//! let received = Rc::new(Cell::new(0));
//! let counter = received.clone();
//!
//! let mut simu = SimInit::new()
//!     .register("Net", || Net)
//!     .register("Source", || Source)
//!     .register("Sink", move || Sink { received: counter.clone() })
//!     .sim_time_limit(Duration::from_millis(3500))
//!     .init_network("Net")?;
//!
//! let reason = simu.run(RunMode::Normal, RunUntil::new())?;
//!
//! // Ticks at 0, 1, 2 and 3 s; the tick at 4 s lies beyond the limit.
//! assert!(matches!(reason, StopReason::Terminated(_)));
//! assert_eq!(received.get(), 4);
//! assert_eq!(simu.time(), MonotonicTime::EPOCH + Duration::from_millis(3500));
//! # Ok::<(), simkernel::simulation::ExecutionError>(())
//! ```
//!
//! ## Observing a simulation
//!
//! Every structural change fires a pair of pre/post
//! [`ModelChange`](notify::ModelChange) notifications, and the run loop
//! reports life-cycle transitions, dispatched events, sent messages and
//! periodic status refreshes. Observers implement the
//! [`Listener`](notify::Listener) trait; the
//! [`NotificationBuffer`](notify::NotificationBuffer) listener simply records
//! everything it receives.
//!
//! The kernel also logs through the [`tracing`](https://docs.rs/tracing)
//! crate, with every model hook running in a `module` span. See the
//! `simkernel::tracing` module for simulation-time stamping of log lines
//! (requires the `tracing` feature).
//!
//! # Feature flags
//!
//! * `tracing`: exposes `tracing::SimulationTime`, a timer for
//!   `tracing-subscriber` printing the simulation time,
//! * `serde`: derives `serde::Deserialize` for
//!   [`KernelConfig`](simulation::KernelConfig).
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod event;
pub mod graph;
pub mod model;
pub mod notify;
pub mod simulation;
pub mod time;
#[cfg(feature = "tracing")]
pub mod tracing;
pub(crate) mod util;
