//! Model components.
//!
//! # Model trait
//!
//! Every component type must implement the [`Model`] trait. The kernel calls
//! its hooks synchronously, each time with a [`Context`] bound to the
//! component:
//!
//! 1. [`Model::build`] right after the component is created, typically to add
//!    gates, parameters and child components,
//! 2. [`Model::initialize`] once per initialization stage, parents before
//!    children, once the whole network is built,
//! 3. [`Model::handle_event`] for every message delivered to the component,
//! 4. [`Model::finalize`] when the simulation ends, children before parents.
//!
//! All hooks have default implementations except that a model which does not
//! override [`Model::handle_event`] fails when it receives a message, which is
//! the expected behavior for pure compound modules.
//!
//! Component types are registered by name in a [`ModelRegistry`], usually
//! through [`SimInit::register`](crate::simulation::SimInit::register), and
//! instantiated by name when the network is set up or when a model calls
//! [`Context::create_module`].
//!
//! # Errors
//!
//! Hooks return a [`ModelError`], which either requests a normal termination
//! of the simulation ([`ModelError::Terminate`]) or reports a failure
//! ([`ModelError::Failure`]). All kernel errors convert into a failure so
//! hooks can use the `?` operator.
//!
//! # Examples
//!
//! A module that sends a message through its `out` gate every second:
//!
//! ```
//! use std::time::Duration;
//!
//! use simkernel::event::{Event, Message};
//! use simkernel::graph::GateType;
//! use simkernel::model::{Context, Model, ModelError};
//!
//! #[derive(Default)]
//! pub struct Ticker {
//!     sent: u32,
//! }
//!
//! impl Model for Ticker {
//!     fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
//!         cx.add_gate("out", GateType::Output, None)?;
//!
//!         Ok(())
//!     }
//!
//!     fn initialize(&mut self, _stage: usize, cx: &mut Context<'_>) -> Result<(), ModelError> {
//!         cx.schedule_in(Duration::from_secs(1), Message::new("tick"))?;
//!
//!         Ok(())
//!     }
//!
//!     fn handle_event(&mut self, event: Event, cx: &mut Context<'_>) -> Result<(), ModelError> {
//!         // Re-arm the timer with the same event, then emit a frame.
//!         cx.schedule_in(Duration::from_secs(1), event)?;
//!         let out = cx.gate("out", None)?;
//!         cx.send(Message::new("frame"), out)?;
//!         self.sent += 1;
//!
//!         Ok(())
//!     }
//! }
//! ```
mod context;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::event::{Event, SchedulingError};
use crate::graph::{ComponentId, GraphError, ResolutionError, StructuralError};

pub use context::Context;

/// Trait implemented by all component types.
pub trait Model: 'static {
    /// Builds the component's structure.
    ///
    /// Called once, right after the component was added to the graph.
    fn build(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
        let _ = cx;

        Ok(())
    }

    /// Returns the number of initialization stages the model takes part in.
    fn num_init_stages(&self) -> usize {
        1
    }

    /// Initializes the model for the given stage.
    ///
    /// Stages run in increasing order over the whole network; within a
    /// stage, parents are initialized before their children.
    fn initialize(&mut self, stage: usize, cx: &mut Context<'_>) -> Result<(), ModelError> {
        let _ = (stage, cx);

        Ok(())
    }

    /// Handles a message delivered to the component.
    fn handle_event(&mut self, event: Event, cx: &mut Context<'_>) -> Result<(), ModelError> {
        let _ = cx;

        Err(ModelError::failure(format!(
            "module does not handle events, received `{}`",
            event.name()
        )))
    }

    /// Finalizes the model at the end of the simulation.
    fn finalize(&mut self, cx: &mut Context<'_>) -> Result<(), ModelError> {
        let _ = cx;

        Ok(())
    }
}

/// Cause of a normal termination.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TerminationKind {
    /// A model ended the simulation.
    EndSimulation,
    /// The future event set ran empty.
    NoMoreEvents,
    /// The simulation time limit was reached.
    SimTimeLimit,
    /// The wall-clock run time limit was exceeded.
    RealTimeLimit,
    /// The simulation was finished on user request.
    Finish,
}

/// A normal end of simulation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TerminationCondition {
    kind: TerminationKind,
    message: String,
}

impl TerminationCondition {
    /// Creates a termination condition.
    pub fn new(kind: TerminationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the cause of the termination.
    pub fn kind(&self) -> TerminationKind {
        self.kind
    }

    /// Returns the descriptive message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An unexpected failure during the simulation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeFailure {
    message: String,
    module: Option<ComponentId>,
    module_path: Option<String>,
}

impl RuntimeFailure {
    /// Creates a failure not attributed to a module yet.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            module: None,
            module_path: None,
        }
    }

    /// Returns the descriptive message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the module in which the failure occurred, if known.
    pub fn module(&self) -> Option<ComponentId> {
        self.module
    }

    /// Returns the full path of the module in which the failure occurred, if
    /// known.
    pub fn module_path(&self) -> Option<&str> {
        self.module_path.as_deref()
    }

    /// Attributes the failure to a module unless it already is.
    pub(crate) fn in_module(mut self, module: ComponentId, path: Option<String>) -> Self {
        if self.module.is_none() {
            self.module = Some(module);
            self.module_path = path;
        }
        self
    }
}

impl fmt::Display for RuntimeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.module_path, self.module) {
            (Some(path), Some(id)) => write!(f, "{} (in module `{}`, id {})", self.message, path, id),
            (None, Some(id)) => write!(f, "{} (in module {})", self.message, id),
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RuntimeFailure {}

/// Error returned by model hooks.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// The simulation should end normally.
    #[error("simulation terminated: {0}")]
    Terminate(TerminationCondition),
    /// The simulation should stop on a failure.
    #[error("{0}")]
    Failure(RuntimeFailure),
}

impl ModelError {
    /// Requests a normal end of the simulation.
    pub fn end_simulation(message: impl Into<String>) -> Self {
        Self::Terminate(TerminationCondition::new(
            TerminationKind::EndSimulation,
            message,
        ))
    }

    /// Reports a failure.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(RuntimeFailure::new(message))
    }
}

macro_rules! failure_from {
    ($($error:ty),*) => {
        $(
            impl From<$error> for ModelError {
                fn from(error: $error) -> Self {
                    Self::failure(error.to_string())
                }
            }
        )*
    };
}

failure_from!(
    GraphError,
    ResolutionError,
    StructuralError,
    SchedulingError,
    SendError
);

/// An error returned when a message cannot be sent.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The gate or destination module could not be resolved.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    /// The gate is not owned by the sending module.
    #[error("gate `{0}` does not belong to the sending module")]
    ForeignGate(String),
    /// Messages can only be sent through output gates.
    #[error("gate `{0}` is not an output gate")]
    NotAnOutput(String),
    /// Direct sends must target an input gate.
    #[error("gate `{0}` is not an input gate")]
    NotAnInput(String),
    /// Direct sends must target an input gate without incoming connection.
    #[error("gate `{0}` is connected")]
    ConnectedInput(String),
    /// The output gate is not connected.
    #[error("gate `{0}` is not connected")]
    NotConnected(String),
    /// The delay accumulated through a channel is not representable.
    #[error("the delay of the channel at gate `{0}` is out of range")]
    InvalidDelay(String),
    /// The gate chain does not end on an input gate.
    #[error("the path starting at `{0}` does not end on an input gate")]
    DanglingPath(String),
}

type Factory = Rc<dyn Fn() -> Box<dyn Model>>;

/// Component types by name.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    factories: HashMap<String, Factory>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component type, replacing any type with the same name.
    pub fn register<M, F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        M: Model,
        F: Fn() -> M + 'static,
    {
        self.factories.insert(
            type_name.into(),
            Rc::new(move || Box::new(factory()) as Box<dyn Model>),
        );
    }

    /// Returns `true` if a type is registered under this name.
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Instantiates a registered type.
    pub fn create(&self, type_name: &str) -> Result<Box<dyn Model>, ResolutionError> {
        self.factories
            .get(type_name)
            .map(|factory| factory())
            .ok_or_else(|| ResolutionError::UnknownType(type_name.to_owned()))
    }

    /// Returns the registered type names, in no particular order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("types", &self.factories.len())
            .finish_non_exhaustive()
    }
}
