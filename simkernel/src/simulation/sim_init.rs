use std::fmt;
use std::time::Duration;

use crate::model::{Model, ModelRegistry};
use crate::notify::Listener;
use crate::time::{Clock, MonotonicTime, NoClock};

use super::{ExecutionError, Simulation};

/// Tunables of the kernel.
///
/// With the `serde` feature, the configuration can be deserialized from any
/// format supported by `serde`; missing fields take their default value. The
/// start time is not deserialized and is set with
/// [`SimInit::start_time`] instead.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct KernelConfig {
    /// Simulation time at which the network is set up.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub start_time: MonotonicTime,
    /// Simulation time limit, relative to the start time.
    pub sim_time_limit: Option<Duration>,
    /// Limit on the accumulated wall-clock run time.
    pub real_time_limit: Option<Duration>,
    /// Number of events between status refreshes in fast mode.
    pub fast_refresh_events: u64,
    /// Number of events between condition checks in express mode.
    pub express_check_events: u64,
    /// Minimum wall-clock period between status refreshes in fast and
    /// express modes.
    pub refresh_interval: Duration,
    /// Interrupt the run rather than terminate it when the future event set
    /// runs empty, waiting for events inserted with
    /// [`Simulation::inject`].
    pub external_events: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            start_time: MonotonicTime::EPOCH,
            sim_time_limit: None,
            real_time_limit: None,
            fast_refresh_events: 16,
            express_check_events: 256,
            refresh_interval: Duration::from_secs(1),
            external_events: false,
        }
    }
}

/// Builder for a simulation.
pub struct SimInit {
    registry: ModelRegistry,
    config: KernelConfig,
    clock: Box<dyn Clock + 'static>,
    listeners: Vec<Box<dyn Listener>>,
}

impl SimInit {
    /// Creates a builder with the default configuration, no registered type
    /// and no clock.
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    /// Creates a builder with the specified configuration.
    pub fn with_config(config: KernelConfig) -> Self {
        Self {
            registry: ModelRegistry::new(),
            config,
            clock: Box::new(NoClock::new()),
            listeners: Vec::new(),
        }
    }

    /// Registers a component type under a name.
    pub fn register<M, F>(mut self, type_name: impl Into<String>, factory: F) -> Self
    where
        M: Model,
        F: Fn() -> M + 'static,
    {
        self.registry.register(type_name, factory);

        self
    }

    /// Synchronize the simulation with the provided [`Clock`].
    ///
    /// If the clock isn't explicitly set then the default [`NoClock`] is used,
    /// resulting in the simulation running as fast as possible.
    pub fn set_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);

        self
    }

    /// Sets the simulation time at which networks are set up.
    pub fn start_time(mut self, start_time: MonotonicTime) -> Self {
        self.config.start_time = start_time;

        self
    }

    /// Terminates the simulation once the next event lies beyond the start
    /// time plus `limit`.
    pub fn sim_time_limit(mut self, limit: Duration) -> Self {
        self.config.sim_time_limit = Some(limit);

        self
    }

    /// Terminates the simulation once it has run for `limit` of wall-clock
    /// time.
    pub fn real_time_limit(mut self, limit: Duration) -> Self {
        self.config.real_time_limit = Some(limit);

        self
    }

    /// Interrupts rather than terminates a run when no event is pending.
    pub fn external_events(mut self, enabled: bool) -> Self {
        self.config.external_events = enabled;

        self
    }

    /// Registers a global listener.
    pub fn add_listener(mut self, listener: impl Listener) -> Self {
        self.listeners.push(Box::new(listener));

        self
    }

    /// Builds a simulation with no network.
    pub fn init(self) -> Simulation {
        let mut simulation = Simulation::new(self.registry, self.config, self.clock);
        for listener in self.listeners {
            simulation.add_boxed_listener(listener);
        }

        simulation
    }

    /// Builds a simulation and sets up a network of the given type.
    pub fn init_network(self, network_type: &str) -> Result<Simulation, ExecutionError> {
        let mut simulation = self.init();
        simulation.setup_network(network_type)?;

        Ok(simulation)
    }
}

impl Default for SimInit {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimInit")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
