//! Support for structured logging.
//!
//! # Overview
//!
//! The kernel logs through the [`tracing`] crate. Every model hook, whether
//! it builds, initializes, handles an event or finalizes a module, runs inside
//! a [`tracing::Span`] with the following metadata:
//!
//! - name: `module`,
//! - target: `simkernel`,
//! - verbosity level: [`Level::INFO`](tracing::Level::INFO),
//! - a unique field called `path`, holding the full path of the module, e.g.
//!   `net.host[2].app`.
//!
//! The kernel itself logs network setup, termination and finalization at the
//! `info` level and every dispatched event at the `debug` level.
//!
//! By default the [`tracing_subscriber::fmt`][mod@tracing_subscriber::fmt]
//! subscriber timestamps events with the wall clock time. This module provides
//! a [`SimulationTime`] timer that stamps events emitted while an event is
//! being dispatched with the simulation time instead.
//!
//! # Configuration
//!
//! ```
//! use simkernel::tracing::SimulationTime;
//!
//! tracing_subscriber::fmt()
//!     .with_timer(SimulationTime::with_system_timer())
//!     .init();
//! ```
//!
//! This timer reverts to system time stamping for tracing events generated
//! outside of event dispatching:
//!
//! ```text
//! [1970-01-01 00:00:05.000000000]  WARN module{path="net.sink"}: my_simulation: queue is full
//! 2024-09-10T14:39:24.670921Z  INFO simkernel::simulation: simulation terminated
//! ```
//!
//! Alternatively, `SimulationTime::with_system_timer_always()` prepends the
//! system time to all events, including simulation events.
//!
//! # Event filtering examples
//!
//! To only see warnings and errors but keep module span information:
//!
//! ```text
//! $ RUST_LOG="warn,[module]=info" cargo run --release my_simulation
//! ```
//!
//! To see warnings of a single module:
//!
//! ```text
//! $ RUST_LOG="[module{path=net.sink}]=warn" cargo run --release my_simulation
//! ```
use std::cell::Cell;
use std::fmt;

use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};

use crate::time::MonotonicTime;

thread_local! {
    static DISPATCH_TIME: Cell<Option<MonotonicTime>> = const { Cell::new(None) };
}

/// Marks the current thread as dispatching an event at `time` until the
/// returned guard is dropped.
pub(crate) fn enter_dispatch(time: MonotonicTime) -> DispatchGuard {
    let previous = DISPATCH_TIME.with(|cell| cell.replace(Some(time)));

    DispatchGuard { previous }
}

/// Restores the previous dispatch time on drop.
pub(crate) struct DispatchGuard {
    previous: Option<MonotonicTime>,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCH_TIME.with(|cell| cell.set(self.previous));
    }
}

/// A timer that can be used in conjunction with the
/// [`tracing-subscriber`][tracing_subscriber] crate to log events using the
/// simulation time instead of (or on top of) the wall clock time.
///
/// See the [module-level documentation][crate::tracing] for more details.
#[derive(Default, Debug)]
pub struct SimulationTime<const VERBOSE: bool, T> {
    sys_timer: T,
}

impl SimulationTime<false, SystemTime> {
    /// Constructs a new simulation timer which falls back to the [`SystemTime`]
    /// timer for events generated outside of event dispatching.
    pub fn with_system_timer() -> Self {
        Self::default()
    }
}

impl SimulationTime<true, SystemTime> {
    /// Constructs a new simulation timer which prepends a [`SystemTime`]
    /// timestamp to all tracing events, as well as a simulation timestamp for
    /// events emitted during dispatching.
    pub fn with_system_timer_always() -> Self {
        Self::default()
    }
}

impl<T: FormatTime> SimulationTime<false, T> {
    /// Constructs a new simulation timer which falls back to the provided
    /// timer outside of event dispatching.
    pub fn with_custom_timer(sys_timer: T) -> Self {
        Self { sys_timer }
    }
}

impl<T: FormatTime> SimulationTime<true, T> {
    /// Constructs a new simulation timer which prepends a timestamp generated
    /// with the provided timer to all tracing events.
    pub fn with_custom_timer_always(sys_timer: T) -> Self {
        Self { sys_timer }
    }
}

impl<const VERBOSE: bool, T: FormatTime> FormatTime for SimulationTime<VERBOSE, T> {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        match DISPATCH_TIME.with(Cell::get) {
            Some(time) => {
                if VERBOSE {
                    self.sys_timer.format_time(w)?;
                    w.write_char(' ')?;
                }
                write!(w, "[{:.9}]", time)
            }
            None => self.sys_timer.format_time(w),
        }
    }
}
