//! Simulation time and real-time pacing.
//!
//! This module provides most notably:
//!
//! * [`MonotonicTime`]: a monotonic timestamp based on the [TAI] time standard,
//!   used for event times throughout the kernel,
//! * [`Clock`]: a trait for types that can synchronize a simulation with the
//!   wall clock, implemented for instance by [`SystemClock`] and
//!   [`AutoSystemClock`].
//!
//! Clock synchronization happens between event dispatches, right before the
//! simulation time is advanced to that of the next event. A clock can delay
//! an event but never reorder or skip one.
//!
//! [TAI]: https://en.wikipedia.org/wiki/International_Atomic_Time
//!
//!
//! # Examples
//!
//! Running a simulation in real time, starting from the first event:
//!
//! ```
//! use simkernel::simulation::SimInit;
//! use simkernel::time::AutoSystemClock;
//!
//! let simu = SimInit::new().set_clock(AutoSystemClock::new()).init();
//! ```

mod clock;

pub use tai_time::MonotonicTime;

pub use clock::{AutoSystemClock, Clock, NoClock, SyncStatus, SystemClock};
pub(crate) use clock::RunTimer;
