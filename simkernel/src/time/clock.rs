use std::time::{Duration, Instant};

use tai_time::MonotonicClock;

use crate::time::MonotonicTime;

/// A type that can be used to pace a simulation against the wall clock.
///
/// The kernel calls [`Clock::synchronize()`] after taking an event from the
/// future event set and before dispatching it, with the event's timestamp as
/// deadline.
///
/// A clock can be associated to a simulation prior to initialization by calling
/// [`SimInit::set_clock()`](crate::simulation::SimInit::set_clock).
pub trait Clock {
    /// Blocks until the wall clock matches the deadline expressed in
    /// simulation time.
    fn synchronize(&mut self, deadline: MonotonicTime) -> SyncStatus;
}

/// The current synchronization status of a clock.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// The clock is synchronized.
    Synchronized,
    /// The deadline has already elapsed and lags behind the current clock time
    /// by the duration given in the payload.
    OutOfSync(Duration),
}

/// A [`Clock`] that ignores synchronization.
///
/// This is the default clock: the simulation runs as fast as possible.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoClock {}

impl NoClock {
    /// Constructs a new `NoClock` object.
    pub fn new() -> Self {
        Self {}
    }
}

impl Clock for NoClock {
    fn synchronize(&mut self, _: MonotonicTime) -> SyncStatus {
        SyncStatus::Synchronized
    }
}

/// A real-time [`Clock`] based on the system's monotonic clock.
///
/// The offset between simulation time and wall clock is fixed at
/// construction by pairing a simulation timestamp with an [`Instant`].
#[derive(Copy, Clone, Debug)]
pub struct SystemClock(MonotonicClock);

impl SystemClock {
    /// Constructs a `SystemClock` for which `simulation_ref` coincides with
    /// `wall_clock_ref`.
    ///
    /// The provided reference time may lie in the past or in the future.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::{Duration, Instant};
    ///
    /// use simkernel::simulation::SimInit;
    /// use simkernel::time::{MonotonicTime, SystemClock};
    ///
    /// let t0 = MonotonicTime::new(1_234_567_890, 0).unwrap();
    ///
    /// // Make the simulation start in 1s.
    /// let clock = SystemClock::from_instant(t0, Instant::now() + Duration::from_secs(1));
    ///
    /// let simu = SimInit::new().start_time(t0).set_clock(clock).init();
    /// ```
    pub fn from_instant(simulation_ref: MonotonicTime, wall_clock_ref: Instant) -> Self {
        Self(MonotonicClock::init_from_instant(
            simulation_ref,
            wall_clock_ref,
        ))
    }
}

impl Clock for SystemClock {
    /// Sleeps until the system time corresponds to the deadline, or reports
    /// by how much the deadline was missed.
    fn synchronize(&mut self, deadline: MonotonicTime) -> SyncStatus {
        let now = self.0.now();
        if now <= deadline {
            spin_sleep::sleep(deadline.duration_since(now));

            return SyncStatus::Synchronized;
        }

        SyncStatus::OutOfSync(now.duration_since(deadline))
    }
}

/// A real-time [`Clock`] whose reference is the first synchronized event.
///
/// The first call to [`synchronize()`](Clock::synchronize) never blocks and
/// pairs its deadline with the current instant; subsequent calls behave like
/// a [`SystemClock`].
#[derive(Copy, Clone, Debug, Default)]
pub struct AutoSystemClock {
    inner: Option<SystemClock>,
}

impl AutoSystemClock {
    /// Constructs a new `AutoSystemClock`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for AutoSystemClock {
    fn synchronize(&mut self, deadline: MonotonicTime) -> SyncStatus {
        match &mut self.inner {
            None => {
                self.inner = Some(SystemClock::from_instant(deadline, Instant::now()));

                SyncStatus::Synchronized
            }
            Some(clock) => clock.synchronize(deadline),
        }
    }
}

/// Accumulates the wall-clock time spent running the simulation.
///
/// The timer only runs between [`start`](RunTimer::start) and
/// [`stop`](RunTimer::stop), so time spent paused is not accounted for.
#[derive(Clone, Debug, Default)]
pub(crate) struct RunTimer {
    accumulated: Duration,
    started_at: Option<Instant>,
}

impl RunTimer {
    /// Starts the timer; does nothing if it is already running.
    pub(crate) fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    /// Stops the timer, adding the time elapsed since the last start.
    pub(crate) fn stop(&mut self) {
        if let Some(started_at) = self.started_at.take() {
            self.accumulated += started_at.elapsed();
        }
    }

    /// Returns the accumulated running time, including the current interval.
    pub(crate) fn elapsed(&self) -> Duration {
        self.accumulated
            + self
                .started_at
                .map(|started_at| started_at.elapsed())
                .unwrap_or_default()
    }

    /// Resets the accumulated time to zero and stops the timer.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
