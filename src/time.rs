//! Monotonic clocks for computing deadlines.
//!
//! See the documentation for the [`Clock`] type for more details.
use core::{fmt, time::Duration};

/// A hardware clock definition.
///
/// A `Clock` consists of a function that returns the hardware clock's current
/// timestamp in ticks (`now()`), and a [`Duration`] that defines the amount
/// of time represented by a single tick of the clock. A [`PollingCondvar`]
/// uses a `Clock` to turn relative timeouts into absolute deadlines, and to
/// report its [`current_time`] in milliseconds.
///
/// # Monotonicity
///
/// Implementations of `now()` MUST ensure that timestamps returned by `now()`
/// are [monotonically non-decreasing][monotonic], and do not overflow for as
/// long as the system is expected to run. If the hardware counter is narrower
/// than 64 bits, the `now()` function is responsible for extending it, such
/// as by counting overflows.
///
/// # Examples
///
/// A clock driven by a periodic timer interrupt that increments a counter
/// once per millisecond:
///
/// ```rust
/// use mycelium_condvar::time::Clock;
/// use core::{sync::atomic::{AtomicU64, Ordering}, time::Duration};
///
/// static TICKS: AtomicU64 = AtomicU64::new(0);
///
/// // The timer interrupt handler.
/// fn on_timer_interrupt() {
///     TICKS.fetch_add(1, Ordering::Relaxed);
/// }
///
/// let clock = Clock::new(Duration::from_millis(1), || TICKS.load(Ordering::Relaxed))
///     .named("systick");
///
/// on_timer_interrupt();
/// on_timer_interrupt();
/// assert_eq!(clock.now_ms(), 2);
/// ```
///
/// [`PollingCondvar`]: crate::PollingCondvar
/// [`current_time`]: crate::TimedConditionVariable::current_time
/// [monotonic]: https://en.wikipedia.org/wiki/Monotonic_function
#[derive(Clone)]
pub struct Clock {
    now: fn() -> u64,
    tick_duration: Duration,
    name: &'static str,
}

// === impl Clock ===

impl Clock {
    /// Returns a new [`Clock`] with the provided tick [`Duration`] and
    /// `now()` function.
    ///
    /// # Panics
    ///
    /// If `tick_duration` is zero.
    #[must_use]
    pub const fn new(tick_duration: Duration, now: fn() -> u64) -> Self {
        assert!(!tick_duration.is_zero(), "a clock's ticks must have a duration");
        Self {
            now,
            tick_duration,
            name: "<unnamed mystery clock>",
        }
    }

    /// Add an arbitrary user-defined name to this `Clock`.
    ///
    /// This is generally used to describe the hardware time source used by the
    /// `now()` function for this `Clock`.
    #[must_use]
    pub const fn named(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Returns the current `now` timestamp, in ticks of this clock's base
    /// tick duration.
    #[inline]
    #[must_use]
    pub fn now_ticks(&self) -> u64 {
        (self.now)()
    }

    /// Returns the current timestamp, converted to whole milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        ticks_to_ms(self.now_ticks(), self.tick_duration)
    }

    /// Returns the [`Duration`] of one tick of this clock.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Returns this `Clock`'s name, if it was given one using the
    /// [`Clock::named`] method.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(all(any(feature = "std", test), not(loom)))]
impl Clock {
    /// Returns a clock that measures the time elapsed since it was first
    /// read by this process, in microsecond ticks.
    #[must_use]
    pub fn host() -> Self {
        Clock::new(Duration::from_micros(1), crate::host::host_micros).named("host")
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            name,
            tick_duration,
            now: _,
        } = self;
        f.debug_struct("Clock")
            .field("name", name)
            .field("tick_duration", tick_duration)
            .finish()
    }
}

fn ticks_to_ms(ticks: u64, tick_duration: Duration) -> u64 {
    let nanos = u128::from(ticks) * tick_duration.as_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or(u64::MAX)
}
