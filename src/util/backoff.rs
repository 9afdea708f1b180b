/// An [exponential backoff] for spin loops.
///
/// Each call to [`Backoff::spin`] issues twice as many spin loop hints as the
/// last one, until the configured ceiling is reached. Callers that spin for
/// long periods can check [`Backoff::is_saturated`] to decide when to stop
/// burning cycles and do something more useful, like waiting for an event.
///
/// [exponential backoff]: https://en.wikipedia.org/wiki/Exponential_backoff
#[derive(Debug, Copy, Clone)]
pub struct Backoff {
    exp: u8,
    max: u8,
}

// === impl Backoff ===

impl Backoff {
    /// The default maximum exponent (2^8 spins per call).
    pub const DEFAULT_MAX_EXPONENT: u8 = 8;

    /// Returns a new exponential backoff with the maximum exponent set to
    /// [`Self::DEFAULT_MAX_EXPONENT`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            exp: 0,
            max: Self::DEFAULT_MAX_EXPONENT,
        }
    }

    /// Returns a new exponential backoff with the provided max exponent.
    ///
    /// # Panics
    ///
    /// If `max` is greater than [`Self::DEFAULT_MAX_EXPONENT`].
    #[must_use]
    pub fn with_max_exponent(max: u8) -> Self {
        assert!(max <= Self::DEFAULT_MAX_EXPONENT);
        Self { exp: 0, max }
    }

    /// Backs off in a spin loop, issuing `2^exp` [spin loop hints].
    ///
    /// Under `cfg(loom)`, this yields to the model scheduler instead.
    ///
    /// [spin loop hints]: core::hint::spin_loop
    #[inline(always)]
    pub fn spin(&mut self) {
        #[cfg_attr(loom, allow(unused_variables))]
        let spins = 1u32 << self.exp;

        #[cfg(not(loom))]
        for _ in 0..spins {
            crate::loom::hint::spin_loop();
        }

        #[cfg(loom)]
        {
            test_debug!("would back off for {spins} spins");
            loom::thread::yield_now();
        }

        if self.exp < self.max {
            self.exp += 1
        }
    }

    /// Returns `true` once the backoff has reached its maximum exponent.
    #[inline]
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.exp >= self.max
    }

    /// Resets the backoff to its initial exponent.
    #[inline]
    pub fn reset(&mut self) {
        self.exp = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_at_max() {
        let mut boff = Backoff::with_max_exponent(2);
        assert!(!boff.is_saturated());
        boff.spin();
        boff.spin();
        assert!(boff.is_saturated());
        boff.spin();
        assert!(boff.is_saturated());

        boff.reset();
        assert!(!boff.is_saturated());
    }

    #[test]
    #[should_panic]
    fn max_exponent_is_bounded() {
        let _ = Backoff::with_max_exponent(Backoff::DEFAULT_MAX_EXPONENT + 1);
    }
}
