//! Scheduler time.
//!
//! The scheduler advances in whole cycles; there is no finer grain.
//! Wake-up delays, FU latencies and delay-pipeline depths are all cycle
//! counts, and future events are keyed by the cycle they land in.

use std::fmt;

/// A point in scheduler time, counted in cycles since reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Cycles(pub u64);

impl Cycles {
    pub const ZERO: Self = Self(0);
    /// The per-tick increment.
    pub const ONE: Self = Self(1);

    #[must_use]
    pub const fn new(count: u64) -> Self {
        Self(count)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The cycle a wake-up scheduled now with `delay` lands in. Delays
    /// are latency-derived and fit in 32 bits.
    #[must_use]
    pub const fn delayed_by(self, delay: u32) -> Self {
        Self(self.0 + delay as u64)
    }

    /// Whole cycles elapsed since `earlier`; zero if `earlier` has not
    /// happened yet.
    #[must_use]
    pub const fn since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl core::ops::AddAssign for Cycles {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl fmt::Display for Cycles {
    /// Renders as `cycle N` — the stamp trace messages carry, standing
    /// in for an event queue that timestamps every line itself.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_advance_by_one() {
        let mut now = Cycles::ZERO;
        now += Cycles::ONE;
        now += Cycles::ONE;
        assert_eq!(now, Cycles::new(2));
    }

    #[test]
    fn delayed_by_lands_in_the_future() {
        let now = Cycles::new(10);
        assert_eq!(now.delayed_by(4), Cycles::new(14));
        assert_eq!(now.delayed_by(0), now);
    }

    #[test]
    fn since_saturates_at_zero() {
        assert_eq!(Cycles::new(7).since(Cycles::new(3)), 4);
        assert_eq!(Cycles::new(3).since(Cycles::new(7)), 0);
    }

    #[test]
    fn display_is_a_trace_stamp() {
        assert_eq!(Cycles::new(42).to_string(), "cycle 42");
    }
}
