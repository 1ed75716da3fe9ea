// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Timekeeping.
//!
//! The runtime never reads a hardware timer by itself. Instead, each
//! [`Runtime`][crate::exec::Runtime] is handed a [`Clock`], which is asked for
//! the current time whenever a timed construct needs it.
//!
//! # Types for describing time
//!
//! `Instant` represents a specific point in time, measured in milliseconds
//! since some arbitrary epoch (usually boot). It's a 64-bit count, which means
//! it overflows every 584 million years. This lets us ignore overflows in
//! deadlines, making everything simpler: a deadline is always computed once,
//! as `now + interval`, and then compared with `now >= deadline` on each tick.
//!
//! `Millis` represents a relative time interval in milliseconds. This uses the
//! same representation as `Instant`, so adding them together is cheap.
//!
//! `core::time::Duration` is accepted anywhere a `Millis` is, but on a small
//! CPU you probably don't want it: `Duration` uses a mixed-number-base format
//! that requires 64-bit multiplies and divides to convert.
//!
//! # Narrow clocks
//!
//! Lots of platforms only offer a 32-bit millisecond counter (the venerable
//! `millis()` being the most famous), which wraps about every 49.7 days. Rather
//! than making every comparison in the runtime wrap-aware, [`Wrapping32`]
//! extends such a counter into a 64-bit `Instant` at the boundary. The only
//! requirement is that it gets read at least once per wrap period, which any
//! live control loop does many times over.

use core::cell::Cell;
use core::ops::{Add, AddAssign};
use core::time::Duration;

/// A moment in time, in milliseconds since an arbitrary epoch.
///
/// Analog of `std::time::Instant`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default, Hash)]
pub struct Instant(u64);

impl Instant {
    /// Constructs an `Instant` `m` milliseconds after the epoch.
    pub const fn from_millis(m: u64) -> Self {
        Self(m)
    }

    /// Subtracts an earlier time from this one, giving the amount of time
    /// between them measured in `Millis`.
    ///
    /// If `earlier` is actually later, this saturates to zero. Clocks are
    /// required to be monotonic, so this only happens if one of the two values
    /// came from somewhere else.
    pub fn millis_since(self, earlier: Instant) -> Millis {
        Millis(self.0.saturating_sub(earlier.0))
    }

    /// Adds some milliseconds to `self`, checking for overflow.
    pub fn checked_add(self, millis: Millis) -> Option<Self> {
        self.0.checked_add(millis.0).map(Instant)
    }

    /// Subtracts some milliseconds from `self`, checking for overflow.
    /// Overflow can occur if `millis` is longer than the time from the epoch
    /// to `self`.
    pub fn checked_sub(self, millis: Millis) -> Option<Self> {
        self.0.checked_sub(millis.0).map(Instant)
    }
}

/// Adds a number of milliseconds to an `Instant`. Saturates rather than
/// wrapping, so a huge timeout means "never" instead of "right now".
impl Add<Millis> for Instant {
    type Output = Self;
    fn add(self, other: Millis) -> Self::Output {
        Instant(self.0.saturating_add(other.0))
    }
}

impl AddAssign<Millis> for Instant {
    fn add_assign(&mut self, other: Millis) {
        *self = *self + other;
    }
}

impl Add<Duration> for Instant {
    type Output = Self;
    fn add(self, other: Duration) -> Self::Output {
        self + Millis::from(other)
    }
}

impl From<Instant> for u64 {
    fn from(t: Instant) -> Self {
        t.0
    }
}

/// A period of time measured in milliseconds.
///
/// This plays a role similar to `core::time::Duration` but is cheaper to use,
/// since it's the unit the runtime keeps time in anyway.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default, Hash)]
pub struct Millis(pub u64);

impl From<Millis> for u64 {
    fn from(x: Millis) -> Self {
        x.0
    }
}

impl From<u64> for Millis {
    fn from(x: u64) -> Self {
        Self(x)
    }
}

impl From<u32> for Millis {
    fn from(x: u32) -> Self {
        Self(u64::from(x))
    }
}

/// Converts a `Duration` to whole milliseconds, rounding down. Durations too
/// long to represent saturate.
impl From<Duration> for Millis {
    fn from(d: Duration) -> Self {
        Self(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// A source of monotonic time.
///
/// Implementations must never go backwards. They are read at most a handful
/// of times per step, so they should be cheap.
pub trait Clock {
    /// Reads the current time.
    fn now(&self) -> Instant;
}

impl<F> Clock for F
    where F: Fn() -> Instant,
{
    fn now(&self) -> Instant {
        self()
    }
}

/// A clock that only moves when told to.
///
/// This is the clock to use for simulation and tests, where the "hardware"
/// timer is whatever the test says it is.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    pub const fn new(start: Instant) -> Self {
        Self { now: Cell::new(start.0) }
    }

    /// Moves the clock to `t`.
    ///
    /// # Panics
    ///
    /// If `t` is earlier than the current reading.
    pub fn set(&self, t: Instant) {
        assert!(t.0 >= self.now.get(), "clocks don't run backwards");
        self.now.set(t.0);
    }

    /// Moves the clock forward by `d`.
    pub fn advance(&self, d: impl Into<Millis>) {
        self.now.set(self.now.get().saturating_add(d.into().0));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant(self.now.get())
    }
}

/// Extends a wrapping 32-bit millisecond counter into a monotonic `Instant`.
///
/// Each read folds the distance travelled since the previous read (computed
/// with wrapping subtraction) into a 64-bit total. As long as reads are less
/// than 2^32 ms apart, wraparound of the source is invisible.
#[derive(Debug)]
pub struct Wrapping32<S> {
    source: S,
    last: Cell<u32>,
    total: Cell<u64>,
}

impl<S> Wrapping32<S>
    where S: Fn() -> u32,
{
    /// Wraps `source`. The current reading becomes `Instant` zero.
    pub fn new(source: S) -> Self {
        let last = source();
        Self {
            source,
            last: Cell::new(last),
            total: Cell::new(0),
        }
    }
}

impl<S> Clock for Wrapping32<S>
    where S: Fn() -> u32,
{
    fn now(&self) -> Instant {
        let raw = (self.source)();
        let delta = raw.wrapping_sub(self.last.replace(raw));
        let total = self.total.get() + u64::from(delta);
        self.total.set(total);
        Instant(total)
    }
}

/// A clock built on the Cortex-M DWT cycle counter.
///
/// The counter is polled, so no interrupt (SysTick or otherwise) is needed.
/// It wraps every `2^32 / core_hz` seconds -- about 26 seconds at 168 MHz --
/// so the clock must be read at least that often. A tick loop driving any
/// timed activity does this without trying.
#[cfg(feature = "cortex-m")]
#[derive(Debug)]
pub struct CycleClock {
    cycles_per_milli: u32,
    last: Cell<u32>,
    cycles: Cell<u64>,
}

#[cfg(feature = "cortex-m")]
impl CycleClock {
    /// Enables the cycle counter and starts counting from zero, assuming a
    /// core clock of `core_hz`.
    pub fn new(
        dcb: &mut cortex_m::peripheral::DCB,
        dwt: &mut cortex_m::peripheral::DWT,
        core_hz: u32,
    ) -> Self {
        dcb.enable_trace();
        dwt.enable_cycle_counter();
        Self {
            cycles_per_milli: (core_hz / 1000).max(1),
            last: Cell::new(cortex_m::peripheral::DWT::cycle_count()),
            cycles: Cell::new(0),
        }
    }
}

#[cfg(feature = "cortex-m")]
impl Clock for CycleClock {
    fn now(&self) -> Instant {
        let raw = cortex_m::peripheral::DWT::cycle_count();
        let delta = raw.wrapping_sub(self.last.replace(raw));
        let cycles = self.cycles.get() + u64::from(delta);
        self.cycles.set(cycles);
        Instant(cycles / u64::from(self.cycles_per_milli))
    }
}
