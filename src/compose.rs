// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Composition operators.
//!
//! Each operator forks one or more child [`Task`]s when it is first reached,
//! steps them once per step of the task containing it, and retires them
//! according to its own discipline:
//!
//! | Operator | Done when | Cancels |
//! |---|---|---|
//! | [`call`](Runtime::call) | child finished | -- |
//! | [`for_at_most`](Runtime::for_at_most) | child finished, or deadline | child, on deadline |
//! | [`both`](Runtime::both) / [`all3`](Runtime::all3) | every child finished | -- |
//! | [`until`](Runtime::until) | either child finished | the other child |
//! | [`for_each_yield`](Runtime::for_each_yield) | producer finished | -- |
//! | [`alternate`](Runtime::alternate) | either child finished | the other child |
//!
//! Children are always stepped in operand order, first to last, so programs
//! with side effects behave the same way every time.
//!
//! A child is stepped for the first time on the same step its operator is
//! reached, *unless* another child of the same task already finished during
//! that step. In that case the operator suspends once and starts its children
//! on the next step. So in
//!
//! ```ignore
//! rt.call(a).await;
//! rt.call(b).await;
//! ```
//!
//! if `a` finishes on its second step and `b` on its third, the whole thing
//! takes five steps, with `a` running in steps 1-2 and `b` in steps 3-5.
//!
//! [`Runtime::ramp`] is the odd one out: it forks nothing, and just produces a
//! time-interpolated value for the loop that drives it.
//!
//! # Outcomes as branches
//!
//! [`for_at_most`](Runtime::for_at_most) and [`until`](Runtime::until) resolve
//! to a two-way outcome meant to be branched on right away:
//!
//! ```ignore
//! if rt.for_at_most(Millis(250), wait_for_button(rt)).await.is_timed_out() {
//!     // gave up
//! } else {
//!     // got it
//! }
//! ```

use core::cell::Cell;
use core::fmt;
use core::future::Future;
use core::iter::FusedIterator;
use core::task::Poll;

use futures::future::poll_fn;
use pin_utils::pin_mut;

use crate::exec::{Point, Runtime};
use crate::task::{Status, Task};
use crate::time::{Instant, Millis};

/// Outcome of [`Runtime::for_at_most`].
#[must_use]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Timed {
    /// The task finished before the deadline.
    Finished,
    /// The deadline passed first, and the task was cancelled.
    TimedOut,
}

impl Timed {
    /// Checks for `TimedOut`.
    pub fn is_timed_out(self) -> bool {
        self == Timed::TimedOut
    }

    /// Checks for `Finished`.
    pub fn is_finished(self) -> bool {
        self == Timed::Finished
    }
}

/// Which of two tasks an operator ended on.
#[must_use]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Winner {
    /// The first operand.
    First,
    /// The second operand.
    Second,
}

impl Winner {
    /// Checks for `First`.
    pub fn is_first(self) -> bool {
        self == Winner::First
    }

    /// Checks for `Second`.
    pub fn is_second(self) -> bool {
        self == Winner::Second
    }

    fn other(self) -> Self {
        match self {
            Winner::First => Winner::Second,
            Winner::Second => Winner::First,
        }
    }
}

impl<'r> Runtime<'r> {
    /// Runs `f` to completion, then continues.
    ///
    /// This is plain sequential composition: the calling task is suspended at
    /// this point until `f` finishes. `Yielded` from `f` counts as not done.
    #[track_caller]
    pub fn call<F>(&'r self, f: F) -> impl Future<Output = ()> + 'r
        where F: Future<Output = ()> + 'r,
    {
        let at = Point::here();
        async move {
            self.enter(at);
            self.handoff(at).await;
            let child = Task::fork(self, 0, f);
            pin_mut!(child);
            poll_fn(|_| match child.as_mut().step() {
                Status::Finished => Poll::Ready(()),
                Status::Continuing | Status::Yielded => self.park(at),
            }).await
        }
    }

    /// Runs `f` until it finishes or `limit` passes, whichever comes first.
    ///
    /// The deadline is fixed when `f` starts. On each step, `f` is
    /// stepped first and the clock checked second, so if `f` finishes on the
    /// same step the deadline passes, it counts as finished. If the deadline
    /// wins, `f` is cancelled.
    #[track_caller]
    pub fn for_at_most<F>(
        &'r self,
        limit: impl Into<Millis>,
        f: F,
    ) -> impl Future<Output = Timed> + 'r
        where F: Future<Output = ()> + 'r,
    {
        let at = Point::here();
        let limit = limit.into();
        async move {
            self.enter(at);
            self.handoff(at).await;
            let deadline = self.deadline(limit);
            let child = Task::fork(self, 0, f);
            pin_mut!(child);
            poll_fn(|_| {
                if child.as_mut().step().is_finished() {
                    Poll::Ready(Timed::Finished)
                } else if self.now() >= deadline {
                    Poll::Ready(Timed::TimedOut)
                } else {
                    self.park(at)
                }
            }).await
        }
    }

    /// Runs `f` and `g` concurrently until *both* have finished.
    ///
    /// Both are stepped on every step until the end; one that finishes early
    /// just keeps answering `Finished` without running anything.
    #[track_caller]
    pub fn both<F, G>(&'r self, f: F, g: G) -> impl Future<Output = ()> + 'r
        where F: Future<Output = ()> + 'r,
              G: Future<Output = ()> + 'r,
    {
        let at = Point::here();
        async move {
            self.enter(at);
            self.handoff(at).await;
            let f = Task::fork(self, 0, f);
            let g = Task::fork(self, 1, g);
            pin_mut!(f, g);
            poll_fn(|_| {
                let f_done = f.as_mut().step().is_finished();
                let g_done = g.as_mut().step().is_finished();
                if f_done && g_done {
                    Poll::Ready(())
                } else {
                    self.park(at)
                }
            }).await
        }
    }

    /// Three-way version of [`both`](Runtime::both).
    #[track_caller]
    pub fn all3<F, G, H>(
        &'r self,
        f: F,
        g: G,
        h: H,
    ) -> impl Future<Output = ()> + 'r
        where F: Future<Output = ()> + 'r,
              G: Future<Output = ()> + 'r,
              H: Future<Output = ()> + 'r,
    {
        let at = Point::here();
        async move {
            self.enter(at);
            self.handoff(at).await;
            let f = Task::fork(self, 0, f);
            let g = Task::fork(self, 1, g);
            let h = Task::fork(self, 2, h);
            pin_mut!(f, g, h);
            poll_fn(|_| {
                let f_done = f.as_mut().step().is_finished();
                let g_done = g.as_mut().step().is_finished();
                let h_done = h.as_mut().step().is_finished();
                if f_done && g_done && h_done {
                    Poll::Ready(())
                } else {
                    self.park(at)
                }
            }).await
        }
    }

    /// Runs `f` and `g` concurrently until *either* finishes, then cancels the
    /// other.
    ///
    /// Both are stepped on every step. If both finish on the same step, `f`
    /// wins.
    #[track_caller]
    pub fn until<F, G>(&'r self, f: F, g: G) -> impl Future<Output = Winner> + 'r
        where F: Future<Output = ()> + 'r,
              G: Future<Output = ()> + 'r,
    {
        let at = Point::here();
        async move {
            self.enter(at);
            self.handoff(at).await;
            let f = Task::fork(self, 0, f);
            let g = Task::fork(self, 1, g);
            pin_mut!(f, g);
            poll_fn(|_| {
                let f_done = f.as_mut().step().is_finished();
                let g_done = g.as_mut().step().is_finished();
                if f_done {
                    Poll::Ready(Winner::First)
                } else if g_done {
                    Poll::Ready(Winner::Second)
                } else {
                    self.park(at)
                }
            }).await
        }
    }

    /// Runs `producer` to completion, calling `each` once every time it
    /// yields (with [`Runtime::yield_turn`]).
    ///
    /// `each` runs right after the step on which the producer yielded, before
    /// the producer is stepped again. It doesn't run when the producer
    /// finishes. Data is usually passed through a [`Mailbox`].
    #[track_caller]
    pub fn for_each_yield<P, E>(
        &'r self,
        producer: P,
        mut each: E,
    ) -> impl Future<Output = ()> + 'r
        where P: Future<Output = ()> + 'r,
              E: FnMut() + 'r,
    {
        let at = Point::here();
        async move {
            self.enter(at);
            self.handoff(at).await;
            let producer = Task::fork(self, 0, producer);
            pin_mut!(producer);
            poll_fn(|_| match producer.as_mut().step() {
                Status::Finished => Poll::Ready(()),
                Status::Yielded => {
                    each();
                    self.park(at)
                }
                Status::Continuing => self.park(at),
            }).await
        }
    }

    /// Takes turns running `f` and `g`, starting with `f`.
    ///
    /// Only the side holding the turn is stepped. It keeps the turn for as
    /// long as it reports `Continuing`; when it yields, the other side gets
    /// the turn starting with the next step, resuming wherever it left off.
    /// As soon as either side finishes, the whole thing is over and the other
    /// side is cancelled, whatever it was in the middle of.
    ///
    /// The two sides usually talk through a [`Mailbox`] owned by the caller.
    #[track_caller]
    pub fn alternate<F, G>(&'r self, f: F, g: G) -> impl Future<Output = Winner> + 'r
        where F: Future<Output = ()> + 'r,
              G: Future<Output = ()> + 'r,
    {
        let at = Point::here();
        async move {
            self.enter(at);
            self.handoff(at).await;
            let f = Task::fork(self, 0, f);
            let g = Task::fork(self, 1, g);
            pin_mut!(f, g);
            let mut turn = Winner::First;
            poll_fn(|_| {
                let status = match turn {
                    Winner::First => f.as_mut().step(),
                    Winner::Second => g.as_mut().step(),
                };
                match status {
                    Status::Finished => Poll::Ready(turn),
                    Status::Yielded => {
                        turn = turn.other();
                        self.park(at)
                    }
                    Status::Continuing => self.park(at),
                }
            }).await
        }
    }

    /// Produces values sweeping linearly from `lo` to `hi` over `span`.
    ///
    /// The clock is read when `ramp` is called. Each call to `next` yields
    /// the value proportional to the time elapsed since then, until `span` has
    /// elapsed, after which it yields `None`. The loop body is expected to
    /// suspend between values:
    ///
    /// ```ignore
    /// for level in rt.ramp(Millis(1000), 0, 255) {
    ///     led.set_duty(level);
    ///     rt.delay(Millis(20)).await;
    /// }
    /// ```
    pub fn ramp(&'r self, span: impl Into<Millis>, lo: i32, hi: i32) -> Ramp<'r> {
        Ramp {
            rt: self,
            start: self.now(),
            span: span.into(),
            lo,
            hi,
        }
    }
}

/// Interpolation loop returned by [`Runtime::ramp`].
#[derive(Debug)]
pub struct Ramp<'r> {
    rt: &'r Runtime<'r>,
    start: Instant,
    span: Millis,
    lo: i32,
    hi: i32,
}

impl Iterator for Ramp<'_> {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        let elapsed = self.rt.now().millis_since(self.start);
        if elapsed >= self.span {
            None
        } else {
            Some(interpolate(elapsed, self.span, self.lo, self.hi))
        }
    }
}

// Clocks don't go backwards, so once past the end we stay there.
impl FusedIterator for Ramp<'_> {}

/// Maps `elapsed` in `0..=span` linearly onto `lo..=hi`, rounding to nearest.
///
/// Elapsed times past the end clamp to `hi`. A zero-length span is already
/// over, so it also produces `hi`.
pub fn interpolate(elapsed: Millis, span: Millis, lo: i32, hi: i32) -> i32 {
    if elapsed >= span {
        return hi;
    }
    let num = i128::from(elapsed.0) * (i128::from(hi) - i128::from(lo));
    let den = i128::from(span.0);
    let half = den / 2;
    let q = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    // |q| <= |hi - lo|, so this lands between lo and hi.
    (i128::from(lo) + q) as i32
}

/// A one-word slot shared between tasks taking turns.
///
/// The parent owns the mailbox and lends it to both children. Whoever is
/// about to give up the turn writes to it, and whoever takes the turn reads
/// it. There's no queue: the last write wins.
pub struct Mailbox<T> {
    value: Cell<T>,
}

impl<T: Copy> Mailbox<T> {
    /// Creates a mailbox holding `initial`.
    pub const fn new(initial: T) -> Self {
        Self { value: Cell::new(initial) }
    }

    /// Replaces the contents.
    pub fn put(&self, value: T) {
        self.value.set(value);
    }

    /// Reads the contents.
    pub fn get(&self) -> T {
        self.value.get()
    }

    /// Leaves `value` for the other side, yields the turn, and -- once the
    /// turn comes back -- returns whatever the other side left.
    #[track_caller]
    pub fn pass<'r>(&'r self, rt: &'r Runtime<'r>, value: T) -> impl Future<Output = T> + 'r
        where T: 'r,
    {
        let yielding = rt.yield_turn();
        async move {
            self.put(value);
            yielding.await;
            self.get()
        }
    }
}

impl<T: Copy + Default> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Mailbox").field(&self.value.get()).finish()
    }
}
