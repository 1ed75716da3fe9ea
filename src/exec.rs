// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduling context, plus the primitive suspension points.
//!
//! Every task body and every composition operator receives a [`Runtime`]. It
//! is the *only* place the scheduler keeps state that is visible across tasks:
//!
//! - the clock used for every deadline,
//! - the [`Tree`] recording which tasks are live,
//! - a register naming the task currently being stepped, so that operators
//!   know whose children they are forking,
//! - the yield flag, which is how a body reports
//!   [`Status::Yielded`][crate::task::Status::Yielded] rather than
//!   [`Status::Continuing`][crate::task::Status::Continuing],
//! - the suspension point most recently installed, which becomes the task's
//!   resumption marker, and
//! - the first fault raised while building the tree.
//!
//! There are no globals. Two activities with two `Runtime`s can't see each
//! other, and a `Runtime` can't be shared between threads.
//!
//! # Suspension points
//!
//! A task body is an `async` block or `async fn`; each `.await` on one of the
//! primitives here (or on an operator from [`compose`][crate::compose]) is a
//! suspension point. The primitives are:
//!
//! - [`Runtime::delay`] / [`Runtime::delay_until`]: wait for a deadline.
//! - [`Runtime::wait_until`]: wait for a condition, re-evaluated every tick.
//! - [`Runtime::yield_turn`]: cede control, reporting `Yielded`.
//!
//! Each of them records its source location (via `#[track_caller]`) as a
//! [`Point`]. With the `trace` feature on, entering a suspension point emits
//! one `log` record naming the task and the point.
//!
//! # The hazard
//!
//! Code between two suspension points runs to completion inside one step. A
//! body that loops without awaiting anything never gives control back, and
//! every other task -- plus the driver -- starves. Nothing here can detect or
//! interrupt that.

use core::cell::Cell;
use core::fmt;
use core::future::Future;
use core::mem;
use core::panic::Location;
use core::pin::Pin;
use core::task::{Context, Poll};

use futures::future::poll_fn;
use pin_project::pin_project;

use crate::error::Error;
use crate::time::{Clock, Instant, Millis};
use crate::tree::{TaskId, Tree};

/// A suspension point: the place in a task body where it last stopped.
///
/// Points are identified by source location (file, line and column), so two
/// `.await`s on one line are still told apart, and trace output reads like a
/// compiler diagnostic.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Point(&'static Location<'static>);

impl Point {
    /// Captures the location of the caller (or, through `#[track_caller]`,
    /// the caller's caller).
    #[track_caller]
    pub fn here() -> Self {
        Point(Location::caller())
    }

    /// Source file containing the point.
    pub fn file(&self) -> &'static str {
        self.0.file()
    }

    /// Line number of the point.
    pub fn line(&self) -> u32 {
        self.0.line()
    }

    /// Column of the point.
    pub fn column(&self) -> u32 {
        self.0.column()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.0.file(), self.0.line(), self.0.column())
    }
}

/// Scheduling context for one top-level activity.
///
/// Create one per activity, next to the activity's [`Tree`], and hand it to
/// the [`Driver`][crate::driver::Driver].
pub struct Runtime<'a> {
    clock: &'a dyn Clock,
    tree: &'a dyn Tree,
    current: Cell<Option<TaskId>>,
    yielded: Cell<bool>,
    point: Cell<Option<Point>>,
    settled: Cell<bool>,
    fault: Cell<Option<Error>>,
}

/// The registers that belong to whichever task is being stepped, saved while
/// one of its children is stepped instead.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Frame {
    pub(crate) current: Option<TaskId>,
    /// Set when a child of `current` finished during the current step.
    pub(crate) settled: bool,
}

impl<'a> Runtime<'a> {
    /// Creates a context reading time from `clock` and recording tasks in
    /// `tree`.
    pub fn new(clock: &'a dyn Clock, tree: &'a dyn Tree) -> Self {
        Self {
            clock,
            tree,
            current: Cell::new(None),
            yielded: Cell::new(false),
            point: Cell::new(None),
            settled: Cell::new(false),
            fault: Cell::new(None),
        }
    }

    /// Reads the clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Computes the deadline `d` from now.
    pub fn deadline(&self, d: impl Into<Millis>) -> Instant {
        self.now() + d.into()
    }

    /// The tree this context records tasks in.
    pub fn tree(&self) -> &'a dyn Tree {
        self.tree
    }

    /// The task currently being stepped, if any.
    pub fn current(&self) -> Option<TaskId> {
        self.current.get()
    }

    /// The fault raised during the current step, if any. Drivers collect (and
    /// clear) this after each step.
    pub fn fault(&self) -> Option<Error> {
        self.fault.get()
    }

    /// Records a structural fault. Only the first fault of a step is kept;
    /// later ones are usually consequences of it.
    pub(crate) fn raise(&self, e: Error) {
        if self.fault.get().is_none() {
            self.fault.set(Some(e));
        }
    }

    pub(crate) fn take_fault(&self) -> Option<Error> {
        self.fault.take()
    }

    /// Makes `id` the current task and clears the per-step registers.
    /// Returns the caller's frame, to be put back with `restore`.
    pub(crate) fn begin_step(&self, id: Option<TaskId>) -> Frame {
        self.yielded.set(false);
        self.point.set(None);
        Frame {
            current: self.current.replace(id),
            settled: self.settled.replace(false),
        }
    }

    /// Collects what the body reported while it ran: the suspension point it
    /// stopped at, and whether it stopped by yielding.
    pub(crate) fn end_step(&self) -> (Option<Point>, bool) {
        (self.point.take(), self.yielded.replace(false))
    }

    pub(crate) fn restore(&self, frame: Frame) {
        self.current.set(frame.current);
        self.settled.set(frame.settled);
    }

    /// Notes that the current task has reached suspension point `at`.
    pub(crate) fn enter(&self, at: Point) {
        trace_enter(self.current.get(), at);
    }

    /// Installs `at` as the resumption marker and suspends.
    pub(crate) fn park<T>(&self, at: Point) -> Poll<T> {
        self.point.set(Some(at));
        Poll::Pending
    }

    /// Like `park`, but reports the suspension as a yield.
    pub(crate) fn park_yielded<T>(&self, at: Point) -> Poll<T> {
        self.yielded.set(true);
        self.park(at)
    }
}

impl<'r> Runtime<'r> {
    /// Suspends once if a child of the current task already finished during
    /// this step, so that the next generation of children starts on the next
    /// step. Every operator that forks passes through here first.
    ///
    /// This keeps sequencing at step granularity: `call(a)` followed by
    /// `call(b)` runs `b` for the first time on the step after `a` finished,
    /// never on the same one.
    pub(crate) fn handoff(&'r self, at: Point) -> impl Future<Output = ()> + 'r {
        let mut waited = false;
        poll_fn(move |_| {
            if !waited && self.settled.get() {
                waited = true;
                self.park(at)
            } else {
                Poll::Ready(())
            }
        })
    }

    /// Suspends the current task until `d` has passed.
    ///
    /// The deadline is computed once, when the delay is first polled (that
    /// is, when the task awaiting it reaches it), as `now + d`. Building the
    /// future ahead of time, say to hand it to an operator that starts it a
    /// tick later, doesn't eat into `d`. Each tick then checks
    /// `now >= deadline`, so irregular ticks don't accumulate error. A zero
    /// delay completes without suspending.
    #[track_caller]
    pub fn delay(&'r self, d: impl Into<Millis>) -> Delay<'r> {
        Delay {
            rt: self,
            wait: Some(d.into()),
            deadline: Instant::default(),
            at: Point::here(),
            entered: false,
        }
    }

    /// Suspends the current task until the clock reads `deadline` or later.
    #[track_caller]
    pub fn delay_until(&'r self, deadline: Instant) -> Delay<'r> {
        Delay {
            rt: self,
            wait: None,
            deadline,
            at: Point::here(),
            entered: false,
        }
    }

    /// Suspends the current task until `cond` returns `true`.
    ///
    /// `cond` is evaluated on every step, including the first, so if it's
    /// already true this completes without suspending. It's a plain closure,
    /// not a task: it can't itself suspend.
    #[track_caller]
    pub fn wait_until<P>(&'r self, cond: P) -> WaitUntil<'r, P>
        where P: FnMut() -> bool,
    {
        WaitUntil {
            rt: self,
            cond,
            at: Point::here(),
            entered: false,
        }
    }

    /// Gives up the turn: suspends exactly once, reporting
    /// [`Status::Yielded`][crate::task::Status::Yielded] to whoever is
    /// stepping this task.
    ///
    /// Only [`Runtime::alternate`] and [`Runtime::for_each_yield`] treat a
    /// yield differently from any other suspension.
    #[track_caller]
    pub fn yield_turn(&'r self) -> YieldTurn<'r> {
        YieldTurn {
            rt: self,
            at: Point::here(),
            polled: false,
        }
    }
}

impl fmt::Debug for Runtime<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("now", &self.now())
            .field("live", &self.tree.live())
            .field("current", &self.current.get())
            .field("settled", &self.settled.get())
            .field("fault", &self.fault.get())
            .finish()
    }
}

/// Future returned by [`Runtime::delay`] and [`Runtime::delay_until`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[derive(Debug)]
pub struct Delay<'r> {
    rt: &'r Runtime<'r>,
    /// Relative wait not yet turned into a deadline.
    wait: Option<Millis>,
    deadline: Instant,
    at: Point,
    entered: bool,
}

impl Delay<'_> {
    /// The instant this delay ends, or `None` for a relative delay that
    /// hasn't been reached yet.
    pub fn deadline(&self) -> Option<Instant> {
        match self.wait {
            Some(_) => None,
            None => Some(self.deadline),
        }
    }
}

impl Future for Delay<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !mem::replace(&mut self.entered, true) {
            self.rt.enter(self.at);
            if let Some(d) = self.wait.take() {
                self.deadline = self.rt.deadline(d);
            }
        }
        if self.rt.now() >= self.deadline {
            Poll::Ready(())
        } else {
            self.rt.park(self.at)
        }
    }
}

/// Future returned by [`Runtime::wait_until`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project]
#[derive(Debug)]
pub struct WaitUntil<'r, P> {
    rt: &'r Runtime<'r>,
    cond: P,
    at: Point,
    entered: bool,
}

impl<P> Future for WaitUntil<'_, P>
    where P: FnMut() -> bool,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if !mem::replace(this.entered, true) {
            this.rt.enter(*this.at);
        }
        if (this.cond)() {
            Poll::Ready(())
        } else {
            this.rt.park(*this.at)
        }
    }
}

/// Future returned by [`Runtime::yield_turn`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[derive(Debug)]
pub struct YieldTurn<'r> {
    rt: &'r Runtime<'r>,
    at: Point,
    polled: bool,
}

impl Future for YieldTurn<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if mem::replace(&mut self.polled, true) {
            Poll::Ready(())
        } else {
            self.rt.enter(self.at);
            self.rt.park_yielded(self.at)
        }
    }
}

#[cfg(feature = "trace")]
fn trace_enter(task: Option<TaskId>, at: Point) {
    match task {
        Some(id) => log::trace!(target: "tickwise", "task {} at {}", id, at),
        None => log::trace!(target: "tickwise", "detached at {}", at),
    }
}

#[cfg(not(feature = "trace"))]
#[inline(always)]
fn trace_enter(_task: Option<TaskId>, _at: Point) {}

#[cfg(feature = "trace")]
pub(crate) fn trace_finish(task: Option<TaskId>) {
    if let Some(id) = task {
        log::trace!(target: "tickwise", "task {} finished", id);
    }
}

#[cfg(not(feature = "trace"))]
#[inline(always)]
pub(crate) fn trace_finish(_task: Option<TaskId>) {}
