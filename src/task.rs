// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tasks: resumable invocations of a routine.
//!
//! A routine is written as an ordinary `async fn` (or `async` block) that takes
//! a [`Runtime`] and awaits the runtime's primitives and operators. The
//! compiler turns it into a state machine: the locals it keeps across `.await`
//! become fields, initialized exactly once on first entry, and each `.await`
//! becomes a numbered resumption point. Nothing runs until something steps it.
//!
//! A [`Task`] wraps one such state machine together with its slot in the task
//! tree, and offers the one operation the scheduler needs: [`Task::step`].
//!
//! # Cancellation
//!
//! Dropping a `Task` (which is what an operator does to a race loser, and what
//! a driver does on restart) drops the routine's state and releases its slot
//! and everything below it. The routine gets no chance to run any more of its
//! own code: if it switched an output on and was cancelled before switching it
//! back off, it stays on. Values it owned are dropped normally, but no
//! scheduler-level cleanup hook exists.

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use futures::task::noop_waker_ref;
use pin_project::{pin_project, pinned_drop};

use crate::exec::{self, Point, Runtime};
use crate::tree::TaskId;

/// What a task reported from its most recent step.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    /// Made progress, has more to do.
    Continuing,
    /// Deliberately gave up the turn (see [`Runtime::yield_turn`]). Apart from
    /// alternation and producer/consumer composition, this means the same
    /// thing as `Continuing`.
    Yielded,
    /// Ran to the end of its body. Stays this way.
    Finished,
}

impl Status {
    /// Checks for `Finished`.
    pub fn is_finished(self) -> bool {
        self == Status::Finished
    }
}

/// A routine in progress, plus its place in the task tree.
///
/// Tasks are created by the composition operators and by drivers; there's no
/// public constructor, since a task that isn't somebody's child would never
/// get stepped.
#[must_use = "tasks do nothing unless stepped"]
#[pin_project(PinnedDrop)]
pub struct Task<'r, F> {
    rt: &'r Runtime<'r>,
    id: Option<TaskId>,
    marker: Option<Point>,
    finished: bool,
    #[pin]
    body: Option<F>,
}

impl<'r, F> Task<'r, F>
    where F: Future<Output = ()>,
{
    /// Creates a top-level task in the root slot of `rt`'s tree.
    pub(crate) fn root(rt: &'r Runtime<'r>, body: F) -> Self {
        Self::in_slot(rt, rt.tree().plant(), body)
    }

    /// Creates child number `branch` of the task currently being stepped.
    pub(crate) fn fork(rt: &'r Runtime<'r>, branch: u8, body: F) -> Self {
        let slot = match rt.current() {
            Some(parent) => rt.tree().fork(parent, branch),
            None => Err(crate::Error::Detached),
        };
        Self::in_slot(rt, slot, body)
    }

    fn in_slot(
        rt: &'r Runtime<'r>,
        slot: Result<TaskId, crate::Error>,
        body: F,
    ) -> Self {
        match slot {
            Ok(id) => Self {
                rt,
                id: Some(id),
                marker: None,
                finished: false,
                body: Some(body),
            },
            Err(e) => {
                // A task with no slot never runs. The driver will notice the
                // fault at the end of this step and stop the activity.
                rt.raise(e);
                Self {
                    rt,
                    id: None,
                    marker: None,
                    finished: false,
                    body: None,
                }
            }
        }
    }

    /// Runs the body until its next suspension point, or its end.
    ///
    /// Once this has returned `Finished`, it keeps returning `Finished`
    /// without touching the body (which has been dropped).
    ///
    /// While the runtime holds a fault, no body runs: this returns
    /// `Continuing` immediately, so nothing after a failed fork gets to act
    /// before the driver stops the activity.
    pub fn step(self: Pin<&mut Self>) -> Status {
        let mut this = self.project();
        let Some(body) = this.body.as_mut().as_pin_mut() else {
            return if *this.finished {
                Status::Finished
            } else {
                // Never got a slot; wait for the driver to tear us down.
                Status::Continuing
            };
        };

        let rt = *this.rt;
        if rt.fault().is_some() {
            return Status::Continuing;
        }
        let mut outer = scopeguard::guard(
            rt.begin_step(*this.id),
            |outer| rt.restore(outer),
        );

        match body.poll(&mut Context::from_waker(noop_waker_ref())) {
            Poll::Ready(()) => {
                rt.end_step();
                outer.settled = true;
                this.body.set(None);
                *this.finished = true;
                exec::trace_finish(*this.id);
                Status::Finished
            }
            Poll::Pending => {
                let (point, yielded) = rt.end_step();
                if point.is_some() {
                    *this.marker = point;
                }
                if yielded {
                    Status::Yielded
                } else {
                    Status::Continuing
                }
            }
        }
    }
}

impl<F> Task<'_, F> {
    /// This task's slot in the tree, or `None` if it couldn't get one.
    pub fn id(&self) -> Option<TaskId> {
        self.id
    }

    /// The suspension point where the body last stopped.
    pub fn marker(&self) -> Option<Point> {
        self.marker
    }

    /// Checks whether the body has run to completion.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[pinned_drop]
impl<'r, F> PinnedDrop for Task<'r, F> {
    fn drop(self: Pin<&mut Self>) {
        let mut this = self.project();
        // Children first, so their own slots are released by their own drops;
        // the prune below then only has to clear ours.
        this.body.set(None);
        if let Some(id) = this.id.take() {
            this.rt.tree().prune(id);
        }
    }
}

impl<F> fmt::Debug for Task<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("marker", &self.marker)
            .field("finished", &self.finished)
            .finish()
    }
}

/// A type-erased, heap-allocated task body.
///
/// Routines that fork themselves (directly or not) have infinitely large state
/// machines unless the recursion goes through a box. Return one of these from
/// such routines, using [`Runtime::boxed`].
#[cfg(feature = "alloc")]
pub type BoxTask<'r> = futures::future::LocalBoxFuture<'r, ()>;

#[cfg(feature = "alloc")]
impl<'r> Runtime<'r> {
    /// Moves `body` to the heap, erasing its type.
    pub fn boxed<F>(&'r self, body: F) -> BoxTask<'r>
        where F: Future<Output = ()> + 'r,
    {
        use futures::FutureExt as _;
        body.boxed_local()
    }
}
