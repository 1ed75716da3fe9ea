// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Top-level drivers.
//!
//! A [`Driver`] owns the root of one activity's task tree and advances it by
//! exactly one step each time the application calls [`Driver::tick`]. The
//! application loop is expected to look something like this:
//!
//! ```ignore
//! let clock = ManualClock::default();
//! let tree = StaticTree::<{ slots_for_depth(4) }>::new();
//! let rt = Runtime::new(&clock, &tree);
//! let mut blink = pin!(Driver::every(&rt, Millis(1000), || blink(&rt)));
//!
//! loop {
//!     clock.set(read_hardware_timer());
//!     blink.as_mut().tick()?;
//!     // ... other drivers, other work ...
//! }
//! ```
//!
//! Several drivers can share one loop by being ticked one after the other.
//! Each tick costs one step through the live part of that driver's tree, so as
//! long as no task body hogs the CPU, every driver gets a turn promptly.
//!
//! Drivers sharing a `Runtime` share its tree; with a [`StaticTree`] that only
//! holds one root, give each driver its own runtime and tree.
//!
//! [`StaticTree`]: crate::tree::StaticTree

use core::fmt;
use core::future::Future;
use core::pin::Pin;

use pin_project::pin_project;

use crate::error::Error;
use crate::exec::Runtime;
use crate::task::{Status, Task};
use crate::time::{Instant, Millis};

/// When a driver starts a fresh instance of its activity.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Policy {
    /// Start on the first tick, never again.
    Once,
    /// Start on the first tick, and again on the tick after each instance
    /// finishes.
    Repeat,
    /// Like `Repeat`, but never start an instance sooner than the given
    /// interval after the previous one started.
    Every(Millis),
}

/// Drives one top-level activity.
///
/// `make` is called to produce a fresh instance of the activity's routine
/// each time the policy calls for one.
#[must_use = "drivers do nothing unless ticked"]
#[pin_project]
pub struct Driver<'r, M, F> {
    rt: &'r Runtime<'r>,
    make: M,
    policy: Policy,
    #[pin]
    root: Option<Task<'r, F>>,
    started: Option<Instant>,
    restarts: u32,
    fault: Option<Error>,
}

impl<'r, M, F> Driver<'r, M, F>
    where M: FnMut() -> F,
          F: Future<Output = ()> + 'r,
{
    /// Creates a driver that runs its activity once.
    pub fn once(rt: &'r Runtime<'r>, make: M) -> Self {
        Self::new(rt, Policy::Once, make)
    }

    /// Creates a driver that restarts its activity whenever it finishes.
    pub fn repeat(rt: &'r Runtime<'r>, make: M) -> Self {
        Self::new(rt, Policy::Repeat, make)
    }

    /// Creates a driver that restarts its activity whenever it has finished
    /// *and* `interval` has passed since it was last started.
    ///
    /// The interval is measured from start to start, so an activity taking
    /// less than `interval` runs at a steady rate, while one that overruns
    /// restarts on the tick after it finishes.
    pub fn every(rt: &'r Runtime<'r>, interval: impl Into<Millis>, make: M) -> Self {
        Self::new(rt, Policy::Every(interval.into()), make)
    }

    /// Creates a driver with an explicit policy.
    pub fn new(rt: &'r Runtime<'r>, policy: Policy, make: M) -> Self {
        Self {
            rt,
            make,
            policy,
            root: None,
            started: None,
            restarts: 0,
            fault: None,
        }
    }

    /// Advances the activity by one step, starting a new instance first if
    /// the policy says so.
    ///
    /// Returns the status of the instance that was stepped; between instances
    /// (after `Once` is done, or while `Every` waits out its interval) this is
    /// `Finished`.
    ///
    /// If building the task tree fails during the step, the whole tree is torn
    /// down and the error returned. The driver then stays stopped: this and
    /// every later tick return the same error.
    pub fn tick(self: Pin<&mut Self>) -> Result<Status, Error> {
        let mut this = self.project();
        if let Some(e) = *this.fault {
            return Err(e);
        }

        if this.root.is_none() {
            let now = this.rt.now();
            let due = match (*this.policy, *this.started) {
                (_, None) => true,
                (Policy::Once, Some(_)) => false,
                (Policy::Repeat, Some(_)) => true,
                (Policy::Every(interval), Some(last)) => {
                    now.millis_since(last) >= interval
                }
            };
            if !due {
                return Ok(Status::Finished);
            }
            if this.started.is_some() {
                *this.restarts = this.restarts.wrapping_add(1);
                log::debug!(
                    "restarting activity at {} ms (restart {})",
                    u64::from(now),
                    this.restarts,
                );
            }
            *this.started = Some(now);
            this.root.set(Some(Task::root(*this.rt, (this.make)())));
        }

        let status = match this.root.as_mut().as_pin_mut() {
            Some(root) => root.step(),
            None => Status::Continuing,
        };

        if let Some(e) = this.rt.take_fault() {
            this.root.set(None);
            log::error!("activity stopped: {}", e);
            *this.fault = Some(e);
            return Err(e);
        }

        if status.is_finished() {
            // Release the tree now rather than holding the slot until the
            // next instance.
            this.root.set(None);
        }
        Ok(status)
    }
}

impl<M, F> Driver<'_, M, F> {
    /// Checks whether no instance of the activity is currently live.
    pub fn is_idle(&self) -> bool {
        self.root.is_none()
    }

    /// Number of times the activity has been restarted after its first start.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// The restart policy.
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// The error that stopped this driver, if it has stopped.
    pub fn fault(&self) -> Option<Error> {
        self.fault
    }
}

impl<M, F> fmt::Debug for Driver<'_, M, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("policy", &self.policy)
            .field("root", &self.root)
            .field("started", &self.started)
            .field("restarts", &self.restarts)
            .field("fault", &self.fault)
            .finish()
    }
}
