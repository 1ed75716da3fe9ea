// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structured cooperative multitasking for bare loops, built on Rust `Future`s.
//!
//! `tickwise` lets a program that is, at bottom, a single `loop {}` run many
//! timed activities concurrently, each written as straight-line code:
//!
//! ```ignore
//! async fn blink(rt: &Runtime<'_>, led: &Led) {
//!     led.on();
//!     rt.delay(Millis(100)).await;
//!     led.off();
//!     rt.delay(Millis(900)).await;
//! }
//! ```
//!
//! There are no interrupts, no threads and no wakers. The application calls
//! [`Driver::tick`] from its main loop; each tick advances every live task by
//! one step, and every task re-checks whatever it's waiting for.
//!
//! # How it fits together
//!
//! - A **routine** is an `async fn` or `async` block. Each `.await` on one of
//!   the runtime's primitives or operators is a *suspension point*; the
//!   compiler turns the routine into a state machine that resumes right after
//!   the last one reached.
//! - A [`Task`] is one running instance of a routine, together with its slot in
//!   the task tree.
//! - The **task tree** ([`Tree`]) records which tasks are alive and who owns
//!   whom. Children are created by composition operators and die with their
//!   parents. Use a [`StaticTree`] for a fixed, allocation-free footprint, or
//!   (with feature `alloc`) a [`HeapTree`].
//! - A [`Runtime`] is the scheduling context every routine receives: it holds
//!   the clock, the tree, and the bookkeeping for the task being stepped.
//! - **Composition operators** ([`compose`]) combine routines: sequence,
//!   bounded race, join-all, join-any, producer/consumer, alternation, ramps.
//! - A [`Driver`] owns the root of one activity and applies a restart policy.
//!
//! # Time
//!
//! The runtime never reads hardware by itself: the application supplies a
//! [`Clock`]. See the [`time`] module for the available clocks, including one
//! that extends a wrapping 32-bit millisecond counter.
//!
//! # Features
//!
//! - `alloc`: enables [`HeapTree`] and boxed routines ([`BoxTask`]), for
//!   routines that recurse or trees whose shape isn't known in advance.
//! - `trace`: emits a `log` record at level trace (target `tickwise`) whenever
//!   a task reaches a suspension point or finishes.
//! - `cortex-m`: enables [`time::CycleClock`], built on the DWT cycle counter.

#![cfg_attr(not(test), no_std)]

#![warn(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    missing_debug_implementations,
    missing_docs,
    semicolon_in_expressions_from_macros,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_op_in_unsafe_fn,
    unused_qualifications,
)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod compose;
pub mod driver;
pub mod error;
pub mod exec;
pub mod task;
pub mod time;
pub mod tree;

pub use compose::{Mailbox, Ramp, Timed, Winner};
pub use driver::{Driver, Policy};
pub use error::Error;
pub use exec::{Point, Runtime};
pub use task::{Status, Task};
pub use time::{Clock, Instant, ManualClock, Millis, Wrapping32};
pub use tree::{slots_for_depth, StaticTree, TaskId, Tree};

#[cfg(feature = "alloc")]
pub use task::BoxTask;
#[cfg(feature = "alloc")]
pub use tree::HeapTree;
