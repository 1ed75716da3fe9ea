// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structural failures.
//!
//! Stepping a task never fails. What can fail is *building* the task tree:
//! running out of room for a child, or trying to create tasks outside of any
//! task. These are reported once, at the point where the tree would have
//! overflowed, and are fatal to the activity that caused them.

use core::fmt;

use crate::tree::TaskId;

/// Reasons an activity was stopped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// A composition operator in task `parent` tried to fork a child into
    /// position `branch`, but the tree has no slot for it. `parent` is `None`
    /// when the tree couldn't even hold a root.
    CapacityExceeded {
        /// Task whose body was forking.
        parent: Option<TaskId>,
        /// Child position being forked (0 for the first operand).
        branch: u8,
        /// Number of slots the tree has.
        capacity: usize,
    },
    /// A root was planted in a tree whose root slot was already occupied.
    /// This usually means two drivers were handed the same `StaticTree`.
    RootBusy,
    /// The allocator couldn't find room for another task.
    OutOfMemory,
    /// A composition operator was polled while no task was being stepped,
    /// i.e. somebody polled a task body directly instead of handing it to a
    /// driver or operator.
    Detached,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CapacityExceeded { parent: Some(p), branch, capacity } => write!(
                f,
                "task tree full ({} slots): task {} can't fork branch {}",
                capacity, p, branch,
            ),
            Error::CapacityExceeded { parent: None, capacity, .. } => write!(
                f,
                "task tree full ({} slots): no room for a root",
                capacity,
            ),
            Error::RootBusy => write!(f, "root slot already occupied"),
            Error::OutOfMemory => write!(f, "out of memory for task tree"),
            Error::Detached => write!(f, "task forked outside of any task"),
        }
    }
}

impl core::error::Error for Error {}
