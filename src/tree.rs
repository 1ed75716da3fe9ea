// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bookkeeping for the task tree.
//!
//! The *state* of each task lives inside its parent's state (that's what
//! `async` gives us: a composed future contains the futures it's waiting on).
//! What this module tracks is the *shape* of the tree: which slots are live,
//! who forked whom, and how much room is left. It's what turns "too many
//! nested tasks" into a reported [`Error`] instead of a mystery.
//!
//! Two strategies are provided, behind the [`Tree`] trait:
//!
//! - [`StaticTree`] is a fixed array addressed as an implicit ternary heap:
//!   the children of slot `i` live at `3i + 1`, `3i + 2` and `3i + 3`. It
//!   needs no allocator and its size is fixed at compile time, which also
//!   bounds the depth of the tree.
//!
//! - [`HeapTree`] (feature `alloc`) keeps an explicit child list per node in a
//!   growable arena, so depth is bounded only by memory.
//!
//! Either way, handles are generation-checked: a [`TaskId`] for a slot that
//! has since been released (and maybe reused) is simply ignored.

use core::cell::Cell;
use core::fmt;

use crate::error::Error;

/// Maximum number of children a single task can fork at once.
pub const ARITY: usize = 3;

/// Names a slot in a task tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskId {
    index: u32,
    generation: u16,
}

impl TaskId {
    /// Slot number within the tree.
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// How many times the slot had been claimed when this handle was issued.
    pub fn generation(self) -> u16 {
        self.generation
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Storage strategy for the shape of a task tree.
///
/// All methods take `&self`: a tree is shared by every task of one activity,
/// and only one of them runs at a time.
pub trait Tree {
    /// Claims the root slot for a new top-level task.
    fn plant(&self) -> Result<TaskId, Error>;

    /// Claims the slot for child number `branch` of `parent`. If that slot is
    /// still occupied by an earlier child, the earlier child and everything
    /// below it are released first.
    fn fork(&self, parent: TaskId, branch: u8) -> Result<TaskId, Error>;

    /// Releases `id` and its whole subtree. Does nothing if `id` is stale.
    fn prune(&self, id: TaskId);

    /// Checks whether `id` still names a live slot.
    fn contains(&self, id: TaskId) -> bool;

    /// Number of live slots.
    fn live(&self) -> usize;

    /// Hard limit on live slots, if there is one.
    fn capacity(&self) -> Option<usize>;
}

#[derive(Copy, Clone, Debug)]
struct Slot {
    generation: u16,
    live: bool,
}

impl Slot {
    const VACANT: Self = Slot { generation: 0, live: false };
}

/// Fixed-capacity tree of `N` slots, laid out as an implicit ternary heap.
///
/// A tree of depth `d` (a root with `d` levels of nested forks below it)
/// needs [`slots_for_depth(d)`](slots_for_depth) slots. Forks that would land
/// beyond `N` fail with [`Error::CapacityExceeded`].
///
/// Because the root is always slot 0, a `StaticTree` serves exactly one
/// activity; give each driver its own.
#[derive(Debug)]
pub struct StaticTree<const N: usize> {
    slots: [Cell<Slot>; N],
    live: Cell<usize>,
}

impl<const N: usize> StaticTree<N> {
    /// Creates an empty tree.
    pub const fn new() -> Self {
        Self {
            slots: [const { Cell::new(Slot::VACANT) }; N],
            live: Cell::new(0),
        }
    }

    fn occupy(&self, index: usize) -> TaskId {
        let slot = &self.slots[index];
        let generation = slot.get().generation.wrapping_add(1);
        slot.set(Slot { generation, live: true });
        self.live.set(self.live.get() + 1);
        TaskId { index: index as u32, generation }
    }

    /// Releases slot `index` and every descendant. Descendants of a slot in
    /// the implicit heap occupy one contiguous run of indices per level, so we
    /// sweep level by level.
    fn release_from(&self, index: usize) {
        let (mut lo, mut hi) = (index, index);
        while lo < N {
            for slot in &self.slots[lo..=hi.min(N - 1)] {
                let mut s = slot.get();
                if s.live {
                    s.live = false;
                    slot.set(s);
                    self.live.set(self.live.get() - 1);
                }
            }
            lo = lo * ARITY + 1;
            hi = hi * ARITY + ARITY;
        }
    }
}

impl<const N: usize> Default for StaticTree<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Tree for StaticTree<N> {
    fn plant(&self) -> Result<TaskId, Error> {
        match self.slots.first() {
            None => Err(Error::CapacityExceeded {
                parent: None,
                branch: 0,
                capacity: N,
            }),
            Some(root) if root.get().live => Err(Error::RootBusy),
            Some(_) => Ok(self.occupy(0)),
        }
    }

    fn fork(&self, parent: TaskId, branch: u8) -> Result<TaskId, Error> {
        if !self.contains(parent) {
            return Err(Error::Detached);
        }
        let index = parent.index()
            .checked_mul(ARITY)
            .and_then(|i| i.checked_add(1 + usize::from(branch)))
            .filter(|&i| i < N && usize::from(branch) < ARITY)
            .ok_or(Error::CapacityExceeded {
                parent: Some(parent),
                branch,
                capacity: N,
            })?;
        if self.slots[index].get().live {
            self.release_from(index);
        }
        Ok(self.occupy(index))
    }

    fn prune(&self, id: TaskId) {
        if self.contains(id) {
            self.release_from(id.index());
        }
    }

    fn contains(&self, id: TaskId) -> bool {
        self.slots.get(id.index()).map_or(false, |slot| {
            let s = slot.get();
            s.live && s.generation == id.generation
        })
    }

    fn live(&self) -> usize {
        self.live.get()
    }

    fn capacity(&self) -> Option<usize> {
        Some(N)
    }
}

/// Number of slots a [`StaticTree`] needs to hold a root plus `depth` levels
/// of three-way forks below it.
pub const fn slots_for_depth(depth: u32) -> usize {
    (ARITY.pow(depth + 1) - 1) / (ARITY - 1)
}

#[cfg(feature = "alloc")]
pub use self::heap::HeapTree;

#[cfg(feature = "alloc")]
mod heap {
    use alloc::vec::Vec;
    use core::cell::RefCell;

    use super::{Error, TaskId, Tree, ARITY};

    #[derive(Debug)]
    struct Node {
        generation: u16,
        live: bool,
        parent: Option<u32>,
        children: [Option<u32>; ARITY],
    }

    #[derive(Debug, Default)]
    struct Arena {
        nodes: Vec<Node>,
        free: Vec<u32>,
        live: usize,
    }

    impl Arena {
        fn contains(&self, id: TaskId) -> bool {
            self.nodes.get(id.index()).map_or(false, |n| {
                n.live && n.generation == id.generation
            })
        }

        fn claim(&mut self, parent: Option<u32>) -> Result<TaskId, Error> {
            let index = match self.free.pop() {
                Some(i) => i,
                None => {
                    // Reserve room on the free list too, so that releasing
                    // this node later never has to allocate.
                    self.nodes.try_reserve(1).map_err(|_| Error::OutOfMemory)?;
                    self.free.try_reserve(self.nodes.len() + 1 - self.free.len())
                        .map_err(|_| Error::OutOfMemory)?;
                    let i = u32::try_from(self.nodes.len())
                        .map_err(|_| Error::OutOfMemory)?;
                    self.nodes.push(Node {
                        generation: 0,
                        live: false,
                        parent: None,
                        children: [None; ARITY],
                    });
                    i
                }
            };
            let node = &mut self.nodes[index as usize];
            node.generation = node.generation.wrapping_add(1);
            node.live = true;
            node.parent = parent;
            node.children = [None; ARITY];
            self.live += 1;
            Ok(TaskId { index, generation: node.generation })
        }

        /// Frees `top` and everything below it, deepest first, walking back
        /// up through parent links so no auxiliary stack is needed.
        fn release_from(&mut self, top: u32) {
            let mut cur = top;
            loop {
                let next_child = self.nodes[cur as usize]
                    .children
                    .iter()
                    .flatten()
                    .copied()
                    .next();
                if let Some(child) = next_child {
                    cur = child;
                    continue;
                }

                let node = &mut self.nodes[cur as usize];
                node.live = false;
                let parent = node.parent.take();
                self.free.push(cur);
                self.live -= 1;
                if let Some(p) = parent {
                    for c in &mut self.nodes[p as usize].children {
                        if *c == Some(cur) {
                            *c = None;
                        }
                    }
                }

                if cur == top {
                    break;
                }
                match parent {
                    Some(p) => cur = p,
                    None => break,
                }
            }
        }
    }

    /// Growable task tree backed by the global allocator.
    ///
    /// Unlike [`StaticTree`][super::StaticTree], a `HeapTree` can hold any
    /// number of roots, so one tree may be shared by several drivers.
    #[derive(Debug, Default)]
    pub struct HeapTree {
        arena: RefCell<Arena>,
        limit: Option<usize>,
    }

    impl HeapTree {
        /// Creates an empty, unbounded tree.
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates an empty tree that refuses to hold more than `limit` live
        /// tasks, as a guard against runaway recursion.
        pub fn with_limit(limit: usize) -> Self {
            Self {
                arena: RefCell::default(),
                limit: Some(limit),
            }
        }

        fn check_limit(
            &self,
            arena: &Arena,
            parent: Option<TaskId>,
            branch: u8,
        ) -> Result<(), Error> {
            match self.limit {
                Some(limit) if arena.live >= limit => Err(Error::CapacityExceeded {
                    parent,
                    branch,
                    capacity: limit,
                }),
                _ => Ok(()),
            }
        }
    }

    impl Tree for HeapTree {
        fn plant(&self) -> Result<TaskId, Error> {
            let mut arena = self.arena.borrow_mut();
            self.check_limit(&arena, None, 0)?;
            arena.claim(None)
        }

        fn fork(&self, parent: TaskId, branch: u8) -> Result<TaskId, Error> {
            let mut arena = self.arena.borrow_mut();
            if !arena.contains(parent) {
                return Err(Error::Detached);
            }
            let b = usize::from(branch);
            if b >= ARITY {
                return Err(Error::CapacityExceeded {
                    parent: Some(parent),
                    branch,
                    capacity: ARITY,
                });
            }
            if let Some(old) = arena.nodes[parent.index()].children[b] {
                arena.release_from(old);
            }
            self.check_limit(&arena, Some(parent), branch)?;
            let id = arena.claim(Some(parent.index))?;
            arena.nodes[parent.index()].children[b] = Some(id.index);
            Ok(id)
        }

        fn prune(&self, id: TaskId) {
            let mut arena = self.arena.borrow_mut();
            if arena.contains(id) {
                arena.release_from(id.index);
            }
        }

        fn contains(&self, id: TaskId) -> bool {
            self.arena.borrow().contains(id)
        }

        fn live(&self) -> usize {
            self.arena.borrow().live
        }

        fn capacity(&self) -> Option<usize> {
            self.limit
        }
    }
}
