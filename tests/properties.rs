// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end scheduling behavior, driven the way an application would: a
//! loop that sets the clock and ticks drivers.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::pin;

use tickwise::{
    slots_for_depth, Driver, Error, Instant, ManualClock, Mailbox, Runtime,
    StaticTree, Status, Timed, Tree, Winner,
};

/// Suspends exactly once, reporting `Continuing`.
fn next_step<'r>(rt: &'r Runtime<'r>) -> impl Future<Output = ()> + 'r {
    let mut polled = false;
    rt.wait_until(move || std::mem::replace(&mut polled, true))
}

#[test]
fn finished_stays_finished() {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let quick = &Cell::new(0);
    let slow = &Cell::new(0);

    let mut d = pin!(Driver::once(rt, move || async move {
        rt.both(
            async move {
                quick.set(quick.get() + 1);
            },
            async move {
                for _ in 0..3 {
                    slow.set(slow.get() + 1);
                    next_step(rt).await;
                }
            },
        ).await;
    }));

    for _ in 0..3 {
        assert_eq!(d.as_mut().tick(), Ok(Status::Continuing));
    }
    assert_eq!(d.as_mut().tick(), Ok(Status::Finished));
    for _ in 0..3 {
        assert_eq!(d.as_mut().tick(), Ok(Status::Finished));
    }
    // Stepped four times, ran once.
    assert_eq!(quick.get(), 1);
    assert_eq!(slow.get(), 3);
}

#[test]
fn sequence_hands_off_between_steps() {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let step = &Cell::new(0);
    let log = &RefCell::new(Vec::new());

    let mut d = pin!(Driver::once(rt, move || async move {
        rt.call(async move {
            log.borrow_mut().push(("a", step.get()));
            next_step(rt).await;
            log.borrow_mut().push(("a", step.get()));
        }).await;
        rt.call(async move {
            log.borrow_mut().push(("b", step.get()));
            next_step(rt).await;
            log.borrow_mut().push(("b", step.get()));
            next_step(rt).await;
            log.borrow_mut().push(("b", step.get()));
        }).await;
    }));

    let mut finished_at = None;
    for n in 1..=8 {
        step.set(n);
        if d.as_mut().tick() == Ok(Status::Finished) && finished_at.is_none() {
            finished_at = Some(n);
        }
    }
    assert_eq!(finished_at, Some(5));
    assert_eq!(
        *log.borrow(),
        [("a", 1), ("a", 2), ("b", 3), ("b", 4), ("b", 5)],
    );
}

#[test]
fn join_all_waits_for_the_slower_side() {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let done_at = &Cell::new(None);

    let mut d = pin!(Driver::once(rt, move || async move {
        rt.both(rt.delay(300u64), rt.delay(500u64)).await;
        done_at.set(Some(rt.now()));
    }));

    for t in (0..=700).step_by(50) {
        clock.set(Instant::from_millis(t));
        d.as_mut().tick().unwrap();
    }
    assert_eq!(done_at.get(), Some(Instant::from_millis(500)));
}

#[test]
fn join_all_of_three_waits_for_the_slowest() {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let done_at = &Cell::new(None);

    let mut d = pin!(Driver::once(rt, move || async move {
        rt.all3(rt.delay(100u64), rt.delay(300u64), rt.delay(200u64)).await;
        done_at.set(Some(rt.now()));
    }));

    for t in (0..=500).step_by(50) {
        clock.set(Instant::from_millis(t));
        d.as_mut().tick().unwrap();
        if t < 300 {
            assert_eq!(done_at.get(), None);
        }
    }
    assert_eq!(done_at.get(), Some(Instant::from_millis(300)));
    assert_eq!(tree.live(), 0);
}

#[test]
fn delay_counts_from_when_its_task_reaches_it() {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let done_at = &Cell::new(None);

    let mut d = pin!(Driver::once(rt, move || async move {
        rt.call(async {}).await;
        // Built on the first step, but the child only starts on the next.
        rt.call(rt.delay(100u64)).await;
        done_at.set(Some(rt.now()));
    }));

    assert_eq!(d.as_mut().tick(), Ok(Status::Continuing));
    clock.set(Instant::from_millis(250));
    assert_eq!(d.as_mut().tick(), Ok(Status::Continuing));
    clock.set(Instant::from_millis(300));
    assert_eq!(d.as_mut().tick(), Ok(Status::Continuing));
    assert_eq!(done_at.get(), None);
    clock.set(Instant::from_millis(350));
    assert_eq!(d.as_mut().tick(), Ok(Status::Finished));
    assert_eq!(done_at.get(), Some(Instant::from_millis(350)));
}

#[test]
fn join_any_takes_the_faster_side_and_silences_the_other() {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let outcome = &Cell::new(None);
    let slow_ticks = &Cell::new(0);

    let mut d = pin!(Driver::once(rt, move || async move {
        let w = rt.until(
            rt.delay(300u64),
            async move {
                for _ in 0..10 {
                    rt.delay(50u64).await;
                    slow_ticks.set(slow_ticks.get() + 1);
                }
            },
        ).await;
        outcome.set(Some((w, rt.now())));
    }));

    for t in (0..=300).step_by(50) {
        clock.set(Instant::from_millis(t));
        d.as_mut().tick().unwrap();
    }
    assert_eq!(outcome.get(), Some((Winner::First, Instant::from_millis(300))));
    assert_eq!(slow_ticks.get(), 6);
    assert_eq!(tree.live(), 0);

    for t in (350..=700).step_by(50) {
        clock.set(Instant::from_millis(t));
        d.as_mut().tick().unwrap();
    }
    assert_eq!(slow_ticks.get(), 6);
}

#[test]
fn join_any_tie_goes_to_the_first_operand() {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let outcome = &Cell::new(None);

    let mut d = pin!(Driver::once(rt, move || async move {
        outcome.set(Some(rt.until(rt.delay(100u64), rt.delay(100u64)).await));
    }));
    d.as_mut().tick().unwrap();
    clock.advance(100u64);
    assert_eq!(d.as_mut().tick(), Ok(Status::Finished));
    assert_eq!(outcome.get(), Some(Winner::First));
}

fn bounded_race(limit: u64, work: u64) -> (Timed, Instant) {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let outcome = &Cell::new(None);

    let mut d = pin!(Driver::once(rt, move || async move {
        let r = rt.for_at_most(limit, rt.delay(work)).await;
        outcome.set(Some((r, rt.now())));
    }));
    let mut t = 0;
    while outcome.get().is_none() {
        clock.set(Instant::from_millis(t));
        d.as_mut().tick().unwrap();
        t += 50;
    }
    outcome.get().unwrap()
}

#[test]
fn bounded_race_times_out() {
    assert_eq!(bounded_race(250, 400), (Timed::TimedOut, Instant::from_millis(250)));
}

#[test]
fn bounded_race_lets_a_quick_task_finish() {
    assert_eq!(bounded_race(250, 100), (Timed::Finished, Instant::from_millis(100)));
}

#[test]
fn bounded_race_tie_counts_as_finished() {
    assert_eq!(bounded_race(250, 250), (Timed::Finished, Instant::from_millis(250)));
}

#[test]
fn alternation_trades_values_and_ends_on_first_finish() {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let f_saw = &Cell::new(None);
    let g_saw = &Cell::new(None);
    let g_resumed = &Cell::new(false);
    let outcome = &Cell::new(None);

    let mut d = pin!(Driver::once(rt, move || async move {
        let turn = Mailbox::new(0);
        let w = rt.alternate(
            async {
                f_saw.set(Some(turn.pass(rt, 7).await));
            },
            async {
                g_saw.set(Some(turn.get()));
                turn.pass(rt, 3).await;
                g_resumed.set(true);
            },
        ).await;
        outcome.set(Some(w));
    }));

    // F takes the first turn and yields.
    assert_eq!(d.as_mut().tick(), Ok(Status::Continuing));
    assert_eq!(g_saw.get(), None);
    // G takes the second.
    assert_eq!(d.as_mut().tick(), Ok(Status::Continuing));
    assert_eq!(g_saw.get(), Some(7));
    // F reads G's value and finishes, which ends the whole thing.
    assert_eq!(d.as_mut().tick(), Ok(Status::Finished));
    assert_eq!(f_saw.get(), Some(3));
    assert_eq!(outcome.get(), Some(Winner::First));
    assert!(!g_resumed.get());
}

#[test]
fn alternation_holder_keeps_the_turn_while_continuing() {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let log = &RefCell::new(Vec::new());

    let mut d = pin!(Driver::once(rt, move || async move {
        let _ = rt.alternate(
            async move {
                log.borrow_mut().push('f');
                next_step(rt).await;
                log.borrow_mut().push('f');
                rt.yield_turn().await;
                log.borrow_mut().push('f');
            },
            async move {
                log.borrow_mut().push('g');
                rt.yield_turn().await;
                log.borrow_mut().push('g');
                next_step(rt).await;
            },
        ).await;
    }));
    for _ in 0..6 {
        d.as_mut().tick().unwrap();
    }
    assert_eq!(*log.borrow(), ['f', 'f', 'g', 'f']);
}

#[test]
fn producer_block_runs_once_per_yield() {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let got = &RefCell::new(Vec::new());

    let mut d = pin!(Driver::once(rt, move || async move {
        let slot = Mailbox::new(0);
        rt.for_each_yield(
            async {
                for v in [10, 20, 30] {
                    slot.pass(rt, v).await;
                }
            },
            || got.borrow_mut().push(slot.get()),
        ).await;
    }));
    for _ in 0..3 {
        assert_eq!(d.as_mut().tick(), Ok(Status::Continuing));
    }
    assert_eq!(d.as_mut().tick(), Ok(Status::Finished));
    assert_eq!(*got.borrow(), [10, 20, 30]);
}

#[test]
fn ramp_is_linear_and_falls_through() {
    let clock = ManualClock::default();
    let tree = StaticTree::<1>::new();
    let rt = &Runtime::new(&clock, &tree);
    let samples = &RefCell::new(Vec::new());
    let done_at = &Cell::new(None);

    let mut d = pin!(Driver::once(rt, move || async move {
        for v in rt.ramp(1000u64, 0, 255) {
            samples.borrow_mut().push(v);
            next_step(rt).await;
        }
        done_at.set(Some(rt.now()));
    }));
    for t in [0, 250, 500, 750, 999, 1000] {
        clock.set(Instant::from_millis(t));
        d.as_mut().tick().unwrap();
    }
    assert_eq!(*samples.borrow(), [0, 64, 128, 191, 255]);
    assert_eq!(done_at.get(), Some(Instant::from_millis(1000)));
}

#[test]
fn overflowing_the_tree_stops_the_activity() {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let reached = &Cell::new(false);

    let mut d = pin!(Driver::repeat(rt, move || async move {
        rt.call(async move {
            rt.call(async move {
                reached.set(true);
            }).await;
        }).await;
    }));
    let err = d.as_mut().tick().unwrap_err();
    assert!(matches!(
        err,
        Error::CapacityExceeded { parent: Some(_), branch: 0, capacity: 4 },
    ));
    assert!(!reached.get());
    assert_eq!(tree.live(), 0);
    assert_eq!(d.as_mut().tick(), Err(err));
}

#[test]
fn a_failed_fork_stops_the_rest_of_the_step() {
    let clock = ManualClock::default();
    let tree = StaticTree::<{ slots_for_depth(1) }>::new();
    let rt = &Runtime::new(&clock, &tree);
    let ran = &Cell::new(false);

    let mut d = pin!(Driver::once(rt, move || async move {
        rt.both(
            async move {
                rt.call(async {}).await;
            },
            async move {
                ran.set(true);
            },
        ).await;
    }));
    assert!(matches!(
        d.as_mut().tick(),
        Err(Error::CapacityExceeded { branch: 0, capacity: 4, .. }),
    ));
    assert!(!ran.get());
    assert_eq!(tree.live(), 0);
}

#[test]
fn independent_activities_share_one_loop() {
    let clock = ManualClock::default();
    let tree_a = StaticTree::<1>::new();
    let tree_b = StaticTree::<1>::new();
    let rt_a = &Runtime::new(&clock, &tree_a);
    let rt_b = &Runtime::new(&clock, &tree_b);
    let a_runs = &Cell::new(0);
    let b_runs = &Cell::new(0);

    let mut a = pin!(Driver::every(rt_a, 100u64, move || async move {
        a_runs.set(a_runs.get() + 1);
    }));
    let mut b = pin!(Driver::every(rt_b, 250u64, move || async move {
        b_runs.set(b_runs.get() + 1);
    }));
    for t in (0..1000).step_by(10) {
        clock.set(Instant::from_millis(t));
        a.as_mut().tick().unwrap();
        b.as_mut().tick().unwrap();
    }
    assert_eq!(a_runs.get(), 10);
    assert_eq!(b_runs.get(), 4);
}

#[cfg(feature = "alloc")]
mod heap {
    use super::*;
    use tickwise::{BoxTask, HeapTree};

    fn nest<'r>(rt: &'r Runtime<'r>, depth: u32, hits: &'r Cell<u32>) -> BoxTask<'r> {
        rt.boxed(async move {
            hits.set(hits.get() + 1);
            if depth > 0 {
                rt.call(nest(rt, depth - 1, hits)).await;
            }
        })
    }

    #[test]
    fn recursive_routines_grow_the_tree() {
        let clock = ManualClock::default();
        let tree = HeapTree::new();
        let rt = &Runtime::new(&clock, &tree);
        let hits = &Cell::new(0);

        let mut d = pin!(Driver::once(rt, move || nest(rt, 20, hits)));
        assert_eq!(d.as_mut().tick(), Ok(Status::Finished));
        assert_eq!(hits.get(), 21);
        assert_eq!(tree.live(), 0);
    }

    #[test]
    fn heap_trees_hold_many_roots() {
        let clock = ManualClock::default();
        let tree = HeapTree::new();
        let rt = &Runtime::new(&clock, &tree);

        let mut a = pin!(Driver::once(rt, move || rt.delay(100u64)));
        let mut b = pin!(Driver::once(rt, move || rt.delay(200u64)));
        assert_eq!(a.as_mut().tick(), Ok(Status::Continuing));
        assert_eq!(b.as_mut().tick(), Ok(Status::Continuing));
        assert_eq!(tree.live(), 2);

        clock.advance(100u64);
        assert_eq!(a.as_mut().tick(), Ok(Status::Finished));
        assert_eq!(b.as_mut().tick(), Ok(Status::Continuing));
        assert_eq!(tree.live(), 1);
    }

    #[test]
    fn heap_tree_limit_is_enforced() {
        let clock = ManualClock::default();
        let tree = HeapTree::with_limit(2);
        let rt = &Runtime::new(&clock, &tree);
        let hits = &Cell::new(0);

        let mut d = pin!(Driver::once(rt, move || nest(rt, 5, hits)));
        assert!(matches!(
            d.as_mut().tick(),
            Err(Error::CapacityExceeded { capacity: 2, .. }),
        ));
        assert_eq!(hits.get(), 2);
        assert_eq!(tree.live(), 0);
    }
}
