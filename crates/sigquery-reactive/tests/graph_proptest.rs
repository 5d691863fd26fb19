//! Property-based invariant tests for the signal graph and host ticks.
//!
//! 1. A computed value always equals its function applied to current inputs.
//! 2. An effect runs at most once per batch and sees the final value.
//! 3. A tick applies pushes in arrival order; dependents see the last one.
//! 4. Only messages from the port's current generation are applied.
//! 5. Equal writes never wake an effect.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use sigquery_reactive::{Computed, Effect, HostContext, Observable, batch};

// ── Helpers ─────────────────────────────────────────────────────────────

fn writes() -> impl Strategy<Value = Vec<i32>> {
    proptest::collection::vec(-50i32..50, 0..40)
}

fn recording_effect(source: &Computed<i32>) -> (Effect, Rc<RefCell<Vec<i32>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let (s, sink) = (source.clone(), Rc::clone(&seen));
    let effect = Effect::new(move |_| sink.borrow_mut().push(s.get()));
    (effect, seen)
}

// ── Properties ──────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn computed_tracks_inputs(a_writes in writes(), b_writes in writes()) {
        let a = Observable::new(0i32);
        let b = Observable::new(0i32);
        let (ra, rb) = (a.clone(), b.clone());
        let sum = Computed::new(move || ra.get() + rb.get());

        for (i, v) in a_writes.iter().enumerate() {
            a.set(*v);
            if let Some(w) = b_writes.get(i) {
                b.set(*w);
            }
            prop_assert_eq!(sum.get(), a.get_untracked() + b.get_untracked());
        }
    }

    #[test]
    fn batch_runs_effect_at_most_once(values in writes()) {
        let cell = Observable::new(i32::MIN);
        let view = Computed::from_observable(&cell, |v| *v);
        let (effect, seen) = recording_effect(&view);

        batch(|| {
            for v in &values {
                cell.set(*v);
            }
        });

        let expected_runs = if values.is_empty() { 1 } else { 2 };
        prop_assert_eq!(effect.runs(), expected_runs);
        prop_assert_eq!(*seen.borrow().last().unwrap(), cell.get_untracked());
    }

    #[test]
    fn tick_applies_last_push(values in proptest::collection::vec(-50i32..50, 1..2048)) {
        let ctx = HostContext::default();
        let cell = Observable::new(i32::MIN);
        let writer = cell.clone();
        let applied = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&applied);
        let port = ctx.open_port("prop", move |v: i32| {
            log.borrow_mut().push(v);
            writer.set(v);
            Ok(())
        });
        let view = Computed::from_observable(&cell, |v| *v);
        let (effect, seen) = recording_effect(&view);

        let sender = port.sender();
        for v in &values {
            sender.post(*v).unwrap();
        }
        let report = ctx.tick();

        prop_assert_eq!(report.applied, values.len());
        prop_assert_eq!(&*applied.borrow(), &values);
        prop_assert!(effect.runs() <= 2);
        prop_assert_eq!(*seen.borrow().last().unwrap(), *values.last().unwrap());
    }

    #[test]
    fn only_current_generation_applies(
        plan in proptest::collection::vec((any::<bool>(), 0u8..4), 1..48),
    ) {
        let ctx = HostContext::default();
        let applied = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&applied);
        let port = ctx.open_port("generations", move |(generation, n): (u64, u8)| {
            log.borrow_mut().push((generation, n));
            Ok(())
        });

        let mut sender = port.sender();
        for (advance, n) in &plan {
            if *advance {
                sender = port.advance();
            }
            sender.post((sender.generation(), *n)).unwrap();
        }
        ctx.tick();

        let current = port.generation();
        prop_assert!(applied.borrow().iter().all(|(g, _)| *g == current));
        // Posts after the last advance, plus the one made right after it.
        let expected = plan
            .iter()
            .rev()
            .take_while(|(advance, _)| !advance)
            .count()
            + usize::from(plan.iter().any(|(advance, _)| *advance));
        prop_assert_eq!(applied.borrow().len(), expected);
    }

    #[test]
    fn equal_writes_do_not_wake(value in -50i32..50, repeats in 1usize..20) {
        let cell = Observable::new(value);
        let view = Computed::from_observable(&cell, |v| *v);
        let (effect, _seen) = recording_effect(&view);
        for _ in 0..repeats {
            cell.set(value);
        }
        prop_assert_eq!(effect.runs(), 1);
    }
}
