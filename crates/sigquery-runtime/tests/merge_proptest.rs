//! Property-based invariant tests for the merged result.
//!
//! Random interleavings of options changes, engine pushes, restoration
//! toggles and host ticks are replayed against a small model. After every
//! step:
//!
//! 1. The merged value is the last push applied under the current options,
//!    or else the optimistic (cached) result for the current key.
//! 2. Exactly one observer exists.
//! 3. A listener is registered exactly when not restoring.
//! 4. Every unsubscribe matches an earlier subscribe.

use std::rc::Rc;

use proptest::prelude::*;
use sigquery_core::{QueryKey, QueryOptions, QueryResult, ResultSnapshot};
use sigquery_harness::FakeClient;
use sigquery_reactive::{HostContext, Observable};
use sigquery_runtime::{RestoringState, create_query};

const KEYS: [&str; 3] = ["a", "b", "c"];

#[derive(Debug, Clone)]
enum Step {
    SetKey(usize),
    Push(u32),
    Tick,
    Restoring(bool),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..KEYS.len()).prop_map(Step::SetKey),
        (0u32..50).prop_map(Step::Push),
        Just(Step::Tick),
        any::<bool>().prop_map(Step::Restoring),
    ]
}

fn cached(key: &str) -> u32 {
    match key {
        "a" => 100,
        "b" => 200,
        _ => 300,
    }
}

#[derive(Debug, Default)]
struct Model {
    key: usize,
    restoring: bool,
    queued: Vec<u32>,
    stored: Option<u32>,
}

proptest! {
    #[test]
    fn merged_follows_model(steps in proptest::collection::vec(step(), 1..60)) {
        let ctx = HostContext::default();
        let client: Rc<FakeClient<u32, String>> = FakeClient::new();
        for key in KEYS {
            client.seed(&QueryKey::from(key), QueryResult::success(cached(key)));
        }
        let restoring = RestoringState::default();
        let key = Observable::new(0usize);
        let k = key.clone();
        let query = create_query(
            &ctx,
            client.as_client(),
            &restoring,
            move || QueryOptions::new(KEYS[k.get()]),
            client.observer_class(),
        );
        let observer = client.observer(0).unwrap();
        let mut model = Model::default();

        for step in steps {
            match step {
                Step::SetKey(next) => {
                    if next != model.key {
                        model.key = next;
                        model.stored = None;
                        model.queued.clear();
                    }
                    key.set(next);
                }
                Step::Push(n) => {
                    let reached = observer.push(QueryResult::success(n));
                    if !model.restoring {
                        prop_assert_eq!(reached, 1);
                        model.queued.push(n);
                    } else {
                        prop_assert_eq!(reached, 0);
                    }
                }
                Step::Tick => {
                    ctx.tick();
                    if let Some(last) = model.queued.last() {
                        model.stored = Some(*last);
                    }
                    model.queued.clear();
                }
                Step::Restoring(flag) => {
                    if flag != model.restoring {
                        model.restoring = flag;
                        model.stored = None;
                        model.queued.clear();
                    }
                    restoring.set_restoring(flag);
                }
            }

            let snapshot = query.synchronizer().snapshot();
            match model.stored {
                Some(n) => {
                    prop_assert!(matches!(snapshot, ResultSnapshot::Subscribed(_)));
                    prop_assert_eq!(snapshot.result().data, Some(n));
                }
                None => {
                    prop_assert!(snapshot.is_optimistic());
                    prop_assert_eq!(snapshot.result().data, Some(cached(KEYS[model.key])));
                }
            }
            prop_assert_eq!(query.data().get(), snapshot.result().data);
            prop_assert_eq!(client.observers_created(), 1);
            prop_assert_eq!(observer.listener_count(), usize::from(!model.restoring));
            prop_assert!(observer.unsubscribe_count() <= observer.subscribe_count());
        }
    }
}
