#![forbid(unsafe_code)]

//! Lazy computed values that auto-update from whatever they read.
//!
//! # Design
//!
//! [`Computed<T>`] wraps a compute function and its cached result in shared,
//! reference-counted storage. While the function runs, every tracked read
//! ([`Observable::get`](crate::Observable::get), another `Computed::get`) is
//! recorded; the computed then watches exactly those sources until the next
//! recomputation re-binds them. When a source changes the cached value is
//! marked dirty and dependents are told once. The next [`get()`](Computed::get)
//! checks whether any recorded source version actually moved and only then
//! calls the compute function.
//!
//! # Invariants
//!
//! 1. `get()` always returns a value consistent with the current state of all
//!    dependencies (no stale reads after a dependency mutation completes).
//! 2. The compute function is called at most once per dependency change cycle
//!    (memoization), and not at all if every dependency settled back to the
//!    version it had.
//! 3. If no dependency has changed, `get()` returns the cached value in O(1).
//! 4. Version increments by exactly 1 per recomputation that produced a
//!    different value; equal results leave dependents untouched.
//!
//! # Failure Modes
//!
//! - **Compute function panics**: The cached value remains from the last
//!   successful computation. The dirty flag stays set so the next `get()` will
//!   retry.
//! - **Dependency dropped**: If the source is dropped, the watch becomes
//!   inert. The computed value retains its last cached result and never
//!   becomes dirty again from that source.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::graph::{self, Dependency, Source};
use crate::observable::{Observable, Subscription};

type WatcherRc = Rc<dyn Fn()>;
type WatcherWeak = Weak<dyn Fn()>;

/// Shared interior for [`Computed<T>`].
struct ComputedInner<T> {
    /// The computation function.
    compute: Rc<dyn Fn() -> T>,
    /// Cached result (None only before first computation).
    cached: Option<T>,
    /// Whether the cached value may be stale.
    dirty: bool,
    /// Skip the dependency check on the next refresh.
    forced: bool,
    /// Bumped each time a recomputation yields a different value.
    version: u64,
    /// Sources read by the last computation, with the versions seen.
    deps: Vec<Dependency>,
    /// Watch guards keeping the dirty callbacks registered on `deps`.
    sources: Vec<Subscription>,
    /// Downstream dirty callbacks.
    watchers: Vec<WatcherWeak>,
}

/// A lazily-evaluated, memoized value derived from tracked reads.
///
/// Cloning a `Computed` creates a new handle to the **same** inner state.
pub struct Computed<T> {
    inner: Rc<RefCell<ComputedInner<T>>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Computed")
            .field("cached", &inner.cached)
            .field("dirty", &inner.dirty)
            .field("version", &inner.version)
            .field("dependency_count", &inner.deps.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed value from a compute function.
    ///
    /// Nothing runs until the first read.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ComputedInner {
                compute: Rc::new(compute),
                cached: None,
                dirty: true,
                forced: false,
                version: 0,
                deps: Vec::new(),
                sources: Vec::new(),
                watchers: Vec::new(),
            })),
        }
    }

    /// Create a computed value derived from a single observable.
    pub fn from_observable<S: Clone + PartialEq + 'static>(
        source: &Observable<S>,
        map: impl Fn(&S) -> T + 'static,
    ) -> Self {
        let source = source.clone();
        Self::new(move || source.with(|v| map(v)))
    }

    /// Get the current value, recomputing if any dependency has changed.
    /// Registers a dependency when called inside another computation.
    #[must_use]
    pub fn get(&self) -> T {
        self.refresh();
        self.track();
        self.peek()
    }

    /// Get the current value without registering a dependency.
    #[must_use]
    pub fn get_untracked(&self) -> T {
        self.refresh();
        self.peek()
    }

    /// Access the current value by reference without cloning.
    ///
    /// # Panics
    ///
    /// Panics if the closure attempts to call `get()` on the same
    /// `Computed` while it is dirty (re-entrant borrow).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.refresh();
        self.track();
        let inner = self.inner.borrow();
        f(inner
            .cached
            .as_ref()
            .expect("cached is always Some after refresh"))
    }

    /// Whether the cached value may be stale.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.borrow().dirty
    }

    /// Force recomputation on the next read, even if no dependency moved.
    pub fn invalidate(&self) {
        self.inner.borrow_mut().forced = true;
        Self::mark_dirty(&self.inner);
        graph::maybe_flush();
    }

    /// Current version number. Increments by 1 on each recomputation that
    /// changed the value.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of sources read by the last computation.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner.borrow().deps.len()
    }

    fn peek(&self) -> T {
        self.inner
            .borrow()
            .cached
            .as_ref()
            .expect("cached is always Some after refresh")
            .clone()
    }

    fn track(&self) {
        let version = self.version();
        graph::record(self.source_id(), version, || {
            Rc::new(self.clone()) as Rc<dyn Source>
        });
    }

    /// Bring the cached value up to date.
    fn refresh(&self) {
        let (verify, deps, compute) = {
            let inner = self.inner.borrow();
            if !inner.dirty && inner.cached.is_some() {
                return;
            }
            (
                inner.cached.is_some() && !inner.forced,
                inner.deps.clone(),
                Rc::clone(&inner.compute),
            )
        };

        if verify && !deps.iter().any(Dependency::is_stale) {
            self.inner.borrow_mut().dirty = false;
            return;
        }

        let (value, deps) = graph::track(|| compute());
        let on_dirty = self.dirty_callback();
        let sources: Vec<Subscription> = deps
            .iter()
            .map(|dep| dep.source.watch(Rc::clone(&on_dirty)))
            .collect();

        let mut inner = self.inner.borrow_mut();
        inner.deps = deps;
        inner.sources = sources;
        inner.dirty = false;
        inner.forced = false;
        if inner.cached.as_ref() != Some(&value) {
            inner.cached = Some(value);
            inner.version += 1;
        }
    }

    fn dirty_callback(&self) -> WatcherRc {
        let weak = Rc::downgrade(&self.inner);
        Rc::new(move || {
            if let Some(inner) = weak.upgrade() {
                Self::mark_dirty(&inner);
            }
        })
    }

    /// Mark dirty and tell watchers, once per clean-to-dirty transition.
    fn mark_dirty(inner: &Rc<RefCell<ComputedInner<T>>>) {
        let watchers: Vec<WatcherRc> = {
            let mut inner = inner.borrow_mut();
            if inner.dirty {
                return;
            }
            inner.dirty = true;
            inner.watchers.retain(|w| w.strong_count() > 0);
            inner.watchers.iter().filter_map(Weak::upgrade).collect()
        };
        for watcher in &watchers {
            watcher();
        }
    }
}

impl<T: Clone + PartialEq + 'static> Source for Computed<T> {
    fn source_id(&self) -> usize {
        Rc::as_ptr(&self.inner).cast::<()>() as usize
    }

    fn current_version(&self) -> u64 {
        self.refresh();
        self.version()
    }

    fn watch(&self, on_dirty: Rc<dyn Fn()>) -> Subscription {
        self.inner
            .borrow_mut()
            .watchers
            .push(Rc::downgrade(&on_dirty));
        Subscription::from_guard(Box::new(on_dirty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn single_dep_computed() {
        let source = Observable::new(10);
        let computed = Computed::from_observable(&source, |v| v * 2);

        assert_eq!(computed.get(), 20);
        assert_eq!(computed.version(), 1);

        source.set(5);
        assert!(computed.is_dirty());
        assert_eq!(computed.get(), 10);
        assert_eq!(computed.version(), 2);
    }

    #[test]
    fn dependencies_are_discovered() {
        let width = Observable::new(10);
        let height = Observable::new(20);
        let (w, h) = (width.clone(), height.clone());
        let area = Computed::new(move || w.get() * h.get());

        assert_eq!(area.get(), 200);
        assert_eq!(area.dependency_count(), 2);

        width.set(5);
        assert_eq!(area.get(), 100);

        height.set(30);
        assert_eq!(area.get(), 150);
    }

    #[test]
    fn conditional_dependencies_rebind() {
        let use_a = Observable::new(true);
        let a = Observable::new(1);
        let b = Observable::new(100);
        let (flag, ra, rb) = (use_a.clone(), a.clone(), b.clone());
        let pick = Computed::new(move || if flag.get() { ra.get() } else { rb.get() });

        assert_eq!(pick.get(), 1);
        b.set(200);
        assert!(!pick.is_dirty(), "b is not read while use_a is true");

        use_a.set(false);
        assert_eq!(pick.get(), 200);

        a.set(2);
        assert!(!pick.is_dirty(), "a is no longer read");
        b.set(300);
        assert_eq!(pick.get(), 300);
    }

    #[test]
    fn lazy_evaluation() {
        let compute_count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&compute_count);

        let source = Observable::new(42);
        let source_clone = source.clone();
        let computed = Computed::new(move || {
            count_clone.set(count_clone.get() + 1);
            source_clone.get() * 2
        });

        assert_eq!(compute_count.get(), 0);
        assert_eq!(computed.get(), 84);
        assert_eq!(compute_count.get(), 1);
        assert_eq!(computed.get(), 84);
        assert_eq!(compute_count.get(), 1);
    }

    #[test]
    fn memoization() {
        let compute_count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&compute_count);

        let source = Observable::new(10);
        let computed = Computed::from_observable(&source, move |v| {
            count_clone.set(count_clone.get() + 1);
            v * 2
        });

        assert_eq!(computed.get(), 20);
        assert_eq!(computed.get(), 20);
        assert_eq!(compute_count.get(), 1);

        source.set(20);
        assert_eq!(computed.get(), 40);
        assert_eq!(compute_count.get(), 2);
    }

    #[test]
    fn invalidate_forces_recompute() {
        let compute_count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&compute_count);

        let source = Observable::new(5);
        let computed = Computed::from_observable(&source, move |v| {
            count_clone.set(count_clone.get() + 1);
            *v
        });

        assert_eq!(computed.get(), 5);
        computed.invalidate();
        assert!(computed.is_dirty());
        assert_eq!(computed.get(), 5);
        assert_eq!(compute_count.get(), 2);
        // Same value: no version bump.
        assert_eq!(computed.version(), 1);
    }

    #[test]
    fn equal_result_keeps_version() {
        let source = Observable::new(3);
        let parity = Computed::from_observable(&source, |v| v % 2);
        assert_eq!(parity.get(), 1);
        assert_eq!(parity.version(), 1);

        source.set(5);
        assert_eq!(parity.get(), 1);
        assert_eq!(parity.version(), 1);

        source.set(6);
        assert_eq!(parity.get(), 0);
        assert_eq!(parity.version(), 2);
    }

    #[test]
    fn chained_computed_cuts_off_on_equal_value() {
        let source = Observable::new(3);
        let parity = Computed::from_observable(&source, |v| v % 2);
        let runs = Rc::new(Cell::new(0u32));
        let runs_clone = Rc::clone(&runs);
        let p = parity.clone();
        let label = Computed::new(move || {
            runs_clone.set(runs_clone.get() + 1);
            if p.get() == 0 { "even" } else { "odd" }
        });

        assert_eq!(label.get(), "odd");
        source.set(5);
        assert!(label.is_dirty());
        assert_eq!(label.get(), "odd");
        assert_eq!(runs.get(), 1, "parity did not change, label not recomputed");

        source.set(8);
        assert_eq!(label.get(), "even");
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn diamond_dependency() {
        let a = Observable::new(10);
        let (a1, a2) = (a.clone(), a.clone());
        let b = Computed::new(move || a1.get() + 1);
        let c = Computed::new(move || a2.get() * 2);
        let (b1, c1) = (b.clone(), c.clone());
        let d = Computed::new(move || b1.get() + c1.get());

        assert_eq!(d.get(), 31);
        a.set(5);
        assert_eq!(d.get(), 16);
    }

    #[test]
    fn with_access() {
        let source = Observable::new(vec![1, 2, 3]);
        let computed = Computed::from_observable(&source, |v| v.iter().sum::<i32>());
        assert_eq!(computed.with(|sum| *sum), 6);
    }

    #[test]
    fn computed_survives_source_drop() {
        let computed;
        {
            let source = Observable::new(42);
            computed = Computed::from_observable(&source, |v| *v);
            let _ = computed.get();
        }
        assert_eq!(computed.get(), 42);
        assert!(!computed.is_dirty());
    }

    #[test]
    fn is_dirty_initially_true() {
        let source = Observable::new(1);
        let computed = Computed::from_observable(&source, |v| *v);
        assert!(computed.is_dirty());
    }

    #[test]
    fn untracked_read_does_not_subscribe() {
        let source = Observable::new(1);
        let inner = Computed::from_observable(&source, |v| *v);
        let inner_clone = inner.clone();
        let outer = Computed::new(move || inner_clone.get_untracked() + 1);

        assert_eq!(outer.get(), 2);
        assert_eq!(outer.dependency_count(), 0);
        source.set(5);
        assert_eq!(outer.get(), 2);
    }

    #[test]
    fn debug_format() {
        let source = Observable::new(42);
        let computed = Computed::from_observable(&source, |v| *v);
        let _ = computed.get();
        let dbg = format!("{:?}", computed);
        assert!(dbg.contains("Computed"));
        assert!(dbg.contains("42"));
    }
}
