#![forbid(unsafe_code)]

//! A fake query engine that records every call made through the engine
//! contract.
//!
//! [`FakeClient`] applies [`ClientDefaults`] and serves optimistic results
//! from a seeded in-memory cache. Every observer it builds is kept so tests
//! can inspect it afterwards: how many `set_options` calls it got, with
//! which notify flags, how often it was subscribed and unsubscribed.
//!
//! Pushes are delivered through a [`FakeRemote`], which is `Send` and can be
//! moved onto another thread to imitate network completions.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};

use ahash::AHashMap;
use sigquery_core::{
    ClientDefaults, DefaultedOptions, Listener, NotifyOptions, ObserverClass, ObserverRef,
    OptionsSnapshot, QueryClient, QueryInfo, QueryKey, QueryObserver, QueryOptions, QueryResult,
    QueryValue, Unsubscribe,
};

type Cache<D, E> = Rc<RefCell<AHashMap<String, QueryResult<D, E>>>>;
type Listeners<D, E> = Arc<Mutex<Vec<(u64, Listener<D, E>)>>>;

// =============================================================================
// Client
// =============================================================================

/// In-memory engine client.
pub struct FakeClient<D, E> {
    defaults: ClientDefaults<E>,
    cache: Cache<D, E>,
    observers: RefCell<Vec<Rc<FakeObserver<D, E>>>>,
    default_calls: Cell<usize>,
}

impl<D: QueryValue, E: QueryValue> FakeClient<D, E> {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Self::with_defaults(ClientDefaults::default())
    }

    #[must_use]
    pub fn with_defaults(defaults: ClientDefaults<E>) -> Rc<Self> {
        Rc::new(Self {
            defaults,
            cache: Rc::new(RefCell::new(AHashMap::new())),
            observers: RefCell::new(Vec::new()),
            default_calls: Cell::new(0),
        })
    }

    /// This client as the trait object the runtime expects.
    #[must_use]
    pub fn as_client(self: &Rc<Self>) -> Rc<dyn QueryClient<D, E>> {
        Rc::clone(self) as Rc<dyn QueryClient<D, E>>
    }

    /// Observer class building [`FakeObserver`]s registered with this client.
    pub fn observer_class(self: &Rc<Self>) -> impl ObserverClass<D, E> + 'static {
        let engine = Rc::clone(self);
        move |_client: &Rc<dyn QueryClient<D, E>>, options: OptionsSnapshot<D, E>| {
            let observer = Rc::new(FakeObserver::new(options, Rc::clone(&engine.cache)));
            engine.observers.borrow_mut().push(Rc::clone(&observer));
            tracing::trace!(count = engine.observers.borrow().len(), "fake observer created");
            ObserverRef::<D, E>::from(observer)
        }
    }

    /// Store `result` as the cached state for `key`.
    pub fn seed(&self, key: &QueryKey, result: QueryResult<D, E>) {
        self.cache.borrow_mut().insert(key.hash(), result);
    }

    #[must_use]
    pub fn observers_created(&self) -> usize {
        self.observers.borrow().len()
    }

    /// The `index`-th observer built through [`observer_class`](Self::observer_class).
    #[must_use]
    pub fn observer(&self, index: usize) -> Option<Rc<FakeObserver<D, E>>> {
        self.observers.borrow().get(index).cloned()
    }

    /// Number of `default_query_options` calls.
    #[must_use]
    pub fn default_calls(&self) -> usize {
        self.default_calls.get()
    }
}

impl<D: QueryValue, E: QueryValue> QueryClient<D, E> for FakeClient<D, E> {
    fn default_query_options(&self, options: QueryOptions<D, E>) -> DefaultedOptions<D, E> {
        self.default_calls.set(self.default_calls.get() + 1);
        self.defaults.apply(options)
    }
}

// =============================================================================
// Observer
// =============================================================================

/// Recording observer.
pub struct FakeObserver<D, E> {
    options: RefCell<OptionsSnapshot<D, E>>,
    cache: Cache<D, E>,
    set_options_calls: RefCell<Vec<(OptionsSnapshot<D, E>, NotifyOptions)>>,
    optimistic_calls: Cell<usize>,
    refetches: Cell<usize>,
    subscribes: Cell<usize>,
    unsubscribes: Rc<Cell<usize>>,
    listeners: Listeners<D, E>,
    next_listener: Cell<u64>,
}

impl<D: QueryValue, E: QueryValue> FakeObserver<D, E> {
    fn new(options: OptionsSnapshot<D, E>, cache: Cache<D, E>) -> Self {
        Self {
            options: RefCell::new(options),
            cache,
            set_options_calls: RefCell::new(Vec::new()),
            optimistic_calls: Cell::new(0),
            refetches: Cell::new(0),
            subscribes: Cell::new(0),
            unsubscribes: Rc::new(Cell::new(0)),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: Cell::new(0),
        }
    }

    /// A `Send` handle pushing to this observer's listeners.
    #[must_use]
    pub fn remote(&self) -> FakeRemote<D, E> {
        FakeRemote {
            listeners: Arc::clone(&self.listeners),
        }
    }

    /// Push `result` to every current listener. Returns how many were called.
    pub fn push(&self, result: QueryResult<D, E>) -> usize {
        self.remote().push(result)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    #[must_use]
    pub fn set_options_calls(&self) -> Vec<(OptionsSnapshot<D, E>, NotifyOptions)> {
        self.set_options_calls.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.subscribes.get()
    }

    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.get()
    }

    #[must_use]
    pub fn optimistic_calls(&self) -> usize {
        self.optimistic_calls.get()
    }

    #[must_use]
    pub fn refetch_count(&self) -> usize {
        self.refetches.get()
    }
}

impl<D: QueryValue, E: QueryValue> QueryObserver<D, E> for FakeObserver<D, E> {
    fn set_options(&self, options: OptionsSnapshot<D, E>, notify: NotifyOptions) {
        self.set_options_calls
            .borrow_mut()
            .push((options.clone(), notify));
        *self.options.borrow_mut() = options;
    }

    fn optimistic_result(&self, options: &OptionsSnapshot<D, E>) -> QueryResult<D, E> {
        self.optimistic_calls.set(self.optimistic_calls.get() + 1);
        let cached = self.cache.borrow().get(&options.query_hash).cloned();
        match cached {
            Some(result) => result,
            None if options.enabled && !options.is_restoring() => QueryResult::pending().fetching(),
            None => QueryResult::pending(),
        }
    }

    fn subscribe(&self, listener: Listener<D, E>) -> Unsubscribe {
        let id = self.next_listener.get();
        self.next_listener.set(id + 1);
        self.subscribes.set(self.subscribes.get() + 1);
        lock(&self.listeners).push((id, listener));

        let listeners = Arc::clone(&self.listeners);
        let unsubscribes = Rc::clone(&self.unsubscribes);
        Unsubscribe::new(move || {
            lock(&listeners).retain(|(other, _)| *other != id);
            unsubscribes.set(unsubscribes.get() + 1);
        })
    }

    fn current_query(&self) -> QueryInfo {
        QueryInfo::new(self.options.borrow().query_key.clone())
    }

    fn options(&self) -> OptionsSnapshot<D, E> {
        self.options.borrow().clone()
    }

    fn refetch(&self) {
        self.refetches.set(self.refetches.get() + 1);
    }
}

// =============================================================================
// Remote
// =============================================================================

/// Thread-safe push handle for one observer.
pub struct FakeRemote<D, E> {
    listeners: Listeners<D, E>,
}

impl<D, E> Clone for FakeRemote<D, E> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<D: QueryValue, E: QueryValue> FakeRemote<D, E> {
    /// Call every listener registered right now with a copy of `result`.
    pub fn push(&self, result: QueryResult<D, E>) -> usize {
        let listeners: Vec<Listener<D, E>> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &listeners {
            listener(result.clone());
        }
        listeners.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Rc<FakeClient<u32, String>> {
        FakeClient::new()
    }

    fn snapshot(client: &FakeClient<u32, String>, key: &str) -> OptionsSnapshot<u32, String> {
        OptionsSnapshot::new(client.default_query_options(QueryOptions::new(key)))
    }

    #[test]
    fn observer_class_registers_observers() {
        let client = client();
        let class = client.observer_class();
        let options = snapshot(&client, "todos");
        let observer = class.create(&client.as_client(), options);
        assert_eq!(client.observers_created(), 1);
        assert_eq!(observer.current_query().query_hash, QueryKey::from("todos").hash());
    }

    #[test]
    fn optimistic_serves_seeded_cache() {
        let client = client();
        client.seed(&QueryKey::from("todos"), QueryResult::success(7));
        let observer = FakeObserver::new(snapshot(&client, "todos"), Rc::clone(&client.cache));

        let result = observer.optimistic_result(&snapshot(&client, "todos"));
        assert_eq!(result.data, Some(7));
        let missing = observer.optimistic_result(&snapshot(&client, "other"));
        assert!(missing.is_pending());
        assert!(missing.is_fetching());
        assert_eq!(observer.optimistic_calls(), 2);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let client = client();
        let observer = FakeObserver::new(snapshot(&client, "todos"), Rc::clone(&client.cache));
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        let unsubscribe = observer.subscribe(Arc::new(move |r: QueryResult<u32, String>| {
            sink.lock().unwrap().push(r.data);
        }));

        assert_eq!(observer.push(QueryResult::success(1)), 1);
        unsubscribe.unsubscribe();
        assert_eq!(observer.push(QueryResult::success(2)), 0);
        assert_eq!(*hits.lock().unwrap(), vec![Some(1)]);
        assert_eq!(observer.unsubscribe_count(), 1);
    }

    #[test]
    fn remote_pushes_from_another_thread() {
        let client = client();
        let observer = FakeObserver::new(snapshot(&client, "todos"), Rc::clone(&client.cache));
        let hits = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&hits);
        let _keep = observer.subscribe(Arc::new(move |_: QueryResult<u32, String>| {
            *sink.lock().unwrap() += 1;
        }));

        let remote = observer.remote();
        std::thread::spawn(move || remote.push(QueryResult::success(3)))
            .join()
            .unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
