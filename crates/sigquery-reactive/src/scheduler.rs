#![forbid(unsafe_code)]

//! The graph's execution context.
//!
//! A [`HostContext`] is the single place where state owned by the signal
//! graph may be mutated. Work that originates elsewhere (engine timers,
//! network completions on other threads) reaches the graph by posting a
//! message through a [`PortSender`]; the message waits in the inbox until
//! the owning thread calls [`tick()`](HostContext::tick).
//!
//! The inbox is unbounded: a post never fails while the context is alive,
//! so the newest message is never the one lost. The number of waiting
//! messages is tracked as the *backlog*; crossing
//! [`backlog_warning`](HostConfig::backlog_warning) logs a warning.
//!
//! # Tick semantics
//!
//! One tick drains up to `max_messages_per_tick` messages and applies them,
//! in arrival order, inside a single batch. Dependents therefore observe
//! the final state of the tick and effects run at most once per tick no
//! matter how many messages arrived.
//!
//! Messages carry their port's *generation*. A port that is re-armed with
//! [`Port::advance`] or closed invalidates every sender handed out before;
//! their messages are counted as stale and dropped.
//!
//! # Error boundary
//!
//! A port handler may return a [`RaisedError`]. The error is delivered to
//! every handler registered with [`on_error`](HostContext::on_error) and
//! recorded in the [`TickReport`]. It does not stop the tick: later
//! messages are still applied.
//!
//! # Entering and leaving
//!
//! [`run`](HostContext::run) enters the context: its closure is batched and
//! pending effects flush on exit. [`run_outside`](HostContext::run_outside)
//! leaves it: reads are untracked and effect flushing is held until control
//! returns, so engine bookkeeping done there cannot trigger reactivity.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use ahash::AHashMap;

use crate::config::HostConfig;
use crate::error::{HostError, RaisedError};
use crate::graph;
use crate::observable::Subscription;

type Payload = Box<dyn Any + Send>;
type PortHandler = Rc<dyn Fn(Payload) -> Result<(), RaisedError>>;
type ErrorHandlerRc = Rc<dyn Fn(&RaisedError)>;
type ErrorHandlerWeak = Weak<dyn Fn(&RaisedError)>;

/// One posted message.
struct Envelope {
    slot: u64,
    generation: u64,
    payload: Payload,
}

/// Count of messages in the inbox, shared with every sender.
struct Backlog {
    waiting: AtomicUsize,
    warn_at: usize,
}

impl Backlog {
    fn posted(&self) {
        let waiting = self.waiting.fetch_add(1, Ordering::AcqRel) + 1;
        if waiting == self.warn_at {
            tracing::warn!(waiting, "host inbox backlog is growing; is the host ticking?");
        }
    }

    fn taken(&self, n: usize) {
        if n > 0 {
            self.waiting.fetch_sub(n, Ordering::AcqRel);
        }
    }

    fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }
}

struct Slot {
    label: String,
    generation: Rc<Cell<u64>>,
    handler: PortHandler,
}

struct HostInner {
    config: HostConfig,
    tx: mpsc::Sender<Envelope>,
    rx: mpsc::Receiver<Envelope>,
    backlog: Arc<Backlog>,
    slots: RefCell<AHashMap<u64, Slot>>,
    next_slot: Cell<u64>,
    error_handlers: RefCell<Vec<ErrorHandlerWeak>>,
    depth: Cell<usize>,
    ticks: Cell<u64>,
}

/// What one [`tick`](HostContext::tick) did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Messages taken from the inbox.
    pub received: usize,
    /// Messages handed to a live port handler that accepted them.
    pub applied: usize,
    /// Messages for closed ports or superseded generations.
    pub stale: usize,
    /// Errors raised by handlers during this tick.
    pub raised: Vec<RaisedError>,
    /// Whether the per-tick limit was reached with messages still waiting.
    pub saturated: bool,
}

impl TickReport {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.received == 0
    }
}

/// The graph's execution context. Cheap to clone; not `Send`.
#[derive(Clone)]
pub struct HostContext {
    inner: Rc<HostInner>,
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("config", &self.inner.config)
            .field("ports", &self.inner.slots.borrow().len())
            .field("ticks", &self.inner.ticks.get())
            .field("in_context", &self.is_in_context())
            .finish()
    }
}

impl HostContext {
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        let backlog = Arc::new(Backlog {
            waiting: AtomicUsize::new(0),
            warn_at: config.backlog_warning.max(1),
        });
        Self {
            inner: Rc::new(HostInner {
                config,
                tx,
                rx,
                backlog,
                slots: RefCell::new(AHashMap::new()),
                next_slot: Cell::new(1),
                error_handlers: RefCell::new(Vec::new()),
                depth: Cell::new(0),
                ticks: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// Whether the caller is inside [`run`](Self::run) (and not inside a
    /// nested [`run_outside`](Self::run_outside)).
    #[must_use]
    pub fn is_in_context(&self) -> bool {
        self.inner.depth.get() > 0 && !graph::is_suspended()
    }

    /// Labels of the open ports, in no particular order.
    #[must_use]
    pub fn port_labels(&self) -> Vec<String> {
        self.inner
            .slots
            .borrow()
            .values()
            .map(|slot| slot.label.clone())
            .collect()
    }

    /// Messages posted but not yet taken by a tick.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.inner.backlog.waiting()
    }

    /// Number of completed ticks.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.inner.ticks.get()
    }

    /// Enter the context. Effects scheduled by `f` run once it returns.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _depth = DepthGuard::enter(&self.inner.depth);
        graph::batch(f)
    }

    /// Leave the context: `f` runs untracked and cannot flush effects.
    pub fn run_outside<R>(&self, f: impl FnOnce() -> R) -> R {
        graph::suspended(f)
    }

    /// Register a port whose messages are applied by `handler` on this
    /// thread during [`tick`](Self::tick).
    pub fn open_port<M: Send + 'static>(
        &self,
        label: impl Into<String>,
        handler: impl Fn(M) -> Result<(), RaisedError> + 'static,
    ) -> Port<M> {
        let slot = self.inner.next_slot.get();
        self.inner.next_slot.set(slot + 1);
        let label = label.into();
        let generation = Rc::new(Cell::new(0));

        let handler_label = label.clone();
        let erased: PortHandler = Rc::new(move |payload: Payload| match payload.downcast::<M>() {
            Ok(message) => handler(*message),
            Err(_) => {
                tracing::warn!(port = %handler_label, "dropping message of unexpected type");
                Ok(())
            }
        });

        self.inner.slots.borrow_mut().insert(
            slot,
            Slot {
                label: label.clone(),
                generation: Rc::clone(&generation),
                handler: erased,
            },
        );
        tracing::debug!(port = %label, slot, "port opened");

        Port {
            host: Rc::downgrade(&self.inner),
            tx: self.inner.tx.clone(),
            backlog: Arc::clone(&self.inner.backlog),
            slot,
            label,
            generation,
            closed: Cell::new(false),
            _marker: PhantomData,
        }
    }

    /// Register an error boundary. Dropping the guard removes it.
    pub fn on_error(&self, handler: impl Fn(&RaisedError) + 'static) -> Subscription {
        let strong: ErrorHandlerRc = Rc::new(handler);
        let mut handlers = self.inner.error_handlers.borrow_mut();
        handlers.retain(|h| h.strong_count() > 0);
        handlers.push(Rc::downgrade(&strong));
        drop(handlers);
        Subscription::from_guard(Box::new(strong))
    }

    /// Deliver `error` to every live boundary.
    pub fn raise(&self, error: &RaisedError) {
        let handlers: Vec<ErrorHandlerRc> = {
            let mut handlers = self.inner.error_handlers.borrow_mut();
            handlers.retain(|h| h.strong_count() > 0);
            handlers.iter().filter_map(Weak::upgrade).collect()
        };
        if handlers.is_empty() {
            tracing::warn!(origin = error.origin(), "raised error reached no boundary");
            return;
        }
        for handler in &handlers {
            handler(error);
        }
    }

    /// Drain the inbox and apply what arrived. See the module docs.
    pub fn tick(&self) -> TickReport {
        let max = self.inner.config.max_messages_per_tick.max(1);
        let mut drained = Vec::new();
        while drained.len() < max {
            match self.inner.rx.try_recv() {
                Ok(envelope) => drained.push(envelope),
                Err(_) => break,
            }
        }
        self.inner.backlog.taken(drained.len());

        let mut report = TickReport {
            received: drained.len(),
            saturated: drained.len() == max && self.inner.backlog.waiting() > 0,
            ..TickReport::default()
        };

        self.run(|| {
            for envelope in drained {
                let target = {
                    let slots = self.inner.slots.borrow();
                    slots.get(&envelope.slot).and_then(|slot| {
                        (slot.generation.get() == envelope.generation)
                            .then(|| Rc::clone(&slot.handler))
                    })
                };
                let Some(handler) = target else {
                    report.stale += 1;
                    continue;
                };
                match handler(envelope.payload) {
                    Ok(()) => report.applied += 1,
                    Err(error) => {
                        self.raise(&error);
                        report.raised.push(error);
                    }
                }
            }
        });

        self.inner.ticks.set(self.inner.ticks.get() + 1);
        if !report.is_idle() {
            tracing::debug!(
                received = report.received,
                applied = report.applied,
                stale = report.stale,
                raised = report.raised.len(),
                saturated = report.saturated,
                "host tick"
            );
        }
        report
    }

    /// Tick until the inbox is empty. Returns the merged report.
    pub fn drain(&self) -> TickReport {
        let mut total = TickReport::default();
        loop {
            let report = self.tick();
            total.received += report.received;
            total.applied += report.applied;
            total.stale += report.stale;
            total.raised.extend(report.raised);
            if !report.saturated {
                return total;
            }
        }
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Receiving end of a message stream, owned by the graph thread.
///
/// Dropping the port closes it; messages already in flight are discarded.
pub struct Port<M> {
    host: Weak<HostInner>,
    tx: mpsc::Sender<Envelope>,
    backlog: Arc<Backlog>,
    slot: u64,
    label: String,
    generation: Rc<Cell<u64>>,
    closed: Cell<bool>,
    _marker: PhantomData<fn(M)>,
}

impl<M: Send + 'static> Port<M> {
    /// A sender for the current generation.
    #[must_use]
    pub fn sender(&self) -> PortSender<M> {
        PortSender {
            tx: self.tx.clone(),
            backlog: Arc::clone(&self.backlog),
            slot: self.slot,
            generation: self.generation.get(),
            _marker: PhantomData,
        }
    }

    /// Start a new generation and return a sender for it. Messages from
    /// every earlier sender become stale.
    #[must_use]
    pub fn advance(&self) -> PortSender<M> {
        self.invalidate();
        self.sender()
    }

    /// Discard every message posted through senders handed out so far.
    pub fn invalidate(&self) {
        self.generation.set(self.generation.get() + 1);
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Unregister the port. Idempotent.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        self.invalidate();
        if let Some(host) = self.host.upgrade() {
            host.slots.borrow_mut().remove(&self.slot);
        }
        tracing::debug!(port = %self.label, slot = self.slot, "port closed");
    }
}

impl<M> Drop for Port<M> {
    fn drop(&mut self) {
        if self.closed.replace(true) {
            return;
        }
        if let Some(host) = self.host.upgrade() {
            host.slots.borrow_mut().remove(&self.slot);
        }
    }
}

impl<M> std::fmt::Debug for Port<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("label", &self.label)
            .field("slot", &self.slot)
            .field("generation", &self.generation.get())
            .field("closed", &self.closed.get())
            .finish()
    }
}

/// Sending end of a port. `Send + Sync`; usable from any thread.
pub struct PortSender<M> {
    tx: mpsc::Sender<Envelope>,
    backlog: Arc<Backlog>,
    slot: u64,
    generation: u64,
    _marker: PhantomData<fn(M)>,
}

impl<M> Clone for PortSender<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            backlog: Arc::clone(&self.backlog),
            slot: self.slot,
            generation: self.generation,
            _marker: PhantomData,
        }
    }
}

impl<M> std::fmt::Debug for PortSender<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSender")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<M: Send + 'static> PortSender<M> {
    /// Queue `message` for the next tick. Never blocks; fails only once
    /// the context is gone.
    pub fn post(&self, message: M) -> crate::Result<()> {
        let envelope = Envelope {
            slot: self.slot,
            generation: self.generation,
            payload: Box::new(message),
        };
        self.backlog.posted();
        self.tx.send(envelope).map_err(|_| {
            self.backlog.taken(1);
            HostError::InboxClosed
        })
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
