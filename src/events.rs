//! Event bus (component F): typed multi-event emission with safe iteration
//! under concurrent subscribe/unsubscribe, recursion-depth protection, and
//! hard limits. Structurally grounded on `r2e_events::EventBus`'s
//! `Arc<RwLock<HashMap<..>>>` storage; dispatch semantics are redesigned to
//! be synchronous, snapshot-at-emit-time, and per-listener exception
//! isolated (the teacher's bus fires-and-forgets via `tokio::spawn`, which
//! does not give the ordering guarantees spec.md requires).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::RouterError;
use crate::state::{NavigationOptionsSnapshot, State};

const REENTRANCY_DEPTH_CAP: u32 = 5;
const HARD_LISTENER_CEILING: usize = 10_000;
const SOFT_LISTENER_WARNING: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RouterStart,
    RouterStop,
    TransitionStart,
    TransitionSuccess,
    TransitionError,
    TransitionCancel,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    RouterStart,
    RouterStop,
    TransitionStart {
        to: State,
        from: Option<State>,
    },
    TransitionSuccess {
        to: State,
        from: Option<State>,
        options: NavigationOptionsSnapshot,
    },
    TransitionError {
        to: Option<State>,
        from: Option<State>,
        error: RouterError,
    },
    TransitionCancel {
        to: State,
        from: Option<State>,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::RouterStart => EventKind::RouterStart,
            EventPayload::RouterStop => EventKind::RouterStop,
            EventPayload::TransitionStart { .. } => EventKind::TransitionStart,
            EventPayload::TransitionSuccess { .. } => EventKind::TransitionSuccess,
            EventPayload::TransitionError { .. } => EventKind::TransitionError,
            EventPayload::TransitionCancel { .. } => EventKind::TransitionCancel,
        }
    }
}

pub type Listener = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// `{route, previousRoute}`, the payload [`EventBus::subscribe_route_change`]
/// delivers instead of the full `TRANSITION_SUCCESS` payload.
#[derive(Debug, Clone)]
pub struct RouteChange {
    pub route: String,
    pub previous_route: Option<String>,
}

pub type RouteChangeListener = Arc<dyn Fn(&RouteChange) + Send + Sync>;

/// A cooperative cancellation signal for [`EventBus::subscribe_observable`],
/// mirroring [`crate::transition::CancelHandle`]'s flag-based design.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<std::sync::atomic::AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        CancelSignal(Arc::new(std::sync::atomic::AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::Acquire)
    }
}

pub type StateObserver = Arc<dyn Fn(State) + Send + Sync>;

/// Options for [`EventBus::subscribe_observable`]: `{signal?, replay?=true}`.
#[derive(Clone)]
pub struct ObserveOptions {
    pub signal: Option<CancelSignal>,
    pub replay: bool,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        ObserveOptions {
            signal: None,
            replay: true,
        }
    }
}

struct ListenerEntry {
    id: u64,
    listener: Listener,
    /// Identifies the listener for duplicate-registration rejection; we
    /// compare by `Arc::as_ptr` identity, the closest Rust analogue to the
    /// source library's function-reference equality.
    ptr: *const (),
}

// ListenerEntry is only ever read/cloned behind the bus's RwLock from
// Send + Sync contexts; the raw pointer is never dereferenced, only compared.
unsafe impl Send for ListenerEntry {}
unsafe impl Sync for ListenerEntry {}

pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<Option<ListenerEntry>>>>,
    depth: RwLock<HashMap<EventKind, u32>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            listeners: RwLock::new(HashMap::new()),
            depth: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn ptr_of(listener: &Listener) -> *const () {
        Arc::as_ptr(listener) as *const ()
    }

    /// Registers `listener` for `kind`. Rejects a listener already
    /// registered for the same event (function-reference identity).
    pub fn subscribe(&self, kind: EventKind, listener: Listener) -> Result<u64, RouterError> {
        let ptr = Self::ptr_of(&listener);
        let mut guard = self.listeners.write().expect("event bus lock poisoned");
        let slots = guard.entry(kind).or_default();

        if slots.iter().flatten().any(|e| e.ptr == ptr) {
            return Err(RouterError::invalid(
                "events.subscribe",
                "listener already registered for this event",
            ));
        }

        let live_count = slots.iter().flatten().count();
        if live_count >= HARD_LISTENER_CEILING {
            return Err(RouterError::invariant(format!(
                "listener ceiling of {HARD_LISTENER_CEILING} exceeded for {kind:?}"
            )));
        }
        if live_count + 1 == SOFT_LISTENER_WARNING {
            tracing::warn!(?kind, "approaching soft listener warning threshold");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = ListenerEntry { id, listener, ptr };
        if let Some(idx) = slots.iter().position(|s| s.is_none()) {
            slots[idx] = Some(entry);
        } else {
            slots.push(Some(entry));
        }
        Ok(id)
    }

    /// Idempotent: unsubscribing an id that is no longer present is a no-op.
    pub fn unsubscribe(&self, kind: EventKind, id: u64) {
        let mut guard = self.listeners.write().expect("event bus lock poisoned");
        if let Some(slots) = guard.get_mut(&kind) {
            for slot in slots.iter_mut() {
                if slot.as_ref().is_some_and(|e| e.id == id) {
                    *slot = None;
                }
            }
        }
    }

    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.listeners
            .read()
            .expect("event bus lock poisoned")
            .get(&kind)
            .is_some_and(|slots| slots.iter().any(|s| s.is_some()))
    }

    /// Live listener count for `kind`, used by [`crate::router::RouterMetrics`].
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .expect("event bus lock poisoned")
            .get(&kind)
            .map(|slots| slots.iter().flatten().count())
            .unwrap_or(0)
    }

    /// Emits `payload` synchronously to a snapshot of the current listener
    /// list. Per-listener panics are caught and logged; other listeners
    /// still run. Reentrant emission of the same event kind beyond the
    /// depth cap is rejected.
    pub fn emit(&self, payload: EventPayload) -> Result<(), RouterError> {
        let kind = payload.kind();

        {
            let mut depth = self.depth.write().expect("event bus lock poisoned");
            let current = depth.entry(kind).or_insert(0);
            if *current >= REENTRANCY_DEPTH_CAP {
                return Err(RouterError::invariant(format!(
                    "event reentrancy depth cap of {REENTRANCY_DEPTH_CAP} exceeded for {kind:?}"
                )));
            }
            *current += 1;
        }

        let snapshot: Vec<Listener> = {
            let guard = self.listeners.read().expect("event bus lock poisoned");
            guard
                .get(&kind)
                .map(|slots| slots.iter().flatten().map(|e| e.listener.clone()).collect())
                .unwrap_or_default()
        };

        for listener in snapshot {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&payload)));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "listener panicked".to_string());
                tracing::error!(?kind, message, "event listener failed; continuing with remaining listeners");
            }
        }

        let mut depth = self.depth.write().expect("event bus lock poisoned");
        if let Some(current) = depth.get_mut(&kind) {
            *current = current.saturating_sub(1);
        }

        Ok(())
    }

    /// `subscribe(fn)`: convenience over `TRANSITION_SUCCESS` delivering just
    /// `{route, previousRoute}` instead of the full event payload.
    pub fn subscribe_route_change(
        &self,
        bus: Arc<EventBus>,
        listener: RouteChangeListener,
    ) -> Result<EventSubscription, RouterError> {
        let wrapped: Listener = Arc::new(move |payload| {
            if let EventPayload::TransitionSuccess { to, from, .. } = payload {
                listener(&RouteChange {
                    route: to.name().to_string(),
                    previous_route: from.as_ref().map(|s| s.name().to_string()),
                });
            }
        });
        let id = self.subscribe(EventKind::TransitionSuccess, wrapped)?;
        Ok(EventSubscription::new(bus, EventKind::TransitionSuccess, id))
    }

    /// The Observable-shaped adapter: `subscribe(observer, {signal?,
    /// replay?=true})`. Every committed transition calls `observer` with the
    /// new state; if `replay` is set and `current` is `Some`, the current
    /// state is additionally delivered once, asynchronously (spec.md's "post
    /// a microtask equivalent"), via a spawned task that yields once before
    /// calling `observer` so it never runs synchronously inside `subscribe`.
    pub fn subscribe_observable(
        &self,
        bus: Arc<EventBus>,
        observer: StateObserver,
        current: Option<State>,
        opts: ObserveOptions,
    ) -> Result<EventSubscription, RouterError> {
        let live_signal = opts.signal.clone();
        let live_observer = observer.clone();
        let wrapped: Listener = Arc::new(move |payload| {
            if let EventPayload::TransitionSuccess { to, .. } = payload {
                if live_signal.as_ref().is_some_and(CancelSignal::is_cancelled) {
                    return;
                }
                live_observer(to.clone());
            }
        });
        let id = self.subscribe(EventKind::TransitionSuccess, wrapped)?;
        let subscription = EventSubscription::new(bus, EventKind::TransitionSuccess, id);

        if opts.replay {
            if let Some(state) = current {
                let signal = opts.signal.clone();
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    if !signal.as_ref().is_some_and(CancelSignal::is_cancelled) {
                        observer(state);
                    }
                });
            }
        }

        Ok(subscription)
    }
}

/// An idempotent unsubscribe handle, shareable with callers outside this
/// crate (e.g. the public router facets).
#[derive(Clone)]
pub struct EventSubscription {
    bus: Arc<EventBus>,
    kind: EventKind,
    id: u64,
}

impl EventSubscription {
    pub fn new(bus: Arc<EventBus>, kind: EventKind, id: u64) -> Self {
        EventSubscription { bus, kind, id }
    }

    pub fn unsubscribe(&self) {
        self.bus.unsubscribe(self.kind, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AOrdering};

    fn dummy_state() -> State {
        State::new(
            "home",
            Default::default(),
            "/home",
            crate::state::Meta {
                id: 1,
                params: Default::default(),
                options: Default::default(),
                source: None,
            },
        )
    }

    #[test]
    fn duplicate_listener_for_same_event_is_rejected() {
        let bus = EventBus::new();
        let listener: Listener = Arc::new(|_| {});
        bus.subscribe(EventKind::RouterStart, listener.clone()).unwrap();
        let err = bus.subscribe(EventKind::RouterStart, listener);
        assert!(err.is_err());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let listener: Listener = Arc::new(|_| {});
        let id = bus.subscribe(EventKind::RouterStart, listener).unwrap();
        bus.unsubscribe(EventKind::RouterStart, id);
        bus.unsubscribe(EventKind::RouterStart, id);
        assert!(!bus.has_listeners(EventKind::RouterStart));
    }

    #[test]
    fn emit_reaches_all_listeners_even_if_one_panics() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(EventKind::RouterStart, Arc::new(|_| panic!("boom"))).unwrap();
        bus.subscribe(
            EventKind::RouterStart,
            Arc::new(move |_| {
                count2.fetch_add(1, AOrdering::SeqCst);
            }),
        )
        .unwrap();
        bus.emit(EventPayload::RouterStart).unwrap();
        assert_eq!(count.load(AOrdering::SeqCst), 1);
    }

    #[test]
    fn reentrancy_depth_is_capped() {
        let bus = Arc::new(EventBus::new());
        let bus2 = bus.clone();
        bus.subscribe(
            EventKind::TransitionStart,
            Arc::new(move |_| {
                for _ in 0..10 {
                    let _ = bus2.emit(EventPayload::TransitionStart {
                        to: dummy_state(),
                        from: None,
                    });
                }
            }),
        )
        .unwrap();
        let result = bus.emit(EventPayload::TransitionStart {
            to: dummy_state(),
            from: None,
        });
        assert!(result.is_ok());
    }

    #[test]
    fn route_change_listener_sees_only_route_and_previous_route() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen2 = seen.clone();
        bus.subscribe_route_change(
            bus.clone(),
            Arc::new(move |change| {
                *seen2.lock().unwrap() = Some((change.route.clone(), change.previous_route.clone()));
            }),
        )
        .unwrap();
        bus.emit(EventPayload::TransitionSuccess {
            to: dummy_state(),
            from: None,
            options: Default::default(),
        })
        .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(("home".to_string(), None)));
    }

    #[tokio::test]
    async fn observable_replay_delivers_current_state_asynchronously() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let _sub = bus
            .subscribe_observable(
                bus.clone(),
                Arc::new(move |_state| {
                    seen2.fetch_add(1, AOrdering::SeqCst);
                }),
                Some(dummy_state()),
                ObserveOptions::default(),
            )
            .unwrap();
        assert_eq!(seen.load(AOrdering::SeqCst), 0, "replay must not run synchronously");
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(seen.load(AOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn observable_replay_is_skipped_once_signal_is_cancelled() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let signal = CancelSignal::new();
        let _sub = bus
            .subscribe_observable(
                bus.clone(),
                Arc::new(move |_state| {
                    seen2.fetch_add(1, AOrdering::SeqCst);
                }),
                Some(dummy_state()),
                ObserveOptions {
                    signal: Some(signal.clone()),
                    replay: true,
                },
            )
            .unwrap();
        signal.cancel();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(seen.load(AOrdering::SeqCst), 0);
    }
}
