//! Lifecycle FSM (component E): a small synchronous state machine gating
//! which operations are legal when, plus an observer list and registered
//! per-`(state, event)` actions run before observers.

use std::sync::{Arc, Mutex};

use crate::error::RouterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Idle,
    Starting,
    Ready,
    Transitioning,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Start,
    Started,
    Fail,
    Navigate,
    Complete,
    Cancel,
    Stop,
    Dispose,
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionInfo {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub event: LifecycleEvent,
}

type Observer = Arc<dyn Fn(TransitionInfo) -> Result<(), RouterError> + Send + Sync>;
type Action = Box<dyn Fn(TransitionInfo) -> Result<(), RouterError> + Send + Sync>;

fn next_state(from: LifecycleState, event: LifecycleEvent) -> Option<LifecycleState> {
    use LifecycleEvent::*;
    use LifecycleState::*;
    match (from, event) {
        (Idle, Start) => Some(Starting),
        (Idle, Dispose) => Some(Disposed),
        (Starting, Started) => Some(Ready),
        (Starting, Fail) => Some(Idle),
        (Ready, Navigate) => Some(Transitioning),
        (Ready, Stop) => Some(Idle),
        (Ready, Fail) => Some(Ready),
        (Ready, Dispose) => Some(Disposed),
        (Transitioning, Complete) => Some(Ready),
        (Transitioning, Cancel) => Some(Ready),
        (Transitioning, Fail) => Some(Ready),
        (Transitioning, Navigate) => Some(Transitioning), // supersession
        (Transitioning, Stop) => Some(Idle),
        (Transitioning, Dispose) => Some(Disposed),
        _ => None,
    }
}

/// An observer-list slot; `None` marks a vacated slot whose index is reused
/// by the next `add_observer` call rather than shifting later elements,
/// so iteration stays stable across concurrent add/remove during dispatch.
struct Slots<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for Slots<T> {
    fn default() -> Self {
        Slots { slots: Vec::new() }
    }
}

impl<T> Slots<T> {
    fn insert(&mut self, item: T) -> usize {
        if let Some(idx) = self.slots.iter().position(|s| s.is_none()) {
            self.slots[idx] = Some(item);
            idx
        } else {
            self.slots.push(Some(item));
            self.slots.len() - 1
        }
    }

    fn remove(&mut self, idx: usize) {
        if let Some(slot) = self.slots.get_mut(idx) {
            *slot = None;
        }
    }

    fn snapshot_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.is_some().then_some(i))
            .collect()
    }
}

pub struct ObserverHandle(usize);

pub struct Fsm {
    state: Mutex<LifecycleState>,
    observers: Mutex<Slots<Observer>>,
    actions: Mutex<std::collections::HashMap<(LifecycleState, LifecycleEvent), Action>>,
}

impl Default for Fsm {
    fn default() -> Self {
        Fsm::new()
    }
}

impl Fsm {
    pub fn new() -> Self {
        Fsm {
            state: Mutex::new(LifecycleState::Idle),
            observers: Mutex::new(Slots::default()),
            actions: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn current(&self) -> LifecycleState {
        *self.state.lock().expect("lifecycle lock poisoned")
    }

    pub fn add_observer<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(TransitionInfo) -> Result<(), RouterError> + Send + Sync + 'static,
    {
        let idx = self
            .observers
            .lock()
            .expect("lifecycle lock poisoned")
            .insert(Arc::new(observer));
        ObserverHandle(idx)
    }

    pub fn remove_observer(&self, handle: ObserverHandle) {
        self.observers.lock().expect("lifecycle lock poisoned").remove(handle.0);
    }

    pub fn register_action<F>(&self, from: LifecycleState, event: LifecycleEvent, action: F)
    where
        F: Fn(TransitionInfo) -> Result<(), RouterError> + Send + Sync + 'static,
    {
        self.actions
            .lock()
            .expect("lifecycle lock poisoned")
            .insert((from, event), Box::new(action));
    }

    /// Attempt `event` from the current state. The state is updated *before*
    /// any action or observer runs, so reentrant dispatch from within an
    /// observer observes the post-transition state. An action/observer
    /// exception halts further observers but does not roll back the state
    /// change that already happened.
    pub fn dispatch(&self, event: LifecycleEvent) -> Result<TransitionInfo, RouterError> {
        let from = self.current();
        let to = next_state(from, event).ok_or_else(|| {
            RouterError::invariant(format!("illegal lifecycle transition {from:?} --{event:?}--> ?"))
        })?;
        *self.state.lock().expect("lifecycle lock poisoned") = to;
        let info = TransitionInfo { from, to, event };

        if let Some(action) = self.actions.lock().expect("lifecycle lock poisoned").get(&(from, event)) {
            action(info)?;
        }

        let indices = self.observers.lock().expect("lifecycle lock poisoned").snapshot_indices();
        for idx in indices {
            let observer = {
                let slots = self.observers.lock().expect("lifecycle lock poisoned");
                slots.slots.get(idx).and_then(|s| s.clone())
            };
            let Some(observer) = observer else {
                continue; // removed mid-iteration; snapshot semantics skip it cleanly
            };
            if let Err(e) = observer(info) {
                tracing::error!(error = %e, "lifecycle observer failed; halting further observers");
                return Err(e);
            }
        }

        Ok(info)
    }

    pub fn is_disposed(&self) -> bool {
        self.current() == LifecycleState::Disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn start_then_started_reaches_ready() {
        let fsm = Fsm::new();
        fsm.dispatch(LifecycleEvent::Start).unwrap();
        assert_eq!(fsm.current(), LifecycleState::Starting);
        fsm.dispatch(LifecycleEvent::Started).unwrap();
        assert_eq!(fsm.current(), LifecycleState::Ready);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let fsm = Fsm::new();
        let err = fsm.dispatch(LifecycleEvent::Navigate);
        assert!(err.is_err());
        assert_eq!(fsm.current(), LifecycleState::Idle);
    }

    #[test]
    fn navigate_while_transitioning_supersedes() {
        let fsm = Fsm::new();
        fsm.dispatch(LifecycleEvent::Start).unwrap();
        fsm.dispatch(LifecycleEvent::Started).unwrap();
        fsm.dispatch(LifecycleEvent::Navigate).unwrap();
        fsm.dispatch(LifecycleEvent::Navigate).unwrap();
        assert_eq!(fsm.current(), LifecycleState::Transitioning);
    }

    #[test]
    fn observer_removed_during_iteration_via_null_slot() {
        let fsm = Fsm::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let handle = fsm.add_observer(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        fsm.remove_observer(handle);
        fsm.dispatch(LifecycleEvent::Start).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispose_is_terminal() {
        let fsm = Fsm::new();
        fsm.dispatch(LifecycleEvent::Dispose).unwrap();
        assert!(fsm.is_disposed());
        assert!(fsm.dispatch(LifecycleEvent::Start).is_err());
    }
}
