//! Transition engine (component J): the orchestrator that turns a
//! `(name, params, options)` navigation request into either a committed
//! state change or exactly one terminal event. Grounded on the teacher's
//! request-handling pipeline shape (resolve → guard chain → handler →
//! response) generalized from one HTTP request to one navigation, with
//! supersession and cancellation layered on top per spec.md §4.J.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::dependencies::DependencyBag;
use crate::error::RouterError;
use crate::events::{EventBus, EventPayload};
use crate::guards::GuardOutcome;
use crate::lifecycle::{Fsm, LifecycleEvent, LifecycleState};
use crate::middleware::{MiddlewareOutcome, MiddlewareRegistry};
use crate::options::RouterOptions;
use crate::params::Params;
use crate::route_tree::RouteTree;
use crate::state::{Meta, NavigationOptionsSnapshot, State};

/// Caller-supplied navigation options. Unknown string/bool entries have no
/// home in a typed struct, so they land in `custom` and are carried into
/// `state.meta` verbatim rather than validated further.
#[derive(Debug, Clone, Default)]
pub struct NavigateOptions {
    pub replace: bool,
    pub reload: bool,
    pub force: bool,
    pub skip_transition: bool,
    pub force_deactivate: bool,
    pub source: Option<String>,
    pub custom: HashMap<String, serde_json::Value>,
}

impl NavigateOptions {
    fn snapshot(&self) -> NavigationOptionsSnapshot {
        NavigationOptionsSnapshot {
            replace: self.replace,
            reload: self.reload,
            force: self.force,
            skip_transition: self.skip_transition,
            force_deactivate: self.force_deactivate,
            source: self.source.clone(),
        }
    }
}

/// A handle the caller can use to request cancellation of a still-running
/// navigation. Invoking it after commit is a harmless no-op: the engine
/// only consults the flag at phase boundaries before commit.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

fn dotted_ancestors(name: &str) -> Vec<String> {
    let parts: Vec<&str> = name.split('.').collect();
    (1..=parts.len()).map(|i| parts[..i].join(".")).collect()
}

/// Names present in `from`'s ancestor chain but not shared with `to`,
/// leaf-to-root. Empty if `from` is `None`.
fn to_deactivate(from: Option<&str>, to: &str) -> Vec<String> {
    let Some(from) = from else { return Vec::new() };
    let from_chain = dotted_ancestors(from);
    let to_chain = dotted_ancestors(to);
    let common = from_chain.iter().zip(to_chain.iter()).take_while(|(a, b)| a == b).count();
    let mut rest = from_chain[common..].to_vec();
    rest.reverse();
    rest
}

/// Names in `to`'s ancestor chain not already active from `from`,
/// root-to-leaf.
fn to_activate(from: Option<&str>, to: &str) -> Vec<String> {
    let to_chain = dotted_ancestors(to);
    let common = match from {
        Some(from) => {
            let from_chain = dotted_ancestors(from);
            from_chain.iter().zip(to_chain.iter()).take_while(|(a, b)| a == b).count()
        }
        None => 0,
    };
    to_chain[common..].to_vec()
}

pub struct TransitionEngine {
    route_tree: Arc<RwLock<RouteTree>>,
    guards: Arc<Mutex<crate::guards::GuardRegistry>>,
    middleware: Arc<RwLock<MiddlewareRegistry>>,
    dependencies: Arc<DependencyBag>,
    events: Arc<EventBus>,
    fsm: Arc<Fsm>,
    options: Arc<RouterOptions>,
    current: RwLock<Option<State>>,
    nav_counter: AtomicU64,
    current_nav_id: AtomicU64,
    in_flight: RwLock<Option<(u64, State, Option<State>)>>,
    committed: AtomicU64,
    cancelled: AtomicU64,
    errored: AtomicU64,
}

/// Point-in-time counts of transition outcomes, for [`crate::router::RouterMetrics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionCounts {
    pub committed: u64,
    pub cancelled: u64,
    pub errored: u64,
}

impl TransitionEngine {
    pub fn new(
        route_tree: Arc<RwLock<RouteTree>>,
        guards: Arc<Mutex<crate::guards::GuardRegistry>>,
        middleware: Arc<RwLock<MiddlewareRegistry>>,
        dependencies: Arc<DependencyBag>,
        events: Arc<EventBus>,
        fsm: Arc<Fsm>,
        options: Arc<RouterOptions>,
    ) -> Self {
        TransitionEngine {
            route_tree,
            guards,
            middleware,
            dependencies,
            events,
            fsm,
            options,
            current: RwLock::new(None),
            nav_counter: AtomicU64::new(0),
            current_nav_id: AtomicU64::new(0),
            in_flight: RwLock::new(None),
            committed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            errored: AtomicU64::new(0),
        }
    }

    pub fn current_state(&self) -> Option<State> {
        self.current.read().expect("transition engine lock poisoned").clone()
    }

    pub fn transition_counts(&self) -> TransitionCounts {
        TransitionCounts {
            committed: self.committed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
        }
    }

    /// Used by `start()`/`stop()` to seed or clear current state without
    /// running the full transition pipeline.
    pub(crate) fn set_current_state(&self, state: Option<State>) {
        *self.current.write().expect("transition engine lock poisoned") = state;
    }

    fn emit_error(&self, to: Option<State>, from: Option<State>, error: RouterError) -> RouterError {
        self.errored.fetch_add(1, Ordering::Relaxed);
        let _ = self.events.emit(EventPayload::TransitionError {
            to,
            from,
            error: error.clone(),
        });
        error
    }

    /// Dispatches one navigation. Returns a cancel handle the caller may
    /// invoke before the transition commits, and a join handle resolving to
    /// the terminal outcome. Supersession is cooperative: calling `navigate`
    /// again before this one resolves marks this one for cancellation at its
    /// next phase boundary.
    pub fn navigate(
        self: &Arc<Self>,
        name: impl Into<String>,
        params: Params,
        opts: NavigateOptions,
    ) -> (CancelHandle, tokio::task::JoinHandle<Result<State, RouterError>>) {
        let name = name.into();
        let flag = Arc::new(AtomicBool::new(false));
        let handle = CancelHandle { flag: flag.clone() };
        let engine = Arc::clone(self);
        let join = tokio::spawn(async move { engine.run(name, params, opts, flag).await });
        (handle, join)
    }

    /// Checks cancellation and supersession; on either, emits
    /// `TRANSITION_CANCEL`, returns `to` Ready via `Fail`, and returns an
    /// error the caller should propagate immediately.
    fn check_point(
        &self,
        id: u64,
        flag: &Arc<AtomicBool>,
        to: &State,
        from: &Option<State>,
    ) -> Result<(), RouterError> {
        if flag.load(Ordering::Acquire) {
            self.cancelled.fetch_add(1, Ordering::Relaxed);
            let _ = self.events.emit(EventPayload::TransitionCancel {
                to: to.clone(),
                from: from.clone(),
            });
            let _ = self.fsm.dispatch(LifecycleEvent::Cancel);
            return Err(RouterError::TransitionCancelled);
        }
        if id != self.current_nav_id.load(Ordering::Acquire) {
            // A newer navigation already emitted TRANSITION_CANCEL for this
            // id when it began; this one simply stops without re-emitting.
            self.cancelled.fetch_add(1, Ordering::Relaxed);
            return Err(RouterError::TransitionCancelled);
        }
        Ok(())
    }

    #[tracing::instrument(name = "navigate", skip(self, params, opts, flag), fields(route = %name))]
    async fn run(
        self: Arc<Self>,
        name: String,
        params: Params,
        opts: NavigateOptions,
        flag: Arc<AtomicBool>,
    ) -> Result<State, RouterError> {
        // 1. Dispatch by FSM state.
        if self.fsm.is_disposed() {
            return Err(RouterError::RouterDisposed);
        }
        match self.fsm.current() {
            LifecycleState::Idle | LifecycleState::Starting => {
                return Err(RouterError::RouterNotStarted);
            }
            LifecycleState::Transitioning => {
                if let Some((_, to, from)) = self.in_flight.read().expect("engine lock poisoned").clone() {
                    let _ = self.events.emit(EventPayload::TransitionCancel { to, from });
                }
            }
            _ => {}
        }

        let from = self.current_state();

        // 2. Resolve target by name.
        let resolved_name = {
            let tree = self.route_tree.read().expect("route tree lock poisoned");
            if tree.has(&name) {
                name.clone()
            } else if self.options.allow_not_found {
                State::UNKNOWN_ROUTE.to_string()
            } else {
                let err = RouterError::route_not_found_path(name.clone());
                return Err(self.emit_error(None, from, err));
            }
        };

        // 3. Forward resolution.
        let resolved_name = if resolved_name == State::UNKNOWN_ROUTE {
            resolved_name
        } else {
            let tree = self.route_tree.read().expect("route tree lock poisoned");
            match tree.resolve_forward(&resolved_name) {
                Some(terminal) => {
                    if !tree.has(&terminal) {
                        let err = RouterError::route_not_found_path(terminal);
                        drop(tree);
                        return Err(self.emit_error(None, from, err));
                    }
                    terminal
                }
                None => resolved_name,
            }
        };

        // 4. Merge params, encode, build path.
        let (merged_params, path) = {
            let tree = self.route_tree.read().expect("route tree lock poisoned");
            let defaults = tree.get_config(&resolved_name).unwrap_or_default();
            let mut merged = crate::params::merge_params(&defaults, &params);
            if let Some(encode) = tree.config.encoders.get(&resolved_name) {
                merged = encode(&merged);
            }
            let path = if resolved_name == State::UNKNOWN_ROUTE {
                name.clone()
            } else {
                tree.codec
                    .build_path(&resolved_name, &merged)
                    .unwrap_or_else(|| format!("/{resolved_name}"))
            };
            (merged, path)
        };

        let options_snapshot = opts.snapshot();

        // 5. Same-state short-circuit.
        if let Some(current) = &from {
            if current.name() == resolved_name
                && crate::params::params_equal(current.params(), &merged_params)
                && !opts.reload
                && !opts.force
            {
                let err = RouterError::SameStates;
                return Err(self.emit_error(None, Some(current.clone()), err));
            }
        }

        // 6. skipTransition short-circuit: no guards, no middleware, no
        // commit, no events.
        if opts.skip_transition {
            let probe_id = self.nav_counter.fetch_add(1, Ordering::Relaxed) + 1;
            let state = State::new(
                resolved_name,
                merged_params,
                path,
                Meta {
                    id: probe_id,
                    params: params.clone(),
                    options: options_snapshot,
                    source: opts.source.clone(),
                },
            );
            return Ok(state);
        }

        // 7. Begin transition.
        self.fsm
            .dispatch(LifecycleEvent::Navigate)
            .map_err(|_| RouterError::invariant("navigate dispatched from an illegal lifecycle state"))?;
        let id = self.nav_counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.current_nav_id.store(id, Ordering::Release);
        let to = State::new(
            resolved_name.clone(),
            merged_params,
            path,
            Meta {
                id,
                params,
                options: options_snapshot.clone(),
                source: opts.source.clone(),
            },
        );
        *self.in_flight.write().expect("engine lock poisoned") = Some((id, to.clone(), from.clone()));
        let _ = self.events.emit(EventPayload::TransitionStart {
            to: to.clone(),
            from: from.clone(),
        });

        if let Err(e) = self.check_point(id, &flag, &to, &from) {
            return Err(e);
        }

        // 8. Segment sets.
        let deactivate_names = to_deactivate(from.as_ref().map(|s| s.name()), &resolved_name);
        let activate_names = to_activate(from.as_ref().map(|s| s.name()), &resolved_name);

        // 9. Deactivation guards, leaf-to-root.
        if !opts.force_deactivate {
            for segment in &deactivate_names {
                let resolved_guards = self
                    .guards
                    .lock()
                    .expect("guard registry lock poisoned")
                    .deactivate_guards_for(segment, &self.dependencies);
                for guard in resolved_guards {
                    let outcome = guard(to.clone(), from.clone()).await;
                    if !matches!(outcome, GuardOutcome::Allow) {
                        let err = RouterError::CannotDeactivate {
                            segment: Some(segment.clone()),
                        };
                        let _ = self.fsm.dispatch(LifecycleEvent::Fail);
                        self.in_flight.write().expect("engine lock poisoned").take();
                        return Err(self.emit_error(Some(to), from, err));
                    }
                }
                if let Err(e) = self.check_point(id, &flag, &to, &from) {
                    self.in_flight.write().expect("engine lock poisoned").take();
                    return Err(e);
                }
            }
        }

        // 10. Activation guards, root-to-leaf.
        for segment in &activate_names {
            let resolved_guards = self
                .guards
                .lock()
                .expect("guard registry lock poisoned")
                .activate_guards_for(segment, &self.dependencies);
            for guard in resolved_guards {
                let outcome = guard(to.clone(), from.clone()).await;
                match outcome {
                    GuardOutcome::Allow => {}
                    GuardOutcome::Deny => {
                        let err = RouterError::CannotActivate {
                            segment: Some(segment.clone()),
                            attempted_redirect: None,
                        };
                        let _ = self.fsm.dispatch(LifecycleEvent::Fail);
                        self.in_flight.write().expect("engine lock poisoned").take();
                        return Err(self.emit_error(Some(to), from, err));
                    }
                    GuardOutcome::AttemptedRedirect(redirect) => {
                        let err = RouterError::CannotActivate {
                            segment: Some(segment.clone()),
                            attempted_redirect: Some(Box::new(redirect)),
                        };
                        let _ = self.fsm.dispatch(LifecycleEvent::Fail);
                        self.in_flight.write().expect("engine lock poisoned").take();
                        return Err(self.emit_error(Some(to), from, err));
                    }
                }
            }
            if let Err(e) = self.check_point(id, &flag, &to, &from) {
                self.in_flight.write().expect("engine lock poisoned").take();
                return Err(e);
            }
        }

        // 11. Middleware chain.
        let middleware_outcome = {
            let chain = self.middleware.read().expect("middleware registry lock poisoned");
            chain.run_chain(&to, from.as_ref()).await
        };
        match middleware_outcome {
            MiddlewareOutcome::Continue => {}
            MiddlewareOutcome::Fail(cause) => {
                let err = RouterError::TransitionErr { cause: Some(Box::new(cause)) };
                let _ = self.fsm.dispatch(LifecycleEvent::Fail);
                self.in_flight.write().expect("engine lock poisoned").take();
                return Err(self.emit_error(Some(to), from, err));
            }
            MiddlewareOutcome::Deny(_redirect) => {
                let err = RouterError::TransitionErr { cause: None };
                let _ = self.fsm.dispatch(LifecycleEvent::Fail);
                self.in_flight.write().expect("engine lock poisoned").take();
                return Err(self.emit_error(Some(to), from, err));
            }
        }

        // 12. Supersession re-check before commit.
        if let Err(e) = self.check_point(id, &flag, &to, &from) {
            self.in_flight.write().expect("engine lock poisoned").take();
            return Err(e);
        }

        // 13. Commit.
        self.committed.fetch_add(1, Ordering::Relaxed);
        *self.current.write().expect("transition engine lock poisoned") = Some(to.clone());
        self.fsm
            .dispatch(LifecycleEvent::Complete)
            .map_err(|_| RouterError::invariant("complete dispatched from an illegal lifecycle state"))?;
        self.in_flight.write().expect("engine lock poisoned").take();
        let _ = self.events.emit(EventPayload::TransitionSuccess {
            to: to.clone(),
            from,
            options: options_snapshot,
        });

        Ok(to)
    }
}
