//! Public API facets (component L): the router aggregates every subsystem
//! built so far and projects them through narrow, liveness-checked handles,
//! mirroring the teacher's `AppBuilder`/bean-context aggregation of owned
//! subsystems behind named accessors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::dependencies::DependencyBag;
use crate::error::RouterError;
use crate::events::{
    EventBus, EventKind, EventPayload, EventSubscription, Listener, ObserveOptions, RouteChangeListener, StateObserver,
};
use crate::guards::{GuardFactory, GuardRegistry};
use crate::lifecycle::{Fsm, LifecycleEvent, LifecycleState};
use crate::middleware::{MiddlewareFactory, MiddlewareRegistry};
use crate::options::RouterOptions;
use crate::params::Params;
use crate::plugin::{PluginFactory, PluginRegistry};
use crate::route_tree::{RouteDef, RoutePatch, RouteTree};
use crate::state::State;
use crate::transition::{CancelHandle, NavigateOptions, TransitionCounts, TransitionEngine};

/// Point-in-time health/activity snapshot, not part of any hot path.
#[derive(Debug, Clone)]
pub struct RouterMetrics {
    pub transitions_committed: u64,
    pub transitions_cancelled: u64,
    pub transitions_errored: u64,
    pub route_count: usize,
    pub plugin_count: usize,
    pub middleware_count: usize,
    pub listener_counts: HashMap<&'static str, usize>,
}

struct RouterInner {
    route_tree: Arc<RwLock<RouteTree>>,
    guards: Arc<Mutex<GuardRegistry>>,
    middleware: Arc<RwLock<MiddlewareRegistry>>,
    plugins: Arc<Mutex<PluginRegistry>>,
    dependencies: Arc<DependencyBag>,
    events: Arc<EventBus>,
    fsm: Arc<Fsm>,
    options: Arc<RouterOptions>,
    engine: Arc<TransitionEngine>,
}

impl RouterInner {
    fn check_live(&self) -> Result<(), RouterError> {
        if self.fsm.is_disposed() {
            Err(RouterError::RouterDisposed)
        } else {
            Ok(())
        }
    }
}

/// The router handle. Cloning a `Router` clones the `Arc`, not the router —
/// use [`Router::fork`] to derive an independent instance per spec.md §4.L.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

fn kind_label(kind: EventKind) -> &'static str {
    match kind {
        EventKind::RouterStart => "ROUTER_START",
        EventKind::RouterStop => "ROUTER_STOP",
        EventKind::TransitionStart => "TRANSITION_START",
        EventKind::TransitionSuccess => "TRANSITION_SUCCESS",
        EventKind::TransitionError => "TRANSITION_ERROR",
        EventKind::TransitionCancel => "TRANSITION_CANCEL",
    }
}

/// `createRouter(routes, options?, dependencies?)`.
pub fn create_router(
    routes: Vec<RouteDef>,
    options: RouterOptions,
    dependencies: HashMap<String, serde_json::Value>,
) -> Result<Router, RouterError> {
    let mut tree = RouteTree::new();
    let mut guards = GuardRegistry::new();
    tree.add(routes, None, &mut guards)?;

    let deps = DependencyBag::new();
    deps.set_all(dependencies)?;

    let events = Arc::new(EventBus::new());
    let fsm = Arc::new(Fsm::new());
    let options = Arc::new(options);
    let route_tree = Arc::new(RwLock::new(tree));
    let guards = Arc::new(Mutex::new(guards));
    let middleware = Arc::new(RwLock::new(MiddlewareRegistry::new()));
    let dependencies = Arc::new(deps);

    let engine = Arc::new(TransitionEngine::new(
        route_tree.clone(),
        guards.clone(),
        middleware.clone(),
        dependencies.clone(),
        events.clone(),
        fsm.clone(),
        options.clone(),
    ));

    Ok(Router {
        inner: Arc::new(RouterInner {
            route_tree,
            guards,
            middleware,
            plugins: Arc::new(Mutex::new(PluginRegistry::new())),
            dependencies,
            events,
            fsm,
            options,
            engine,
        }),
    })
}

impl Router {
    pub fn is_started(&self) -> bool {
        matches!(
            self.inner.fsm.current(),
            LifecycleState::Ready | LifecycleState::Transitioning
        )
    }

    pub fn is_active(&self) -> bool {
        self.inner.fsm.current() == LifecycleState::Transitioning
    }

    pub fn get_state(&self) -> Option<State> {
        self.inner.engine.current_state()
    }

    pub fn options(&self) -> Arc<RouterOptions> {
        self.inner.options.clone()
    }

    pub fn metrics(&self) -> RouterMetrics {
        let TransitionCounts {
            committed,
            cancelled,
            errored,
        } = self.inner.engine.transition_counts();
        let mut listener_counts = HashMap::new();
        for kind in [
            EventKind::RouterStart,
            EventKind::RouterStop,
            EventKind::TransitionStart,
            EventKind::TransitionSuccess,
            EventKind::TransitionError,
            EventKind::TransitionCancel,
        ] {
            listener_counts.insert(kind_label(kind), self.inner.events.listener_count(kind));
        }
        RouterMetrics {
            transitions_committed: committed,
            transitions_cancelled: cancelled,
            transitions_errored: errored,
            route_count: self.inner.route_tree.read().expect("route tree lock poisoned").route_names().count(),
            plugin_count: self.inner.plugins.lock().expect("plugin registry lock poisoned").len(),
            middleware_count: self.inner.middleware.read().expect("middleware registry lock poisoned").len(),
            listener_counts,
        }
    }

    /// `start(initialPath?)`: IDLE → STARTING, navigate to the initial path
    /// or the configured default route, then STARTING → READY on success
    /// (the transition engine's own `Navigate`/`Complete` dispatch carries
    /// that second half; failure leaves the FSM back in IDLE).
    pub async fn start(&self, initial: Option<(&str, Params)>) -> Result<State, RouterError> {
        if self.inner.fsm.current() != LifecycleState::Idle {
            return Err(RouterError::RouterAlreadyStarted);
        }
        self.inner.fsm.dispatch(LifecycleEvent::Start)?;

        let (name, params) = match initial {
            Some((name, params)) => (name.to_string(), params),
            None => match self.inner.options.default_route() {
                Some(name) => (name, self.inner.options.default_params()),
                None => {
                    let _ = self.inner.fsm.dispatch(LifecycleEvent::Fail);
                    return Err(RouterError::invalid("router.start", "no initial path and no defaultRoute configured"));
                }
            },
        };

        self.inner.fsm.dispatch(LifecycleEvent::Started)?;
        self.inner.plugins.lock().expect("plugin registry lock poisoned").mark_started();
        let _ = self.inner.events.emit(EventPayload::RouterStart);
        self.inner.plugins.lock().expect("plugin registry lock poisoned").fire_on_start();

        let (_cancel, join) = self.inner.engine.navigate(name, params, NavigateOptions::default());
        match join.await.expect("navigation task panicked") {
            Ok(state) => Ok(state),
            Err(err) => {
                let _ = self.inner.fsm.dispatch(LifecycleEvent::Stop);
                Err(err)
            }
        }
    }

    /// `stop()`: READY/TRANSITIONING → IDLE.
    pub fn stop(&self) -> Result<(), RouterError> {
        match self.inner.fsm.current() {
            LifecycleState::Ready | LifecycleState::Transitioning => {
                self.inner.fsm.dispatch(LifecycleEvent::Stop)?;
                self.inner.engine.set_current_state(None);
                self.inner.plugins.lock().expect("plugin registry lock poisoned").fire_on_stop();
                let _ = self.inner.events.emit(EventPayload::RouterStop);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// `dispose()`: terminal. Clears registries and rejects all subsequent
    /// mutating operations.
    pub fn dispose(&self) -> Result<(), RouterError> {
        self.inner.fsm.dispatch(LifecycleEvent::Dispose)?;
        self.inner.dependencies.dispose();
        Ok(())
    }

    pub fn navigate(
        &self,
        name: impl Into<String>,
        params: Params,
        opts: NavigateOptions,
    ) -> (CancelHandle, tokio::task::JoinHandle<Result<State, RouterError>>) {
        self.inner.engine.navigate(name, params, opts)
    }

    pub fn routes(&self) -> RoutesFacet {
        RoutesFacet { inner: self.inner.clone() }
    }

    pub fn lifecycle(&self) -> LifecycleFacet {
        LifecycleFacet { inner: self.inner.clone() }
    }

    pub fn dependencies(&self) -> DependenciesFacet {
        DependenciesFacet { inner: self.inner.clone() }
    }

    pub fn plugin(&self) -> PluginFacet {
        PluginFacet { inner: self.inner.clone() }
    }

    /// `clone(newDependencies?)`: deep-copies the route tree, config store,
    /// and guard registries; re-initializes plugin/middleware factories by
    /// reference; never shares current state, subscribers, or FSM.
    pub fn fork(&self, new_dependencies: Option<HashMap<String, serde_json::Value>>) -> Result<Router, RouterError> {
        self.inner.check_live()?;

        let tree = self.inner.route_tree.read().expect("route tree lock poisoned").clone();
        let guards = self.inner.guards.lock().expect("guard registry lock poisoned").deep_clone_sources();

        let deps = DependencyBag::new();
        deps.set_all(new_dependencies.unwrap_or_else(|| self.inner.dependencies.get_all()))?;

        let events = Arc::new(EventBus::new());
        let fsm = Arc::new(Fsm::new());
        let options = self.inner.options.clone();
        let route_tree = Arc::new(RwLock::new(tree));
        let guards = Arc::new(Mutex::new(guards));
        let middleware = Arc::new(RwLock::new(MiddlewareRegistry::new()));
        let dependencies = Arc::new(deps);

        let engine = Arc::new(TransitionEngine::new(
            route_tree.clone(),
            guards.clone(),
            middleware.clone(),
            dependencies.clone(),
            events.clone(),
            fsm.clone(),
            options.clone(),
        ));

        Ok(Router {
            inner: Arc::new(RouterInner {
                route_tree,
                guards,
                middleware,
                plugins: Arc::new(Mutex::new(PluginRegistry::new())),
                dependencies,
                events,
                fsm,
                options,
                engine,
            }),
        })
    }
}

/// `routes` facet: add/remove/update/replace/clear/has/get/getConfig.
pub struct RoutesFacet {
    inner: Arc<RouterInner>,
}

impl RoutesFacet {
    pub fn add(&self, defs: Vec<RouteDef>, parent: Option<&str>) -> Result<(), RouterError> {
        self.inner.check_live()?;
        let mut tree = self.inner.route_tree.write().expect("route tree lock poisoned");
        let mut guards = self.inner.guards.lock().expect("guard registry lock poisoned");
        tree.add(defs, parent, &mut guards)
    }

    pub fn remove(&self, name: &str) -> Result<(), RouterError> {
        self.inner.check_live()?;
        let mut tree = self.inner.route_tree.write().expect("route tree lock poisoned");
        let mut guards = self.inner.guards.lock().expect("guard registry lock poisoned");
        tree.remove(name, &mut guards);
        Ok(())
    }

    pub fn replace(&self, defs: Vec<RouteDef>) -> Result<(), RouterError> {
        self.inner.check_live()?;
        let mut tree = self.inner.route_tree.write().expect("route tree lock poisoned");
        let mut guards = self.inner.guards.lock().expect("guard registry lock poisoned");
        tree.replace(defs, &mut guards)
    }

    pub fn clear(&self) -> Result<(), RouterError> {
        self.inner.check_live()?;
        let mut tree = self.inner.route_tree.write().expect("route tree lock poisoned");
        let mut guards = self.inner.guards.lock().expect("guard registry lock poisoned");
        tree.clear(&mut guards);
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.route_tree.read().expect("route tree lock poisoned").has(name)
    }

    pub fn get_config(&self, name: &str) -> Option<Params> {
        self.inner.route_tree.read().expect("route tree lock poisoned").get_config(name)
    }

    pub fn build_path(&self, name: &str, params: &Params) -> Option<String> {
        self.inner.route_tree.read().expect("route tree lock poisoned").codec.build_path(name, params)
    }

    pub fn match_path(&self, path: &str) -> Option<(String, Params)> {
        let tree = self.inner.route_tree.read().expect("route tree lock poisoned");
        tree.codec.match_path(path, &self.inner.options)
    }

    /// `update(name, patch)`: patches any subset of default params, forward
    /// target, codecs, or definition-sourced guards. See
    /// [`crate::route_tree::RouteTree::update`] for the exact semantics.
    pub fn update(&self, name: &str, patch: RoutePatch) -> Result<(), RouterError> {
        self.inner.check_live()?;
        let mut tree = self.inner.route_tree.write().expect("route tree lock poisoned");
        let mut guards = self.inner.guards.lock().expect("guard registry lock poisoned");
        tree.update(name, patch, &mut guards)
    }

    /// `get(name) -> routeDef`: reconstructs the route's definition view —
    /// default params, forward target, codecs, and definition-sourced guards.
    /// External guards are not part of a route's definition and are omitted.
    pub fn get(&self, name: &str) -> Option<RouteDef> {
        let tree = self.inner.route_tree.read().expect("route tree lock poisoned");
        let record = tree.get(name)?;
        let guards = self.inner.guards.lock().expect("guard registry lock poisoned");
        let mut def = RouteDef::new(record.name.clone(), record.path.clone());
        if let Some(params) = tree.get_config(name) {
            def.default_params = params;
        }
        if let Some(target) = tree.config.forward_map.get(name) {
            def.forward_to = Some(target.clone());
        }
        if let Some(decode) = tree.config.decoders.get(name) {
            def.decode_params = Some(decode.clone());
        }
        if let Some(encode) = tree.config.encoders.get(name) {
            def.encode_params = Some(encode.clone());
        }
        if let Some(factory) = guards.definition_activate(name) {
            def.can_activate = Some(crate::guards::GuardSource::new(factory));
        }
        if let Some(factory) = guards.definition_deactivate(name) {
            def.can_deactivate = Some(crate::guards::GuardSource::new(factory));
        }
        Some(def)
    }
}

/// `lifecycle` facet: external guard registration.
pub struct LifecycleFacet {
    inner: Arc<RouterInner>,
}

impl LifecycleFacet {
    pub fn add_activate_guard(&self, name: &str, factory: GuardFactory) -> Result<(), RouterError> {
        self.inner.check_live()?;
        self.inner.guards.lock().expect("guard registry lock poisoned").add_external_activate(name, factory);
        Ok(())
    }

    pub fn add_deactivate_guard(&self, name: &str, factory: GuardFactory) -> Result<(), RouterError> {
        self.inner.check_live()?;
        self.inner.guards.lock().expect("guard registry lock poisoned").add_external_deactivate(name, factory);
        Ok(())
    }
}

/// `dependencies` facet: thin forwarding to [`DependencyBag`].
pub struct DependenciesFacet {
    inner: Arc<RouterInner>,
}

impl DependenciesFacet {
    pub fn set(&self, key: &str, value: Option<serde_json::Value>) -> Result<(), RouterError> {
        self.inner.dependencies.set(key, value)
    }

    pub fn set_all(&self, entries: HashMap<String, serde_json::Value>) -> Result<(), RouterError> {
        self.inner.dependencies.set_all(entries)
    }

    pub fn get(&self, key: &str) -> Result<serde_json::Value, RouterError> {
        self.inner.dependencies.get(key)
    }

    pub fn get_all(&self) -> HashMap<String, serde_json::Value> {
        self.inner.dependencies.get_all()
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.dependencies.has(key)
    }

    pub fn remove(&self, key: &str) -> Result<(), RouterError> {
        self.inner.dependencies.remove(key)
    }

    pub fn reset(&self) -> Result<(), RouterError> {
        self.inner.dependencies.reset()
    }
}

/// `plugin` facet: plugin/middleware registration, event subscription, and
/// the non-committing `buildNavigationState` helper used by scenario 6.
pub struct PluginFacet {
    inner: Arc<RouterInner>,
}

impl PluginFacet {
    pub fn use_plugin(&self, factories: Vec<PluginFactory>) -> Result<Vec<*const ()>, RouterError> {
        self.inner.check_live()?;
        self.inner.plugins.lock().expect("plugin registry lock poisoned").use_plugin(factories, &self.inner.events)
    }

    pub fn remove_plugins(&self, ptrs: &[*const ()]) {
        self.inner.plugins.lock().expect("plugin registry lock poisoned").unsubscribe_batch(ptrs, &self.inner.events);
    }

    pub fn use_middleware(&self, factories: Vec<MiddlewareFactory>) -> Result<Vec<*const ()>, RouterError> {
        self.inner.check_live()?;
        self.inner.middleware.write().expect("middleware registry lock poisoned").register(factories)
    }

    pub fn remove_middleware(&self, ptrs: &[*const ()]) {
        self.inner.middleware.write().expect("middleware registry lock poisoned").unregister_batch(ptrs);
    }

    pub fn add_event_listener(&self, kind: EventKind, listener: Listener) -> Result<EventSubscription, RouterError> {
        self.inner.check_live()?;
        let id = self.inner.events.subscribe(kind, listener)?;
        Ok(EventSubscription::new(self.inner.events.clone(), kind, id))
    }

    /// `subscribe(fn)`: TRANSITION_SUCCESS convenience delivering
    /// `{route, previousRoute}`.
    pub fn subscribe(&self, listener: RouteChangeListener) -> Result<EventSubscription, RouterError> {
        self.inner.check_live()?;
        self.inner.events.subscribe_route_change(self.inner.events.clone(), listener)
    }

    /// Observable-shaped adapter: `subscribe(observer, {signal?, replay?=true})`.
    /// Replays the current state asynchronously unless `opts.replay` is false
    /// or there is no current state yet.
    pub fn subscribe_observable(&self, observer: StateObserver, opts: ObserveOptions) -> Result<EventSubscription, RouterError> {
        self.inner.check_live()?;
        let current = self.inner.engine.current_state();
        self.inner.events.subscribe_observable(self.inner.events.clone(), observer, current, opts)
    }

    pub fn get_options(&self) -> Arc<RouterOptions> {
        self.inner.options.clone()
    }

    pub fn match_path(&self, path: &str) -> Option<(String, Params)> {
        self.inner.route_tree.read().expect("route tree lock poisoned").codec.match_path(path, &self.inner.options)
    }

    /// `makeState`: constructs a state for `name`/`params` as-is, with no
    /// forward resolution and no default-param merge — the raw building
    /// block guards use to produce an `attemptedRedirect` target.
    pub fn make_state(&self, name: &str, params: Params, source: Option<String>) -> Result<State, RouterError> {
        let tree = self.inner.route_tree.read().expect("route tree lock poisoned");
        if !tree.has(name) {
            return Err(RouterError::route_not_found_path(name.to_string()));
        }
        let path = tree.codec.build_path(name, &params).unwrap_or_else(|| format!("/{name}"));
        Ok(State::new(
            name.to_string(),
            params.clone(),
            path,
            crate::state::Meta {
                id: 0,
                params,
                options: Default::default(),
                source,
            },
        ))
    }

    /// `forwardState`: resolves `state`'s name through the forward map and
    /// rebuilds the terminal state, preserving the caller's params.
    pub fn forward_state(&self, state: &State) -> State {
        let tree = self.inner.route_tree.read().expect("route tree lock poisoned");
        match tree.resolve_forward(state.name()) {
            Some(terminal) if tree.has(&terminal) => {
                let path = tree.codec.build_path(&terminal, state.params()).unwrap_or_else(|| format!("/{terminal}"));
                State::new(terminal, state.params().clone(), path, state.meta().clone())
            }
            _ => state.clone(),
        }
    }

    /// `buildNavigationState`: builds the state a navigation to `name` with
    /// `params` would produce, without running guards/middleware or
    /// mutating current state — the pure half of the transition engine's
    /// steps 2-4, reused for scenario-6-style previews.
    pub fn build_navigation_state(&self, name: &str, params: Params) -> Result<State, RouterError> {
        let tree = self.inner.route_tree.read().expect("route tree lock poisoned");
        if !tree.has(name) {
            return Err(RouterError::route_not_found_path(name.to_string()));
        }
        let resolved = tree.resolve_forward(name).unwrap_or_else(|| name.to_string());
        let defaults = tree.get_config(&resolved).unwrap_or_default();
        let mut merged = crate::params::merge_params(&defaults, &params);
        if let Some(encode) = tree.config.encoders.get(&resolved) {
            merged = encode(&merged);
        }
        let path = tree.codec.build_path(&resolved, &merged).unwrap_or_else(|| format!("/{resolved}"));
        Ok(State::new(
            resolved,
            merged,
            path,
            crate::state::Meta {
                id: 0,
                params,
                options: Default::default(),
                source: None,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route_tree::RouteDef;

    #[tokio::test]
    async fn start_navigates_to_initial_path_and_reaches_ready() {
        let router = create_router(vec![RouteDef::new("home", "/home")], RouterOptions::default(), HashMap::new()).unwrap();
        let state = router.start(Some(("home", Params::new()))).await.unwrap();
        assert_eq!(state.name(), "home");
        assert!(router.is_started());
    }

    #[tokio::test]
    async fn dispose_rejects_subsequent_route_mutations() {
        let router = create_router(vec![RouteDef::new("home", "/home")], RouterOptions::default(), HashMap::new()).unwrap();
        router.dispose().unwrap();
        let err = router.routes().add(vec![RouteDef::new("other", "/other")], None);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn fork_diverges_from_the_original() {
        let router = create_router(vec![RouteDef::new("home", "/home")], RouterOptions::default(), HashMap::new()).unwrap();
        let clone = router.fork(None).unwrap();
        clone.routes().add(vec![RouteDef::new("extra", "/extra")], None).unwrap();
        assert!(clone.routes().has("extra"));
        assert!(!router.routes().has("extra"));
    }

    #[tokio::test]
    async fn fork_preserves_forward_edges_and_external_guards() {
        let router = create_router(
            vec![RouteDef::new("old", "/old").with_forward_to("new"), RouteDef::new("new", "/new")],
            RouterOptions::default(),
            HashMap::new(),
        )
        .unwrap();
        router
            .lifecycle()
            .add_activate_guard(
                "new",
                std::sync::Arc::new(|_deps| {
                    std::sync::Arc::new(|_to, _from| {
                        Box::pin(async { crate::guards::GuardOutcome::Deny })
                            as std::pin::Pin<Box<dyn std::future::Future<Output = crate::guards::GuardOutcome> + Send>>
                    })
                }),
            )
            .unwrap();

        let clone = router.fork(None).unwrap();
        let state = clone.start(Some(("old", Params::new()))).await;
        assert!(state.is_err(), "forked router should still resolve old -> new and then deny activation");
    }

    #[tokio::test]
    async fn routes_facet_update_and_get_round_trip() {
        let router = create_router(vec![RouteDef::new("home", "/home")], RouterOptions::default(), HashMap::new()).unwrap();
        let mut params = Params::new();
        params.insert("tab".into(), "b".into());
        router
            .routes()
            .update(
                "home",
                RoutePatch {
                    default_params: Some(params.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        let def = router.routes().get("home").unwrap();
        assert_eq!(def.default_params, params);
    }

    #[tokio::test]
    async fn build_navigation_state_does_not_touch_current_state() {
        let router = create_router(
            vec![RouteDef::new("home", "/home"), RouteDef::new("users", "/users/:id")],
            RouterOptions::default(),
            HashMap::new(),
        )
        .unwrap();
        router.start(Some(("home", Params::new()))).await.unwrap();
        let mut params = Params::new();
        params.insert("id".into(), "5".into());
        let preview = router.plugin().build_navigation_state("users", params).unwrap();
        assert_eq!(preview.path(), "/users/5");
        assert_eq!(router.get_state().unwrap().name(), "home");
    }
}
