//! Guard registry (component G): per-route `canActivate`/`canDeactivate`
//! factories, materialized into callable guards. Grounded on the teacher's
//! `check(..) -> impl Future<Output = Result<..>> + Send` guard contract,
//! generalized from HTTP request guards to navigation guards.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::state::State;

/// Outcome of a resolved guard call. Unlike a boolean, `AttemptedRedirect`
/// keeps the state the guard tried to redirect to so it can be attached to
/// the resulting error — guards cannot redirect, by design, to eliminate
/// cycles.
#[derive(Debug, Clone)]
pub enum GuardOutcome {
    Allow,
    Deny,
    AttemptedRedirect(State),
}

/// A materialized, callable guard: `(toState, fromState) -> outcome`.
pub type ResolvedGuard =
    Arc<dyn Fn(State, Option<State>) -> Pin<Box<dyn Future<Output = GuardOutcome> + Send>> + Send + Sync>;

/// A guard factory: runs once per route to yield a [`ResolvedGuard`]. The
/// factory receives a dependency accessor so it can close over shared
/// services; the router handle itself is threaded in by the caller at
/// materialization time (kept out of this crate's own dependency on
/// `Router` to avoid a cycle between `guards` and `router`).
pub type GuardFactory = Arc<dyn Fn(&crate::dependencies::DependencyBag) -> ResolvedGuard + Send + Sync>;

/// Where a per-route guard came from. Definition-sourced guards are cleared
/// by `replace`/`remove`/`clear`; external guards (added through the
/// lifecycle API) survive `replace`, and are only cleared by `clear`.
#[derive(Clone)]
pub struct GuardSource(pub GuardFactory);

impl GuardSource {
    pub fn new(factory: GuardFactory) -> Self {
        GuardSource(factory)
    }
}

#[derive(Default, Clone)]
struct PerRouteGuards {
    external: Vec<GuardFactory>,
    definition: Option<GuardFactory>,
}

/// Ordering rule (resolves the spec's stated open question): **external
/// guards run before definition-sourced guards** for the same route, in
/// registration order among externals. Chosen for determinism; documented
/// in DESIGN.md.
#[derive(Default)]
pub struct GuardRegistry {
    activate: HashMap<String, PerRouteGuards>,
    deactivate: HashMap<String, PerRouteGuards>,
    materialized_activate: HashMap<String, Vec<ResolvedGuard>>,
    materialized_deactivate: HashMap<String, Vec<ResolvedGuard>>,
}

impl GuardRegistry {
    pub fn new() -> Self {
        GuardRegistry::default()
    }

    pub fn set_definition_activate(&mut self, name: &str, source: GuardSource) {
        self.activate.entry(name.to_string()).or_default().definition = Some(source.0);
        self.materialized_activate.remove(name);
    }

    pub fn set_definition_deactivate(&mut self, name: &str, source: GuardSource) {
        self.deactivate.entry(name.to_string()).or_default().definition = Some(source.0);
        self.materialized_deactivate.remove(name);
    }

    pub fn add_external_activate(&mut self, name: &str, factory: GuardFactory) {
        self.activate.entry(name.to_string()).or_default().external.push(factory);
        self.materialized_activate.remove(name);
    }

    pub fn add_external_deactivate(&mut self, name: &str, factory: GuardFactory) {
        self.deactivate.entry(name.to_string()).or_default().external.push(factory);
        self.materialized_deactivate.remove(name);
    }

    pub fn clear_definition_sourced(&mut self, name: &str) {
        if let Some(g) = self.activate.get_mut(name) {
            g.definition = None;
        }
        if let Some(g) = self.deactivate.get_mut(name) {
            g.definition = None;
        }
        self.materialized_activate.remove(name);
        self.materialized_deactivate.remove(name);
    }

    /// The definition-sourced `canActivate`/`canDeactivate` factories for
    /// `name`, if any — used by `routesApi.get(name)` to reconstruct a
    /// route's definition view (external guards are not part of it).
    pub fn definition_activate(&self, name: &str) -> Option<GuardFactory> {
        self.activate.get(name).and_then(|g| g.definition.clone())
    }

    pub fn definition_deactivate(&self, name: &str) -> Option<GuardFactory> {
        self.deactivate.get(name).and_then(|g| g.definition.clone())
    }

    /// `update(name, { canActivate: null })`: clears only the
    /// definition-sourced activation guard, leaving externals untouched.
    pub fn clear_definition_activate(&mut self, name: &str) {
        if let Some(g) = self.activate.get_mut(name) {
            g.definition = None;
        }
        self.materialized_activate.remove(name);
    }

    pub fn clear_definition_deactivate(&mut self, name: &str) {
        if let Some(g) = self.deactivate.get_mut(name) {
            g.definition = None;
        }
        self.materialized_deactivate.remove(name);
    }

    /// Called by `replace`: clears every route's definition-sourced guard,
    /// preserving externals.
    pub fn clear_all_definition_sourced(&mut self) {
        for g in self.activate.values_mut() {
            g.definition = None;
        }
        for g in self.deactivate.values_mut() {
            g.definition = None;
        }
        self.materialized_activate.clear();
        self.materialized_deactivate.clear();
    }

    /// Called by `clear()`: removes both sources entirely.
    pub fn clear_all(&mut self) {
        self.activate.clear();
        self.deactivate.clear();
        self.materialized_activate.clear();
        self.materialized_deactivate.clear();
    }

    /// Deep-copies every registered guard source (both external and
    /// definition-sourced) for `Router::fork`. Materialized caches are
    /// intentionally dropped rather than copied: they hold guards already
    /// bound to this registry's old `DependencyBag`, which the fork may
    /// replace.
    pub fn deep_clone_sources(&self) -> Self {
        GuardRegistry {
            activate: self.activate.clone(),
            deactivate: self.deactivate.clone(),
            materialized_activate: HashMap::new(),
            materialized_deactivate: HashMap::new(),
        }
    }

    fn materialize(
        guards: &PerRouteGuards,
        deps: &crate::dependencies::DependencyBag,
    ) -> Vec<ResolvedGuard> {
        let mut resolved = Vec::new();
        for factory in &guards.external {
            resolved.push(factory(deps));
        }
        if let Some(factory) = &guards.definition {
            resolved.push(factory(deps));
        }
        resolved
    }

    pub fn activate_guards_for(
        &mut self,
        name: &str,
        deps: &crate::dependencies::DependencyBag,
    ) -> Vec<ResolvedGuard> {
        if let Some(cached) = self.materialized_activate.get(name) {
            return cached.clone();
        }
        let resolved = match self.activate.get(name) {
            Some(g) => Self::materialize(g, deps),
            None => Vec::new(),
        };
        self.materialized_activate.insert(name.to_string(), resolved.clone());
        resolved
    }

    pub fn deactivate_guards_for(
        &mut self,
        name: &str,
        deps: &crate::dependencies::DependencyBag,
    ) -> Vec<ResolvedGuard> {
        if let Some(cached) = self.materialized_deactivate.get(name) {
            return cached.clone();
        }
        let resolved = match self.deactivate.get(name) {
            Some(g) => Self::materialize(g, deps),
            None => Vec::new(),
        };
        self.materialized_deactivate.insert(name.to_string(), resolved.clone());
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependencies::DependencyBag;

    fn always_allow() -> GuardFactory {
        Arc::new(|_deps| {
            Arc::new(|_to, _from| {
                Box::pin(async { GuardOutcome::Allow }) as Pin<Box<dyn Future<Output = GuardOutcome> + Send>>
            })
        })
    }

    fn always_deny() -> GuardFactory {
        Arc::new(|_deps| {
            Arc::new(|_to, _from| {
                Box::pin(async { GuardOutcome::Deny }) as Pin<Box<dyn Future<Output = GuardOutcome> + Send>>
            })
        })
    }

    #[tokio::test]
    async fn external_runs_before_definition_sourced() {
        let mut registry = GuardRegistry::new();
        registry.add_external_activate("home", always_allow());
        registry.set_definition_activate("home", GuardSource::new(always_deny()));
        let deps = DependencyBag::new();
        let resolved = registry.activate_guards_for("home", &deps);
        assert_eq!(resolved.len(), 2);
    }

    #[tokio::test]
    async fn replace_preserves_external_guard() {
        let mut registry = GuardRegistry::new();
        registry.add_external_deactivate("sticky", always_deny());
        registry.set_definition_deactivate("sticky", GuardSource::new(always_allow()));
        registry.clear_all_definition_sourced();
        let deps = DependencyBag::new();
        let resolved = registry.deactivate_guards_for("sticky", &deps);
        assert_eq!(resolved.len(), 1);
        let outcome = (resolved[0])(
            State::new("x", Default::default(), "/x", crate::state::Meta {
                id: 1,
                params: Default::default(),
                options: Default::default(),
                source: None,
            }),
            None,
        )
        .await;
        assert!(matches!(outcome, GuardOutcome::Deny));
    }

    #[test]
    fn clear_removes_external_too() {
        let mut registry = GuardRegistry::new();
        registry.add_external_activate("home", always_allow());
        registry.clear_all();
        assert!(registry.activate.get("home").is_none());
    }

    #[tokio::test]
    async fn deep_clone_sources_carries_over_both_guard_kinds() {
        let mut registry = GuardRegistry::new();
        registry.add_external_activate("home", always_allow());
        registry.set_definition_deactivate("home", GuardSource::new(always_deny()));
        let clone = registry.deep_clone_sources();
        let deps = DependencyBag::new();
        assert_eq!(clone.activate.get("home").map(|g| g.external.len()), Some(1));
        let resolved = clone.deactivate_guards_for("home", &deps);
        assert_eq!(resolved.len(), 1);
    }
}
