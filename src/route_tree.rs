//! Route tree (component B): a named hierarchical registry with dot-notation
//! names, forward-chain resolution, and transactional mutation. Owns a
//! [`ConfigStore`] and a [`PathCodec`] so that tree, side-tables, and path
//! patterns stay atomically in sync.

use std::collections::{HashMap, HashSet};

use crate::codec::PathCodec;
use crate::config_store::{ConfigStore, DecodeParamsFn, EncodeParamsFn, ForwardTarget};
use crate::error::RouterError;
use crate::guards::{GuardFactory, GuardRegistry, GuardSource};
use crate::params::Params;

const MAX_NAME_LEN: usize = 10_000;

fn is_system_name(name: &str) -> bool {
    name.starts_with("@@")
}

fn validate_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validate a fully-qualified route name against the grammar in spec.md §6.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("route name must not be empty".to_string());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("route name exceeds max length of {MAX_NAME_LEN}"));
    }
    if is_system_name(name) {
        if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
            return Err(format!("route name '{name}' has malformed dot segments"));
        }
        return Ok(());
    }
    if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
        return Err(format!("route name '{name}' has malformed dot segments"));
    }
    for segment in name.split('.') {
        if !validate_segment(segment) {
            return Err(format!("route name '{name}' has invalid segment '{segment}'"));
        }
    }
    Ok(())
}

fn parent_name(name: &str) -> Option<&str> {
    name.rfind('.').map(|idx| &name[..idx])
}

/// Input shape for registering a route. Unrecognized properties have no
/// representation here at all — there is no dynamic-property bag to drop
/// them from, since the struct only has named fields.
#[derive(Clone)]
pub struct RouteDef {
    pub name: String,
    pub path: String,
    pub children: Vec<RouteDef>,
    pub can_activate: Option<GuardSource>,
    pub can_deactivate: Option<GuardSource>,
    pub decode_params: Option<crate::config_store::DecodeParamsFn>,
    pub encode_params: Option<crate::config_store::EncodeParamsFn>,
    pub default_params: Params,
    pub forward_to: Option<ForwardTarget>,
}

impl RouteDef {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        RouteDef {
            name: name.into(),
            path: path.into(),
            children: Vec::new(),
            can_activate: None,
            can_deactivate: None,
            decode_params: None,
            encode_params: None,
            default_params: Params::new(),
            forward_to: None,
        }
    }

    pub fn with_children(mut self, children: Vec<RouteDef>) -> Self {
        self.children = children;
        self
    }

    pub fn with_forward_to(mut self, target: impl Into<String>) -> Self {
        self.forward_to = Some(ForwardTarget::Name(target.into()));
        self
    }

    /// Flatten this definition and its children into fully-qualified entries,
    /// `parent.` prefixing every nested name.
    fn flatten(self, prefix: Option<&str>, out: &mut Vec<RouteDef>) {
        let full_name = match prefix {
            Some(p) => format!("{p}.{}", self.name),
            None => self.name.clone(),
        };
        let children = self.children;
        let mut flat = self.clone_shallow();
        flat.name = full_name.clone();
        out.push(flat);
        for child in children {
            child.flatten(Some(&full_name), out);
        }
    }

    fn clone_shallow(&self) -> RouteDef {
        RouteDef {
            name: self.name.clone(),
            path: self.path.clone(),
            children: Vec::new(),
            can_activate: self.can_activate.clone(),
            can_deactivate: self.can_deactivate.clone(),
            decode_params: self.decode_params.clone(),
            encode_params: self.encode_params.clone(),
            default_params: self.default_params.clone(),
            forward_to: self.forward_to.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteRecord {
    pub name: String,
    pub path: String,
}

/// `update(name, patch)`'s patch shape: `None` means "leave this field
/// untouched"; for the guard/forward fields, `Some(None)` means "clear it"
/// (the `update(name, { canActivate: null })` semantics from spec.md §4.B).
#[derive(Default)]
pub struct RoutePatch {
    pub default_params: Option<Params>,
    pub forward_to: Option<Option<ForwardTarget>>,
    pub decode_params: Option<Option<DecodeParamsFn>>,
    pub encode_params: Option<Option<EncodeParamsFn>>,
    pub can_activate: Option<Option<GuardFactory>>,
    pub can_deactivate: Option<Option<GuardFactory>>,
}

#[derive(Clone)]
pub struct RouteTree {
    routes: HashMap<String, RouteRecord>,
    paths: HashSet<String>,
    pub config: ConfigStore,
    pub codec: PathCodec,
}

impl Default for RouteTree {
    fn default() -> Self {
        RouteTree::new()
    }
}

impl RouteTree {
    pub fn new() -> Self {
        RouteTree {
            routes: HashMap::new(),
            paths: HashSet::new(),
            config: ConfigStore::new(),
            codec: PathCodec::new(),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&RouteRecord> {
        self.routes.get(name)
    }

    pub fn get_config(&self, name: &str) -> Option<Params> {
        self.config.default_params.get(name).cloned()
    }

    fn flatten_batch(defs: Vec<RouteDef>) -> Vec<RouteDef> {
        let mut out = Vec::new();
        for def in defs {
            def.flatten(None, &mut out);
        }
        out
    }

    /// `add(route | routes[], { parent })`: validate everything, then commit
    /// atomically. Failure at any step leaves the tree unchanged.
    pub fn add(
        &mut self,
        defs: Vec<RouteDef>,
        parent: Option<&str>,
        guards: &mut GuardRegistry,
    ) -> Result<(), RouterError> {
        let prefixed = match parent {
            Some(p) => defs
                .into_iter()
                .map(|d| {
                    let mut d = d;
                    d.name = format!("{p}.{}", d.name);
                    d
                })
                .collect(),
            None => defs,
        };
        let flat = Self::flatten_batch(prefixed);

        // 1. Shape/name/path validation, no duplicates within batch or vs existing.
        let mut seen_names = HashSet::new();
        let mut seen_paths = HashSet::new();
        for def in &flat {
            validate_name(&def.name).map_err(|m| RouterError::invalid("router.add", m))?;
            if self.routes.contains_key(&def.name) || !seen_names.insert(def.name.clone()) {
                return Err(RouterError::invalid(
                    "router.add",
                    format!("duplicate route name '{}'", def.name),
                ));
            }
            if self.paths.contains(&def.path) || !seen_paths.insert(def.path.clone()) {
                return Err(RouterError::invalid(
                    "router.add",
                    format!("duplicate route path '{}'", def.path),
                ));
            }
        }

        // 2. Dot-notation parents must exist (existing tree ∪ earlier batch items).
        for def in &flat {
            if let Some(parent) = parent_name(&def.name) {
                if !self.routes.contains_key(parent) && !seen_names.contains(parent) {
                    return Err(RouterError::invalid(
                        "router.add",
                        format!("parent route '{parent}' does not exist for '{}'", def.name),
                    ));
                }
            }
            if def.forward_to.is_some() && def.can_activate.is_some() {
                tracing::warn!(route = %def.name, "route has both forwardTo and canActivate; guard will be bypassed on forwarded navigations");
            }
        }

        // 3. Dry-run forward-edge registration: cycle & depth check against
        // the prospective post-commit world.
        let mut scratch_forward = self.config.forward_map.clone();
        for def in &flat {
            if let Some(target) = &def.forward_to {
                scratch_forward.insert(def.name.clone(), target.clone());
            }
        }
        let mut live: HashSet<String> = self.routes.keys().cloned().collect();
        live.extend(flat.iter().map(|d| d.name.clone()));
        let mut scratch_store = ConfigStore {
            forward_map: scratch_forward,
            ..Default::default()
        };
        scratch_store
            .recompute_resolved(&live)
            .map_err(RouterError::invariant)?;
        for def in &flat {
            if let Some(ForwardTarget::Name(target)) = &def.forward_to {
                if !live.contains(target) {
                    return Err(RouterError::invalid(
                        "router.add",
                        format!("forwardTo target '{target}' does not exist for '{}'", def.name),
                    ));
                }
            }
        }

        // 4. Commit.
        for def in flat {
            self.paths.insert(def.path.clone());
            self.codec.register(&def.name, &def.path);
            if !def.default_params.is_empty() {
                self.config.default_params.insert(def.name.clone(), def.default_params.clone());
            }
            if let Some(target) = &def.forward_to {
                self.config.forward_map.insert(def.name.clone(), target.clone());
            }
            if let Some(decode) = &def.decode_params {
                self.config.decoders.insert(def.name.clone(), decode.clone());
            }
            if let Some(encode) = &def.encode_params {
                self.config.encoders.insert(def.name.clone(), encode.clone());
            }
            if let Some(guard) = &def.can_activate {
                guards.set_definition_activate(&def.name, guard.clone());
            }
            if let Some(guard) = &def.can_deactivate {
                guards.set_definition_deactivate(&def.name, guard.clone());
            }
            self.routes.insert(
                def.name.clone(),
                RouteRecord {
                    name: def.name.clone(),
                    path: def.path.clone(),
                },
            );
        }
        let live: HashSet<String> = self.routes.keys().cloned().collect();
        self.config
            .recompute_resolved(&live)
            .map_err(RouterError::invariant)?;
        Ok(())
    }

    /// `remove(name)`: removes the subtree rooted at `name`.
    pub fn remove(&mut self, name: &str, guards: &mut GuardRegistry) {
        let prefix = format!("{name}.");
        let doomed: Vec<String> = self
            .routes
            .keys()
            .filter(|n| n.as_str() == name || n.starts_with(&prefix))
            .cloned()
            .collect();
        for n in &doomed {
            if let Some(record) = self.routes.remove(n) {
                self.paths.remove(&record.path);
            }
            self.codec.unregister(n);
            self.config.remove_route(n);
            guards.clear_definition_sourced(n);
        }
        let live: HashSet<String> = self.routes.keys().cloned().collect();
        let _ = self.config.recompute_resolved(&live);
    }

    /// `update(name, patch)`. `forward_to = None` leaves the existing edge
    /// untouched; pass `Some(None)`-style semantics are modeled by the
    /// caller clearing via a dedicated method if ever needed (not exercised
    /// by spec.md, which only documents guard clearing via `null`).
    pub fn update_default_params(&mut self, name: &str, params: Params) -> Result<(), RouterError> {
        if !self.routes.contains_key(name) {
            return Err(RouterError::invalid("router.update", format!("unknown route '{name}'")));
        }
        self.config.default_params.insert(name.to_string(), params);
        Ok(())
    }

    pub fn update_forward_to(&mut self, name: &str, target: Option<ForwardTarget>) -> Result<(), RouterError> {
        if !self.routes.contains_key(name) {
            return Err(RouterError::invalid("router.update", format!("unknown route '{name}'")));
        }
        match target {
            Some(t) => {
                self.config.forward_map.insert(name.to_string(), t);
            }
            None => {
                self.config.forward_map.remove(name);
            }
        }
        let live: HashSet<String> = self.routes.keys().cloned().collect();
        self.config.recompute_resolved(&live).map_err(RouterError::invariant)
    }

    /// `update(name, patch)`: applies any subset of the six patchable fields.
    /// Each guard/codec/forward field follows the double-`Option` convention:
    /// outer `None` leaves it untouched, `Some(None)` clears it, `Some(Some(x))`
    /// sets it to `x`. `canActivate`/`canDeactivate` patched this way are
    /// definition-sourced, per spec.md §4.B.
    pub fn update(&mut self, name: &str, patch: RoutePatch, guards: &mut GuardRegistry) -> Result<(), RouterError> {
        if !self.routes.contains_key(name) {
            return Err(RouterError::invalid("router.update", format!("unknown route '{name}'")));
        }
        if let Some(params) = patch.default_params {
            self.config.default_params.insert(name.to_string(), params);
        }
        if let Some(decode) = patch.decode_params {
            match decode {
                Some(f) => {
                    self.config.decoders.insert(name.to_string(), f);
                }
                None => {
                    self.config.decoders.remove(name);
                }
            }
        }
        if let Some(encode) = patch.encode_params {
            match encode {
                Some(f) => {
                    self.config.encoders.insert(name.to_string(), f);
                }
                None => {
                    self.config.encoders.remove(name);
                }
            }
        }
        if let Some(guard) = patch.can_activate {
            match guard {
                Some(factory) => guards.set_definition_activate(name, GuardSource::new(factory)),
                None => guards.clear_definition_activate(name),
            }
        }
        if let Some(guard) = patch.can_deactivate {
            match guard {
                Some(factory) => guards.set_definition_deactivate(name, GuardSource::new(factory)),
                None => guards.clear_definition_deactivate(name),
            }
        }
        if let Some(target) = patch.forward_to {
            self.update_forward_to(name, target)?;
        }
        Ok(())
    }

    /// `replace(routes)`: atomic new-world swap. Clears definition-sourced
    /// guards and config but preserves external guards (the caller passes
    /// the same `guards` registry through, which only clears the
    /// definition-sourced half).
    pub fn replace(&mut self, defs: Vec<RouteDef>, guards: &mut GuardRegistry) -> Result<(), RouterError> {
        let flat = Self::flatten_batch(defs);

        let mut seen_names = HashSet::new();
        let mut seen_paths = HashSet::new();
        for def in &flat {
            validate_name(&def.name).map_err(|m| RouterError::invalid("router.replace", m))?;
            if !seen_names.insert(def.name.clone()) {
                return Err(RouterError::invalid("router.replace", format!("duplicate route name '{}'", def.name)));
            }
            if !seen_paths.insert(def.path.clone()) {
                return Err(RouterError::invalid("router.replace", format!("duplicate route path '{}'", def.path)));
            }
        }
        for def in &flat {
            if let Some(parent) = parent_name(&def.name) {
                if !seen_names.contains(parent) {
                    return Err(RouterError::invalid(
                        "router.replace",
                        format!("parent route '{parent}' does not exist for '{}'", def.name),
                    ));
                }
            }
        }
        let mut scratch_forward = HashMap::new();
        for def in &flat {
            if let Some(target) = &def.forward_to {
                scratch_forward.insert(def.name.clone(), target.clone());
            }
        }
        let mut scratch_store = ConfigStore {
            forward_map: scratch_forward.clone(),
            ..Default::default()
        };
        scratch_store.recompute_resolved(&seen_names).map_err(RouterError::invariant)?;
        for def in &flat {
            if let Some(ForwardTarget::Name(target)) = &def.forward_to {
                if !seen_names.contains(target) {
                    return Err(RouterError::invalid(
                        "router.replace",
                        format!("forwardTo target '{target}' does not exist for '{}'", def.name),
                    ));
                }
            }
        }

        // Swap in the new world.
        self.routes.clear();
        self.paths.clear();
        self.config.clear();
        self.codec.clear();
        guards.clear_all_definition_sourced();

        for def in flat {
            self.paths.insert(def.path.clone());
            self.codec.register(&def.name, &def.path);
            if !def.default_params.is_empty() {
                self.config.default_params.insert(def.name.clone(), def.default_params.clone());
            }
            if let Some(target) = &def.forward_to {
                self.config.forward_map.insert(def.name.clone(), target.clone());
            }
            if let Some(guard) = &def.can_activate {
                guards.set_definition_activate(&def.name, guard.clone());
            }
            if let Some(guard) = &def.can_deactivate {
                guards.set_definition_deactivate(&def.name, guard.clone());
            }
            self.routes.insert(
                def.name.clone(),
                RouteRecord {
                    name: def.name.clone(),
                    path: def.path.clone(),
                },
            );
        }
        let live: HashSet<String> = self.routes.keys().cloned().collect();
        self.config.recompute_resolved(&live).map_err(RouterError::invariant)?;
        Ok(())
    }

    /// `clear()`: removes every route and all associated config/guards.
    pub fn clear(&mut self, guards: &mut GuardRegistry) {
        self.routes.clear();
        self.paths.clear();
        self.config.clear();
        self.codec.clear();
        guards.clear_all();
    }

    /// Resolve the terminal target for `name` through the precomputed
    /// forward map, re-evaluating any `Dynamic` edge lazily.
    pub fn resolve_forward(&self, name: &str) -> Option<String> {
        if let Some(terminal) = self.config.resolved_forward_map.get(name) {
            return Some(terminal.clone());
        }
        match self.config.forward_map.get(name) {
            Some(ForwardTarget::Dynamic(f)) => {
                let target = f();
                self.config.resolved_forward_map.get(&target).cloned().or(Some(target))
            }
            _ => None,
        }
    }

    /// Whether `name` still exists after a mutation; used by the post-commit
    /// hook that clears current state if its route vanished.
    pub fn route_names(&self) -> impl Iterator<Item = &String> {
        self.routes.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_guards() -> GuardRegistry {
        GuardRegistry::new()
    }

    #[test]
    fn add_rejects_duplicate_names_atomically() {
        let mut tree = RouteTree::new();
        let mut guards = empty_guards();
        tree.add(vec![RouteDef::new("home", "/home")], None, &mut guards).unwrap();
        let err = tree.add(vec![RouteDef::new("home", "/other")], None, &mut guards);
        assert!(err.is_err());
        assert!(tree.has("home"));
        assert!(!tree.has("other"));
    }

    #[test]
    fn add_rejects_cycle_and_leaves_tree_unchanged() {
        let mut tree = RouteTree::new();
        let mut guards = empty_guards();
        let a = RouteDef::new("a", "/a").with_forward_to("b");
        let b = RouteDef::new("b", "/b").with_forward_to("a");
        let err = tree.add(vec![a, b], None, &mut guards);
        assert!(err.is_err());
        assert!(!tree.has("a"));
        assert!(!tree.has("b"));
    }

    #[test]
    fn scenario_forward_chain_resolves_to_terminal() {
        let mut tree = RouteTree::new();
        let mut guards = empty_guards();
        tree.add(
            vec![
                RouteDef::new("a", "/a").with_forward_to("b"),
                RouteDef::new("b", "/b").with_forward_to("c"),
                RouteDef::new("c", "/c"),
            ],
            None,
            &mut guards,
        )
        .unwrap();
        assert_eq!(tree.resolve_forward("a"), Some("c".to_string()));
        assert_eq!(tree.resolve_forward("b"), Some("c".to_string()));
        assert_eq!(tree.resolve_forward("c"), None);
    }

    #[test]
    fn remove_clears_route_and_config() {
        let mut tree = RouteTree::new();
        let mut guards = empty_guards();
        tree.add(vec![RouteDef::new("home", "/home")], None, &mut guards).unwrap();
        tree.remove("home", &mut guards);
        assert!(!tree.has("home"));
        assert!(tree.get_config("home").is_none());
    }

    #[test]
    fn update_patches_default_params_and_clears_definition_guard() {
        let mut tree = RouteTree::new();
        let mut guards = empty_guards();
        tree.add(vec![RouteDef::new("home", "/home")], None, &mut guards).unwrap();
        guards.set_definition_activate("home", GuardSource::new(std::sync::Arc::new(|_deps| {
            std::sync::Arc::new(|_to, _from| {
                Box::pin(async { crate::guards::GuardOutcome::Deny })
                    as std::pin::Pin<Box<dyn std::future::Future<Output = crate::guards::GuardOutcome> + Send>>
            })
        })));
        assert!(guards.definition_activate("home").is_some());

        let mut params = Params::new();
        params.insert("tab".into(), crate::params::ParamValue::Str("a".into()));
        tree.update(
            "home",
            RoutePatch {
                default_params: Some(params.clone()),
                can_activate: Some(None),
                ..Default::default()
            },
            &mut guards,
        )
        .unwrap();

        assert_eq!(tree.get_config("home"), Some(params));
        assert!(guards.definition_activate("home").is_none());
    }

    #[test]
    fn update_rejects_unknown_route() {
        let mut tree = RouteTree::new();
        let mut guards = empty_guards();
        let err = tree.update("ghost", RoutePatch::default(), &mut guards);
        assert!(err.is_err());
    }

    #[test]
    fn nested_dot_names_require_existing_parent() {
        let mut tree = RouteTree::new();
        let mut guards = empty_guards();
        let err = tree.add(vec![RouteDef::new("users.view", "/users/view")], None, &mut guards);
        assert!(err.is_err());

        tree.add(
            vec![RouteDef::new("users", "/users").with_children(vec![RouteDef::new("view", "/users/view")])],
            None,
            &mut guards,
        )
        .unwrap();
        assert!(tree.has("users"));
        assert!(tree.has("users.view"));
    }
}
