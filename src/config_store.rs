//! Config store (component C): per-route side tables keyed by fully
//! qualified route name. All writes are atomic with route tree mutations —
//! callers always go through [`crate::route_tree::RouteTree`], never this
//! struct directly, so atomicity is enforced one level up.

use std::collections::HashMap;
use std::sync::Arc;

use crate::params::Params;

/// A route's `decodeParams` collaborator.
pub type DecodeParamsFn = Arc<dyn Fn(&Params) -> Params + Send + Sync>;
/// A route's `encodeParams` collaborator.
pub type EncodeParamsFn = Arc<dyn Fn(&Params) -> Params + Send + Sync>;

/// `forwardTo`: either a fixed target name, or a nullary function evaluated
/// lazily at navigation time whose return value is looked up again. Only the
/// `Name` form participates in cycle detection (a dynamic edge can't be
/// statically proven acyclic).
#[derive(Clone)]
pub enum ForwardTarget {
    Name(String),
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl std::fmt::Debug for ForwardTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardTarget::Name(n) => f.debug_tuple("Name").field(n).finish(),
            ForwardTarget::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

#[derive(Default, Clone)]
pub struct ConfigStore {
    pub decoders: HashMap<String, DecodeParamsFn>,
    pub encoders: HashMap<String, EncodeParamsFn>,
    pub default_params: HashMap<String, Params>,
    pub forward_map: HashMap<String, ForwardTarget>,
    pub resolved_forward_map: HashMap<String, String>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("decoders", &self.decoders.keys().collect::<Vec<_>>())
            .field("encoders", &self.encoders.keys().collect::<Vec<_>>())
            .field("default_params", &self.default_params)
            .field("forward_map", &self.forward_map)
            .field("resolved_forward_map", &self.resolved_forward_map)
            .finish()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        ConfigStore::default()
    }

    pub fn remove_route(&mut self, name: &str) {
        self.decoders.remove(name);
        self.encoders.remove(name);
        self.default_params.remove(name);
        self.forward_map.remove(name);
        self.resolved_forward_map.remove(name);
        self.resolved_forward_map.retain(|_, target| target != name);
    }

    pub fn clear(&mut self) {
        self.decoders.clear();
        self.encoders.clear();
        self.default_params.clear();
        self.forward_map.clear();
        self.resolved_forward_map.clear();
    }

    /// Recompute `resolved_forward_map` from `forward_map` over the given set
    /// of live route names, detecting cycles with a marked-in-progress set
    /// during DFS, and rejecting chains deeper than 100.
    ///
    /// Only `ForwardTarget::Name` edges participate; `Dynamic` edges are
    /// resolved lazily at navigation time and are not pre-computed here.
    pub fn recompute_resolved(&mut self, live_names: &std::collections::HashSet<String>) -> Result<(), String> {
        self.resolved_forward_map.clear();
        for name in live_names {
            if matches!(self.forward_map.get(name), Some(ForwardTarget::Name(_))) {
                let mut visited = Vec::new();
                let terminal = Self::resolve_chain(&self.forward_map, name, &mut visited)?;
                self.resolved_forward_map.insert(name.clone(), terminal);
            }
        }
        Ok(())
    }

    fn resolve_chain(
        forward_map: &HashMap<String, ForwardTarget>,
        start: &str,
        visited: &mut Vec<String>,
    ) -> Result<String, String> {
        let mut current = start.to_string();
        loop {
            if visited.contains(&current) {
                visited.push(current.clone());
                return Err(format!("Circular forwardTo: {}", visited.join(" \u{2192} ")));
            }
            visited.push(current.clone());
            if visited.len() > 100 {
                return Err(format!("forwardTo chain exceeds max depth of 100 starting at {start}"));
            }
            match forward_map.get(&current) {
                Some(ForwardTarget::Name(next)) => current = next.clone(),
                _ => return Ok(current),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn resolves_forward_chain() {
        let mut store = ConfigStore::new();
        store.forward_map.insert("a".into(), ForwardTarget::Name("b".into()));
        store.forward_map.insert("b".into(), ForwardTarget::Name("c".into()));
        let live: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        store.recompute_resolved(&live).unwrap();
        assert_eq!(store.resolved_forward_map.get("a"), Some(&"c".to_string()));
        assert_eq!(store.resolved_forward_map.get("b"), Some(&"c".to_string()));
        assert!(!store.resolved_forward_map.contains_key("c"));
    }

    #[test]
    fn detects_cycle() {
        let mut store = ConfigStore::new();
        store.forward_map.insert("a".into(), ForwardTarget::Name("b".into()));
        store.forward_map.insert("b".into(), ForwardTarget::Name("a".into()));
        let live: HashSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let err = store.recompute_resolved(&live).unwrap_err();
        assert!(err.contains("Circular forwardTo"));
    }
}
