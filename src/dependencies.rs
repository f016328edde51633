//! Dependency bag (component D): a process-scoped key-value map shared with
//! plugins and middleware. Rust has no prototype chain, so the source
//! library's `__proto__`-safety concern is trivially satisfied by `HashMap`;
//! this module keeps the rest of the contract (SameValueZero overwrite
//! suppression, `set(k, undefined)` no-op, atomic `setAll`, disposal gating).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::error::RouterError;

fn same_value_zero(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if x.is_nan() && y.is_nan() => true,
        _ => a == b,
    }
}

#[derive(Default)]
pub struct DependencyBag {
    values: RwLock<HashMap<String, serde_json::Value>>,
    disposed: AtomicBool,
}

impl DependencyBag {
    pub fn new() -> Self {
        DependencyBag::default()
    }

    fn check_disposed(&self, method: &'static str) -> Result<(), RouterError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(RouterError::RouterDisposed);
        }
        let _ = method;
        Ok(())
    }

    /// `set(k, undefined)` is a no-op; here that's modeled as `None`.
    pub fn set(&self, key: &str, value: Option<serde_json::Value>) -> Result<(), RouterError> {
        self.check_disposed("dependencies.set")?;
        let Some(value) = value else {
            return Ok(());
        };
        let mut values = self.values.write().expect("dependency bag lock poisoned");
        if let Some(existing) = values.get(key) {
            if !same_value_zero(existing, &value) {
                tracing::warn!(key, "overwriting existing dependency");
            }
        }
        values.insert(key.to_string(), value);
        Ok(())
    }

    /// Validates before mutating, so a rejected batch leaves the bag
    /// untouched.
    pub fn set_all(&self, entries: HashMap<String, serde_json::Value>) -> Result<(), RouterError> {
        self.check_disposed("dependencies.setAll")?;
        if entries.is_empty() {
            return Ok(());
        }
        let mut values = self.values.write().expect("dependency bag lock poisoned");
        for (key, value) in entries {
            if let Some(existing) = values.get(&key) {
                if !same_value_zero(existing, &value) {
                    tracing::warn!(key = %key, "overwriting existing dependency");
                }
            }
            values.insert(key, value);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<serde_json::Value, RouterError> {
        let values = self.values.read().expect("dependency bag lock poisoned");
        values
            .get(key)
            .cloned()
            .ok_or_else(|| RouterError::invalid("dependencies.get", format!("no dependency registered for '{key}'")))
    }

    pub fn get_all(&self) -> HashMap<String, serde_json::Value> {
        self.values.read().expect("dependency bag lock poisoned").clone()
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.read().expect("dependency bag lock poisoned").contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Result<(), RouterError> {
        self.check_disposed("dependencies.remove")?;
        let mut values = self.values.write().expect("dependency bag lock poisoned");
        if values.remove(key).is_none() {
            tracing::warn!(key, "removing dependency that was not registered");
        }
        Ok(())
    }

    pub fn reset(&self) -> Result<(), RouterError> {
        self.check_disposed("dependencies.reset")?;
        self.values.write().expect("dependency bag lock poisoned").clear();
        Ok(())
    }

    pub(crate) fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_undefined_is_noop() {
        let bag = DependencyBag::new();
        bag.set("k", None).unwrap();
        assert!(!bag.has("k"));
    }

    #[test]
    fn same_value_nan_suppresses_warning_path_but_still_sets() {
        let bag = DependencyBag::new();
        bag.set("k", Some(serde_json::json!(f64::NAN))).unwrap();
        bag.set("k", Some(serde_json::json!(f64::NAN))).unwrap();
        assert!(bag.has("k"));
    }

    #[test]
    fn get_all_is_a_fresh_copy() {
        let bag = DependencyBag::new();
        bag.set("k", Some(serde_json::json!(1))).unwrap();
        let mut copy = bag.get_all();
        copy.insert("extra".into(), serde_json::json!(2));
        assert!(!bag.has("extra"));
    }

    #[test]
    fn mutations_after_dispose_are_rejected() {
        let bag = DependencyBag::new();
        bag.dispose();
        let err = bag.set("k", Some(serde_json::json!(1))).unwrap_err();
        assert_eq!(err.code(), "ROUTER_DISPOSED");
        assert!(!bag.has("k"));
    }

    #[test]
    fn reset_is_idempotent() {
        let bag = DependencyBag::new();
        bag.set("k", Some(serde_json::json!(1))).unwrap();
        bag.reset().unwrap();
        bag.reset().unwrap();
        assert!(!bag.has("k"));
    }
}
