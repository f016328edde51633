use std::sync::Arc;

use crate::params::Params;

/// A snapshot of the navigation options in effect when a state was built,
/// carried in [`Meta::options`]. Mirrors [`crate::transition::NavigateOptions`]
/// but owns its data so it can live inside a frozen [`State`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigationOptionsSnapshot {
    pub replace: bool,
    pub reload: bool,
    pub force: bool,
    pub skip_transition: bool,
    pub force_deactivate: bool,
    pub source: Option<String>,
}

/// Metadata attached to every [`State`]: the navigation id that produced it,
/// the caller-supplied params before defaults were merged in, the effective
/// options, and an optional source tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    pub id: u64,
    pub params: Params,
    pub options: NavigationOptionsSnapshot,
    pub source: Option<String>,
}

#[derive(Debug, PartialEq)]
struct StateInner {
    name: String,
    params: Params,
    path: String,
    meta: Meta,
}

/// The authoritative, immutable navigation state. There is no runtime
/// `Object.freeze` equivalent needed: no method here returns `&mut` access to
/// any field, so once built a `State` cannot be mutated through any API this
/// crate exposes. Clone is `Arc`-backed and O(1).
#[derive(Debug, Clone)]
pub struct State(Arc<StateInner>);

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name && crate::params::params_equal(&self.0.params, &other.0.params)
    }
}

impl State {
    pub fn new(name: impl Into<String>, params: Params, path: impl Into<String>, meta: Meta) -> Self {
        State(Arc::new(StateInner {
            name: name.into(),
            params,
            path: path.into(),
            meta,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn params(&self) -> &Params {
        &self.0.params
    }

    pub fn path(&self) -> &str {
        &self.0.path
    }

    pub fn meta(&self) -> &Meta {
        &self.0.meta
    }

    /// Reserved route name synthesized when `allow_not_found` is set and a
    /// path does not match any registered route.
    pub const UNKNOWN_ROUTE: &'static str = "@@router/UNKNOWN_ROUTE";

    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.0.name,
            "params": self.0.params.iter().map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(serde_json::Value::Null))).collect::<serde_json::Map<_, _>>(),
            "path": self.0.path,
            "meta": {
                "id": self.0.meta.id,
                "source": self.0.meta.source,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_is_cheap_and_equal() {
        let s = State::new(
            "home",
            Params::new(),
            "/home",
            Meta {
                id: 1,
                params: Params::new(),
                options: NavigationOptionsSnapshot::default(),
                source: None,
            },
        );
        let s2 = s.clone();
        assert_eq!(s, s2);
        assert_eq!(s2.name(), "home");
    }
}
