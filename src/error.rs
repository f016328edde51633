use std::collections::HashMap;
use std::fmt;

use crate::state::State;

/// Reserved field names on [`RouterError`]; cannot be set via the custom-field API.
pub const RESERVED_FIELDS: &[&str] = &["code", "segment", "path", "redirect", "attemptedRedirect"];

/// The canonical error taxonomy for the router. The variant name is also the
/// default message, mirroring the source library's `code` field doubling as
/// `message`.
#[derive(Debug, Clone)]
pub enum RouterError {
    /// Name or path not resolvable in the route tree.
    RouteNotFound {
        segment: Option<String>,
        path: Option<String>,
    },
    /// Activation guard denied the transition.
    CannotActivate {
        segment: Option<String>,
        attempted_redirect: Option<Box<State>>,
    },
    /// Deactivation guard denied the transition.
    CannotDeactivate { segment: Option<String> },
    /// Target equals current state and neither `reload` nor `force` was set.
    SameStates,
    /// Middleware or other generic transition failure.
    TransitionErr { cause: Option<Box<RouterError>> },
    /// `navigate` called before `start`.
    RouterNotStarted,
    /// `start` called while READY or TRANSITIONING.
    RouterAlreadyStarted,
    /// Any mutation attempted after `dispose`.
    RouterDisposed,
    /// Transition was superseded or explicitly cancelled.
    TransitionCancelled,
    /// Input validation failure raised before any mutation. `method` is the
    /// originating API method, rendered in brackets in the message.
    Invalid { method: &'static str, message: String },
    /// An internal registry invariant was violated (e.g. a forward cycle).
    Invariant { message: String },
}

impl RouterError {
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::RouteNotFound { .. } => "ROUTE_NOT_FOUND",
            RouterError::CannotActivate { .. } => "CANNOT_ACTIVATE",
            RouterError::CannotDeactivate { .. } => "CANNOT_DEACTIVATE",
            RouterError::SameStates => "SAME_STATES",
            RouterError::TransitionErr { .. } => "TRANSITION_ERR",
            RouterError::RouterNotStarted => "ROUTER_NOT_STARTED",
            RouterError::RouterAlreadyStarted => "ROUTER_ALREADY_STARTED",
            RouterError::RouterDisposed => "ROUTER_DISPOSED",
            RouterError::TransitionCancelled => "TRANSITION_CANCELLED",
            RouterError::Invalid { .. } => "INVALID_ARGUMENT",
            RouterError::Invariant { .. } => "INVARIANT_VIOLATION",
        }
    }

    pub fn route_not_found() -> Self {
        RouterError::RouteNotFound {
            segment: None,
            path: None,
        }
    }

    pub fn route_not_found_path(path: impl Into<String>) -> Self {
        RouterError::RouteNotFound {
            segment: None,
            path: Some(path.into()),
        }
    }

    pub fn invalid(method: &'static str, message: impl Into<String>) -> Self {
        RouterError::Invalid {
            method,
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        RouterError::Invariant {
            message: message.into(),
        }
    }

    /// JSON serialization including the taxonomy fields above plus any
    /// caller-attached custom fields.
    pub fn to_json(&self, custom: &HashMap<String, serde_json::Value>) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("code".into(), serde_json::Value::String(self.code().into()));
        map.insert(
            "message".into(),
            serde_json::Value::String(self.to_string()),
        );
        match self {
            RouterError::RouteNotFound { segment, path } => {
                if let Some(s) = segment {
                    map.insert("segment".into(), serde_json::Value::String(s.clone()));
                }
                if let Some(p) = path {
                    map.insert("path".into(), serde_json::Value::String(p.clone()));
                }
            }
            RouterError::CannotActivate {
                segment,
                attempted_redirect,
            } => {
                if let Some(s) = segment {
                    map.insert("segment".into(), serde_json::Value::String(s.clone()));
                }
                if let Some(r) = attempted_redirect {
                    map.insert("attemptedRedirect".into(), r.to_json_value());
                }
            }
            RouterError::CannotDeactivate { segment } => {
                if let Some(s) = segment {
                    map.insert("segment".into(), serde_json::Value::String(s.clone()));
                }
            }
            _ => {}
        }
        for (k, v) in custom {
            if !RESERVED_FIELDS.contains(&k.as_str()) {
                map.insert(k.clone(), v.clone());
            }
        }
        serde_json::Value::Object(map)
    }
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::RouteNotFound { path: Some(p), .. } => {
                write!(f, "ROUTE_NOT_FOUND: {p}")
            }
            RouterError::Invalid { method, message } => {
                write!(f, "[{method}] {message}")
            }
            RouterError::Invariant { message } => write!(f, "{message}"),
            RouterError::TransitionErr { cause: Some(c) } => {
                write!(f, "TRANSITION_ERR: {c}")
            }
            other => write!(f, "{}", other.code()),
        }
    }
}

impl std::error::Error for RouterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RouterError::TransitionErr { cause: Some(c) } => Some(c.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_taxonomy() {
        assert_eq!(RouterError::route_not_found().code(), "ROUTE_NOT_FOUND");
        assert_eq!(RouterError::SameStates.code(), "SAME_STATES");
        assert_eq!(RouterError::RouterDisposed.code(), "ROUTER_DISPOSED");
    }

    #[test]
    fn invalid_message_includes_method_in_brackets() {
        let err = RouterError::invalid("router.add", "name must not be empty");
        assert_eq!(err.to_string(), "[router.add] name must not be empty");
    }

    #[test]
    fn to_json_drops_reserved_custom_fields() {
        let err = RouterError::SameStates;
        let mut custom = HashMap::new();
        custom.insert("code".to_string(), serde_json::json!("HIJACKED"));
        custom.insert("extra".to_string(), serde_json::json!(42));
        let json = err.to_json(&custom);
        assert_eq!(json["code"], serde_json::json!("SAME_STATES"));
        assert_eq!(json["extra"], serde_json::json!(42));
    }
}
