use std::collections::HashMap;
use std::fmt;

/// A single route parameter value. Mirrors the closed value set a route
/// param can take: string, number, boolean, or null.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

impl ParamValue {
    /// SameValueZero-style equality: like `PartialEq` except `NaN == NaN`.
    pub fn same_value_zero(&self, other: &ParamValue) -> bool {
        match (self, other) {
            (ParamValue::Num(a), ParamValue::Num(b)) => {
                (a.is_nan() && b.is_nan()) || a == b
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => write!(f, "{s}"),
            ParamValue::Num(n) => write!(f, "{n}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Num(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Mapping from param name to value. Ordering is irrelevant, per the route
/// param contract, so a `HashMap` is the natural fit.
pub type Params = HashMap<String, ParamValue>;

/// Deep-equality check for two param maps, using [`ParamValue::same_value_zero`].
pub fn params_equal(a: &Params, b: &Params) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| b.get(k).is_some_and(|bv| v.same_value_zero(bv)))
}

/// Merge `defaults` under `overrides`: overrides win on key collision.
pub fn merge_params(defaults: &Params, overrides: &Params) -> Params {
    let mut merged = defaults.clone();
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Parse a query string into key-value pairs, generalized from a single
/// whitelist-free parse to the caller-supplied list of recognized keys.
pub fn parse_query_string(query: Option<&str>) -> Vec<(String, String)> {
    match query {
        Some(q) => form_urlencoded::parse(q.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        None => Vec::new(),
    }
}
