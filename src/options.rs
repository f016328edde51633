use std::sync::RwLock;

use crate::params::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingSlashMode {
    Strict,
    Never,
    Always,
    Preserve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryParamsMode {
    Default,
    Strict,
    Loose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayFormat {
    Brackets,
    Index,
    Comma,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanFormat {
    String,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullFormat {
    Default,
    String,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryParamsOptions {
    pub array_format: ArrayFormat,
    pub boolean_format: BooleanFormat,
    pub null_format: NullFormat,
}

impl Default for QueryParamsOptions {
    fn default() -> Self {
        QueryParamsOptions {
            array_format: ArrayFormat::None,
            boolean_format: BooleanFormat::String,
            null_format: NullFormat::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlParamsEncoding {
    Default,
    Uri,
    UriComponent,
    None,
}

/// Fields mutable after `start()`: only `defaultRoute`/`defaultParams`.
#[derive(Debug, Clone, Default)]
struct MutableOptions {
    default_route: Option<String>,
    default_params: Params,
}

/// A deep-frozen snapshot of router configuration. All fields besides
/// `default_route`/`default_params` are immutable for the router's whole
/// life; those two remain mutable post-`start()` via interior mutability
/// guarded by a lock, matching spec.md's "only defaultRoute and
/// defaultParams are mutable after start" carve-out.
#[derive(Debug)]
pub struct RouterOptions {
    mutable: RwLock<MutableOptions>,
    pub trailing_slash: TrailingSlashMode,
    pub query_params_mode: QueryParamsMode,
    pub query_params: QueryParamsOptions,
    pub case_sensitive: bool,
    pub url_params_encoding: UrlParamsEncoding,
    pub allow_not_found: bool,
    pub rewrite_path_on_match: bool,
    pub no_validate: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        RouterOptions {
            mutable: RwLock::new(MutableOptions::default()),
            trailing_slash: TrailingSlashMode::Never,
            query_params_mode: QueryParamsMode::Default,
            query_params: QueryParamsOptions::default(),
            case_sensitive: false,
            url_params_encoding: UrlParamsEncoding::Default,
            allow_not_found: false,
            rewrite_path_on_match: false,
            no_validate: false,
        }
    }
}

impl RouterOptions {
    pub fn builder() -> RouterOptionsBuilder {
        RouterOptionsBuilder::default()
    }

    pub fn default_route(&self) -> Option<String> {
        self.mutable.read().expect("options lock poisoned").default_route.clone()
    }

    pub fn default_params(&self) -> Params {
        self.mutable.read().expect("options lock poisoned").default_params.clone()
    }

    /// Allowed at any time: the source library permits mutating these two
    /// fields even after `start()`.
    pub fn set_default_route(&self, name: Option<String>) {
        self.mutable.write().expect("options lock poisoned").default_route = name;
    }

    pub fn set_default_params(&self, params: Params) {
        self.mutable.write().expect("options lock poisoned").default_params = params;
    }
}

#[derive(Debug, Default)]
pub struct RouterOptionsBuilder {
    default_route: Option<String>,
    default_params: Params,
    trailing_slash: Option<TrailingSlashMode>,
    query_params_mode: Option<QueryParamsMode>,
    query_params: Option<QueryParamsOptions>,
    case_sensitive: Option<bool>,
    url_params_encoding: Option<UrlParamsEncoding>,
    allow_not_found: Option<bool>,
    rewrite_path_on_match: Option<bool>,
    no_validate: Option<bool>,
}

impl RouterOptionsBuilder {
    pub fn default_route(mut self, name: impl Into<String>) -> Self {
        self.default_route = Some(name.into());
        self
    }

    pub fn default_params(mut self, params: Params) -> Self {
        self.default_params = params;
        self
    }

    pub fn trailing_slash(mut self, mode: TrailingSlashMode) -> Self {
        self.trailing_slash = Some(mode);
        self
    }

    pub fn query_params_mode(mut self, mode: QueryParamsMode) -> Self {
        self.query_params_mode = Some(mode);
        self
    }

    pub fn case_sensitive(mut self, value: bool) -> Self {
        self.case_sensitive = Some(value);
        self
    }

    pub fn allow_not_found(mut self, value: bool) -> Self {
        self.allow_not_found = Some(value);
        self
    }

    pub fn rewrite_path_on_match(mut self, value: bool) -> Self {
        self.rewrite_path_on_match = Some(value);
        self
    }

    pub fn no_validate(mut self, value: bool) -> Self {
        self.no_validate = Some(value);
        self
    }

    pub fn build(self) -> RouterOptions {
        let defaults = RouterOptions::default();
        RouterOptions {
            mutable: RwLock::new(MutableOptions {
                default_route: self.default_route,
                default_params: self.default_params,
            }),
            trailing_slash: self.trailing_slash.unwrap_or(defaults.trailing_slash),
            query_params_mode: self.query_params_mode.unwrap_or(defaults.query_params_mode),
            query_params: self.query_params.unwrap_or(defaults.query_params),
            case_sensitive: self.case_sensitive.unwrap_or(defaults.case_sensitive),
            url_params_encoding: self
                .url_params_encoding
                .unwrap_or(defaults.url_params_encoding),
            allow_not_found: self.allow_not_found.unwrap_or(defaults.allow_not_found),
            rewrite_path_on_match: self
                .rewrite_path_on_match
                .unwrap_or(defaults.rewrite_path_on_match),
            no_validate: self.no_validate.unwrap_or(defaults.no_validate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_route_mutable_after_build() {
        let opts = RouterOptions::builder().default_route("home").build();
        assert_eq!(opts.default_route(), Some("home".to_string()));
        opts.set_default_route(Some("landing".to_string()));
        assert_eq!(opts.default_route(), Some("landing".to_string()));
    }
}
