//! Path codec (component A): parse a path into `{name, params}`, and build a
//! path back from `{name, params}`. The route tree depends on this, supplying
//! it with one compiled pattern per route; the codec itself stays agnostic of
//! the tree's storage.

use std::collections::HashMap;

use crate::options::RouterOptions;
use crate::params::{ParamValue, Params};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Static(String),
    Param(String),
    Wildcard(String),
}

/// A compiled route path pattern, e.g. `/users/:id/*rest`.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    tokens: Vec<Token>,
    matrix_params: Vec<String>,
    query_whitelist: Vec<String>,
    raw: String,
}

impl CompiledPattern {
    pub fn compile(path: &str) -> Self {
        let (path_part, query_part) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };
        let query_whitelist = query_part
            .map(|q| q.split('&').filter(|s| !s.is_empty()).map(String::from).collect())
            .unwrap_or_default();

        let mut tokens = Vec::new();
        let mut matrix_params = Vec::new();
        for raw_segment in path_part.split('/').filter(|s| !s.is_empty()) {
            let (segment, matrix) = match raw_segment.split_once(';') {
                Some((seg, m)) => (seg, Some(m)),
                None => (raw_segment, None),
            };
            if let Some(m) = matrix {
                matrix_params.extend(m.split(';').filter(|s| !s.is_empty()).map(String::from));
            }
            if let Some(name) = segment.strip_prefix(':') {
                tokens.push(Token::Param(name.to_string()));
            } else if let Some(name) = segment.strip_prefix('*') {
                tokens.push(Token::Wildcard(name.to_string()));
            } else {
                tokens.push(Token::Static(segment.to_string()));
            }
        }

        CompiledPattern {
            tokens,
            matrix_params,
            query_whitelist,
            raw: path.to_string(),
        }
    }

    fn normalize(segments: &[&str], opts: &RouterOptions) -> Vec<String> {
        segments
            .iter()
            .map(|s| {
                if opts.case_sensitive {
                    s.to_string()
                } else {
                    s.to_lowercase()
                }
            })
            .collect()
    }

    /// Try to match `path` against this pattern, returning decoded params on
    /// success.
    pub fn try_match(&self, path: &str, opts: &RouterOptions) -> Option<Params> {
        let (path_part, query_part) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };

        let trimmed = match opts.trailing_slash {
            crate::options::TrailingSlashMode::Never => path_part.trim_end_matches('/'),
            _ => path_part,
        };

        let mut raw_segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Params::new();

        // Strip matrix params off each incoming segment before comparison.
        let mut clean_segments = Vec::with_capacity(raw_segments.len());
        for seg in raw_segments.drain(..) {
            if let Some((clean, matrix)) = seg.split_once(';') {
                for pair in matrix.split(';').filter(|s| !s.is_empty()) {
                    if let Some((k, v)) = pair.split_once('=') {
                        params.insert(k.to_string(), ParamValue::Str(v.to_string()));
                    }
                }
                clean_segments.push(clean);
            } else {
                clean_segments.push(seg);
            }
        }

        let has_wildcard = matches!(self.tokens.last(), Some(Token::Wildcard(_)));
        if !has_wildcard && clean_segments.len() != self.tokens.len() {
            return None;
        }
        if has_wildcard && clean_segments.len() < self.tokens.len() - 1 {
            return None;
        }

        let normalized = Self::normalize(&clean_segments, opts);

        for (i, token) in self.tokens.iter().enumerate() {
            match token {
                Token::Static(expected) => {
                    let expected_cmp = if opts.case_sensitive {
                        expected.clone()
                    } else {
                        expected.to_lowercase()
                    };
                    if normalized.get(i) != Some(&expected_cmp) {
                        return None;
                    }
                }
                Token::Param(name) => {
                    let value = clean_segments.get(i)?;
                    params.insert(name.clone(), ParamValue::Str(value.to_string()));
                }
                Token::Wildcard(name) => {
                    let rest = clean_segments[i..].join("/");
                    if !name.is_empty() {
                        params.insert(name.clone(), ParamValue::Str(rest));
                    }
                    break;
                }
            }
        }

        if let Some(q) = query_part {
            for (k, v) in crate::params::parse_query_string(Some(q)) {
                if self.query_whitelist.is_empty() || self.query_whitelist.contains(&k) {
                    params.insert(k, ParamValue::Str(v));
                }
            }
        }

        Some(params)
    }

    /// Build a concrete path from params, using only the tokens this pattern
    /// defines; extra params not consumed by a `:param`/`*wildcard`/matrix/
    /// query slot are appended as query string entries from the whitelist.
    pub fn build(&self, params: &Params) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            out.push('/');
            match token {
                Token::Static(s) => out.push_str(s),
                Token::Param(name) => {
                    let value = params
                        .get(name)
                        .map(|v| v.to_string())
                        .unwrap_or_default();
                    out.push_str(&value);
                }
                Token::Wildcard(name) => {
                    if !name.is_empty() {
                        if let Some(v) = params.get(name) {
                            out.push_str(&v.to_string());
                        }
                    }
                }
            }
        }
        if out.is_empty() {
            out.push('/');
        }

        if !self.matrix_params.is_empty() {
            for mp in &self.matrix_params {
                if let Some(v) = params.get(mp) {
                    out.push(';');
                    out.push_str(mp);
                    out.push('=');
                    out.push_str(&v.to_string());
                }
            }
        }

        if !self.query_whitelist.is_empty() {
            let pairs: Vec<(String, String)> = self
                .query_whitelist
                .iter()
                .filter_map(|k| params.get(k).map(|v| (k.clone(), v.to_string())))
                .collect();
            if !pairs.is_empty() {
                let qs: String = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    .finish();
                out.push('?');
                out.push_str(&qs);
            }
        }

        out
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Codec built from a set of compiled per-route patterns. `match_path`/
/// `build_path` are the two pure functions spec.md's component A requires;
/// this struct is the pluggable implementation the route tree depends on.
#[derive(Debug, Default, Clone)]
pub struct PathCodec {
    patterns: HashMap<String, CompiledPattern>,
}

impl PathCodec {
    pub fn new() -> Self {
        PathCodec::default()
    }

    pub fn register(&mut self, name: impl Into<String>, path: &str) {
        self.patterns.insert(name.into(), CompiledPattern::compile(path));
    }

    pub fn unregister(&mut self, name: &str) {
        self.patterns.remove(name);
    }

    pub fn clear(&mut self) {
        self.patterns.clear();
    }

    /// `matchPath(path) -> { name, params } | undefined`.
    pub fn match_path(&self, path: &str, opts: &RouterOptions) -> Option<(String, Params)> {
        for (name, pattern) in &self.patterns {
            if let Some(params) = pattern.try_match(path, opts) {
                return Some((name.clone(), params));
            }
        }
        None
    }

    /// `buildPath(name, params) -> string`.
    pub fn build_path(&self, name: &str, params: &Params) -> Option<String> {
        self.patterns.get(name).map(|p| p.build(params))
    }
}
