//! Route patterns used to scope middleware.
//!
//! Supported segment forms:
//! - literal: `/health`
//! - single-segment param: `/users/:id` or `/users/{id}`
//! - trailing catch-all: `/static/*`, `/static/*rest`, `/static/{*rest}`
//!
//! A bare `*` is accepted as an alias for the root catch-all.

use http::Method;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutePatternError {
    #[error("route pattern must start with '/': {0:?}")]
    MissingLeadingSlash(String),
    #[error("catch-all must be the last segment: {0:?}")]
    CatchAllNotLast(String),
    #[error("invalid HTTP method {method:?} in route {route:?}")]
    InvalidMethod { route: String, method: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Param,
    CatchAll,
}

impl Segment {
    fn parse(s: &str) -> Self {
        if s.starts_with('*') || s.starts_with("{*") {
            Segment::CatchAll
        } else if s.starts_with(':') || (s.starts_with('{') && s.ends_with('}')) {
            Segment::Param
        } else {
            Segment::Literal(s.to_string())
        }
    }
}

/// A parsed, normalized route pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl RoutePattern {
    /// The root path `/`.
    pub fn root() -> Self {
        Self {
            raw: "/".to_string(),
            segments: Vec::new(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, RoutePatternError> {
        let s = s.trim();
        if s == "*" {
            return Ok(Self {
                raw: "/*".to_string(),
                segments: vec![Segment::CatchAll],
            });
        }
        if !s.starts_with('/') {
            return Err(RoutePatternError::MissingLeadingSlash(s.to_string()));
        }

        let segments: Vec<Segment> = split_path(s).map(Segment::parse).collect();
        if let Some(pos) = segments.iter().position(|s| *s == Segment::CatchAll) {
            if pos + 1 != segments.len() {
                return Err(RoutePatternError::CatchAllNotLast(s.to_string()));
            }
        }

        let raw = if segments.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", split_path(s).collect::<Vec<_>>().join("/"))
        };
        Ok(Self { raw, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True for `/` and `/*`, i.e. patterns that cover every path.
    pub fn is_root(&self) -> bool {
        matches!(self.segments.as_slice(), [] | [Segment::CatchAll])
    }

    /// Join a sub-path onto this pattern (`/api` + `/users` = `/api/users`).
    pub fn join(&self, sub: &str) -> Result<Self, RoutePatternError> {
        let sub = sub.trim_start_matches('/');
        Self::parse(&format!("{}/{}", self.raw.trim_end_matches('/'), sub))
    }

    /// Exact match of the whole request path.
    pub fn matches(&self, path: &str) -> bool {
        self.walk(path, false)
    }

    /// Prefix match: the request path lies at or under this pattern.
    pub fn covers(&self, path: &str) -> bool {
        self.walk(path, true)
    }

    fn walk(&self, path: &str, prefix: bool) -> bool {
        let mut parts = split_path(path);
        for seg in &self.segments {
            match seg {
                Segment::CatchAll => return true,
                Segment::Param => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(lit) => {
                    if parts.next() != Some(lit.as_str()) {
                        return false;
                    }
                }
            }
        }
        prefix || parts.next().is_none()
    }
}

impl Default for RoutePattern {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for RoutePattern {
    type Err = RoutePatternError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RoutePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for RoutePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A route to include or exclude, optionally restricted to one HTTP method.
/// `method == None` means any method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub path: RoutePattern,
    pub method: Option<Method>,
}

impl RouteInfo {
    pub fn any(path: RoutePattern) -> Self {
        Self { path, method: None }
    }

    pub fn with_method(path: RoutePattern, method: Method) -> Self {
        Self {
            path,
            method: Some(method),
        }
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.as_ref().map_or(true, |m| m == method) && self.path.matches(path)
    }
}

impl FromStr for RouteInfo {
    type Err = RoutePatternError;

    /// Accepts `"/health"` or `"GET /health"`. `ALL` is treated as any method.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(char::is_whitespace) {
            Some((method, path)) if !method.starts_with('/') => {
                let path = RoutePattern::parse(path)?;
                if method.eq_ignore_ascii_case("ALL") {
                    return Ok(Self::any(path));
                }
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| RoutePatternError::InvalidMethod {
                        route: s.to_string(),
                        method: method.to_string(),
                    })?;
                Ok(Self::with_method(path, method))
            }
            _ => Ok(Self::any(RoutePattern::parse(s)?)),
        }
    }
}

impl fmt::Display for RouteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(m) => write!(f, "{m} {}", self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

impl Serialize for RouteInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RouteInfo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Plain(String),
            Struct {
                path: String,
                #[serde(default)]
                method: Option<String>,
            },
        }

        let s = match Repr::deserialize(deserializer)? {
            Repr::Plain(s) => s,
            Repr::Struct { path, method: None } => path,
            Repr::Struct {
                path,
                method: Some(m),
            } => format!("{m} {path}"),
        };
        s.parse().map_err(serde::de::Error::custom)
    }
}
