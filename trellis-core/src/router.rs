//! Path trie used to dispatch requests.
//!
//! Patterns are split on `/`. A segment is a literal (`users`), a named
//! parameter (`:id`) or a catch-all (`*rest`) that swallows the remainder of
//! the path and must come last. Runs of literal segments share one compressed
//! edge that is split when a later pattern diverges inside it.
//!
//! Matching prefers literal edges over parameters and parameters over
//! catch-alls, and backtracks when a deeper branch fails. Conflicts are
//! rejected when the route is added, never at request time:
//!
//! - a catch-all and a literal cannot share a position,
//! - two catch-alls cannot share a position,
//! - two parameters at one position must use the same name,
//! - the same method and pattern cannot be registered twice.

use crate::error::{Error, RouteError};
use crate::http::{decode_path, HttpMethod, PathParams};
use std::collections::HashMap;

enum Segment {
    Static(String),
    Param(String),
    CatchAll(String),
}

struct Leaf<T> {
    pattern: String,
    value: T,
}

struct StaticEdge<T> {
    label: Vec<String>,
    node: Node<T>,
}

struct ParamEdge<T> {
    name: String,
    node: Node<T>,
}

struct CatchAll<T> {
    name: String,
    leaf: Leaf<T>,
}

struct Node<T> {
    statics: HashMap<String, StaticEdge<T>>,
    param: Option<Box<ParamEdge<T>>>,
    catch_all: Option<CatchAll<T>>,
    route: Option<Leaf<T>>,
}

struct InsertCtx<'a> {
    method: HttpMethod,
    path: &'a str,
}

impl InsertCtx<'_> {
    fn overlap(&self, existing: &str) -> RouteError {
        RouteError::WildcardOverlap {
            method: self.method.to_string(),
            path: self.path.to_string(),
            existing: existing.to_string(),
        }
    }
}

impl<T> Node<T> {
    fn new() -> Self {
        Self {
            statics: HashMap::new(),
            param: None,
            catch_all: None,
            route: None,
        }
    }

    /// Pattern of some route stored below this node, for diagnostics.
    fn any_pattern(&self) -> Option<&str> {
        if let Some(leaf) = &self.route {
            return Some(&leaf.pattern);
        }
        let mut keys: Vec<&String> = self.statics.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| self.statics[key].node.any_pattern())
            .chain(self.param.as_ref().and_then(|edge| edge.node.any_pattern()))
            .chain(self.catch_all.as_ref().map(|c| c.leaf.pattern.as_str()))
            .next()
    }

    fn insert(&mut self, segments: &[Segment], leaf: Leaf<T>, ctx: &InsertCtx<'_>) -> Result<(), RouteError> {
        match segments.first() {
            None => {
                if self.route.is_some() {
                    return Err(RouteError::DuplicateHandle {
                        method: ctx.method.to_string(),
                        path: ctx.path.to_string(),
                    });
                }
                self.route = Some(leaf);
                Ok(())
            }
            Some(Segment::Static(first)) => {
                if let Some(catch_all) = &self.catch_all {
                    return Err(ctx.overlap(&catch_all.leaf.pattern));
                }
                let run: Vec<String> = segments
                    .iter()
                    .map_while(|segment| match segment {
                        Segment::Static(literal) => Some(literal.clone()),
                        _ => None,
                    })
                    .collect();

                match self.statics.get_mut(first) {
                    Some(edge) => {
                        let common = edge
                            .label
                            .iter()
                            .zip(&run)
                            .take_while(|(a, b)| a == b)
                            .count();
                        if common < edge.label.len() {
                            let tail = edge.label.split_off(common);
                            let below = std::mem::replace(&mut edge.node, Node::new());
                            edge.node
                                .statics
                                .insert(tail[0].clone(), StaticEdge { label: tail, node: below });
                        }
                        edge.node.insert(&segments[common..], leaf, ctx)
                    }
                    None => {
                        let mut node = Node::new();
                        node.insert(&segments[run.len()..], leaf, ctx)?;
                        self.statics
                            .insert(first.clone(), StaticEdge { label: run, node });
                        Ok(())
                    }
                }
            }
            Some(Segment::Param(name)) => {
                if let Some(edge) = self.param.as_mut() {
                    if edge.name != *name {
                        return Err(RouteError::ParamNameConflict {
                            method: ctx.method.to_string(),
                            path: ctx.path.to_string(),
                            existing: edge.name.clone(),
                            new: name.clone(),
                        });
                    }
                    return edge.node.insert(&segments[1..], leaf, ctx);
                }
                let mut node = Node::new();
                node.insert(&segments[1..], leaf, ctx)?;
                self.param = Some(Box::new(ParamEdge {
                    name: name.clone(),
                    node,
                }));
                Ok(())
            }
            Some(Segment::CatchAll(name)) => {
                if let Some(existing) = &self.catch_all {
                    if existing.name == *name {
                        return Err(RouteError::DuplicateHandle {
                            method: ctx.method.to_string(),
                            path: ctx.path.to_string(),
                        });
                    }
                    return Err(ctx.overlap(&existing.leaf.pattern));
                }
                if !self.statics.is_empty() {
                    let mut keys: Vec<&String> = self.statics.keys().collect();
                    keys.sort();
                    let existing = keys
                        .first()
                        .and_then(|key| self.statics[*key].node.any_pattern())
                        .unwrap_or_default()
                        .to_string();
                    return Err(ctx.overlap(&existing));
                }
                self.catch_all = Some(CatchAll {
                    name: name.clone(),
                    leaf,
                });
                Ok(())
            }
        }
    }

    fn find<'a>(&'a self, segments: &[&str], params: &mut PathParams) -> Option<&'a Leaf<T>> {
        let Some(first) = segments.first() else {
            return self.route.as_ref();
        };

        if let Some(edge) = self.statics.get(*first) {
            let len = edge.label.len();
            if segments.len() >= len && edge.label.iter().zip(segments).all(|(a, b)| a == b) {
                if let Some(found) = edge.node.find(&segments[len..], params) {
                    return Some(found);
                }
            }
        }

        if let Some(edge) = &self.param {
            params.push(&edge.name, decode_path(first));
            if let Some(found) = edge.node.find(&segments[1..], params) {
                return Some(found);
            }
            params.pop();
        }

        if let Some(catch_all) = &self.catch_all {
            let rest: Vec<String> = segments.iter().map(|segment| decode_path(segment)).collect();
            params.push(&catch_all.name, rest.join("/"));
            return Some(&catch_all.leaf);
        }

        None
    }
}

fn parse_pattern(method: HttpMethod, path: &str) -> Result<Vec<Segment>, RouteError> {
    let raw: Vec<&str> = split_path(path);
    let invalid = |reason: &str| RouteError::InvalidPattern {
        method: method.to_string(),
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = Vec::with_capacity(raw.len());
    for (index, part) in raw.iter().enumerate() {
        if let Some(name) = part.strip_prefix(':') {
            if name.is_empty() {
                return Err(invalid("parameter without a name"));
            }
            segments.push(Segment::Param(name.to_string()));
        } else if let Some(name) = part.strip_prefix('*') {
            if name.is_empty() {
                return Err(invalid("catch-all without a name"));
            }
            if index + 1 != raw.len() {
                return Err(RouteError::CatchAllNotLast {
                    method: method.to_string(),
                    path: path.to_string(),
                });
            }
            segments.push(Segment::CatchAll(name.to_string()));
        } else {
            segments.push(Segment::Static(part.to_string()));
        }
    }
    Ok(segments)
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

/// Canonical form of a pattern: leading slash, no empty segments.
pub fn normalize_path(path: &str) -> String {
    format!("/{}", split_path(path).join("/"))
}

/// Join two path fragments into a canonical pattern.
pub fn join_paths(prefix: &str, path: &str) -> String {
    normalize_path(&format!("{prefix}/{path}"))
}

/// A successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
    pub value: &'a T,
    pub pattern: &'a str,
    pub params: PathParams,
}

/// Method-keyed set of path tries.
pub struct Router<T> {
    roots: HashMap<HttpMethod, Node<T>>,
    len: usize,
}

impl<T> Router<T> {
    pub fn new() -> Self {
        Self {
            roots: HashMap::new(),
            len: 0,
        }
    }

    /// Register `value` under `method` and `pattern`.
    pub fn add_route(&mut self, method: HttpMethod, pattern: &str, value: T) -> Result<(), RouteError> {
        let segments = parse_pattern(method, pattern)?;
        let canonical = normalize_path(pattern);
        let ctx = InsertCtx {
            method,
            path: &canonical,
        };
        let leaf = Leaf {
            pattern: canonical.clone(),
            value,
        };
        self.roots
            .entry(method)
            .or_insert_with(Node::new)
            .insert(&segments, leaf, &ctx)?;
        self.len += 1;
        Ok(())
    }

    /// Match `path` under `method`.
    pub fn find(&self, method: HttpMethod, path: &str) -> Option<RouteMatch<'_, T>> {
        let root = self.roots.get(&method)?;
        let segments = split_path(path);
        let mut params = PathParams::new();
        root.find(&segments, &mut params).map(|leaf| RouteMatch {
            value: &leaf.value,
            pattern: &leaf.pattern,
            params,
        })
    }

    /// Match a raw method and path, telling a wrong method apart from a
    /// missing route.
    pub fn lookup(&self, method: &str, path: &str) -> Result<RouteMatch<'_, T>, Error> {
        if let Some(found) = HttpMethod::from_str(method).and_then(|m| self.find(m, path)) {
            return Ok(found);
        }
        let other_method = HttpMethod::ALL
            .iter()
            .any(|m| m.as_str() != method.to_uppercase() && self.find(*m, path).is_some());
        if other_method {
            Err(Error::MethodNotAllowed(format!("{} {}", method, path)))
        } else {
            Err(Error::RouteNotFound(format!("{} {}", method, path)))
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(patterns: &[&str]) -> Router<String> {
        let mut router = Router::new();
        for pattern in patterns {
            router
                .add_route(HttpMethod::GET, pattern, pattern.to_string())
                .unwrap();
        }
        router
    }

    #[test]
    fn test_static_beats_param() {
        let router = build(&["/users/:id", "/users/static"]);
        let found = router.find(HttpMethod::GET, "/users/static").unwrap();
        assert_eq!(found.value, "/users/static");
        assert!(found.params.is_empty());

        let found = router.find(HttpMethod::GET, "/users/42").unwrap();
        assert_eq!(found.value, "/users/:id");
        assert_eq!(found.params.get("id"), Some("42"));
    }

    #[test]
    fn test_catch_all_captures_remainder() {
        let router = build(&["/files/*rest"]);
        let found = router.find(HttpMethod::GET, "/files/a/b/c").unwrap();
        assert_eq!(found.value, "/files/*rest");
        assert_eq!(found.params.get("rest"), Some("a/b/c"));
        assert!(router.find(HttpMethod::GET, "/files").is_none());
    }

    #[test]
    fn test_second_catch_all_conflicts() {
        let mut router = build(&["/files/*rest"]);
        let err = router
            .add_route(HttpMethod::GET, "/files/*path", "dup".to_string())
            .unwrap_err();
        assert!(matches!(err, RouteError::WildcardOverlap { .. }));
    }

    #[test]
    fn test_catch_all_and_static_cannot_share_position() {
        let mut router = build(&["/assets/logo.png"]);
        let err = router
            .add_route(HttpMethod::GET, "/assets/*file", "x".to_string())
            .unwrap_err();
        assert_eq!(
            err,
            RouteError::WildcardOverlap {
                method: "GET".into(),
                path: "/assets/*file".into(),
                existing: "/assets/logo.png".into(),
            }
        );

        let mut router = build(&["/public/*file"]);
        let err = router
            .add_route(HttpMethod::GET, "/public/index.html", "x".to_string())
            .unwrap_err();
        assert!(matches!(err, RouteError::WildcardOverlap { .. }));
    }

    #[test]
    fn test_catch_all_must_be_last() {
        let mut router: Router<()> = Router::new();
        let err = router
            .add_route(HttpMethod::GET, "/files/*rest/meta", ())
            .unwrap_err();
        assert!(matches!(err, RouteError::CatchAllNotLast { .. }));
    }

    #[test]
    fn test_duplicate_handle() {
        let mut router = build(&["/users/:id"]);
        let err = router
            .add_route(HttpMethod::GET, "/users/:id/", "x".to_string())
            .unwrap_err();
        assert!(matches!(err, RouteError::DuplicateHandle { .. }));
        assert!(router
            .add_route(HttpMethod::POST, "/users/:id", "post".to_string())
            .is_ok());
    }

    #[test]
    fn test_param_names_must_agree() {
        let mut router = build(&["/users/:id/posts"]);
        let err = router
            .add_route(HttpMethod::GET, "/users/:user_id/comments", "x".to_string())
            .unwrap_err();
        assert!(matches!(err, RouteError::ParamNameConflict { .. }));
    }

    #[test]
    fn test_backtracking_through_compressed_edges() {
        let router = build(&["/api/v1/users/me", "/api/:version/users/:id", "/api/v1/health"]);

        let found = router.find(HttpMethod::GET, "/api/v1/users/7").unwrap();
        assert_eq!(found.value, "/api/:version/users/:id");
        assert_eq!(found.params.get("version"), Some("v1"));
        assert_eq!(found.params.get("id"), Some("7"));

        assert_eq!(
            router.find(HttpMethod::GET, "/api/v1/users/me").unwrap().value,
            "/api/v1/users/me"
        );
        assert_eq!(
            router.find(HttpMethod::GET, "/api/v1/health").unwrap().value,
            "/api/v1/health"
        );
    }

    #[test]
    fn test_param_then_catch_all_fallback() {
        let router = build(&["/docs/:page", "/docs/*path"]);
        assert_eq!(router.find(HttpMethod::GET, "/docs/intro").unwrap().value, "/docs/:page");
        let deep = router.find(HttpMethod::GET, "/docs/guide/setup").unwrap();
        assert_eq!(deep.value, "/docs/*path");
        assert_eq!(deep.params.get("path"), Some("guide/setup"));
        assert!(deep.params.get("page").is_none());
    }

    #[test]
    fn test_params_are_percent_decoded() {
        let router = build(&["/tags/:name"]);
        let found = router.find(HttpMethod::GET, "/tags/hello%20world").unwrap();
        assert_eq!(found.params.get("name"), Some("hello world"));
    }

    #[test]
    fn test_plus_is_literal_in_paths() {
        let router = build(&["/tags/:name", "/files/*rest"]);
        let found = router.find(HttpMethod::GET, "/tags/c++").unwrap();
        assert_eq!(found.params.get("name"), Some("c++"));

        let rest = router.find(HttpMethod::GET, "/files/a+b/c%2Bd").unwrap();
        assert_eq!(rest.params.get("rest"), Some("a+b/c+d"));
    }

    #[test]
    fn test_lookup_distinguishes_method_not_allowed() {
        let router = build(&["/users"]);
        assert!(router.lookup("GET", "/users").is_ok());
        assert!(matches!(
            router.lookup("DELETE", "/users"),
            Err(Error::MethodNotAllowed(_))
        ));
        assert!(matches!(
            router.lookup("GET", "/missing"),
            Err(Error::RouteNotFound(_))
        ));
    }

    #[test]
    fn test_root_route() {
        let router = build(&["/"]);
        assert!(router.find(HttpMethod::GET, "/").is_some());
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("/api/", "/users/"), "/api/users");
        assert_eq!(join_paths("", ""), "/");
    }
}
