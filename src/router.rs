// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Routing.
//!
//! A [`Router`] is a composable subtree of the server pipeline scoped to a
//! mount path. It carries its own pre-route handlers, response filters,
//! error handlers, lifecycle hooks and nested routers; when a parent
//! dispatches into it, the mount prefix is stripped from the request path
//! first, and on the way out the router's own filters and error handlers
//! run in sub-scope.
//!
//! Route paths are sequences of literal segments, `:name` single-segment
//! parameters, and at most one trailing `*name` tail capture. Matching
//! prefers literal over `:param` over `*tail` segment-by-segment; among
//! equally specific routes the earliest registration wins.
//!
//! # Example
//!
//! ```
//! use scamper::router::Router;
//! use scamper::HttpResponse;
//!
//! let router = Router::new()
//!     .get("/messages/:id", |req: scamper::HttpRequest| {
//!         let id = req.path_param_int("id")?;
//!         Ok(HttpResponse::text(format!("message {}", id)))
//!     })
//!     .unwrap();
//! ```

use std::mem;

use crate::error::{Error, Result};
use crate::filters::{ErrorHandler, Handled, RequestHandler, ResponseFilter};
use crate::message::Message;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::server::lifecycle::LifecycleHook;
use crate::uri::{decode_segment, Target};

/// A terminal handler bound to one route.
pub trait RouteHandler: Send + Sync {
    fn serve(&self, request: HttpRequest) -> Result<HttpResponse>;
}

impl<F> RouteHandler for F
where
    F: Fn(HttpRequest) -> Result<HttpResponse> + Send + Sync,
{
    fn serve(&self, request: HttpRequest) -> Result<HttpResponse> {
        self(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Tail(String),
}

#[derive(Debug, Clone)]
struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    fn compile(path: &str) -> Result<PathPattern> {
        if !path.starts_with('/') {
            return Err(Error::MalformedUri(format!("route path not absolute: {}", path)));
        }

        let mut segments = Vec::new();
        let raw: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for (idx, piece) in raw.iter().enumerate() {
            if let Some(name) = piece.strip_prefix(':') {
                if name.is_empty() {
                    return Err(Error::MalformedUri(format!("unnamed parameter in {}", path)));
                }
                segments.push(Segment::Param(name.to_owned()));
            } else if let Some(name) = piece.strip_prefix('*') {
                if name.is_empty() {
                    return Err(Error::MalformedUri(format!("unnamed tail in {}", path)));
                }
                if idx + 1 != raw.len() {
                    return Err(Error::MalformedUri(format!(
                        "tail capture must be the last segment: {}",
                        path
                    )));
                }
                segments.push(Segment::Tail(name.to_owned()));
            } else if *piece == ".." {
                return Err(Error::MalformedUri(format!("route path escapes: {}", path)));
            } else {
                segments.push(Segment::Literal((*piece).to_owned()));
            }
        }

        Ok(PathPattern { segments })
    }

    // On a match, returns decoded `(name, value)` captures plus the
    // specificity vector used to rank competing routes (literal=2,
    // param=1, tail=0 per segment).
    fn matches(&self, path: &str) -> Option<(Vec<(String, String)>, Vec<u8>)> {
        let pieces: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut params = Vec::new();
        let mut specificity = Vec::with_capacity(self.segments.len());

        let mut pos = 0;
        for segment in &self.segments {
            match segment {
                Segment::Literal(expected) => {
                    if pieces.get(pos) != Some(&expected.as_str()) {
                        return None;
                    }
                    specificity.push(2);
                    pos += 1;
                }
                Segment::Param(name) => {
                    let piece = pieces.get(pos)?;
                    params.push((name.clone(), decode_segment(piece)));
                    specificity.push(1);
                    pos += 1;
                }
                Segment::Tail(name) => {
                    // One or more remaining segments, slashes included.
                    if pos >= pieces.len() {
                        return None;
                    }
                    let tail = pieces[pos..]
                        .iter()
                        .map(|p| decode_segment(p))
                        .collect::<Vec<_>>()
                        .join("/");
                    params.push((name.clone(), tail));
                    specificity.push(0);
                    pos = pieces.len();
                }
            }
        }

        if pos != pieces.len() {
            return None;
        }
        Some((params, specificity))
    }
}

struct Route {
    method: Option<String>,
    pattern: PathPattern,
    handler: Box<dyn RouteHandler>,
}

/// A mountable group of routes with its own scope.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    handlers: Vec<Box<dyn RequestHandler>>,
    filters: Vec<Box<dyn ResponseFilter>>,
    error_handlers: Vec<Box<dyn ErrorHandler>>,
    hooks: Vec<Box<dyn LifecycleHook>>,
    subrouters: Vec<(String, Router)>,
}

impl Router {
    pub fn new() -> Router {
        Router::default()
    }

    /// Registers a route. `method` of `None` matches any method.
    pub fn route<H>(mut self, method: Option<&str>, path: &str, handler: H) -> Result<Router>
    where
        H: RouteHandler + 'static,
    {
        self.routes.push(Route {
            method: method.map(str::to_owned),
            pattern: PathPattern::compile(path)?,
            handler: Box::new(handler),
        });
        Ok(self)
    }

    pub fn get<H>(self, path: &str, handler: H) -> Result<Router>
    where
        H: RouteHandler + 'static,
    {
        self.route(Some("GET"), path, handler)
    }

    pub fn post<H>(self, path: &str, handler: H) -> Result<Router>
    where
        H: RouteHandler + 'static,
    {
        self.route(Some("POST"), path, handler)
    }

    pub fn put<H>(self, path: &str, handler: H) -> Result<Router>
    where
        H: RouteHandler + 'static,
    {
        self.route(Some("PUT"), path, handler)
    }

    pub fn delete<H>(self, path: &str, handler: H) -> Result<Router>
    where
        H: RouteHandler + 'static,
    {
        self.route(Some("DELETE"), path, handler)
    }

    /// Registers a route matching every method.
    pub fn any<H>(self, path: &str, handler: H) -> Result<Router>
    where
        H: RouteHandler + 'static,
    {
        self.route(None, path, handler)
    }

    /// Appends a pre-route request handler scoped to this router.
    pub fn incoming<H>(mut self, handler: H) -> Router
    where
        H: RequestHandler + 'static,
    {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Appends a response filter scoped to this router.
    pub fn outgoing<F>(mut self, filter: F) -> Router
    where
        F: ResponseFilter + 'static,
    {
        self.filters.push(Box::new(filter));
        self
    }

    /// Appends an error handler scoped to this router.
    pub fn recover<E>(mut self, handler: E) -> Router
    where
        E: ErrorHandler + 'static,
    {
        self.error_handlers.push(Box::new(handler));
        self
    }

    /// Appends a lifecycle hook; adopted by the server at mount time.
    pub fn trigger<L>(mut self, hook: L) -> Router
    where
        L: LifecycleHook + 'static,
    {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Nests another router under `prefix`.
    pub fn mount(mut self, prefix: &str, router: Router) -> Result<Router> {
        validate_mount_path(prefix)?;
        self.subrouters.push((prefix.to_owned(), router));
        Ok(self)
    }

    /// Serves files from `directory` under `prefix`. A request for the
    /// prefix itself redirects to `prefix/index` when an index is given.
    pub fn files(
        self,
        prefix: &str,
        directory: impl Into<std::path::PathBuf>,
        index: Option<&str>,
    ) -> Result<Router> {
        validate_mount_path(prefix)?;
        let server = crate::static_files::FileServer::new(directory);

        let mut router = self;
        if let Some(index) = index {
            let location = format!("{}/{}", prefix.trim_end_matches('/'), index);
            router = router.route(Some("GET"), prefix, move |_req: HttpRequest| {
                HttpResponse::redirect(303, &location)
            })?;
        }
        let pattern = format!("{}/*path", prefix.trim_end_matches('/'));
        router.route(Some("GET"), &pattern, move |req: HttpRequest| {
            let tail = req.path_param("path").unwrap_or("");
            server.serve(tail)
        })
    }

    /// Converts this router into a pipeline handler mounted at
    /// `mount_path`, surrendering the lifecycle hooks collected across the
    /// whole subtree.
    pub(crate) fn mount_at(
        mut self,
        mount_path: &str,
    ) -> Result<(Box<dyn RequestHandler>, Vec<Box<dyn LifecycleHook>>)> {
        validate_mount_path(mount_path)?;
        let hooks = self.take_hooks();
        Ok((
            Box::new(MountedRouter {
                mount: mount_path.to_owned(),
                router: self,
            }),
            hooks,
        ))
    }

    fn take_hooks(&mut self) -> Vec<Box<dyn LifecycleHook>> {
        let mut hooks = mem::take(&mut self.hooks);
        for (_, sub) in &mut self.subrouters {
            hooks.extend(sub.take_hooks());
        }
        hooks
    }

    // Dispatches within this scope. `path` is the request path with every
    // enclosing mount prefix already stripped. Returns `Next` with the
    // caller's request untouched when nothing here matches.
    fn dispatch(&self, request: HttpRequest, path: &str) -> Result<Handled> {
        let original = request.clone();
        let scoped = rewrite_path(request, path);

        let result = self.dispatch_scoped(scoped, path);
        match result {
            Ok(Handled::Next(_)) => Ok(Handled::Next(original)),
            Ok(Handled::Done(response)) => Ok(Handled::Done(response)),
            Err(Error::ResponseAborted) => Err(Error::ResponseAborted),
            Err(e) => {
                for handler in &self.error_handlers {
                    if let Some(response) = handler.recover(&e, &original) {
                        return Ok(Handled::Done(self.apply_filters(response)?));
                    }
                }
                Err(e)
            }
        }
    }

    fn dispatch_scoped(&self, request: HttpRequest, path: &str) -> Result<Handled> {
        let mut current = request;

        for handler in &self.handlers {
            match handler.handle(current)? {
                Handled::Next(next) => current = next,
                Handled::Done(response) => {
                    return Ok(Handled::Done(self.apply_filters(response)?))
                }
            }
        }

        if let Some((route, params)) = self.best_route(current.method(), path) {
            let decorated = current.map_attributes(|a| a.set_path_params(params));
            let response = route.handler.serve(decorated)?;
            return Ok(Handled::Done(self.apply_filters(response)?));
        }

        for (prefix, sub) in &self.subrouters {
            if let Some(rest) = strip_prefix(path, prefix) {
                match sub.dispatch(current, &rest)? {
                    Handled::Done(response) => {
                        return Ok(Handled::Done(self.apply_filters(response)?))
                    }
                    Handled::Next(back) => current = back,
                }
            }
        }

        Ok(Handled::Next(current))
    }

    // First-registered among the most specific matching routes.
    fn best_route(&self, method: &str, path: &str) -> Option<(&Route, Vec<(String, String)>)> {
        let mut best: Option<(&Route, Vec<(String, String)>, Vec<u8>)> = None;

        for route in &self.routes {
            if let Some(required) = &route.method {
                if !required.eq_ignore_ascii_case(method) {
                    continue;
                }
            }
            if let Some((params, specificity)) = route.pattern.matches(path) {
                let better = match &best {
                    None => true,
                    Some((_, _, existing)) => specificity > *existing,
                };
                if better {
                    best = Some((route, params, specificity));
                }
            }
        }

        best.map(|(route, params, _)| (route, params))
    }

    fn apply_filters(&self, mut response: HttpResponse) -> Result<HttpResponse> {
        for filter in &self.filters {
            response = filter.filter(response)?;
        }
        Ok(response)
    }
}

struct MountedRouter {
    mount: String,
    router: Router,
}

impl RequestHandler for MountedRouter {
    fn handle(&self, request: HttpRequest) -> Result<Handled> {
        match strip_prefix(request.path(), &self.mount) {
            Some(rest) => self.router.dispatch(request, &rest),
            None => Ok(Handled::Next(request)),
        }
    }
}

/// Mount paths are rooted, parameter-free and cannot escape upward.
fn validate_mount_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(Error::MalformedUri(format!("mount path not absolute: {}", path)));
    }
    for piece in path.split('/') {
        if piece.starts_with(':') || piece.starts_with('*') {
            return Err(Error::MalformedUri(format!(
                "mount path cannot carry parameters: {}",
                path
            )));
        }
        if piece == ".." {
            return Err(Error::MalformedUri(format!("mount path escapes: {}", path)));
        }
    }
    Ok(())
}

// `/app` strips from `/app` and `/app/x` but never from `/apple`.
fn strip_prefix(path: &str, prefix: &str) -> Option<String> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(path.to_owned());
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/".to_owned())
    } else if rest.starts_with('/') {
        Some(rest.to_owned())
    } else {
        None
    }
}

fn rewrite_path(request: HttpRequest, path: &str) -> HttpRequest {
    let query = request.query().map(str::to_owned);
    request.with_target(Target::Origin {
        path: path.to_owned(),
        query,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(router: &Router, method: &str, path: &str) -> Result<Handled> {
        let request = HttpRequest::fake(method, path, &[], b"");
        let rest = path.to_owned();
        router.dispatch(request, &rest)
    }

    fn body_of(handled: Handled) -> String {
        match handled {
            Handled::Done(response) => {
                String::from_utf8(response.entity().read_to_bytes(1024).unwrap()).unwrap()
            }
            Handled::Next(_) => panic!("expected a response"),
        }
    }

    fn echo_param(name: &'static str) -> impl RouteHandler {
        move |req: HttpRequest| {
            Ok(HttpResponse::text(
                req.path_param(name).unwrap_or("<none>").to_owned(),
            ))
        }
    }

    #[test]
    fn literal_beats_param_beats_tail() {
        let router = Router::new()
            .get("/m/*tail", echo_param("tail"))
            .unwrap()
            .get("/m/:id", echo_param("id"))
            .unwrap()
            .get("/m/latest", |_req: HttpRequest| Ok(HttpResponse::text("literal")))
            .unwrap();

        assert_eq!(body_of(handle(&router, "GET", "/m/latest").unwrap()), "literal");
        assert_eq!(body_of(handle(&router, "GET", "/m/7").unwrap()), "7");
        assert_eq!(
            body_of(handle(&router, "GET", "/m/7/replies/2").unwrap()),
            "7/replies/2"
        );
    }

    #[test]
    fn first_registered_wins_ties() {
        let router = Router::new()
            .get("/x/:a", echo_param("a"))
            .unwrap()
            .get("/x/:b", echo_param("b"))
            .unwrap();

        assert_eq!(body_of(handle(&router, "GET", "/x/1").unwrap()), "1");
    }

    #[test]
    fn method_filter() {
        let router = Router::new()
            .get("/r", |_r: HttpRequest| Ok(HttpResponse::text("get")))
            .unwrap()
            .post("/r", |_r: HttpRequest| Ok(HttpResponse::text("post")))
            .unwrap();

        assert_eq!(body_of(handle(&router, "POST", "/r").unwrap()), "post");
        assert!(matches!(handle(&router, "DELETE", "/r").unwrap(), Handled::Next(_)));
    }

    #[test]
    fn tail_requires_at_least_one_segment() {
        let router = Router::new().get("/files/*rest", echo_param("rest")).unwrap();
        assert!(matches!(handle(&router, "GET", "/files").unwrap(), Handled::Next(_)));
        assert_eq!(body_of(handle(&router, "GET", "/files/a").unwrap()), "a");
    }

    #[test]
    fn params_are_percent_decoded() {
        let router = Router::new().get("/m/:id", echo_param("id")).unwrap();
        assert_eq!(body_of(handle(&router, "GET", "/m/a%20b").unwrap()), "a b");
    }

    #[test]
    fn bad_patterns_rejected() {
        assert!(Router::new().get("relative", echo_param("x")).is_err());
        assert!(Router::new().get("/a/*t/b", echo_param("t")).is_err());
        assert!(Router::new().get("/a/:", echo_param("x")).is_err());
        assert!(Router::new().get("/a/../b", echo_param("x")).is_err());
    }

    #[test]
    fn mount_path_validation() {
        assert!(validate_mount_path("/api/v1").is_ok());
        assert!(validate_mount_path("api").is_err());
        assert!(validate_mount_path("/api/:v").is_err());
        assert!(validate_mount_path("/api/../x").is_err());
    }

    #[test]
    fn nested_router_strips_prefix() {
        let inner = Router::new()
            .get("/messages/:id", |req: HttpRequest| {
                // The enclosing mount prefix is gone by the time the inner
                // scope sees the path.
                assert!(req.path().starts_with("/messages"));
                Ok(HttpResponse::text(req.path_param("id").unwrap().to_owned()))
            })
            .unwrap();
        let outer = Router::new().mount("/api", inner).unwrap();

        assert_eq!(body_of(handle(&outer, "GET", "/api/messages/5").unwrap()), "5");
        assert!(matches!(
            handle(&outer, "GET", "/other/messages/5").unwrap(),
            Handled::Next(_)
        ));
    }

    #[test]
    fn sub_scope_filters_apply_to_sub_responses() {
        use crate::headers::Header;

        let inner = Router::new()
            .get("/x", |_r: HttpRequest| Ok(HttpResponse::text("inner")))
            .unwrap()
            .outgoing(|res: HttpResponse| Ok(res.with_set_header(Header::known("X-Scope", "inner"))));
        let outer = Router::new()
            .mount("/api", inner)
            .unwrap()
            .outgoing(|res: HttpResponse| {
                let prior = res.header("X-Scope").unwrap_or("none").to_owned();
                Ok(res.with_set_header(Header::known("X-Scope", format!("{}+outer", prior))))
            });

        match handle(&outer, "GET", "/api/x").unwrap() {
            Handled::Done(response) => {
                assert_eq!(response.header("X-Scope"), Some("inner+outer"));
            }
            Handled::Next(_) => panic!("expected response"),
        }
    }

    #[test]
    fn sub_scope_error_handler_recovers() {
        let inner = Router::new()
            .get("/boom", |_r: HttpRequest| -> Result<HttpResponse> {
                Err(Error::ParameterNotConvertible { name: "id".into() })
            })
            .unwrap()
            .recover(|e: &Error, _r: &HttpRequest| {
                matches!(e, Error::ParameterNotConvertible { .. })
                    .then(|| HttpResponse::empty(400))
            });
        let outer = Router::new().mount("/api", inner).unwrap();

        match handle(&outer, "GET", "/api/boom").unwrap() {
            Handled::Done(response) => assert_eq!(response.code(), 400),
            Handled::Next(_) => panic!("expected response"),
        }
    }

    #[test]
    fn unrecovered_sub_error_propagates() {
        let inner = Router::new()
            .get("/boom", |_r: HttpRequest| -> Result<HttpResponse> {
                Err(Error::ResponseAborted)
            })
            .unwrap()
            .recover(|_e: &Error, _r: &HttpRequest| Some(HttpResponse::empty(400)));
        let outer = Router::new().mount("/api", inner).unwrap();

        // ResponseAborted is never recovered, even by a matching handler.
        assert!(matches!(
            handle(&outer, "GET", "/api/boom"),
            Err(Error::ResponseAborted)
        ));
    }

    #[test]
    fn mount_prefix_does_not_match_partial_segment() {
        assert_eq!(strip_prefix("/apple", "/app"), None);
        assert_eq!(strip_prefix("/app", "/app").as_deref(), Some("/"));
        assert_eq!(strip_prefix("/app/x", "/app").as_deref(), Some("/x"));
        assert_eq!(strip_prefix("/x", "/").as_deref(), Some("/x"));
    }
}
