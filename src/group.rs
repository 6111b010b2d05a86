//! Route registration through named, nestable groups.
//!
//! A group is a path prefix plus an ordered middleware list. Sub-groups
//! start from their parent's prefix and middleware and extend both:
//!
//! ```rust
//! use http::StatusCode;
//! use switchyard::{App, Context, Response};
//!
//! fn auth(ctx: &mut Context) -> Option<Response> {
//!     ctx.header("authorization").is_none().then(|| Response::status(StatusCode::UNAUTHORIZED))
//! }
//! fn list(_: &mut Context) -> &'static str { "[]" }
//! fn stats(_: &mut Context) -> &'static str { "{}" }
//!
//! # fn main() -> Result<(), switchyard::RouteError> {
//! let mut app = App::new();
//! let mut api = app.group("api", "/api");
//! api.get("/users", list)?;
//!
//! let mut admin = api.group("admin", "/admin");
//! admin.layer(auth);
//! admin.get("/stats", stats)?; // GET /api/admin/stats, behind `auth`
//! # Ok(())
//! # }
//! ```
//!
//! A group's middleware is read when a request runs, so a layer added after
//! a route still covers it. A sub-group copies its parent's list when it is
//! created and only sees its own layers from then on.

use std::sync::Arc;

use http::Method;
use tracing::debug;

use crate::chain::{Chain, Route};
use crate::handler::{BoxedHandler, Handler};
use crate::router::{self, RouteError, Router};

/// One registered route, as reported by [`App::routes`](crate::App::routes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteInfo {
    pub group: String,
    pub method: Method,
    pub path: String,
}

/// The root group's slot in [`RouteTable::groups`].
pub(crate) const ROOT: usize = 0;

struct GroupEntry {
    name: Arc<str>,
    middleware: Vec<BoxedHandler>,
}

/// Trie, per-group middleware and registration-ordered listing.
pub(crate) struct RouteTable {
    pub(crate) router: Router<Arc<Route>>,
    pub(crate) routes: Vec<RouteInfo>,
    groups: Vec<GroupEntry>,
}

impl RouteTable {
    pub(crate) fn new() -> Self {
        Self {
            router: Router::new(),
            routes: Vec::new(),
            groups: vec![GroupEntry { name: Arc::from(""), middleware: Vec::new() }],
        }
    }

    /// Opens a group whose middleware starts as a copy of `parent`'s.
    pub(crate) fn open(&mut self, parent: usize, name: &str) -> usize {
        let middleware = self.groups[parent].middleware.clone();
        self.groups.push(GroupEntry { name: Arc::from(name), middleware });
        self.groups.len() - 1
    }

    pub(crate) fn layer(&mut self, group: usize, middleware: BoxedHandler) {
        self.groups[group].middleware.push(middleware);
    }

    /// Middleware the route's group holds right now.
    pub(crate) fn middleware(&self, route: &Route) -> &[BoxedHandler] {
        &self.groups[route.group_id].middleware
    }
}

/// A registration scope borrowed from an [`App`](crate::App).
pub struct Group<'a> {
    table: &'a mut RouteTable,
    id: usize,
    prefix: String,
}

impl<'a> Group<'a> {
    pub(crate) fn new(table: &'a mut RouteTable, id: usize, prefix: String) -> Self {
        Self { table, id, prefix }
    }

    pub fn name(&self) -> &str {
        &self.table.groups[self.id].name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Appends middleware for every route in this group, including those
    /// already registered.
    pub fn layer(&mut self, middleware: impl Handler) -> &mut Self {
        self.table.layer(self.id, middleware.into_boxed_handler());
        self
    }

    /// A nested group under `path`, starting with this group's middleware.
    pub fn group(&mut self, name: &str, path: &str) -> Group<'_> {
        let id = self.table.open(self.id, name);
        let prefix = router::join(&self.prefix, path);
        Group::new(&mut *self.table, id, prefix)
    }

    /// Registers a handler chain for `method` at `path` under this group.
    pub fn route(
        &mut self,
        method: Method,
        path: &str,
        chain: Chain,
    ) -> Result<&mut Self, RouteError> {
        let pattern = router::join(&self.prefix, path);
        if chain.is_empty() {
            return Err(RouteError::EmptyChain { method, pattern });
        }

        let name = Arc::clone(&self.table.groups[self.id].name);
        let route = Route {
            group_id: self.id,
            group: Arc::clone(&name),
            method: method.clone(),
            pattern: pattern.clone(),
            handlers: chain.handlers.into_boxed_slice(),
        };
        self.table.router.insert(method.clone(), &pattern, Arc::new(route))?;

        debug!(group = %name, %method, path = %pattern, "route registered");
        self.table.routes.push(RouteInfo { group: name.to_string(), method, path: pattern });
        Ok(self)
    }

    pub fn get(&mut self, path: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::GET, path, Chain::new().then(handler))
    }

    pub fn post(&mut self, path: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::POST, path, Chain::new().then(handler))
    }

    pub fn put(&mut self, path: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::PUT, path, Chain::new().then(handler))
    }

    pub fn patch(&mut self, path: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::PATCH, path, Chain::new().then(handler))
    }

    pub fn delete(&mut self, path: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::DELETE, path, Chain::new().then(handler))
    }

    pub fn head(&mut self, path: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::HEAD, path, Chain::new().then(handler))
    }

    pub fn options(&mut self, path: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.route(Method::OPTIONS, path, Chain::new().then(handler))
    }
}
