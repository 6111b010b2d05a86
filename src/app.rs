//! The application: route table, fallbacks and the per-request entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chain::{self, Chain, Fault, FaultHandler, Frame, Phase};
use crate::context::{Context, ContextPool};
use crate::group::{Group, ROOT, RouteInfo, RouteTable};
use crate::handler::{BoxedHandler, Handler};
use crate::response::Response;
use crate::router::{self, RouteError};

/// Application-level settings.
#[derive(Clone, Debug)]
pub struct Config {
    /// Upper bound on idle contexts kept for reuse.
    pub pool_capacity: usize,
    /// Deadline for one dispatch run, checked between units.
    pub request_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self { pool_capacity: 1024, request_timeout: None }
    }
}

/// Routes, group middleware, and the not-found and fault fallbacks.
///
/// Build it once at startup, then hand it to [`Server::serve`](crate::Server::serve)
/// or call [`dispatch`](App::dispatch) from your own transport. Registration
/// takes `&mut self`; serving only needs `&self`.
///
/// ```rust
/// use bytes::Bytes;
/// use switchyard::{App, Context};
///
/// fn get_user(ctx: &mut Context) -> String {
///     format!("user {}", ctx.param("id").unwrap_or("?"))
/// }
///
/// # fn main() -> Result<(), switchyard::RouteError> {
/// let mut app = App::new();
/// app.get("/users/:id", get_user)?;
///
/// let req = http::Request::get("/users/42").body(Bytes::new()).unwrap();
/// assert_eq!(app.dispatch(req).body(), "user 42");
/// # Ok(())
/// # }
/// ```
pub struct App {
    table: RouteTable,
    not_found: Option<BoxedHandler>,
    faults: FaultHandler,
    pool: ContextPool,
    config: Config,
}

impl App {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            table: RouteTable::new(),
            not_found: None,
            faults: Arc::new(chain::default_fault_handler),
            pool: ContextPool::new(config.pool_capacity),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Appends root middleware. Covers every route registered on the app
    /// itself, before or after this call, and groups opened afterwards.
    pub fn layer(&mut self, middleware: impl Handler) -> &mut Self {
        self.table.layer(ROOT, middleware.into_boxed_handler());
        self
    }

    /// Opens a named group under `prefix`, starting with the root middleware
    /// registered so far.
    pub fn group(&mut self, name: &str, prefix: &str) -> Group<'_> {
        let id = self.table.open(ROOT, name);
        Group::new(&mut self.table, id, router::join("", prefix))
    }

    /// The unnamed root group.
    pub fn root(&mut self) -> Group<'_> {
        Group::new(&mut self.table, ROOT, router::join("", "/"))
    }

    pub fn route(
        &mut self,
        method: Method,
        path: &str,
        chain: Chain,
    ) -> Result<&mut Self, RouteError> {
        self.root().route(method, path, chain)?;
        Ok(self)
    }

    pub fn get(&mut self, path: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.root().get(path, handler)?;
        Ok(self)
    }

    pub fn post(&mut self, path: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.root().post(path, handler)?;
        Ok(self)
    }

    pub fn put(&mut self, path: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.root().put(path, handler)?;
        Ok(self)
    }

    pub fn patch(&mut self, path: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.root().patch(path, handler)?;
        Ok(self)
    }

    pub fn delete(&mut self, path: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.root().delete(path, handler)?;
        Ok(self)
    }

    /// Replaces the default JSON 404.
    ///
    /// The handler sees an empty [`Params`](crate::Params). If it returns
    /// nothing and writes nothing, the default 404 is sent.
    pub fn not_found(&mut self, handler: impl Handler) -> &mut Self {
        self.not_found = Some(handler.into_boxed_handler());
        self
    }

    /// Replaces the default fault handler (log, then JSON 500).
    pub fn on_fault<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut Context, &Fault) -> Response + Send + Sync + 'static,
    {
        self.faults = Arc::new(handler);
        self
    }

    /// Every registered `(group, method, path)`, in registration order.
    pub fn routes(&self) -> &[RouteInfo] {
        &self.table.routes
    }

    /// Routes and runs one request. Always yields a response.
    pub fn dispatch(&self, req: http::Request<Bytes>) -> Response {
        self.dispatch_with(req, None, None)
    }

    /// [`dispatch`](App::dispatch) with the peer address and a cancellation
    /// token supplied by the transport.
    pub fn dispatch_with(
        &self,
        req: http::Request<Bytes>,
        remote_addr: Option<SocketAddr>,
        cancel: Option<CancellationToken>,
    ) -> Response {
        let deadline = self.config.request_timeout.map(|t| Instant::now() + t);
        let mut ctx = self.pool.acquire();
        ctx.fill(req, remote_addr, cancel, deadline);

        match ctx.resolve(&self.table.router) {
            Some(route) => {
                let middleware = self.table.middleware(route);
                chain::run(route, middleware, &mut ctx, &self.faults);
            }
            None => self.run_not_found(&mut ctx),
        }

        let response = finish(&mut ctx);
        self.pool.release(ctx);
        response
    }

    fn run_not_found(&self, ctx: &mut Context) {
        debug!(method = %ctx.method(), path = ctx.path(), "no route matched");
        if ctx.is_cancelled() {
            return;
        }

        let outcome = match &self.not_found {
            Some(unit) => {
                let method = ctx.method().clone();
                let path = ctx.path().to_owned();
                chain::invoke(unit, ctx, &self.faults, move || Frame {
                    group: Arc::from(""),
                    method,
                    pattern: path,
                    phase: Phase::NotFound,
                    index: 0,
                    location: None,
                })
            }
            None => None,
        };

        if !ctx.is_done() {
            let response =
                outcome.unwrap_or_else(|| Response::error(StatusCode::NOT_FOUND, "not found"));
            ctx.write(response);
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

/// Takes whatever the run produced, filling the gaps: 503 if it was
/// cancelled first, otherwise an empty 200.
fn finish(ctx: &mut Context) -> Response {
    if let Some(response) = ctx.take_response() {
        return response;
    }

    let mut response = if ctx.is_cancelled() {
        debug!(path = ctx.path(), "request cancelled before a response was written");
        Response::error(StatusCode::SERVICE_UNAVAILABLE, "request cancelled")
    } else {
        Response::status(StatusCode::OK)
    };
    response.merge_staged(ctx.take_response_headers());
    response
}
