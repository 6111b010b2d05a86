//! Per-request state and its pool.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::params::Params;
use crate::response::Response;
use crate::router::Router;

/// Exclusive, mutable state for one request.
///
/// Carries the request itself, the matched [`Params`], the headers staged
/// for the eventual response, and the dispatch position. Contexts are pooled;
/// every field is reset before one is handed to the next request.
pub struct Context {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    pub(crate) params: Params,
    response_headers: HeaderMap,
    response: Option<Response>,
    done: bool,
    pub(crate) middleware_cursor: usize,
    pub(crate) handler_cursor: usize,
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Context {
    pub(crate) fn new() -> Self {
        Self {
            method: Method::GET,
            uri: Uri::default(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
            params: Params::new(),
            response_headers: HeaderMap::new(),
            response: None,
            done: false,
            middleware_cursor: 0,
            handler_cursor: 0,
            cancel: None,
            deadline: None,
        }
    }

    /// Builds a standalone context, handy for exercising a unit directly.
    pub fn from_request(req: http::Request<Bytes>) -> Self {
        let mut ctx = Self::new();
        ctx.fill(req, None, None, None);
        ctx
    }

    pub(crate) fn fill(
        &mut self,
        req: http::Request<Bytes>,
        remote_addr: Option<SocketAddr>,
        cancel: Option<CancellationToken>,
        deadline: Option<Instant>,
    ) {
        let (parts, body) = req.into_parts();
        self.method = parts.method;
        self.uri = parts.uri;
        self.headers = parts.headers;
        self.body = body;
        self.remote_addr = remote_addr;
        self.cancel = cancel;
        self.deadline = deadline;
    }

    /// Clears everything a previous request could have left behind.
    pub(crate) fn reset(&mut self) {
        self.method = Method::GET;
        self.uri = Uri::default();
        self.headers.clear();
        self.body = Bytes::new();
        self.remote_addr = None;
        self.params.clear();
        self.response_headers.clear();
        self.response = None;
        self.done = false;
        self.middleware_cursor = 0;
        self.handler_cursor = 0;
        self.cancel = None;
        self.deadline = None;
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }
    pub fn params(&self) -> &Params { &self.params }

    /// Header lookup; names are case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `ctx.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Best guess at the originating client: the first `X-Forwarded-For`
    /// hop, then `X-Real-IP`, then the peer address.
    pub fn client_ip(&self) -> Option<IpAddr> {
        let forwarded = self
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());

        forwarded
            .or_else(|| self.header("x-real-ip").and_then(|v| v.trim().parse().ok()))
            .or_else(|| self.remote_addr.map(|a| a.ip()))
    }

    /// Headers merged into whichever response ends up being written.
    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    /// Finalizes output for this request.
    ///
    /// Only the first write counts; later ones are dropped and `false` is
    /// returned. Once written, no further unit runs.
    pub fn write(&mut self, mut response: Response) -> bool {
        if self.done {
            tracing::debug!(path = self.path(), "response already written, dropping another");
            return false;
        }
        response.merge_staged(std::mem::take(&mut self.response_headers));
        self.response = Some(response);
        self.done = true;
        true
    }

    /// Whether a response has been written.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Whether the connection went away, the server is shutting down, or
    /// the request deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Looks this request up in `router`, capturing into the pooled params.
    pub(crate) fn resolve<'r, T>(&mut self, router: &'r Router<T>) -> Option<&'r T> {
        router.find(&self.method, self.uri.path(), &mut self.params)
    }

    pub(crate) fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    pub(crate) fn take_response_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.response_headers)
    }
}

/// Free list of reset contexts.
pub(crate) struct ContextPool {
    free: Mutex<Vec<Context>>,
    capacity: usize,
}

impl ContextPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { free: Mutex::new(Vec::new()), capacity }
    }

    /// Hands out a clean context, reusing a pooled one when available.
    pub(crate) fn acquire(&self) -> Context {
        self.free.lock().pop().unwrap_or_else(Context::new)
    }

    /// Resets `ctx` and keeps it for reuse, unless the pool is full.
    pub(crate) fn release(&self, mut ctx: Context) {
        ctx.reset();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(ctx);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use std::sync::Arc;

    fn request(uri: &str) -> http::Request<Bytes> {
        http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Bytes::from_static(b"payload"))
            .unwrap()
    }

    #[test]
    fn only_the_first_write_counts() {
        let mut ctx = Context::from_request(request("/a"));
        ctx.response_headers_mut().insert("x-staged", "1".parse().unwrap());

        assert!(ctx.write(Response::status(StatusCode::ACCEPTED)));
        assert!(!ctx.write(Response::status(StatusCode::CONFLICT)));
        assert!(ctx.is_done());

        let res = ctx.take_response().unwrap();
        assert_eq!(res.status_code(), StatusCode::ACCEPTED);
        assert_eq!(res.headers()["x-staged"], "1");
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let ctx = Context::from_request(request("/"));
        assert_eq!(ctx.client_ip(), Some("203.0.113.9".parse().unwrap()));

        let mut ctx = Context::new();
        ctx.fill(
            http::Request::new(Bytes::new()),
            Some("192.0.2.1:5000".parse().unwrap()),
            None,
            None,
        );
        assert_eq!(ctx.client_ip(), Some("192.0.2.1".parse().unwrap()));
    }

    #[test]
    fn cancellation_and_deadline() {
        let token = CancellationToken::new();
        let mut ctx = Context::new();
        ctx.fill(http::Request::new(Bytes::new()), None, Some(token.clone()), None);
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());

        let mut ctx = Context::new();
        ctx.fill(http::Request::new(Bytes::new()), None, None, Some(Instant::now()));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn released_contexts_come_back_clean() {
        let pool = ContextPool::new(4);
        let name: Arc<str> = Arc::from("id");

        let mut ctx = pool.acquire();
        ctx.fill(request("/users/1"), None, Some(CancellationToken::new()), None);
        ctx.params.push(&name, "1");
        ctx.middleware_cursor = 3;
        ctx.handler_cursor = 2;
        ctx.response_headers_mut().insert("x-left", "over".parse().unwrap());
        ctx.write(Response::text("first"));
        pool.release(ctx);
        assert_eq!(pool.idle(), 1);

        let ctx = pool.acquire();
        assert_eq!(pool.idle(), 0);
        assert!(ctx.params().is_empty());
        assert_eq!(ctx.param("id"), None);
        assert_eq!(ctx.middleware_cursor, 0);
        assert_eq!(ctx.handler_cursor, 0);
        assert!(!ctx.is_done());
        assert!(ctx.response.is_none());
        assert!(ctx.response_headers.is_empty());
        assert!(ctx.headers().is_empty());
        assert!(ctx.body().is_empty());
        assert_eq!(ctx.path(), "/");
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn pool_is_bounded() {
        let pool = ContextPool::new(1);
        pool.release(Context::new());
        pool.release(Context::new());
        assert_eq!(pool.idle(), 1);
    }
}
