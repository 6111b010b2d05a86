//! Admission middleware on top of [`Limiters`].

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::StatusCode;
use tracing::warn;

use crate::context::Context;
use crate::handler::Handler;
use crate::ratelimit::{Limiters, Limits, Sweeper};
use crate::response::Response;

const X_RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-rate-limit-limit");
const X_RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-rate-limit-remaining");
const X_RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-rate-limit-reset");

/// Derives the caller key from a request.
pub type KeyFn = Arc<dyn Fn(&Context) -> String + Send + Sync + 'static>;

/// Settings for [`RateLimit`].
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub limits: Limits,
    /// Advertise `X-Rate-Limit-*` and `Retry-After` headers.
    pub set_headers: bool,
    /// Limiters untouched for longer than this are evicted.
    pub idle_timeout: Duration,
    /// How often the eviction sweep runs.
    pub sweep_interval: Duration,
}

impl RateLimitConfig {
    /// Headers on, 90 minute idle timeout, 25 minute sweep interval.
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            set_headers: true,
            idle_timeout: Duration::from_secs(90 * 60),
            sweep_interval: Duration::from_secs(25 * 60),
        }
    }
}

/// Throttles callers, answering `429 Too Many Requests` once any window is
/// exhausted.
///
/// The caller key defaults to [`Context::client_ip`]; override it with
/// [`key_fn`](RateLimit::key_fn).
///
/// ```rust,no_run
/// use switchyard::middleware::{RateLimit, RateLimitConfig};
/// use switchyard::ratelimit::Limits;
/// use switchyard::App;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut app = App::new();
/// let limit = RateLimit::new(RateLimitConfig::new(Limits::new(5, 100, 1000)))
///     .key_fn(|ctx| ctx.header("x-api-key").unwrap_or("anonymous").to_owned());
/// app.layer(limit.into_handler());
/// # }
/// ```
pub struct RateLimit {
    limiters: Arc<Limiters>,
    key_fn: Option<KeyFn>,
    set_headers: bool,
    limit_header: HeaderValue,
    _sweeper: Option<Sweeper>,
}

impl RateLimit {
    /// Builds the registry and, inside a Tokio runtime, starts its eviction
    /// task. The task stops when this middleware is dropped.
    pub fn new(config: RateLimitConfig) -> Self {
        let limiters = Arc::new(Limiters::new(config.limits));

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(_) => Some(limiters.spawn_sweeper(config.sweep_interval, config.idle_timeout)),
            Err(_) => {
                warn!("no tokio runtime, idle rate limiters will not be evicted");
                None
            }
        };

        let l = config.limits;
        Self {
            limiters,
            key_fn: None,
            set_headers: config.set_headers,
            limit_header: triple(l.per_second, l.per_minute, l.per_hour),
            _sweeper: sweeper,
        }
    }

    pub fn key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(f));
        self
    }

    pub fn limiters(&self) -> &Arc<Limiters> {
        &self.limiters
    }

    /// Admits or rejects the request behind `ctx`.
    ///
    /// `None` lets dispatch continue; `Some` is the 429 to send.
    pub fn check(&self, ctx: &mut Context) -> Option<Response> {
        let key = match &self.key_fn {
            Some(f) => f(ctx),
            None => ctx
                .client_ip()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_owned()),
        };

        let limiter = self.limiters.get(&key);
        let decision = limiter.allowed();

        if self.set_headers {
            let left = limiter.remaining();
            let headers = ctx.response_headers_mut();
            headers.insert(X_RATE_LIMIT_LIMIT, self.limit_header.clone());
            headers.insert(X_RATE_LIMIT_REMAINING, triple(left.second, left.minute, left.hour));
        }

        let err = decision.err()?;
        warn!(key, window = %err.window, retry_after = ?err.retry_after, "rate limit exceeded");

        let mut res = Response::error(StatusCode::TOO_MANY_REQUESTS, err.to_string());
        if self.set_headers {
            let retry = HeaderValue::from(err.retry_after_secs());
            res.headers_mut().insert(X_RATE_LIMIT_RESET, retry.clone());
            res.headers_mut().insert(RETRY_AFTER, retry);
        }
        Some(res)
    }

    /// Wraps this middleware as a dispatch unit.
    pub fn into_handler(self) -> impl Handler {
        move |ctx: &mut Context| self.check(ctx)
    }
}

/// `"{s}s, {m}m, {h}h"`.
fn triple(s: impl Display, m: impl Display, h: impl Display) -> HeaderValue {
    HeaderValue::try_from(format!("{s}s, {m}m, {h}h"))
        .unwrap_or_else(|_| HeaderValue::from_static(""))
}
