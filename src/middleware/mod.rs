//! Built-in middleware.
//!
//! Middleware is an ordinary dispatch unit registered with
//! [`Group::layer`](crate::Group::layer) or [`App::layer`](crate::App::layer).
//! It runs before the route's handlers and stops the request by returning a
//! response.
//!
//! - [`RateLimit`]: per-caller admission over second, minute and hour windows.

mod rate_limit;

pub use rate_limit::{KeyFn, RateLimit, RateLimitConfig};
