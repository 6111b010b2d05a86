//! # switchyard
//!
//! The request-dispatch core of an HTTP service: a segment trie that maps
//! `(method, path)` to a handler chain, a two-phase middleware/handler
//! pipeline, and a multi-window rate limiter keyed by caller.
//!
//! ## Routing
//!
//! Patterns are made of `/`-separated segments. A segment is static
//! (`users`), a named parameter (`:id`) or, in last position only, a
//! wildcard (`*path`) that captures the rest of the path. When more than one
//! kind could match, static wins over named, and named over wildcard.
//! Conflicting registrations are rejected up front with a [`RouteError`].
//!
//! ## Dispatch
//!
//! Middleware and handlers are both plain synchronous functions of a
//! [`Context`]. Returning a response stops the chain; returning nothing lets
//! the next unit run. Panics are contained and turned into a 500 by the
//! fault handler.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use switchyard::middleware::{RateLimit, RateLimitConfig};
//! use switchyard::ratelimit::Limits;
//! use switchyard::{App, Context, Response, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), switchyard::Error> {
//!     let mut app = App::new();
//!     app.layer(RateLimit::new(RateLimitConfig::new(Limits::new(10, 300, 5000))).into_handler());
//!     app.get("/users/:id", get_user)?;
//!
//!     let mut files = app.group("files", "/files");
//!     files.get("/*path", get_file)?;
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! fn get_user(ctx: &mut Context) -> Response {
//!     let id = ctx.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//!
//! fn get_file(ctx: &mut Context) -> String {
//!     format!("would serve {}", ctx.param("path").unwrap_or(""))
//! }
//! ```

mod app;
mod chain;
mod context;
mod error;
mod group;
mod handler;
mod params;
mod response;
mod server;

pub mod middleware;
pub mod ratelimit;
pub mod router;

pub use app::{App, Config};
pub use chain::{Chain, Fault, FaultHandler, Frame, PanicLocation, Phase, default_fault_handler};
pub use context::Context;
pub use error::Error;
pub use group::{Group, RouteInfo};
pub use handler::{Handler, IntoOutcome};
pub use params::Params;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{RouteError, Router};
pub use server::Server;
