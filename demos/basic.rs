//! Minimal switchyard example: JSON endpoints, a group with auth middleware,
//! a wildcard route and per-IP rate limiting.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/42
//!   curl -i -X POST http://localhost:3000/users -d '{"name":"alice"}'
//!   curl -i http://localhost:3000/admin/stats -H 'authorization: Bearer demo'
//!   curl -i http://localhost:3000/static/css/site.css
//!   for i in $(seq 1 10); do curl -s -o /dev/null -w '%{http_code}\n' localhost:3000/users/1; done

use http::StatusCode;
use switchyard::middleware::{RateLimit, RateLimitConfig};
use switchyard::ratelimit::Limits;
use switchyard::{App, Context, Response, Server};

#[tokio::main]
async fn main() -> Result<(), switchyard::Error> {
    tracing_subscriber::fmt::init();

    let mut app = App::new();
    app.layer(RateLimit::new(RateLimitConfig::new(Limits::new(5, 100, 1000))).into_handler());

    app.get("/users/:id", get_user)?
        .post("/users", create_user)?
        .delete("/users/:id", delete_user)?
        .get("/static/*path", static_file)?;

    let mut admin = app.group("admin", "/admin");
    admin.layer(require_auth);
    admin.get("/stats", stats)?;

    app.not_found(|ctx: &mut Context| {
        Response::error(StatusCode::NOT_FOUND, format!("nothing at {}", ctx.path()))
    });

    for r in app.routes() {
        tracing::info!(group = %r.group, method = %r.method, path = %r.path, "route");
    }

    Server::bind("0.0.0.0:3000")?.serve(app).await
}

// GET /users/:id
fn get_user(ctx: &mut Context) -> Response {
    let id = ctx.param("id").unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#))
}

// POST /users
//
// ctx.body() is the collected request body; parse it however you like.
fn create_user(ctx: &mut Context) -> Response {
    if ctx.body().is_empty() {
        return Response::error(StatusCode::BAD_REQUEST, "empty body");
    }
    Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(r#"{"id":"99","name":"alice"}"#)
}

// DELETE /users/:id
fn delete_user(_: &mut Context) -> StatusCode {
    StatusCode::NO_CONTENT
}

// GET /static/*path
fn static_file(ctx: &mut Context) -> String {
    format!("would serve {}", ctx.param("path").unwrap_or(""))
}

// Middleware: returning a response stops the chain.
fn require_auth(ctx: &mut Context) -> Option<Response> {
    match ctx.header("authorization") {
        Some(v) if v.starts_with("Bearer ") => None,
        _ => Some(Response::error(StatusCode::UNAUTHORIZED, "missing bearer token")),
    }
}

// GET /admin/stats
fn stats(ctx: &mut Context) -> Response {
    ctx.response_headers_mut().insert("cache-control", http::HeaderValue::from_static("no-store"));
    Response::json(r#"{"uptime":"ok"}"#)
}
