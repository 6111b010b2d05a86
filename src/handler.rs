//! Dispatch units and type erasure.
//!
//! Middleware and route handlers are the same thing: a function of the
//! request [`Context`] that either produces a response, which stops the
//! chain, or produces nothing, which lets the next unit run.
//!
//! ```text
//! fn auth(ctx: &mut Context) -> Option<Response> { … }   ← user writes this
//!        ↓ group.layer(auth)
//! auth.into_boxed_handler()                             ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(auth))                             ← stored as BoxedHandler
//!        ↓
//! handler.call(&mut ctx)  at request time               ← one vtable dispatch
//! ```
//!
//! Closures work too, as long as the parameter type is spelled out so the
//! closure is generic over the borrow: `|ctx: &mut Context| { … }`.

use std::sync::Arc;

use http::StatusCode;

use crate::context::Context;
use crate::response::{IntoResponse, Response};

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` because it appears in the return type of the public
/// `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: &mut Context) -> Option<Response>;
}

/// A type-erased unit shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid middleware or route handler.
///
/// Satisfied automatically by any function or closure of the shape
/// `Fn(&mut Context) -> impl IntoOutcome`. The trait is sealed.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, R> private::Sealed for F
where
    F: Fn(&mut Context) -> R + Send + Sync + 'static,
    R: IntoOutcome,
{
}

impl<F, R> Handler for F
where
    F: Fn(&mut Context) -> R + Send + Sync + 'static,
    R: IntoOutcome,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

struct FnHandler<F>(F);

impl<F, R> ErasedHandler for FnHandler<F>
where
    F: Fn(&mut Context) -> R,
    R: IntoOutcome,
{
    fn call(&self, ctx: &mut Context) -> Option<Response> {
        (self.0)(ctx).into_outcome()
    }
}

// ── IntoOutcome ───────────────────────────────────────────────────────────────

/// What a unit hands back to the chain: `Some` stops it, `None` continues.
///
/// `()` and `None` mean "no response from me". Anything that converts into a
/// [`Response`] stops the chain with that response.
pub trait IntoOutcome {
    fn into_outcome(self) -> Option<Response>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Option<Response> { None }
}

impl IntoOutcome for Option<Response> {
    fn into_outcome(self) -> Option<Response> { self }
}

impl IntoOutcome for Response {
    fn into_outcome(self) -> Option<Response> { Some(self) }
}

impl IntoOutcome for StatusCode {
    fn into_outcome(self) -> Option<Response> { Some(self.into_response()) }
}

impl IntoOutcome for &'static str {
    fn into_outcome(self) -> Option<Response> { Some(self.into_response()) }
}

impl IntoOutcome for String {
    fn into_outcome(self) -> Option<Response> { Some(self.into_response()) }
}

/// `Err` always stops the chain; `Ok` defers to the inner outcome.
impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoOutcome,
    E: IntoResponse,
{
    fn into_outcome(self) -> Option<Response> {
        match self {
            Ok(outcome) => outcome.into_outcome(),
            Err(err) => Some(err.into_response()),
        }
    }
}
