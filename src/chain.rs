//! Two-phase dispatch.
//!
//! Every request runs its group's middleware, then its route's handlers, in
//! registration order. The first unit to produce a response ends the whole
//! run. Panics inside a unit are caught and handed to the [`FaultHandler`],
//! whose response is written in place of the one the unit never produced.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use http::{Method, StatusCode};
use tracing::error;

use crate::context::Context;
use crate::handler::{BoxedHandler, Handler};
use crate::response::Response;

/// Ordered route handlers, built with [`Chain::then`].
///
/// ```rust
/// use switchyard::{Chain, Context, Response};
///
/// fn load(ctx: &mut Context) {
///     ctx.response_headers_mut().insert("x-loaded", http::HeaderValue::from_static("1"));
/// }
/// fn show(_: &mut Context) -> Response { Response::text("ok") }
///
/// let chain = Chain::new().then(load).then(show);
/// assert_eq!(chain.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Chain {
    pub(crate) handlers: Vec<BoxedHandler>,
}

impl Chain {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn then(mut self, handler: impl Handler) -> Self {
        self.handlers.push(handler.into_boxed_handler());
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A registered route: what the trie hands back on a match.
///
/// Middleware is not stored here; it is read from the owning group when the
/// request runs.
pub(crate) struct Route {
    pub(crate) group_id: usize,
    pub(crate) group: Arc<str>,
    pub(crate) method: Method,
    pub(crate) pattern: String,
    pub(crate) handlers: Box<[BoxedHandler]>,
}

/// Which list a unit belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Middleware,
    Handler,
    NotFound,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Middleware => "middleware",
            Self::Handler => "handler",
            Self::NotFound => "not-found",
        })
    }
}

/// Source position of a contained panic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PanicLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for PanicLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Where a fault happened: the dispatch position of the unit, plus the
/// source position of the panic when it could be recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub group: Arc<str>,
    pub method: Method,
    /// The matched pattern, or the raw path for not-found faults.
    pub pattern: String,
    pub phase: Phase,
    /// Position of the unit within its phase.
    pub index: usize,
    /// `None` when another panic hook replaced the one installed here.
    pub location: Option<PanicLocation>,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [group `{}`, {} #{}]",
            self.method, self.pattern, self.group, self.phase, self.index
        )?;
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        Ok(())
    }
}

/// A recovered panic and the frame it escaped from.
pub struct Fault {
    payload: Box<dyn Any + Send + 'static>,
    frame: Frame,
}

impl Fault {
    /// The panic message, when the payload was a string.
    pub fn message(&self) -> &str {
        if let Some(s) = self.payload.downcast_ref::<&'static str>() {
            *s
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "non-string panic payload"
        }
    }

    pub fn payload(&self) -> &(dyn Any + Send + 'static) {
        &*self.payload
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("message", &self.message())
            .field("frame", &self.frame)
            .finish()
    }
}

/// Turns a recovered fault into the fallback response.
pub type FaultHandler = Arc<dyn Fn(&mut Context, &Fault) -> Response + Send + Sync + 'static>;

/// Logs the fault and answers with a generic JSON 500.
pub fn default_fault_handler(ctx: &mut Context, fault: &Fault) -> Response {
    let frame = fault.frame();
    error!(
        group = %frame.group,
        method = %frame.method,
        pattern = %frame.pattern,
        path = ctx.path(),
        phase = %frame.phase,
        index = frame.index,
        location = ?frame.location,
        "panic in dispatch unit: {}",
        fault.message()
    );
    Response::error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

thread_local! {
    static IN_UNIT: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<PanicLocation>> = const { RefCell::new(None) };
}

/// Chains a hook in front of the existing one that records where a unit
/// panicked. Panics outside a unit pass straight through.
fn install_location_hook() {
    static INSTALLED: Once = Once::new();
    INSTALLED.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_UNIT.with(Cell::get) {
                let location = info.location().map(|l| PanicLocation {
                    file: l.file().to_owned(),
                    line: l.line(),
                    column: l.column(),
                });
                LAST_PANIC.with(|slot| *slot.borrow_mut() = location);
            }
            previous(info);
        }));
    });
}

/// Runs one unit with panic containment.
///
/// Returns the unit's outcome, or the fault handler's response if it
/// panicked. A panicking fault handler falls back to a bare 500.
pub(crate) fn invoke(
    unit: &BoxedHandler,
    ctx: &mut Context,
    faults: &FaultHandler,
    frame: impl FnOnce() -> Frame,
) -> Option<Response> {
    install_location_hook();

    let outer = IN_UNIT.with(|f| f.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(|| unit.call(ctx)));
    IN_UNIT.with(|f| f.set(outer));

    let payload = match result {
        Ok(outcome) => return outcome,
        Err(payload) => payload,
    };

    let mut frame = frame();
    frame.location = LAST_PANIC.with(|slot| slot.borrow_mut().take());
    let fault = Fault { payload, frame };
    match panic::catch_unwind(AssertUnwindSafe(|| (**faults)(ctx, &fault))) {
        Ok(response) => Some(response),
        Err(_) => {
            error!(frame = %fault.frame, "fault handler panicked");
            Some(Response::status(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Drives `ctx` through `route`'s middleware, then its handlers.
///
/// Each phase keeps its own cursor on the context. Either phase stops as
/// soon as a unit yields a response, the context is done, or the request is
/// cancelled; the handler phase never starts after such a stop.
pub(crate) fn run(
    route: &Route,
    middleware: &[BoxedHandler],
    ctx: &mut Context,
    faults: &FaultHandler,
) {
    if !run_phase(route, Phase::Middleware, middleware, ctx, faults) {
        return;
    }
    run_phase(route, Phase::Handler, &route.handlers, ctx, faults);
}

/// Returns whether the next phase may start.
fn run_phase(
    route: &Route,
    phase: Phase,
    units: &[BoxedHandler],
    ctx: &mut Context,
    faults: &FaultHandler,
) -> bool {
    loop {
        if ctx.is_done() || ctx.is_cancelled() {
            return false;
        }

        let cursor = match phase {
            Phase::Middleware => &mut ctx.middleware_cursor,
            _ => &mut ctx.handler_cursor,
        };
        let index = *cursor;
        let Some(unit) = units.get(index) else {
            return true;
        };
        *cursor += 1;

        let outcome = invoke(unit, ctx, faults, || Frame {
            group: Arc::clone(&route.group),
            method: route.method.clone(),
            pattern: route.pattern.clone(),
            phase,
            index,
            location: None,
        });

        if let Some(response) = outcome {
            ctx.write(response);
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn unit(log: &Log, name: &'static str, respond: bool) -> BoxedHandler {
        let log = Arc::clone(log);
        (move |_: &mut Context| {
            log.lock().unwrap().push(name);
            respond.then(|| Response::text(name))
        })
        .into_boxed_handler()
    }

    fn route(handlers: Vec<BoxedHandler>) -> Route {
        Route {
            group_id: 0,
            group: Arc::from("api"),
            method: Method::GET,
            pattern: "/x".into(),
            handlers: handlers.into(),
        }
    }

    fn faults() -> FaultHandler {
        Arc::new(default_fault_handler)
    }

    fn ctx() -> Context {
        Context::from_request(http::Request::new(Bytes::new()))
    }

    #[test]
    fn middleware_then_handlers_in_order() {
        let log = Log::default();
        let mw = [unit(&log, "mw1", false), unit(&log, "mw2", false)];
        let r = route(vec![
            unit(&log, "h1", false),
            unit(&log, "h2", true),
            unit(&log, "h3", true),
        ]);
        let mut ctx = ctx();
        run(&r, &mw, &mut ctx, &faults());

        assert_eq!(*log.lock().unwrap(), ["mw1", "mw2", "h1", "h2"]);
        assert_eq!(ctx.take_response().unwrap().body(), "h2");
    }

    #[test]
    fn middleware_response_skips_every_handler() {
        let log = Log::default();
        let mw = [unit(&log, "auth", true), unit(&log, "mw2", false)];
        let r = route(vec![unit(&log, "h1", true)]);
        let mut ctx = ctx();
        run(&r, &mw, &mut ctx, &faults());

        assert_eq!(*log.lock().unwrap(), ["auth"]);
        assert!(ctx.is_done());
        assert_eq!(ctx.middleware_cursor, 1);
        assert_eq!(ctx.handler_cursor, 0);
    }

    #[test]
    fn direct_write_halts_both_phases() {
        let log = Log::default();
        let writer = (|ctx: &mut Context| {
            ctx.write(Response::text("streamed"));
        })
        .into_boxed_handler();
        let mw = [writer, unit(&log, "mw2", false)];
        let r = route(vec![unit(&log, "h1", true)]);
        let mut ctx = ctx();
        run(&r, &mw, &mut ctx, &faults());

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(ctx.take_response().unwrap().body(), "streamed");
    }

    #[test]
    fn panic_becomes_fault_response() {
        let log = Log::default();
        let boom = (|_: &mut Context| -> Option<Response> { panic!("boom") }).into_boxed_handler();
        let r = route(vec![unit(&log, "h1", false), boom, unit(&log, "h3", true)]);

        let seen: Arc<Mutex<Option<(String, Frame)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let faults: FaultHandler = Arc::new(move |_: &mut Context, fault: &Fault| {
            *sink.lock().unwrap() = Some((fault.message().to_owned(), fault.frame().clone()));
            Response::error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        });

        let mut ctx = ctx();
        run(&r, &[], &mut ctx, &faults);

        assert_eq!(*log.lock().unwrap(), ["h1"]);
        assert_eq!(ctx.take_response().unwrap().status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let (message, frame) = seen.lock().unwrap().take().unwrap();
        assert_eq!(message, "boom");
        assert_eq!(frame.phase, Phase::Handler);
        assert_eq!(frame.index, 1);
        assert_eq!(&*frame.group, "api");
        assert_eq!(frame.pattern, "/x");

        let location = frame.location.unwrap();
        assert!(location.file.ends_with("chain.rs"), "{location}");
        assert!(location.line > 0);
    }

    #[test]
    fn resumed_unwind_has_no_stale_location() {
        let boom = (|_: &mut Context| -> Option<Response> { panic!("boom") }).into_boxed_handler();
        let quiet = (|_: &mut Context| -> Option<Response> {
            panic::resume_unwind(Box::new("quiet"))
        })
        .into_boxed_handler();

        let frames: Arc<Mutex<Vec<Frame>>> = Arc::default();
        let sink = Arc::clone(&frames);
        let faults: FaultHandler = Arc::new(move |_: &mut Context, fault: &Fault| {
            sink.lock().unwrap().push(fault.frame().clone());
            Response::status(StatusCode::INTERNAL_SERVER_ERROR)
        });

        // resume_unwind skips the panic hook, so nothing is recorded for it.
        run(&route(vec![boom]), &[], &mut ctx(), &faults);
        run(&route(vec![quiet]), &[], &mut ctx(), &faults);

        let frames = frames.lock().unwrap();
        assert!(frames[0].location.is_some());
        assert!(frames[0].to_string().contains(" at "));
        assert_eq!(frames[1].location, None);
    }

    #[test]
    fn panicking_fault_handler_still_answers() {
        let boom = (|_: &mut Context| -> Option<Response> { panic!("first") }).into_boxed_handler();
        let r = route(vec![]);
        let faults: FaultHandler =
            Arc::new(|_: &mut Context, _: &Fault| -> Response { panic!("second") });

        let mut ctx = ctx();
        run(&r, &[boom], &mut ctx, &faults);
        assert_eq!(ctx.take_response().unwrap().status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn cancelled_request_runs_nothing() {
        let log = Log::default();
        let mw = [unit(&log, "mw", false)];
        let r = route(vec![unit(&log, "h", true)]);
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();

        let mut ctx = Context::new();
        ctx.fill(http::Request::new(Bytes::new()), None, Some(token), None);
        run(&r, &mw, &mut ctx, &faults());

        assert!(log.lock().unwrap().is_empty());
        assert!(!ctx.is_done());
    }

    #[test]
    fn chain_builder_keeps_order() {
        let chain = Chain::new()
            .then(|_: &mut Context| {})
            .then(|_: &mut Context| Response::text("x"));
        assert_eq!(chain.len(), 2);
        assert!(!chain.is_empty());
    }
}
