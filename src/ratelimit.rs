//! Per-caller rate limiting over second, minute and hour windows.
//!
//! [`Limiters`] hands out one [`Limiter`] per caller key, creating it on
//! first use. Each limiter keeps three fixed windows that reset once their
//! span has elapsed since they opened. A call is admitted only if it fits
//! all three; the hour is checked first, then the minute, then the second,
//! so the coarsest violation is the one reported.
//!
//! Idle limiters are evicted by a [`Sweeper`] task so registries keyed by
//! client address do not grow without bound. A limiter that a caller still
//! holds is never evicted, so one key never has two live limiters.
//!
//! # Thread safety
//!
//! - The registry is a [`DashMap`]: get-or-create is atomic per key and
//!   unrelated keys rarely share a lock.
//! - Each limiter guards its counters with its own mutex, held only for the
//!   counter arithmetic.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Maximum admitted calls per window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub per_second: u32,
    pub per_minute: u32,
    pub per_hour: u32,
}

impl Limits {
    pub fn new(per_second: u32, per_minute: u32, per_hour: u32) -> Self {
        Self { per_second, per_minute, per_hour }
    }
}

/// One of the three windows a limiter tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Window {
    Second,
    Minute,
    Hour,
}

impl Window {
    pub fn span(self) -> Duration {
        match self {
            Self::Second => Duration::from_secs(1),
            Self::Minute => Duration::from_secs(60),
            Self::Hour => Duration::from_secs(3600),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
        })
    }
}

/// A call did not fit one of the windows.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{count} exceeds {limit} requests per {window}, retry in {retry_after:?}")]
pub struct RateLimitExceeded {
    pub window: Window,
    /// Calls seen in the window, this one included.
    pub count: u64,
    pub limit: u32,
    /// Time until the violated window resets.
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    /// `retry_after` in whole seconds, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        let d = self.retry_after;
        d.as_secs() + u64::from(d.subsec_nanos() > 0)
    }
}

/// Calls still admissible in each window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Remaining {
    pub second: u64,
    pub minute: u64,
    pub hour: u64,
}

/// Cumulative decisions made by one limiter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Totals {
    pub allowed: u64,
    pub blocked: u64,
}

// ── Limiter ───────────────────────────────────────────────────────────────────

struct Counter {
    count: u64,
    start: Instant,
}

impl Counter {
    fn new(now: Instant) -> Self {
        Self { count: 0, start: now }
    }

    fn expired(&self, window: Window, now: Instant) -> bool {
        now.saturating_duration_since(self.start) >= window.span()
    }

    fn hit(&mut self, window: Window, limit: u32, now: Instant) -> Result<(), RateLimitExceeded> {
        if self.expired(window, now) {
            self.count = 0;
            self.start = now;
        }

        self.count += 1;
        if self.count <= u64::from(limit) {
            return Ok(());
        }

        let elapsed = now.saturating_duration_since(self.start);
        Err(RateLimitExceeded {
            window,
            count: self.count,
            limit,
            retry_after: window.span().saturating_sub(elapsed),
        })
    }

    fn remaining(&self, window: Window, limit: u32, now: Instant) -> u64 {
        if self.expired(window, now) {
            u64::from(limit)
        } else {
            u64::from(limit).saturating_sub(self.count)
        }
    }
}

struct State {
    hour: Counter,
    minute: Counter,
    second: Counter,
    last_action: Instant,
    totals: Totals,
}

impl State {
    fn check(&mut self, limits: &Limits, now: Instant) -> Result<(), RateLimitExceeded> {
        self.hour.hit(Window::Hour, limits.per_hour, now)?;
        self.minute.hit(Window::Minute, limits.per_minute, now)?;
        self.second.hit(Window::Second, limits.per_second, now)
    }
}

/// Three-window counter for a single caller.
pub struct Limiter {
    limits: Limits,
    state: Mutex<State>,
}

impl Limiter {
    pub fn new(limits: Limits) -> Self {
        let now = Instant::now();
        Self {
            limits,
            state: Mutex::new(State {
                hour: Counter::new(now),
                minute: Counter::new(now),
                second: Counter::new(now),
                last_action: now,
                totals: Totals::default(),
            }),
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Counts one call and decides whether it is admitted.
    pub fn allowed(&self) -> Result<(), RateLimitExceeded> {
        self.allowed_at(Instant::now())
    }

    /// [`allowed`](Limiter::allowed) against an explicit clock reading.
    pub fn allowed_at(&self, now: Instant) -> Result<(), RateLimitExceeded> {
        let mut state = self.state.lock();
        state.last_action = state.last_action.max(now);

        let decision = state.check(&self.limits, now);
        match decision {
            Ok(()) => state.totals.allowed += 1,
            Err(_) => state.totals.blocked += 1,
        }
        decision
    }

    pub fn remaining(&self) -> Remaining {
        self.remaining_at(Instant::now())
    }

    /// Admissible calls per window as of `now`; an elapsed window counts as
    /// fully available.
    pub fn remaining_at(&self, now: Instant) -> Remaining {
        let state = self.state.lock();
        Remaining {
            second: state.second.remaining(Window::Second, self.limits.per_second, now),
            minute: state.minute.remaining(Window::Minute, self.limits.per_minute, now),
            hour: state.hour.remaining(Window::Hour, self.limits.per_hour, now),
        }
    }

    /// When this limiter was last consulted (or created).
    pub fn last_action(&self) -> Instant {
        self.state.lock().last_action
    }

    pub fn totals(&self) -> Totals {
        self.state.lock().totals
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Caller key → [`Limiter`], all sharing one set of [`Limits`].
pub struct Limiters {
    limits: Limits,
    map: DashMap<String, Arc<Limiter>>,
}

impl Limiters {
    pub fn new(limits: Limits) -> Self {
        Self { limits, map: DashMap::new() }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// The limiter for `key`, created on first access.
    ///
    /// Concurrent first calls for one key all receive the same limiter.
    pub fn get(&self, key: &str) -> Arc<Limiter> {
        if let Some(existing) = self.map.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .map
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Limiter::new(self.limits)));
        Arc::clone(entry.value())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drops every limiter idle for longer than `idle` that no caller holds.
    /// Returns how many went.
    pub fn sweep(&self, idle: Duration) -> usize {
        self.sweep_at(Instant::now(), idle)
    }

    pub fn sweep_at(&self, now: Instant, idle: Duration) -> usize {
        let mut removed = 0;
        // `get` clones under the shard lock `retain` holds here, so a count of
        // one cannot grow while we decide.
        self.map.retain(|_, limiter| {
            let keep = Arc::strong_count(limiter) > 1
                || now.saturating_duration_since(limiter.last_action()) <= idle;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Starts a background task that calls [`sweep`](Limiters::sweep) every
    /// `interval`.
    ///
    /// The task holds only a weak reference: it exits when the returned
    /// [`Sweeper`] is stopped or dropped, or once the registry is gone.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, idle: Duration) -> Sweeper {
        let token = CancellationToken::new();
        let task = tokio::spawn(sweep_loop(Arc::downgrade(self), interval, idle, token.clone()));
        Sweeper { token, task }
    }
}

/// Handle to a running eviction task. Dropping it stops the task.
pub struct Sweeper {
    token: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Sweeper {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn sweep_loop(
    registry: Weak<Limiters>,
    interval: Duration,
    idle: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(registry) = registry.upgrade() else { break };
                let removed = registry.sweep(idle);
                if removed > 0 {
                    debug!(removed, remaining = registry.len(), "evicted idle rate limiters");
                }
            }
        }
    }
    debug!("rate limiter sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn per_second_boundary() {
        let l = Limiter::new(Limits::new(3, 100, 1000));
        let t0 = Instant::now();

        for _ in 0..3 {
            assert!(l.allowed_at(t0).is_ok());
        }
        let err = l.allowed_at(t0).unwrap_err();
        assert_eq!(err.window, Window::Second);
        assert_eq!(err.count, 4);
        assert_eq!(err.limit, 3);
        assert!(err.retry_after <= SEC);
        assert!(err.retry_after_secs() <= 1);

        assert!(l.allowed_at(t0 + SEC).is_ok());
        assert_eq!(l.totals(), Totals { allowed: 4, blocked: 1 });
    }

    #[test]
    fn coarsest_window_is_reported_first() {
        let l = Limiter::new(Limits::new(1, 1, 1));
        let t0 = Instant::now();
        assert!(l.allowed_at(t0).is_ok());
        assert_eq!(l.allowed_at(t0).unwrap_err().window, Window::Hour);

        let l = Limiter::new(Limits::new(1, 1, 10));
        let t0 = Instant::now();
        assert!(l.allowed_at(t0).is_ok());
        assert_eq!(l.allowed_at(t0).unwrap_err().window, Window::Minute);
    }

    #[test]
    fn minute_window_retry_counts_down() {
        let l = Limiter::new(Limits::new(10, 2, 100));
        let t0 = Instant::now();
        assert!(l.allowed_at(t0).is_ok());
        assert!(l.allowed_at(t0 + 2 * SEC).is_ok());

        let err = l.allowed_at(t0 + 20 * SEC).unwrap_err();
        assert_eq!(err.window, Window::Minute);
        assert!(err.retry_after <= 40 * SEC && err.retry_after > 39 * SEC);
        assert_eq!(err.retry_after_secs(), 40);

        assert!(l.allowed_at(t0 + 61 * SEC).is_ok());
    }

    #[test]
    fn remaining_treats_elapsed_windows_as_full() {
        let l = Limiter::new(Limits::new(3, 10, 100));
        let t0 = Instant::now();
        l.allowed_at(t0).unwrap();
        l.allowed_at(t0).unwrap();

        assert_eq!(l.remaining_at(t0), Remaining { second: 1, minute: 8, hour: 98 });
        assert_eq!(l.remaining_at(t0 + 2 * SEC), Remaining { second: 3, minute: 8, hour: 98 });
    }

    #[test]
    fn concurrent_first_access_creates_one_limiter() {
        const N: usize = 64;
        let registry = Arc::new(Limiters::new(Limits::new(10, 1000, 10_000)));
        let barrier = Arc::new(Barrier::new(N));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let limiter = registry.get("203.0.113.7");
                    let _ = limiter.allowed();
                    limiter
                })
            })
            .collect();
        let limiters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.len(), 1);
        assert!(limiters.iter().all(|l| Arc::ptr_eq(l, &limiters[0])));
        let totals = limiters[0].totals();
        assert_eq!(totals.allowed + totals.blocked, N as u64);
        assert!(totals.allowed >= 10);
    }

    #[test]
    fn sweep_evicts_idle_limiters_only() {
        let registry = Limiters::new(Limits::new(1, 1, 1));
        registry.get("idle").allowed().unwrap();

        let later = Instant::now() + 90 * SEC;
        registry.get("busy").allowed_at(later).unwrap();

        assert_eq!(registry.sweep_at(later + SEC, 60 * SEC), 1);
        assert!(!registry.contains("idle"));
        assert!(registry.contains("busy"));

        let fresh = registry.get("idle");
        assert_eq!(fresh.totals(), Totals::default());
        assert!(fresh.allowed().is_ok());
    }

    #[test]
    fn sweep_spares_limiters_still_held() {
        let registry = Limiters::new(Limits::new(1, 10, 10));
        let held = registry.get("k");
        let far = Instant::now() + 3600 * SEC;

        assert_eq!(registry.sweep_at(far, Duration::ZERO), 0);
        held.allowed().unwrap();

        let again = registry.get("k");
        assert!(Arc::ptr_eq(&held, &again));
        assert!(again.allowed().is_err());
        assert_eq!(held.totals(), Totals { allowed: 1, blocked: 1 });

        drop((held, again));
        assert_eq!(registry.sweep_at(far, Duration::ZERO), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn sweeper_evicts_in_background() {
        let registry = Arc::new(Limiters::new(Limits::new(5, 5, 5)));
        registry.get("a").allowed().unwrap();

        let sweeper = registry.spawn_sweeper(Duration::from_millis(10), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(registry.is_empty());
        drop(sweeper);
    }

    #[tokio::test]
    async fn stopped_sweeper_exits() {
        let registry = Arc::new(Limiters::new(Limits::new(5, 5, 5)));
        registry.get("a");

        let sweeper = registry.spawn_sweeper(Duration::from_millis(10), Duration::from_secs(3600));
        sweeper.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(sweeper.is_finished());
        assert!(registry.contains("a"));
    }

    #[tokio::test]
    async fn sweeper_exits_when_registry_is_dropped() {
        let registry = Arc::new(Limiters::new(Limits::new(5, 5, 5)));
        let sweeper = registry.spawn_sweeper(Duration::from_millis(10), Duration::from_secs(1));
        drop(registry);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sweeper.is_finished());
    }
}
