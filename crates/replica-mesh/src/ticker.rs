//! Scheduling for the periodic loops.
//!
//! Loops are driven by an injected [`Ticker`] so tests can advance them by
//! hand with [`ManualTicker`] instead of waiting on wall-clock time. Each
//! loop is single-flight: a tick that arrives while the previous cycle is
//! still running is dropped, never queued.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::BoxFuture;

/// Source of loop ticks.
pub trait Ticker: Send + 'static {
    /// Waits for the next tick.
    ///
    /// Returns `false` once the ticker can never fire again.
    fn tick(&mut self) -> BoxFuture<'_, bool>;
}

/// Wall-clock ticker. The first tick fires immediately.
#[derive(Debug)]
pub struct IntervalTicker {
    period: Duration,
    interval: Option<Interval>,
}

impl IntervalTicker {
    /// Creates a ticker firing every `period`.
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Returns the tick period.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}

impl Ticker for IntervalTicker {
    fn tick(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            // created lazily: an Interval must be built inside the runtime
            let period = self.period;
            let interval = self.interval.get_or_insert_with(|| {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                interval
            });
            interval.tick().await;
            true
        })
    }
}

/// Creates a manually advanced ticker and its control handle.
#[must_use]
pub fn manual() -> (ManualTickHandle, ManualTicker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ManualTickHandle { tx }, ManualTicker { rx })
}

/// Ticker that fires only when its [`ManualTickHandle`] says so.
#[derive(Debug)]
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

impl Ticker for ManualTicker {
    fn tick(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.rx.recv().await.is_some() })
    }
}

/// Control side of a [`ManualTicker`]. Dropping it ends the loop.
#[derive(Debug, Clone)]
pub struct ManualTickHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTickHandle {
    /// Fires one tick. Returns false if the loop is gone.
    pub fn advance(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

/// Counters describing a loop's history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Cycles started.
    pub started: u64,
    /// Ticks dropped because a cycle was still running.
    pub skipped: u64,
    /// Cycles finished.
    pub completed: u64,
}

impl LoopStats {
    /// Returns true if a cycle is running.
    #[must_use]
    pub const fn in_flight(&self) -> bool {
        self.started > self.completed
    }
}

/// Handle to a running periodic loop.
#[derive(Debug)]
pub struct LoopHandle {
    name: &'static str,
    token: CancellationToken,
    stats: watch::Receiver<LoopStats>,
}

impl LoopHandle {
    /// Returns the loop's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Stops future ticks. An in-flight cycle is left to finish.
    ///
    /// Idempotent and non-blocking.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            info!(task = self.name, "Stopping periodic loop");
            self.token.cancel();
        }
    }

    /// Returns true once [`LoopHandle::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns the current counters.
    #[must_use]
    pub fn stats(&self) -> LoopStats {
        *self.stats.borrow()
    }

    /// Waits until the counters satisfy `predicate`.
    ///
    /// Returns the last seen counters if the loop task went away first.
    pub async fn wait_for(&self, predicate: impl FnMut(&LoopStats) -> bool) -> LoopStats {
        let mut rx = self.stats.clone();
        let seen = match rx.wait_for(predicate).await {
            Ok(stats) => Some(*stats),
            Err(_) => None,
        };
        seen.unwrap_or_else(|| *rx.borrow())
    }
}

/// Clears the single-flight flag when dropped.
struct FlightGuard(Arc<AtomicBool>);

impl FlightGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight flag shared by every loop spawned for the same worker.
///
/// A worker keeps one flag for its whole life, so a loop started after a
/// stop still waits out a cycle left running by the previous loop.
#[derive(Debug, Clone, Default)]
pub(crate) struct FlightFlag(Arc<AtomicBool>);

#[cfg(test)]
impl FlightFlag {
    fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Spawns a single-flight periodic loop running `cycle` on every tick.
pub(crate) fn spawn_periodic<T, F, Fut>(
    name: &'static str,
    mut ticker: T,
    flight: &FlightFlag,
    cycle: F,
) -> LoopHandle
where
    T: Ticker,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let (stats_tx, stats_rx) = watch::channel(LoopStats::default());
    let stats_tx = Arc::new(stats_tx);
    let flight = Arc::clone(&flight.0);

    let loop_token = token.clone();
    tokio::spawn(async move {
        info!(task = name, "Starting periodic loop");
        loop {
            let fired = tokio::select! {
                biased;
                () = loop_token.cancelled() => false,
                fired = ticker.tick() => fired,
            };
            if !fired || loop_token.is_cancelled() {
                break;
            }

            let Some(guard) = FlightGuard::try_acquire(&flight) else {
                debug!(task = name, "Previous cycle still running, skipping tick");
                stats_tx.send_modify(|stats| stats.skipped += 1);
                continue;
            };

            stats_tx.send_modify(|stats| stats.started += 1);
            let work = cycle();
            let stats = Arc::clone(&stats_tx);
            tokio::spawn(async move {
                work.await;
                drop(guard);
                stats.send_modify(|stats| stats.completed += 1);
            });
        }
        debug!(task = name, "Periodic loop exited");
    });

    LoopHandle {
        name,
        token,
        stats: stats_rx,
    }
}
