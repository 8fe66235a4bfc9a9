//! Fixed-window rate limited dispatch queue.
//!
//! Operations are admitted in FIFO order. A ticker launches up to `capacity`
//! of them per window, each as its own task, so completion order is not
//! serialized once more than one operation is in flight.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::config::QueueConfig;
use crate::error::{SyncError, SyncResult};

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct QueueState {
    pending: VecDeque<Job>,
    consumed: usize,
    window_start: Instant,
    capacity: usize,
    window: Duration,
}

impl QueueState {
    /// Roll the window if it elapsed and take what the window still allows.
    fn admit(&mut self, now: Instant) -> Vec<Job> {
        if now.duration_since(self.window_start) >= self.window {
            self.consumed = 0;
            self.window_start = now;
        }

        let allowed = self
            .capacity
            .saturating_sub(self.consumed)
            .min(self.pending.len());
        self.consumed += allowed;
        self.pending.drain(..allowed).collect()
    }
}

pub struct RateLimitedQueue {
    name: &'static str,
    state: Arc<Mutex<QueueState>>,
    ticker: AbortHandle,
}

impl RateLimitedQueue {
    /// Create the queue and start its ticker. Needs a tokio runtime.
    pub fn new(name: &'static str, config: &QueueConfig) -> Self {
        let state = Arc::new(Mutex::new(QueueState {
            pending: VecDeque::new(),
            consumed: 0,
            window_start: Instant::now(),
            capacity: config.capacity,
            window: config.window,
        }));

        let tick = config.tick_interval();
        let ticker = tokio::spawn(run_ticker(name, Arc::clone(&state), tick)).abort_handle();

        debug!(
            queue = name,
            capacity = config.capacity,
            window_ms = config.window.as_millis() as u64,
            tick_ms = tick.as_millis() as u64,
            "Dispatch queue started"
        );

        RateLimitedQueue {
            name,
            state,
            ticker,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Admit `op` and return a future resolving to its outcome.
    ///
    /// Admission happens when this is called, not when the returned future is
    /// first polled, so call order is dispatch order.
    pub fn enqueue<F, Fut, T>(&self, op: F) -> impl Future<Output = SyncResult<T>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                // Caller may have stopped waiting
                let _ = tx.send(op().await);
            })
        });

        let pending = {
            let mut state = lock(&self.state);
            state.pending.push_back(job);
            state.pending.len()
        };
        trace!(queue = self.name, pending, "Operation admitted");

        let name = self.name;
        async move { rx.await.map_err(|_| SyncError::QueueClosed(name))? }
    }

    /// Operations admitted but not launched yet.
    pub fn pending(&self) -> usize {
        lock(&self.state).pending.len()
    }
}

impl Drop for RateLimitedQueue {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

fn lock(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

async fn run_ticker(name: &'static str, state: Arc<Mutex<QueueState>>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let now = interval.tick().await;
        let jobs = lock(&state).admit(now);

        if !jobs.is_empty() {
            trace!(queue = name, launched = jobs.len(), "Launching operations");
        }

        for job in jobs {
            tokio::spawn(job());
        }
    }
}
