//! Named fixed-rate update loops per tenant.
//!
//! Each running loop is a tokio task driving a [`tokio::time::Interval`] and
//! calling [`Backend::update`] with the milliseconds elapsed since the
//! previous tick. Loops are keyed by `(tenant, tag)`; at most one loop exists
//! per key.
//!
//! The loop table is only mutated by [`TickScheduler::start`],
//! [`TickScheduler::stop`] and the bulk stop helpers. A loop whose callback
//! fails marks itself terminated and exits, but its slot stays until the next
//! `start` or `stop` for that key.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::backend::{panic_message, Backend};
use crate::tenant::{TenantKey, TenantRegistry};

/// Result of a `start`/`stop` request.
///
/// `args` is `[tenant, reason, tag]` and is forwarded as-is to the client
/// that issued the command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopOutcome {
    pub success: bool,
    pub args: Vec<Value>,
}

impl LoopOutcome {
    fn new(success: bool, tenant: &TenantKey, reason: &str, tag: Option<&str>) -> Self {
        let mut args = vec![Value::from(tenant.as_str()), Value::from(reason)];
        if let Some(tag) = tag {
            args.push(Value::from(tag));
        }
        Self { success, args }
    }

    pub(crate) fn failure(tenant: &TenantKey, reason: &str, tag: Option<&str>) -> Self {
        Self::new(false, tenant, reason, tag)
    }

    /// The human readable part of the outcome.
    pub fn reason(&self) -> Option<&str> {
        self.args.get(1).and_then(Value::as_str)
    }
}

#[derive(Debug, Default)]
struct LoopState {
    cancelled: AtomicBool,
    running: AtomicBool,
    ticks: AtomicU64,
}

#[derive(Debug)]
struct ScheduledLoop {
    task: JoinHandle<()>,
    state: Arc<LoopState>,
}

impl ScheduledLoop {
    /// Cancels the timer. The flag stops a tick that is already polling; the
    /// abort drops the interval at its next suspension point.
    fn release(self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.running.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

type LoopKey = (TenantKey, String);

/// Runs and tears down the update loops of every tenant.
#[derive(Debug)]
pub struct TickScheduler {
    tenants: Arc<TenantRegistry>,
    loops: DashMap<LoopKey, ScheduledLoop>,
    period: Duration,
}

impl TickScheduler {
    pub fn new(tenants: Arc<TenantRegistry>, period: Duration) -> Self {
        Self {
            tenants,
            loops: DashMap::new(),
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Starts (or restarts) the loop `tag` of `tenant`.
    ///
    /// Fails without side effects when `tag` is empty, when the tenant has no
    /// cached backend or when that backend has no update method. Otherwise any
    /// loop already running under the same key is released before the new one
    /// is spawned.
    pub fn start(&self, tenant: &TenantKey, tag: &str) -> LoopOutcome {
        if tag.is_empty() {
            return LoopOutcome::failure(tenant, "no tag provided", None);
        }
        let Some(backend) = self
            .tenants
            .get(tenant)
            .and_then(|state| state.cached_backend())
        else {
            return LoopOutcome::failure(tenant, "no backend loaded. Game loop: ", Some(tag));
        };
        if !backend.has_update() {
            return LoopOutcome::failure(
                tenant,
                "backend does not have update method. Game loop: ",
                Some(tag),
            );
        }

        let key = (tenant.clone(), tag.to_string());
        if let Some((_, previous)) = self.loops.remove(&key) {
            debug!("[{}] Replacing game loop '{}'", tenant, tag);
            previous.release();
        }

        let state = Arc::new(LoopState {
            running: AtomicBool::new(true),
            ..Default::default()
        });
        let task = tokio::spawn(run_loop(
            tenant.clone(),
            tag.to_string(),
            backend,
            state.clone(),
            self.period,
        ));
        if let Some(displaced) = self.loops.insert(key, ScheduledLoop { task, state }) {
            displaced.release();
        }

        info!("🕒 [{}] Game loop '{}' started", tenant, tag);
        LoopOutcome::new(true, tenant, "game loop started", Some(tag))
    }

    /// Stops the loop `tag` of `tenant`. The timer is released before this
    /// returns.
    pub fn stop(&self, tenant: &TenantKey, tag: &str) -> LoopOutcome {
        match self.loops.remove(&(tenant.clone(), tag.to_string())) {
            Some((_, scheduled)) => {
                scheduled.release();
                info!("⏹️ [{}] Game loop '{}' cleared", tenant, tag);
                LoopOutcome::new(true, tenant, "game loop cleared", Some(tag))
            }
            None => LoopOutcome::failure(tenant, "no such game loop", Some(tag)),
        }
    }

    /// Stops every loop of `tenant`. Returns how many were released.
    pub fn stop_all_for(&self, tenant: &TenantKey) -> usize {
        let keys: Vec<LoopKey> = self
            .loops
            .iter()
            .filter(|entry| &entry.key().0 == tenant)
            .map(|entry| entry.key().clone())
            .collect();
        let mut stopped = 0;
        for key in keys {
            if let Some((_, scheduled)) = self.loops.remove(&key) {
                scheduled.release();
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!("⏹️ [{}] Cleared {} game loop(s)", tenant, stopped);
        }
        stopped
    }

    /// Stops every loop of every tenant.
    pub fn stop_all(&self) -> usize {
        let keys: Vec<LoopKey> = self.loops.iter().map(|entry| entry.key().clone()).collect();
        let mut stopped = 0;
        for key in keys {
            if let Some((_, scheduled)) = self.loops.remove(&key) {
                scheduled.release();
                stopped += 1;
            }
        }
        stopped
    }

    /// Whether a loop is recorded for the key and has not terminated.
    pub fn is_running(&self, tenant: &TenantKey, tag: &str) -> bool {
        self.loops
            .get(&(tenant.clone(), tag.to_string()))
            .map(|scheduled| scheduled.state.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Number of successful ticks of the recorded loop.
    pub fn tick_count(&self, tenant: &TenantKey, tag: &str) -> Option<u64> {
        self.loops
            .get(&(tenant.clone(), tag.to_string()))
            .map(|scheduled| scheduled.state.ticks.load(Ordering::SeqCst))
    }

    /// Tags of the loops recorded for `tenant`, sorted.
    pub fn active_tags(&self, tenant: &TenantKey) -> Vec<String> {
        let mut tags: Vec<String> = self
            .loops
            .iter()
            .filter(|entry| &entry.key().0 == tenant)
            .map(|entry| entry.key().1.clone())
            .collect();
        tags.sort();
        tags
    }

    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn run_loop(
    tenant: TenantKey,
    tag: String,
    backend: Arc<dyn Backend>,
    state: Arc<LoopState>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    loop {
        ticker.tick().await;
        if state.cancelled.load(Ordering::SeqCst) {
            break;
        }

        let now = Instant::now();
        let elapsed_ms = now.duration_since(last_tick).as_secs_f64() * 1000.0;
        last_tick = now;

        match catch_unwind(AssertUnwindSafe(|| backend.update(elapsed_ms, &tag))) {
            Ok(Ok(())) => {
                state.ticks.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(e)) => {
                error!("[{}] Game loop '{}' failed: {}", tenant, tag, e);
                break;
            }
            Err(panic) => {
                error!(
                    "[{}] Game loop '{}' panicked: {}",
                    tenant,
                    tag,
                    panic_message(panic.as_ref())
                );
                break;
            }
        }
    }

    state.running.store(false, Ordering::SeqCst);
}
