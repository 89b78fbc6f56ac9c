//! Metrics instrumentation for fleet-sync.
//!
//! All metrics are prefixed with `fleet_sync.`

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a completed or failed cache pull.
pub fn record_cache_pull(cache: &'static str, ok: bool, duration: Duration) {
    let result = if ok { "ok" } else { "error" };
    counter!("fleet_sync.cache.pull.count", "cache" => cache, "result" => result).increment(1);
    histogram!("fleet_sync.cache.pull.duration.seconds", "cache" => cache)
        .record(duration.as_secs_f64());
}

/// Record a pull served from the current snapshot within the gap.
pub fn record_cache_serve_stale(cache: &'static str) {
    counter!("fleet_sync.cache.serve_stale.count", "cache" => cache).increment(1);
}

/// Record a refresh trigger dropped because one was already in flight.
pub fn record_cache_refresh_dropped(cache: &'static str) {
    counter!("fleet_sync.cache.refresh_dropped.count", "cache" => cache).increment(1);
}

/// Record the entity count of the current snapshot.
pub fn record_cache_size(cache: &'static str, size: usize) {
    gauge!("fleet_sync.cache.size", "cache" => cache).set(size as f64);
}

/// Record a committed reservoir batch.
pub fn record_reservoir_commit(rows: usize) {
    counter!("fleet_sync.reservoir.commit.count").increment(1);
    histogram!("fleet_sync.reservoir.commit.rows").record(rows as f64);
}

/// Record a batch discarded under overload.
pub fn record_reservoir_dropped(rows: usize) {
    counter!("fleet_sync.reservoir.dropped.count").increment(1);
    counter!("fleet_sync.reservoir.dropped.rows").increment(rows as u64);
}

/// Record a failed batch commit.
pub fn record_reservoir_error() {
    counter!("fleet_sync.reservoir.error.count").increment(1);
}

/// Record a corrective write issued against an authority.
pub fn record_reconcile_write(channel: &'static str, action: &'static str) {
    counter!("fleet_sync.reconcile.write.count", "channel" => channel, "action" => action)
        .increment(1);
}

/// Record an isolated per-item reconciliation failure.
pub fn record_reconcile_error(channel: &'static str) {
    counter!("fleet_sync.reconcile.error.count", "channel" => channel).increment(1);
}

/// Record a finished reconciliation run.
pub fn record_reconcile_run(writes: usize, errors: usize, duration: Duration) {
    counter!("fleet_sync.reconcile.run.count").increment(1);
    gauge!("fleet_sync.reconcile.last_writes").set(writes as f64);
    gauge!("fleet_sync.reconcile.last_errors").set(errors as f64);
    histogram!("fleet_sync.reconcile.run.duration.seconds").record(duration.as_secs_f64());
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
