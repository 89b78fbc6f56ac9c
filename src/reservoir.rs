//! Write-coalescing buffer for high-frequency telemetry statements.
//!
//! An [`EditReservoir`] accumulates parameter rows for one fixed statement
//! template and commits them in bulk, either when the buffer reaches its
//! size threshold or when enough time has passed since the last flush.
//! Threshold checks happen only on `add`: a quiet buffer can sit past its
//! time threshold until the next row arrives. In non-blocking mode a flush
//! that lands while a previous commit is still running is dropped (the
//! rows are discarded, with a warning), trading durability for bounded
//! memory under sustained overload.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::metrics;
use crate::store::{SqlValue, Store};

struct Pending {
    rows: Vec<Vec<SqlValue>>,
    last_flush: Instant,
}

/// Batching buffer for one SQL statement template.
pub struct EditReservoir {
    store: Arc<dyn Store>,
    statement: String,
    max_rows: usize,
    max_age: Duration,
    /// Blocking mode commits inline on the caller; non-blocking mode
    /// spawns the commit and may drop it under overload.
    blocking: bool,
    disabled: bool,
    pending: Mutex<Pending>,
    commit_gate: Arc<tokio::sync::Mutex<()>>,
    commit_task: Mutex<Option<JoinHandle<()>>>,
}

impl EditReservoir {
    pub fn new(
        store: Arc<dyn Store>,
        statement: impl Into<String>,
        max_rows: usize,
        max_age: Duration,
        blocking: bool,
    ) -> Self {
        Self {
            store,
            statement: statement.into(),
            max_rows: max_rows.max(1),
            max_age,
            blocking,
            disabled: false,
            pending: Mutex::new(Pending {
                rows: Vec::new(),
                last_flush: Instant::now(),
            }),
            commit_gate: Arc::new(tokio::sync::Mutex::new(())),
            commit_task: Mutex::new(None),
        }
    }

    /// A reservoir that ignores every row; useful for read-only tools.
    pub fn disabled(store: Arc<dyn Store>, statement: impl Into<String>) -> Self {
        let mut reservoir = Self::new(store, statement, 1, Duration::ZERO, true);
        reservoir.disabled = true;
        reservoir
    }

    /// Rows currently buffered.
    pub fn pending_rows(&self) -> usize {
        self.pending.lock().rows.len()
    }

    /// Append one parameter row, flushing if the size or time threshold
    /// has been crossed.
    pub async fn add(&self, row: Vec<SqlValue>) {
        if self.disabled {
            return;
        }
        let due = {
            let mut pending = self.pending.lock();
            pending.rows.push(row);
            let oversized = pending.rows.len() >= self.max_rows;
            let overdue = pending.last_flush.elapsed() >= self.max_age;
            if oversized || overdue {
                pending.last_flush = Instant::now();
                Some(std::mem::take(&mut pending.rows))
            } else {
                None
            }
        };
        if let Some(rows) = due {
            self.dispatch(rows).await;
        }
    }

    /// Flush whatever is buffered right now.
    pub async fn flush(&self) {
        if self.disabled {
            return;
        }
        let rows = {
            let mut pending = self.pending.lock();
            pending.last_flush = Instant::now();
            std::mem::take(&mut pending.rows)
        };
        self.dispatch(rows).await;
    }

    /// Flush the remainder inline and wait for any in-flight commit.
    /// Call once at shutdown.
    pub async fn drain(&self) {
        if self.disabled {
            return;
        }
        let rows = {
            let mut pending = self.pending.lock();
            pending.last_flush = Instant::now();
            std::mem::take(&mut pending.rows)
        };
        if !rows.is_empty() {
            let _permit = self.commit_gate.lock().await;
            commit(&*self.store, &self.statement, rows).await;
        }
        let handle = self.commit_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn dispatch(&self, rows: Vec<Vec<SqlValue>>) {
        if rows.is_empty() {
            return;
        }

        if self.blocking {
            let _permit = self.commit_gate.lock().await;
            commit(&*self.store, &self.statement, rows).await;
            return;
        }

        // Overload policy: if the previous commit is still holding the
        // gate, discard this batch rather than queueing it.
        let Ok(permit) = Arc::clone(&self.commit_gate).try_lock_owned() else {
            warn!(
                statement = %self.statement,
                dropped = rows.len(),
                "previous commit still running; discarding batch"
            );
            metrics::record_reservoir_dropped(rows.len());
            return;
        };

        let store = Arc::clone(&self.store);
        let statement = self.statement.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            commit(&*store, &statement, rows).await;
        });
        *self.commit_task.lock() = Some(handle);
    }
}

async fn commit(store: &dyn Store, statement: &str, rows: Vec<Vec<SqlValue>>) {
    let count = rows.len();
    // Bulk is still requested for a single row; the store degrades that
    // to a plain execute.
    match store.execute(statement, &rows, true, false).await {
        Ok(_) => metrics::record_reservoir_commit(count),
        Err(e) => {
            metrics::record_reservoir_error();
            error!(statement, rows = count, error = %e, "batch commit failed");
        }
    }
}
