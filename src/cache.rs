//! Staleness-bounded read-through caches over the store.
//!
//! [`PullCache`] keeps the last successful snapshot in memory and refreshes
//! it on demand. A forced pull (or a pull on an empty cache) blocks the
//! caller until the store answers; everything else serves the current
//! snapshot immediately and, once the refresh gap has elapsed, schedules a
//! background fetch. Refresh triggers collapse: while one fetch is in
//! flight, further triggers are dropped, so the store sees at most one
//! fetch per cache at a time.
//!
//! Two sources are provided: [`NodeSource`] replaces the whole snapshot and
//! re-links the relay/mix graph on every pull; [`UserSource`] merges only
//! rows changed since the watermark.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::FleetError;
use crate::metrics::{self, Timer};
use crate::node::{link_mixes, link_relays, Node};
use crate::store::Store;
use crate::user::User;

/// How far the user watermark backs off from fetch time, so rows committed
/// concurrently with a pull are picked up again by the next one.
const WATERMARK_OVERLAP_SECS: i64 = 30;

/// Produces replacement snapshots for a [`PullCache`].
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    type Snapshot: Clone + Default + Send + Sync + 'static;

    /// Label used in logs and metrics.
    const NAME: &'static str;

    fn len(snapshot: &Self::Snapshot) -> usize;

    fn is_empty(snapshot: &Self::Snapshot) -> bool {
        Self::len(snapshot) == 0
    }

    /// Fetch a replacement for `prev`. `watermark` is the epoch-second
    /// watermark of the last successful pull (0 when never pulled).
    /// Returns the new snapshot and the new watermark.
    async fn fetch(
        &self,
        prev: Self::Snapshot,
        watermark: i64,
    ) -> Result<(Self::Snapshot, i64), FleetError>;
}

#[derive(Default)]
struct CacheMeta {
    /// When a refresh last completed or was scheduled; gates the gap check.
    last_refresh: Option<Instant>,
    /// Epoch-second watermark of the last successful pull.
    watermark: i64,
}

struct CacheShared<T> {
    min_gap: Duration,
    /// Snapshot swap lock. The pull routine is the only writer.
    snapshot: RwLock<T>,
    meta: Mutex<CacheMeta>,
    /// Refresh serialization gate, distinct from the swap lock. A
    /// non-blocking acquire failing means a fetch is already in flight.
    refresh_gate: Arc<tokio::sync::Mutex<()>>,
    /// Handle of the in-flight background refresh, for shutdown joins.
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    /// Most recent background refresh failure, readable for diagnostics.
    last_error: RwLock<Option<String>>,
}

/// Generic pull-ahead cache. Cheap to clone; clones share state.
pub struct PullCache<S: SnapshotSource> {
    source: Arc<S>,
    shared: Arc<CacheShared<S::Snapshot>>,
}

impl<S: SnapshotSource> Clone for PullCache<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            shared: Arc::clone(&self.shared),
        }
    }
}

pub type NodeCache = PullCache<NodeSource>;
pub type UserCache = PullCache<UserSource>;

impl<S: SnapshotSource> PullCache<S> {
    pub fn new(source: S, min_gap: Duration) -> Self {
        Self {
            source: Arc::new(source),
            shared: Arc::new(CacheShared {
                min_gap,
                snapshot: RwLock::new(S::Snapshot::default()),
                meta: Mutex::new(CacheMeta::default()),
                refresh_gate: Arc::new(tokio::sync::Mutex::new(())),
                refresh_task: Mutex::new(None),
                last_error: RwLock::new(None),
            }),
        }
    }

    /// Refresh the snapshot.
    ///
    /// With `force` (or on an empty cache) this blocks until the store
    /// answers and propagates failure. Otherwise it is a no-op while the
    /// snapshot is younger than the refresh gap, and past the gap it
    /// schedules a background fetch and returns immediately.
    pub async fn pull(&self, force: bool) -> Result<(), FleetError> {
        let empty = S::is_empty(&self.shared.snapshot.read());
        if force || empty {
            let _permit = self.shared.refresh_gate.lock().await;
            return self.refresh().await;
        }

        {
            let mut meta = self.shared.meta.lock();
            let fresh = meta
                .last_refresh
                .is_some_and(|at| at.elapsed() < self.shared.min_gap);
            if fresh {
                metrics::record_cache_serve_stale(S::NAME);
                return Ok(());
            }
            // Mark now so concurrent callers within the gap do not
            // re-trigger while the background fetch runs.
            meta.last_refresh = Some(Instant::now());
        }
        self.spawn_refresh();
        Ok(())
    }

    /// The most recent background refresh failure, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.read().clone()
    }

    /// Await the in-flight background refresh, if one is running.
    pub async fn join(&self) {
        let handle = self.shared.refresh_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn snapshot(&self) -> S::Snapshot {
        self.shared.snapshot.read().clone()
    }

    async fn refresh(&self) -> Result<(), FleetError> {
        let timer = Timer::start();
        let (prev, watermark) = {
            let prev = self.shared.snapshot.read().clone();
            let watermark = self.shared.meta.lock().watermark;
            (prev, watermark)
        };

        match self.source.fetch(prev, watermark).await {
            Ok((next, new_watermark)) => {
                let size = S::len(&next);
                *self.shared.snapshot.write() = next;
                {
                    let mut meta = self.shared.meta.lock();
                    meta.watermark = new_watermark;
                    meta.last_refresh = Some(Instant::now());
                }
                *self.shared.last_error.write() = None;
                metrics::record_cache_pull(S::NAME, true, timer.elapsed());
                metrics::record_cache_size(S::NAME, size);
                debug!(
                    cache = S::NAME,
                    size,
                    took_ms = timer.elapsed().as_millis() as u64,
                    "snapshot refreshed"
                );
                Ok(())
            }
            Err(e) => {
                *self.shared.last_error.write() = Some(e.to_string());
                metrics::record_cache_pull(S::NAME, false, timer.elapsed());
                Err(e)
            }
        }
    }

    fn spawn_refresh(&self) {
        // Collapse concurrent triggers: if the gate is held, a fetch is
        // already in flight and this trigger is dropped.
        let Ok(permit) = Arc::clone(&self.shared.refresh_gate).try_lock_owned() else {
            debug!(cache = S::NAME, "refresh already in flight; dropping trigger");
            metrics::record_cache_refresh_dropped(S::NAME);
            return;
        };

        let cache = self.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = cache.refresh().await {
                warn!(cache = S::NAME, error = %e, "background refresh failed");
            }
        });
        *self.shared.refresh_task.lock() = Some(handle);
    }
}

/// Full-replace source for the node snapshot.
pub struct NodeSource {
    store: Arc<dyn Store>,
    include_deleted: bool,
    exclude_reserved: bool,
}

impl NodeSource {
    pub fn new(store: Arc<dyn Store>, include_deleted: bool, exclude_reserved: bool) -> Self {
        Self {
            store,
            include_deleted,
            exclude_reserved,
        }
    }
}

#[async_trait]
impl SnapshotSource for NodeSource {
    type Snapshot = Vec<Node>;

    const NAME: &'static str = "nodes";

    fn len(snapshot: &Self::Snapshot) -> usize {
        snapshot.len()
    }

    async fn fetch(
        &self,
        _prev: Self::Snapshot,
        _watermark: i64,
    ) -> Result<(Self::Snapshot, i64), FleetError> {
        let mut nodes = self
            .store
            .query_nodes(self.include_deleted, self.exclude_reserved)
            .await?;
        let relays = self.store.query_relays().await?;
        let mixes = self.store.query_mixes().await?;
        link_relays(&mut nodes, relays);
        link_mixes(&mut nodes, mixes);
        nodes.sort_by_key(|n| n.node_id);
        Ok((nodes, Utc::now().timestamp()))
    }
}

impl PullCache<NodeSource> {
    /// The node list, sorted by id. Callers receive clones and may mutate
    /// them freely.
    pub async fn all(&self, pull: bool) -> Result<Vec<Node>, FleetError> {
        if pull || cache_is_empty(self) {
            self.pull(false).await?;
        }
        Ok(self.snapshot())
    }
}

fn cache_is_empty<S: SnapshotSource>(cache: &PullCache<S>) -> bool {
    S::is_empty(&cache.shared.snapshot.read())
}

/// User snapshot indexed by id with a secondary email index.
#[derive(Debug, Clone, Default)]
pub struct UserIndex {
    by_id: BTreeMap<i64, User>,
    email_to_id: HashMap<String, i64>,
}

impl UserIndex {
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, user_id: i64) -> Option<&User> {
        self.by_id.get(&user_id)
    }

    pub fn get_by_email(&self, email: &str) -> Option<&User> {
        self.email_to_id.get(email).and_then(|id| self.by_id.get(id))
    }

    /// Users sorted by id.
    pub fn users(&self) -> Vec<User> {
        self.by_id.values().cloned().collect()
    }

    /// Remove any stale entry under both indexes, then re-insert the row.
    /// With `valid_only`, a row failing the validity policy is purged
    /// instead of re-inserted.
    pub fn merge(&mut self, user: User, valid_only: bool) {
        if let Some(old_id) = self.email_to_id.remove(&user.email) {
            self.by_id.remove(&old_id);
        }
        if let Some(old) = self.by_id.remove(&user.user_id) {
            self.email_to_id.remove(&old.email);
        }
        if valid_only && !user.is_valid() {
            debug!(user_id = user.user_id, "purging invalid user from cache");
            return;
        }
        self.email_to_id.insert(user.email.clone(), user.user_id);
        self.by_id.insert(user.user_id, user);
    }
}

/// Incremental-merge source for the user snapshot.
pub struct UserSource {
    store: Arc<dyn Store>,
    enabled_only: bool,
}

impl UserSource {
    pub fn new(store: Arc<dyn Store>, enabled_only: bool) -> Self {
        Self {
            store,
            enabled_only,
        }
    }
}

#[async_trait]
impl SnapshotSource for UserSource {
    type Snapshot = UserIndex;

    const NAME: &'static str = "users";

    fn len(snapshot: &Self::Snapshot) -> usize {
        snapshot.len()
    }

    async fn fetch(
        &self,
        prev: Self::Snapshot,
        watermark: i64,
    ) -> Result<(Self::Snapshot, i64), FleetError> {
        // Fetch changed rows unfiltered: a user who just became invalid
        // must still arrive here so the merge can purge them.
        let changed = self.store.query_users(false, watermark).await?;
        let fetched = changed.len();
        let mut index = prev;
        for user in changed {
            index.merge(user, self.enabled_only);
        }
        debug!(cache = Self::NAME, fetched, total = index.len(), "merged changed users");
        Ok((index, Utc::now().timestamp() - WATERMARK_OVERLAP_SECS))
    }
}

impl PullCache<UserSource> {
    /// The user list, sorted by id. Callers receive clones.
    pub async fn all(&self, pull: bool) -> Result<Vec<User>, FleetError> {
        if pull || cache_is_empty(self) {
            self.pull(false).await?;
        }
        Ok(self.shared.snapshot.read().users())
    }

    /// Look one user up by email. A cached entry younger than the refresh
    /// gap (by its own change watermark) is served as-is unless `force`;
    /// otherwise the store is consulted and the result merged back.
    pub async fn get_one(&self, email: &str, force: bool) -> Result<Option<User>, FleetError> {
        if !force {
            let cached = {
                let snapshot = self.shared.snapshot.read();
                snapshot.get_by_email(email).cloned()
            };
            if let Some(user) = cached {
                let age = Utc::now().timestamp() - user.last_change;
                if age < self.shared.min_gap.as_secs() as i64 {
                    return Ok(Some(user));
                }
            }
        }

        let Some(user) = self.source.store.get_user_by_email(email).await? else {
            return Ok(None);
        };
        let fetched = user.clone();
        self.shared
            .snapshot
            .write()
            .merge(user, self.source.enabled_only);
        Ok(Some(fetched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TagSet;
    use uuid::Uuid;

    fn make_user(user_id: i64, email: &str, enabled: bool) -> User {
        User {
            user_id,
            enabled,
            blocked: false,
            username: format!("u{user_id}"),
            password: "pw".to_string(),
            email: email.to_string(),
            tags: TagSet::new(),
            registered_at: 0,
            last_active_at: 0,
            upload: 0,
            download: 0,
            balance: 0,
            uuid: Uuid::new_v4(),
            last_change: 0,
            remarks: None,
        }
    }

    #[test]
    fn test_merge_inserts_under_both_indexes() {
        let mut index = UserIndex::default();
        index.merge(make_user(1, "a@example.com", true), true);
        assert_eq!(index.get(1).unwrap().email, "a@example.com");
        assert_eq!(index.get_by_email("a@example.com").unwrap().user_id, 1);
    }

    #[test]
    fn test_merge_replaces_changed_email() {
        let mut index = UserIndex::default();
        index.merge(make_user(1, "old@example.com", true), true);
        index.merge(make_user(1, "new@example.com", true), true);
        assert_eq!(index.len(), 1);
        assert!(index.get_by_email("old@example.com").is_none());
        assert_eq!(index.get_by_email("new@example.com").unwrap().user_id, 1);
    }

    #[test]
    fn test_merge_purges_invalid_under_policy() {
        let mut index = UserIndex::default();
        index.merge(make_user(1, "a@example.com", true), true);
        index.merge(make_user(1, "a@example.com", false), true);
        assert!(index.is_empty());
    }

    #[test]
    fn test_merge_keeps_invalid_without_policy() {
        let mut index = UserIndex::default();
        index.merge(make_user(1, "a@example.com", false), false);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_users_sorted_by_id() {
        let mut index = UserIndex::default();
        index.merge(make_user(5, "e@example.com", true), true);
        index.merge(make_user(2, "b@example.com", true), true);
        let ids: Vec<i64> = index.users().iter().map(|u| u.user_id).collect();
        assert_eq!(ids, vec![2, 5]);
    }
}
