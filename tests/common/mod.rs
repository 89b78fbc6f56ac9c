//! Shared test infrastructure: recording mocks for the store and both
//! DNS authorities, plus entity builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::sleep;
use uuid::Uuid;

use fleet_sync::authority::{
    CnameAuthority, CnameRecord, IpAuthority, IpRecord, RecordKind,
};
use fleet_sync::config::{LineMap, NameScheme};
use fleet_sync::error::FleetError;
use fleet_sync::node::{MixRow, Node, Relay};
use fleet_sync::reconciler::Reconciler;
use fleet_sync::store::{MutationOutcome, SqlValue, Store};
use fleet_sync::tags::TagSet;
use fleet_sync::user::User;

// --- Builders ---

pub fn make_node(node_id: i64, name: &str, ipv4: Option<&str>, ipv6: Option<&str>) -> Node {
    Node {
        node_id,
        uuid: Uuid::new_v4(),
        deleted: false,
        hidden: false,
        name: name.to_string(),
        weight: 1.0,
        tags: TagSet::new(),
        ipv4: ipv4.map(|ip| ip.parse().unwrap()),
        ipv6: ipv6.map(|ip| ip.parse().unwrap()),
        port: 4433,
        properties: TagSet::new(),
        remarks: None,
        idc: None,
        upload: 0,
        download: 0,
        traffic_reset_day: 1,
        traffic_limit: None,
        relay_in: Vec::new(),
        relay_out: Vec::new(),
        mix: Default::default(),
        dns: Default::default(),
    }
}

pub fn make_user(user_id: i64, email: &str, enabled: bool, last_change: i64) -> User {
    User {
        user_id,
        enabled,
        blocked: false,
        username: format!("u{user_id}"),
        password: "secret".to_string(),
        email: email.to_string(),
        tags: TagSet::new(),
        registered_at: 1_700_000_000,
        last_active_at: 1_700_000_000,
        upload: 0,
        download: 0,
        balance: 0,
        uuid: Uuid::new_v4(),
        last_change,
        remarks: None,
    }
}

pub fn naming() -> NameScheme {
    NameScheme {
        canonical: "v{proto}-{node}.direct.example.net".to_string(),
        alias: "v{proto}-{node}.entry.example.net".to_string(),
    }
}

pub fn lines() -> LineMap {
    LineMap {
        default: "default_view".to_string(),
        edu: "edu_net".to_string(),
    }
}

pub fn reconciler(ip: Arc<MockIpAuthority>, cname: Arc<MockCnameAuthority>) -> Reconciler {
    Reconciler::new(ip, cname, naming(), lines())
}

// --- MockStore ---

#[derive(Default)]
pub struct MockState {
    pub nodes: Vec<Node>,
    pub relays: Vec<Relay>,
    pub mixes: Vec<MixRow>,
    pub users: Vec<User>,
    pub node_queries: usize,
    pub user_queries: usize,
    pub email_queries: usize,
    /// (statement, rows, bulk) per execute call.
    pub executes: Vec<(String, Vec<Vec<SqlValue>>, bool)>,
    pub fail_queries: bool,
}

/// In-memory store with call counters and an optional artificial delay.
#[derive(Default)]
pub struct MockStore {
    pub state: Mutex<MockState>,
    pub delay: Mutex<Duration>,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) {
        self.state.lock().nodes = nodes;
    }

    pub fn set_users(&self, users: Vec<User>) {
        self.state.lock().users = users;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().fail_queries = failing;
    }

    pub fn node_queries(&self) -> usize {
        self.state.lock().node_queries
    }

    pub fn user_queries(&self) -> usize {
        self.state.lock().user_queries
    }

    pub fn email_queries(&self) -> usize {
        self.state.lock().email_queries
    }

    pub fn executes(&self) -> Vec<(String, Vec<Vec<SqlValue>>, bool)> {
        self.state.lock().executes.clone()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    fn check_failing(&self) -> Result<(), FleetError> {
        if self.state.lock().fail_queries {
            return Err(FleetError::Row("mock store failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MockStore {
    async fn query_users(
        &self,
        enabled_only: bool,
        changed_after: i64,
    ) -> Result<Vec<User>, FleetError> {
        self.pause().await;
        self.check_failing()?;
        let mut state = self.state.lock();
        state.user_queries += 1;
        Ok(state
            .users
            .iter()
            .filter(|u| u.last_change > changed_after)
            .filter(|u| !enabled_only || u.is_valid())
            .cloned()
            .collect())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, FleetError> {
        self.pause().await;
        self.check_failing()?;
        let mut state = self.state.lock();
        state.email_queries += 1;
        Ok(state.users.iter().find(|u| u.email == email).cloned())
    }

    async fn query_nodes(
        &self,
        include_deleted: bool,
        exclude_reserved: bool,
    ) -> Result<Vec<Node>, FleetError> {
        self.pause().await;
        self.check_failing()?;
        let mut state = self.state.lock();
        state.node_queries += 1;
        Ok(state
            .nodes
            .iter()
            .filter(|n| include_deleted || !n.deleted)
            .filter(|n| !exclude_reserved || n.node_id < 10_000)
            .cloned()
            .collect())
    }

    async fn query_relays(&self) -> Result<Vec<Relay>, FleetError> {
        self.check_failing()?;
        Ok(self.state.lock().relays.clone())
    }

    async fn query_mixes(&self) -> Result<Vec<MixRow>, FleetError> {
        self.check_failing()?;
        Ok(self.state.lock().mixes.clone())
    }

    async fn execute(
        &self,
        statement: &str,
        args: &[Vec<SqlValue>],
        bulk: bool,
        _expect_rows: bool,
    ) -> Result<Option<Vec<Vec<SqlValue>>>, FleetError> {
        self.pause().await;
        self.check_failing()?;
        self.state
            .lock()
            .executes
            .push((statement.to_string(), args.to_vec(), bulk));
        Ok(None)
    }

    async fn reset_credentials(
        &self,
        user_id: i64,
        password: &str,
        uuid: Uuid,
    ) -> MutationOutcome {
        let mut state = self.state.lock();
        match state.users.iter_mut().find(|u| u.user_id == user_id) {
            Some(user) => {
                user.password = password.to_string();
                user.uuid = uuid;
                MutationOutcome::Applied
            }
            None => MutationOutcome::Rejected(format!("no user {user_id}")),
        }
    }

    async fn set_user_enabled(&self, user_id: i64, enabled: bool) -> MutationOutcome {
        let mut state = self.state.lock();
        match state.users.iter_mut().find(|u| u.user_id == user_id) {
            Some(user) => {
                user.enabled = enabled;
                MutationOutcome::Applied
            }
            None => MutationOutcome::Rejected(format!("no user {user_id}")),
        }
    }

    async fn reset_balance(&self, user_id: i64, balance: i64) -> MutationOutcome {
        let mut state = self.state.lock();
        match state.users.iter_mut().find(|u| u.user_id == user_id) {
            Some(user) => {
                user.balance = balance;
                MutationOutcome::Applied
            }
            None => MutationOutcome::Rejected(format!("no user {user_id}")),
        }
    }
}

// --- MockIpAuthority ---

/// IP authority mock that applies upserts to its own record map, so a
/// second reconciliation run observes the effect of the first.
#[derive(Default)]
pub struct MockIpAuthority {
    pub records: Mutex<HashMap<String, IpRecord>>,
    pub upserts: Mutex<Vec<(String, RecordKind, String)>>,
    pub fail_upserts: Mutex<bool>,
    next_id: AtomicU64,
}

impl MockIpAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, name: &str, kind: RecordKind, content: &str) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.records.lock().insert(
            name.to_string(),
            IpRecord {
                id: format!("ip-{id}"),
                kind,
                content: content.to_string(),
            },
        );
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.lock().len()
    }

    pub fn content_of(&self, name: &str) -> Option<String> {
        self.records.lock().get(name).map(|r| r.content.clone())
    }
}

#[async_trait]
impl IpAuthority for MockIpAuthority {
    async fn load(&self) -> Result<HashMap<String, IpRecord>, FleetError> {
        Ok(self.records.lock().clone())
    }

    async fn upsert(&self, name: &str, kind: RecordKind, content: &str) -> Result<(), FleetError> {
        if *self.fail_upserts.lock() {
            return Err(FleetError::Authority {
                authority: "ip",
                message: "mock upsert failure".to_string(),
            });
        }
        self.upserts
            .lock()
            .push((name.to_string(), kind, content.to_string()));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.records.lock().insert(
            name.to_string(),
            IpRecord {
                id: format!("ip-{id}"),
                kind,
                content: content.to_string(),
            },
        );
        Ok(())
    }
}

// --- MockCnameAuthority ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CnameOp {
    Create {
        name: String,
        line: String,
        target: String,
    },
    Update {
        id: String,
        target: String,
    },
    Delete {
        id: String,
    },
}

/// CNAME authority mock that applies writes to its own record map.
#[derive(Default)]
pub struct MockCnameAuthority {
    pub records: Mutex<HashMap<String, Vec<CnameRecord>>>,
    pub ops: Mutex<Vec<CnameOp>>,
    next_id: AtomicU64,
}

impl MockCnameAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, name: &str, line: &str, target: &str) -> String {
        let id = format!("cn-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records.lock().entry(name.to_string()).or_default().push(CnameRecord {
            id: id.clone(),
            line: line.to_string(),
            target: target.to_string(),
        });
        id
    }

    pub fn ops(&self) -> Vec<CnameOp> {
        self.ops.lock().clone()
    }

    pub fn op_count(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn records_for(&self, name: &str, line: &str) -> Vec<CnameRecord> {
        self.records
            .lock()
            .get(name)
            .map(|rs| rs.iter().filter(|r| r.line == line).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CnameAuthority for MockCnameAuthority {
    async fn load(&self) -> Result<HashMap<String, Vec<CnameRecord>>, FleetError> {
        Ok(self.records.lock().clone())
    }

    async fn create(&self, name: &str, line: &str, target: &str) -> Result<(), FleetError> {
        self.ops.lock().push(CnameOp::Create {
            name: name.to_string(),
            line: line.to_string(),
            target: target.to_string(),
        });
        self.seed(name, line, target);
        Ok(())
    }

    async fn update(
        &self,
        record_id: &str,
        _name: &str,
        _line: &str,
        target: &str,
    ) -> Result<(), FleetError> {
        self.ops.lock().push(CnameOp::Update {
            id: record_id.to_string(),
            target: target.to_string(),
        });
        for records in self.records.lock().values_mut() {
            for record in records.iter_mut() {
                if record.id == record_id {
                    record.target = target.to_string();
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, record_id: &str) -> Result<(), FleetError> {
        self.ops.lock().push(CnameOp::Delete {
            id: record_id.to_string(),
        });
        for records in self.records.lock().values_mut() {
            records.retain(|r| r.id != record_id);
        }
        Ok(())
    }
}
