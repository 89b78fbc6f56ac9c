//! Relational store gateway.
//!
//! [`Store`] is the seam between the fleet registry and everything that
//! reads or writes it: the caches pull snapshots through it, the reservoir
//! commits telemetry batches through it, and the CLI's mutation helpers go
//! through it. [`SqliteStore`] is the bundled implementation; it opens one
//! connection per call and closes it before returning, so no connection
//! state outlives an operation.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Row, Sqlite, SqliteConnection, TypeInfo, ValueRef};
use tracing::debug;
use uuid::Uuid;

use crate::error::FleetError;
use crate::node::{MixRow, Node, Relay, Scope};
use crate::tags::TagSet;
use crate::user::User;

/// Node ids at or above this value are reserved for provisioning
/// experiments and excluded from normal pulls.
pub const RESERVED_NODE_ID_FLOOR: i64 = 10_000;

/// A positional SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

/// Result of a mutation helper. Helpers report failure instead of
/// returning `Err`, so callers can surface the message to an operator
/// without unwinding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    Rejected(String),
}

impl MutationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MutationOutcome::Applied)
    }
}

/// Statement templates for the high-frequency telemetry write path.
/// Each is the fixed template of one [`EditReservoir`](crate::reservoir::EditReservoir).
pub mod statements {
    /// One traffic sample per (user, node) pair.
    pub const INSERT_TRAFFIC_LOG: &str =
        "INSERT INTO traffic_log (user_id, node_id, upload, download, ts) VALUES (?, ?, ?, ?, ?)";

    /// Roll a traffic delta into a user's cumulative counters.
    pub const UPDATE_USER_COUNTERS: &str = "UPDATE users SET balance = balance + (?), \
         upload = upload + (?), download = download + (?), last_change = ?, last_active_at = ? \
         WHERE user_id = ?";

    /// Roll a traffic delta into a node's cumulative counters.
    pub const UPDATE_NODE_COUNTERS: &str =
        "UPDATE nodes SET upload = upload + (?), download = download + (?) WHERE uuid = ?";
}

/// Query/execute contract against the relational backend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Users with `last_change > changed_after`, optionally restricted to
    /// valid (enabled and unblocked) accounts.
    async fn query_users(
        &self,
        enabled_only: bool,
        changed_after: i64,
    ) -> Result<Vec<User>, FleetError>;

    /// Look one user up by email, regardless of validity.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, FleetError>;

    /// All nodes, ordered by id.
    async fn query_nodes(
        &self,
        include_deleted: bool,
        exclude_reserved: bool,
    ) -> Result<Vec<Node>, FleetError>;

    /// All relay edges, unlinked.
    async fn query_relays(&self) -> Result<Vec<Relay>, FleetError>;

    /// All mix rows, unlinked. Rows with an unknown scope are skipped.
    async fn query_mixes(&self) -> Result<Vec<MixRow>, FleetError>;

    /// Execute one statement. With `bulk`, every row in `args` is applied
    /// in a single transaction; a one-row bulk call degrades to a plain
    /// execute. With `expect_rows`, the result rows are returned.
    async fn execute(
        &self,
        statement: &str,
        args: &[Vec<SqlValue>],
        bulk: bool,
        expect_rows: bool,
    ) -> Result<Option<Vec<Vec<SqlValue>>>, FleetError>;

    /// Rotate a user's password and uuid, advancing the change watermark.
    async fn reset_credentials(&self, user_id: i64, password: &str, uuid: Uuid)
        -> MutationOutcome;

    /// Enable or disable a user, advancing the change watermark.
    async fn set_user_enabled(&self, user_id: i64, enabled: bool) -> MutationOutcome;

    /// Overwrite a user's traffic balance, advancing the change watermark.
    async fn reset_balance(&self, user_id: i64, balance: i64) -> MutationOutcome;
}

const NODE_COLUMNS: &str = "node_id, uuid, deleted, hidden, name, weight, tag, ipv4, ipv6, \
     port, properties, remarks, idc, upload, download, traffic_reset_day, traffic_limit";
const USER_COLUMNS: &str = "user_id, enabled, blocked, username, password, email, tag, \
     registered_at, last_active_at, upload, download, balance, uuid, last_change, remarks";
const RELAY_COLUMNS: &str =
    "relay_id, name, tunnel, tag, properties, hidden, source_uuid, target_uuid, port";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS nodes (
        node_id INTEGER PRIMARY KEY,
        uuid TEXT NOT NULL UNIQUE,
        deleted INTEGER NOT NULL DEFAULT 0,
        hidden INTEGER NOT NULL DEFAULT 0,
        name TEXT NOT NULL,
        weight REAL NOT NULL DEFAULT 1.0,
        tag TEXT,
        ipv4 TEXT,
        ipv6 TEXT,
        port INTEGER NOT NULL DEFAULT 0,
        properties TEXT,
        remarks TEXT,
        idc TEXT,
        upload INTEGER NOT NULL DEFAULT 0,
        download INTEGER NOT NULL DEFAULT 0,
        traffic_reset_day INTEGER NOT NULL DEFAULT 1,
        traffic_limit INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS users (
        user_id INTEGER PRIMARY KEY,
        enabled INTEGER NOT NULL DEFAULT 1,
        blocked INTEGER NOT NULL DEFAULT 0,
        username TEXT NOT NULL,
        password TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        tag TEXT,
        registered_at INTEGER NOT NULL DEFAULT 0,
        last_active_at INTEGER NOT NULL DEFAULT 0,
        upload INTEGER NOT NULL DEFAULT 0,
        download INTEGER NOT NULL DEFAULT 0,
        balance INTEGER NOT NULL DEFAULT 0,
        uuid TEXT NOT NULL UNIQUE,
        last_change INTEGER NOT NULL DEFAULT 0,
        remarks TEXT
    )",
    "CREATE TABLE IF NOT EXISTS relays (
        relay_id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        tunnel TEXT,
        tag TEXT,
        properties TEXT,
        hidden INTEGER NOT NULL DEFAULT 0,
        source_uuid TEXT NOT NULL,
        target_uuid TEXT NOT NULL,
        port INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS mixes (
        source_uuid TEXT NOT NULL,
        target_uuid TEXT NOT NULL,
        scope TEXT NOT NULL,
        PRIMARY KEY (source_uuid, scope)
    )",
    "CREATE TABLE IF NOT EXISTS traffic_log (
        log_id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        node_id INTEGER NOT NULL,
        upload INTEGER NOT NULL,
        download INTEGER NOT NULL,
        ts INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_users_last_change ON users (last_change)",
];

/// SQLite-backed registry gateway with a per-call connection.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    options: SqliteConnectOptions,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            options: SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
        }
    }

    async fn connect(&self) -> Result<SqliteConnection, FleetError> {
        Ok(SqliteConnection::connect_with(&self.options).await?)
    }

    /// Create the registry tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), FleetError> {
        let mut conn = self.connect().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut conn).await?;
        }
        conn.close().await?;
        Ok(())
    }

    async fn fetch_users(&self, sql: &str, binds: Vec<SqlValue>) -> Result<Vec<User>, FleetError> {
        let mut conn = self.connect().await?;
        let mut query = sqlx::query(sql);
        for value in &binds {
            query = bind_value(query, value);
        }
        let rows = query.fetch_all(&mut conn).await?;
        conn.close().await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn touch_user(&self, sql: &str, binds: Vec<SqlValue>) -> MutationOutcome {
        let result = self.execute(sql, &[binds], false, false).await;
        match result {
            Ok(_) => MutationOutcome::Applied,
            Err(e) => MutationOutcome::Rejected(format!("store error: {e}")),
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn query_users(
        &self,
        enabled_only: bool,
        changed_after: i64,
    ) -> Result<Vec<User>, FleetError> {
        let mut sql = format!("SELECT {USER_COLUMNS} FROM users WHERE last_change > ?");
        if enabled_only {
            sql.push_str(" AND enabled != 0 AND blocked = 0");
        }
        sql.push_str(" ORDER BY user_id");
        self.fetch_users(&sql, vec![SqlValue::Int(changed_after)]).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, FleetError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
        let mut users = self.fetch_users(&sql, vec![SqlValue::from(email)]).await?;
        Ok(users.pop())
    }

    async fn query_nodes(
        &self,
        include_deleted: bool,
        exclude_reserved: bool,
    ) -> Result<Vec<Node>, FleetError> {
        let mut sql = format!("SELECT {NODE_COLUMNS} FROM nodes");
        let mut conditions: Vec<&str> = Vec::new();
        if !include_deleted {
            conditions.push("deleted = 0");
        }
        if exclude_reserved {
            conditions.push("node_id < ?");
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY node_id");

        let mut conn = self.connect().await?;
        let mut query = sqlx::query(&sql);
        if exclude_reserved {
            query = query.bind(RESERVED_NODE_ID_FLOOR);
        }
        let rows = query.fetch_all(&mut conn).await?;
        conn.close().await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn query_relays(&self) -> Result<Vec<Relay>, FleetError> {
        let sql = format!("SELECT {RELAY_COLUMNS} FROM relays ORDER BY relay_id");
        let mut conn = self.connect().await?;
        let rows = sqlx::query(&sql).fetch_all(&mut conn).await?;
        conn.close().await?;
        rows.iter().map(relay_from_row).collect()
    }

    async fn query_mixes(&self) -> Result<Vec<MixRow>, FleetError> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query("SELECT source_uuid, target_uuid, scope FROM mixes")
            .fetch_all(&mut conn)
            .await?;
        conn.close().await?;

        let mut mixes = Vec::with_capacity(rows.len());
        for row in &rows {
            let scope_raw: String = row.try_get("scope")?;
            let Some(scope) = Scope::parse(&scope_raw) else {
                debug!(scope = %scope_raw, "skipping mix row with unknown scope");
                continue;
            };
            mixes.push(MixRow {
                source_uuid: parse_uuid(row.try_get("source_uuid")?)?,
                target_uuid: parse_uuid(row.try_get("target_uuid")?)?,
                scope,
            });
        }
        Ok(mixes)
    }

    async fn execute(
        &self,
        statement: &str,
        args: &[Vec<SqlValue>],
        bulk: bool,
        expect_rows: bool,
    ) -> Result<Option<Vec<Vec<SqlValue>>>, FleetError> {
        debug!(statement, rows = args.len(), bulk, "executing statement");
        let mut conn = self.connect().await?;

        if expect_rows {
            let mut query = sqlx::query(statement);
            if let Some(first) = args.first() {
                for value in first {
                    query = bind_value(query, value);
                }
            }
            let rows = query.fetch_all(&mut conn).await?;
            conn.close().await?;
            let values = rows.iter().map(row_to_values).collect::<Result<_, _>>()?;
            return Ok(Some(values));
        }

        if bulk && args.len() > 1 {
            let mut tx = conn.begin().await?;
            for row in args {
                let mut query = sqlx::query(statement);
                for value in row {
                    query = bind_value(query, value);
                }
                query.execute(&mut *tx).await?;
            }
            tx.commit().await?;
        } else {
            let mut query = sqlx::query(statement);
            if let Some(first) = args.first() {
                for value in first {
                    query = bind_value(query, value);
                }
            }
            query.execute(&mut conn).await?;
        }
        conn.close().await?;
        Ok(None)
    }

    async fn reset_credentials(
        &self,
        user_id: i64,
        password: &str,
        uuid: Uuid,
    ) -> MutationOutcome {
        self.touch_user(
            "UPDATE users SET password = ?, uuid = ?, last_change = ? WHERE user_id = ?",
            vec![
                SqlValue::from(password),
                SqlValue::Text(uuid.to_string()),
                SqlValue::Int(Utc::now().timestamp()),
                SqlValue::Int(user_id),
            ],
        )
        .await
    }

    async fn set_user_enabled(&self, user_id: i64, enabled: bool) -> MutationOutcome {
        self.touch_user(
            "UPDATE users SET enabled = ?, last_change = ? WHERE user_id = ?",
            vec![
                SqlValue::Int(enabled as i64),
                SqlValue::Int(Utc::now().timestamp()),
                SqlValue::Int(user_id),
            ],
        )
        .await
    }

    async fn reset_balance(&self, user_id: i64, balance: i64) -> MutationOutcome {
        self.touch_user(
            "UPDATE users SET balance = ?, last_change = ? WHERE user_id = ?",
            vec![
                SqlValue::Int(balance),
                SqlValue::Int(Utc::now().timestamp()),
                SqlValue::Int(user_id),
            ],
        )
        .await
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(Option::<i64>::None),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Real(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
    }
}

fn row_to_values(row: &SqliteRow) -> Result<Vec<SqlValue>, FleetError> {
    let mut values = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        let value = match raw.type_info().name() {
            "INTEGER" | "BOOLEAN" => SqlValue::Int(row.try_get(i)?),
            "REAL" => SqlValue::Real(row.try_get(i)?),
            "TEXT" => SqlValue::Text(row.try_get(i)?),
            other => {
                return Err(FleetError::Row(format!(
                    "unsupported column type {other} in column {}",
                    row.column(i).name()
                )))
            }
        };
        values.push(value);
    }
    Ok(values)
}

/// Null, empty, and legacy `"None"`/`"NULL"` markers all read as absent.
fn opt_text(raw: Option<String>) -> Option<String> {
    raw.filter(|s| !s.is_empty() && s != "None" && s != "NULL")
}

fn parse_uuid(raw: String) -> Result<Uuid, FleetError> {
    Ok(Uuid::parse_str(raw.trim())?)
}

fn node_from_row(row: &SqliteRow) -> Result<Node, FleetError> {
    let ipv4 = opt_text(row.try_get("ipv4")?)
        .map(|s| s.parse().map_err(|_| FleetError::Row(format!("bad ipv4 {s:?}"))))
        .transpose()?;
    let ipv6 = opt_text(row.try_get("ipv6")?)
        .map(|s| s.parse().map_err(|_| FleetError::Row(format!("bad ipv6 {s:?}"))))
        .transpose()?;

    Ok(Node {
        node_id: row.try_get("node_id")?,
        uuid: parse_uuid(row.try_get("uuid")?)?,
        deleted: row.try_get::<i64, _>("deleted")? != 0,
        hidden: row.try_get::<i64, _>("hidden")? != 0,
        name: row.try_get("name")?,
        weight: row.try_get("weight")?,
        tags: TagSet::parse(row.try_get::<Option<String>, _>("tag")?.as_deref()),
        ipv4,
        ipv6,
        port: row.try_get::<i64, _>("port")? as u16,
        properties: TagSet::parse(row.try_get::<Option<String>, _>("properties")?.as_deref()),
        remarks: opt_text(row.try_get("remarks")?),
        idc: opt_text(row.try_get("idc")?),
        upload: row.try_get::<i64, _>("upload")?.max(0) as u64,
        download: row.try_get::<i64, _>("download")?.max(0) as u64,
        traffic_reset_day: row.try_get::<i64, _>("traffic_reset_day")? as u8,
        traffic_limit: row
            .try_get::<Option<i64>, _>("traffic_limit")?
            .map(|v| v.max(0) as u64),
        relay_in: Vec::new(),
        relay_out: Vec::new(),
        mix: Default::default(),
        dns: Default::default(),
    })
}

fn relay_from_row(row: &SqliteRow) -> Result<Relay, FleetError> {
    Ok(Relay {
        relay_id: row.try_get("relay_id")?,
        name: row.try_get("name")?,
        tunnel: opt_text(row.try_get("tunnel")?),
        tags: TagSet::parse(row.try_get::<Option<String>, _>("tag")?.as_deref()),
        properties: TagSet::parse(row.try_get::<Option<String>, _>("properties")?.as_deref()),
        hidden: row.try_get::<i64, _>("hidden")? != 0,
        source_uuid: parse_uuid(row.try_get("source_uuid")?)?,
        target_uuid: parse_uuid(row.try_get("target_uuid")?)?,
        port: row.try_get::<i64, _>("port")? as u16,
        source: None,
        target: None,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<User, FleetError> {
    Ok(User {
        user_id: row.try_get("user_id")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        blocked: row.try_get::<i64, _>("blocked")? != 0,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        email: row.try_get("email")?,
        tags: TagSet::parse(row.try_get::<Option<String>, _>("tag")?.as_deref()),
        registered_at: row.try_get("registered_at")?,
        last_active_at: row.try_get("last_active_at")?,
        upload: row.try_get::<i64, _>("upload")?.max(0) as u64,
        download: row.try_get::<i64, _>("download")?.max(0) as u64,
        balance: row.try_get("balance")?,
        uuid: parse_uuid(row.try_get("uuid")?)?,
        last_change: row.try_get("last_change")?,
        remarks: opt_text(row.try_get("remarks")?),
    })
}
