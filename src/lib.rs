//! fleet-sync - relay-fleet registry cache and DNS reconciliation.
//!
//! This crate keeps a relational registry of relay nodes and users cached
//! in memory and reconciles two external DNS authorities against it: an IP
//! authority owning A/AAAA records for canonical node names, and a CNAME
//! authority owning per-regional-line alias records. A write-coalescing
//! reservoir batches the high-frequency telemetry writes flowing the other
//! way.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          fleet-sync                            │
//! │                                                                │
//! │  ┌───────────┐    ┌──────────────────┐    ┌────────────────┐  │
//! │  │   Store   │───▶│  PullCache       │───▶│  Reconciler    │  │
//! │  │ (SQLite)  │    │  nodes / users   │    │  (diff + fix)  │  │
//! │  └───────────┘    └──────────────────┘    └───────┬────────┘  │
//! │        ▲                                          │           │
//! │        │          ┌──────────────────┐            ▼           │
//! │        └──────────│  EditReservoir   │   ┌─────────────────┐  │
//! │          batched  │  (telemetry)     │   │ IP authority    │  │
//! │          commits  └──────────────────┘   │ CNAME authority │  │
//! │                                          └─────────────────┘  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads flow one way (store → cache → reconciler → authorities) and the
//! telemetry write path the other (caller → reservoir → store). Each cache
//! serves its last snapshot within a staleness bound and refreshes in the
//! background past it; the reconciler only ever writes on an
//! observed-vs-desired mismatch, so re-running it against unchanged state
//! is a no-op.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use fleet_sync::{AppContext, Config, Reconciler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: Config = load_config()?;
//!     let ctx = AppContext::from_config(&config).await?;
//!
//!     let reconciler = build_reconciler(&config);
//!     let mut nodes = ctx.nodes.all(true).await?;
//!     let summary = reconciler.run(&mut nodes).await?;
//!     println!("{summary}");
//!
//!     ctx.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod authority;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod netstatus;
pub mod node;
pub mod providers;
pub mod reconciler;
pub mod reservoir;
pub mod store;
pub mod tags;
pub mod telemetry;
pub mod user;
pub mod util;

// Re-export main types
pub use cache::{NodeCache, PullCache, UserCache};
pub use config::{Config, NameScheme, TelemetryConfig};
pub use context::AppContext;
pub use error::FleetError;
pub use reconciler::{ReconcileSummary, Reconciler};
pub use reservoir::EditReservoir;
pub use store::{MutationOutcome, SqliteStore, Store};
