//! Configuration types for fleet-sync.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::node::{Proto, Scope};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Relational store configuration.
    pub store: StoreConfig,

    /// Cache refresh behaviour.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Telemetry write batching.
    #[serde(default)]
    pub reservoir: ReservoirConfig,

    /// DNS name derivation templates.
    pub naming: NameScheme,

    /// IP (A/AAAA) authority adapter.
    pub ip_authority: IpAuthorityConfig,

    /// Per-line CNAME authority adapter.
    pub cname_authority: CnameAuthorityConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// This host's own node uuid, if pinned for `whoami`.
    #[serde(default)]
    pub node_uuid: Option<String>,
}

/// Relational store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the registry database.
    pub path: PathBuf,
}

/// Cache refresh behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Minimum seconds between refreshes (staleness bound).
    #[serde(default = "default_min_gap")]
    pub min_gap_secs: u64,

    /// Whether node pulls include soft-deleted nodes.
    #[serde(default = "default_true")]
    pub include_deleted: bool,

    /// Whether node pulls exclude the reserved id range.
    #[serde(default = "default_true")]
    pub exclude_reserved: bool,

    /// Whether the user cache keeps only valid accounts.
    #[serde(default = "default_true")]
    pub enabled_only: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_gap_secs: default_min_gap(),
            include_deleted: true,
            exclude_reserved: true,
            enabled_only: true,
        }
    }
}

/// Telemetry write batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservoirConfig {
    /// Size threshold: flush once this many rows are buffered.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    /// Time threshold in seconds, checked on add.
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,

    /// Commit inline instead of spawning; slower but never drops rows.
    #[serde(default)]
    pub blocking: bool,
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            max_age_secs: default_max_age(),
            blocking: false,
        }
    }
}

/// Templates deriving DNS names from node identity.
///
/// `{node}` expands to the numeric node id and `{proto}` to the protocol
/// digit (4 or 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameScheme {
    /// Canonical (externally-addressable) name template,
    /// e.g. `"v{proto}-{node}.direct.example.net"`.
    pub canonical: String,

    /// Alias name template the CNAME authority keys on,
    /// e.g. `"v{proto}-{node}.entry.example.net"`.
    pub alias: String,
}

impl NameScheme {
    pub fn canonical_name(&self, node_id: i64, proto: Proto) -> String {
        expand(&self.canonical, node_id, proto)
    }

    pub fn alias_name(&self, node_id: i64, proto: Proto) -> String {
        expand(&self.alias, node_id, proto)
    }
}

fn expand(template: &str, node_id: i64, proto: Proto) -> String {
    template
        .replace("{proto}", &proto.digit().to_string())
        .replace("{node}", &node_id.to_string())
}

/// Scope to regional-line mapping at the CNAME authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineMap {
    #[serde(default = "default_line_default")]
    pub default: String,

    #[serde(default = "default_line_edu")]
    pub edu: String,
}

impl LineMap {
    pub fn line(&self, scope: Scope) -> &str {
        match scope {
            Scope::Default => &self.default,
            Scope::Edu => &self.edu,
        }
    }

    /// The line identifiers in scope order.
    pub fn all(&self) -> [&str; 2] {
        [&self.default, &self.edu]
    }
}

impl Default for LineMap {
    fn default() -> Self {
        Self {
            default: default_line_default(),
            edu: default_line_edu(),
        }
    }
}

/// A zone at the IP authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Provider-side zone identifier.
    pub id: String,
    /// Zone apex name, used to route records to their zone by suffix.
    pub name: String,
}

/// IP authority adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpAuthorityConfig {
    /// API base, e.g. `"https://api.dns-ip.example/v4"`.
    pub endpoint: String,
    /// Bearer token.
    pub token: String,
    /// Zones to load and write records in.
    pub zones: Vec<ZoneConfig>,
}

/// CNAME authority adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CnameAuthorityConfig {
    /// API base, e.g. `"https://dns.lines.example"`.
    pub endpoint: String,
    /// Bearer token.
    pub token: String,
    /// Provider-side zone identifier.
    pub zone_id: String,
    /// Scope to line mapping.
    #[serde(default)]
    pub lines: LineMap,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "fleet_sync=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_min_gap() -> u64 {
    60
}

fn default_max_rows() -> usize {
    128
}

fn default_max_age() -> u64 {
    300
}

fn default_line_default() -> String {
    "default_view".to_string()
}

fn default_line_edu() -> String {
    "edu_net".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> NameScheme {
        NameScheme {
            canonical: "v{proto}-{node}.direct.example.net".to_string(),
            alias: "v{proto}-{node}.entry.example.net".to_string(),
        }
    }

    #[test]
    fn test_name_expansion() {
        let naming = scheme();
        assert_eq!(
            naming.canonical_name(12, Proto::V4),
            "v4-12.direct.example.net"
        );
        assert_eq!(naming.alias_name(12, Proto::V6), "v6-12.entry.example.net");
    }

    #[test]
    fn test_line_map_lookup() {
        let lines = LineMap::default();
        assert_eq!(lines.line(Scope::Default), "default_view");
        assert_eq!(lines.line(Scope::Edu), "edu_net");
    }
}
