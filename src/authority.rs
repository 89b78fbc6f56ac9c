//! DNS authority adapter contracts.
//!
//! Two independently-authoritative external systems are reconciled against
//! the registry: the IP authority owns A/AAAA records for canonical node
//! names, and the CNAME authority owns per-line alias records. Both are
//! consumed through these traits; the bundled REST implementations live in
//! [`crate::providers`], and the tests substitute recording mocks.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::FleetError;

/// Address record type at the IP authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    A,
    Aaaa,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::A => "A",
            RecordKind::Aaaa => "AAAA",
        }
    }
}

impl crate::node::Proto {
    /// The address record type this protocol maps to.
    pub fn record_kind(self) -> RecordKind {
        match self {
            crate::node::Proto::V4 => RecordKind::A,
            crate::node::Proto::V6 => RecordKind::Aaaa,
        }
    }
}

/// One address record as observed at the IP authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRecord {
    pub id: String,
    pub kind: RecordKind,
    pub content: String,
}

/// One alias record as observed at the CNAME authority. Targets are
/// normalized without the trailing dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CnameRecord {
    pub id: String,
    pub line: String,
    pub target: String,
}

/// Authority for A/AAAA records keyed by canonical name.
#[async_trait]
pub trait IpAuthority: Send + Sync {
    /// All address records, keyed by record name.
    async fn load(&self) -> Result<HashMap<String, IpRecord>, FleetError>;

    /// Create the record if absent, update it otherwise.
    async fn upsert(&self, name: &str, kind: RecordKind, content: &str) -> Result<(), FleetError>;
}

/// Authority for per-line CNAME records keyed by alias name.
#[async_trait]
pub trait CnameAuthority: Send + Sync {
    /// All alias records, keyed by record name; one name can carry one
    /// record per line.
    async fn load(&self) -> Result<HashMap<String, Vec<CnameRecord>>, FleetError>;

    async fn create(&self, name: &str, line: &str, target: &str) -> Result<(), FleetError>;

    async fn update(
        &self,
        record_id: &str,
        name: &str,
        line: &str,
        target: &str,
    ) -> Result<(), FleetError>;

    async fn delete(&self, record_id: &str) -> Result<(), FleetError>;
}
