//! Relay-fleet node data model and graph linking.
//!
//! Nodes, relays, and mixes are loaded as independent row sets and linked
//! into a graph after every full pull: each relay resolves its endpoints
//! into `relay_in`/`relay_out`, and each mix row resolves into the source
//! node's per-scope `mix` map. References that point at uuids absent from
//! the snapshot are dropped, not errored.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use tracing::debug;
use uuid::Uuid;

use crate::tags::TagSet;

/// Address protocol selector for the fleet's dual-stack fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proto {
    V4,
    V6,
}

impl Proto {
    pub const ALL: [Proto; 2] = [Proto::V4, Proto::V6];

    /// The protocol digit used in DNS name templates.
    pub fn digit(self) -> char {
        match self {
            Proto::V4 => '4',
            Proto::V6 => '6',
        }
    }
}

/// A pair of values indexed by [`Proto`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtoPair<T> {
    pub v4: T,
    pub v6: T,
}

impl<T> ProtoPair<T> {
    pub fn get(&self, proto: Proto) -> &T {
        match proto {
            Proto::V4 => &self.v4,
            Proto::V6 => &self.v6,
        }
    }

    pub fn get_mut(&mut self, proto: Proto) -> &mut T {
        match proto {
            Proto::V4 => &mut self.v4,
            Proto::V6 => &mut self.v6,
        }
    }
}

/// Regional routing scope under which a distinct CNAME may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Default,
    Edu,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::Default, Scope::Edu];

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Default => "default",
            Scope::Edu => "edu",
        }
    }

    /// Parse a scope column. Unknown scopes return `None` and the row is
    /// skipped by the caller.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "default" => Some(Scope::Default),
            "edu" => Some(Scope::Edu),
            _ => None,
        }
    }
}

/// Observed DNS authority state for one node and protocol, populated
/// lazily by the reconciler. Never written by the store layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsShadow {
    /// Content of the A/AAAA record at the IP authority, if any.
    pub ip: Option<String>,
    /// Observed CNAME target per scope at the line authority.
    pub cname: BTreeMap<Scope, String>,
}

/// A resolved, owned reference to another node in the same snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub node_id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

/// A relay server in the fleet.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub node_id: i64,
    pub uuid: Uuid,
    pub deleted: bool,
    pub hidden: bool,
    pub name: String,
    pub weight: f64,
    pub tags: TagSet,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub port: u16,
    pub properties: TagSet,
    pub remarks: Option<String>,
    /// Datacenter label.
    pub idc: Option<String>,
    /// Cumulative traffic counters in bytes.
    pub upload: u64,
    pub download: u64,
    /// Day of month on which the node's traffic counter resets.
    pub traffic_reset_day: u8,
    /// Monthly traffic cap in bytes, if the node has one.
    pub traffic_limit: Option<u64>,

    /// Relays terminating at this node. Derived, rebuilt on every pull.
    pub relay_in: Vec<Relay>,
    /// Relays originating from this node. Derived, rebuilt on every pull.
    pub relay_out: Vec<Relay>,
    /// Per-scope alias target. At most one entry per scope. Derived.
    pub mix: BTreeMap<Scope, NodeRef>,
    /// Observed DNS authority state per protocol. Reconciler-owned.
    pub dns: ProtoPair<DnsShadow>,
}

impl Node {
    /// The declared address for the given protocol.
    pub fn addr(&self, proto: Proto) -> Option<String> {
        match proto {
            Proto::V4 => self.ipv4.map(|ip| ip.to_string()),
            Proto::V6 => self.ipv6.map(|ip| ip.to_string()),
        }
    }

    pub fn as_ref(&self) -> NodeRef {
        NodeRef {
            node_id: self.node_id,
            uuid: self.uuid,
            name: self.name.clone(),
            ipv4: self.ipv4,
            ipv6: self.ipv6,
        }
    }

    /// Whether this node may serve a user carrying `user_tags`.
    ///
    /// The node's tags must be a subset of the user's, and when a protocol
    /// is requested the node must declare an address for it.
    pub fn can_serve(&self, user_tags: &TagSet, proto: Option<Proto>) -> bool {
        match proto {
            Some(Proto::V4) if self.ipv4.is_none() => return false,
            Some(Proto::V6) if self.ipv6.is_none() => return false,
            _ => {}
        }
        self.tags.is_subset(user_tags)
    }
}

/// A directed relay edge between two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Relay {
    pub relay_id: i64,
    pub name: String,
    pub tunnel: Option<String>,
    pub tags: TagSet,
    pub properties: TagSet,
    pub hidden: bool,
    pub source_uuid: Uuid,
    pub target_uuid: Uuid,
    pub port: u16,
    /// Resolved endpoints, populated by [`link_relays`].
    pub source: Option<NodeRef>,
    pub target: Option<NodeRef>,
}

impl Relay {
    /// A relay is addressed via its source node.
    pub fn addr(&self, proto: Proto) -> Option<String> {
        let source = self.source.as_ref()?;
        match proto {
            Proto::V4 => source.ipv4.map(|ip| ip.to_string()),
            Proto::V6 => source.ipv6.map(|ip| ip.to_string()),
        }
    }

    /// The fixed-size port window implied by the relay port, used by
    /// provisioning: `floor(port/100)*100 .. +100`.
    pub fn port_range(&self) -> (u16, u16) {
        let start = self.port - self.port % 100;
        (start, start + 100)
    }
}

/// A scoped alias row: `source` presents under `target`'s canonical
/// identity within `scope`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixRow {
    pub source_uuid: Uuid,
    pub target_uuid: Uuid,
    pub scope: Scope,
}

/// Resolve relay endpoints and attach each relay to both of its nodes.
///
/// Relays referencing uuids not present in `nodes` are dropped.
pub fn link_relays(nodes: &mut [Node], relays: Vec<Relay>) {
    let refs: BTreeMap<Uuid, NodeRef> = nodes.iter().map(|n| (n.uuid, n.as_ref())).collect();
    let mut linked: Vec<Relay> = Vec::with_capacity(relays.len());

    for mut relay in relays {
        let (source, target) = match (refs.get(&relay.source_uuid), refs.get(&relay.target_uuid)) {
            (Some(s), Some(t)) => (s.clone(), t.clone()),
            _ => {
                debug!(relay = %relay.name, "dropping relay with dangling endpoint");
                continue;
            }
        };
        relay.source = Some(source);
        relay.target = Some(target);
        linked.push(relay);
    }

    for node in nodes.iter_mut() {
        node.relay_in.clear();
        node.relay_out.clear();
        for relay in &linked {
            if relay.source_uuid == node.uuid {
                node.relay_out.push(relay.clone());
            }
            if relay.target_uuid == node.uuid {
                node.relay_in.push(relay.clone());
            }
        }
    }
}

/// Resolve mix rows into each source node's per-scope alias map.
///
/// Rows referencing uuids not present in `nodes` are dropped. A later row
/// for the same (source, scope) replaces an earlier one.
pub fn link_mixes(nodes: &mut [Node], mixes: Vec<MixRow>) {
    let refs: BTreeMap<Uuid, NodeRef> = nodes.iter().map(|n| (n.uuid, n.as_ref())).collect();

    for node in nodes.iter_mut() {
        node.mix.clear();
    }
    for mix in mixes {
        let Some(target) = refs.get(&mix.target_uuid).cloned() else {
            debug!(source = %mix.source_uuid, "dropping mix with dangling target");
            continue;
        };
        match nodes.iter_mut().find(|n| n.uuid == mix.source_uuid) {
            Some(source) => {
                source.mix.insert(mix.scope, target);
            }
            None => debug!(source = %mix.source_uuid, "dropping mix with dangling source"),
        }
    }
}
