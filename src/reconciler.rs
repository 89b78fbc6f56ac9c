//! Reconciliation control loop.
//!
//! Diffs the node snapshot against the two DNS authorities and issues
//! corrective writes. Every write is conditioned on an observed-vs-desired
//! mismatch, so re-running against unchanged state issues nothing. A
//! failing write for one node is logged and counted but never aborts the
//! run; there is no retry within a run, the next scheduled invocation
//! retries naturally.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::authority::{CnameAuthority, CnameRecord, IpAuthority};
use crate::config::{LineMap, NameScheme};
use crate::error::FleetError;
use crate::metrics::{self, Timer};
use crate::node::{Node, Proto, Scope};

/// Counters for one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Nodes considered.
    pub nodes: usize,
    pub ip_upserts: usize,
    pub cname_creates: usize,
    pub cname_updates: usize,
    pub cname_deletes: usize,
    /// Adapter failures that were isolated and skipped.
    pub errors: usize,
}

impl ReconcileSummary {
    /// Total corrective writes issued.
    pub fn writes(&self) -> usize {
        self.ip_upserts + self.cname_creates + self.cname_updates + self.cname_deletes
    }
}

impl fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} ip upserts, {} cname creates, {} cname updates, \
             {} cname deletes, {} errors",
            self.nodes,
            self.ip_upserts,
            self.cname_creates,
            self.cname_updates,
            self.cname_deletes,
            self.errors
        )
    }
}

/// Brings the IP and CNAME authorities into agreement with a node snapshot.
pub struct Reconciler {
    ip: Arc<dyn IpAuthority>,
    cname: Arc<dyn CnameAuthority>,
    naming: NameScheme,
    lines: LineMap,
}

impl Reconciler {
    pub fn new(
        ip: Arc<dyn IpAuthority>,
        cname: Arc<dyn CnameAuthority>,
        naming: NameScheme,
        lines: LineMap,
    ) -> Self {
        Self {
            ip,
            cname,
            naming,
            lines,
        }
    }

    /// Run both passes over the snapshot. Authority `load` failures are
    /// fatal; individual write failures are isolated and counted.
    ///
    /// Nodes are taken mutably so their DNS shadows reflect the observed
    /// authority state after the run.
    pub async fn run(&self, nodes: &mut [Node]) -> Result<ReconcileSummary, FleetError> {
        let timer = Timer::start();
        let mut summary = ReconcileSummary {
            nodes: nodes.len(),
            ..Default::default()
        };
        self.sync_ip(nodes, &mut summary).await?;
        self.sync_cname(nodes, &mut summary).await?;
        metrics::record_reconcile_run(summary.writes(), summary.errors, timer.elapsed());
        info!(
            nodes = summary.nodes,
            writes = summary.writes(),
            errors = summary.errors,
            took_ms = timer.elapsed().as_millis() as u64,
            "reconciliation finished"
        );
        Ok(summary)
    }

    /// Per node and protocol: upsert the A/AAAA record when the declared
    /// address differs from the authority's content. Nodes without an
    /// address for a protocol are skipped; absence is not reconciled to
    /// deletion.
    pub async fn sync_ip(
        &self,
        nodes: &mut [Node],
        summary: &mut ReconcileSummary,
    ) -> Result<(), FleetError> {
        let records = self.ip.load().await?;

        for node in nodes.iter_mut() {
            for proto in Proto::ALL {
                let name = self.naming.canonical_name(node.node_id, proto);
                let observed = records.get(&name).map(|r| r.content.clone());
                node.dns.get_mut(proto).ip = observed.clone();

                let Some(desired) = node.addr(proto) else {
                    continue;
                };
                if observed.as_deref() == Some(desired.as_str()) {
                    continue;
                }

                warn!(
                    node = %node.name,
                    record = proto.record_kind().as_str(),
                    desired = %desired,
                    observed = observed.as_deref().unwrap_or("<absent>"),
                    "address record out of sync; issuing upsert"
                );
                match self.ip.upsert(&name, proto.record_kind(), &desired).await {
                    Ok(()) => {
                        summary.ip_upserts += 1;
                        metrics::record_reconcile_write("ip", "upsert");
                        node.dns.get_mut(proto).ip = Some(desired);
                    }
                    Err(e) => {
                        summary.errors += 1;
                        metrics::record_reconcile_error("ip");
                        error!(node = %node.name, name = %name, error = %e, "address upsert failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Per node and scope: point the node's alias record at the canonical
    /// name of its mix target, or at the node's own canonical name when no
    /// mix applies. Only IPv4 names are aliased; nodes without an IPv4
    /// address are skipped entirely.
    pub async fn sync_cname(
        &self,
        nodes: &mut [Node],
        summary: &mut ReconcileSummary,
    ) -> Result<(), FleetError> {
        let records = self.cname.load().await?;

        for node in nodes.iter_mut() {
            if node.ipv4.is_none() {
                continue;
            }
            let alias = self.naming.alias_name(node.node_id, Proto::V4);

            for scope in Scope::ALL {
                let target_id = node
                    .mix
                    .get(&scope)
                    .map(|target| target.node_id)
                    .unwrap_or(node.node_id);
                let desired = self.naming.canonical_name(target_id, Proto::V4);
                let line = self.lines.line(scope);
                let existing = line_records(&records, &alias, line);
                if let Some(first) = existing.first() {
                    node.dns
                        .get_mut(Proto::V4)
                        .cname
                        .insert(scope, first.target.clone());
                }

                match self
                    .ensure_line_cname(&existing, &alias, line, &desired, summary)
                    .await
                {
                    Ok(()) => {
                        node.dns.get_mut(Proto::V4).cname.insert(scope, desired);
                    }
                    Err(e) => {
                        summary.errors += 1;
                        metrics::record_reconcile_error("cname");
                        error!(
                            node = %node.name,
                            scope = scope.as_str(),
                            error = %e,
                            "alias reconciliation failed"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Manually alias `source_id` to `target_id` for the given scopes, on
    /// both protocols. Used by the operator CLI; errors propagate.
    pub async fn force_alias(
        &self,
        source_id: i64,
        target_id: i64,
        scopes: &[Scope],
    ) -> Result<ReconcileSummary, FleetError> {
        let records = self.cname.load().await?;
        let mut summary = ReconcileSummary::default();

        for proto in Proto::ALL {
            let alias = self.naming.alias_name(source_id, proto);
            let desired = self.naming.canonical_name(target_id, proto);
            for &scope in scopes {
                let line = self.lines.line(scope);
                let existing = line_records(&records, &alias, line);
                self.ensure_line_cname(&existing, &alias, line, &desired, &mut summary)
                    .await?;
            }
        }
        Ok(summary)
    }

    /// Converge the records for one (alias, line) pair onto exactly one
    /// record with the desired target. More than one record on a line is a
    /// corrupted-state signal: prune to the first and log an error.
    async fn ensure_line_cname(
        &self,
        existing: &[&CnameRecord],
        alias: &str,
        line: &str,
        desired: &str,
        summary: &mut ReconcileSummary,
    ) -> Result<(), FleetError> {
        if existing.len() > 1 {
            error!(
                alias,
                line,
                count = existing.len(),
                "duplicate alias records on one line; pruning"
            );
            for extra in &existing[1..] {
                self.cname.delete(&extra.id).await?;
                summary.cname_deletes += 1;
                metrics::record_reconcile_write("cname", "delete");
            }
        }

        match existing.first() {
            None => {
                warn!(alias, line, target = desired, "alias record missing; creating");
                self.cname.create(alias, line, desired).await?;
                summary.cname_creates += 1;
                metrics::record_reconcile_write("cname", "create");
            }
            Some(record) if record.target != desired => {
                warn!(
                    alias,
                    line,
                    observed = %record.target,
                    target = desired,
                    "alias record out of sync; updating"
                );
                self.cname.update(&record.id, alias, line, desired).await?;
                summary.cname_updates += 1;
                metrics::record_reconcile_write("cname", "update");
            }
            Some(_) => {}
        }
        Ok(())
    }
}

fn line_records<'a>(
    records: &'a HashMap<String, Vec<CnameRecord>>,
    alias: &str,
    line: &str,
) -> Vec<&'a CnameRecord> {
    records
        .get(alias)
        .map(|rs| rs.iter().filter(|r| r.line == line).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_writes() {
        let summary = ReconcileSummary {
            nodes: 3,
            ip_upserts: 2,
            cname_creates: 1,
            cname_updates: 1,
            cname_deletes: 1,
            errors: 4,
        };
        assert_eq!(summary.writes(), 5);
    }

    #[test]
    fn test_line_records_filters_by_line() {
        let mut records = HashMap::new();
        records.insert(
            "n1.alias.example.net".to_string(),
            vec![
                CnameRecord {
                    id: "1".to_string(),
                    line: "default_view".to_string(),
                    target: "a".to_string(),
                },
                CnameRecord {
                    id: "2".to_string(),
                    line: "edu_net".to_string(),
                    target: "b".to_string(),
                },
            ],
        );
        let hits = line_records(&records, "n1.alias.example.net", "edu_net");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "2");
        assert!(line_records(&records, "missing", "edu_net").is_empty());
    }
}
