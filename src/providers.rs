//! REST implementations of the DNS authority adapters.
//!
//! Both providers speak token-authenticated JSON. The IP authority keys
//! records by name within suffix-matched zones; the CNAME authority keys
//! record sets by (name, line) within one zone and stores names and
//! targets with a trailing dot, which is stripped on load and re-added on
//! write so the rest of the crate only ever sees bare names.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::authority::{CnameAuthority, CnameRecord, IpAuthority, IpRecord, RecordKind};
use crate::config::{CnameAuthorityConfig, IpAuthorityConfig, ZoneConfig};
use crate::error::FleetError;

/// IP (A/AAAA) authority over a zone-scoped REST API.
pub struct RestIpAuthority {
    http: Client,
    config: IpAuthorityConfig,
    /// Record ids learned at load time, so upserts can update in place.
    known_ids: RwLock<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct IpRecordList {
    result: Vec<RawIpRecord>,
}

#[derive(Debug, Deserialize)]
struct IpRecordEnvelope {
    result: RawIpRecord,
}

#[derive(Debug, Deserialize)]
struct RawIpRecord {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    name: String,
    content: String,
}

impl RestIpAuthority {
    pub fn new(config: IpAuthorityConfig) -> Self {
        Self {
            http: Client::new(),
            config,
            known_ids: RwLock::new(HashMap::new()),
        }
    }

    fn zone_for(&self, name: &str) -> Option<&ZoneConfig> {
        self.config.zones.iter().find(|z| name.ends_with(&z.name))
    }
}

#[async_trait]
impl IpAuthority for RestIpAuthority {
    async fn load(&self) -> Result<HashMap<String, IpRecord>, FleetError> {
        let mut records = HashMap::new();
        for zone in &self.config.zones {
            let url = format!("{}/zones/{}/dns_records", self.config.endpoint, zone.id);
            let list: IpRecordList = self
                .http
                .get(&url)
                .bearer_auth(&self.config.token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            for raw in list.result {
                let kind = match raw.kind.as_str() {
                    "A" => RecordKind::A,
                    "AAAA" => RecordKind::Aaaa,
                    _ => continue,
                };
                if records.contains_key(&raw.name) {
                    warn!(name = %raw.name, "duplicate address record at authority");
                }
                self.known_ids.write().insert(raw.name.clone(), raw.id.clone());
                records.insert(
                    raw.name,
                    IpRecord {
                        id: raw.id,
                        kind,
                        content: raw.content,
                    },
                );
            }
        }
        debug!(count = records.len(), "loaded address records");
        Ok(records)
    }

    async fn upsert(&self, name: &str, kind: RecordKind, content: &str) -> Result<(), FleetError> {
        let zone = self.zone_for(name).ok_or_else(|| {
            FleetError::authority("ip", format!("no configured zone matches {name}"))
        })?;
        let body = json!({
            "name": name,
            "type": kind.as_str(),
            "content": content,
            "ttl": 1,
            "proxied": false,
        });

        let known_id = self.known_ids.read().get(name).cloned();
        let response = match known_id {
            Some(id) => {
                let url = format!(
                    "{}/zones/{}/dns_records/{}",
                    self.config.endpoint, zone.id, id
                );
                self.http
                    .put(&url)
                    .bearer_auth(&self.config.token)
                    .json(&body)
                    .send()
                    .await?
            }
            None => {
                let url = format!("{}/zones/{}/dns_records", self.config.endpoint, zone.id);
                self.http
                    .post(&url)
                    .bearer_auth(&self.config.token)
                    .json(&body)
                    .send()
                    .await?
            }
        };

        let envelope: IpRecordEnvelope = response.error_for_status()?.json().await?;
        self.known_ids
            .write()
            .insert(name.to_string(), envelope.result.id);
        Ok(())
    }
}

/// Per-line CNAME authority over a record-set REST API.
pub struct RestCnameAuthority {
    http: Client,
    config: CnameAuthorityConfig,
}

#[derive(Debug, Deserialize)]
struct RecordSetList {
    recordsets: Vec<RawRecordSet>,
}

#[derive(Debug, Deserialize)]
struct RawRecordSet {
    id: String,
    name: String,
    line: String,
    records: Vec<String>,
}

impl RestCnameAuthority {
    pub fn new(config: CnameAuthorityConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn recordsets_url(&self) -> String {
        format!(
            "{}/v2/zones/{}/recordsets",
            self.config.endpoint, self.config.zone_id
        )
    }
}

fn undotted(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}

fn dotted(name: &str) -> String {
    format!("{}.", name.trim_end_matches('.'))
}

#[async_trait]
impl CnameAuthority for RestCnameAuthority {
    async fn load(&self) -> Result<HashMap<String, Vec<CnameRecord>>, FleetError> {
        let mut records: HashMap<String, Vec<CnameRecord>> = HashMap::new();
        for line in self.config.lines.all() {
            let list: RecordSetList = self
                .http
                .get(self.recordsets_url())
                .query(&[("type", "CNAME"), ("line", line)])
                .bearer_auth(&self.config.token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            for set in list.recordsets {
                let Some(target) = set.records.first() else {
                    warn!(name = %set.name, line = %set.line, "empty record set at authority");
                    continue;
                };
                records.entry(undotted(&set.name)).or_default().push(CnameRecord {
                    id: set.id,
                    line: set.line,
                    target: undotted(target),
                });
            }
        }
        debug!(names = records.len(), "loaded alias records");
        Ok(records)
    }

    async fn create(&self, name: &str, line: &str, target: &str) -> Result<(), FleetError> {
        let body = json!({
            "name": dotted(name),
            "type": "CNAME",
            "line": line,
            "records": [dotted(target)],
        });
        self.http
            .post(self.recordsets_url())
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn update(
        &self,
        record_id: &str,
        name: &str,
        _line: &str,
        target: &str,
    ) -> Result<(), FleetError> {
        let body = json!({
            "name": dotted(name),
            "type": "CNAME",
            "records": [dotted(target)],
        });
        let url = format!("{}/{}", self.recordsets_url(), record_id);
        self.http
            .put(&url)
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, record_id: &str) -> Result<(), FleetError> {
        let url = format!("{}/{}", self.recordsets_url(), record_id);
        self.http
            .delete(&url)
            .bearer_auth(&self.config.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
