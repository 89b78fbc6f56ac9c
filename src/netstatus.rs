//! Own-address discovery.
//!
//! Probes public echo endpoints for the host's v4 and v6 addresses so a
//! process can find out which fleet node it is running on. Both lookups
//! run concurrently with bounded retries; an unreachable protocol simply
//! yields no address.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;

use reqwest::Client;
use tokio::time::sleep;
use tracing::debug;

const V4_ENDPOINT: &str = "https://api4.ipify.org";
const V6_ENDPOINT: &str = "https://api6.ipify.org";

/// IPv6 tends to need longer to come up after boot.
const V6_PATIENCE: u32 = 3;

/// The host's observed public addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStatus {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl NetworkStatus {
    /// Probe both protocols, retrying up to `patience` times (v4) with
    /// `interval` between attempts.
    pub async fn probe(patience: u32, interval: Duration) -> Self {
        let client = Client::new();
        let (ipv4, ipv6) = tokio::join!(
            lookup::<Ipv4Addr>(&client, V4_ENDPOINT, patience, interval),
            lookup::<Ipv6Addr>(&client, V6_ENDPOINT, V6_PATIENCE, interval),
        );
        Self { ipv4, ipv6 }
    }

    pub fn network_is_available(&self) -> bool {
        self.ipv4.is_some() || self.ipv6.is_some()
    }
}

async fn lookup<T: FromStr>(
    client: &Client,
    url: &str,
    patience: u32,
    interval: Duration,
) -> Option<T> {
    for attempt in 0..patience {
        let text = match client.get(url).send().await {
            Ok(response) => response.text().await.ok(),
            Err(e) => {
                debug!(url, attempt, error = %e, "address probe failed");
                None
            }
        };
        if let Some(text) = text {
            // one well-formed answer settles the protocol either way
            return text.trim().parse().ok();
        }
        sleep(interval).await;
    }
    None
}
