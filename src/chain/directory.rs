//! Endpoint directories: where the list of nodes per network comes from.

use super::Endpoint;
use super::error::RpcError;
use crate::network::{NetworkGroup, Networks};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Service key of the GraphQL endpoint list in a planet registry entry
const HEADLESS_GQL_KEY: &str = "headless.gql";

#[async_trait]
pub trait EndpointDirectory: Send + Sync {
    /// Current nodes of `group`, deduplicated, in registry order
    async fn list_endpoints(&self, group: NetworkGroup) -> Result<Vec<Endpoint>, RpcError>;
}

fn dedupe(group: NetworkGroup, urls: Vec<String>) -> Vec<Endpoint> {
    let mut seen = std::collections::HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(url.clone()))
        .map(|url| Endpoint::new(url, group))
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanetEntry {
    #[serde(default)]
    rpc_endpoints: HashMap<String, Vec<String>>,
}

/// Directory backed by the public planet registry.
///
/// The registry returns one entry per network; each profile's
/// `planet_index` picks its entry.
pub struct PlanetDirectory {
    client: reqwest::Client,
    registry_url: String,
    timeout: Duration,
    planet_index: HashMap<NetworkGroup, usize>,
}

impl PlanetDirectory {
    pub fn new(
        registry_url: impl Into<String>,
        timeout: Duration,
        networks: &Networks,
    ) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RpcError::transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            registry_url: registry_url.into(),
            timeout,
            planet_index: networks.iter().map(|(g, p)| (g, p.planet_index)).collect(),
        })
    }
}

fn endpoints_from_registry(
    planets: Vec<PlanetEntry>,
    group: NetworkGroup,
    index: usize,
) -> Result<Vec<Endpoint>, RpcError> {
    let mut planets = planets;
    if index >= planets.len() {
        return Err(RpcError::Decode(format!(
            "planet registry has {} entries, {} expects index {}",
            planets.len(),
            group,
            index
        )));
    }
    let urls = planets
        .swap_remove(index)
        .rpc_endpoints
        .remove(HEADLESS_GQL_KEY)
        .unwrap_or_default();
    if urls.is_empty() {
        warn!(group = %group, "Planet registry lists no GraphQL endpoints");
    }
    Ok(dedupe(group, urls))
}

#[async_trait]
impl EndpointDirectory for PlanetDirectory {
    async fn list_endpoints(&self, group: NetworkGroup) -> Result<Vec<Endpoint>, RpcError> {
        let index = self.planet_index.get(&group).copied().unwrap_or_default();
        let planets: Vec<PlanetEntry> = self
            .client
            .get(&self.registry_url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| RpcError::Decode(format!("planet registry: {}", e)))?;
        let endpoints = endpoints_from_registry(planets, group, index)?;
        debug!(group = %group, count = endpoints.len(), "Listed endpoints");
        Ok(endpoints)
    }
}

/// Directory with fixed endpoint lists taken from configuration
pub struct StaticDirectory {
    endpoints: HashMap<NetworkGroup, Vec<Endpoint>>,
}

impl StaticDirectory {
    pub fn from_networks(networks: &Networks) -> Self {
        Self {
            endpoints: networks
                .iter()
                .map(|(g, p)| (g, dedupe(g, p.endpoints.clone())))
                .collect(),
        }
    }
}

#[async_trait]
impl EndpointDirectory for StaticDirectory {
    async fn list_endpoints(&self, group: NetworkGroup) -> Result<Vec<Endpoint>, RpcError> {
        Ok(self.endpoints.get(&group).cloned().unwrap_or_default())
    }
}
