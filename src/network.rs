//! Network groups and their per-network data.
//!
//! Every network-specific rule (minter allow-list, checking endpoint,
//! balance endpoint, fallback balance) is carried as data on a
//! [`NetworkProfile`]. Components look the profile up by [`NetworkGroup`]
//! instead of branching on network names.

use crate::core_types::Address;
use crate::money::Money;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the independently monitored networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkGroup {
    Odin,
    Heimdall,
}

impl NetworkGroup {
    pub const ALL: [NetworkGroup; 2] = [NetworkGroup::Odin, NetworkGroup::Heimdall];

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkGroup::Odin => "odin",
            NetworkGroup::Heimdall => "heimdall",
        }
    }
}

impl fmt::Display for NetworkGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "odin" => Ok(NetworkGroup::Odin),
            "heimdall" => Ok(NetworkGroup::Heimdall),
            other => Err(format!("unknown network group: {other}")),
        }
    }
}

/// Fungible currency transferred by probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Currency {
    pub ticker: String,
    pub decimal_places: u8,
    /// Empty means the network has no allow-list
    pub minters: Vec<Address>,
}

fn default_ticker() -> String {
    "NCG".to_string()
}

fn default_decimal_places() -> u8 {
    2
}

/// Per-network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkProfile {
    #[serde(default = "default_ticker")]
    pub ticker: String,
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u8,
    /// Minter allow-list required by the network's validation rules
    #[serde(default)]
    pub minters: Vec<Address>,
    /// Node polled for transaction status (never the submission node)
    pub checking_endpoint: String,
    /// Node queried for account balances
    pub balance_endpoint: String,
    /// Seeded when a balance read fails and no prior value exists
    #[serde(default)]
    pub fallback_balance: Option<Money>,
    /// Position of this network in the planet registry response
    #[serde(default)]
    pub planet_index: usize,
    /// Endpoints used when the directory is static
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl NetworkProfile {
    pub fn currency(&self) -> Currency {
        Currency {
            ticker: self.ticker.clone(),
            decimal_places: self.decimal_places,
            minters: self.minters.clone(),
        }
    }
}

/// Profiles for every monitored network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Networks {
    pub odin: NetworkProfile,
    pub heimdall: NetworkProfile,
}

impl Networks {
    pub fn profile(&self, group: NetworkGroup) -> &NetworkProfile {
        match group {
            NetworkGroup::Odin => &self.odin,
            NetworkGroup::Heimdall => &self.heimdall,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NetworkGroup, &NetworkProfile)> {
        NetworkGroup::ALL.into_iter().map(move |g| (g, self.profile(g)))
    }
}
