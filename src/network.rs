//! Closed registry of the networks a node home can be joined to.
//!
//! The set is fixed at compile time so drift detection can enumerate every
//! foreign identity; [`Network::all`] is exhaustive.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::errors::NetworkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[value(alias = "local")]
    Localnet,
    #[value(alias = "sprint")]
    Sprintnet,
    #[value(alias = "test")]
    Testnet,
    #[value(alias = "main")]
    Mainnet,
}

const NETWORKS_BASE_URL: &str = "https://raw.githubusercontent.com/mono-chain/networks/main";

impl Network {
    pub fn all() -> &'static [Network] {
        &[
            Network::Localnet,
            Network::Sprintnet,
            Network::Testnet,
            Network::Mainnet,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            Network::Localnet => "Localnet",
            Network::Sprintnet => "Sprintnet",
            Network::Testnet => "Testnet",
            Network::Mainnet => "Mainnet",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Network::Localnet => "localnet",
            Network::Sprintnet => "sprintnet",
            Network::Testnet => "testnet",
            Network::Mainnet => "mainnet",
        }
    }

    pub fn cosmos_chain_id(self) -> &'static str {
        match self {
            Network::Localnet => "mono-local-1",
            Network::Sprintnet => "mono-sprint-1",
            Network::Testnet => "mono-test-1",
            Network::Mainnet => "mono-1",
        }
    }

    pub fn evm_chain_id(self) -> u64 {
        match self {
            Network::Localnet => 262_145,
            Network::Sprintnet => 262_146,
            Network::Testnet => 262_147,
            Network::Mainnet => 262_148,
        }
    }

    /// `0x`-prefixed form as reported by `eth_chainId`.
    pub fn evm_chain_id_hex(self) -> String {
        format!("{:#x}", self.evm_chain_id())
    }

    /// Empty for Localnet, which is initialised from a locally produced genesis.
    pub fn default_genesis_url(self) -> String {
        match self {
            Network::Localnet => String::new(),
            other => format!("{NETWORKS_BASE_URL}/{}/genesis.json", other.slug()),
        }
    }

    pub fn default_peers_url(self) -> String {
        match self {
            Network::Localnet => String::new(),
            other => format!("{NETWORKS_BASE_URL}/{}/peers.json", other.slug()),
        }
    }

    pub fn minimum_gas_prices(self) -> Option<&'static str> {
        match self {
            Network::Localnet => None,
            Network::Sprintnet | Network::Testnet | Network::Mainnet => Some("10000000000amono"),
        }
    }

    pub fn is_localnet(self) -> bool {
        self == Network::Localnet
    }

    pub fn from_cosmos_chain_id(chain_id: &str) -> Option<Network> {
        Network::all()
            .iter()
            .copied()
            .find(|network| network.cosmos_chain_id() == chain_id)
    }

    pub fn from_evm_chain_id(chain_id: u64) -> Option<Network> {
        Network::all()
            .iter()
            .copied()
            .find(|network| network.evm_chain_id() == chain_id)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Network {
    type Err = NetworkError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        lookup(value)
    }
}

/// Resolve a network by name, ignoring case and surrounding whitespace.
pub fn lookup(name: &str) -> Result<Network, NetworkError> {
    <Network as ValueEnum>::from_str(name.trim(), true)
        .map_err(|_| NetworkError::Unknown(name.to_string()))
}

pub fn list() -> Vec<Network> {
    Network::all().to_vec()
}
