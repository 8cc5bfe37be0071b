//! Canonical configuration patch.
//!
//! A [`ConfigPatch`] names a value for every canonical key of a network; the
//! writer and the doctor both treat an absent key as meaningful.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::network::Network;
use crate::peers::{join_peers, Peer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    #[default]
    Default,
    Bootstrap,
}

impl SyncStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStrategy::Default => "default",
            SyncStrategy::Bootstrap => "bootstrap",
        }
    }

    pub fn pex_enabled(self) -> bool {
        matches!(self, SyncStrategy::Default)
    }

    /// Switching to bootstrap requires a clean address book.
    pub fn requires_addrbook_reset(self) -> bool {
        matches!(self, SyncStrategy::Bootstrap)
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(SyncStrategy::Default),
            "bootstrap" => Ok(SyncStrategy::Bootstrap),
            "statesync" => Err(
                "sync strategy `statesync` is reserved and not supported; use default or bootstrap"
                    .to_string(),
            ),
            other => Err(format!(
                "unknown sync strategy `{other}`; use default or bootstrap"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigFile {
    App,
    Config,
    Client,
}

impl ConfigFile {
    pub fn all() -> &'static [ConfigFile] {
        &[ConfigFile::App, ConfigFile::Config, ConfigFile::Client]
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ConfigFile::App => "app.toml",
            ConfigFile::Config => "config.toml",
            ConfigFile::Client => "client.toml",
        }
    }

    fn from_file_name(name: &str) -> Option<ConfigFile> {
        ConfigFile::all()
            .iter()
            .copied()
            .find(|file| file.file_name() == name)
    }
}

/// Keys the patch is the single writer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalKey {
    CosmosChainId,
    EvmChainId,
    MinimumGasPrices,
    Seeds,
    PersistentPeers,
    PexEnabled,
    ExternalAddress,
}

impl CanonicalKey {
    pub fn all() -> &'static [CanonicalKey] {
        &[
            CanonicalKey::CosmosChainId,
            CanonicalKey::EvmChainId,
            CanonicalKey::MinimumGasPrices,
            CanonicalKey::Seeds,
            CanonicalKey::PersistentPeers,
            CanonicalKey::PexEnabled,
            CanonicalKey::ExternalAddress,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            CanonicalKey::CosmosChainId => "cosmos_chain_id",
            CanonicalKey::EvmChainId => "evm_chain_id",
            CanonicalKey::MinimumGasPrices => "minimum_gas_prices",
            CanonicalKey::Seeds => "seeds",
            CanonicalKey::PersistentPeers => "persistent_peers",
            CanonicalKey::PexEnabled => "pex_enabled",
            CanonicalKey::ExternalAddress => "external_address",
        }
    }

    pub fn file(self) -> ConfigFile {
        match self {
            CanonicalKey::CosmosChainId => ConfigFile::Client,
            CanonicalKey::EvmChainId | CanonicalKey::MinimumGasPrices => ConfigFile::App,
            CanonicalKey::Seeds
            | CanonicalKey::PersistentPeers
            | CanonicalKey::PexEnabled
            | CanonicalKey::ExternalAddress => ConfigFile::Config,
        }
    }

    /// Table the key lives in; `None` for top-level keys.
    pub fn section(self) -> Option<&'static str> {
        match self {
            CanonicalKey::CosmosChainId | CanonicalKey::MinimumGasPrices => None,
            CanonicalKey::EvmChainId => Some("evm"),
            CanonicalKey::Seeds
            | CanonicalKey::PersistentPeers
            | CanonicalKey::PexEnabled
            | CanonicalKey::ExternalAddress => Some("p2p"),
        }
    }

    /// Key name as it appears at the start of a line in the target file.
    pub fn toml_key(self) -> &'static str {
        match self {
            CanonicalKey::CosmosChainId => "chain-id",
            CanonicalKey::EvmChainId => "evm_chain_id",
            CanonicalKey::MinimumGasPrices => "minimum-gas-prices",
            CanonicalKey::Seeds => "seeds",
            CanonicalKey::PersistentPeers => "persistent_peers",
            CanonicalKey::PexEnabled => "pex",
            CanonicalKey::ExternalAddress => "external_address",
        }
    }

    pub fn is_peer_list(self) -> bool {
        matches!(self, CanonicalKey::Seeds | CanonicalKey::PersistentPeers)
    }

    fn from_location(file: ConfigFile, toml_key: &str) -> Option<CanonicalKey> {
        CanonicalKey::all()
            .iter()
            .copied()
            .find(|key| key.file() == file && key.toml_key() == toml_key)
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchValue {
    Bool(bool),
    Int(u64),
    Str(String),
}

impl PatchValue {
    /// TOML literal form, e.g. `"mono-1"`, `262148`, `true`.
    pub fn render(&self) -> String {
        match self {
            PatchValue::Bool(value) => value.to_string(),
            PatchValue::Int(value) => value.to_string(),
            PatchValue::Str(value) => toml::Value::String(value.clone()).to_string(),
        }
    }

    /// Parse the right-hand side of a `key = value` line.
    pub fn parse_literal(raw: &str) -> Option<PatchValue> {
        let table: toml::Table = format!("value = {raw}").parse().ok()?;
        match table.get("value")? {
            toml::Value::Boolean(value) => Some(PatchValue::Bool(*value)),
            toml::Value::Integer(value) => u64::try_from(*value).ok().map(PatchValue::Int),
            toml::Value::String(value) => Some(PatchValue::Str(value.clone())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PatchValue::Str(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for PatchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchEntry {
    pub key: CanonicalKey,
    pub value: PatchValue,
}

impl PatchEntry {
    pub fn line(&self) -> String {
        format!("{} = {}", self.key.toml_key(), self.value.render())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigPatch {
    pub network: Network,
    pub sync_strategy: SyncStrategy,
    entries: Vec<PatchEntry>,
}

const SIDECAR_HEADER: &str = "# monoctl canonical patch; regenerated on every write";

impl ConfigPatch {
    pub fn entries(&self) -> &[PatchEntry] {
        &self.entries
    }

    pub fn get(&self, key: CanonicalKey) -> Option<&PatchValue> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    pub fn with_external_address(mut self, address: Option<&str>) -> Self {
        self.entries
            .retain(|entry| entry.key != CanonicalKey::ExternalAddress);
        if let Some(address) = address.map(str::trim).filter(|value| !value.is_empty()) {
            self.entries.push(PatchEntry {
                key: CanonicalKey::ExternalAddress,
                value: PatchValue::Str(address.to_string()),
            });
        }
        self.entries.sort_by_key(|entry| entry.key);
        self
    }

    /// Entries whose key is in `keys`, in canonical order.
    pub fn restricted_to(&self, keys: &[CanonicalKey]) -> Vec<PatchEntry> {
        self.entries
            .iter()
            .filter(|entry| keys.contains(&entry.key))
            .cloned()
            .collect()
    }

    /// Deterministic audit text written next to the config files.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(SIDECAR_HEADER);
        out.push('\n');
        out.push_str(&format!("# network = {}\n", self.network.slug()));
        out.push_str(&format!("# sync_strategy = {}\n", self.sync_strategy));
        for entry in &self.entries {
            out.push_str(&format!(
                "{}: {}\n",
                entry.key.file().file_name(),
                entry.line()
            ));
        }
        out
    }
}

/// Build the complete canonical patch for `network`.
///
/// Peer lists are joined with `,` in input order. Under
/// [`SyncStrategy::Bootstrap`] seeds are dropped and peer exchange disabled;
/// callers promote bootstrap peers into `persistent_peers` beforehand.
pub fn generate(
    network: Network,
    sync_strategy: SyncStrategy,
    seeds: &[Peer],
    persistent_peers: &[Peer],
) -> ConfigPatch {
    let seeds = match sync_strategy {
        SyncStrategy::Default => join_peers(seeds),
        SyncStrategy::Bootstrap => String::new(),
    };

    let mut entries = vec![
        PatchEntry {
            key: CanonicalKey::CosmosChainId,
            value: PatchValue::Str(network.cosmos_chain_id().to_string()),
        },
        PatchEntry {
            key: CanonicalKey::EvmChainId,
            value: PatchValue::Int(network.evm_chain_id()),
        },
    ];
    if let Some(price) = network.minimum_gas_prices() {
        entries.push(PatchEntry {
            key: CanonicalKey::MinimumGasPrices,
            value: PatchValue::Str(price.to_string()),
        });
    }
    entries.extend([
        PatchEntry {
            key: CanonicalKey::Seeds,
            value: PatchValue::Str(seeds),
        },
        PatchEntry {
            key: CanonicalKey::PersistentPeers,
            value: PatchValue::Str(join_peers(persistent_peers)),
        },
        PatchEntry {
            key: CanonicalKey::PexEnabled,
            value: PatchValue::Bool(sync_strategy.pex_enabled()),
        },
    ]);

    ConfigPatch {
        network,
        sync_strategy,
        entries,
    }
}

/// Contents of a previously written sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedPatch {
    pub network: Option<Network>,
    pub sync_strategy: Option<SyncStrategy>,
    pub values: BTreeMap<CanonicalKey, PatchValue>,
}

impl RecordedPatch {
    /// Lenient parse: unknown or malformed lines are ignored.
    pub fn parse(text: &str) -> RecordedPatch {
        let mut recorded = RecordedPatch::default();
        for line in text.lines().map(str::trim) {
            if let Some(header) = line.strip_prefix('#') {
                if let Some((name, value)) = header.split_once('=') {
                    match name.trim() {
                        "network" => recorded.network = value.trim().parse().ok(),
                        "sync_strategy" => recorded.sync_strategy = value.trim().parse().ok(),
                        _ => {}
                    }
                }
                continue;
            }
            let Some((file, assignment)) = line.split_once(": ") else {
                continue;
            };
            let Some((toml_key, raw)) = assignment.split_once('=') else {
                continue;
            };
            let key = ConfigFile::from_file_name(file.trim())
                .and_then(|file| CanonicalKey::from_location(file, toml_key.trim()));
            if let (Some(key), Some(value)) = (key, PatchValue::parse_literal(raw.trim())) {
                recorded.values.insert(key, value);
            }
        }
        recorded
    }

    pub fn peers(&self, key: CanonicalKey) -> Option<Vec<Peer>> {
        let raw = self.values.get(&key)?.as_str()?;
        Some(
            crate::peers::split_peer_list(raw)
                .iter()
                .filter_map(|entry| Peer::parse(entry))
                .collect(),
        )
    }

    pub fn external_address(&self) -> Option<&str> {
        self.values
            .get(&CanonicalKey::ExternalAddress)
            .and_then(PatchValue::as_str)
    }
}
