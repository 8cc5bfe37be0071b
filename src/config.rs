use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::join::JoinOptions;
use crate::network::{self, Network};
use crate::patch::SyncStrategy;
use crate::peers::Peer;

pub const CONFIG_ENV: &str = "MONOCTL_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "monoctl.toml";

/// Operator configuration for `monoctl`. Holds no secrets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_home")]
    pub home: PathBuf,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub sync_strategy: SyncStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_address: Option<String>,
    #[serde(default)]
    pub extra_seeds: Vec<Peer>,
    #[serde(default)]
    pub extra_persistent_peers: Vec<Peer>,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
}

fn default_home() -> PathBuf {
    PathBuf::from("/var/lib/monod")
}

fn default_network() -> String {
    Network::Sprintnet.slug().to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl ToolConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Load `path`, or fall back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|source| ConfigError::Read {
            path: parent.to_path_buf(),
            source,
        })?;
        let encoded =
            toml::to_string_pretty(self).map_err(|err| ConfigError::Encode(err.to_string()))?;
        fs::write(path, encoded).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn network(&self) -> Result<Network, ConfigError> {
        Ok(network::lookup(&self.network)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network()?;
        if !self.home.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "home {:?} must be an absolute path",
                self.home
            )));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "fetch.timeout_secs must be greater than zero".into(),
            ));
        }
        if self.probe.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "probe.timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Join options seeded from the file; command-line flags are applied on top.
    pub fn join_options(&self) -> Result<JoinOptions, ConfigError> {
        let mut options = JoinOptions::new(self.network()?, &self.home);
        options.sync_strategy = self.sync_strategy;
        options.genesis_url = self.fetch.genesis_url.clone();
        options.peers_url = self.fetch.peers_url.clone();
        options.external_address = self.external_address.clone();
        options.extra_seeds = self.extra_seeds.clone();
        options.extra_persistent_peers = self.extra_persistent_peers.clone();
        Ok(options)
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            network: default_network(),
            sync_strategy: SyncStrategy::Default,
            external_address: None,
            extra_seeds: Vec::new(),
            extra_persistent_peers: Vec::new(),
            fetch: FetchConfig::default(),
            service: ServiceConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genesis_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers_url: Option<String>,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            genesis_url: None,
            peers_url: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub node_binary: PathBuf,
    pub indexer_binary: PathBuf,
    pub user: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("/usr/local/bin/monod"),
            indexer_binary: PathBuf::from("/usr/local/bin/mono-rosetta"),
            user: "mono".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_cometbft_rpc")]
    pub cometbft_rpc: String,
    #[serde(default = "default_evm_rpc")]
    pub evm_rpc: String,
    #[serde(default = "default_cosmos_rest")]
    pub cosmos_rest: String,
    #[serde(default = "default_rosetta")]
    pub rosetta: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_cometbft_rpc() -> String {
    "http://127.0.0.1:26657".into()
}

fn default_evm_rpc() -> String {
    "http://127.0.0.1:8545".into()
}

fn default_cosmos_rest() -> String {
    "http://127.0.0.1:1317".into()
}

fn default_rosetta() -> String {
    "http://127.0.0.1:8080".into()
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            cometbft_rpc: default_cometbft_rpc(),
            evm_rpc: default_evm_rpc(),
            cosmos_rest: default_cosmos_rest(),
            rosetta: default_rosetta(),
            timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Config path precedence: explicit flag, then `MONOCTL_CONFIG`, then `./monoctl.toml`.
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    resolve_path_from(explicit, std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}

fn resolve_path_from(explicit: Option<&Path>, from_env: Option<PathBuf>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or(from_env.filter(|path| !path.as_os_str().is_empty()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
