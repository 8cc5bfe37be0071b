//! Fixtures shared by the integration tests: offline artifacts and home inspection.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use monoctl::fetch::StaticFetcher;
use monoctl::join::JoinOptions;
use monoctl::network::Network;
use monoctl::patch::ConfigFile;
use monoctl::writer;

pub const GENESIS_URL: &str = "https://artifacts.test/genesis.json";
pub const PEERS_URL: &str = "https://artifacts.test/peers.json";

pub fn node_id(byte: char) -> String {
    std::iter::repeat(byte).take(40).collect()
}

pub fn peer(byte: char, host: &str) -> String {
    format!("{}@{host}:26656", node_id(byte))
}

pub fn genesis(chain_id: &str) -> Vec<u8> {
    let document = json!({
        "genesis_time": "2026-01-01T00:00:00Z",
        "chain_id": chain_id,
        "initial_height": "1",
        "app_state": { "evm": { "params": { "evm_denom": "amono" } } }
    });
    serde_json::to_vec_pretty(&document).expect("encode genesis")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Peer document with two seeds, three persistent peers and one bootstrap peer.
pub fn peer_document(chain_id: &str, genesis_sha256: Option<&str>) -> Value {
    let mut document = json!({
        "chain_id": chain_id,
        "seeds": [peer('a', "seed-1.example.org"), peer('b', "seed-2.example.org")],
        "persistent_peers": [
            peer('c', "peer-1.example.org"),
            peer('d', "peer-2.example.org"),
            peer('e', "peer-3.example.org"),
        ],
        "bootstrap_peers": [peer('f', "bootstrap-1.example.org")],
    });
    if let Some(digest) = genesis_sha256 {
        document["genesis_sha256"] = Value::String(digest.to_string());
    }
    document
}

/// Fetcher serving a matching genesis and peer document for `network`.
pub fn network_fetcher(network: Network) -> StaticFetcher {
    let bytes = genesis(network.cosmos_chain_id());
    let document = peer_document(network.cosmos_chain_id(), Some(&sha256_hex(&bytes)));
    StaticFetcher::new()
        .with(GENESIS_URL, bytes)
        .with(PEERS_URL, document.to_string())
}

pub fn join_options(network: Network, home: &Path) -> JoinOptions {
    let mut options = JoinOptions::new(network, home);
    options.genesis_url = Some(GENESIS_URL.to_string());
    options.peers_url = Some(PEERS_URL.to_string());
    options
}

pub fn config_file(home: &Path, file: ConfigFile) -> PathBuf {
    writer::config_file_path(home, file)
}

pub fn read_config(home: &Path, file: ConfigFile) -> String {
    fs::read_to_string(config_file(home, file)).unwrap_or_default()
}

/// Relative path -> contents of every file under `root`.
pub fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    collect(root, root, &mut files);
    files
}

fn collect(root: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, files);
        } else if let Ok(contents) = fs::read(&path) {
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            files.insert(relative, contents);
        }
    }
}

/// Pre-existing node config with unrelated keys the writer must preserve.
pub fn seed_existing_configs(home: &Path) {
    let config_dir = writer::config_dir(home);
    fs::create_dir_all(&config_dir).expect("create config dir");
    let files = [
        (
            ConfigFile::Config,
            "# CometBFT config\nmoniker = \"validator-7\"\n\n[p2p]\nladdr = \"tcp://0.0.0.0:26656\"\nseeds = \"\"\npersistent_peers = \"\"\npex = true\n\n[mempool]\nsize = 5000\n",
        ),
        (
            ConfigFile::App,
            "minimum-gas-prices = \"\"\npruning = \"default\"\n\n[evm]\n# evm_chain_id = 1\nevm_chain_id = 9000\ntracer = \"\"\n",
        ),
        (
            ConfigFile::Client,
            "chain-id = \"\"\nkeyring-backend = \"os\"\noutput = \"text\"\n",
        ),
    ];
    for (file, contents) in files {
        fs::write(writer::config_file_path(home, file), contents).expect("seed config file");
    }
}
