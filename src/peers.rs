use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::PeerRegistryError;

static PEER_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{40}@[^:,\s]+:[0-9]+$").expect("peer address pattern compiles")
});

/// A `node_id@host:port` address with a 40-hex-character node id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Peer(String);

impl Peer {
    pub fn parse(address: &str) -> Option<Self> {
        PEER_ADDRESS
            .is_match(address)
            .then(|| Peer(address.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Peer {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Peer::parse(value).ok_or_else(|| format!("malformed peer address `{value}`"))
    }
}

impl TryFrom<String> for Peer {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Peer> for String {
    fn from(peer: Peer) -> Self {
        peer.0
    }
}

/// Peer document after validation against the expected chain id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PeerRegistry {
    pub chain_id: String,
    pub genesis_sha256: Option<String>,
    pub seeds: Vec<Peer>,
    pub persistent_peers: Vec<Peer>,
    pub bootstrap_peers: Vec<Peer>,
    /// Entries rejected by the address check, kept for reporting.
    pub dropped: Vec<String>,
}

impl PeerRegistry {
    pub fn summary(&self) -> String {
        format!(
            "{} seeds, {} persistent peers, {} bootstrap peers",
            self.seeds.len(),
            self.persistent_peers.len(),
            self.bootstrap_peers.len()
        )
    }
}

#[derive(Debug, Deserialize)]
struct PeerDocument {
    chain_id: String,
    #[serde(default)]
    genesis_sha256: Option<String>,
    #[serde(default)]
    seeds: Vec<String>,
    #[serde(default)]
    persistent_peers: Vec<String>,
    #[serde(default)]
    bootstrap_peers: Vec<String>,
}

/// Parse and validate an untrusted peer document.
///
/// Nothing from the document is returned unless its `chain_id` equals
/// `expected_chain_id`. Malformed addresses are dropped, never rewritten.
pub fn parse(bytes: &[u8], expected_chain_id: &str) -> Result<PeerRegistry, PeerRegistryError> {
    let document: PeerDocument = serde_json::from_slice(bytes)
        .map_err(|err| PeerRegistryError::Parse(err.to_string()))?;

    if document.chain_id != expected_chain_id {
        return Err(PeerRegistryError::ChainIdMismatch {
            expected: expected_chain_id.to_string(),
            got: document.chain_id,
        });
    }

    let genesis_sha256 = match document.genesis_sha256 {
        Some(digest) if is_sha256_hex(&digest) => Some(digest.to_ascii_lowercase()),
        Some(digest) => return Err(PeerRegistryError::InvalidDigest(digest)),
        None => None,
    };

    let mut dropped = Vec::new();
    let seeds = collect_peers("seeds", document.seeds, &mut dropped);
    let persistent_peers =
        collect_peers("persistent_peers", document.persistent_peers, &mut dropped);
    let bootstrap_peers = collect_peers("bootstrap_peers", document.bootstrap_peers, &mut dropped);

    Ok(PeerRegistry {
        chain_id: document.chain_id,
        genesis_sha256,
        seeds,
        persistent_peers,
        bootstrap_peers,
        dropped,
    })
}

fn collect_peers(role: &str, raw: Vec<String>, dropped: &mut Vec<String>) -> Vec<Peer> {
    let mut peers = Vec::with_capacity(raw.len());
    for entry in raw {
        match Peer::parse(&entry) {
            Some(peer) => peers.push(peer),
            None => {
                warn!(target: "monoctl::peers", role, entry = %entry, "dropping malformed peer address");
                dropped.push(entry);
            }
        }
    }
    peers
}

pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|byte| byte.is_ascii_hexdigit())
}

/// Union of `a` and `b` without duplicates, keeping `a`'s order then new entries of `b`.
pub fn merge_peers(a: &[Peer], b: &[Peer]) -> Vec<Peer> {
    let mut seen = HashSet::with_capacity(a.len() + b.len());
    a.iter()
        .chain(b.iter())
        .filter(|peer| seen.insert(peer.as_str()))
        .cloned()
        .collect()
}

/// Split a comma separated config value into peers, skipping blanks.
pub fn split_peer_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_peers(peers: &[Peer]) -> String {
    peers
        .iter()
        .map(Peer::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
