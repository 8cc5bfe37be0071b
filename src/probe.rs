//! Read-only health probes against a running node.
//!
//! Each RPC surface reports the identity it serves; a surface that answers
//! for another network is a wrong-network condition, not a transient error.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::ProbeConfig;
use crate::errors::ProbeError;
use crate::fetch::ArtifactFetcher;
use crate::network::Network;
use crate::report::{ExitCode, Step, StepStatus};

pub const PROBE_COMETBFT: &str = "cometbft_rpc";
pub const PROBE_EVM: &str = "evm_rpc";
pub const PROBE_COSMOS_REST: &str = "cosmos_rest";
pub const PROBE_ROSETTA: &str = "rosetta";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CometStatus {
    pub network: String,
    pub latest_block_height: Option<u64>,
    pub catching_up: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub network: Network,
    pub steps: Vec<Step>,
    /// At least one surface identified itself as a different network.
    pub wrong_network: bool,
}

impl ProbeReport {
    pub fn exit_code(&self) -> ExitCode {
        if self.wrong_network {
            ExitCode::Fatal
        } else if self.steps.iter().any(|step| step.status == StepStatus::Failed) {
            ExitCode::Failed
        } else {
            ExitCode::Success
        }
    }
}

enum Verdict {
    Healthy(String),
    WrongNetwork(String),
}

pub fn run_probes<F: ArtifactFetcher>(
    fetcher: &F,
    network: Network,
    config: &ProbeConfig,
) -> ProbeReport {
    let mut report = ProbeReport {
        network,
        steps: Vec::with_capacity(4),
        wrong_network: false,
    };

    let surfaces: [(&'static str, Result<Verdict, ProbeError>); 4] = [
        (PROBE_COMETBFT, probe_cometbft(fetcher, network, &config.cometbft_rpc)),
        (PROBE_EVM, probe_evm(fetcher, network, &config.evm_rpc)),
        (PROBE_COSMOS_REST, probe_cosmos_rest(fetcher, network, &config.cosmos_rest)),
        (PROBE_ROSETTA, probe_rosetta(fetcher, network, &config.rosetta)),
    ];

    for (name, outcome) in surfaces {
        let step = match outcome {
            Ok(Verdict::Healthy(message)) => Step::success(name, Some(message)),
            Ok(Verdict::WrongNetwork(message)) => {
                report.wrong_network = true;
                warn!(target: "monoctl::probe", surface = name, %message, "surface serves another network");
                Step::failed(name, message)
            }
            Err(err) => Step::failed(name, err.to_string()),
        };
        info!(target: "monoctl::probe", surface = name, status = ?step.status, "probe finished");
        report.steps.push(step);
    }
    report
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

fn probe_cometbft<F: ArtifactFetcher>(
    fetcher: &F,
    network: Network,
    base: &str,
) -> Result<Verdict, ProbeError> {
    let bytes = fetcher.fetch(&endpoint(base, "/status"))?;
    let status = parse_cometbft_status(&bytes)?;
    if status.network != network.cosmos_chain_id() {
        return Ok(Verdict::WrongNetwork(foreign_chain_id(network, &status.network)));
    }
    let mut message = format!("network {}", status.network);
    if let Some(height) = status.latest_block_height {
        message.push_str(&format!(", height {height}"));
    }
    if status.catching_up == Some(true) {
        message.push_str(", catching up");
    }
    Ok(Verdict::Healthy(message))
}

fn probe_evm<F: ArtifactFetcher>(
    fetcher: &F,
    network: Network,
    url: &str,
) -> Result<Verdict, ProbeError> {
    let request = json!({ "jsonrpc": "2.0", "id": 1, "method": "eth_chainId", "params": [] });
    let bytes = fetcher.post_json(url, &request)?;
    let chain_id = parse_eth_chain_id(&bytes)?;
    if chain_id != network.evm_chain_id() {
        let owner = Network::from_evm_chain_id(chain_id)
            .map(|other| format!(" ({})", other.name()))
            .unwrap_or_default();
        return Ok(Verdict::WrongNetwork(format!(
            "eth_chainId {chain_id:#x}{owner}, expected {}",
            network.evm_chain_id_hex()
        )));
    }
    Ok(Verdict::Healthy(format!("eth_chainId {chain_id:#x}")))
}

fn probe_cosmos_rest<F: ArtifactFetcher>(
    fetcher: &F,
    network: Network,
    base: &str,
) -> Result<Verdict, ProbeError> {
    let bytes = fetcher.fetch(&endpoint(base, "/cosmos/base/tendermint/v1beta1/node_info"))?;
    let reported = parse_node_info(&bytes)?;
    if reported != network.cosmos_chain_id() {
        return Ok(Verdict::WrongNetwork(foreign_chain_id(network, &reported)));
    }
    Ok(Verdict::Healthy(format!("network {reported}")))
}

fn probe_rosetta<F: ArtifactFetcher>(
    fetcher: &F,
    network: Network,
    base: &str,
) -> Result<Verdict, ProbeError> {
    let bytes = fetcher.post_json(&endpoint(base, "/network/list"), &json!({ "metadata": {} }))?;
    let networks = parse_rosetta_networks(&bytes)?;
    if networks.iter().any(|reported| reported == network.cosmos_chain_id()) {
        return Ok(Verdict::Healthy(format!("serves {}", network.cosmos_chain_id())));
    }
    Ok(Verdict::WrongNetwork(format!(
        "serves [{}], expected {}",
        networks.join(", "),
        network.cosmos_chain_id()
    )))
}

fn foreign_chain_id(network: Network, reported: &str) -> String {
    match Network::from_cosmos_chain_id(reported) {
        Some(other) => format!(
            "reports {reported} ({}), expected {}",
            other.name(),
            network.cosmos_chain_id()
        ),
        None => format!("reports {reported}, expected {}", network.cosmos_chain_id()),
    }
}

fn parse_json(surface: &str, bytes: &[u8]) -> Result<Value, ProbeError> {
    serde_json::from_slice(bytes).map_err(|err| ProbeError::Response {
        surface: surface.to_string(),
        message: format!("invalid JSON: {err}"),
    })
}

fn missing(surface: &str, field: &str) -> ProbeError {
    ProbeError::Response {
        surface: surface.to_string(),
        message: format!("missing `{field}`"),
    }
}

/// CometBFT `/status`, with or without the JSON-RPC envelope.
pub fn parse_cometbft_status(bytes: &[u8]) -> Result<CometStatus, ProbeError> {
    let value = parse_json(PROBE_COMETBFT, bytes)?;
    let body = value.get("result").unwrap_or(&value);
    let network = body
        .pointer("/node_info/network")
        .and_then(Value::as_str)
        .ok_or_else(|| missing(PROBE_COMETBFT, "node_info.network"))?;
    let latest_block_height = body
        .pointer("/sync_info/latest_block_height")
        .and_then(|height| match height {
            Value::String(text) => text.parse().ok(),
            other => other.as_u64(),
        });
    let catching_up = body
        .pointer("/sync_info/catching_up")
        .and_then(Value::as_bool);
    Ok(CometStatus {
        network: network.to_string(),
        latest_block_height,
        catching_up,
    })
}

pub fn parse_eth_chain_id(bytes: &[u8]) -> Result<u64, ProbeError> {
    let value = parse_json(PROBE_EVM, bytes)?;
    if let Some(error) = value.get("error") {
        return Err(ProbeError::Response {
            surface: PROBE_EVM.to_string(),
            message: format!("JSON-RPC error: {error}"),
        });
    }
    let raw = value
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| missing(PROBE_EVM, "result"))?;
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| ProbeError::Response {
            surface: PROBE_EVM.to_string(),
            message: format!("chain id `{raw}` is not 0x-prefixed"),
        })?;
    u64::from_str_radix(digits, 16).map_err(|err| ProbeError::Response {
        surface: PROBE_EVM.to_string(),
        message: format!("chain id `{raw}`: {err}"),
    })
}

/// Cosmos REST `node_info`; newer SDKs use `default_node_info`, older ones `node_info`.
pub fn parse_node_info(bytes: &[u8]) -> Result<String, ProbeError> {
    let value = parse_json(PROBE_COSMOS_REST, bytes)?;
    value
        .pointer("/default_node_info/network")
        .or_else(|| value.pointer("/node_info/network"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(PROBE_COSMOS_REST, "default_node_info.network"))
}

pub fn parse_rosetta_networks(bytes: &[u8]) -> Result<Vec<String>, ProbeError> {
    let value = parse_json(PROBE_ROSETTA, bytes)?;
    let identifiers = value
        .get("network_identifiers")
        .and_then(Value::as_array)
        .ok_or_else(|| missing(PROBE_ROSETTA, "network_identifiers"))?;
    Ok(identifiers
        .iter()
        .filter_map(|identifier| identifier.get("network").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}
