//! Join pipeline for a fresh or re-used node home.
//!
//! States run strictly in order:
//! `download_genesis -> validate_genesis -> fetch_peers -> validate_peers ->
//! apply_sync_strategy -> verify_sha256 -> write_genesis -> clear_addrbook ->
//! write_config_patch`. A wrong chain id or digest aborts before anything is
//! written; peer document problems only skip the peer steps.

use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::errors::{FetchError, JoinError};
use crate::fetch::ArtifactFetcher;
use crate::genesis;
use crate::network::Network;
use crate::patch::{self, ConfigPatch, SyncStrategy};
use crate::peers::{self, merge_peers, Peer, PeerRegistry};
use crate::report::{ExitCode, Step};
use crate::writer;

pub const STEP_DOWNLOAD_GENESIS: &str = "download_genesis";
pub const STEP_VALIDATE_GENESIS: &str = "validate_genesis";
pub const STEP_FETCH_PEERS: &str = "fetch_peers";
pub const STEP_VALIDATE_PEERS: &str = "validate_peers";
pub const STEP_APPLY_SYNC_STRATEGY: &str = "apply_sync_strategy";
pub const STEP_VERIFY_SHA256: &str = "verify_sha256";
pub const STEP_WRITE_GENESIS: &str = "write_genesis";
pub const STEP_CLEAR_ADDRBOOK: &str = "clear_addrbook";
pub const STEP_WRITE_CONFIG_PATCH: &str = "write_config_patch";

pub const JOIN_STEPS: [&str; 9] = [
    STEP_DOWNLOAD_GENESIS,
    STEP_VALIDATE_GENESIS,
    STEP_FETCH_PEERS,
    STEP_VALIDATE_PEERS,
    STEP_APPLY_SYNC_STRATEGY,
    STEP_VERIFY_SHA256,
    STEP_WRITE_GENESIS,
    STEP_CLEAR_ADDRBOOK,
    STEP_WRITE_CONFIG_PATCH,
];

#[derive(Debug, Clone)]
pub struct JoinOptions {
    pub network: Network,
    pub home: PathBuf,
    pub sync_strategy: SyncStrategy,
    /// Overrides the network's default genesis URL.
    pub genesis_url: Option<String>,
    /// Overrides the network's default peer document URL.
    pub peers_url: Option<String>,
    /// Trusted digest; takes precedence over the peer document's `genesis_sha256`.
    pub expected_sha256: Option<String>,
    pub external_address: Option<String>,
    pub extra_seeds: Vec<Peer>,
    pub extra_persistent_peers: Vec<Peer>,
    /// Clear the address book even when the strategy does not require it.
    pub clear_addrbook: bool,
    pub dry_run: bool,
}

impl JoinOptions {
    pub fn new(network: Network, home: impl Into<PathBuf>) -> Self {
        Self {
            network,
            home: home.into(),
            sync_strategy: SyncStrategy::Default,
            genesis_url: None,
            peers_url: None,
            expected_sha256: None,
            external_address: None,
            extra_seeds: Vec::new(),
            extra_persistent_peers: Vec::new(),
            clear_addrbook: false,
            dry_run: false,
        }
    }

    pub fn genesis_url(&self) -> String {
        self.genesis_url
            .clone()
            .unwrap_or_else(|| self.network.default_genesis_url())
    }

    pub fn peers_url(&self) -> String {
        self.peers_url
            .clone()
            .unwrap_or_else(|| self.network.default_peers_url())
    }
}

#[derive(Debug, Serialize)]
pub struct JoinReport {
    pub network: Network,
    pub home: PathBuf,
    pub sync_strategy: SyncStrategy,
    pub dry_run: bool,
    pub steps: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genesis_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<ConfigPatch>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<JoinError>,
}

fn serialize_error<S: Serializer>(error: &Option<JoinError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

impl JoinReport {
    fn new(options: &JoinOptions) -> Self {
        Self {
            network: options.network,
            home: options.home.clone(),
            sync_strategy: options.sync_strategy,
            dry_run: options.dry_run,
            steps: Vec::with_capacity(JOIN_STEPS.len()),
            genesis_sha256: None,
            patch: None,
            error: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.error.is_none()
    }

    pub fn exit_code(&self) -> ExitCode {
        match &self.error {
            None => ExitCode::Success,
            Some(JoinError::Cancelled) => ExitCode::Cancelled,
            Some(error) if error.is_fatal() => ExitCode::Fatal,
            Some(_) => ExitCode::Failed,
        }
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.name == name)
    }

    fn record(&mut self, step: Step) {
        info!(
            target: "monoctl::join",
            step = step.name,
            status = ?step.status,
            message = step.message.as_deref().unwrap_or(""),
            "join step finished"
        );
        self.steps.push(step);
    }

    /// Record the terminal error and mark every state not yet reached as skipped.
    fn abort(mut self, error: JoinError) -> Self {
        let reason = match error {
            JoinError::Cancelled => "cancelled",
            _ => "not run",
        };
        let reached = self.steps.len();
        for &name in JOIN_STEPS.iter().skip(reached) {
            self.steps.push(Step::skipped(name, Some(reason.to_string())));
        }
        warn!(target: "monoctl::join", network = %self.network, error = %error, "join aborted");
        self.error = Some(error);
        self
    }
}

pub struct Orchestrator<F> {
    fetcher: F,
    cancel: CancelToken,
}

impl<F: ArtifactFetcher> Orchestrator<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the pipeline. The returned report always lists every state.
    pub fn run(&self, options: &JoinOptions) -> JoinReport {
        let mut report = JoinReport::new(options);
        info!(
            target: "monoctl::join",
            network = %options.network,
            home = %options.home.display(),
            strategy = %options.sync_strategy,
            dry_run = options.dry_run,
            "starting join"
        );

        let cancel = &self.cancel;
        macro_rules! checkpoint {
            () => {
                if cancel.is_cancelled() {
                    return report.abort(JoinError::Cancelled);
                }
            };
        }

        checkpoint!();
        let genesis_url = options.genesis_url();
        let genesis_bytes = match self.download(&genesis_url) {
            Ok(bytes) => {
                report.record(Step::success(
                    STEP_DOWNLOAD_GENESIS,
                    Some(format!("{} bytes from {genesis_url}", bytes.len())),
                ));
                bytes
            }
            Err(err) => {
                report.record(Step::failed(STEP_DOWNLOAD_GENESIS, err.to_string()));
                return report.abort(JoinError::Download(err));
            }
        };

        checkpoint!();
        let expected_chain_id = options.network.cosmos_chain_id();
        match genesis::validate(&genesis_bytes) {
            Ok(chain_id) if chain_id == expected_chain_id => {
                let digest = genesis::digest(&genesis_bytes);
                report.record(Step::success(
                    STEP_VALIDATE_GENESIS,
                    Some(format!("chain id {chain_id}, sha256 {digest}")),
                ));
                report.genesis_sha256 = Some(digest);
            }
            Ok(chain_id) => {
                let message = match Network::from_cosmos_chain_id(&chain_id) {
                    Some(other) => format!(
                        "genesis is for {} ({chain_id}), expected {expected_chain_id}",
                        other.name()
                    ),
                    None => format!("genesis chain id {chain_id}, expected {expected_chain_id}"),
                };
                report.record(Step::failed(STEP_VALIDATE_GENESIS, message));
                return report.abort(JoinError::ChainIdMismatch {
                    expected: expected_chain_id.to_string(),
                    got: chain_id,
                });
            }
            Err(err) => {
                report.record(Step::failed(STEP_VALIDATE_GENESIS, err.to_string()));
                return report.abort(JoinError::InvalidGenesis(err));
            }
        }

        checkpoint!();
        let peers_url = options.peers_url();
        let peer_bytes = if peers_url.is_empty() {
            report.record(Step::skipped(
                STEP_FETCH_PEERS,
                Some("no peer document URL configured".to_string()),
            ));
            None
        } else {
            match self.fetcher.fetch(&peers_url) {
                Ok(bytes) => {
                    report.record(Step::success(
                        STEP_FETCH_PEERS,
                        Some(format!("{} bytes from {peers_url}", bytes.len())),
                    ));
                    Some(bytes)
                }
                Err(err) => {
                    report.record(Step::skipped(STEP_FETCH_PEERS, Some(err.to_string())));
                    None
                }
            }
        };

        checkpoint!();
        let registry = match peer_bytes {
            None => {
                report.record(Step::skipped(
                    STEP_VALIDATE_PEERS,
                    Some("no peer document".to_string()),
                ));
                None
            }
            Some(bytes) => match peers::parse(&bytes, expected_chain_id) {
                Ok(registry) => {
                    let mut message = registry.summary();
                    if !registry.dropped.is_empty() {
                        message.push_str(&format!(", {} malformed dropped", registry.dropped.len()));
                    }
                    report.record(Step::success(STEP_VALIDATE_PEERS, Some(message)));
                    Some(registry)
                }
                Err(err) => {
                    report.record(Step::skipped(STEP_VALIDATE_PEERS, Some(err.to_string())));
                    None
                }
            },
        };

        checkpoint!();
        let patch = match apply_sync_strategy(options, registry.as_ref()) {
            Ok((patch, message)) => {
                report.record(Step::success(STEP_APPLY_SYNC_STRATEGY, Some(message)));
                patch
            }
            Err(err) => {
                report.record(Step::failed(STEP_APPLY_SYNC_STRATEGY, err.to_string()));
                return report.abort(err);
            }
        };
        report.patch = Some(patch.clone());

        checkpoint!();
        let trusted = options
            .expected_sha256
            .as_deref()
            .map(|digest| (digest.to_string(), "operator"))
            .or_else(|| {
                registry
                    .as_ref()
                    .and_then(|registry| registry.genesis_sha256.clone())
                    .map(|digest| (digest, "peer document"))
            });
        match trusted {
            None => report.record(Step::skipped(
                STEP_VERIFY_SHA256,
                Some("no trusted digest available".to_string()),
            )),
            Some((expected, source)) => match genesis::matches_digest(&genesis_bytes, &expected) {
                Ok(()) => report.record(Step::success(
                    STEP_VERIFY_SHA256,
                    Some(format!("matches {source} digest")),
                )),
                Err(actual) => {
                    report.record(Step::failed(
                        STEP_VERIFY_SHA256,
                        format!("{source} digest {expected} does not match {actual}"),
                    ));
                    return report.abort(JoinError::DigestMismatch {
                        expected,
                        got: actual,
                    });
                }
            },
        }

        checkpoint!();
        match writer::write_genesis(&options.home, &genesis_bytes, options.dry_run) {
            Ok(path) => report.record(Step::success(
                STEP_WRITE_GENESIS,
                Some(describe_write(&path, options.dry_run)),
            )),
            Err(err) => {
                report.record(Step::failed(STEP_WRITE_GENESIS, err.to_string()));
                return report.abort(JoinError::Io(err));
            }
        }

        checkpoint!();
        if options.sync_strategy.requires_addrbook_reset() || options.clear_addrbook {
            match writer::clear_addrbook(&options.home, options.dry_run) {
                Ok(removed) => {
                    let message = match (removed, options.dry_run) {
                        (true, true) => "dry run: would remove address book",
                        (true, false) => "address book removed",
                        (false, _) => "no address book present",
                    };
                    report.record(Step::success(STEP_CLEAR_ADDRBOOK, Some(message.to_string())));
                }
                Err(err) => {
                    report.record(Step::failed(STEP_CLEAR_ADDRBOOK, err.to_string()));
                    return report.abort(JoinError::Io(err));
                }
            }
        } else {
            report.record(Step::skipped(
                STEP_CLEAR_ADDRBOOK,
                Some(format!("not required for {} strategy", options.sync_strategy)),
            ));
        }

        checkpoint!();
        match writer::write_patch(&options.home, &patch, options.dry_run) {
            Ok(written) => report.record(Step::success(
                STEP_WRITE_CONFIG_PATCH,
                Some(format!(
                    "{} keys across {} files{}",
                    patch.entries().len(),
                    written.files.len(),
                    if options.dry_run { " (dry run)" } else { "" }
                )),
            )),
            Err(err) => {
                report.record(Step::failed(STEP_WRITE_CONFIG_PATCH, err.to_string()));
                return report.abort(JoinError::Io(err));
            }
        }

        info!(target: "monoctl::join", network = %options.network, "join complete");
        report
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.is_empty() {
            return Err(FetchError::Transport {
                url: String::new(),
                message: "no genesis URL configured for this network".to_string(),
            });
        }
        self.fetcher.fetch(url)
    }
}

/// Resolve the peer sets for the selected strategy and build the canonical patch.
pub fn apply_sync_strategy(
    options: &JoinOptions,
    registry: Option<&PeerRegistry>,
) -> Result<(ConfigPatch, String), JoinError> {
    let empty = PeerRegistry::default();
    let registry = registry.unwrap_or(&empty);

    let (seeds, persistent) = match options.sync_strategy {
        SyncStrategy::Default => (
            merge_peers(&registry.seeds, &options.extra_seeds),
            merge_peers(&registry.persistent_peers, &options.extra_persistent_peers),
        ),
        SyncStrategy::Bootstrap => {
            let source = if !registry.bootstrap_peers.is_empty() {
                &registry.bootstrap_peers
            } else {
                if !registry.persistent_peers.is_empty() {
                    warn!(
                        target: "monoctl::join",
                        "peer document lists no bootstrap peers; falling back to persistent peers"
                    );
                }
                &registry.persistent_peers
            };
            let persistent = merge_peers(source, &options.extra_persistent_peers);
            if persistent.is_empty() {
                return Err(JoinError::BootstrapUnavailable);
            }
            (Vec::new(), persistent)
        }
    };

    let patch = patch::generate(options.network, options.sync_strategy, &seeds, &persistent)
        .with_external_address(options.external_address.as_deref());
    let message = format!(
        "{}: pex {}, {} seeds, {} persistent peers",
        options.sync_strategy,
        if options.sync_strategy.pex_enabled() { "on" } else { "off" },
        if options.sync_strategy.pex_enabled() { seeds.len() } else { 0 },
        persistent.len()
    );
    Ok((patch, message))
}

fn describe_write(path: &Path, dry_run: bool) -> String {
    if dry_run {
        format!("dry run: would write {}", path.display())
    } else {
        format!("wrote {}", path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticFetcher;
    use crate::patch::{CanonicalKey, PatchValue};
    use crate::report::StepStatus;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tempfile::TempDir;

    const GENESIS_URL: &str = "https://artifacts.test/genesis.json";
    const PEERS_URL: &str = "https://artifacts.test/peers.json";

    fn peer(byte: char, host: &str) -> String {
        let id: String = std::iter::repeat(byte).take(40).collect();
        format!("{id}@{host}:26656")
    }

    fn genesis(chain_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({ "chain_id": chain_id, "app_state": {} })).unwrap()
    }

    fn options(home: &Path) -> JoinOptions {
        let mut options = JoinOptions::new(Network::Sprintnet, home);
        options.genesis_url = Some(GENESIS_URL.to_string());
        options.peers_url = Some(PEERS_URL.to_string());
        options
    }

    #[test]
    fn cancelled_token_skips_every_step() {
        let temp = TempDir::new().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let fetcher = StaticFetcher::new().with(GENESIS_URL, genesis("mono-sprint-1"));
        let report = Orchestrator::new(&fetcher)
            .with_cancel(token)
            .run(&options(temp.path()));

        assert_matches!(report.error, Some(JoinError::Cancelled));
        assert_eq!(report.exit_code(), ExitCode::Cancelled);
        assert_eq!(report.steps.len(), JOIN_STEPS.len());
        assert!(report.steps.iter().all(|step| step.status == StepStatus::Skipped));
        assert!(fetcher.requests().is_empty());
    }

    #[test]
    fn missing_peer_document_still_completes() {
        let temp = TempDir::new().unwrap();
        let fetcher = StaticFetcher::new().with(GENESIS_URL, genesis("mono-sprint-1"));
        let report = Orchestrator::new(&fetcher).run(&options(temp.path()));

        assert!(report.is_done(), "{:?}", report.error);
        assert!(report.steps.iter().all(|step| step.status != StepStatus::Failed));
        assert_eq!(report.step(STEP_FETCH_PEERS).unwrap().status, StepStatus::Skipped);
        assert_eq!(report.step(STEP_VALIDATE_PEERS).unwrap().status, StepStatus::Skipped);
        assert_eq!(report.step(STEP_VERIFY_SHA256).unwrap().status, StepStatus::Skipped);
        let patch = report.patch.unwrap();
        assert_eq!(patch.get(CanonicalKey::Seeds), Some(&PatchValue::Str(String::new())));
    }

    #[test]
    fn download_failure_is_not_fatal_but_fails() {
        let temp = TempDir::new().unwrap();
        let fetcher = StaticFetcher::new();
        let report = Orchestrator::new(&fetcher).run(&options(temp.path()));

        assert_matches!(report.error, Some(JoinError::Download(FetchError::HttpStatus { code: 404, .. })));
        assert_eq!(report.exit_code(), ExitCode::Failed);
        assert_eq!(report.steps[0].status, StepStatus::Failed);
        assert!(report.steps[1..].iter().all(|step| step.status == StepStatus::Skipped));
    }

    #[test]
    fn localnet_without_genesis_url_fails_download() {
        let temp = TempDir::new().unwrap();
        let fetcher = StaticFetcher::new();
        let report = Orchestrator::new(&fetcher)
            .run(&JoinOptions::new(Network::Localnet, temp.path()));
        assert_matches!(report.error, Some(JoinError::Download(FetchError::Transport { .. })));
        assert!(fetcher.requests().is_empty());
    }

    #[test]
    fn bootstrap_falls_back_to_persistent_peers_and_operator_peers() {
        let temp = TempDir::new().unwrap();
        let registry = PeerRegistry {
            chain_id: "mono-sprint-1".into(),
            seeds: vec![Peer::parse(&peer('a', "seed")).unwrap()],
            persistent_peers: vec![Peer::parse(&peer('b', "peer")).unwrap()],
            ..Default::default()
        };
        let mut opts = options(temp.path());
        opts.sync_strategy = SyncStrategy::Bootstrap;
        opts.extra_persistent_peers = vec![Peer::parse(&peer('c', "mine")).unwrap()];

        let (patch, _) = apply_sync_strategy(&opts, Some(&registry)).unwrap();
        assert_eq!(
            patch.get(CanonicalKey::PersistentPeers),
            Some(&PatchValue::Str(format!("{},{}", peer('b', "peer"), peer('c', "mine"))))
        );
        assert_eq!(patch.get(CanonicalKey::Seeds), Some(&PatchValue::Str(String::new())));

        opts.extra_persistent_peers.clear();
        let bare = PeerRegistry {
            chain_id: "mono-sprint-1".into(),
            ..Default::default()
        };
        assert_matches!(
            apply_sync_strategy(&opts, Some(&bare)),
            Err(JoinError::BootstrapUnavailable)
        );
    }

    #[test]
    fn operator_digest_wins_over_peer_document() {
        let temp = TempDir::new().unwrap();
        let bytes = genesis("mono-sprint-1");
        let document = json!({
            "chain_id": "mono-sprint-1",
            "genesis_sha256": "f".repeat(64),
            "seeds": [peer('a', "seed")],
        });
        let fetcher = StaticFetcher::new()
            .with(GENESIS_URL, bytes.clone())
            .with(PEERS_URL, document.to_string());
        let mut opts = options(temp.path());
        opts.expected_sha256 = Some(genesis::digest(&bytes).to_uppercase());

        let report = Orchestrator::new(&fetcher).run(&opts);
        assert!(report.is_done(), "{:?}", report.error);
        assert_eq!(
            report.step(STEP_VERIFY_SHA256).unwrap().message.as_deref(),
            Some("matches operator digest")
        );
    }

    #[test]
    fn dry_run_reports_intended_writes() {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("node");
        let fetcher = StaticFetcher::new().with(GENESIS_URL, genesis("mono-sprint-1"));
        let mut opts = options(&home);
        opts.dry_run = true;
        opts.clear_addrbook = true;

        let report = Orchestrator::new(&fetcher).run(&opts);
        assert!(report.is_done());
        assert!(report
            .step(STEP_WRITE_GENESIS)
            .unwrap()
            .message
            .as_deref()
            .unwrap()
            .starts_with("dry run"));
        assert!(!home.exists());
    }

    #[test]
    fn report_serializes_error_as_text() {
        let temp = TempDir::new().unwrap();
        let fetcher = StaticFetcher::new().with(GENESIS_URL, genesis("mono-1"));
        let report = Orchestrator::new(&fetcher).run(&options(temp.path()));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["network"], "sprintnet");
        assert!(json["error"].as_str().unwrap().contains("wrong network"));
        assert_eq!(json["steps"][1]["status"], "failed");
    }
}
