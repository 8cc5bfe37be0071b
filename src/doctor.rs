//! Drift detection and repair for an existing node home.
//!
//! The doctor compares every canonical key on disk with the value the
//! selected network expects and classifies each difference. Repair rewrites
//! the non-OK keys through the writer and refuses to touch a home with
//! fatal drift unless forced.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{DoctorError, JoinError};
use crate::join::{self, JoinOptions};
use crate::network::Network;
use crate::patch::{self, CanonicalKey, ConfigFile, ConfigPatch, PatchValue, RecordedPatch, SyncStrategy};
use crate::peers::{split_peer_list, PeerRegistry};
use crate::report::{ExitCode, Step};
use crate::writer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Ok,
    Info,
    Warn,
    Critical,
    Fatal,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Critical => "CRITICAL",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftRecord {
    pub key: CanonicalKey,
    pub file: ConfigFile,
    pub severity: Severity,
    /// Rendered canonical value; `None` when the key is not managed for this home.
    pub expected: Option<String>,
    /// Raw value found on disk; `None` when the key is absent.
    pub found: Option<String>,
    pub message: String,
}

impl DriftRecord {
    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    fn to_step(&self) -> Step {
        let message = format!("{}: {}", self.severity, self.message);
        match self.severity {
            Severity::Ok | Severity::Info => Step::success(self.key.name(), Some(message)),
            _ => Step::failed(self.key.name(), message),
        }
    }
}

/// What the doctor compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub patch: ConfigPatch,
    /// False when no trustworthy peer lists are known; peer keys are then not judged.
    pub peers_known: bool,
    /// False when no sync strategy was recorded; `pex` is then not judged.
    pub strategy_known: bool,
}

impl Expectation {
    /// Rebuild the expected patch from the sidecar written by the last join or repair.
    pub fn from_sidecar(network: Network, home: &Path) -> Result<Self, DoctorError> {
        writer::check_home(home)?;
        let path = writer::sidecar_path(home);
        let recorded = match writer::read_optional(&path)? {
            Some(text) => RecordedPatch::parse(&text),
            None => {
                debug!(target: "monoctl::doctor", path = %path.display(), "no patch record found");
                RecordedPatch::default()
            }
        };

        if let Some(other) = recorded.network.filter(|other| *other != network) {
            warn!(
                target: "monoctl::doctor",
                recorded = %other,
                selected = %network,
                "patch record belongs to another network; ignoring recorded peers"
            );
            return Ok(Self {
                patch: patch::generate(network, SyncStrategy::Default, &[], &[]),
                peers_known: false,
                strategy_known: false,
            });
        }

        let strategy_known = recorded.sync_strategy.is_some();
        let strategy = recorded.sync_strategy.unwrap_or_default();
        let seeds = recorded.peers(CanonicalKey::Seeds);
        let persistent = recorded.peers(CanonicalKey::PersistentPeers);
        let peers_known = seeds.is_some() && persistent.is_some();
        let patch = patch::generate(
            network,
            strategy,
            &seeds.unwrap_or_default(),
            &persistent.unwrap_or_default(),
        )
        .with_external_address(recorded.external_address());
        Ok(Self {
            patch,
            peers_known,
            strategy_known,
        })
    }

    /// Expected patch from a freshly validated peer document.
    pub fn refreshed(options: &JoinOptions, registry: &PeerRegistry) -> Result<Self, JoinError> {
        let (patch, _) = join::apply_sync_strategy(options, Some(registry))?;
        Ok(Self {
            patch,
            peers_known: true,
            strategy_known: true,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub network: Network,
    pub home: PathBuf,
    pub records: Vec<DriftRecord>,
}

impl DoctorReport {
    pub fn record(&self, key: CanonicalKey) -> Option<&DriftRecord> {
        self.records.iter().find(|record| record.key == key)
    }

    pub fn non_ok(&self) -> impl Iterator<Item = &DriftRecord> {
        self.records.iter().filter(|record| !record.is_ok())
    }

    pub fn is_clean(&self) -> bool {
        self.non_ok().next().is_none()
    }

    pub fn fatal_count(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.severity == Severity::Fatal)
            .count()
    }

    pub fn worst(&self) -> Severity {
        self.records
            .iter()
            .map(|record| record.severity)
            .max()
            .unwrap_or(Severity::Ok)
    }

    pub fn steps(&self) -> Vec<Step> {
        self.records.iter().map(DriftRecord::to_step).collect()
    }

    pub fn exit_code(&self) -> ExitCode {
        match self.worst() {
            Severity::Ok | Severity::Info => ExitCode::Success,
            Severity::Warn | Severity::Critical => ExitCode::Failed,
            Severity::Fatal => ExitCode::Fatal,
        }
    }
}

/// Doctor against the expectation recorded in the home's sidecar.
pub fn diagnose(network: Network, home: &Path) -> Result<DoctorReport, DoctorError> {
    let expectation = Expectation::from_sidecar(network, home)?;
    diagnose_against(home, &expectation)
}

/// Read-only comparison of every canonical key with `expectation`.
pub fn diagnose_against(home: &Path, expectation: &Expectation) -> Result<DoctorReport, DoctorError> {
    writer::check_home(home)?;
    let network = expectation.patch.network;
    let mut records = Vec::with_capacity(CanonicalKey::all().len());

    for file in ConfigFile::all() {
        let contents = writer::read_optional(&writer::config_file_path(home, *file))?;
        for key in CanonicalKey::all().iter().filter(|key| key.file() == *file) {
            let found = contents
                .as_deref()
                .and_then(|contents| writer::read_key(contents, key.toml_key()));
            let record = classify(network, *key, expectation, found);
            if record.is_ok() {
                debug!(target: "monoctl::doctor", key = key.name(), "canonical value matches");
            } else {
                info!(
                    target: "monoctl::doctor",
                    key = key.name(),
                    severity = %record.severity,
                    expected = record.expected.as_deref().unwrap_or(""),
                    found = record.found.as_deref().unwrap_or(""),
                    "drift detected"
                );
            }
            records.push(record);
        }
    }

    records.sort_by_key(|record| record.key);
    Ok(DoctorReport {
        network,
        home: home.to_path_buf(),
        records,
    })
}

fn classify(
    network: Network,
    key: CanonicalKey,
    expectation: &Expectation,
    found: Option<&str>,
) -> DriftRecord {
    let expected = expectation.patch.get(key);
    let record = |severity: Severity, message: String| DriftRecord {
        key,
        file: key.file(),
        severity,
        expected: expected.map(PatchValue::render),
        found: found.map(str::to_string),
        message,
    };

    let Some(expected) = expected else {
        return record(Severity::Ok, format!("not managed for {}", network.name()));
    };
    if key.is_peer_list() && !expectation.peers_known {
        return record(Severity::Ok, "no recorded peer list to compare".to_string());
    }
    if key == CanonicalKey::PexEnabled && !expectation.strategy_known {
        return record(Severity::Ok, "no recorded sync strategy".to_string());
    }
    let Some(raw) = found else {
        return record(
            Severity::Warn,
            format!("absent from {}", key.file().file_name()),
        );
    };
    let Some(value) = PatchValue::parse_literal(raw) else {
        let severity = match key {
            CanonicalKey::CosmosChainId | CanonicalKey::EvmChainId => Severity::Critical,
            _ => Severity::Warn,
        };
        return record(severity, format!("unreadable value `{raw}`"));
    };
    if &value == expected {
        return record(Severity::Ok, "matches".to_string());
    }

    match key {
        CanonicalKey::EvmChainId => classify_evm_chain_id(network, expected, &value, record),
        CanonicalKey::CosmosChainId if trimmed_eq(expected, &value) => {
            record(Severity::Info, "differs only by whitespace".to_string())
        }
        CanonicalKey::CosmosChainId => {
            let owner = value
                .as_str()
                .and_then(|chain_id| Network::from_cosmos_chain_id(chain_id.trim()));
            let message = match owner {
                Some(other) => format!("chain id belongs to {}", other.name()),
                None => "chain id differs".to_string(),
            };
            record(Severity::Critical, message)
        }
        CanonicalKey::Seeds | CanonicalKey::PersistentPeers => {
            let wanted: BTreeSet<String> =
                split_peer_list(expected.as_str().unwrap_or_default()).into_iter().collect();
            let present: BTreeSet<String> =
                split_peer_list(value.as_str().unwrap_or_default()).into_iter().collect();
            if wanted == present {
                record(Severity::Info, "same peers, different order or spacing".to_string())
            } else {
                let missing = wanted.difference(&present).count();
                let unexpected = present.difference(&wanted).count();
                record(
                    Severity::Critical,
                    format!("peer set differs: {missing} missing, {unexpected} unexpected"),
                )
            }
        }
        CanonicalKey::PexEnabled => record(
            Severity::Warn,
            format!(
                "inconsistent with recorded {} sync strategy",
                expectation.patch.sync_strategy
            ),
        ),
        CanonicalKey::MinimumGasPrices | CanonicalKey::ExternalAddress
            if trimmed_eq(expected, &value) =>
        {
            record(Severity::Info, "differs only by whitespace".to_string())
        }
        CanonicalKey::MinimumGasPrices | CanonicalKey::ExternalAddress => {
            record(Severity::Warn, "differs from canonical value".to_string())
        }
    }
}

fn classify_evm_chain_id(
    network: Network,
    expected: &PatchValue,
    value: &PatchValue,
    record: impl Fn(Severity, String) -> DriftRecord,
) -> DriftRecord {
    let numeric = match value {
        PatchValue::Int(id) => Some(*id),
        PatchValue::Str(text) => text.trim().parse::<u64>().ok(),
        PatchValue::Bool(_) => None,
    };
    let Some(id) = numeric else {
        return record(Severity::Critical, "evm chain id is not a number".to_string());
    };
    if PatchValue::Int(id) == *expected {
        return record(Severity::Info, "written as a string".to_string());
    }
    match Network::from_evm_chain_id(id) {
        Some(Network::Localnet) if !network.is_localnet() => record(
            Severity::Fatal,
            format!(
                "Localnet leak: evm_chain_id {id} belongs to localnet, expected {}",
                network.evm_chain_id()
            ),
        ),
        Some(other) => record(
            Severity::Fatal,
            format!(
                "evm_chain_id {id} belongs to {}, expected {}",
                other.name(),
                network.evm_chain_id()
            ),
        ),
        None => record(Severity::Critical, "evm chain id differs".to_string()),
    }
}

fn trimmed_eq(expected: &PatchValue, value: &PatchValue) -> bool {
    match (expected.as_str(), value.as_str()) {
        (Some(expected), Some(value)) => expected.trim() == value.trim(),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairOptions {
    /// Explicit override: repair even when fatal drift is present.
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub before: DoctorReport,
    pub repaired: Vec<CanonicalKey>,
    pub files: Vec<PathBuf>,
    pub dry_run: bool,
}

impl RepairReport {
    pub fn steps(&self) -> Vec<Step> {
        self.before
            .records
            .iter()
            .map(|record| {
                if record.is_ok() {
                    Step::skipped(record.key.name(), Some("already canonical".to_string()))
                } else if self.dry_run {
                    Step::success(
                        record.key.name(),
                        Some(format!("dry run: would rewrite ({})", record.severity)),
                    )
                } else {
                    Step::success(
                        record.key.name(),
                        Some(format!("rewritten ({})", record.severity)),
                    )
                }
            })
            .collect()
    }
}

/// Rewrite every non-OK key with its canonical value.
///
/// Nothing is written when fatal drift is present and `options.force` is
/// not set, or when the home is already clean.
pub fn repair(
    home: &Path,
    expectation: &Expectation,
    options: RepairOptions,
) -> Result<RepairReport, DoctorError> {
    let before = diagnose_against(home, expectation)?;
    let fatal = before.fatal_count();
    if fatal > 0 && !options.force {
        warn!(target: "monoctl::doctor", fatal, "refusing to repair fatal drift without override");
        return Err(DoctorError::DriftFatal { count: fatal });
    }

    let keys: Vec<CanonicalKey> = before.non_ok().map(|record| record.key).collect();
    if keys.is_empty() {
        info!(target: "monoctl::doctor", home = %home.display(), "nothing to repair");
        return Ok(RepairReport {
            before,
            repaired: keys,
            files: Vec::new(),
            dry_run: options.dry_run,
        });
    }

    let entries = expectation.patch.restricted_to(&keys);
    let files = writer::apply_entries(home, &entries, options.dry_run)?;
    if expectation.peers_known {
        let sidecar = writer::sidecar_path(home);
        if options.dry_run {
            info!(target: "monoctl::doctor", path = %sidecar.display(), "dry run: would refresh patch record");
        } else {
            writer::write_sidecar(home, &expectation.patch)?;
        }
    }
    info!(
        target: "monoctl::doctor",
        repaired = keys.len(),
        forced = options.force && fatal > 0,
        dry_run = options.dry_run,
        "repair finished"
    );

    Ok(RepairReport {
        before,
        repaired: keys,
        files,
        dry_run: options.dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peers::Peer;
    use assert_matches::assert_matches;
    use std::fs;
    use tempfile::TempDir;

    fn peer(byte: char, host: &str) -> Peer {
        let id: String = std::iter::repeat(byte).take(40).collect();
        Peer::parse(&format!("{id}@{host}:26656")).unwrap()
    }

    fn clean_home(network: Network) -> (TempDir, Expectation) {
        let temp = TempDir::new().unwrap();
        let patch = patch::generate(
            network,
            SyncStrategy::Default,
            &[peer('a', "seed")],
            &[peer('b', "peer"), peer('c', "peer")],
        );
        writer::write_patch(temp.path(), &patch, false).unwrap();
        let expectation = Expectation::from_sidecar(network, temp.path()).unwrap();
        (temp, expectation)
    }

    fn set_line(home: &Path, file: ConfigFile, from: &str, to: &str) {
        let path = writer::config_file_path(home, file);
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains(from), "{contents}");
        fs::write(&path, contents.replace(from, to)).unwrap();
    }

    #[test]
    fn freshly_written_home_is_clean() {
        let (temp, expectation) = clean_home(Network::Testnet);
        assert!(expectation.peers_known);
        assert!(expectation.strategy_known);
        let report = diagnose_against(temp.path(), &expectation).unwrap();
        assert!(report.is_clean(), "{:#?}", report.records);
        assert_eq!(report.records.len(), CanonicalKey::all().len());
        assert_eq!(report.exit_code(), ExitCode::Success);
    }

    #[test]
    fn empty_home_reports_absent_keys_as_warn() {
        let temp = TempDir::new().unwrap();
        let report = diagnose(Network::Mainnet, temp.path()).unwrap();
        assert_eq!(report.record(CanonicalKey::EvmChainId).unwrap().severity, Severity::Warn);
        assert_eq!(report.record(CanonicalKey::Seeds).unwrap().severity, Severity::Ok);
        assert_eq!(report.record(CanonicalKey::ExternalAddress).unwrap().severity, Severity::Ok);
        assert_eq!(report.worst(), Severity::Warn);
    }

    #[test]
    fn foreign_evm_chain_id_is_fatal_and_named() {
        let (temp, expectation) = clean_home(Network::Mainnet);
        set_line(temp.path(), ConfigFile::App, "evm_chain_id = 262148", "evm_chain_id = 262145");
        let report = diagnose_against(temp.path(), &expectation).unwrap();
        let record = report.record(CanonicalKey::EvmChainId).unwrap();
        assert_eq!(record.severity, Severity::Fatal);
        assert!(record.message.starts_with("Localnet leak"));
        assert_eq!(record.expected.as_deref(), Some("262148"));
        assert_eq!(record.found.as_deref(), Some("262145"));

        set_line(temp.path(), ConfigFile::App, "evm_chain_id = 262145", "evm_chain_id = 262147");
        let report = diagnose_against(temp.path(), &expectation).unwrap();
        let record = report.record(CanonicalKey::EvmChainId).unwrap();
        assert_eq!(record.severity, Severity::Fatal);
        assert!(record.message.contains("Testnet"));

        set_line(temp.path(), ConfigFile::App, "evm_chain_id = 262147", "evm_chain_id = 1");
        let report = diagnose_against(temp.path(), &expectation).unwrap();
        assert_eq!(report.record(CanonicalKey::EvmChainId).unwrap().severity, Severity::Critical);
    }

    #[test]
    fn severity_table_for_string_and_peer_keys() {
        let (temp, expectation) = clean_home(Network::Sprintnet);
        set_line(temp.path(), ConfigFile::Client, "\"mono-sprint-1\"", "\" mono-sprint-1\"");
        let seeds = peer('a', "seed").to_string();
        let persistent = format!("{},{}", peer('b', "peer"), peer('c', "peer"));
        let reordered = format!("{}, {}", peer('c', "peer"), peer('b', "peer"));
        set_line(temp.path(), ConfigFile::Config, &persistent, &reordered);
        set_line(temp.path(), ConfigFile::Config, &seeds, &peer('f', "rogue").to_string());
        set_line(temp.path(), ConfigFile::Config, "pex = true", "pex = false");

        let report = diagnose_against(temp.path(), &expectation).unwrap();
        let severity = |key| report.record(key).unwrap().severity;
        assert_eq!(severity(CanonicalKey::CosmosChainId), Severity::Info);
        assert_eq!(severity(CanonicalKey::PersistentPeers), Severity::Info);
        assert_eq!(severity(CanonicalKey::Seeds), Severity::Critical);
        assert_eq!(severity(CanonicalKey::PexEnabled), Severity::Warn);
        assert_eq!(report.exit_code(), ExitCode::Failed);
    }

    #[test]
    fn repair_refuses_fatal_without_override_and_fixes_with_it() {
        let (temp, expectation) = clean_home(Network::Testnet);
        set_line(temp.path(), ConfigFile::App, "evm_chain_id = 262147", "evm_chain_id = 262145");
        let before = fs::read(writer::config_file_path(temp.path(), ConfigFile::App)).unwrap();

        assert_matches!(
            repair(temp.path(), &expectation, RepairOptions::default()),
            Err(DoctorError::DriftFatal { count: 1 })
        );
        assert_eq!(
            fs::read(writer::config_file_path(temp.path(), ConfigFile::App)).unwrap(),
            before
        );

        let report = repair(
            temp.path(),
            &expectation,
            RepairOptions {
                force: true,
                dry_run: false,
            },
        )
        .unwrap();
        assert_eq!(report.repaired, vec![CanonicalKey::EvmChainId]);
        assert!(diagnose_against(temp.path(), &expectation).unwrap().is_clean());
    }

    #[test]
    fn dry_run_repair_leaves_disk_alone() {
        let (temp, expectation) = clean_home(Network::Sprintnet);
        set_line(temp.path(), ConfigFile::Config, "pex = true", "pex = false");
        let report = repair(
            temp.path(),
            &expectation,
            RepairOptions {
                force: false,
                dry_run: true,
            },
        )
        .unwrap();
        assert_eq!(report.repaired, vec![CanonicalKey::PexEnabled]);
        let after = diagnose_against(temp.path(), &expectation).unwrap();
        assert_eq!(after.record(CanonicalKey::PexEnabled).unwrap().severity, Severity::Warn);
    }

    #[test]
    fn sidecar_for_another_network_is_not_trusted() {
        let (temp, _) = clean_home(Network::Testnet);
        let expectation = Expectation::from_sidecar(Network::Mainnet, temp.path()).unwrap();
        assert!(!expectation.peers_known);
        assert!(!expectation.strategy_known);
        assert_eq!(expectation.patch.network, Network::Mainnet);
    }
}
