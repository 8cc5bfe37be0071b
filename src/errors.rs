use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("unknown network `{0}`; try localnet, sprintnet, testnet, or mainnet")]
    Unknown(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },
    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },
    #[error("unexpected HTTP status {code} from {url}")]
    HttpStatus { url: String, code: u16 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerRegistryError {
    #[error("peer document is not valid JSON: {0}")]
    Parse(String),
    #[error("peer document chain id mismatch: expected {expected}, got {got}")]
    ChainIdMismatch { expected: String, got: String },
    #[error("peer document genesis_sha256 `{0}` is not a 64 character hex digest")]
    InvalidDigest(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenesisError {
    #[error("invalid genesis: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("home path {path:?} must be absolute and must not contain `..`")]
    PathTraversal { path: PathBuf },
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WriteError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WriteError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Terminal error of a join run. Set on the report iff the run did not reach `DONE`.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("genesis download failed: {0}")]
    Download(#[source] FetchError),
    #[error(transparent)]
    InvalidGenesis(#[from] GenesisError),
    #[error("genesis belongs to the wrong network: expected chain id {expected}, got {got}")]
    ChainIdMismatch { expected: String, got: String },
    #[error("genesis digest mismatch: expected {expected}, got {got}")]
    DigestMismatch { expected: String, got: String },
    #[error("bootstrap strategy selected but the peer document lists no bootstrap or persistent peers")]
    BootstrapUnavailable,
    #[error(transparent)]
    Io(#[from] WriteError),
    #[error("join cancelled")]
    Cancelled,
}

impl JoinError {
    /// Wrong-network and wrong-artifact failures. These map to exit code 2.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            JoinError::InvalidGenesis(_)
                | JoinError::ChainIdMismatch { .. }
                | JoinError::DigestMismatch { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum DoctorError {
    #[error("refusing to repair: {count} fatal drift record(s) found; rerun with an explicit override")]
    DriftFatal { count: usize },
    #[error(transparent)]
    Io(#[from] WriteError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to parse config: {0}")]
    Parse(String),
    #[error("unable to encode config: {0}")]
    Encode(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unexpected response from {surface}: {message}")]
    Response { surface: String, message: String },
}

pub type WriteResult<T> = Result<T, WriteError>;
