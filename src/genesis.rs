//! Genesis identity checks.
//!
//! The digest a genesis is compared against always comes from outside the
//! document itself: an operator supplied value or the peer document.

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::errors::GenesisError;

#[derive(Debug, Deserialize)]
struct GenesisEnvelope {
    chain_id: Option<serde_json::Value>,
}

/// Parse the outer JSON and return the declared chain id.
pub fn validate(bytes: &[u8]) -> Result<String, GenesisError> {
    let envelope: GenesisEnvelope = serde_json::from_slice(bytes)
        .map_err(|err| GenesisError::Invalid(format!("genesis is not a JSON object: {err}")))?;
    match envelope.chain_id {
        Some(serde_json::Value::String(chain_id)) if !chain_id.trim().is_empty() => Ok(chain_id),
        Some(serde_json::Value::String(_)) => {
            Err(GenesisError::Invalid("genesis chain_id is empty".to_string()))
        }
        Some(other) => Err(GenesisError::Invalid(format!(
            "genesis chain_id must be a string, found {other}"
        ))),
        None => Err(GenesisError::Invalid(
            "genesis does not declare a chain_id".to_string(),
        )),
    }
}

/// Lowercase hex SHA-256 of the raw bytes.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compare against a trusted digest, ignoring hex case.
pub fn matches_digest(bytes: &[u8], expected: &str) -> Result<(), String> {
    let actual = digest(bytes);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(actual)
    }
}
