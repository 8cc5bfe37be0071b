//! systemd units for the node binary and its Rosetta sidecar.
//!
//! Rendering only: nothing here installs, enables or starts a unit.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Serialize;

use crate::config::ToolConfig;
use crate::errors::ConfigError;
use crate::network::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Node,
    #[value(alias = "rosetta")]
    Indexer,
}

impl ServiceKind {
    pub fn unit_name(self) -> &'static str {
        match self {
            ServiceKind::Node => "monod.service",
            ServiceKind::Indexer => "mono-rosetta.service",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub network: Network,
    pub binary: PathBuf,
    pub home: PathBuf,
    pub user: String,
}

impl ServiceSpec {
    pub fn from_config(kind: ServiceKind, config: &ToolConfig) -> Result<Self, ConfigError> {
        let binary = match kind {
            ServiceKind::Node => config.service.node_binary.clone(),
            ServiceKind::Indexer => config.service.indexer_binary.clone(),
        };
        Ok(Self {
            network: config.network()?,
            binary,
            home: config.home.clone(),
            user: config.service.user.clone(),
        })
    }
}

pub fn render_unit(kind: ServiceKind, spec: &ServiceSpec) -> Result<String, ConfigError> {
    for (label, path) in [("binary", &spec.binary), ("home", &spec.home)] {
        if !path.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "service {label} {path:?} must be an absolute path"
            )));
        }
    }
    if spec.user.trim().is_empty() || spec.user.chars().any(char::is_whitespace) {
        return Err(ConfigError::Invalid(format!(
            "service user `{}` is not a valid account name",
            spec.user
        )));
    }

    let (description, after, exec) = match kind {
        ServiceKind::Node => (
            format!("Mono node ({})", spec.network.slug()),
            "network-online.target".to_string(),
            format!("{} start --home {}", quote(&spec.binary), quote(&spec.home)),
        ),
        ServiceKind::Indexer => (
            format!("Mono Rosetta indexer ({})", spec.network.slug()),
            format!("network-online.target {}", ServiceKind::Node.unit_name()),
            format!(
                "{} --home {} --network {}",
                quote(&spec.binary),
                quote(&spec.home),
                spec.network.cosmos_chain_id()
            ),
        ),
    };

    let mut unit = String::new();
    unit.push_str("[Unit]\n");
    unit.push_str(&format!("Description={description}\n"));
    unit.push_str(&format!("After={after}\n"));
    unit.push_str("Wants=network-online.target\n");
    if kind == ServiceKind::Indexer {
        unit.push_str(&format!("BindsTo={}\n", ServiceKind::Node.unit_name()));
    }
    unit.push_str("\n[Service]\n");
    unit.push_str(&format!("User={}\n", spec.user));
    unit.push_str(&format!("ExecStart={exec}\n"));
    unit.push_str("Restart=on-failure\n");
    unit.push_str("RestartSec=5\n");
    unit.push_str("LimitNOFILE=65535\n");
    unit.push_str("\n[Install]\n");
    unit.push_str("WantedBy=multi-user.target\n");
    Ok(unit)
}

fn quote(path: &Path) -> String {
    let text = path.display().to_string();
    if text.chars().any(char::is_whitespace) {
        format!("\"{text}\"")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn spec() -> ServiceSpec {
        ServiceSpec {
            network: Network::Testnet,
            binary: PathBuf::from("/usr/local/bin/monod"),
            home: PathBuf::from("/var/lib/monod"),
            user: "mono".into(),
        }
    }

    #[test]
    fn node_unit_starts_the_binary_against_the_home() {
        let unit = render_unit(ServiceKind::Node, &spec()).unwrap();
        assert!(unit.contains("Description=Mono node (testnet)\n"));
        assert!(unit.contains("ExecStart=/usr/local/bin/monod start --home /var/lib/monod\n"));
        assert!(unit.contains("User=mono\n"));
        assert!(unit.ends_with("WantedBy=multi-user.target\n"));
        assert!(!unit.contains("BindsTo"));
    }

    #[test]
    fn indexer_unit_follows_the_node() {
        let mut spec = spec();
        spec.binary = PathBuf::from("/opt/mono tools/mono-rosetta");
        let unit = render_unit(ServiceKind::Indexer, &spec).unwrap();
        assert!(unit.contains("After=network-online.target monod.service\n"));
        assert!(unit.contains("BindsTo=monod.service\n"));
        assert!(unit.contains(
            "ExecStart=\"/opt/mono tools/mono-rosetta\" --home /var/lib/monod --network mono-test-1\n"
        ));
    }

    #[test]
    fn relative_paths_and_bad_users_are_rejected() {
        let mut relative = spec();
        relative.home = PathBuf::from("node-home");
        assert_matches!(render_unit(ServiceKind::Node, &relative), Err(ConfigError::Invalid(_)));

        let mut user = spec();
        user.user = "mono admin".into();
        assert_matches!(render_unit(ServiceKind::Node, &user), Err(ConfigError::Invalid(_)));
    }

    #[test]
    fn spec_from_config_picks_binary_by_kind() {
        let config = ToolConfig::default();
        let node = ServiceSpec::from_config(ServiceKind::Node, &config).unwrap();
        let indexer = ServiceSpec::from_config(ServiceKind::Indexer, &config).unwrap();
        assert_eq!(node.binary, PathBuf::from("/usr/local/bin/monod"));
        assert_eq!(indexer.binary, PathBuf::from("/usr/local/bin/mono-rosetta"));
        assert_eq!(node.network, Network::Sprintnet);
    }
}
