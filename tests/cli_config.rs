use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result};
use serde_json::Value;
use tempfile::TempDir;

mod support;

use monoctl::config::ToolConfig;
use monoctl::network::Network;
use monoctl::patch::ConfigFile;

use support::{genesis, peer_document, read_config, sha256_hex};

fn monoctl(config: &Path, args: &[&str]) -> Result<Output> {
    Command::new(env!("CARGO_BIN_EXE_monoctl"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "warn")
        .env_remove("MONOCTL_CONFIG")
        .output()
        .context("failed to run monoctl")
}

/// Genesis and peer document for `network` on disk, addressed with `file://` URLs.
fn write_artifacts(dir: &Path, network: Network, chain_id: &str) -> Result<(String, String)> {
    let bytes = genesis(chain_id);
    let genesis_path = dir.join("genesis.json");
    fs::write(&genesis_path, &bytes)?;
    let peers_path = dir.join("peers.json");
    let document = peer_document(network.cosmos_chain_id(), Some(&sha256_hex(&bytes)));
    fs::write(&peers_path, document.to_string())?;
    Ok((
        format!("file://{}", genesis_path.display()),
        format!("file://{}", peers_path.display()),
    ))
}

#[test]
fn networks_lists_the_closed_table() -> Result<()> {
    let temp = TempDir::new()?;
    let output = monoctl(&temp.path().join("monoctl.toml"), &["networks", "--json"])?;
    assert_eq!(output.status.code(), Some(0));

    let rows: Value = serde_json::from_slice(&output.stdout)?;
    let rows = rows.as_array().context("expected an array")?;
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["network"], "localnet");
    assert_eq!(rows[3]["cosmos_chain_id"], "mono-1");
    assert_eq!(rows[3]["evm_chain_id_hex"], "0x40004");
    Ok(())
}

#[test]
fn join_doctor_repair_round_trip() -> Result<()> {
    let temp = TempDir::new()?;
    let config = temp.path().join("monoctl.toml");
    let home = temp.path().join("home");
    let home_arg = home.display().to_string();
    let (genesis_url, peers_url) = write_artifacts(temp.path(), Network::Testnet, "mono-test-1")?;

    let joined = monoctl(
        &config,
        &[
            "join",
            "--network",
            "testnet",
            "--home",
            &home_arg,
            "--genesis-url",
            &genesis_url,
            "--peers-url",
            &peers_url,
            "--json",
        ],
    )?;
    assert_eq!(joined.status.code(), Some(0), "{}", String::from_utf8_lossy(&joined.stderr));
    let report: Value = serde_json::from_slice(&joined.stdout)?;
    assert_eq!(report["network"], "testnet");
    assert_eq!(report["error"], Value::Null);
    assert!(read_config(&home, ConfigFile::App).contains("evm_chain_id = 262147\n"));

    let doctor = monoctl(&config, &["doctor", "--network", "testnet", "--home", &home_arg])?;
    assert_eq!(doctor.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&doctor.stdout).contains("evm_chain_id: OK"));

    let app = support::config_file(&home, ConfigFile::App);
    let contents = fs::read_to_string(&app)?;
    fs::write(&app, contents.replace("evm_chain_id = 262147", "evm_chain_id = 262145"))?;

    let doctor = monoctl(&config, &["doctor", "--network", "testnet", "--home", &home_arg])?;
    assert_eq!(doctor.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&doctor.stdout).contains("Localnet leak"));

    let refused = monoctl(&config, &["repair", "--network", "testnet", "--home", &home_arg])?;
    assert_eq!(refused.status.code(), Some(2));
    assert!(read_config(&home, ConfigFile::App).contains("evm_chain_id = 262145\n"));

    let forced = monoctl(
        &config,
        &["repair", "--network", "testnet", "--home", &home_arg, "--force"],
    )?;
    assert_eq!(forced.status.code(), Some(0));
    assert!(read_config(&home, ConfigFile::App).contains("evm_chain_id = 262147\n"));
    Ok(())
}

#[test]
fn wrong_genesis_exits_fatal() -> Result<()> {
    let temp = TempDir::new()?;
    let config = temp.path().join("monoctl.toml");
    let home = temp.path().join("home");
    let (genesis_url, peers_url) = write_artifacts(temp.path(), Network::Mainnet, "mono-local-1")?;

    let output = monoctl(
        &config,
        &[
            "join",
            "--network",
            "mainnet",
            "--home",
            &home.display().to_string(),
            "--genesis-url",
            &genesis_url,
            "--peers-url",
            &peers_url,
        ],
    )?;
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[FAILED]   validate_genesis"), "{stdout}");
    assert!(!home.exists());
    Ok(())
}

#[test]
fn statesync_is_rejected_at_the_command_line() -> Result<()> {
    let temp = TempDir::new()?;
    let output = monoctl(
        &temp.path().join("monoctl.toml"),
        &["join", "--home", "/tmp/unused", "--sync-strategy", "statesync"],
    )?;
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("reserved"));
    Ok(())
}

#[test]
fn config_file_drives_defaults() -> Result<()> {
    let temp = TempDir::new()?;
    let config_path = temp.path().join("monoctl.toml");
    let home = temp.path().join("node");
    fs::write(
        &config_path,
        format!(
            "home = \"{}\"\nnetwork = \"mainnet\"\n\n[service]\nuser = \"validator\"\n",
            home.display()
        ),
    )?;

    let config = ToolConfig::load(&config_path)?;
    config.validate()?;
    assert_eq!(config.network()?, Network::Mainnet);

    let output = monoctl(&config_path, &["unit", "node"])?;
    assert_eq!(output.status.code(), Some(0));
    let unit = String::from_utf8(output.stdout)?;
    assert!(unit.contains("Description=Mono node (mainnet)"));
    assert!(unit.contains(&format!("--home {}", home.display())));
    assert!(unit.contains("User=validator"));
    Ok(())
}

#[test]
fn init_config_refuses_to_overwrite() -> Result<()> {
    let temp = TempDir::new()?;
    let config_path = temp.path().join("etc").join("monoctl.toml");

    let first = monoctl(&config_path, &["init-config"])?;
    assert_eq!(first.status.code(), Some(0));
    assert_eq!(ToolConfig::load(&config_path)?, ToolConfig::default());

    let second = monoctl(&config_path, &["init-config"])?;
    assert_eq!(second.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&second.stderr).contains("already exists"));

    let forced = monoctl(&config_path, &["init-config", "--force"])?;
    assert_eq!(forced.status.code(), Some(0));
    Ok(())
}
