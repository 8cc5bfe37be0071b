use std::path::PathBuf;
use std::process;
use std::thread;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use monoctl::cancel::CancelToken;
use monoctl::config::{self, ToolConfig};
use monoctl::doctor::{self, Expectation, RepairOptions};
use monoctl::errors::DoctorError;
use monoctl::fetch::{ArtifactFetcher, HttpFetcher};
use monoctl::join::Orchestrator;
use monoctl::network::{self, Network};
use monoctl::patch::{CanonicalKey, PatchValue, SyncStrategy};
use monoctl::peers;
use monoctl::probe;
use monoctl::report::{ExitCode, Step, render_checklist};
use monoctl::service::{self, ServiceKind, ServiceSpec};

#[derive(Parser)]
#[command(author, version, about = "Join, patch, and audit mono node homes")]
struct Cli {
    /// Path to monoctl.toml (defaults to $MONOCTL_CONFIG, then ./monoctl.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Target {
    /// Network to operate on; overrides the config file
    #[arg(short, long, value_enum)]
    network: Option<Network>,

    /// Node home directory; overrides the config file
    #[arg(long)]
    home: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the supported networks and their identities
    Networks {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Fetch genesis and peers for a network and write them into the node home
    Join {
        #[command(flatten)]
        target: Target,
        /// default or bootstrap
        #[arg(long)]
        sync_strategy: Option<SyncStrategy>,
        /// Trusted genesis SHA-256; takes precedence over the peer document
        #[arg(long)]
        expected_sha256: Option<String>,
        #[arg(long)]
        genesis_url: Option<String>,
        #[arg(long)]
        peers_url: Option<String>,
        /// Address advertised to peers (host:port)
        #[arg(long)]
        external_address: Option<String>,
        /// Remove the address book even when the strategy does not require it
        #[arg(long, default_value_t = false)]
        clear_addrbook: bool,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Compare the node home with the canonical values of its network
    Doctor {
        #[command(flatten)]
        target: Target,
        /// Rebuild expected peer lists from a freshly fetched peer document
        #[arg(long, default_value_t = false)]
        refresh_peers: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Rewrite drifted keys with their canonical values
    Repair {
        #[command(flatten)]
        target: Target,
        /// Repair even when fatal drift is present
        #[arg(long, default_value_t = false)]
        force: bool,
        #[arg(long, default_value_t = false)]
        refresh_peers: bool,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the systemd unit for the node or its Rosetta indexer
    Unit {
        #[arg(value_enum)]
        kind: ServiceKind,
        #[command(flatten)]
        target: Target,
    },
    /// Query the node's RPC surfaces and check that they serve the selected network
    Probe {
        #[arg(short, long, value_enum)]
        network: Option<Network>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Write a default monoctl.toml
    InitConfig {
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match run(cli) {
        Ok(code) => process::exit(code.code()),
        Err(err) => {
            eprintln!("error: {err:#}");
            process::exit(ExitCode::Failed.code());
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = config::resolve_path(cli.config.as_deref());

    if let Commands::InitConfig { force } = cli.command {
        return init_config(config_path, force);
    }

    let mut config = ToolConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    match cli.command {
        Commands::Networks { json } => list_networks(json),
        Commands::Join {
            target,
            sync_strategy,
            expected_sha256,
            genesis_url,
            peers_url,
            external_address,
            clear_addrbook,
            dry_run,
            json,
        } => {
            apply_target(&mut config, &target)?;
            if let Some(strategy) = sync_strategy {
                config.sync_strategy = strategy;
            }
            if external_address.is_some() {
                config.external_address = external_address;
            }
            if genesis_url.is_some() {
                config.fetch.genesis_url = genesis_url;
            }
            if peers_url.is_some() {
                config.fetch.peers_url = peers_url;
            }

            let mut options = config.join_options()?;
            options.expected_sha256 = expected_sha256;
            options.clear_addrbook = clear_addrbook;
            options.dry_run = dry_run;

            let cancel = CancelToken::new();
            install_interrupt_handler(cancel.clone());
            let fetcher = HttpFetcher::new(config.fetch.timeout())?;
            let report = Orchestrator::new(&fetcher).with_cancel(cancel).run(&options);

            let title = format!("join {} at {}", report.network, report.home.display());
            emit(json, &report, &title, &report.steps)?;
            if let Some(err) = &report.error {
                eprintln!("error: {err}");
            }
            Ok(report.exit_code())
        }
        Commands::Doctor {
            target,
            refresh_peers,
            json,
        } => {
            apply_target(&mut config, &target)?;
            let expectation = expectation(&config, refresh_peers)?;
            let report = doctor::diagnose_against(&config.home, &expectation)?;
            let title = format!("doctor {} at {}", report.network, report.home.display());
            emit(json, &report, &title, &report.steps())?;
            Ok(report.exit_code())
        }
        Commands::Repair {
            target,
            force,
            refresh_peers,
            dry_run,
            json,
        } => {
            apply_target(&mut config, &target)?;
            let expectation = expectation(&config, refresh_peers)?;
            match doctor::repair(&config.home, &expectation, RepairOptions { force, dry_run }) {
                Ok(report) => {
                    let title = format!(
                        "repair {} at {}{}",
                        report.before.network,
                        report.before.home.display(),
                        if dry_run { " (dry run)" } else { "" }
                    );
                    emit(json, &report, &title, &report.steps())?;
                    Ok(ExitCode::Success)
                }
                Err(err @ DoctorError::DriftFatal { .. }) => {
                    let report = doctor::diagnose_against(&config.home, &expectation)?;
                    let title = format!("repair refused for {}", report.home.display());
                    emit(json, &report, &title, &report.steps())?;
                    eprintln!("error: {err}");
                    Ok(ExitCode::Fatal)
                }
                Err(err) => Err(err.into()),
            }
        }
        Commands::Unit { kind, target } => {
            apply_target(&mut config, &target)?;
            let spec = ServiceSpec::from_config(kind, &config)?;
            print!("{}", service::render_unit(kind, &spec)?);
            Ok(ExitCode::Success)
        }
        Commands::Probe { network, json } => {
            if let Some(network) = network {
                config.network = network.slug().to_string();
            }
            config.validate()?;
            let fetcher = HttpFetcher::new(config.probe.timeout())?;
            let report = probe::run_probes(&fetcher, config.network()?, &config.probe);
            let title = format!("probe {}", report.network);
            emit(json, &report, &title, &report.steps)?;
            Ok(report.exit_code())
        }
        Commands::InitConfig { .. } => Err(anyhow!("init-config is handled before loading")),
    }
}

fn apply_target(config: &mut ToolConfig, target: &Target) -> Result<()> {
    if let Some(network) = target.network {
        config.network = network.slug().to_string();
    }
    if let Some(home) = &target.home {
        config.home = home.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(())
}

/// Expected values from the sidecar, optionally with peers from a fresh peer document.
fn expectation(config: &ToolConfig, refresh_peers: bool) -> Result<Expectation> {
    let network = config.network()?;
    let recorded = Expectation::from_sidecar(network, &config.home)?;
    if !refresh_peers {
        return Ok(recorded);
    }

    let mut options = config.join_options()?;
    options.sync_strategy = recorded.patch.sync_strategy;
    if let Some(PatchValue::Str(address)) = recorded.patch.get(CanonicalKey::ExternalAddress) {
        options.external_address = Some(address.clone());
    }

    let url = options.peers_url();
    if url.is_empty() {
        warn!(target: "monoctl::doctor", network = %network, "no peer document URL; using recorded peers");
        return Ok(recorded);
    }
    let fetcher = HttpFetcher::new(config.fetch.timeout())?;
    let refreshed = fetcher
        .fetch(&url)
        .map_err(anyhow::Error::from)
        .and_then(|bytes| Ok(peers::parse(&bytes, network.cosmos_chain_id())?))
        .and_then(|registry| Ok(Expectation::refreshed(&options, &registry)?));
    match refreshed {
        Ok(expectation) => {
            info!(target: "monoctl::doctor", url = %url, "expected peers refreshed");
            Ok(expectation)
        }
        Err(err) => {
            warn!(target: "monoctl::doctor", url = %url, error = %err, "peer refresh failed; using recorded peers");
            Ok(recorded)
        }
    }
}

fn emit<T: Serialize>(json: bool, report: &T, title: &str, steps: &[Step]) -> Result<()> {
    if json {
        let encoded = serde_json::to_string_pretty(report).context("failed to encode report")?;
        println!("{encoded}");
    } else {
        println!("{title}");
        print!("{}", render_checklist(steps));
    }
    Ok(())
}

#[derive(Serialize)]
struct NetworkRow {
    network: Network,
    name: &'static str,
    cosmos_chain_id: &'static str,
    evm_chain_id: u64,
    evm_chain_id_hex: String,
}

fn list_networks(json: bool) -> Result<ExitCode> {
    let rows: Vec<NetworkRow> = network::list()
        .into_iter()
        .map(|network| NetworkRow {
            network,
            name: network.name(),
            cosmos_chain_id: network.cosmos_chain_id(),
            evm_chain_id: network.evm_chain_id(),
            evm_chain_id_hex: network.evm_chain_id_hex(),
        })
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("{:<10} {:<14} {:>12} {:>10}", "NETWORK", "CHAIN ID", "EVM CHAIN ID", "HEX");
        for row in &rows {
            println!(
                "{:<10} {:<14} {:>12} {:>10}",
                row.network, row.cosmos_chain_id, row.evm_chain_id, row.evm_chain_id_hex
            );
        }
    }
    Ok(ExitCode::Success)
}

fn init_config(path: PathBuf, force: bool) -> Result<ExitCode> {
    if path.exists() && !force {
        return Err(anyhow!(
            "{} already exists; pass --force to overwrite",
            path.display()
        ));
    }
    ToolConfig::default().save(&path)?;
    info!(?path, "wrote default configuration");
    Ok(ExitCode::Success)
}

/// Flip `cancel` on Ctrl-C. The running step completes; later steps are skipped.
fn install_interrupt_handler(cancel: CancelToken) {
    let spawned = thread::Builder::new()
        .name("monoctl-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!(error = %err, "failed to build signal runtime; Ctrl-C will abort immediately");
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; finishing the current step");
                    cancel.cancel();
                }
            });
        });
    if let Err(err) = spawned {
        warn!(error = %err, "failed to spawn signal thread");
    }
}
