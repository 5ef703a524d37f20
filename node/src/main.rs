// Copyright (c) 2026 Tessera Contributors. MIT License.
// See LICENSE for details.

//! # Tessera Vault Node
//!
//! Entry point for the `tessera-node` binary. Parses CLI arguments,
//! initializes logging and metrics, restores the vault from disk, and serves
//! the HTTP API.
//!
//! The binary supports four subcommands:
//!
//! - `run`     — load the vault and serve the API and metrics
//! - `init`    — write a vault configuration and generate owner/agent keys
//! - `status`  — query a running node's status endpoint
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

use tessera_protocol::config::{VaultConfig, PROTOCOL_VERSION};
use tessera_protocol::crypto::AgentKeypair;
use tessera_protocol::storage::VaultStore;
use tessera_protocol::vault::{Address, InMemoryHost, Vault};

use cli::{Commands, TesseraNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

const CONFIG_FILE: &str = "config.json";
const OWNER_KEY_FILE: &str = "owner.key";
const AGENT_KEY_FILE: &str = "agent.key";
const DB_DIR: &str = "db";

/// Contents of `config.json` in the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct NodeConfig {
    vault: VaultConfig,
    vault_address: Address,
    owner: Address,
    primary_agent: Address,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TesseraNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Restores the vault and serves the API and metrics endpoints until a
/// shutdown signal arrives.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, LogFormat::from_str_lossy(&args.log_format));

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting tessera-node"
    );

    let config = load_node_config(&args.data_dir)?;

    // --- Persistent storage ---
    let db_path = args.data_dir.join(DB_DIR);
    let store = VaultStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Vault ---
    let vault = match store.load::<InMemoryHost>().context("failed to load vault")? {
        Some(vault) => {
            tracing::info!(
                vault = %vault.address(),
                events = vault.state().events.last_sequence(),
                "vault restored"
            );
            vault
        }
        None => {
            let vault = Vault::new(
                config.vault_address,
                config.vault.clone(),
                config.owner,
                config.primary_agent,
                InMemoryHost::new(),
                Utc::now(),
            )
            .context("failed to create vault")?;
            store.save(&vault).context("failed to persist new vault")?;
            vault
        }
    };
    if vault.address() != config.vault_address {
        bail!(
            "database holds vault {} but {} names {}",
            vault.address(),
            CONFIG_FILE,
            config.vault_address
        );
    }

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    node_metrics.observe_vault(&vault);

    // --- Application state ---
    let app_state = api::AppState {
        version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
        vault: Arc::new(Mutex::new(vault)),
        store: store.clone(),
        relayer: relayer_address(&args.data_dir)?,
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("RPC/API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    store.flush().context("failed to flush database")?;
    tracing::info!("tessera-node stopped");
    Ok(())
}

/// Writes `config.json` and fresh owner and agent keys into the data
/// directory.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("tessera_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    let config_path = data_dir.join(CONFIG_FILE);
    if config_path.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to overwrite",
            config_path.display()
        );
    }
    tracing::info!(data_dir = %data_dir.display(), name = %args.name, "initializing node");

    let vault = VaultConfig {
        name: args.name.clone(),
        min_deposit: args.min_deposit,
        management_fee_bps: args.management_fee_bps,
        performance_fee_bps: args.performance_fee_bps,
    };
    vault.validate().context("invalid vault configuration")?;

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let owner_key = AgentKeypair::generate();
    let agent_key = AgentKeypair::generate();
    write_key(&data_dir.join(OWNER_KEY_FILE), &owner_key)?;
    write_key(&data_dir.join(AGENT_KEY_FILE), &agent_key)?;

    let config = NodeConfig {
        vault_address: Address::derive(&format!("tessera vault {}", args.name)),
        vault,
        owner: Address::from_public_key(&owner_key.public_key()),
        primary_agent: Address::from_public_key(&agent_key.public_key()),
    };
    let json = serde_json::to_string_pretty(&config)?;
    std::fs::write(&config_path, json)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    tracing::info!(vault = %config.vault_address, "node initialized");

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Vault          : {} ({})", config.vault.name, config.vault_address);
    println!("  Owner          : {}", config.owner);
    println!("  Agent          : {}", config.primary_agent);
    println!("  Keys           : {}, {}", OWNER_KEY_FILE, AGENT_KEY_FILE);

    Ok(())
}

fn load_node_config(data_dir: &Path) -> Result<NodeConfig> {
    let path = data_dir.join(CONFIG_FILE);
    let raw = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "failed to read {}; run `tessera-node init` first",
            path.display()
        )
    })?;
    let config: NodeConfig = serde_json::from_str(&raw)
        .with_context(|| format!("malformed {}", path.display()))?;
    config.vault.validate().context("invalid vault configuration")?;
    Ok(config)
}

/// Hex-encodes a secret key to disk, owner-readable only on Unix.
fn write_key(path: &Path, keypair: &AgentKeypair) -> Result<()> {
    std::fs::write(path, keypair.to_hex())
        .with_context(|| format!("failed to write key to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// The relayer identity: the agent key's address when one is on disk.
fn relayer_address(data_dir: &Path) -> Result<Address> {
    let path = data_dir.join(AGENT_KEY_FILE);
    if !path.exists() {
        return Ok(Address::derive("tessera relayer"));
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let keypair = AgentKeypair::from_hex(raw.trim())
        .with_context(|| format!("malformed key in {}", path.display()))?;
    Ok(Address::from_public_key(&keypair.public_key()))
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.rpc_url.trim_end_matches('/'));
    let body = http_get(&url).await?;
    println!("{}", body);
    Ok(())
}

/// Plain HTTP/1.1 GET over a tokio TCP stream.
async fn http_get(url: &str) -> Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (host, port, path) = split_url(url)?;
    let addr = format!("{}:{}", host, port);
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host,
    );
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());
    Ok(body)
}

/// Splits `http://host:port/path` into its parts. Port defaults to 80.
fn split_url(url: &str) -> Result<(String, u16, String)> {
    if url.starts_with("https://") {
        bail!("https is not supported by the status client: {}", url);
    }
    let rest = url.strip_prefix("http://").unwrap_or(url);
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>()
                .with_context(|| format!("bad port in {}", url))?,
        ),
        None => (authority, 80),
    };
    if host.is_empty() {
        bail!("missing host in URL: {}", url);
    }
    Ok((host.to_string(), port, path.to_string()))
}

/// Prints version information to stdout.
fn print_version() {
    println!("tessera-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_args(dir: &Path, force: bool) -> cli::InitArgs {
        cli::InitArgs {
            data_dir: dir.to_path_buf(),
            name: "test fund".into(),
            min_deposit: 500,
            management_fee_bps: 100,
            performance_fee_bps: 1_000,
            force,
        }
    }

    #[test]
    fn init_writes_config_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        init_node(init_args(dir.path(), false)).unwrap();

        let config = load_node_config(dir.path()).unwrap();
        assert_eq!(config.vault.name, "test fund");
        assert_eq!(config.vault.min_deposit, 500);
        assert_eq!(
            config.vault_address,
            Address::derive("tessera vault test fund")
        );
        assert_eq!(relayer_address(dir.path()).unwrap(), config.primary_agent);
        assert_ne!(config.owner, config.primary_agent);
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        init_node(init_args(dir.path(), false)).unwrap();
        let first = load_node_config(dir.path()).unwrap();

        assert!(init_node(init_args(dir.path(), false)).is_err());
        init_node(init_args(dir.path(), true)).unwrap();
        let second = load_node_config(dir.path()).unwrap();
        assert_ne!(first.primary_agent, second.primary_agent);
    }

    #[test]
    fn init_rejects_fee_over_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = init_args(dir.path(), false);
        args.management_fee_bps = 5_000;
        assert!(init_node(args).is_err());
        assert!(!dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn split_url_extracts_parts() {
        assert_eq!(
            split_url("http://127.0.0.1:9841/status").unwrap(),
            ("127.0.0.1".to_string(), 9841, "/status".to_string())
        );
        assert_eq!(
            split_url("localhost").unwrap(),
            ("localhost".to_string(), 80, "/".to_string())
        );
        assert!(split_url("http://host:notaport/").is_err());
        assert!(split_url("https://host/").is_err());
    }
}
