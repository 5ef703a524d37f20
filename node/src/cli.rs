//! # CLI Interface
//!
//! Command-line structure for `tessera-node`, built with `clap` derive.
//! Four subcommands: `run`, `init`, `status` and `version`. Every flag can
//! also come from a `TESSERA_*` environment variable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tessera_protocol::config::{
    DEFAULT_MANAGEMENT_FEE_BPS, DEFAULT_METRICS_PORT, DEFAULT_MIN_DEPOSIT,
    DEFAULT_PERFORMANCE_FEE_BPS, DEFAULT_RPC_PORT,
};

/// Tessera vault node.
///
/// Hosts one vault, serves its REST and JSON-RPC API, relays signed agent
/// batches, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "tessera-node",
    about = "Tessera multi-asset vault node",
    version,
    propagate_version = true
)]
pub struct TesseraNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Create a data directory with a vault configuration and fresh owner
    /// and agent keys.
    Init(InitArgs),
    /// Query the status endpoint of a running node.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Data directory written by `init`.
    #[arg(long, short = 'd', env = "TESSERA_DATA_DIR", default_value = ".tessera")]
    pub data_dir: PathBuf,

    /// Port for the REST and JSON-RPC API.
    #[arg(long, env = "TESSERA_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "TESSERA_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "TESSERA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Default filter when `RUST_LOG` is unset.
    #[arg(
        long,
        env = "TESSERA_LOG_LEVEL",
        default_value = "tessera_node=info,tessera_protocol=info,tower_http=debug"
    )]
    pub log_level: String,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory to initialize.
    #[arg(long, short = 'd', env = "TESSERA_DATA_DIR", default_value = ".tessera")]
    pub data_dir: PathBuf,

    /// Vault display name. Also seeds the vault's address.
    #[arg(long, env = "TESSERA_VAULT_NAME", default_value = "tessera")]
    pub name: String,

    /// Smallest accepted deposit, in smallest units.
    #[arg(long, env = "TESSERA_MIN_DEPOSIT", default_value_t = DEFAULT_MIN_DEPOSIT)]
    pub min_deposit: u128,

    /// Annual management fee in basis points.
    #[arg(long, env = "TESSERA_MANAGEMENT_FEE_BPS", default_value_t = DEFAULT_MANAGEMENT_FEE_BPS)]
    pub management_fee_bps: u32,

    /// Performance fee in basis points.
    #[arg(long, env = "TESSERA_PERFORMANCE_FEE_BPS", default_value_t = DEFAULT_PERFORMANCE_FEE_BPS)]
    pub performance_fee_bps: u32,

    /// Overwrite an existing configuration.
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// API endpoint of the running node.
    #[arg(long, env = "TESSERA_RPC_URL", default_value = "http://127.0.0.1:9841")]
    pub rpc_url: String,
}
