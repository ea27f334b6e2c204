//! Safekit CLI
//!
//! Command-line front end for the 2-of-3 account orchestrator.

use clap::{Parser, Subcommand};
use ethers_core::types::{Address, U256};
use safekit::cli;
use std::path::PathBuf;

/// Sepolia, the chain the original desktop flow targets
const DEFAULT_CHAIN_ID: u64 = 11155111;

#[derive(Parser)]
#[command(name = "safekit")]
#[command(version = "0.1.0")]
#[command(about = "2-of-3 threshold Safe account orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full setup flow: generate keys, resolve the server owner,
    /// predict, deploy, export secrets, and auto-fund
    Setup {
        /// Chain RPC endpoint
        #[arg(long)]
        rpc_url: String,

        /// Chain id
        #[arg(long, default_value_t = DEFAULT_CHAIN_ID)]
        chain_id: u64,

        /// Custody server base URL
        #[arg(long, default_value = "http://localhost:3000")]
        server_url: String,

        /// Directory for the exported key file
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Config file to patch with the deployed address
        #[arg(long, default_value = "safekit-config.json")]
        config: PathBuf,
    },

    /// Predict the account address for three owner addresses
    Predict {
        /// Owner addresses in order: local1, local2, server
        #[arg(long, num_args = 3, value_delimiter = ',')]
        owners: Vec<String>,

        /// Chain id
        #[arg(long, default_value_t = DEFAULT_CHAIN_ID)]
        chain_id: u64,
    },

    /// Resolve the custody server's owner address
    ServerKey {
        /// Custody server base URL
        #[arg(long, default_value = "http://localhost:3000")]
        server_url: String,
    },

    /// Compose a spend, sign with both local keys, and execute it
    Send {
        /// Chain RPC endpoint
        #[arg(long)]
        rpc_url: String,

        /// Chain id
        #[arg(long, default_value_t = DEFAULT_CHAIN_ID)]
        chain_id: u64,

        /// Deployed account address
        #[arg(long)]
        account: Address,

        /// Server owner address (third owner)
        #[arg(long)]
        server_owner: Address,

        /// Owner 1 private key (hex)
        #[arg(long)]
        key1: String,

        /// Owner 2 private key (hex)
        #[arg(long)]
        key2: String,

        /// Recipient address
        #[arg(long)]
        to: Address,

        /// Amount in wei (decimal)
        #[arg(long)]
        value: String,

        /// Account-level nonce for the spend
        #[arg(long, default_value_t = 0)]
        safe_nonce: u64,
    },
}

#[tokio::main]
async fn main() -> cli::CliResult<()> {
    env_logger::init();
    let args = Cli::parse();

    match args.command {
        Commands::Setup {
            rpc_url,
            chain_id,
            server_url,
            out_dir,
            config,
        } => cli::cmd_setup(&rpc_url, chain_id, &server_url, out_dir, config).await,
        Commands::Predict { owners, chain_id } => cli::cmd_predict(&owners, chain_id),
        Commands::ServerKey { server_url } => cli::cmd_server_key(&server_url).await,
        Commands::Send {
            rpc_url,
            chain_id,
            account,
            server_owner,
            key1,
            key2,
            to,
            value,
            safe_nonce,
        } => {
            let value_wei = U256::from_dec_str(&value)?;
            cli::cmd_send(
                &rpc_url,
                chain_id,
                account,
                server_owner,
                &key1,
                &key2,
                to,
                value_wei,
                safe_nonce,
            )
            .await
        }
    }
}
