//! CLI commands for the safe orchestrator
//!
//! Implements the setup flow end to end plus the individual steps as
//! standalone commands.

use crate::chain::HttpChainClient;
use crate::crypto::{generate_local_owners, OwnerKeyPair};
use crate::custody::{ResolvedOwner, ServerKeyResolver};
use crate::safe::{
    ComposerError, DeployError, DeploymentOrchestrator, FundingCoordinator, FundingOutcome,
    OwnerSet, SafeSession, TransactionComposer, THRESHOLD,
};
use crate::storage::{ConfigStore, SecretExporter};
use ethers_core::types::{Address, Bytes, U256};
use ethers_core::utils::to_checksum;
use std::path::PathBuf;
use std::sync::Arc;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Run the full 2-of-3 setup flow: keys, server owner, prediction,
/// deployment, secret export, config patch, auto-funding.
pub async fn cmd_setup(
    rpc_url: &str,
    chain_id: u64,
    server_url: &str,
    out_dir: PathBuf,
    config_path: PathBuf,
) -> CliResult<()> {
    println!("🔑 Generating two local owner keypairs...");
    let (owner1, owner2) = generate_local_owners()?;
    println!("   Owner 1: {}", owner1.address_checksummed());
    println!("   Owner 2: {}", owner2.address_checksummed());
    println!("   ⚠️  Save the Owner 1 private key securely!");

    println!("🌐 Resolving custody server owner from {server_url}...");
    let resolver = ServerKeyResolver::new(server_url);
    let server_owner = resolver.resolve_server_owner().await;
    println!("   Owner 3: {}", to_checksum(&server_owner.address, None));

    let owners = OwnerSet::new(owner1.address(), owner2.address(), server_owner.address)?;
    let mut session = SafeSession::predict(owners, &server_owner, chain_id);
    if !session.server_key_live() {
        println!("   ⚠️  Custody server unreachable; using the documented fallback address.");
        println!("      The server does NOT hold this key; treat the account as degraded.");
    }
    println!(
        "📍 Predicted account address: {}",
        to_checksum(&session.predicted_address, None)
    );

    let chain = Arc::new(HttpChainClient::new(rpc_url, chain_id)?);
    let orchestrator = DeploymentOrchestrator::new(chain.clone());

    println!("🚀 Deploying 2-of-{} account...", session.owners.as_array().len());
    match orchestrator.deploy(&mut session, &owner1).await {
        Ok(()) => {
            println!(
                "✅ Account deployed at {}",
                to_checksum(&session.predicted_address, None)
            );
        }
        Err(DeployError::InsufficientFunds {
            shortfall,
            funding_address,
            ..
        }) => {
            println!("❌ Deployment needs more funds.");
            println!("   Send at least {shortfall} wei to {}", to_checksum(&funding_address, None));
            println!("   (testnet faucets work for test chains), then run setup again.");
            return Ok(());
        }
        Err(DeployError::DeploymentPending { tx_hash }) => {
            println!("⏳ Deployment broadcast as {tx_hash:#x} but not yet confirmed.");
            println!("   It may still land; re-run setup to re-poll.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    let exporter = SecretExporter::in_dir(&out_dir);
    match exporter.export(&owner1, session.predicted_address) {
        Ok(()) => println!("💾 Owner 1 key exported to {}", exporter.path().display()),
        Err(e) => log::warn!("secret export failed: {e}"),
    }

    let config = ConfigStore::new(&config_path);
    if let Err(e) = config.set_deployed_address(session.predicted_address) {
        log::warn!("config update failed (continuing): {e}");
    }

    println!("💸 Auto-funding the account in the background...");
    let funding = FundingCoordinator::new(chain).spawn_auto_fund(&session, owner1);
    match funding.await {
        Ok(FundingOutcome::Confirmed { amount, tx_hash }) => {
            println!("✅ Funded with {amount} wei (tx {tx_hash:#x})");
        }
        Ok(FundingOutcome::Skipped { .. }) => {
            println!("ℹ️  Funding skipped: nothing safely spendable above the reserves.");
        }
        Ok(FundingOutcome::Failed { reason }) => {
            println!("⚠️  Funding failed ({reason}); the account is still usable.");
        }
        Err(e) => log::warn!("funding task panicked: {e}"),
    }

    Ok(())
}

/// Predict the account address for an explicit owner set
pub fn cmd_predict(owners: &[String], chain_id: u64) -> CliResult<()> {
    if owners.len() != 3 {
        return Err(format!("expected exactly 3 owners, got {}", owners.len()).into());
    }
    let parsed: Vec<Address> = owners
        .iter()
        .map(|s| s.parse::<Address>().map_err(|_| format!("invalid address {s}")))
        .collect::<Result<_, _>>()?;

    let owner_set = OwnerSet::new(parsed[0], parsed[1], parsed[2])?;
    let address = crate::safe::predict_address(&owner_set, THRESHOLD, chain_id);
    println!("{}", to_checksum(&address, None));
    Ok(())
}

/// Resolve and print the custody server's owner address
pub async fn cmd_server_key(server_url: &str) -> CliResult<()> {
    let resolver = ServerKeyResolver::new(server_url);
    let resolved = resolver.resolve_server_owner().await;
    println!(
        "{} ({})",
        to_checksum(&resolved.address, None),
        if resolved.is_live() { "live" } else { "fallback" }
    );
    Ok(())
}

/// Compose a spend, sign with both local keys, and execute it
#[allow(clippy::too_many_arguments)]
pub async fn cmd_send(
    rpc_url: &str,
    chain_id: u64,
    account: Address,
    server_owner: Address,
    key1: &str,
    key2: &str,
    to: Address,
    value_wei: U256,
    safe_nonce: u64,
) -> CliResult<()> {
    let owner1 = OwnerKeyPair::from_private_key_hex(key1)?;
    let owner2 = OwnerKeyPair::from_private_key_hex(key2)?;
    let owners = OwnerSet::new(owner1.address(), owner2.address(), server_owner)?;
    let resolved = ResolvedOwner::from_known_address(server_owner);

    let session = SafeSession {
        chain_id,
        owners,
        threshold: THRESHOLD,
        predicted_address: account,
        status: crate::safe::AccountStatus::Deployed,
        deployment: None,
        server_key_provenance: resolved.provenance,
    };
    if !session.server_key_live() {
        println!("⚠️  Remote owner is the documented fallback address; the custody server cannot co-sign.");
    }

    let chain = Arc::new(HttpChainClient::new(rpc_url, chain_id)?);
    let composer = TransactionComposer::new(chain, &session);

    let mut tx = composer.compose(to, value_wei, Bytes::default(), safe_nonce);
    composer.sign(&mut tx, &owner1)?;
    composer.sign(&mut tx, &owner2)?;
    println!(
        "✍️  Collected {}/{} signatures, executing...",
        tx.signature_count(),
        tx.required_signatures
    );

    let tx_hash = match composer.execute(&mut tx, &owner1).await {
        Ok(tx_hash) => tx_hash,
        Err(ComposerError::ConfirmationTimeout { tx_hash }) => {
            println!("⏳ Spend broadcast as {tx_hash:#x} but not yet confirmed.");
            println!("   It may still land; check the transaction before retrying.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    println!("✅ Spend confirmed: {tx_hash:#x}");
    Ok(())
}
