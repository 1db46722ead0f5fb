//! Migrates the channels an external monitor queued up in the local store to a new
//! ledger contract, one transaction at a time.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use clap::Parser;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
};
use eyre::{Context, Result};
use migrator::{
    BatchOrchestrator, EthereumLedger, EthereumProvider, MigrationRocksDb, DB,
};
use tracing::info;

use crate::{args::Args, settings::Settings};

mod args;
mod settings;
mod trace;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    args.tracing().start_tracing()?;

    let settings = Settings::try_from_args(&args)?;
    run(settings).await
}

async fn run(settings: Settings) -> Result<()> {
    let profile = &settings.profile;
    // keystore problems are reported before any request reaches the node
    let wallet = LocalWallet::decrypt_keystore(&settings.keystore, &settings.password)
        .wrap_err_with(|| format!("Failed to decrypt keystore {}", settings.keystore.display()))?;
    let provider = Provider::<Http>::try_from(profile.eth_instance.as_str())
        .wrap_err_with(|| format!("Invalid chain endpoint {}", profile.eth_instance))?
        .interval(profile.polling_interval());
    let chain_id = match profile.chain_id {
        Some(chain_id) => chain_id,
        None => provider
            .get_chainid()
            .await
            .wrap_err("Failed to query the chain id")?
            .as_u64(),
    };
    let wallet = wallet.with_chain_id(chain_id);
    info!(sender = ?wallet.address(), chain_id, ledger = ?profile.ledger_addr, "Loaded signer");

    let db = DB::from_path(&settings.store_dir)?;
    let store = Arc::new(MigrationRocksDb::new(db));
    let reader = Arc::new(EthereumProvider::new(Arc::new(provider.clone())));
    let signer = Arc::new(SignerMiddleware::new(provider, wallet));
    let ledger = Arc::new(EthereumLedger::new(
        profile.ledger_addr,
        signer,
        settings.confirmations,
        profile.polling_interval(),
    ));

    let orchestrator =
        BatchOrchestrator::new(settings.batch.clone(), store, reader.clone(), reader, ledger);
    orchestrator.run().await?;
    Ok(())
}
