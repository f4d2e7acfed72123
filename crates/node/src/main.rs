//! emberchain node binary: opens the stores, applies genesis, and drives
//! the slot-driven block producer until the process is told to stop.

use anyhow::Context;
use clap::Parser;
use ember_chain::ChainStore;
use ember_core::{BlockProducer, GenesisConfig, SlotClock, TransferExecutor};
use ember_kv::{KeyValueStore, SledStore};
use ember_pool::TxPool;
use ember_primitives::{crypto, parse::parse_private_key};
use ember_state::{StateDb, StateManager};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ember-node", about = "educational account-based layer-1 node")]
struct Cli {
    /// Data directory holding the chaindata and state namespaces
    #[arg(short, long, default_value = "./data")]
    db: PathBuf,
    /// Path to the genesis file
    #[arg(short, long)]
    genesis: PathBuf,
    /// Proposer private key as hex; an ephemeral one is generated when absent
    #[arg(long)]
    proposer_key: Option<String>,
    /// Override the slot interval from the genesis file
    #[arg(long)]
    block_time_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let genesis = GenesisConfig::load(&cli.genesis).context("unreadable genesis file")?;
    let mut config = genesis.chain_config();
    if let Some(block_time_ms) = cli.block_time_ms {
        config.block_time_ms = block_time_ms;
    }

    let proposer_key = match &cli.proposer_key {
        Some(raw) => parse_private_key(raw).context("invalid proposer key")?,
        None => {
            let (key, addr) = crypto::generate_keypair();
            warn!(%addr, "no proposer key given, generated an ephemeral one");
            key
        }
    };
    let proposer = crypto::address_of(proposer_key.verifying_key());
    info!(chain_id = config.chain_id, %proposer, "starting node");

    let chain_store = SledStore::open(cli.db.join("chaindata")).context("open chaindata")?;
    let state_store = SledStore::open(cli.db.join("state")).context("open state")?;

    let chain = Arc::new(ChainStore::new(chain_store.clone()));
    let state = Arc::new(RwLock::new(StateManager::new(
        StateDb::open(state_store.clone()).context("open state repository")?,
    )));
    let pool = Arc::new(Mutex::new(TxPool::new()));

    let producer = Arc::new(BlockProducer::new(
        chain,
        state,
        pool,
        TransferExecutor,
        config.clone(),
        genesis,
        proposer,
    ));
    producer
        .recover_state()
        .context("reconcile state with the chain tip")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let ticks = SlotClock::spawn(config.block_time_ms, shutdown.clone());

    let mut producer_task = {
        let producer = producer.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { producer.run(ticks, shutdown).await })
    };

    tokio::select! {
        _ = wait_for_shutdown() => {
            info!("shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        }
        _ = &mut producer_task => {}
    }
    // block attempts are synchronous per poll, so aborting here can only
    // land between slots, never inside one
    producer_task.abort();
    producer_task.await.ok();

    chain_store.flush().context("flush chaindata")?;
    state_store.flush().context("flush state")?;
    info!("stores flushed, exiting");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
