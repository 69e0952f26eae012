//! HTLC Relayer - EVM/Cosmos cross-chain atomic swap coordination
//!
//! Builds signable cross-chain swap orders, deploys the paired
//! hash-time-locked escrows on both legs and releases funds once the
//! maker reveals the secret.

use anyhow::Result;
use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

mod api;
mod chain;
mod codec;
mod config;
mod error;
mod metrics;
mod order;
mod relay;
mod resolver;

use chain::{CosmosClient, EvmClient};
use config::Settings;
use metrics::MetricsServer;
use order::OrderStore;
use relay::RelayerEngine;
use resolver::{CosmosResolver, EvmResolver};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting HTLC Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} EVM chains",
        settings.enabled_evm_chains().len()
    );

    // Connect the EVM legs
    let confirm_timeout = Duration::from_secs(settings.relayer.confirm_timeout_secs);
    let mut evm_resolvers = Vec::new();
    for (name, chain) in settings.enabled_evm_chains() {
        let client = EvmClient::new(
            &chain.rpc_url,
            &chain.private_key,
            chain.chain_id,
            confirm_timeout,
        )?;
        let resolver = EvmResolver::new(
            Arc::new(client),
            chain.chain_id,
            parse_address(&chain.resolver_address, name, "resolver")?,
            parse_address(&chain.escrow_factory_address, name, "escrow factory")?,
            parse_address(&chain.limit_order_address, name, "limit order")?,
            settings.relayer.gas_limit_override,
        );
        evm_resolvers.push(Arc::new(resolver));
    }

    // Connect the Cosmos leg
    let cosmos_client = CosmosClient::connect(
        &settings.cosmos.rpc_endpoint,
        &settings.cosmos.mnemonic,
        &settings.cosmos.prefix,
        &settings.cosmos.gas_price,
    )
    .await?;
    let cosmos_resolver = Arc::new(CosmosResolver::new(
        Arc::new(cosmos_client),
        settings.cosmos.escrow_factory_address.clone(),
    ));
    info!("Chain connections initialized");

    // Wire the order store and the engine
    let store = Arc::new(OrderStore::new());
    let engine = Arc::new(RelayerEngine::new(store, evm_resolvers, cosmos_resolver));
    info!("Relayer engine initialized");

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let api_config = settings.api.clone();
        let engine = engine.clone();
        async move {
            if let Err(e) = api::run_server(api_config, engine).await {
                error!("API server error: {}", e);
            }
        }
    });

    info!("HTLC Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("HTLC Relayer stopped");
    Ok(())
}

fn parse_address(input: &str, chain: &str, what: &str) -> Result<Address> {
    input
        .parse::<Address>()
        .map_err(|e| anyhow::anyhow!("invalid {} address for chain {}: {}", what, chain, e))
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,htlc_relayer=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
