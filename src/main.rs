use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use trade_warden::config::Config;
use trade_warden::engine::TradingEngine;
use trade_warden::exchange::{RateLimiter, UpbitConnector, UpbitQuotationClient};
use trade_warden::store::{CredentialStore, Db, OrderStore, PositionStore, StrategyStore};
use trade_warden::supervisor::{ExecutorRegistry, StrategySupervisor};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting Trade Warden v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    config.validate()?;
    info!(
        database = %config.database.path,
        poll_interval_secs = config.engine.poll_interval_secs,
        eval_interval_secs = config.supervisor.eval_interval_secs,
        "Configuration loaded"
    );

    let db = Db::open(&config.database.path)?;
    let orders = Arc::new(OrderStore::new(db.clone()));
    let positions = Arc::new(PositionStore::new(db.clone()));
    let strategies = Arc::new(StrategyStore::new(db.clone()));
    let credentials = Arc::new(CredentialStore::new(db));

    let exchange_limiter = Arc::new(RateLimiter::new(config.exchange.exchange_rps));
    let quotation_limiter = Arc::new(RateLimiter::new(config.exchange.quotation_rps));
    let connector = Arc::new(UpbitConnector::new(
        exchange_limiter,
        config.exchange.request_timeout(),
    ));
    let quotation = Arc::new(UpbitQuotationClient::new(
        quotation_limiter,
        config.exchange.request_timeout(),
    )?);

    let engine = Arc::new(TradingEngine::new(
        orders,
        positions.clone(),
        credentials,
        connector,
        config.engine.clone(),
    ));
    let registry = ExecutorRegistry::with_defaults(engine.clone());
    let supervisor = Arc::new(StrategySupervisor::new(
        strategies,
        positions,
        quotation,
        registry,
        config.supervisor.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx.clone()));
    let supervisor_task = tokio::spawn(supervisor.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting...");

    shutdown_tx.send(true)?;
    let _ = engine_task.await;
    let _ = supervisor_task.await;

    Ok(())
}
