// src/main.rs
use anyhow::Context;
use dotenvy::dotenv;
use fiskey::config::AppConfig;
use fiskey::connectors::er_api::ErApiFeed;
use fiskey::core::engine::TradingEngine;
use fiskey::core::rates::RateTable;
use fiskey::core::refresher::{self, TrackedPair};
use fiskey::storage::{ChannelSink, JsonStateStore, TrendStore};
use fiskey::tui::{self, App};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // 1. Load Configuration
    let config = AppConfig::new().context("Invalid configuration")?;

    // 2. Logging goes to a file: the terminal belongs to the UI.
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "fiskey.log");
    let (writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(writer)
        .with_ansi(false)
        .init();

    info!("========================================");
    info!("       FISKEY TRADING (DEMO) - v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!(
        "Pair: {}/{} | Reference: {} | Refresh: {}s",
        config.pair.funding,
        config.pair.receiving,
        config.reference_currency,
        config.refresh_interval_secs
    );

    // 3. Restore or start fresh
    let rates = Arc::new(RateTable::new(&config.reference_currency));
    let store = JsonStateStore::new(&config.state_file);

    let restored = match store.load().await {
        Ok(state) => state,
        Err(e) => {
            error!("Could not load saved state, starting fresh: {:#}", e);
            None
        }
    };

    let engine = match restored {
        Some(state) => match TradingEngine::restore(rates.clone(), state, config.history_limit) {
            Ok(engine) => engine,
            Err(e) => {
                warn!("Saved state rejected ({}), starting fresh", e);
                TradingEngine::new(
                    rates.clone(),
                    config.initial_balance.clone(),
                    config.history_limit,
                )?
            }
        },
        None => TradingEngine::new(
            rates.clone(),
            config.initial_balance.clone(),
            config.history_limit,
        )?,
    };

    // 4. Persistence channel
    let (state_tx, state_rx) = mpsc::unbounded_channel();
    let writer_handle = store.spawn_writer(
        state_rx,
        config.persist_retries,
        config.persist_retry_delay(),
    );
    let engine = engine
        .with_sink(Box::new(ChannelSink::new(state_tx)))
        .into_shared();

    // 5. Rate feed
    let (ui_tx, ui_rx) = mpsc::channel(100);
    let feed = ErApiFeed::new(
        &config.rates_url,
        &config.reference_currency,
        config.request_timeout(),
    )?;
    let refresher_handle = refresher::spawn(
        Box::new(feed),
        rates.clone(),
        config.refresh_interval(),
        TrackedPair {
            from: config.pair.funding.clone(),
            to: config.pair.receiving.clone(),
        },
        ui_tx,
    );

    // 6. Trend chart survives restarts
    let trend_store = TrendStore::new(&config.trend_file);
    let saved_trend = match trend_store.load().await {
        Ok(points) => points.unwrap_or_default(),
        Err(e) => {
            warn!("Could not load trend, starting empty: {:#}", e);
            Vec::new()
        }
    };
    let (trend_tx, trend_rx) = mpsc::unbounded_channel();
    let trend_writer = trend_store.spawn_writer(
        trend_rx,
        config.persist_retries,
        config.persist_retry_delay(),
    );

    // 7. Run UI until the user quits
    let app = App::new(engine.clone(), config.pair.clone(), config.trend_points)
        .with_trend(saved_trend, trend_tx);
    if let Err(e) = tui::run(app, ui_rx).await {
        error!("UI error: {:#}", e);
        eprintln!("Fatal UI Error: {}", e);
    }

    refresher_handle.abort();
    // Dropping the last engine handle closes the persistence channel; let pending writes land.
    drop(engine);
    if let Err(e) = writer_handle.await {
        error!("State writer panicked: {}", e);
    }
    // The App (and its trend sender) was consumed by the UI loop.
    if let Err(e) = trend_writer.await {
        error!("Trend writer panicked: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}
