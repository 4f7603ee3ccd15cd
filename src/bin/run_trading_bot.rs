// =============================================================================
// run_trading_bot — live pipeline entry point
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use borealis_bot::api::run_ui_server;
use borealis_bot::app_state::AppState;
use borealis_bot::config::Config;
use borealis_bot::workers::analysis::AnalysisWorker;
use borealis_bot::workers::connection::ConnectionWorker;
use borealis_bot::workers::executor::ExecutorWorker;
use borealis_bot::workers::orderbook::OrderBookWorker;
use borealis_bot::workers::snapshot::SnapshotWorker;
use borealis_bot::workers::socket::run_socket_stream;
use borealis_bot::workers::spawn_worker;

/// Seconds to wait for each worker task to wind down on shutdown.
const TASK_WAIT_TIMEOUT_S: u64 = 5;

/// Start the trading bot, market data archiver, and UI server.
#[derive(Parser, Debug)]
#[command(name = "run_trading_bot", about = "Start the trading bot and UI server")]
struct Args {
    /// Configuration json file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)?;

    // Credentials may come from the environment instead of the config file.
    if let Ok(key) = std::env::var("EXCHANGE_API_KEY") {
        config.api_key = key;
    }
    if let Ok(secret) = std::env::var("EXCHANGE_API_SECRET") {
        config.api_secret = secret;
    }

    info!(
        trade_pairs = ?config.trade_pairs,
        save_pairs = ?config.save_pairs,
        "starting trading bot"
    );

    let state = Arc::new(AppState::new());
    state.set_trade_pairs(config.trade_pairs.clone());
    state.set_save_pairs(config.save_pairs.clone());

    // ── Workers ─────────────────────────────────────────────────────────
    let tick = config.proc_update_res;
    let mut handles: Vec<JoinHandle<()>> = vec![
        spawn_worker(
            ConnectionWorker::new(state.clone(), config.clone()),
            state.clone(),
            tick,
        ),
        spawn_worker(
            SnapshotWorker::new(state.clone(), config.clone()),
            state.clone(),
            tick,
        ),
        spawn_worker(
            OrderBookWorker::new(state.clone(), config.clone()),
            state.clone(),
            tick,
        ),
        spawn_worker(
            AnalysisWorker::new(state.clone(), config.clone()),
            state.clone(),
            tick,
        ),
        spawn_worker(ExecutorWorker::new(state.clone()), state.clone(), tick),
    ];

    // The socket stream is event-driven rather than tick-driven.
    handles.push(tokio::spawn(run_socket_stream(
        state.clone(),
        config.clone(),
    )));

    // ── UI server ───────────────────────────────────────────────────────
    let ui_state = state.clone();
    let ui_config = config.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = run_ui_server(ui_state, ui_config).await {
            error!(error = %e, "UI server terminated");
        }
    }));

    info!("all subsystems running");

    // ── Supervision ─────────────────────────────────────────────────────
    let mut fatal: Option<String> = None;
    let mut interval =
        tokio::time::interval(tokio::time::Duration::from_millis(config.proc_update_res.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("shutdown signal received — stopping");
                break;
            }
            _ = interval.tick() => {
                if state.fatal_error() {
                    fatal = state.error_msg();
                    error!(error = ?fatal, "fatal worker error — shutting down");
                    break;
                }
            }
        }
    }

    shutdown(handles).await;

    match fatal {
        Some(msg) => anyhow::bail!(msg),
        None => {
            info!("shutdown complete");
            Ok(())
        }
    }
}

/// Cancel every task and wait briefly for each to wind down; a task that
/// fails to exit is abandoned.
async fn shutdown(handles: Vec<JoinHandle<()>>) {
    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        if tokio::time::timeout(
            tokio::time::Duration::from_secs(TASK_WAIT_TIMEOUT_S),
            handle,
        )
        .await
        .is_err()
        {
            warn!("task failed to exit within timeout — abandoning");
        }
    }
}
