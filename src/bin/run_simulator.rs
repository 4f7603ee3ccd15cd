// =============================================================================
// run_simulator — replay a recorded session through the analysis pipeline
// =============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use borealis_bot::app_state::AppState;
use borealis_bot::config::Config;
use borealis_bot::replay::{ProgressCallback, SavedStreamReader};
use borealis_bot::types::ConnectionStatus;
use borealis_bot::workers::analysis::AnalysisWorker;
use borealis_bot::workers::executor::ExecutorWorker;
use borealis_bot::workers::spawn_worker;

/// Seconds to wait for each worker task to wind down on shutdown.
const TASK_WAIT_TIMEOUT_S: u64 = 5;

/// Simulate trade activity from recorded stream data.
#[derive(Parser, Debug)]
#[command(name = "run_simulator", about = "Replay a recorded session as if live")]
struct Args {
    /// Timestamp of the recorded session directory.
    timestamp: i64,

    /// Trading pair to replay.
    trading_pair: String,

    /// Trading pair whose prediction model to use.
    model_pair: String,

    /// Configuration json file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let trading_pair = args.trading_pair.to_lowercase();
    let model_pair = args.model_pair.to_lowercase();

    let mut config = Config::load(&args.config)?;

    // The configured tick period becomes the replay's virtual-clock
    // resolution; the workers themselves free-run so replay speed is bound
    // only by analysis throughput.
    let update_resolution = config.proc_update_res as i64;
    config.proc_update_res = 0;

    info!(
        session = args.timestamp,
        pair = %trading_pair,
        model_pair = %model_pair,
        "starting simulator"
    );

    let state = Arc::new(AppState::new());
    state.set_trade_pairs(vec![trading_pair.clone()]);
    state.set_connect_time(args.timestamp);
    state.set_connection_status(ConnectionStatus::Connected);

    let handles: Vec<JoinHandle<()>> = vec![
        spawn_worker(
            AnalysisWorker::new(state.clone(), config.clone()),
            state.clone(),
            0,
        ),
        spawn_worker(ExecutorWorker::new(state.clone()), state.clone(), 0),
    ];

    let progress: ProgressCallback = Box::new(|cur_date, final_date, cur_progress| {
        print!("\r[ {cur_progress:>3}% ] {cur_date} / {final_date}");
        let _ = std::io::stdout().flush();
    });

    let mut reader = SavedStreamReader::new(
        state.clone(),
        args.timestamp,
        trading_pair,
        &config.data_store_dir,
        update_resolution,
        progress,
    );

    let replay_result = tokio::task::spawn_blocking(move || reader.run()).await?;
    println!();

    shutdown(handles).await;

    replay_result
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
