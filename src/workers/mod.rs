// =============================================================================
// Worker framework — uniform on_start / on_update tick loop
// =============================================================================
//
// Every tick-driven stage implements `Worker` and is driven by `spawn_worker`
// on a `proc_update_res` cadence. A worker that returns an error from
// `on_update` is fatal: the rendered error is recorded into the shared
// `error_msg`, `fatal_error` latches, and the task terminates so the
// supervisor can tear the pipeline down.
//
// The socket stream worker is event-driven (it owns a websocket read loop)
// and runs outside this framework; everything else ticks.
// =============================================================================

pub mod analysis;
pub mod connection;
pub mod executor;
pub mod orderbook;
pub mod snapshot;
pub mod socket;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app_state::AppState;

/// A tick-driven pipeline stage.
#[async_trait]
pub trait Worker: Send {
    fn name(&self) -> &'static str;

    /// Initialise worker-local state. Called once before the first tick.
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// One tick. An `Err` is fatal for the whole pipeline.
    async fn on_update(&mut self) -> Result<()>;
}

/// Drive `worker` on an `update_res_ms` tick until it fails.
///
/// An `update_res_ms` of zero yields between ticks instead of sleeping,
/// which lets the replay pipeline run as fast as its consumer drains.
pub fn spawn_worker<W>(mut worker: W, state: Arc<AppState>, update_res_ms: u64) -> JoinHandle<()>
where
    W: Worker + 'static,
{
    tokio::spawn(async move {
        info!(worker = worker.name(), "worker starting");

        if let Err(e) = worker.on_start().await {
            record_fatal(&state, worker.name(), &e);
            return;
        }

        loop {
            if let Err(e) = worker.on_update().await {
                record_fatal(&state, worker.name(), &e);
                return;
            }

            if update_res_ms > 0 {
                tokio::time::sleep(tokio::time::Duration::from_millis(update_res_ms)).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
    })
}

fn record_fatal(state: &Arc<AppState>, name: &str, e: &anyhow::Error) {
    error!(worker = name, error = %e, "worker raised — terminating");
    state.set_error_msg(format!("{name}: {e:?}"));
    state.set_fatal_error(true);
}
