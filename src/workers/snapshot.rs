// =============================================================================
// Snapshot Worker — periodic REST depth snapshots per pair
// =============================================================================
//
// On each tick, every active pair whose snapshot is older than
// `depth_snapshot_interval` seconds is refreshed from the REST depth
// endpoint (top 100 levels). A 429 latches RATE_LIMITED and abandons the
// whole tick; any other per-pair failure skips that pair quietly and retries
// on the next tick.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::app_state::AppState;
use crate::config::Config;
use crate::exchange::{ExchangeClient, RestOutcome};
use crate::types::{ConnectionStatus, DepthSnapshot};
use crate::workers::Worker;

pub struct SnapshotWorker {
    state: Arc<AppState>,
    config: Config,
    client: ExchangeClient,
    last_snapshot_times: HashMap<String, i64>,
}

impl SnapshotWorker {
    pub fn new(state: Arc<AppState>, config: Config) -> Self {
        let client = ExchangeClient::new(
            config.api_key.clone(),
            config.api_secret.clone(),
            config.request_timeout,
            config.connect_timeout,
        );
        Self {
            state,
            config,
            client,
            last_snapshot_times: HashMap::new(),
        }
    }

    async fn refresh_pair(&mut self, pair: &str, now_s: i64) -> Result<bool> {
        match self.client.depth(pair).await {
            Ok(RestOutcome::RateLimited) => {
                self.state
                    .set_connection_status(ConnectionStatus::RateLimited);
                Ok(false)
            }
            Ok(RestOutcome::Ok((update_id, bids, asks))) => {
                self.last_snapshot_times.insert(pair.to_string(), now_s);

                self.state.bid_snapshot_queue.push(DepthSnapshot {
                    pair: pair.to_string(),
                    last_update_id: update_id,
                    levels: bids,
                });
                self.state.ask_snapshot_queue.push(DepthSnapshot {
                    pair: pair.to_string(),
                    last_update_id: update_id,
                    levels: asks,
                });

                debug!(pair, update_id, "depth snapshot refreshed");
                Ok(true)
            }
            Err(e) => {
                // Transient failure: skip this pair, retry next tick.
                warn!(pair, error = %e, "depth snapshot failed — skipping pair");
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl Worker for SnapshotWorker {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    async fn on_update(&mut self) -> Result<()> {
        if self.state.connection_status() != ConnectionStatus::Connected {
            self.last_snapshot_times.clear();
            return Ok(());
        }

        let now_s = ExchangeClient::wall_clock_ms() / 1000;
        let interval = self.config.depth_snapshot_interval as i64;

        for pair in self.state.active_pairs() {
            let last = self.last_snapshot_times.get(&pair).copied().unwrap_or(0);
            if now_s - last < interval {
                continue;
            }

            if !self.refresh_pair(&pair, now_s).await? {
                // Rate limited: abandon the rest of the tick.
                return Ok(());
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_requests_while_not_connected() {
        let state = Arc::new(AppState::new());
        state.set_trade_pairs(vec!["btcusdt".into()]);
        state.set_connection_status(ConnectionStatus::RateLimited);

        let mut worker = SnapshotWorker::new(state.clone(), Config::default());
        worker
            .last_snapshot_times
            .insert("btcusdt".into(), 12_345);

        // The tick returns before any HTTP is attempted and resets the
        // per-pair schedule for the next session.
        worker.on_update().await.unwrap();
        assert!(worker.last_snapshot_times.is_empty());
        assert!(state.bid_snapshot_queue.is_empty());
        assert!(state.ask_snapshot_queue.is_empty());
    }

    #[tokio::test]
    async fn interval_gate_skips_recent_pairs() {
        let state = Arc::new(AppState::new());
        state.set_trade_pairs(vec!["btcusdt".into()]);
        state.set_connection_status(ConnectionStatus::Connected);

        let mut worker = SnapshotWorker::new(state.clone(), Config::default());
        // Pretend the pair was snapshotted far in the future so the gate
        // holds and no request is issued.
        worker
            .last_snapshot_times
            .insert("btcusdt".into(), i64::MAX / 2);

        worker.on_update().await.unwrap();
        assert!(state.bid_snapshot_queue.is_empty());
        assert_eq!(state.connection_status(), ConnectionStatus::Connected);
    }
}
