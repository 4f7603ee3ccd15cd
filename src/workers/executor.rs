// =============================================================================
// Executor Worker — trade signal consumer (stub)
// =============================================================================
//
// Drains buy/sell signals from the analysis worker. Order placement is not
// wired up yet; signals are counted and logged so the pipeline end-to-end
// path stays exercised. Local state re-initialises whenever the session is
// not CONNECTED.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::app_state::AppState;
use crate::types::ConnectionStatus;
use crate::workers::Worker;

pub struct ExecutorWorker {
    state: Arc<AppState>,
    session_signal_count: u64,
}

impl ExecutorWorker {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            session_signal_count: 0,
        }
    }
}

#[async_trait]
impl Worker for ExecutorWorker {
    fn name(&self) -> &'static str {
        "executor"
    }

    async fn on_update(&mut self) -> Result<()> {
        if self.state.connection_status() != ConnectionStatus::Connected {
            self.session_signal_count = 0;
            return Ok(());
        }

        while let Some(signal) = self.state.executor_queue.try_pop() {
            self.session_signal_count += 1;
            info!(
                pair = %signal.pair,
                side = %signal.side,
                probability = signal.probability,
                timestamp = signal.timestamp,
                total = self.session_signal_count,
                "trade signal received (execution not implemented)"
            );
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
    use crate::types::{SignalSide, TradeSignal};

    #[tokio::test]
    async fn drains_signals_while_connected() {
        let state = Arc::new(AppState::new());
        state.set_connection_status(ConnectionStatus::Connected);

        let mut worker = ExecutorWorker::new(state.clone());
        state.executor_queue.push(TradeSignal {
            pair: "btcusdt".into(),
            side: SignalSide::Buy,
            timestamp: 1_000,
            probability: 0.9,
        });

        worker.on_update().await.unwrap();
        assert!(state.executor_queue.is_empty());
        assert_eq!(worker.session_signal_count, 1);
    }

    #[tokio::test]
    async fn reinitialises_while_disconnected() {
        let state = Arc::new(AppState::new());
        let mut worker = ExecutorWorker::new(state.clone());
        worker.session_signal_count = 7;

        worker.on_update().await.unwrap();
        assert_eq!(worker.session_signal_count, 0);
    }
}
