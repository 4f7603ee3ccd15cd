// =============================================================================
// Connection Worker — exchange session lifecycle state machine
// =============================================================================
//
// Re-entered on every tick:
//
//   NOT_CONNECTED -> handshake; on success CONNECTED, on 429 RATE_LIMITED,
//                    on any other failure ERROR.
//   ERROR         -> back to NOT_CONNECTED 30 s after first entering ERROR.
//   RATE_LIMITED  -> back to NOT_CONNECTED after 60 s.
//   CONNECTED     -> maintenance: user-stream keepalive every 20 min,
//                    exchange-info refresh every 10 min, time resync every
//                    20 s, otherwise advance server_time by wall clock +
//                    drift; force NOT_CONNECTED once the session exceeds
//                    max_session_time.
//
// Time sync: measure round trip rtt, server_time = serverTime + rtt/2,
// time_drift = server_time - wall_clock, latency = 0.5*rtt + 0.5*latency.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::config::Config;
use crate::exchange::info::{parse_account_balances, parse_exchange_pair_infos};
use crate::exchange::{ExchangeClient, PairInfo, RestOutcome, TimedInfo};
use crate::types::ConnectionStatus;
use crate::workers::Worker;

const WS_URL: &str = "wss://stream.binance.com:9443";

/// Default precision for the discarded account-balance parse.
const BALANCE_PRECISION: usize = 8;

const ERROR_RETRY_MS: i64 = 30_000;
const RATE_LIMIT_HOLD_MS: i64 = 60_000;
const ACCOUNT_PING_INTERVAL_MS: i64 = 1_200_000;
const EXCHANGE_INFO_INTERVAL_MS: i64 = 600_000;
const SERVER_PING_INTERVAL_MS: i64 = 20_000;

pub struct ConnectionWorker {
    state: Arc<AppState>,
    config: Config,
    client: ExchangeClient,

    rate_limit_start: Option<i64>,
    error_start: Option<i64>,
    last_server_ping_time: i64,
    last_exchange_info_time: i64,
    last_account_ping_time: i64,
    time_drift: i64,

    listen_key: Option<String>,
    pair_infos: HashMap<String, PairInfo>,
}

impl ConnectionWorker {
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
            rate_limit_start: None,
            error_start: None,
            last_server_ping_time: 0,
            last_exchange_info_time: 0,
            last_account_ping_time: 0,
            time_drift: 0,
            listen_key: None,
            pair_infos: HashMap::new(),
        }
    }

    /// One pass of the state machine at wall-clock `cur_time_ms`.
    async fn tick(&mut self, cur_time_ms: i64) -> Result<()> {
        match self.state.connection_status() {
            ConnectionStatus::NotConnected => {
                self.state
                    .set_connection_status(ConnectionStatus::Connecting);

                match self.establish_connection().await {
                    Ok(true) => {
                        self.last_server_ping_time = cur_time_ms;
                        self.last_exchange_info_time = cur_time_ms;
                        self.last_account_ping_time = cur_time_ms;
                        self.state.set_connect_time(cur_time_ms + self.time_drift);
                        self.state
                            .set_connection_status(ConnectionStatus::Connected);
                        info!("exchange session established");
                    }
                    Ok(false) => {
                        // Rate limited mid-handshake; status is already
                        // latched to RATE_LIMITED.
                        warn!("handshake rate limited");
                    }
                    Err(e) => {
                        warn!(error = %e, "handshake failed");
                        self.state.set_connection_status(ConnectionStatus::Error);
                    }
                }
            }

            ConnectionStatus::Connecting => {
                // Transient within a single tick of this worker; nothing to
                // do if observed.
            }

            ConnectionStatus::Error => match self.error_start {
                None => self.error_start = Some(cur_time_ms),
                Some(start) => {
                    if cur_time_ms - start >= ERROR_RETRY_MS {
                        self.error_start = None;
                        self.state
                            .set_connection_status(ConnectionStatus::NotConnected);
                    }
                }
            },

            ConnectionStatus::RateLimited => match self.rate_limit_start {
                None => self.rate_limit_start = Some(cur_time_ms),
                Some(start) => {
                    if cur_time_ms - start >= RATE_LIMIT_HOLD_MS {
                        self.rate_limit_start = None;
                        self.state
                            .set_connection_status(ConnectionStatus::NotConnected);
                    }
                }
            },

            ConnectionStatus::Connected => {
                if let Err(e) = self.maintain_session(cur_time_ms).await {
                    warn!(error = %e, "session maintenance failed");
                    self.state.set_connection_status(ConnectionStatus::Error);
                }
            }
        }

        Ok(())
    }

    /// Keepalives, refreshes, and session rotation while CONNECTED.
    async fn maintain_session(&mut self, cur_time_ms: i64) -> Result<()> {
        if cur_time_ms - self.last_account_ping_time >= ACCOUNT_PING_INTERVAL_MS {
            let key = self
                .listen_key
                .clone()
                .context("no listen key for keepalive")?;
            match self.client.keepalive_user_stream(&key).await? {
                RestOutcome::RateLimited => {
                    self.state
                        .set_connection_status(ConnectionStatus::RateLimited);
                    return Ok(());
                }
                RestOutcome::Ok(()) => {
                    debug!("user stream keepalive sent");
                }
            }
            self.last_account_ping_time = cur_time_ms;
        }

        if cur_time_ms - self.last_exchange_info_time >= EXCHANGE_INFO_INTERVAL_MS {
            if !self.update_exchange_info().await? {
                return Ok(());
            }
            self.last_exchange_info_time = cur_time_ms;
            self.last_server_ping_time = cur_time_ms;
        } else if cur_time_ms - self.last_server_ping_time >= SERVER_PING_INTERVAL_MS {
            match self.client.server_time().await? {
                RestOutcome::RateLimited => {
                    self.state
                        .set_connection_status(ConnectionStatus::RateLimited);
                    return Ok(());
                }
                RestOutcome::Ok(info) => self.apply_timed_info(&info)?,
            }
            self.last_server_ping_time = cur_time_ms;
        } else {
            self.state.set_server_time(cur_time_ms + self.time_drift);
        }

        let session_age_s =
            (self.state.server_time() - self.state.connect_time()) as f64 / 1000.0;
        if session_age_s >= self.config.max_session_time as f64 {
            info!(session_age_s, "session limit reached — rotating connection");
            self.state
                .set_connection_status(ConnectionStatus::NotConnected);
        }

        Ok(())
    }

    /// Full handshake: exchange info + time sync, signed account sanity
    /// fetch, user-data stream, websocket URI construction.
    ///
    /// Returns `Ok(false)` when any step was rate limited (status already
    /// latched); `Err` on any other failure.
    async fn establish_connection(&mut self) -> Result<bool> {
        if !self.update_exchange_info().await? {
            return Ok(false);
        }

        let known = self
            .state
            .active_pairs()
            .iter()
            .filter(|pair| self.pair_infos.contains_key(*pair))
            .count();
        debug!(known_pairs = known, "pair metadata resolved for active pairs");

        if !self.request_account_info().await? {
            return Ok(false);
        }

        let listen_key = match self.client.open_user_stream().await? {
            RestOutcome::RateLimited => {
                self.state
                    .set_connection_status(ConnectionStatus::RateLimited);
                return Ok(false);
            }
            RestOutcome::Ok(key) => key,
        };

        // Subscribe the multiplexed stream to the user channel plus trades,
        // depth deltas, and tickers for every active pair.
        let mut stream_names = vec![listen_key.clone()];
        for pair in self.state.active_pairs() {
            stream_names.push(format!("{pair}@trade"));
            stream_names.push(format!("{pair}@depth"));
            stream_names.push(format!("{pair}@ticker"));
        }

        self.state
            .set_ws_uri(format!("{WS_URL}/stream?streams={}", stream_names.join("/")));
        self.listen_key = Some(listen_key);

        Ok(true)
    }

    /// Refresh exchange metadata; doubles as a time resync. Returns false
    /// when rate limited.
    async fn update_exchange_info(&mut self) -> Result<bool> {
        match self.client.exchange_info().await? {
            RestOutcome::RateLimited => {
                self.state
                    .set_connection_status(ConnectionStatus::RateLimited);
                Ok(false)
            }
            RestOutcome::Ok(info) => {
                self.apply_timed_info(&info)?;
                self.pair_infos = parse_exchange_pair_infos(&info.body)?;
                debug!(pairs = self.pair_infos.len(), "exchange info refreshed");
                Ok(true)
            }
        }
    }

    /// Fetch the signed account snapshot. The balances are parsed as a
    /// sanity check and discarded; no downstream consumer exists yet.
    /// Returns false when rate limited.
    async fn request_account_info(&mut self) -> Result<bool> {
        let timestamp = self.state.server_time();
        match self
            .client
            .account(self.config.account_recv_window, timestamp)
            .await?
        {
            RestOutcome::RateLimited => {
                self.state
                    .set_connection_status(ConnectionStatus::RateLimited);
                Ok(false)
            }
            RestOutcome::Ok(body) => {
                match parse_account_balances(&body, BALANCE_PRECISION) {
                    Ok((free, _locked)) => {
                        debug!(assets = free.len(), "account info retrieved");
                    }
                    Err(e) => {
                        warn!(error = %e, "account balances did not parse cleanly");
                    }
                }
                Ok(true)
            }
        }
    }

    /// Fold a timed response into latency EWMA, server time, and drift.
    fn apply_timed_info(&mut self, info: &TimedInfo) -> Result<()> {
        let server_time = info.body["serverTime"]
            .as_i64()
            .context("timed response missing serverTime")?;

        let server_time_ms = server_time + info.rtt_ms / 2;

        let latency = (0.5 * info.rtt_ms as f64 + 0.5 * self.state.latency() as f64) as i64;
        self.state.set_latency(latency);
        self.state.set_server_time(server_time_ms);
        self.time_drift = server_time_ms - ExchangeClient::wall_clock_ms();

        Ok(())
    }
}

#[async_trait]
impl Worker for ConnectionWorker {
    fn name(&self) -> &'static str {
        "connection"
    }

    async fn on_update(&mut self) -> Result<()> {
        let cur_time_ms = ExchangeClient::wall_clock_ms();
        self.tick(cur_time_ms).await
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn worker_with_status(status: ConnectionStatus) -> ConnectionWorker {
        let state = Arc::new(AppState::new());
        state.set_connection_status(status);
        ConnectionWorker::new(state, Config::default())
    }

    #[tokio::test]
    async fn error_state_recovers_after_thirty_seconds() {
        let mut worker = worker_with_status(ConnectionStatus::Error);

        worker.tick(1_000).await.unwrap();
        assert_eq!(worker.state.connection_status(), ConnectionStatus::Error);

        worker.tick(30_999).await.unwrap();
        assert_eq!(worker.state.connection_status(), ConnectionStatus::Error);

        worker.tick(31_000).await.unwrap();
        assert_eq!(
            worker.state.connection_status(),
            ConnectionStatus::NotConnected
        );
        // The marker resets so the next ERROR entry waits the full window.
        assert!(worker.error_start.is_none());
    }

    #[tokio::test]
    async fn rate_limit_state_holds_for_sixty_seconds() {
        let mut worker = worker_with_status(ConnectionStatus::RateLimited);

        worker.tick(5_000).await.unwrap();
        assert_eq!(
            worker.state.connection_status(),
            ConnectionStatus::RateLimited
        );

        worker.tick(64_999).await.unwrap();
        assert_eq!(
            worker.state.connection_status(),
            ConnectionStatus::RateLimited
        );

        worker.tick(65_000).await.unwrap();
        assert_eq!(
            worker.state.connection_status(),
            ConnectionStatus::NotConnected
        );
    }

    #[tokio::test]
    async fn connected_tick_advances_server_time_by_drift() {
        let mut worker = worker_with_status(ConnectionStatus::Connected);
        worker.time_drift = 250;
        // Hold every maintenance cadence back so the tick only advances the
        // clock.
        worker.last_account_ping_time = 1_000_000;
        worker.last_exchange_info_time = 1_000_000;
        worker.last_server_ping_time = 1_000_000;
        worker.state.set_connect_time(1_000_000);

        worker.tick(1_000_500).await.unwrap();
        assert_eq!(worker.state.server_time(), 1_000_750);
        assert_eq!(worker.state.connection_status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn session_expiry_forces_reconnect() {
        let mut worker = worker_with_status(ConnectionStatus::Connected);
        worker.last_account_ping_time = 10_000_000;
        worker.last_exchange_info_time = 10_000_000;
        worker.last_server_ping_time = 10_000_000;
        worker.config.max_session_time = 60;
        worker.state.set_connect_time(9_000_000);

        // server_time - connect_time exceeds 60 s after the tick.
        worker.tick(10_000_000).await.unwrap();
        assert_eq!(
            worker.state.connection_status(),
            ConnectionStatus::NotConnected
        );
    }

    #[test]
    fn timed_info_updates_latency_ewma_and_drift() {
        let worker_state = Arc::new(AppState::new());
        worker_state.set_latency(100);
        let mut worker = ConnectionWorker::new(worker_state, Config::default());

        let info = TimedInfo {
            body: serde_json::json!({"serverTime": 2_000_000}),
            rtt_ms: 200,
        };
        worker.apply_timed_info(&info).unwrap();

        assert_eq!(worker.state.latency(), 150);
        assert_eq!(worker.state.server_time(), 2_000_100);
    }

    #[test]
    fn timed_info_without_server_time_is_an_error() {
        let mut worker = worker_with_status(ConnectionStatus::NotConnected);
        let info = TimedInfo {
            body: serde_json::json!({}),
            rtt_ms: 10,
        };
        assert!(worker.apply_timed_info(&info).is_err());
    }
}
