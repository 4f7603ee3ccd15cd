// =============================================================================
// Replay driver — re-emit archived sessions as if live
// =============================================================================
//
// Reads the trades and depth logs of one recorded session and pushes them
// onto the same queues the live pipeline uses, driving a virtual clock in
// `update_resolution` steps. The analysis worker downstream is unchanged.
//
// This is the only back-pressured producer in the system: before each push
// it spins until the target queue is empty, which couples replay speed to
// analysis speed so the simulation cannot outrun its consumer and lose
// ordering.
// =============================================================================

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::DateTime;
use tracing::info;

use crate::app_state::AppState;
use crate::archive;
use crate::types::{ConnectionStatus, DepthState, Trade};

/// Spin delay while waiting for a queue to drain.
const BACKPRESSURE_SLEEP: Duration = Duration::from_nanos(100);
/// Progress is reported every this many virtual-clock updates.
const CALLBACK_FREQ: u64 = 100;

/// Progress observer: `(cur_date, final_date, percent_complete)`.
pub type ProgressCallback = Box<dyn FnMut(&str, &str, i64) + Send>;

/// Streams one recorded session back through the pipeline queues.
pub struct SavedStreamReader {
    state: Arc<AppState>,
    pair: String,
    session_timestamp: i64,
    trades_path: PathBuf,
    depth_path: PathBuf,
    update_resolution: i64,
    progress_callback: ProgressCallback,

    pending_depth: Option<DepthState>,
    cur_update: u64,
    start_timestamp: Option<i64>,
    final_timestamp: i64,
    final_date_str: String,
}

impl SavedStreamReader {
    pub fn new(
        state: Arc<AppState>,
        timestamp: i64,
        trading_pair: impl Into<String>,
        data_store_dir: &str,
        update_resolution: i64,
        progress_callback: ProgressCallback,
    ) -> Self {
        let pair = trading_pair.into();
        Self {
            trades_path: archive::trades_path(data_store_dir, timestamp, &pair),
            depth_path: archive::depth_path(data_store_dir, timestamp, &pair),
            state,
            pair,
            session_timestamp: timestamp,
            update_resolution: update_resolution.max(1),
            progress_callback,
            pending_depth: None,
            cur_update: 0,
            start_timestamp: None,
            final_timestamp: 0,
            final_date_str: String::new(),
        }
    }

    /// Read the recorded stream files and broadcast their contents onto the
    /// trade and depth-state queues. Blocks until the whole session has been
    /// replayed.
    pub fn run(&mut self) -> Result<()> {
        // The analysis worker treats the stream as a live session.
        self.state.set_connect_time(self.session_timestamp);
        self.state
            .set_connection_status(ConnectionStatus::Connected);

        // Recover the final trade record for progress accounting.
        let final_line = archive::last_line(&self.trades_path)?;
        let final_trade: Trade = serde_json::from_str(&final_line)
            .context("failed to parse final trade record")?;
        self.final_timestamp = final_trade.server_timestamp;
        self.final_date_str = format_utc(self.final_timestamp);

        info!(
            pair = %self.pair,
            session = self.session_timestamp,
            final_date = %self.final_date_str,
            "replay starting"
        );

        let trades = archive::open_lines(&self.trades_path)?;
        let mut depths = archive::open_lines(&self.depth_path)?;

        let mut last_update_timestamp = 0i64;

        for line in trades {
            let line = line.context("failed to read trade record")?;
            if line.is_empty() {
                continue;
            }
            let trade: Trade =
                serde_json::from_str(&line).context("failed to parse trade record")?;

            let mut server_timestamp = trade.server_timestamp;

            // Advance the virtual clock in resolution-sized steps up to the
            // trade, draining due depth records at each step.
            if server_timestamp - last_update_timestamp >= self.update_resolution {
                if last_update_timestamp == 0 {
                    self.step(server_timestamp, &mut depths)?;
                } else {
                    let mut t = last_update_timestamp;
                    loop {
                        t += self.update_resolution;
                        self.step(t, &mut depths)?;
                        if t >= server_timestamp {
                            break;
                        }
                    }
                    server_timestamp = t;
                }
                last_update_timestamp = server_timestamp;
            }

            while !self.state.trade_queue.is_empty() {
                std::thread::sleep(BACKPRESSURE_SLEEP);
            }
            self.state.set_server_time(server_timestamp);
            self.state
                .trade_queue
                .push((self.pair.clone(), trade));
        }

        info!(pair = %self.pair, "replay complete");
        Ok(())
    }

    /// One virtual-clock step: broadcast every depth record older than the
    /// clock (a single pending record carries over between steps) and report
    /// progress periodically.
    fn step<R: BufRead>(
        &mut self,
        server_timestamp: i64,
        depth_lines: &mut std::io::Lines<R>,
    ) -> Result<()> {
        if let Some(pending) = self.pending_depth.take() {
            if pending.server_timestamp < server_timestamp {
                self.push_depth(server_timestamp, pending);
            } else {
                self.pending_depth = Some(pending);
            }
        }

        if self.pending_depth.is_none() {
            for line in depth_lines {
                let line = line.context("failed to read depth record")?;
                if line.is_empty() {
                    continue;
                }
                let depth: DepthState =
                    serde_json::from_str(&line).context("failed to parse depth record")?;

                if depth.server_timestamp < server_timestamp {
                    self.push_depth(server_timestamp, depth);
                } else {
                    self.pending_depth = Some(depth);
                    break;
                }
            }
        }

        if self.start_timestamp.is_none() {
            self.start_timestamp = Some(self.state.server_time());
        }

        self.cur_update += 1;
        if self.cur_update % CALLBACK_FREQ == 0 {
            let cur_time = self.state.server_time();
            let cur_date = format_utc(cur_time);
            let progress = replay_progress(
                self.start_timestamp.unwrap_or(0),
                self.final_timestamp,
                cur_time,
            );
            (self.progress_callback)(&cur_date, &self.final_date_str, progress);
        }

        Ok(())
    }

    fn push_depth(&mut self, server_timestamp: i64, depth: DepthState) {
        while !self.state.orderbook_state_queue.is_empty() {
            std::thread::sleep(BACKPRESSURE_SLEEP);
        }
        self.state.set_server_time(server_timestamp);
        self.state
            .orderbook_state_queue
            .push((self.pair.clone(), depth));
    }
}

/// Percent completion of a replay, from the first and last archived server
/// timestamps and the current virtual clock.
pub(crate) fn replay_progress(start: i64, end: i64, cur: i64) -> i64 {
    if end <= start {
        return 100;
    }
    let fraction = 1.0 - (end - cur) as f64 / (end - start) as f64;
    (fraction * 100.0) as i64
}

/// UTC date string at second precision, matching the archive's own clock.
fn format_utc(timestamp_ms: i64) -> String {
    DateTime::from_timestamp(timestamp_ms / 1000, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "<invalid time>".to_string())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn trade_line(trade_ts: i64, server_ts: i64) -> String {
        serde_json::to_string(&Trade {
            trade_timestamp: trade_ts,
            server_timestamp: server_ts,
            price: 100.0,
            quantity: 1.0,
            is_buyer_maker: false,
            buyer_id: 1,
            seller_id: 2,
            low24: 0.0,
            high24: 0.0,
            vol24: 0.0,
        })
        .unwrap()
    }

    fn depth_line(server_ts: i64) -> String {
        serde_json::to_string(&DepthState {
            server_timestamp: server_ts,
            bids: [("10.0".to_string(), 1.0)].into_iter().collect(),
            asks: [("11.0".to_string(), 1.0)].into_iter().collect(),
        })
        .unwrap()
    }

    #[test]
    fn progress_formula_is_linear_in_virtual_time() {
        assert_eq!(replay_progress(1_000, 2_000, 1_000), 0);
        assert_eq!(replay_progress(1_000, 2_000, 1_500), 50);
        assert_eq!(replay_progress(1_000, 2_000, 2_000), 100);
        // Degenerate spans report complete rather than dividing by zero.
        assert_eq!(replay_progress(2_000, 2_000, 2_000), 100);
    }

    #[test]
    fn format_utc_second_precision() {
        assert_eq!(format_utc(0), "1970-01-01 00:00:00");
        assert_eq!(format_utc(1_514_764_800_123), "2018-01-01 00:00:00");
    }

    #[test]
    fn replays_session_with_backpressure_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().to_string_lossy().into_owned();
        let session = 1_700_000i64;

        // 101 trades spanning one second of virtual time (first server
        // timestamp 1000, last 2000), with depth records before the first
        // trade and mid-stream.
        let trades: Vec<String> = (0..=100)
            .map(|i| trade_line(990 + i * 10, 1_000 + i * 10))
            .collect();
        archive::append_lines(&archive::trades_path(&store, session, "btcusdt"), &trades)
            .unwrap();
        archive::append_lines(
            &archive::depth_path(&store, session, "btcusdt"),
            &[depth_line(500), depth_line(1_500), depth_line(1_600)],
        )
        .unwrap();

        let state = Arc::new(AppState::new());

        // Back-pressure requires a live consumer draining both queues.
        let done = Arc::new(AtomicBool::new(false));
        let trades_seen = Arc::new(AtomicUsize::new(0));
        let depths_seen = Arc::new(AtomicUsize::new(0));
        let consumer = {
            let state = state.clone();
            let done = done.clone();
            let trades_seen = trades_seen.clone();
            let depths_seen = depths_seen.clone();
            std::thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    if state.trade_queue.try_pop().is_some() {
                        trades_seen.fetch_add(1, Ordering::Relaxed);
                    }
                    if state.orderbook_state_queue.try_pop().is_some() {
                        depths_seen.fetch_add(1, Ordering::Relaxed);
                    }
                    std::thread::yield_now();
                }
            })
        };

        let progress_log = Arc::new(Mutex::new(Vec::new()));
        let log = progress_log.clone();
        let callback: ProgressCallback = Box::new(move |cur, fin, pct| {
            log.lock().unwrap().push((cur.to_string(), fin.to_string(), pct));
        });

        let mut reader =
            SavedStreamReader::new(state.clone(), session, "btcusdt", &store, 1, callback);
        reader.run().unwrap();

        done.store(true, Ordering::Relaxed);
        consumer.join().unwrap();

        assert_eq!(state.connection_status(), ConnectionStatus::Connected);
        assert_eq!(state.connect_time(), session);
        assert_eq!(trades_seen.load(Ordering::Relaxed), 101);
        assert_eq!(depths_seen.load(Ordering::Relaxed), 3);
        assert_eq!(state.server_time(), 2_000);

        // With a 1 ms resolution over the 1000 ms span, a callback fires
        // every 100 virtual-clock updates: progress advances roughly ten
        // points per callback and reaches ~50% by the fifth report.
        let log = progress_log.lock().unwrap();
        assert_eq!(log.len(), 10);
        let (_, _, mid) = log[4].clone();
        assert!((48..=51).contains(&mid), "expected ~50%, got {mid}");
        let (_, fin_date, last) = log.last().unwrap().clone();
        assert!((98..=100).contains(&last), "expected ~100%, got {last}");
        assert_eq!(fin_date, format_utc(2_000));
    }
}
