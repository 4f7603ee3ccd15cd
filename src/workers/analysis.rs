// =============================================================================
// Analysis Worker — trade aggregation, feature computation, signal emission
// =============================================================================
//
// Per tick:
//   (a) Drain the trade queue: archive raw trades for save_pairs, bucket
//       trades for trade_pairs into per-pair time bins.
//   (b) Drain the depth-state queue: archive raw states for save_pairs,
//       reduce and feed depth for trade_pairs into the pair's stream buffer.
//   (c) Close every time bin at or before `floor(server_time / period) *
//       period - period`, oldest first, feeding quantity-weighted period
//       summaries into the buffer. A pair that closed nothing while the bin
//       boundary advanced gets a synthetic zero-quantity period at the last
//       closed bin, priced at its previous average, so the feature window
//       keeps moving through quiet stretches.
//   (d) Consult the per-pair prediction model on the warmed window, fold the
//       output into a rolling joint-probability history, and emit buy/sell
//       signals when the joint crosses its threshold.
//
// All worker-local state resets whenever the session is not CONNECTED.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::analysis::{reduce_depth_state, RealtimeStreamBuffer};
use crate::app_state::AppState;
use crate::archive;
use crate::config::Config;
use crate::prediction::{load_model, PredictionModel};
use crate::types::{ConnectionStatus, PeriodSummary, SignalSide, TradeSignal};
use crate::workers::Worker;

const EPSILON: f32 = 1e-6;

/// Per-bin accumulation: parallel quantity and price vectors.
type BinStats = BTreeMap<i64, (Vec<f32>, Vec<f32>)>;

pub struct AnalysisWorker {
    state: Arc<AppState>,
    config: Config,

    last_closed_time_bin: i64,
    time_bin_stats: HashMap<String, BinStats>,
    realtime_streams: HashMap<String, RealtimeStreamBuffer>,
    last_avg_prices: HashMap<String, f32>,
    trade_models: HashMap<String, Box<dyn PredictionModel>>,
    buy_probs_histories: HashMap<String, Vec<[f32; 2]>>,
    sell_probs_histories: HashMap<String, Vec<[f32; 2]>>,
}

impl AnalysisWorker {
    pub fn new(state: Arc<AppState>, config: Config) -> Self {
        Self {
            state,
            config,
            last_closed_time_bin: 0,
            time_bin_stats: HashMap::new(),
            realtime_streams: HashMap::new(),
            last_avg_prices: HashMap::new(),
            trade_models: HashMap::new(),
            buy_probs_histories: HashMap::new(),
            sell_probs_histories: HashMap::new(),
        }
    }

    fn reset(&mut self) {
        for (_, mut model) in self.trade_models.drain() {
            model.unload();
        }
        self.last_closed_time_bin = 0;
        self.time_bin_stats.clear();
        self.realtime_streams.clear();
        self.last_avg_prices.clear();
        self.buy_probs_histories.clear();
        self.sell_probs_histories.clear();
    }

    fn tick(&mut self) -> Result<()> {
        if self.state.connection_status() != ConnectionStatus::Connected {
            self.reset();
            return Ok(());
        }

        let trade_pairs = self.state.trade_pairs();
        let save_pairs = self.state.save_pairs();
        let connect_time = self.state.connect_time();

        self.drain_trades(&trade_pairs, &save_pairs, connect_time)?;
        self.drain_depth_states(&trade_pairs, &save_pairs, connect_time)?;
        self.close_time_bins();
        self.drop_stale_pairs(&trade_pairs);
        self.step_models(&trade_pairs);
        self.emit_signals(&trade_pairs);

        Ok(())
    }

    /// (a) Drain the trade queue into archive batches and time-bin buckets.
    fn drain_trades(
        &mut self,
        trade_pairs: &[String],
        save_pairs: &[String],
        connect_time: i64,
    ) -> Result<()> {
        let mut archive_batches: HashMap<String, Vec<String>> = HashMap::new();

        while let Some((pair, trade)) = self.state.trade_queue.try_pop() {
            if save_pairs.contains(&pair) {
                archive_batches
                    .entry(pair.clone())
                    .or_default()
                    .push(serde_json::to_string(&trade).context("failed to serialise trade")?);
            }

            if trade_pairs.contains(&pair) {
                let time_bin = time_bin_for(trade.trade_timestamp, self.config.period_time);
                let (quantities, prices) = self
                    .time_bin_stats
                    .entry(pair)
                    .or_default()
                    .entry(time_bin)
                    .or_default();
                quantities.push(trade.quantity as f32);
                prices.push(trade.price as f32);
            }
        }

        for (pair, lines) in archive_batches {
            let path = archive::trades_path(&self.config.data_store_dir, connect_time, &pair);
            archive::append_lines(&path, &lines)?;
        }

        Ok(())
    }

    /// (b) Drain the depth-state queue into archive batches and the per-pair
    /// stream buffers.
    fn drain_depth_states(
        &mut self,
        trade_pairs: &[String],
        save_pairs: &[String],
        connect_time: i64,
    ) -> Result<()> {
        let mut archive_batches: HashMap<String, Vec<String>> = HashMap::new();
        let num_depth_bins = self.config.num_depth_bins;

        while let Some((pair, depth_state)) = self.state.orderbook_state_queue.try_pop() {
            if save_pairs.contains(&pair) {
                archive_batches.entry(pair.clone()).or_default().push(
                    serde_json::to_string(&depth_state)
                        .context("failed to serialise depth state")?,
                );
            }

            if trade_pairs.contains(&pair) {
                let reduced = reduce_depth_state(num_depth_bins, &depth_state);
                let stream = self
                    .realtime_streams
                    .entry(pair)
                    .or_insert_with(|| RealtimeStreamBuffer::new(num_depth_bins));
                stream.update_order_book(
                    reduced.server_timestamp,
                    &reduced.bids,
                    &reduced.asks,
                    reduced.avg_spread,
                    reduced.qty_spread,
                );
            }
        }

        for (pair, lines) in archive_batches {
            let path = archive::depth_path(&self.config.data_store_dir, connect_time, &pair);
            archive::append_lines(&path, &lines)?;
        }

        Ok(())
    }

    /// (c) Close every complete bin and feed period summaries to the stream
    /// buffers, synthesising quiet periods where needed.
    fn close_time_bins(&mut self) {
        let period = self.config.period_time;
        let cur_time_bin = time_bin_for(self.state.server_time(), period);
        let last_time_bin = cur_time_bin - period;

        if last_time_bin <= self.last_closed_time_bin {
            return;
        }
        self.last_closed_time_bin = last_time_bin;

        let num_depth_bins = self.config.num_depth_bins;
        let pairs: Vec<String> = self.time_bin_stats.keys().cloned().collect();

        for pair in pairs {
            let stream = self
                .realtime_streams
                .entry(pair.clone())
                .or_insert_with(|| RealtimeStreamBuffer::new(num_depth_bins));

            let bins = self.time_bin_stats.get_mut(&pair).expect("known pair");
            let ready: Vec<i64> = bins.range(..=last_time_bin).map(|(bin, _)| *bin).collect();

            let mut did_close = false;
            for bin in ready {
                let (quantities, prices) = bins.remove(&bin).expect("ready bin");
                let summary = summarize_bin(bin, &quantities, &prices);

                self.last_avg_prices.insert(pair.clone(), summary.avg_price);
                stream.update_trade_period(
                    summary.time_bin,
                    summary.total_quantity,
                    summary.num_trades,
                    summary.avg_price,
                    summary.low,
                    summary.high,
                );
                did_close = true;

                debug!(
                    pair = %pair,
                    time_bin = summary.time_bin,
                    trades = summary.num_trades,
                    avg_price = summary.avg_price,
                    "period closed"
                );
            }

            if !did_close {
                // Quiet interval: advance the window with a zero-quantity
                // period priced at the previous average.
                let last_avg = self.last_avg_prices.get(&pair).copied().unwrap_or(0.0);
                stream.update_trade_period(last_time_bin, 0.0, 0, last_avg, last_avg, last_avg);
            }
        }
    }

    /// Dispose models and worker-local caches for pairs that left the
    /// trading set.
    fn drop_stale_pairs(&mut self, trade_pairs: &[String]) {
        let stale: Vec<String> = self
            .trade_models
            .keys()
            .filter(|pair| !trade_pairs.contains(pair))
            .cloned()
            .collect();
        for pair in stale {
            if let Some(mut model) = self.trade_models.remove(&pair) {
                model.unload();
                info!(pair = %pair, "prediction model unloaded");
            }
        }

        self.realtime_streams
            .retain(|pair, _| trade_pairs.contains(pair));
        self.time_bin_stats
            .retain(|pair, _| trade_pairs.contains(pair));
        self.last_avg_prices
            .retain(|pair, _| trade_pairs.contains(pair));
        self.buy_probs_histories
            .retain(|pair, _| trade_pairs.contains(pair));
        self.sell_probs_histories
            .retain(|pair, _| trade_pairs.contains(pair));
    }

    /// (d) Run the prediction models and roll their output into the
    /// probability histories.
    fn step_models(&mut self, trade_pairs: &[String]) {
        let num_depth_bins = self.config.num_depth_bins;
        let history_len = self.config.trade_history_length;

        for pair in trade_pairs {
            let stream = self
                .realtime_streams
                .entry(pair.clone())
                .or_insert_with(|| RealtimeStreamBuffer::new(num_depth_bins));
            let model = self
                .trade_models
                .entry(pair.clone())
                .or_insert_with(|| load_model(pair));

            let (buy_probs, sell_probs) = match stream.features_window() {
                Some((ts, feats, bids, asks)) => (
                    model.predict_buy(ts, feats, bids, asks),
                    model.predict_sell(ts, feats, bids, asks),
                ),
                None => ([0.5, 0.5], [0.5, 0.5]),
            };

            // The ring is seeded uniform on first sight of a pair; recording
            // starts on the following tick.
            match self.buy_probs_histories.get_mut(pair) {
                Some(history) => {
                    history.rotate_left(1);
                    *history.last_mut().expect("non-empty history") = buy_probs;
                }
                None => {
                    self.buy_probs_histories
                        .insert(pair.clone(), vec![[0.5, 0.5]; history_len]);
                }
            }
            match self.sell_probs_histories.get_mut(pair) {
                Some(history) => {
                    history.rotate_left(1);
                    *history.last_mut().expect("non-empty history") = sell_probs;
                }
                None => {
                    self.sell_probs_histories
                        .insert(pair.clone(), vec![[0.5, 0.5]; history_len]);
                }
            }
        }
    }

    /// Emit buy/sell events whose joint probability over the history window
    /// crosses the configured thresholds.
    fn emit_signals(&mut self, trade_pairs: &[String]) {
        let timestamp = self.state.server_time();

        for pair in trade_pairs {
            if let Some(history) = self.buy_probs_histories.get(pair) {
                let joint = joint_probability(history);
                if joint[1] >= self.config.buy_threshold {
                    info!(pair = %pair, probability = joint[1], "buy signal");
                    self.state.executor_queue.push(TradeSignal {
                        pair: pair.clone(),
                        side: SignalSide::Buy,
                        timestamp,
                        probability: joint[1],
                    });
                }
            }

            if let Some(history) = self.sell_probs_histories.get(pair) {
                let joint = joint_probability(history);
                if joint[1] >= self.config.sell_threshold {
                    info!(pair = %pair, probability = joint[1], "sell signal");
                    self.state.executor_queue.push(TradeSignal {
                        pair: pair.clone(),
                        side: SignalSide::Sell,
                        timestamp,
                        probability: joint[1],
                    });
                }
            }
        }
    }
}

/// Start of the period bin containing `timestamp_ms`.
pub(crate) fn time_bin_for(timestamp_ms: i64, period_ms: i64) -> i64 {
    timestamp_ms.div_euclid(period_ms) * period_ms
}

/// Quantity-weighted summary of one closed bin.
pub(crate) fn summarize_bin(time_bin: i64, quantities: &[f32], prices: &[f32]) -> PeriodSummary {
    let total_quantity: f32 = quantities.iter().sum();

    let avg_price = if total_quantity > 0.0 {
        prices
            .iter()
            .zip(quantities)
            .map(|(p, q)| p * (q / total_quantity))
            .sum()
    } else if prices.is_empty() {
        0.0
    } else {
        prices.iter().sum::<f32>() / prices.len() as f32
    };

    let low = prices.iter().cloned().fold(f32::MAX, f32::min);
    let high = prices.iter().cloned().fold(f32::MIN, f32::max);

    PeriodSummary {
        time_bin,
        total_quantity,
        num_trades: quantities.len(),
        avg_price,
        low: if prices.is_empty() { 0.0 } else { low },
        high: if prices.is_empty() { 0.0 } else { high },
    }
}

/// Product of per-tick probabilities across the history window, normalised
/// into a distribution.
pub(crate) fn joint_probability(history: &[[f32; 2]]) -> [f32; 2] {
    let mut joint = [1.0f32, 1.0f32];
    for probs in history {
        joint[0] *= probs[0];
        joint[1] *= probs[1];
    }
    let sum = joint[0] + joint[1] + EPSILON;
    [joint[0] / sum, joint[1] / sum]
}

#[async_trait]
impl Worker for AnalysisWorker {
    fn name(&self) -> &'static str {
        "analysis"
    }

    async fn on_update(&mut self) -> Result<()> {
        self.tick()
    }
}
