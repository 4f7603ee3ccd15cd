// =============================================================================
// Realtime stream buffer — trading periods, indicator EMAs, feature window
// =============================================================================
//
// Models a stream of trading data with periods closed at regular intervals.
// Nine fixed-length ring buffers hold the raw period series; three EMA
// families (short/med/long, alpha = 2 / (n + 1)) are the source of truth for
// the indicator recurrences. The linear buffers exist only for the
// Williams %R max/min lookbacks, which reach back at most `DAYS_LONG`
// periods.
//
// The feature window is a [NUM_FEAT_PERIODS x NUM_FEATS] matrix that shifts
// up one row per closed period; the two depth windows shift one row per
// order-book update. Consumers may only read the window once it is warmed:
// at least `buffer_periods()` closed periods AND at least one order-book
// update observed.
// =============================================================================

const EPSILON: f32 = 1e-6;

const DAYS_SHORT: usize = 9;
const DAYS_MED: usize = 14;
const DAYS_LONG: usize = 26;

/// Rows in the feature window.
pub const NUM_FEAT_PERIODS: usize = 24;
/// Columns in the feature window (see [`RealtimeStreamBuffer::feat_labels`]).
pub const NUM_FEATS: usize = 16;

/// One EMA family: three horizons updated with `ema += alpha * (x - ema)`.
#[derive(Debug, Clone, Copy, Default)]
struct EmaTriple {
    short: f32,
    med: f32,
    long: f32,
}

impl EmaTriple {
    fn update(&mut self, alphas: (f32, f32, f32), sample: f32) {
        self.short += alphas.0 * (sample - self.short);
        self.med += alphas.1 * (sample - self.med);
        self.long += alphas.2 * (sample - self.long);
    }
}

/// Buffers real-time trade stream features over a window of recent history.
pub struct RealtimeStreamBuffer {
    num_depth_bins: usize,

    last_order_book_timestamp: i64,
    last_period_timestamp: i64,

    last_avg_spread: f32,
    last_qty_spread: f32,

    cur_buffered_periods: usize,
    num_buffer_periods: usize,

    // Rolling depth histograms, one row per order-book update.
    bid_window: Vec<Vec<f32>>,
    ask_window: Vec<Vec<f32>>,

    // Feature matrix, one row per closed period.
    feats_window: Vec<[f32; NUM_FEATS]>,

    alphas: (f32, f32, f32),

    price_ema: EmaTriple,
    up_avg_ema: EmaTriple,
    down_avg_ema: EmaTriple,
    pos_dir_ema: EmaTriple,
    neg_dir_ema: EmaTriple,
    tr_ema: EmaTriple,
    adx_ema: EmaTriple,

    price_buffer: Vec<f32>,
    quantity_buffer: Vec<f32>,
    lows_buffer: Vec<f32>,
    highs_buffer: Vec<f32>,
    up_avg_buffer: Vec<f32>,
    down_avg_buffer: Vec<f32>,
    pos_dir_buffer: Vec<f32>,
    neg_dir_buffer: Vec<f32>,
    tr_buffer: Vec<f32>,
}

impl RealtimeStreamBuffer {
    pub fn new(num_depth_bins: usize) -> Self {
        // Long enough for every EMA to settle before the window is read.
        let num_buffer_periods = (3.45 * (DAYS_LONG + 1) as f32) as usize + 1;

        let alphas = (
            2.0 / (DAYS_SHORT + 1) as f32,
            2.0 / (DAYS_MED + 1) as f32,
            2.0 / (DAYS_LONG + 1) as f32,
        );

        Self {
            num_depth_bins,
            last_order_book_timestamp: 0,
            last_period_timestamp: 0,
            last_avg_spread: 0.0,
            last_qty_spread: 0.0,
            cur_buffered_periods: 0,
            num_buffer_periods,
            bid_window: vec![vec![0.0; num_depth_bins]; num_depth_bins],
            ask_window: vec![vec![0.0; num_depth_bins]; num_depth_bins],
            feats_window: vec![[0.0; NUM_FEATS]; NUM_FEAT_PERIODS],
            alphas,
            price_ema: EmaTriple::default(),
            up_avg_ema: EmaTriple::default(),
            down_avg_ema: EmaTriple::default(),
            pos_dir_ema: EmaTriple::default(),
            neg_dir_ema: EmaTriple::default(),
            tr_ema: EmaTriple::default(),
            adx_ema: EmaTriple::default(),
            price_buffer: vec![0.0; num_buffer_periods],
            quantity_buffer: vec![0.0; num_buffer_periods],
            lows_buffer: vec![0.0; num_buffer_periods],
            highs_buffer: vec![0.0; num_buffer_periods],
            up_avg_buffer: vec![0.0; num_buffer_periods],
            down_avg_buffer: vec![0.0; num_buffer_periods],
            pos_dir_buffer: vec![0.0; num_buffer_periods],
            neg_dir_buffer: vec![0.0; num_buffer_periods],
            tr_buffer: vec![0.0; num_buffer_periods],
        }
    }

    /// Number of closed periods required before the window may be read.
    pub fn buffer_periods(&self) -> usize {
        self.num_buffer_periods
    }

    /// Labels of the feature window columns, in column order.
    pub fn feat_labels() -> [&'static str; NUM_FEATS] {
        [
            "price",
            "quantity",
            "orderbook_avg_spread",
            "orderbook_qty_spread",
            "percent_range_short",
            "percent_range_med",
            "percent_range_long",
            "rsi_short",
            "rsi_med",
            "rsi_long",
            "adx_short",
            "adx_med",
            "adx_long",
            "macd_short_med",
            "macd_short_long",
            "macd_med_long",
        ]
    }

    /// Feed one reduced order-book update into the depth windows.
    pub fn update_order_book(
        &mut self,
        server_timestamp: i64,
        bid_arr: &[f32],
        ask_arr: &[f32],
        avg_spread: f32,
        qty_spread: f32,
    ) {
        self.last_order_book_timestamp = server_timestamp;
        self.last_avg_spread = avg_spread;
        self.last_qty_spread = qty_spread;

        shift_rows(&mut self.bid_window, bid_arr, self.num_depth_bins);
        shift_rows(&mut self.ask_window, ask_arr, self.num_depth_bins);
    }

    /// Feed one closed trading period into the buffers and recompute the
    /// newest feature row.
    pub fn update_trade_period(
        &mut self,
        server_period_timestamp: i64,
        total_quantity: f32,
        _total_num_trades: usize,
        avg_price: f32,
        low_price: f32,
        high_price: f32,
    ) {
        self.last_period_timestamp = server_period_timestamp;

        let n = self.num_buffer_periods;
        let last_avg = self.price_buffer[n - 1];
        let last_low = self.lows_buffer[n - 1];
        let last_high = self.highs_buffer[n - 1];

        // Shift every period buffer left by one.
        for buf in [
            &mut self.price_buffer,
            &mut self.quantity_buffer,
            &mut self.lows_buffer,
            &mut self.highs_buffer,
            &mut self.up_avg_buffer,
            &mut self.down_avg_buffer,
            &mut self.pos_dir_buffer,
            &mut self.neg_dir_buffer,
            &mut self.tr_buffer,
        ] {
            buf.copy_within(1.., 0);
        }

        self.price_buffer[n - 1] = avg_price;
        self.quantity_buffer[n - 1] = total_quantity;
        self.lows_buffer[n - 1] = low_price;
        self.highs_buffer[n - 1] = high_price;
        self.tr_buffer[n - 1] = (high_price - low_price)
            .max((high_price - last_avg).abs())
            .max((low_price - last_avg).abs());

        if avg_price > last_avg {
            self.up_avg_buffer[n - 1] = avg_price - last_avg;
            self.down_avg_buffer[n - 1] = 0.0;
        } else {
            self.up_avg_buffer[n - 1] = 0.0;
            self.down_avg_buffer[n - 1] = last_avg - avg_price;
        }

        let up_move = high_price - last_high;
        let down_move = last_low - low_price;

        self.pos_dir_buffer[n - 1] = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        self.neg_dir_buffer[n - 1] = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        // EMA recurrences.
        let alphas = self.alphas;
        self.price_ema.update(alphas, self.price_buffer[n - 1]);
        self.up_avg_ema.update(alphas, self.up_avg_buffer[n - 1]);
        self.down_avg_ema.update(alphas, self.down_avg_buffer[n - 1]);
        self.pos_dir_ema.update(alphas, self.pos_dir_buffer[n - 1]);
        self.neg_dir_ema.update(alphas, self.neg_dir_buffer[n - 1]);
        self.tr_ema.update(alphas, self.tr_buffer[n - 1]);

        // Shift the feature window and fill the newest row.
        self.feats_window.rotate_left(1);
        let row = self.compute_features();
        *self.feats_window.last_mut().expect("non-empty window") = row;

        // Warm-up only counts periods observed after the first order book.
        if self.last_order_book_timestamp > 0 && self.cur_buffered_periods < self.num_buffer_periods
        {
            self.cur_buffered_periods += 1;
        }
    }

    /// The latest timestamp and the full feature/depth windows, once the
    /// period buffer is warmed. `None` until then.
    #[allow(clippy::type_complexity)]
    pub fn features_window(
        &self,
    ) -> Option<(i64, &[[f32; NUM_FEATS]], &[Vec<f32>], &[Vec<f32>])> {
        if self.cur_buffered_periods >= self.num_buffer_periods {
            Some((
                self.last_period_timestamp,
                &self.feats_window,
                &self.bid_window,
                &self.ask_window,
            ))
        } else {
            None
        }
    }

    /// Compute all features for the newest period from the buffered series
    /// and EMA state.
    fn compute_features(&mut self) -> [f32; NUM_FEATS] {
        let n = self.num_buffer_periods;
        let cur_price = self.price_buffer[n - 1];

        let percent_range = |days: usize, highs: &[f32], lows: &[f32]| -> f32 {
            let hh = highs[n - days..].iter().cloned().fold(f32::MIN, f32::max);
            let ll = lows[n - days..].iter().cloned().fold(f32::MAX, f32::min);
            (hh - cur_price) / (hh - ll + EPSILON) * -100.0
        };

        let percent_range_short = percent_range(DAYS_SHORT, &self.highs_buffer, &self.lows_buffer);
        let percent_range_med = percent_range(DAYS_MED, &self.highs_buffer, &self.lows_buffer);
        let percent_range_long = percent_range(DAYS_LONG, &self.highs_buffer, &self.lows_buffer);

        let rsi = |up: f32, down: f32| 100.0 - 100.0 / (1.0 + up / (down + EPSILON));
        let rsi_short = rsi(self.up_avg_ema.short, self.down_avg_ema.short);
        let rsi_med = rsi(self.up_avg_ema.med, self.down_avg_ema.med);
        let rsi_long = rsi(self.up_avg_ema.long, self.down_avg_ema.long);

        let di = |dir: f32, tr: f32| 100.0 * dir / (tr + EPSILON);
        let dx = |pos: f32, neg: f32| (pos - neg).abs() / (pos + neg + EPSILON);

        let cur_adx_short = dx(
            di(self.pos_dir_ema.short, self.tr_ema.short),
            di(self.neg_dir_ema.short, self.tr_ema.short),
        );
        let cur_adx_med = dx(
            di(self.pos_dir_ema.med, self.tr_ema.med),
            di(self.neg_dir_ema.med, self.tr_ema.med),
        );
        let cur_adx_long = dx(
            di(self.pos_dir_ema.long, self.tr_ema.long),
            di(self.neg_dir_ema.long, self.tr_ema.long),
        );

        self.adx_ema.short += self.alphas.0 * (cur_adx_short - self.adx_ema.short);
        self.adx_ema.med += self.alphas.1 * (cur_adx_med - self.adx_ema.med);
        self.adx_ema.long += self.alphas.2 * (cur_adx_long - self.adx_ema.long);

        [
            cur_price,
            self.quantity_buffer[n - 1],
            self.last_avg_spread,
            self.last_qty_spread,
            percent_range_short,
            percent_range_med,
            percent_range_long,
            rsi_short,
            rsi_med,
            rsi_long,
            self.adx_ema.short * 100.0,
            self.adx_ema.med * 100.0,
            self.adx_ema.long * 100.0,
            self.price_ema.short - self.price_ema.med,
            self.price_ema.short - self.price_ema.long,
            self.price_ema.med - self.price_ema.long,
        ]
    }
}

/// Drop the oldest row of a rolling window and append `newest` (truncated or
/// zero-padded to `width`).
fn shift_rows(window: &mut Vec<Vec<f32>>, newest: &[f32], width: usize) {
    window.remove(0);
    let mut row = vec![0.0; width];
    for (dst, src) in row.iter_mut().zip(newest) {
        *dst = *src;
    }
    window.push(row);
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn feed_period(buf: &mut RealtimeStreamBuffer, ts: i64, price: f32) {
        buf.update_trade_period(ts, 10.0, 5, price, price - 0.5, price + 0.5);
    }

    fn feed_order_book(buf: &mut RealtimeStreamBuffer, ts: i64) {
        let arr = vec![0.5f32; 16];
        buf.update_order_book(ts, &arr, &arr, 1.0, 2.0);
    }

    #[test]
    fn buffer_length_is_ninety_four() {
        let buf = RealtimeStreamBuffer::new(16);
        assert_eq!(buf.buffer_periods(), 94);
    }

    #[test]
    fn window_unavailable_until_warmed() {
        let mut buf = RealtimeStreamBuffer::new(16);
        feed_order_book(&mut buf, 1);

        for i in 0..93 {
            feed_period(&mut buf, i * 60_000, 100.0 + i as f32 * 0.1);
            assert!(buf.features_window().is_none());
        }

        feed_period(&mut buf, 94 * 60_000, 110.0);
        assert!(buf.features_window().is_some());
    }

    #[test]
    fn window_unavailable_without_order_book_update() {
        let mut buf = RealtimeStreamBuffer::new(16);
        // 200 periods but zero depth updates: never warms.
        for i in 0..200 {
            feed_period(&mut buf, i * 60_000, 100.0);
        }
        assert!(buf.features_window().is_none());
    }

    #[test]
    fn warmed_window_has_expected_shape_and_is_finite() {
        let mut buf = RealtimeStreamBuffer::new(16);
        feed_order_book(&mut buf, 1);
        for i in 0..94 {
            feed_period(&mut buf, i * 60_000, 100.0 + (i as f32 * 0.3).sin());
        }

        let (ts, feats, bids, asks) = buf.features_window().expect("warmed");
        assert_eq!(ts, 93 * 60_000);
        assert_eq!(feats.len(), NUM_FEAT_PERIODS);
        assert_eq!(feats[0].len(), NUM_FEATS);
        assert_eq!(bids.len(), 16);
        assert_eq!(bids[0].len(), 16);
        assert_eq!(asks.len(), 16);

        for row in feats {
            for v in row {
                assert!(v.is_finite(), "non-finite feature value {v}");
            }
        }
    }

    #[test]
    fn identical_prices_produce_finite_features() {
        // Zero ranges everywhere exercise every epsilon guard.
        let mut buf = RealtimeStreamBuffer::new(16);
        feed_order_book(&mut buf, 1);
        for i in 0..94 {
            buf.update_trade_period(i * 60_000, 0.0, 0, 100.0, 100.0, 100.0);
        }
        let (_, feats, _, _) = buf.features_window().expect("warmed");
        for row in feats {
            for v in row {
                assert!(v.is_finite());
            }
        }
    }

    #[test]
    fn rising_prices_drive_rsi_high_and_williams_near_zero() {
        let mut buf = RealtimeStreamBuffer::new(16);
        feed_order_book(&mut buf, 1);
        for i in 0..94 {
            feed_period(&mut buf, i * 60_000, 100.0 + i as f32);
        }
        let (_, feats, _, _) = buf.features_window().expect("warmed");
        let newest = feats.last().unwrap();

        // RSI columns 7..10: all up-moves => RSI near 100.
        assert!(newest[7] > 90.0);
        assert!(newest[9] > 90.0);

        // Williams %R columns 4..7 stay within [-100, 0] and near zero when
        // the close sits at the highest high.
        for col in 4..7 {
            assert!(newest[col] <= 0.0 && newest[col] >= -100.0);
            assert!(newest[col] > -15.0);
        }

        // MACD diffs positive in an uptrend (short EMA above long EMA).
        assert!(newest[14] > 0.0);
    }

    #[test]
    fn depth_windows_roll_oldest_row_out() {
        let mut buf = RealtimeStreamBuffer::new(4);
        let first = vec![1.0f32; 4];
        buf.update_order_book(1, &first, &first, 0.0, 0.0);

        for i in 0..4 {
            let row = vec![i as f32; 4];
            buf.update_order_book(2 + i as i64, &row, &row, 0.0, 0.0);
        }

        // After 4 further updates the initial all-ones row has rolled out.
        feed_period(&mut buf, 0, 1.0);
        for _ in 0..94 {
            feed_period(&mut buf, 0, 1.0);
        }
        let (_, _, bids, _) = buf.features_window().expect("warmed");
        assert_eq!(bids.len(), 4);
        assert_eq!(bids[0], vec![0.0; 4]);
        assert_eq!(bids[3], vec![3.0; 4]);
    }
}
