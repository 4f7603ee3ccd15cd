// =============================================================================
// Depth reduction — raw order-book state to fixed-width histograms
// =============================================================================
//
// Each side of the book is reduced to a `num_depth_bins`-wide histogram of
// quantity weight across `[mean - 3*std, mean + 3*std]` of the side's price
// distribution, weighted by level quantity. The analysis layer only ever
// consumes this reduced form, which is why the order-book worker can afford
// its coarse interval merge upstream.
//
// All math is f32; the epsilon keeps every division finite on empty or
// degenerate sides.
// =============================================================================

use crate::types::DepthState;

const EPSILON: f32 = 1e-6;

/// A depth state reduced to per-side histograms and spread scalars.
#[derive(Debug, Clone)]
pub struct ReducedDepth {
    pub server_timestamp: i64,
    /// Bid-side histogram, normalised to its own maximum.
    pub bids: Vec<f32>,
    /// Ask-side histogram, normalised to its own maximum.
    pub asks: Vec<f32>,
    /// Weighted mean ask price minus weighted mean bid price.
    pub avg_spread: f32,
    /// Total ask quantity minus total bid quantity.
    pub qty_spread: f32,
}

/// Reduce a raw `{price -> qty}` depth state to histograms of
/// `num_depth_bins` buckets per side.
///
/// An empty side yields a zero vector and contributes zero to both spreads;
/// no input produces NaN.
pub fn reduce_depth_state(num_depth_bins: usize, state: &DepthState) -> ReducedDepth {
    let (ask_prices, ask_weights, total_ask_qty) = collect_side(&state.asks);
    let (bid_prices, bid_weights, total_bid_qty) = collect_side(&state.bids);

    let qty_spread = total_ask_qty - total_bid_qty;

    let (ask_weights, avg_ask, std_ask) = normalise_side(ask_prices.as_slice(), ask_weights);
    let (bid_weights, avg_bid, std_bid) = normalise_side(bid_prices.as_slice(), bid_weights);

    let avg_spread = avg_ask - avg_bid;

    let asks = bin_side(
        num_depth_bins,
        &ask_prices,
        &ask_weights,
        avg_ask - 3.0 * std_ask,
        avg_ask + 3.0 * std_ask,
    );
    let bids = bin_side(
        num_depth_bins,
        &bid_prices,
        &bid_weights,
        avg_bid - 3.0 * std_bid,
        avg_bid + 3.0 * std_bid,
    );

    ReducedDepth {
        server_timestamp: state.server_timestamp,
        bids,
        asks,
        avg_spread,
        qty_spread,
    }
}

/// Gather one side's price levels into parallel price/weight vectors, along
/// with the total quantity. Levels whose price string fails to parse are
/// skipped.
fn collect_side(levels: &std::collections::HashMap<String, f64>) -> (Vec<f32>, Vec<f32>, f32) {
    let mut prices = Vec::with_capacity(levels.len());
    let mut weights = Vec::with_capacity(levels.len());
    let mut total = 0.0f32;

    for (level, qty) in levels {
        let price: f32 = match level.parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        let qty = *qty as f32;
        prices.push(price);
        weights.push(qty);
        total += qty;
    }

    (prices, weights, total)
}

/// Normalise weights by the side maximum and compute the weighted mean and
/// standard deviation of the prices. Empty or all-zero sides reduce to
/// `(weights, 0, 0)`.
fn normalise_side(prices: &[f32], mut weights: Vec<f32>) -> (Vec<f32>, f32, f32) {
    if weights.is_empty() {
        return (weights, 0.0, 0.0);
    }

    let max_weight = weights.iter().cloned().fold(f32::MIN, f32::max);
    for w in &mut weights {
        *w /= max_weight + EPSILON;
    }

    let weight_sum: f32 = weights.iter().sum();
    if weight_sum <= 0.0 {
        return (weights, 0.0, 0.0);
    }

    let avg = prices
        .iter()
        .zip(&weights)
        .map(|(p, w)| p * w)
        .sum::<f32>()
        / weight_sum;

    let var = prices
        .iter()
        .zip(&weights)
        .map(|(p, w)| (p - avg) * (p - avg) * w)
        .sum::<f32>()
        / weight_sum;

    (weights, avg, var.sqrt())
}

/// Accumulate normalised weights into `num_depth_bins` buckets over
/// `[min_edge, max_edge]` and normalise the histogram by its own maximum.
fn bin_side(
    num_depth_bins: usize,
    prices: &[f32],
    weights: &[f32],
    min_edge: f32,
    max_edge: f32,
) -> Vec<f32> {
    let edges = linspace(min_edge, max_edge, num_depth_bins - 1);

    let mut arr = vec![0.0f32; num_depth_bins];
    for (price, weight) in prices.iter().zip(weights) {
        let bin = digitize(*price, &edges).min(num_depth_bins - 1);
        arr[bin] += weight;
    }

    let max_bin = arr.iter().cloned().fold(f32::MIN, f32::max);
    for v in &mut arr {
        *v /= max_bin + EPSILON;
    }
    arr
}

/// `num` evenly spaced values over `[start, stop]`, endpoints included.
fn linspace(start: f32, stop: f32, num: usize) -> Vec<f32> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f32;
            (0..num).map(|i| start + step * i as f32).collect()
        }
    }
}

/// Index of the bin `x` falls into given ascending `edges`: the number of
/// edges at or below `x`.
fn digitize(x: f32, edges: &[f32]) -> usize {
    edges.partition_point(|e| *e <= x)
}
