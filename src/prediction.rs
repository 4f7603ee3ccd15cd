// =============================================================================
// Prediction model interface
// =============================================================================
//
// A model is a pure function from the feature tensors to a 2-way probability
// vector: index 0 is hold, index 1 is act (buy or sell depending on the
// query). Models are loaded per pair and disposed when the pair leaves the
// trading set.
//
// The crate ships a uniform-prior stub; production models implement the same
// trait and are substituted by the loader.
// =============================================================================

use crate::analysis::NUM_FEATS;

/// Per-pair prediction model consulted once per analysis tick.
pub trait PredictionModel: Send {
    /// Probability distribution over [hold, buy].
    fn predict_buy(
        &self,
        timestamp: i64,
        feats_window: &[[f32; NUM_FEATS]],
        bid_window: &[Vec<f32>],
        ask_window: &[Vec<f32>],
    ) -> [f32; 2];

    /// Probability distribution over [hold, sell].
    fn predict_sell(
        &self,
        timestamp: i64,
        feats_window: &[[f32; NUM_FEATS]],
        bid_window: &[Vec<f32>],
        ask_window: &[Vec<f32>],
    ) -> [f32; 2];

    /// Release any resources held by the model before it is dropped.
    fn unload(&mut self) {}
}

/// Uniform-prior stub: always maximally uncertain.
pub struct UniformPriorModel;

impl PredictionModel for UniformPriorModel {
    fn predict_buy(
        &self,
        _timestamp: i64,
        _feats_window: &[[f32; NUM_FEATS]],
        _bid_window: &[Vec<f32>],
        _ask_window: &[Vec<f32>],
    ) -> [f32; 2] {
        [0.5, 0.5]
    }

    fn predict_sell(
        &self,
        _timestamp: i64,
        _feats_window: &[[f32; NUM_FEATS]],
        _bid_window: &[Vec<f32>],
        _ask_window: &[Vec<f32>],
    ) -> [f32; 2] {
        [0.5, 0.5]
    }
}

/// Load the prediction model for `pair`.
///
/// Currently always the uniform-prior stub; the indirection is the seam
/// where trained per-pair models plug in.
pub fn load_model(_pair: &str) -> Box<dyn PredictionModel> {
    Box::new(UniformPriorModel)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_model_is_maximally_uncertain() {
        let model = load_model("btcusdt");
        let feats = vec![[0.0; NUM_FEATS]];
        let depth = vec![vec![0.0; 16]];
        assert_eq!(model.predict_buy(0, &feats, &depth, &depth), [0.5, 0.5]);
        assert_eq!(model.predict_sell(0, &feats, &depth, &depth), [0.5, 0.5]);
    }
}
