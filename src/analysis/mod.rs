pub mod depth;
pub mod stream_buffer;

pub use depth::{reduce_depth_state, ReducedDepth};
pub use stream_buffer::{RealtimeStreamBuffer, NUM_FEATS, NUM_FEAT_PERIODS};
