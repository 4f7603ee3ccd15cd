// =============================================================================
// Borealis — streaming market-data analysis pipeline
// =============================================================================
//
// Staged pipeline of concurrent workers connected by queues: a connection
// worker maintains the exchange session, a socket worker consumes the
// multiplexed event stream, a snapshot worker polls REST depth, an
// order-book worker reconciles deltas against snapshots, and an analysis
// worker folds trades into periods, computes an indicator feature window,
// and drives a pluggable prediction model into buy/sell signals.
//
// The same analysis path runs live (`run_trading_bot`) or against recorded
// session archives (`run_simulator`).
// =============================================================================

pub mod analysis;
pub mod api;
pub mod app_state;
pub mod archive;
pub mod config;
pub mod exchange;
pub mod prediction;
pub mod replay;
pub mod types;
pub mod units;
pub mod workers;
