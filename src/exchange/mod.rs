pub mod client;
pub mod info;

pub use client::{ExchangeClient, RestOutcome, TimedInfo};
pub use info::PairInfo;
