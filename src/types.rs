// =============================================================================
// Shared types used across the streaming pipeline
// =============================================================================

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Connection lifecycle of the exchange session.
///
/// Serialised in SCREAMING_SNAKE_CASE for the UI transport; parsing an
/// unknown value is an error, which is what keeps the app-state setter
/// closed over this enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    NotConnected,
    Connecting,
    Connected,
    RateLimited,
    Error,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::NotConnected
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ConnectionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_CONNECTED" => Ok(Self::NotConnected),
            "CONNECTING" => Ok(Self::Connecting),
            "CONNECTED" => Ok(Self::Connected),
            "RATE_LIMITED" => Ok(Self::RateLimited),
            "ERROR" => Ok(Self::Error),
            other => Err(anyhow::anyhow!("invalid connection status: {other}")),
        }
    }
}

/// A single spot trade from the exchange stream, stamped with the 24-hour
/// ticker values cached at arrival time.
///
/// Field names match the newline-delimited JSON archive format, so archived
/// sessions recorded by older builds replay unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_timestamp: i64,
    pub server_timestamp: i64,
    pub price: f64,
    pub quantity: f64,
    pub is_buyer_maker: bool,
    pub buyer_id: i64,
    pub seller_id: i64,
    #[serde(default)]
    pub low24: f64,
    #[serde(default)]
    pub high24: f64,
    #[serde(default)]
    pub vol24: f64,
}

/// An incremental depth update for one side of one pair's book.
///
/// `updates` maps price-level strings to quantities; a quantity of zero
/// means the level was removed. The two id fields bracket the update-id
/// range the delta covers, already shifted by one from the wire values.
#[derive(Debug, Clone)]
pub struct DepthEvent {
    pub pair: String,
    pub prev_update_id: i64,
    pub last_update_id: i64,
    pub updates: HashMap<String, f64>,
}

/// A full depth snapshot for one side of one pair's book, from the REST
/// depth endpoint.
#[derive(Debug, Clone)]
pub struct DepthSnapshot {
    pub pair: String,
    pub last_update_id: i64,
    pub levels: HashMap<String, f64>,
}

/// A reconciled order-book state: the snapshot-plus-deltas merge the
/// order-book worker emits on its interval. Archived as one JSON line per
/// emission for `save_pairs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthState {
    pub server_timestamp: i64,
    pub bids: HashMap<String, f64>,
    pub asks: HashMap<String, f64>,
}

/// Direction of a trade signal emitted by the analysis worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSide {
    Buy,
    Sell,
}

impl std::fmt::Display for SignalSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// A buy/sell event for the executor, carrying the joint probability that
/// crossed the configured threshold.
#[derive(Debug, Clone, Serialize)]
pub struct TradeSignal {
    pub pair: String,
    pub side: SignalSide,
    pub timestamp: i64,
    pub probability: f32,
}

/// Summary of one closed trading period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodSummary {
    pub time_bin: i64,
    pub total_quantity: f32,
    pub num_trades: usize,
    pub avg_price: f32,
    pub low: f32,
    pub high: f32,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_status_round_trip() {
        for s in [
            "NOT_CONNECTED",
            "CONNECTING",
            "CONNECTED",
            "RATE_LIMITED",
            "ERROR",
        ] {
            let status: ConnectionStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
    }

    #[test]
    fn connection_status_rejects_unknown() {
        assert!("DISCONNECTED".parse::<ConnectionStatus>().is_err());
        assert!("".parse::<ConnectionStatus>().is_err());
        assert!("connected".parse::<ConnectionStatus>().is_err());
    }

    #[test]
    fn trade_archive_field_names() {
        let trade = Trade {
            trade_timestamp: 1_514_764_800_000,
            server_timestamp: 1_514_764_800_123,
            price: 13250.5,
            quantity: 0.25,
            is_buyer_maker: false,
            buyer_id: 11,
            seller_id: 12,
            low24: 12000.0,
            high24: 14000.0,
            vol24: 35000.0,
        };
        let json = serde_json::to_value(&trade).unwrap();
        assert_eq!(json["trade_timestamp"], 1_514_764_800_000_i64);
        assert_eq!(json["is_buyer_maker"], false);
        assert_eq!(json["low24"], 12000.0);
    }

    #[test]
    fn trade_missing_ticker_fields_default_to_zero() {
        let json = r#"{
            "trade_timestamp": 1, "server_timestamp": 2, "price": 3.0,
            "quantity": 4.0, "is_buyer_maker": true, "buyer_id": 5, "seller_id": 6
        }"#;
        let trade: Trade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.low24, 0.0);
        assert_eq!(trade.vol24, 0.0);
    }
}
