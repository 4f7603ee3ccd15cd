// =============================================================================
// Configuration — JSON settings file with line comments
// =============================================================================
//
// The config file is JSON with `//` line comments stripped before parsing.
// Every field has a serde default so that older files missing new fields
// still deserialise. Symbol pairs are lowercased on load; queues, archive
// filenames, and websocket stream names all use the lowercase form.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_proc_update_res() -> u64 {
    250
}

fn default_period_time() -> i64 {
    60_000
}

fn default_num_depth_bins() -> usize {
    16
}

fn default_depth_snapshot_interval() -> u64 {
    30
}

fn default_orderbook_interval() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_session_time() -> u64 {
    43_200
}

fn default_account_recv_window() -> u64 {
    5_000
}

fn default_data_store_dir() -> String {
    "data_store".to_string()
}

fn default_ui_host_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_ui_host_port() -> u16 {
    8080
}

fn default_trade_history_length() -> usize {
    8
}

fn default_buy_threshold() -> f32 {
    0.75
}

fn default_sell_threshold() -> f32 {
    0.75
}

// =============================================================================
// Config
// =============================================================================

/// Top-level settings shared by every worker in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tick period in milliseconds for every tick-driven worker.
    #[serde(default = "default_proc_update_res")]
    pub proc_update_res: u64,

    /// Trading-period length in milliseconds.
    #[serde(default = "default_period_time")]
    pub period_time: i64,

    /// Width of the reduced depth histogram.
    #[serde(default = "default_num_depth_bins")]
    pub num_depth_bins: usize,

    /// Pairs the analysis worker computes features and signals for.
    #[serde(default)]
    pub trade_pairs: Vec<String>,

    /// Pairs whose raw trades and depth states are archived to disk.
    #[serde(default)]
    pub save_pairs: Vec<String>,

    /// Seconds between REST depth snapshot requests per pair.
    #[serde(default = "default_depth_snapshot_interval")]
    pub depth_snapshot_interval: u64,

    /// Seconds between merged depth-state emissions.
    #[serde(default = "default_orderbook_interval")]
    pub orderbook_interval: u64,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// HTTP/websocket connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Seconds before a session is proactively rotated.
    #[serde(default = "default_max_session_time")]
    pub max_session_time: u64,

    /// recvWindow in milliseconds for signed account requests.
    #[serde(default = "default_account_recv_window")]
    pub account_recv_window: u64,

    /// Exchange API key for signed endpoints.
    #[serde(default)]
    pub api_key: String,

    /// Exchange API secret used exclusively for HMAC signing.
    #[serde(default)]
    pub api_secret: String,

    /// Root directory of the recorded session archive.
    #[serde(default = "default_data_store_dir")]
    pub data_store_dir: String,

    /// UI websocket bind address.
    #[serde(default = "default_ui_host_ip")]
    pub ui_host_ip: String,

    /// UI websocket bind port.
    #[serde(default = "default_ui_host_port")]
    pub ui_host_port: u16,

    /// Ring size of the per-pair probability history.
    #[serde(default = "default_trade_history_length")]
    pub trade_history_length: usize,

    /// Joint-probability level that triggers a buy event.
    #[serde(default = "default_buy_threshold")]
    pub buy_threshold: f32,

    /// Joint-probability level that triggers a sell event.
    #[serde(default = "default_sell_threshold")]
    pub sell_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config deserialises from defaults")
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`, stripping `//` line
    /// comments first and lowercasing the symbol pair lists.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let stripped = strip_line_comments(&raw);

        let mut config: Self = serde_json::from_str(&stripped)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        config.trade_pairs = config
            .trade_pairs
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        config.save_pairs = config.save_pairs.iter().map(|p| p.to_lowercase()).collect();

        info!(
            path = %path.display(),
            trade_pairs = ?config.trade_pairs,
            save_pairs = ?config.save_pairs,
            "config loaded"
        );

        Ok(config)
    }

    /// All pairs any market-data worker must subscribe to: the union of
    /// trading pairs and archive pairs, trading pairs first.
    pub fn active_pairs(&self) -> Vec<String> {
        let mut pairs = self.trade_pairs.clone();
        for pair in &self.save_pairs {
            if !pairs.contains(pair) {
                pairs.push(pair.clone());
            }
        }
        pairs
    }
}

/// Remove `//` line comments. Everything from the first `//` on a line to
/// the end of the line is dropped.
fn strip_line_comments(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        match line.find("//") {
            Some(pos) => out.push_str(&line[..pos]),
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_json() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.proc_update_res, 250);
        assert_eq!(cfg.period_time, 60_000);
        assert_eq!(cfg.num_depth_bins, 16);
        assert_eq!(cfg.trade_history_length, 8);
        assert!(cfg.trade_pairs.is_empty());
    }

    #[test]
    fn strips_line_comments() {
        let raw = r#"{
            // tick period
            "proc_update_res": 100, // trailing comment
            "period_time": 30000
        }"#;
        let stripped = strip_line_comments(raw);
        let cfg: Config = serde_json::from_str(&stripped).unwrap();
        assert_eq!(cfg.proc_update_res, 100);
        assert_eq!(cfg.period_time, 30_000);
    }

    #[test]
    fn load_lowercases_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // symbols
                "trade_pairs": ["BTCUSDT"],
                "save_pairs": ["EthUsdt", "btcusdt"]
            }"#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.trade_pairs, vec!["btcusdt"]);
        assert_eq!(cfg.save_pairs, vec!["ethusdt", "btcusdt"]);
        assert_eq!(cfg.active_pairs(), vec!["btcusdt", "ethusdt"]);
    }

    #[test]
    fn active_pairs_deduplicates() {
        let cfg = Config {
            trade_pairs: vec!["btcusdt".into()],
            save_pairs: vec!["btcusdt".into(), "ethusdt".into()],
            ..Config::default()
        };
        assert_eq!(cfg.active_pairs(), vec!["btcusdt", "ethusdt"]);
    }
}
