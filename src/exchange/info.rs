// =============================================================================
// Exchange metadata — trading pair parameters and account balances
// =============================================================================
//
// Pair filters arrive as decimal strings; everything that later gates order
// placement (step sizes, quantity bounds, price bounds, minimum notional) is
// converted to integer unit amounts at the pair's own precisions so no
// precision is lost at the trust boundary.
// =============================================================================

use std::collections::HashMap;

use anyhow::{ensure, Context, Result};
use tracing::warn;

use crate::units::num_str_to_int_units;

/// Immutable per-pair trading parameters from the exchange metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairInfo {
    pub base_symbol: String,
    pub quote_symbol: String,
    pub base_precision: usize,
    pub base_step_size: i64,
    pub min_base_qty: i64,
    pub max_base_qty: i64,
    pub quote_precision: usize,
    pub quote_step_size: i64,
    pub min_quote_price: i64,
    pub max_quote_price: i64,
    /// Minimum base×quote notional, at combined precision.
    pub min_notional_product: i64,
}

/// Parse the `exchangeInfo` response into a map of pair infos keyed by
/// canonical lowercase symbol pair.
///
/// Only symbols in TRADING status that accept LIMIT orders are included.
/// Symbols missing a required filter are skipped with a warning rather than
/// failing the whole refresh.
pub fn parse_exchange_pair_infos(
    exchange_info: &serde_json::Value,
) -> Result<HashMap<String, PairInfo>> {
    let symbols = exchange_info["symbols"]
        .as_array()
        .context("exchangeInfo response missing symbols array")?;

    let mut pair_infos = HashMap::new();

    for symbol in symbols {
        let pair = match symbol["symbol"].as_str() {
            Some(s) => s.to_lowercase(),
            None => continue,
        };

        if symbol["status"].as_str() != Some("TRADING") {
            continue;
        }

        let limit_supported = symbol["orderTypes"]
            .as_array()
            .map(|types| types.iter().any(|t| t.as_str() == Some("LIMIT")))
            .unwrap_or(false);
        if !limit_supported {
            continue;
        }

        match parse_pair_info(symbol) {
            Ok(info) => {
                pair_infos.insert(pair, info);
            }
            Err(e) => {
                warn!(pair = %pair, error = %e, "skipping pair with incomplete metadata");
            }
        }
    }

    Ok(pair_infos)
}

fn parse_pair_info(symbol: &serde_json::Value) -> Result<PairInfo> {
    let base_symbol = symbol["baseAsset"]
        .as_str()
        .context("missing baseAsset")?
        .to_lowercase();
    let quote_symbol = symbol["quoteAsset"]
        .as_str()
        .context("missing quoteAsset")?
        .to_lowercase();
    let base_precision = symbol["baseAssetPrecision"]
        .as_u64()
        .context("missing baseAssetPrecision")? as usize;
    let quote_precision = symbol["quotePrecision"]
        .as_u64()
        .context("missing quotePrecision")? as usize;

    let mut base_step_size = None;
    let mut min_base_qty = None;
    let mut max_base_qty = None;
    let mut quote_step_size = None;
    let mut min_quote_price = None;
    let mut max_quote_price = None;
    let mut min_notional_product = None;

    let filters = symbol["filters"].as_array().context("missing filters")?;

    for filter in filters {
        match filter["filterType"].as_str() {
            Some("PRICE_FILTER") => {
                min_quote_price = Some(num_str_to_int_units(
                    filter["minPrice"].as_str().context("missing minPrice")?,
                    quote_precision,
                )?);
                max_quote_price = Some(num_str_to_int_units(
                    filter["maxPrice"].as_str().context("missing maxPrice")?,
                    quote_precision,
                )?);
                quote_step_size = Some(num_str_to_int_units(
                    filter["tickSize"].as_str().context("missing tickSize")?,
                    quote_precision,
                )?);
            }
            Some("LOT_SIZE") => {
                min_base_qty = Some(num_str_to_int_units(
                    filter["minQty"].as_str().context("missing minQty")?,
                    base_precision,
                )?);
                max_base_qty = Some(num_str_to_int_units(
                    filter["maxQty"].as_str().context("missing maxQty")?,
                    base_precision,
                )?);
                base_step_size = Some(num_str_to_int_units(
                    filter["stepSize"].as_str().context("missing stepSize")?,
                    base_precision,
                )?);
            }
            Some("MIN_NOTIONAL") => {
                min_notional_product = Some(num_str_to_int_units(
                    filter["minNotional"]
                        .as_str()
                        .context("missing minNotional")?,
                    quote_precision + base_precision,
                )?);
            }
            _ => {}
        }
    }

    Ok(PairInfo {
        base_symbol,
        quote_symbol,
        base_precision,
        base_step_size: base_step_size.context("missing LOT_SIZE filter")?,
        min_base_qty: min_base_qty.context("missing LOT_SIZE filter")?,
        max_base_qty: max_base_qty.context("missing LOT_SIZE filter")?,
        quote_precision,
        quote_step_size: quote_step_size.context("missing PRICE_FILTER filter")?,
        min_quote_price: min_quote_price.context("missing PRICE_FILTER filter")?,
        max_quote_price: max_quote_price.context("missing PRICE_FILTER filter")?,
        min_notional_product: min_notional_product.context("missing MIN_NOTIONAL filter")?,
    })
}

/// Parse the signed account response into `(free, locked)` balance maps in
/// integer unit amounts at `balance_precision`, keyed by lowercase asset.
#[allow(clippy::type_complexity)]
pub fn parse_account_balances(
    account_info: &serde_json::Value,
    balance_precision: usize,
) -> Result<(HashMap<String, i64>, HashMap<String, i64>)> {
    ensure!(
        account_info["canTrade"].as_bool().unwrap_or(false),
        "account is not permitted to trade"
    );

    let balances = account_info["balances"]
        .as_array()
        .context("account response missing balances array")?;

    let mut free_balances = HashMap::new();
    let mut locked_balances = HashMap::new();

    for balance in balances {
        let asset = balance["asset"]
            .as_str()
            .context("balance missing asset")?
            .to_lowercase();
        let free = num_str_to_int_units(
            balance["free"].as_str().context("balance missing free")?,
            balance_precision,
        )?;
        let locked = num_str_to_int_units(
            balance["locked"].as_str().context("balance missing locked")?,
            balance_precision,
        )?;
        free_balances.insert(asset.clone(), free);
        locked_balances.insert(asset, locked);
    }

    Ok((free_balances, locked_balances))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn sample_exchange_info() -> serde_json::Value {
        serde_json::json!({
            "symbols": [
                {
                    "symbol": "BTCUSDT",
                    "status": "TRADING",
                    "orderTypes": ["LIMIT", "MARKET"],
                    "baseAsset": "BTC",
                    "baseAssetPrecision": 8,
                    "quoteAsset": "USDT",
                    "quotePrecision": 8,
                    "filters": [
                        {
                            "filterType": "PRICE_FILTER",
                            "minPrice": "0.01000000",
                            "maxPrice": "1000000.00000000",
                            "tickSize": "0.01000000"
                        },
                        {
                            "filterType": "LOT_SIZE",
                            "minQty": "0.00001000",
                            "maxQty": "9000.00000000",
                            "stepSize": "0.00001000"
                        },
                        {
                            "filterType": "MIN_NOTIONAL",
                            "minNotional": "0.00100000"
                        }
                    ]
                },
                {
                    "symbol": "DELISTED",
                    "status": "BREAK",
                    "orderTypes": ["LIMIT"],
                    "baseAsset": "DEL",
                    "baseAssetPrecision": 8,
                    "quoteAsset": "USDT",
                    "quotePrecision": 8,
                    "filters": []
                }
            ]
        })
    }

    #[test]
    fn parses_trading_pairs_only() {
        let infos = parse_exchange_pair_infos(&sample_exchange_info()).unwrap();
        assert_eq!(infos.len(), 1);

        let info = &infos["btcusdt"];
        assert_eq!(info.base_symbol, "btc");
        assert_eq!(info.quote_symbol, "usdt");
        assert_eq!(info.min_quote_price, 1_000_000);
        assert_eq!(info.max_quote_price, 100_000_000_000_000);
        assert_eq!(info.quote_step_size, 1_000_000);
        assert_eq!(info.min_base_qty, 1_000);
        assert_eq!(info.max_base_qty, 900_000_000_000);
        assert_eq!(info.base_step_size, 1_000);
        // Combined precision 16: 0.001 => 10^13.
        assert_eq!(info.min_notional_product, 10_000_000_000_000);
    }

    #[test]
    fn skips_pair_with_missing_filters() {
        let mut info = sample_exchange_info();
        info["symbols"][0]["filters"] = serde_json::json!([]);
        let infos = parse_exchange_pair_infos(&info).unwrap();
        assert!(infos.is_empty());
    }

    #[test]
    fn account_balances_parse_to_unit_amounts() {
        let account = serde_json::json!({
            "canTrade": true,
            "balances": [
                {"asset": "BTC", "free": "0.50000000", "locked": "0.00000000"},
                {"asset": "USDT", "free": "1000.00000000", "locked": "25.00000000"}
            ]
        });
        let (free, locked) = parse_account_balances(&account, 8).unwrap();
        assert_eq!(free["btc"], 50_000_000);
        assert_eq!(free["usdt"], 100_000_000_000);
        assert_eq!(locked["usdt"], 2_500_000_000);
    }

    #[test]
    fn account_without_trade_permission_rejected() {
        let account = serde_json::json!({"canTrade": false, "balances": []});
        assert!(parse_account_balances(&account, 8).is_err());
    }
}
