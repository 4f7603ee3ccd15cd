// =============================================================================
// Socket Stream Worker — multiplexed exchange event stream
// =============================================================================
//
// Event-driven: owns one websocket against the URI the connection worker
// built, opened when the session is CONNECTED and has settled for one
// second, closed as soon as either stops holding. Each inbound frame is a
// combined-stream envelope `{"data": {"e": kind, "E": event_ms, ...}}`.
//
// A parse failure on a single frame drops that frame and nothing else; an
// isolated bad message must never kill the stream.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::config::Config;
use crate::exchange::client::parse_depth_levels;
use crate::types::{ConnectionStatus, DepthEvent, Trade};

/// Most recent 24-hour ticker values per pair, stamped into every trade.
#[derive(Default)]
pub struct TickerCaches {
    lows: HashMap<String, f64>,
    highs: HashMap<String, f64>,
    vols: HashMap<String, f64>,
}

/// Run the socket stream until the process shuts down. Reconnects whenever
/// the session drops and re-arms.
pub async fn run_socket_stream(state: Arc<AppState>, config: Config) {
    let mut caches = TickerCaches::default();
    let poll = tokio::time::Duration::from_millis(config.proc_update_res.max(1));

    loop {
        if !stream_should_be_open(&state) {
            tokio::time::sleep(poll).await;
            continue;
        }

        let uri = state.ws_uri();
        if uri.is_empty() {
            tokio::time::sleep(poll).await;
            continue;
        }

        info!(uri = %uri, "connecting to exchange stream");
        let connect = tokio::time::timeout(
            tokio::time::Duration::from_secs(config.connect_timeout),
            connect_async(&uri),
        );

        let ws_stream = match connect.await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                warn!(error = %e, "exchange stream connect failed");
                tokio::time::sleep(poll).await;
                continue;
            }
            Err(_) => {
                warn!("exchange stream connect timed out");
                tokio::time::sleep(poll).await;
                continue;
            }
        };

        info!("exchange stream connected");
        let (_write, mut read) = ws_stream.split();
        let mut status_check = tokio::time::interval(poll);

        loop {
            tokio::select! {
                // Close the socket as soon as the session stops holding.
                _ = status_check.tick() => {
                    if !stream_should_be_open(&state) {
                        info!("session no longer connected — closing exchange stream");
                        break;
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                            handle_frame(&state, &mut caches, &text);
                        }
                        Some(Ok(_)) => {
                            // Ping/Pong/Binary frames; tungstenite answers
                            // pings automatically.
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "exchange stream read error");
                            break;
                        }
                        None => {
                            warn!("exchange stream ended");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// The stream is held open only while CONNECTED and at least one second past
/// connect, so the session has settled before frames are consumed.
fn stream_should_be_open(state: &AppState) -> bool {
    state.connection_status() == ConnectionStatus::Connected
        && state.server_time() - state.connect_time() >= 1_000
}

/// Parse and dispatch one stream frame. Failures drop the frame.
pub fn handle_frame(state: &AppState, caches: &mut TickerCaches, raw: &str) {
    let root: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "dropping unparseable frame");
            return;
        }
    };

    let data = &root["data"];
    let Some(event_kind) = data["e"].as_str() else {
        debug!("dropping frame without event kind");
        return;
    };

    // Every event advances the shared server clock, never rewinds it.
    let Some(event_ms) = data["E"].as_i64() else {
        debug!("dropping frame without event time");
        return;
    };
    state.advance_server_time(event_ms);

    let handled = match event_kind {
        "trade" => process_trade_event(state, caches, data),
        "24hrTicker" => process_ticker_event(caches, data),
        "depthUpdate" => process_depth_event(state, data),
        // Hooks for the executor and balance tracking.
        "executionReport" | "outboundAccountInfo" => {
            debug!(event = event_kind, "user-stream event received");
            Some(())
        }
        other => {
            debug!(event = other, "ignoring unknown event kind");
            Some(())
        }
    };

    if handled.is_none() {
        debug!(event = event_kind, "dropping malformed frame");
    }
}

fn process_trade_event(
    state: &AppState,
    caches: &TickerCaches,
    data: &serde_json::Value,
) -> Option<()> {
    let pair = data["s"].as_str()?.to_lowercase();

    let trade = Trade {
        trade_timestamp: data["T"].as_i64()?,
        server_timestamp: state.server_time(),
        price: data["p"].as_str()?.parse().ok()?,
        quantity: data["q"].as_str()?.parse().ok()?,
        is_buyer_maker: data["m"].as_bool()?,
        buyer_id: data["b"].as_i64()?,
        seller_id: data["a"].as_i64()?,
        low24: caches.lows.get(&pair).copied().unwrap_or(0.0),
        high24: caches.highs.get(&pair).copied().unwrap_or(0.0),
        vol24: caches.vols.get(&pair).copied().unwrap_or(0.0),
    };

    state.trade_queue.push((pair, trade));
    Some(())
}

fn process_ticker_event(caches: &mut TickerCaches, data: &serde_json::Value) -> Option<()> {
    let pair = data["s"].as_str()?.to_lowercase();

    caches
        .lows
        .insert(pair.clone(), data["l"].as_str()?.parse().ok()?);
    caches
        .highs
        .insert(pair.clone(), data["h"].as_str()?.parse().ok()?);
    caches
        .vols
        .insert(pair, data["v"].as_str()?.parse().ok()?);
    Some(())
}

fn process_depth_event(state: &AppState, data: &serde_json::Value) -> Option<()> {
    let pair = data["s"].as_str()?.to_lowercase();

    // The wire carries the first (U) and final (u) update id covered by the
    // delta; both are shifted down by one before queueing so the merge
    // compares them directly against snapshot lastUpdateId values.
    let prev_update_id = data["U"].as_i64()? - 1;
    let last_update_id = data["u"].as_i64()? - 1;

    let bid_updates = parse_depth_levels(&data["b"]).ok()?;
    let ask_updates = parse_depth_levels(&data["a"]).ok()?;

    state.bid_depth_event_queue.push(DepthEvent {
        pair: pair.clone(),
        prev_update_id,
        last_update_id,
        updates: bid_updates,
    });
    state.ask_depth_event_queue.push(DepthEvent {
        pair,
        prev_update_id,
        last_update_id,
        updates: ask_updates,
    });
    Some(())
}
