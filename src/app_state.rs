// =============================================================================
// Central Application State — shared scalars, dirty tracking, worker queues
// =============================================================================
//
// The single object shared by every worker task via `Arc<AppState>`.
//
// UI-visible scalars live behind one `parking_lot::Mutex` together with a
// dirty bit per field. Every setter marks its field dirty under the lock, so
// a subscriber draining `write_updates` sees each mutation exactly once.
//
// The typed queues connecting the workers are unbounded channels; producers
// push without blocking and consumers drain until empty on their tick. The
// replay driver is the only producer that waits for emptiness before
// pushing, which couples replay speed to analysis speed.
// =============================================================================

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;

use crate::types::{ConnectionStatus, DepthEvent, DepthSnapshot, DepthState, Trade, TradeSignal};

// =============================================================================
// UI push message
// =============================================================================

/// One push message for the UI transport: `{"type": "SET_X", "payload": V}`.
#[derive(Debug, Clone, Serialize)]
pub struct UiMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub payload: serde_json::Value,
}

// =============================================================================
// Queue
// =============================================================================

/// An unbounded channel with both endpoints held together, so any worker
/// with an `Arc<AppState>` can produce or drain.
pub struct Queue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Queue<T> {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Non-blocking push. Cannot fail while the state is alive because the
    /// receiving endpoint is owned by the same struct.
    pub fn push(&self, item: T) {
        let _ = self.tx.send(item);
    }

    /// Non-blocking pop; `None` when the queue is currently empty.
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

// =============================================================================
// Scalar record
// =============================================================================

#[derive(Default)]
struct DirtyFlags {
    latency: bool,
    server_time: bool,
    connect_time: bool,
    connection_status: bool,
    fatal_error: bool,
    error_msg: bool,
    trade_pairs: bool,
    save_pairs: bool,
}

#[derive(Default)]
struct Scalars {
    latency: i64,
    server_time: i64,
    connect_time: i64,
    connection_status: ConnectionStatus,
    fatal_error: bool,
    error_msg: Option<String>,
    trade_pairs: Vec<String>,
    save_pairs: Vec<String>,
    dirty: DirtyFlags,
}

impl Scalars {
    fn message_for(&self, field: &'static str) -> UiMessage {
        let payload = match field {
            "SET_LATENCY" => json!(self.latency),
            "SET_SERVER_TIME" => json!(self.server_time),
            "SET_CONNECT_TIME" => json!(self.connect_time),
            "SET_CONNECTION_STATUS" => json!(self.connection_status.to_string()),
            "SET_FATAL_ERROR" => json!(self.fatal_error),
            "SET_ERROR_MSG" => json!(self.error_msg),
            "SET_TRADE_PAIRS" => json!(self.trade_pairs),
            "SET_SAVE_PAIRS" => json!(self.save_pairs),
            _ => unreachable!("unknown UI field {field}"),
        };
        UiMessage {
            kind: field,
            payload,
        }
    }
}

// =============================================================================
// AppState
// =============================================================================

/// Shared application state: UI-visible scalars plus the worker queues.
pub struct AppState {
    scalars: Mutex<Scalars>,

    /// Stream URI the socket worker connects to. Not UI-visible.
    ws_uri: Mutex<String>,

    // ── Worker queues ───────────────────────────────────────────────────
    pub trade_queue: Queue<(String, Trade)>,
    pub bid_depth_event_queue: Queue<DepthEvent>,
    pub ask_depth_event_queue: Queue<DepthEvent>,
    pub bid_snapshot_queue: Queue<DepthSnapshot>,
    pub ask_snapshot_queue: Queue<DepthSnapshot>,
    pub orderbook_state_queue: Queue<(String, DepthState)>,
    pub executor_queue: Queue<TradeSignal>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            scalars: Mutex::new(Scalars::default()),
            ws_uri: Mutex::new(String::new()),
            trade_queue: Queue::new(),
            bid_depth_event_queue: Queue::new(),
            ask_depth_event_queue: Queue::new(),
            bid_snapshot_queue: Queue::new(),
            ask_snapshot_queue: Queue::new(),
            orderbook_state_queue: Queue::new(),
            executor_queue: Queue::new(),
        }
    }

    // ── Scalar accessors ────────────────────────────────────────────────

    /// Server round-trip latency in milliseconds (EWMA).
    pub fn latency(&self) -> i64 {
        self.scalars.lock().latency
    }

    pub fn set_latency(&self, value: i64) {
        let mut s = self.scalars.lock();
        s.latency = value;
        s.dirty.latency = true;
    }

    /// Exchange server time in milliseconds.
    pub fn server_time(&self) -> i64 {
        self.scalars.lock().server_time
    }

    pub fn set_server_time(&self, value: i64) {
        let mut s = self.scalars.lock();
        s.server_time = value;
        s.dirty.server_time = true;
    }

    /// Advance server time monotonically; values behind the current clock
    /// are ignored.
    pub fn advance_server_time(&self, value: i64) {
        let mut s = self.scalars.lock();
        if value > s.server_time {
            s.server_time = value;
            s.dirty.server_time = true;
        }
    }

    /// Time in milliseconds the latest session was opened.
    pub fn connect_time(&self) -> i64 {
        self.scalars.lock().connect_time
    }

    pub fn set_connect_time(&self, value: i64) {
        let mut s = self.scalars.lock();
        s.connect_time = value;
        s.dirty.connect_time = true;
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.scalars.lock().connection_status
    }

    /// The status is a closed enumeration; strings from external callers go
    /// through `ConnectionStatus::from_str`, which rejects unknown values.
    pub fn set_connection_status(&self, value: ConnectionStatus) {
        let mut s = self.scalars.lock();
        s.connection_status = value;
        s.dirty.connection_status = true;
    }

    pub fn fatal_error(&self) -> bool {
        self.scalars.lock().fatal_error
    }

    pub fn set_fatal_error(&self, value: bool) {
        let mut s = self.scalars.lock();
        s.fatal_error = value;
        s.dirty.fatal_error = true;
    }

    pub fn error_msg(&self) -> Option<String> {
        self.scalars.lock().error_msg.clone()
    }

    pub fn set_error_msg(&self, value: impl Into<String>) {
        let mut s = self.scalars.lock();
        s.error_msg = Some(value.into());
        s.dirty.error_msg = true;
    }

    /// Snapshot copy of the trading pair list.
    pub fn trade_pairs(&self) -> Vec<String> {
        self.scalars.lock().trade_pairs.clone()
    }

    pub fn set_trade_pairs(&self, value: Vec<String>) {
        let mut s = self.scalars.lock();
        s.trade_pairs = value;
        s.dirty.trade_pairs = true;
    }

    /// Snapshot copy of the archive pair list.
    pub fn save_pairs(&self) -> Vec<String> {
        self.scalars.lock().save_pairs.clone()
    }

    pub fn set_save_pairs(&self, value: Vec<String>) {
        let mut s = self.scalars.lock();
        s.save_pairs = value;
        s.dirty.save_pairs = true;
    }

    /// Union of trade and save pairs, trade pairs first.
    pub fn active_pairs(&self) -> Vec<String> {
        let s = self.scalars.lock();
        let mut pairs = s.trade_pairs.clone();
        for pair in &s.save_pairs {
            if !pairs.contains(pair) {
                pairs.push(pair.clone());
            }
        }
        pairs
    }

    // ── Stream URI (not UI-visible) ─────────────────────────────────────

    pub fn ws_uri(&self) -> String {
        self.ws_uri.lock().clone()
    }

    pub fn set_ws_uri(&self, value: impl Into<String>) {
        *self.ws_uri.lock() = value.into();
    }

    // ── UI projections ──────────────────────────────────────────────────

    /// Transmit only the scalars whose dirty bit is set and clear those
    /// bits atomically. A second immediate call transmits nothing.
    pub fn write_updates(&self, send: &mut dyn FnMut(&UiMessage)) {
        let mut s = self.scalars.lock();

        if s.dirty.latency {
            send(&s.message_for("SET_LATENCY"));
            s.dirty.latency = false;
        }
        if s.dirty.server_time {
            send(&s.message_for("SET_SERVER_TIME"));
            s.dirty.server_time = false;
        }
        if s.dirty.connect_time {
            send(&s.message_for("SET_CONNECT_TIME"));
            s.dirty.connect_time = false;
        }
        if s.dirty.connection_status {
            send(&s.message_for("SET_CONNECTION_STATUS"));
            s.dirty.connection_status = false;
        }
        if s.dirty.fatal_error {
            send(&s.message_for("SET_FATAL_ERROR"));
            s.dirty.fatal_error = false;
        }
        if s.dirty.error_msg {
            send(&s.message_for("SET_ERROR_MSG"));
            s.dirty.error_msg = false;
        }
        if s.dirty.trade_pairs {
            send(&s.message_for("SET_TRADE_PAIRS"));
            s.dirty.trade_pairs = false;
        }
        if s.dirty.save_pairs {
            send(&s.message_for("SET_SAVE_PAIRS"));
            s.dirty.save_pairs = false;
        }
    }

    /// Transmit the full scalar snapshot regardless of dirty bits. Used when
    /// a fresh UI client connects. Dirty bits are left untouched.
    pub fn write_all(&self, send: &mut dyn FnMut(&UiMessage)) {
        let s = self.scalars.lock();
        for field in [
            "SET_LATENCY",
            "SET_SERVER_TIME",
            "SET_CONNECT_TIME",
            "SET_CONNECTION_STATUS",
            "SET_FATAL_ERROR",
            "SET_ERROR_MSG",
            "SET_TRADE_PAIRS",
            "SET_SAVE_PAIRS",
        ] {
            send(&s.message_for(field));
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
