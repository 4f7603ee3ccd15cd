// =============================================================================
// Exchange REST Client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. Signed requests
// carry X-MBX-APIKEY as a header; the signature is appended to the query
// string. An HTTP 429 from any endpoint is surfaced as
// `RestOutcome::RateLimited` rather than an error, so callers can latch the
// rate-limit state without unwinding.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const REST_URL: &str = "https://www.binance.com/api";

/// Result of a REST call that may be rate limited. Any other failure is a
/// hard `Err` for the caller's error policy to handle.
#[derive(Debug)]
pub enum RestOutcome<T> {
    Ok(T),
    RateLimited,
}

/// Response of a timed GET against an endpoint that reports `serverTime`.
#[derive(Debug, Clone)]
pub struct TimedInfo {
    pub body: serde_json::Value,
    /// Measured request round trip in milliseconds.
    pub rtt_ms: i64,
}

/// REST client for the exchange API.
#[derive(Clone)]
pub struct ExchangeClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl ExchangeClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_key`    — API key (sent as a header, never in query params).
    /// * `secret`     — secret key used exclusively for HMAC signing.
    /// * `request_timeout` — per-request timeout in seconds.
    /// * `connect_timeout` — TCP connect timeout in seconds.
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        request_timeout: u64,
        connect_timeout: u64,
    ) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        default_headers.insert("Accept", HeaderValue::from_static("application/json"));
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(request_timeout))
            .connect_timeout(Duration::from_secs(connect_timeout))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key,
            secret,
            base_url: REST_URL.to_string(),
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    pub fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Append the signature to an already-built query string.
    pub fn signed_query(&self, params: &str) -> String {
        let sig = self.sign(params);
        format!("{params}&signature={sig}")
    }

    /// Current wall-clock time in UNIX milliseconds.
    pub fn wall_clock_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as i64
    }

    // -------------------------------------------------------------------------
    // Timed public endpoints
    // -------------------------------------------------------------------------

    /// Unsigned GET measuring the round trip, for endpoints whose response
    /// carries `serverTime` (`/v1/time`, `/v1/exchangeInfo`).
    async fn get_timed(&self, path: &str) -> Result<RestOutcome<TimedInfo>> {
        let url = format!("{}{}", self.base_url, path);
        let t0 = Instant::now();

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let rtt_ms = t0.elapsed().as_millis() as i64;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(RestOutcome::RateLimited);
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("GET {path} returned {status}: {body}");
        }

        debug!(path, rtt_ms, "timed request complete");
        Ok(RestOutcome::Ok(TimedInfo { body, rtt_ms }))
    }

    /// GET /v1/time.
    pub async fn server_time(&self) -> Result<RestOutcome<TimedInfo>> {
        self.get_timed("/v1/time").await
    }

    /// GET /v1/exchangeInfo (also reports `serverTime`, so it doubles as a
    /// time resync).
    pub async fn exchange_info(&self) -> Result<RestOutcome<TimedInfo>> {
        self.get_timed("/v1/exchangeInfo").await
    }

    // -------------------------------------------------------------------------
    // Depth
    // -------------------------------------------------------------------------

    /// GET /v1/depth for the top 100 levels of `pair` (canonical lowercase;
    /// upper-cased on the wire).
    ///
    /// Returns `(lastUpdateId, bids, asks)` with price-level strings kept
    /// verbatim as map keys.
    #[allow(clippy::type_complexity)]
    pub async fn depth(
        &self,
        pair: &str,
    ) -> Result<RestOutcome<(i64, HashMap<String, f64>, HashMap<String, f64>)>> {
        let url = format!(
            "{}/v1/depth?symbol={}&limit=100",
            self.base_url,
            pair.to_uppercase()
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /v1/depth request failed")?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(RestOutcome::RateLimited);
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse depth response")?;

        if !status.is_success() {
            anyhow::bail!("GET /v1/depth returned {status}: {body}");
        }

        let update_id = body["lastUpdateId"]
            .as_i64()
            .context("depth response missing lastUpdateId")?;
        let bids = parse_depth_levels(&body["bids"]).context("depth response missing bids")?;
        let asks = parse_depth_levels(&body["asks"]).context("depth response missing asks")?;

        Ok(RestOutcome::Ok((update_id, bids, asks)))
    }

    // -------------------------------------------------------------------------
    // Signed account endpoint
    // -------------------------------------------------------------------------

    /// GET /v3/account (signed). The caller supplies the timestamp so the
    /// signature reflects the drift-corrected server clock.
    pub async fn account(
        &self,
        recv_window: u64,
        timestamp: i64,
    ) -> Result<RestOutcome<serde_json::Value>> {
        let params = format!("recvWindow={recv_window}&timestamp={timestamp}");
        let qs = self.signed_query(&params);
        let url = format!("{}/v3/account?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /v3/account request failed")?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(RestOutcome::RateLimited);
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse account response")?;

        if !status.is_success() {
            anyhow::bail!("GET /v3/account returned {status}: {body}");
        }

        Ok(RestOutcome::Ok(body))
    }

    // -------------------------------------------------------------------------
    // User data stream
    // -------------------------------------------------------------------------

    /// POST /v1/userDataStream — open a user-data stream, returning its
    /// listen key.
    pub async fn open_user_stream(&self) -> Result<RestOutcome<String>> {
        let url = format!("{}/v1/userDataStream", self.base_url);

        let resp = self
            .client
            .post(&url)
            .body("")
            .send()
            .await
            .context("POST /v1/userDataStream request failed")?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(RestOutcome::RateLimited);
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse userDataStream response")?;

        if !status.is_success() {
            anyhow::bail!("POST /v1/userDataStream returned {status}: {body}");
        }

        let listen_key = body["listenKey"]
            .as_str()
            .context("userDataStream response missing listenKey")?
            .to_string();

        Ok(RestOutcome::Ok(listen_key))
    }

    /// PUT /v1/userDataStream — keepalive ping for an open stream.
    pub async fn keepalive_user_stream(&self, listen_key: &str) -> Result<RestOutcome<()>> {
        let url = format!("{}/v1/userDataStream", self.base_url);

        let resp = self
            .client
            .put(&url)
            .body(format!("listenKey={listen_key}"))
            .send()
            .await
            .context("PUT /v1/userDataStream request failed")?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(RestOutcome::RateLimited);
        }

        if !status.is_success() {
            anyhow::bail!("PUT /v1/userDataStream returned {status}");
        }

        Ok(RestOutcome::Ok(()))
    }
}

/// Parse a depth level array (`[["price", "qty", ...], ...]`) into a
/// price-string → quantity map. Trailing elements per level are ignored.
pub fn parse_depth_levels(levels: &serde_json::Value) -> Result<HashMap<String, f64>> {
    let arr = levels.as_array().context("depth levels is not an array")?;

    let mut out = HashMap::with_capacity(arr.len());
    for entry in arr {
        let level = entry
            .get(0)
            .and_then(|v| v.as_str())
            .context("depth level missing price")?;
        let qty: f64 = entry
            .get(1)
            .and_then(|v| v.as_str())
            .context("depth level missing quantity")?
            .parse()
            .context("failed to parse depth quantity")?;
        out.insert(level.to_string(), qty);
    }
    Ok(out)
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
