use crate::types::{Interval, Snapshot};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const BINANCE_BASE_URLS: &[&str] = &["https://api.binance.com", "https://data-api.binance.vision"];

const KLINE_LIMIT: usize = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a snapshot could not be produced this cycle. Always recoverable:
/// the caller skips the instrument and tries again next cycle.
#[derive(Error, Debug)]
pub enum Unavailable {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("rate limited (HTTP {0})")]
    RateLimited(u16),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, instrument_id: &str, interval: Interval) -> Result<Snapshot, Unavailable>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kline {
    pub open_time_ms: i64,
    pub high: f64,
    pub close: f64,
    pub volume: f64,
}

/// Binance spot klines, tried against each base URL in order.
#[derive(Clone)]
pub struct BinanceSource {
    client: Client,
    base_urls: Vec<String>,
    limit: usize,
}

impl BinanceSource {
    pub fn new() -> Self {
        Self::with_base_urls(BINANCE_BASE_URLS.iter().map(|s| s.to_string()).collect())
    }

    pub fn with_base_urls(base_urls: Vec<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_urls,
            limit: KLINE_LIMIT,
        }
    }

    async fn fetch_from(&self, base_url: &str, symbol: &str, interval: Interval) -> Result<Vec<Kline>, Unavailable> {
        let response = self
            .client
            .get(format!("{}/api/v3/klines", base_url.trim_end_matches('/')))
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", interval.as_str().to_string()),
                ("limit", self.limit.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(Unavailable::RateLimited(status.as_u16()));
        }
        if !status.is_success() {
            return Err(Unavailable::Status(status.as_u16()));
        }

        let body: JsonValue = response.json().await?;
        parse_klines(&body)
    }
}

impl Default for BinanceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for BinanceSource {
    async fn fetch(&self, instrument_id: &str, interval: Interval) -> Result<Snapshot, Unavailable> {
        let mut last_err = Unavailable::Malformed("no endpoints configured".into());
        for base_url in &self.base_urls {
            match self.fetch_from(base_url, instrument_id, interval).await {
                Ok(klines) => {
                    debug!("{} {}: {} klines from {}", instrument_id, interval, klines.len(), base_url);
                    return snapshot_from_klines(instrument_id, interval, &klines);
                }
                Err(e) => {
                    warn!("[Binance] {} {} via {} failed: {}", instrument_id, interval, base_url, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

fn decimal_field(row: &[JsonValue], idx: usize) -> Result<f64, Unavailable> {
    let value = row
        .get(idx)
        .and_then(|v| match v {
            JsonValue::String(s) => s.parse::<f64>().ok(),
            JsonValue::Number(n) => n.as_f64(),
            _ => None,
        })
        .ok_or_else(|| Unavailable::Malformed(format!("field {} missing or not numeric", idx)))?;
    if !value.is_finite() || value < 0.0 {
        return Err(Unavailable::Malformed(format!("field {} out of range: {}", idx, value)));
    }
    Ok(value)
}

/// Parses the `/api/v3/klines` array-of-arrays payload.
pub fn parse_klines(body: &JsonValue) -> Result<Vec<Kline>, Unavailable> {
    let rows = body
        .as_array()
        .ok_or_else(|| Unavailable::Malformed("expected a JSON array".into()))?;

    rows.iter()
        .map(|row| {
            let row = row
                .as_array()
                .ok_or_else(|| Unavailable::Malformed("kline row is not an array".into()))?;
            let open_time_ms = row
                .first()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| Unavailable::Malformed("kline open time missing".into()))?;
            Ok(Kline {
                open_time_ms,
                high: decimal_field(row, 2)?,
                close: decimal_field(row, 4)?,
                volume: decimal_field(row, 5)?,
            })
        })
        .collect()
}

pub fn snapshot_from_klines(instrument_id: &str, interval: Interval, klines: &[Kline]) -> Result<Snapshot, Unavailable> {
    let last = klines
        .last()
        .ok_or_else(|| Unavailable::Malformed(format!("no klines for {}", instrument_id)))?;
    let prior = klines.len().checked_sub(2).and_then(|i| klines.get(i));

    let timestamp = Utc
        .timestamp_millis_opt(last.open_time_ms)
        .single()
        .ok_or_else(|| Unavailable::Malformed(format!("bad open time {}", last.open_time_ms)))?;

    Ok(Snapshot {
        instrument_id: instrument_id.to_string(),
        interval,
        timestamp,
        close_price: last.close,
        prior_close_price: prior.map(|k| k.close),
        volume: last.volume,
        prior_volume: prior.map(|k| k.volume),
        recent_closes: klines.iter().map(|k| k.close).collect(),
        recent_highs: klines.iter().map(|k| k.high).collect(),
        recent_volumes: klines.iter().map(|k| k.volume).collect(),
    })
}
