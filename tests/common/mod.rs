#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use signals_pump::config::SessionConfig;
use signals_pump::market::{DataSource, Unavailable};
use signals_pump::notifier::{Recipients, Transport, TransportError};
use signals_pump::types::{Interval, Snapshot};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Serves queued snapshots per instrument; an empty queue is `Unavailable`.
#[derive(Default)]
pub struct ScriptedSource {
    queues: Mutex<HashMap<String, VecDeque<Option<Snapshot>>>>,
    fallback: Mutex<HashMap<String, Snapshot>>,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    pub fn push(&self, instrument: &str, snapshot: Option<Snapshot>) {
        self.queues
            .lock()
            .unwrap()
            .entry(instrument.to_string())
            .or_default()
            .push_back(snapshot);
    }

    /// Served whenever the queue for `instrument` is empty.
    pub fn always(&self, instrument: &str, snapshot: Snapshot) {
        self.fallback.lock().unwrap().insert(instrument.to_string(), snapshot);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn fetch(&self, instrument_id: &str, interval: Interval) -> Result<Snapshot, Unavailable> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let queued = self
            .queues
            .lock()
            .unwrap()
            .get_mut(instrument_id)
            .and_then(|q| q.pop_front());
        let snapshot = match queued {
            Some(snapshot) => snapshot,
            None => self.fallback.lock().unwrap().get(instrument_id).cloned(),
        };
        snapshot
            .map(|s| Snapshot { interval, ..s })
            .ok_or_else(|| Unavailable::Malformed(format!("nothing scripted for {}", instrument_id)))
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, chat_id: &str, message: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((chat_id.to_string(), message.to_string()));
        if self.fail {
            return Err(TransportError::Rejected("Forbidden: bot was blocked by the user".into()));
        }
        Ok(())
    }
}

pub fn snapshot(instrument: &str, closes: Vec<f64>, prior_close: f64, volume: f64, prior_volume: f64) -> Snapshot {
    let n = closes.len();
    Snapshot {
        instrument_id: instrument.to_string(),
        interval: Interval::H4,
        timestamp: Utc::now(),
        close_price: closes.last().copied().unwrap_or(0.0),
        prior_close_price: Some(prior_close),
        volume,
        prior_volume: Some(prior_volume),
        recent_highs: closes.clone(),
        recent_volumes: vec![volume; n],
        recent_closes: closes,
    }
}

/// close=110 after prior_close=100 on doubled volume.
pub fn pump(instrument: &str) -> Snapshot {
    let mut closes = vec![100.0; 19];
    closes.push(110.0);
    snapshot(instrument, closes, 100.0, 200.0, 100.0)
}

pub fn flat(instrument: &str) -> Snapshot {
    snapshot(instrument, vec![100.0; 20], 100.0, 100.0, 100.0)
}

/// Steady climb: trend Buy at confidence 90.
pub fn rising(instrument: &str) -> Snapshot {
    let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 0.1).collect();
    let prior = closes[18];
    snapshot(instrument, closes, prior, 100.0, 100.0)
}

/// Steady decline: trend Sell at confidence 40.
pub fn falling(instrument: &str) -> Snapshot {
    let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64 * 0.1).collect();
    let prior = closes[18];
    snapshot(instrument, closes, prior, 100.0, 100.0)
}

pub fn session(instruments: &[&str]) -> SessionConfig {
    SessionConfig {
        instruments: instruments.iter().map(|s| s.to_string()).collect(),
        intervals: vec![Interval::H4],
        recipients: Recipients {
            vip_chat_id: Some("vip-chat".into()),
            free_chat_id: Some("free-chat".into()),
        },
        ..SessionConfig::default()
    }
}
