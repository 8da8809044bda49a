use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    pub const ALL: [Interval; 5] = [Self::M5, Self::M15, Self::H1, Self::H4, Self::D1];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|i| i.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unsupported interval: {}", s))
    }
}

/// One normalized view of an instrument's recent market state.
///
/// The `recent_*` series are aligned candle-by-candle, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub instrument_id: String,
    pub interval: Interval,
    pub timestamp: DateTime<Utc>,
    pub close_price: f64,
    pub prior_close_price: Option<f64>,
    pub volume: f64,
    pub prior_volume: Option<f64>,
    pub recent_closes: Vec<f64>,
    pub recent_highs: Vec<f64>,
    pub recent_volumes: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum SignalKind {
    #[default]
    None,
    Pump,
    Buy,
    Sell,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "NONE",
            Self::Pump => "PUMP",
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EvaluationResult {
    pub kind: SignalKind,
    /// Heuristic score in `0..=100`.
    pub confidence: u8,
    pub metrics: BTreeMap<String, f64>,
}

impl EvaluationResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(kind: SignalKind, confidence: f64) -> Self {
        Self {
            kind,
            confidence: clamp_confidence(confidence),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }
}

pub fn clamp_confidence(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertKey {
    pub instrument_id: String,
    pub interval: Interval,
    pub kind: SignalKind,
}

impl AlertKey {
    pub fn new(instrument_id: &str, interval: Interval, kind: SignalKind) -> Self {
        Self { instrument_id: instrument_id.to_string(), interval, kind }
    }
}

impl std::fmt::Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.instrument_id, self.interval, self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Vip,
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Silent,
    Aggressive,
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vip" => Ok(Self::Vip),
            "free" => Ok(Self::Free),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(Self::Silent),
            "aggressive" => Ok(Self::Aggressive),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Who receives an alert and how confident it must be to go out.
/// The two thresholds are independent; nothing orders them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecipientPolicy {
    pub tier: Tier,
    pub mode: Mode,
    pub min_confidence_silent: u8,
    pub min_confidence_aggressive: u8,
}

impl RecipientPolicy {
    pub fn min_confidence(&self) -> u8 {
        match self.mode {
            Mode::Silent => self.min_confidence_silent,
            Mode::Aggressive => self.min_confidence_aggressive,
        }
    }
}

impl Default for RecipientPolicy {
    fn default() -> Self {
        Self {
            tier: Tier::Vip,
            mode: Mode::Silent,
            min_confidence_silent: 70,
            min_confidence_aggressive: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeTargets {
    pub entry: f64,
    pub take_profits: Vec<f64>,
    pub stop_loss: f64,
}

impl TradeTargets {
    /// `take_profits` and `stop_loss` are fractions of entry (0.15 = +15%, 0.10 = -10%).
    pub fn from_entry(entry: f64, take_profits: &[f64], stop_loss: f64) -> Self {
        Self {
            entry,
            take_profits: take_profits.iter().map(|tp| entry * (1.0 + tp)).collect(),
            stop_loss: entry * (1.0 - stop_loss),
        }
    }
}
