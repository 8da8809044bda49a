use crate::types::{clamp_confidence, EvaluationResult, SignalKind, Snapshot};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use ta::indicators::{ExponentialMovingAverage, RelativeStrengthIndex};
use ta::Next;

/// Classifies one snapshot. Implementations must be pure and must not fail:
/// anything they cannot judge is `SignalKind::None`.
pub trait SignalEvaluator: Send + Sync {
    fn evaluate(&self, snapshot: &Snapshot, previous: Option<&Snapshot>) -> EvaluationResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorSettings {
    pub pump_threshold: f64,
    pub volume_multiplier: f64,
    pub min_candles: usize,
    pub short_window: usize,
    pub long_window: usize,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            pump_threshold: 0.05,
            volume_multiplier: 1.5,
            min_candles: 20,
            short_window: 5,
            long_window: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorKind {
    #[default]
    Default,
    Early,
}

impl FromStr for EvaluatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "early" => Ok(Self::Early),
            other => Err(format!("unknown evaluator: {}", other)),
        }
    }
}

pub fn build_evaluator(kind: EvaluatorKind, settings: EvaluatorSettings) -> Arc<dyn SignalEvaluator> {
    match kind {
        EvaluatorKind::Default => Arc::new(DefaultEvaluator::new(settings)),
        EvaluatorKind::Early => Arc::new(EarlyEntryEvaluator::default()),
    }
}

/// Pump detection first, trend-following Buy/Sell otherwise.
#[derive(Debug, Clone, Default)]
pub struct DefaultEvaluator {
    settings: EvaluatorSettings,
}

impl DefaultEvaluator {
    pub fn new(settings: EvaluatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    fn pump(&self, snapshot: &Snapshot, previous: Option<&Snapshot>) -> Option<EvaluationResult> {
        let prior = snapshot
            .prior_close_price
            .or_else(|| previous.map(|p| p.close_price))
            .filter(|p| p.is_finite() && *p > 0.0)?;

        let change = (snapshot.close_price - prior) / prior;
        if !change.is_finite() || change < self.settings.pump_threshold {
            return None;
        }

        // Zero or unknown prior volume: the volume condition does not apply.
        let ratio = snapshot
            .prior_volume
            .or_else(|| previous.map(|p| p.volume))
            .filter(|v| v.is_finite() && *v > 0.0)
            .map(|prior_volume| snapshot.volume / prior_volume);

        if let Some(ratio) = ratio {
            if ratio < self.settings.volume_multiplier {
                return None;
            }
        }

        let mut score = 50.0 + 500.0 * (change - self.settings.pump_threshold);
        if let Some(ratio) = ratio {
            score += 20.0 * (ratio - self.settings.volume_multiplier);
        }

        let mut result = EvaluationResult::new(SignalKind::Pump, score).with_metric("price_change", change);
        result.confidence = result.confidence.max(1);
        Some(match ratio {
            Some(ratio) => result.with_metric("volume_ratio", ratio),
            None => result,
        })
    }

    fn trend(&self, closes: &[f64]) -> EvaluationResult {
        let short = match mean_of_last(closes, self.settings.short_window) {
            Some(v) => v,
            None => return EvaluationResult::none(),
        };
        let long = match mean_of_last(closes, self.settings.long_window) {
            Some(v) => v,
            None => return EvaluationResult::none(),
        };

        let kind = if short > long {
            SignalKind::Buy
        } else if short < long {
            SignalKind::Sell
        } else {
            return EvaluationResult::none().with_metric("sma_short", short).with_metric("sma_long", long);
        };

        EvaluationResult::new(kind, monotonicity_score(closes) as f64)
            .with_metric("sma_short", short)
            .with_metric("sma_long", long)
    }
}

impl SignalEvaluator for DefaultEvaluator {
    fn evaluate(&self, snapshot: &Snapshot, previous: Option<&Snapshot>) -> EvaluationResult {
        if snapshot.recent_closes.len() < self.settings.min_candles {
            return EvaluationResult::none();
        }
        if let Some(pump) = self.pump(snapshot, previous) {
            return pump;
        }
        self.trend(&snapshot.recent_closes)
    }
}

/// Mean of the newest `window` values, or of all of them when fewer exist.
fn mean_of_last(values: &[f64], window: usize) -> Option<f64> {
    if values.is_empty() || window == 0 {
        return None;
    }
    let tail = &values[values.len().saturating_sub(window)..];
    Some(tail.iter().sum::<f64>() / tail.len() as f64)
}

// 90 strictly rising, 70 net up over the three, 40 otherwise.
fn monotonicity_score(closes: &[f64]) -> u8 {
    let [a, b, c] = match closes {
        [.., a, b, c] => [*a, *b, *c],
        _ => return 40,
    };
    if a < b && b < c {
        90
    } else if c > a {
        70
    } else {
        40
    }
}

/// Early accumulation filter: at least three of EMA20 > EMA50, RSI14 in
/// [45, 60], volume spike over the 20-candle average, and a close above the
/// previous 20-candle high.
#[derive(Debug, Clone)]
pub struct EarlyEntryEvaluator {
    pub min_candles: usize,
    pub volume_spike: f64,
    pub rsi_band: (f64, f64),
}

impl Default for EarlyEntryEvaluator {
    fn default() -> Self {
        Self { min_candles: 50, volume_spike: 1.8, rsi_band: (45.0, 60.0) }
    }
}

impl EarlyEntryEvaluator {
    fn last_output<I: Next<f64, Output = f64>>(mut indicator: I, values: &[f64]) -> f64 {
        values.iter().fold(0.0, |_, v| indicator.next(*v))
    }
}

impl SignalEvaluator for EarlyEntryEvaluator {
    fn evaluate(&self, snapshot: &Snapshot, _previous: Option<&Snapshot>) -> EvaluationResult {
        let closes = &snapshot.recent_closes;
        let highs = &snapshot.recent_highs;
        let volumes = &snapshot.recent_volumes;
        let n = closes.len();
        if n < self.min_candles.max(22) || highs.len() != n || volumes.len() != n {
            return EvaluationResult::none();
        }

        let (Ok(ema20), Ok(ema50), Ok(rsi14)) = (
            ExponentialMovingAverage::new(20),
            ExponentialMovingAverage::new(50),
            RelativeStrengthIndex::new(14),
        ) else {
            return EvaluationResult::none();
        };
        let ema_fast = Self::last_output(ema20, closes);
        let ema_slow = Self::last_output(ema50, closes);
        let rsi = Self::last_output(rsi14, closes);

        let vol_avg = volumes[n - 20..].iter().sum::<f64>() / 20.0;
        let prior_high = highs[n - 21..n - 1].iter().copied().fold(f64::MIN, f64::max);
        let last_close = closes[n - 1];

        let conditions = [
            vol_avg > 0.0 && volumes[n - 1] > vol_avg * self.volume_spike,
            ema_fast > ema_slow,
            (self.rsi_band.0..=self.rsi_band.1).contains(&rsi),
            last_close > prior_high,
        ];
        let met = conditions.iter().filter(|c| **c).count();

        let kind = if met >= 3 { SignalKind::Buy } else { SignalKind::None };
        let confidence = if kind == SignalKind::None { 0 } else { clamp_confidence(25.0 * met as f64) };

        EvaluationResult { kind, confidence, ..Default::default() }
            .with_metric("ema20", ema_fast)
            .with_metric("ema50", ema_slow)
            .with_metric("rsi14", rsi)
            .with_metric("volume_avg", vol_avg)
            .with_metric("conditions_met", met as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Interval;
    use chrono::Utc;

    fn snapshot(closes: Vec<f64>, prior_close: Option<f64>, volume: f64, prior_volume: Option<f64>) -> Snapshot {
        let n = closes.len();
        Snapshot {
            instrument_id: "BTCUSDT".into(),
            interval: Interval::H4,
            timestamp: Utc::now(),
            close_price: closes.last().copied().unwrap_or(0.0),
            prior_close_price: prior_close,
            volume,
            prior_volume,
            recent_highs: closes.clone(),
            recent_volumes: vec![volume; n],
            recent_closes: closes,
        }
    }

    fn flat_then(last: f64, prior: f64) -> Vec<f64> {
        let mut closes = vec![100.0; 18];
        closes.push(prior);
        closes.push(last);
        closes
    }

    #[test]
    fn pump_detected_on_price_and_volume() {
        let eval = DefaultEvaluator::default();
        let s = snapshot(flat_then(110.0, 100.0), Some(100.0), 200.0, Some(100.0));
        let r = eval.evaluate(&s, None);
        assert_eq!(r.kind, SignalKind::Pump);
        assert!(r.confidence > 0);
        assert!((r.metrics["price_change"] - 0.10).abs() < 1e-9);
        assert!((r.metrics["volume_ratio"] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn unchanged_price_is_no_signal() {
        let eval = DefaultEvaluator::default();
        let s = snapshot(vec![100.0; 20], Some(100.0), 100.0, Some(100.0));
        assert_eq!(eval.evaluate(&s, None).kind, SignalKind::None);
    }

    #[test]
    fn too_few_candles_is_no_signal() {
        let eval = DefaultEvaluator::default();
        let mut closes = vec![100.0; 18];
        closes.push(200.0);
        let s = snapshot(closes, Some(100.0), 500.0, Some(100.0));
        let r = eval.evaluate(&s, None);
        assert_eq!(r.kind, SignalKind::None);
        assert_eq!(r.confidence, 0);
    }

    #[test]
    fn zero_or_missing_prior_close_never_divides() {
        let eval = DefaultEvaluator::default();
        for prior in [Some(0.0), None] {
            let s = snapshot(flat_then(110.0, 100.0), prior, 200.0, Some(100.0));
            let r = eval.evaluate(&s, None);
            assert_ne!(r.kind, SignalKind::Pump);
            assert!(r.confidence <= 100);
        }
    }

    #[test]
    fn zero_prior_volume_skips_volume_condition() {
        let eval = DefaultEvaluator::default();
        let s = snapshot(flat_then(110.0, 100.0), Some(100.0), 10.0, Some(0.0));
        let r = eval.evaluate(&s, None);
        assert_eq!(r.kind, SignalKind::Pump);
        assert!(!r.metrics.contains_key("volume_ratio"));
    }

    #[test]
    fn weak_volume_blocks_pump() {
        let eval = DefaultEvaluator::default();
        let s = snapshot(flat_then(110.0, 100.0), Some(100.0), 120.0, Some(100.0));
        assert_ne!(eval.evaluate(&s, None).kind, SignalKind::Pump);
    }

    #[test]
    fn previous_snapshot_supplies_prior_close() {
        let eval = DefaultEvaluator::default();
        let prev = snapshot(vec![100.0; 20], None, 100.0, None);
        let s = snapshot(flat_then(110.0, 100.0), None, 200.0, None);
        assert_eq!(eval.evaluate(&s, Some(&prev)).kind, SignalKind::Pump);
    }

    #[test]
    fn pump_confidence_is_monotone() {
        let eval = DefaultEvaluator::default();
        let small = eval.evaluate(&snapshot(flat_then(106.0, 100.0), Some(100.0), 160.0, Some(100.0)), None);
        let large = eval.evaluate(&snapshot(flat_then(112.0, 100.0), Some(100.0), 300.0, Some(100.0)), None);
        assert_eq!(small.kind, SignalKind::Pump);
        assert_eq!(large.kind, SignalKind::Pump);
        assert!(large.confidence >= small.confidence);
    }

    #[test]
    fn rising_trend_is_high_confidence_buy() {
        let eval = DefaultEvaluator::default();
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 0.1).collect();
        let r = eval.evaluate(&snapshot(closes, None, 100.0, None), None);
        assert_eq!(r.kind, SignalKind::Buy);
        assert_eq!(r.confidence, 90);
    }

    #[test]
    fn falling_trend_is_low_confidence_sell() {
        let eval = DefaultEvaluator::default();
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64 * 0.1).collect();
        let r = eval.evaluate(&snapshot(closes, None, 100.0, None), None);
        assert_eq!(r.kind, SignalKind::Sell);
        assert_eq!(r.confidence, 40);
    }

    #[test]
    fn net_positive_but_choppy_is_medium() {
        assert_eq!(monotonicity_score(&[1.0, 2.0, 1.5, 2.5]), 70);
        assert_eq!(monotonicity_score(&[1.0, 2.0, 3.0]), 90);
        assert_eq!(monotonicity_score(&[3.0, 2.0]), 40);
    }

    #[test]
    fn confidence_stays_in_bounds_for_extreme_inputs() {
        let eval = DefaultEvaluator::default();
        for (last, vol) in [(1e12, 1e12), (100.0, 0.0), (1e-12, 1e-12), (f64::MAX, f64::MAX)] {
            let s = snapshot(flat_then(last, 100.0), Some(100.0), vol, Some(1.0));
            assert!(eval.evaluate(&s, None).confidence <= 100);
        }
    }

    #[test]
    fn early_entry_needs_enough_history() {
        let eval = EarlyEntryEvaluator::default();
        let r = eval.evaluate(&snapshot(vec![100.0; 30], None, 1.0, None), None);
        assert_eq!(r.kind, SignalKind::None);
        assert_eq!(r.confidence, 0);
    }

    #[test]
    fn early_entry_flags_breakout_with_volume() {
        let eval = EarlyEntryEvaluator::default();
        let mut closes: Vec<f64> = (0..59).map(|i| 100.0 + i as f64 * 0.05).collect();
        closes.push(110.0);
        let n = closes.len();
        let mut s = snapshot(closes, None, 1000.0, None);
        s.recent_volumes = vec![100.0; n];
        s.recent_volumes[n - 1] = 1000.0;
        let r = eval.evaluate(&s, None);
        assert_eq!(r.kind, SignalKind::Buy);
        assert!(r.confidence >= 75);
    }
}
