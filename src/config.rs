use crate::instruments::{is_valid_symbol, parse_symbols};
use crate::notifier::Recipients;
use crate::signal::{EvaluatorKind, EvaluatorSettings};
use crate::types::{Interval, Mode, RecipientPolicy, Tier};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TAKE_PROFITS: [f64; 4] = [0.15, 0.30, 0.45, 0.65];
pub const DEFAULT_STOP_LOSS: f64 = 0.10;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} required")]
    Missing(&'static str),
    #[error("invalid {name}={value}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything one scan loop needs. Treated as an immutable value: updates
/// produce a new copy that the loop picks up at its next cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub instruments: Vec<String>,
    pub intervals: Vec<Interval>,
    pub scan_interval_secs: u64,
    pub evaluator: EvaluatorKind,
    pub thresholds: EvaluatorSettings,
    pub policy: RecipientPolicy,
    pub recipients: Recipients,
    pub take_profits: Vec<f64>,
    pub stop_loss: f64,
}

impl SessionConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn universe(&self) -> impl Iterator<Item = (&str, Interval)> + '_ {
        self.instruments
            .iter()
            .flat_map(move |i| self.intervals.iter().map(move |iv| (i.as_str(), *iv)))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instruments: parse_symbols("halal"),
            intervals: vec![Interval::H4],
            scan_interval_secs: 60,
            evaluator: EvaluatorKind::Default,
            thresholds: EvaluatorSettings::default(),
            policy: RecipientPolicy::default(),
            recipients: Recipients::default(),
            take_profits: DEFAULT_TAKE_PROFITS.to_vec(),
            stop_loss: DEFAULT_STOP_LOSS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_token: String,
    pub port: u16,
    pub auto_start: bool,
    pub session: SessionConfig,
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_list<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<Vec<T>>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(name).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>().map_err(|e| ConfigError::Invalid {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<T>, _>>()
        .map(Some)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let telegram_token = lookup("TELEGRAM_BOT_TOKEN")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;

        let defaults = SessionConfig::default();

        let instruments = match lookup("SYMBOLS").filter(|v| !v.trim().is_empty()) {
            Some(raw) => {
                let symbols = parse_symbols(&raw);
                if let Some(bad) = symbols.iter().find(|s| !is_valid_symbol(s)) {
                    return Err(ConfigError::Invalid {
                        name: "SYMBOLS",
                        value: raw.clone(),
                        reason: format!("not a spot symbol: {}", bad),
                    });
                }
                symbols
            }
            None => defaults.instruments.clone(),
        };

        let thresholds = EvaluatorSettings {
            pump_threshold: parse_var(&lookup, "PUMP_THRESHOLD", defaults.thresholds.pump_threshold)?,
            volume_multiplier: parse_var(&lookup, "VOLUME_MULTIPLIER", defaults.thresholds.volume_multiplier)?,
            min_candles: parse_var(&lookup, "MIN_CANDLES", defaults.thresholds.min_candles)?,
            ..defaults.thresholds
        };

        let policy = RecipientPolicy {
            tier: parse_var(&lookup, "TIER", Tier::Vip)?,
            mode: parse_var(&lookup, "MODE", Mode::Silent)?,
            min_confidence_silent: parse_var(&lookup, "MIN_CONFIDENCE_SILENT", defaults.policy.min_confidence_silent)?,
            min_confidence_aggressive: parse_var(
                &lookup,
                "MIN_CONFIDENCE_AGGRESSIVE",
                defaults.policy.min_confidence_aggressive,
            )?,
        };

        let session = SessionConfig {
            instruments,
            intervals: parse_list(&lookup, "INTERVALS")?.unwrap_or(defaults.intervals),
            scan_interval_secs: parse_var(&lookup, "SCAN_INTERVAL_SECS", defaults.scan_interval_secs)?,
            evaluator: parse_var(&lookup, "EVALUATOR", EvaluatorKind::Default)?,
            thresholds,
            policy,
            recipients: Recipients {
                vip_chat_id: lookup("VIP_CHAT_ID").filter(|v| !v.trim().is_empty()),
                free_chat_id: lookup("FREE_CHAT_ID").filter(|v| !v.trim().is_empty()),
            },
            take_profits: parse_list(&lookup, "TAKE_PROFITS")?.unwrap_or(defaults.take_profits),
            stop_loss: parse_var(&lookup, "STOP_LOSS", defaults.stop_loss)?,
        };

        Ok(Self {
            telegram_token,
            port: parse_var(&lookup, "PORT", 3003)?,
            auto_start: parse_var(&lookup, "AUTO_START", true)?,
            session,
        })
    }
}

/// Partial settings update; unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub instruments: Option<String>,
    pub intervals: Option<Vec<Interval>>,
    pub scan_interval_secs: Option<u64>,
    pub evaluator: Option<EvaluatorKind>,
    pub pump_threshold: Option<f64>,
    pub volume_multiplier: Option<f64>,
    pub mode: Option<Mode>,
    pub tier: Option<Tier>,
    pub min_confidence_silent: Option<u8>,
    pub min_confidence_aggressive: Option<u8>,
    pub vip_chat_id: Option<String>,
    pub free_chat_id: Option<String>,
    pub take_profits: Option<Vec<f64>>,
    pub stop_loss: Option<f64>,
}

impl SettingsPatch {
    pub fn apply(self, config: &mut SessionConfig) {
        if let Some(instruments) = self.instruments {
            config.instruments = parse_symbols(&instruments);
        }
        if let Some(intervals) = self.intervals {
            config.intervals = intervals;
        }
        if let Some(secs) = self.scan_interval_secs {
            config.scan_interval_secs = secs;
        }
        if let Some(evaluator) = self.evaluator {
            config.evaluator = evaluator;
        }
        if let Some(threshold) = self.pump_threshold {
            config.thresholds.pump_threshold = threshold;
        }
        if let Some(multiplier) = self.volume_multiplier {
            config.thresholds.volume_multiplier = multiplier;
        }
        if let Some(mode) = self.mode {
            config.policy.mode = mode;
        }
        if let Some(tier) = self.tier {
            config.policy.tier = tier;
        }
        if let Some(min) = self.min_confidence_silent {
            config.policy.min_confidence_silent = min;
        }
        if let Some(min) = self.min_confidence_aggressive {
            config.policy.min_confidence_aggressive = min;
        }
        if let Some(chat) = self.vip_chat_id {
            config.recipients.vip_chat_id = Some(chat);
        }
        if let Some(chat) = self.free_chat_id {
            config.recipients.free_chat_id = Some(chat);
        }
        if let Some(tps) = self.take_profits {
            config.take_profits = tps;
        }
        if let Some(sl) = self.stop_loss {
            config.stop_loss = sl;
        }
    }
}
