//! Alert routing, formatting and delivery.

use crate::instruments::format_price;
use crate::types::{EvaluationResult, RecipientPolicy, SignalKind, Snapshot, Tier, TradeTargets};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DISCLAIMER: &str = "⚠️ Informational alert, not financial advice.\nSpot only – no leverage.";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat API rejected message: {0}")]
    Rejected(String),
}

/// Outbound side of the chat transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, chat_id: &str, message: &str) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientTarget {
    pub tier: Tier,
    pub chat_id: String,
}

/// Chat ids per tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    pub vip_chat_id: Option<String>,
    pub free_chat_id: Option<String>,
}

impl Recipients {
    pub fn chat_for(&self, tier: Tier) -> Option<&str> {
        match tier {
            Tier::Vip => self.vip_chat_id.as_deref(),
            Tier::Free => self.free_chat_id.as_deref(),
        }
    }
}

/// Keeps rendered alerts in memory instead of sending them. On-demand scans
/// reply with these rather than posting to the alert chats.
#[derive(Default)]
pub struct Collector {
    messages: Mutex<Vec<String>>,
}

impl Collector {
    pub async fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock().await)
    }
}

#[async_trait]
impl Transport for Collector {
    async fn send(&self, _chat_id: &str, message: &str) -> Result<(), TransportError> {
        self.messages.lock().await.push(message.to_string());
        Ok(())
    }
}

pub struct NotificationRouter {
    transport: Arc<dyn Transport>,
    recipients: Recipients,
}

impl NotificationRouter {
    pub fn new(transport: Arc<dyn Transport>, recipients: Recipients) -> Self {
        Self { transport, recipients }
    }

    /// Picks the recipient for an evaluated snapshot, or `None` when the
    /// result must not be delivered under `policy`.
    pub fn route(&self, snapshot: &Snapshot, result: &EvaluationResult, policy: &RecipientPolicy) -> Option<RecipientTarget> {
        if result.kind == SignalKind::None {
            return None;
        }

        let min_confidence = policy.min_confidence();
        if result.confidence < min_confidence {
            debug!(
                "{} {} {}: confidence {} below {:?} threshold {}",
                snapshot.instrument_id, snapshot.interval, result.kind, result.confidence, policy.mode, min_confidence
            );
            return None;
        }

        let Some(chat_id) = self.recipients.chat_for(policy.tier) else {
            debug!("{} {}: no chat configured for tier {:?}", snapshot.instrument_id, result.kind, policy.tier);
            return None;
        };

        Some(RecipientTarget {
            tier: policy.tier,
            chat_id: chat_id.to_string(),
        })
    }

    pub async fn deliver(&self, target: &RecipientTarget, message: &str) -> Result<(), TransportError> {
        match self.transport.send(&target.chat_id, message).await {
            Ok(()) => {
                info!("[Notifier] Delivered alert to {:?} chat {}", target.tier, target.chat_id);
                Ok(())
            }
            Err(e) => {
                warn!("[Notifier] Delivery to {:?} chat {} failed: {}", target.tier, target.chat_id, e);
                Err(e)
            }
        }
    }
}

fn headline(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Pump => "🚨 <b>PUMP ALERT – TRADE CAREFULLY</b>",
        SignalKind::Buy => "📈 <b>BUY SIGNAL</b>",
        SignalKind::Sell => "📉 <b>SELL SIGNAL</b>",
        SignalKind::None => "",
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn pct_from(entry: f64, level: f64) -> f64 {
    if entry > 0.0 {
        (level / entry - 1.0) * 100.0
    } else {
        0.0
    }
}

/// Renders an alert as Telegram HTML.
pub fn format_alert(snapshot: &Snapshot, result: &EvaluationResult, targets: Option<&TradeTargets>) -> String {
    let symbol = escape_html(&snapshot.instrument_id);
    let mut msg = format!(
        "{}\n\n\
         <b>Currency:</b> #{}\n\
         <b>Timeframe:</b> {}\n\
         <b>Price:</b> {}\n\
         <b>Confidence:</b> {}%",
        headline(result.kind),
        symbol,
        snapshot.interval,
        format_price(&snapshot.instrument_id, snapshot.close_price),
        result.confidence,
    );

    if let Some(targets) = targets {
        msg.push_str("\n\n<b>Take Profits:</b>");
        for (i, tp) in targets.take_profits.iter().enumerate() {
            msg.push_str(&format!(
                "\nTP{}: {} (+{:.0}%)",
                i + 1,
                format_price(&snapshot.instrument_id, *tp),
                pct_from(targets.entry, *tp)
            ));
        }
        msg.push_str(&format!(
            "\n<b>Stop Loss:</b> {} ({:.0}%)",
            format_price(&snapshot.instrument_id, targets.stop_loss),
            pct_from(targets.entry, targets.stop_loss)
        ));
    }

    msg.push_str(&format!("\n\n⏰ {}", snapshot.timestamp.format("%Y-%m-%d %H:%M UTC")));
    msg.push_str("\n\n");
    msg.push_str(DISCLAIMER);
    msg
}
