use crate::config::SessionConfig;
use crate::deduplication::Deduplicator;
use crate::instruments::is_valid_symbol;
use crate::market::DataSource;
use crate::notifier::{format_alert, NotificationRouter, Transport};
use crate::signal::{build_evaluator, SignalEvaluator};
use crate::types::{AlertKey, Interval, SignalKind, Snapshot, TradeTargets};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
    Crashed,
}

/// Setup problems that keep a loop from ever running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("no instruments configured")]
    NoInstruments,
    #[error("not a spot symbol: {0}")]
    InvalidSymbol(String),
    #[error("no intervals configured")]
    NoIntervals,
    #[error("scan interval must be at least one second")]
    ZeroScanInterval,
    #[error("take profit / stop loss fractions must be finite and non-negative")]
    BadTargets,
}

pub fn validate(config: &SessionConfig) -> Result<(), ScanError> {
    if config.instruments.is_empty() {
        return Err(ScanError::NoInstruments);
    }
    if let Some(bad) = config.instruments.iter().find(|s| !is_valid_symbol(s)) {
        return Err(ScanError::InvalidSymbol(bad.clone()));
    }
    if config.intervals.is_empty() {
        return Err(ScanError::NoIntervals);
    }
    if config.scan_interval_secs == 0 {
        return Err(ScanError::ZeroScanInterval);
    }
    let fraction_ok = |f: &f64| f.is_finite() && *f >= 0.0;
    if !config.take_profits.iter().all(fraction_ok) || !fraction_ok(&config.stop_loss) {
        return Err(ScanError::BadTargets);
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub unavailable: usize,
    pub delivered: usize,
    pub failed_deliveries: usize,
    pub suppressed: usize,
    pub gated: usize,
    pub cleared: usize,
    pub interrupted: bool,
}

/// Periodic fetch → evaluate → dedup → route loop for one session.
pub struct ScanLoop {
    session_id: String,
    source: Arc<dyn DataSource>,
    transport: Arc<dyn Transport>,
    evaluator: Option<Arc<dyn SignalEvaluator>>,
    config: watch::Receiver<Arc<SessionConfig>>,
    stop: watch::Receiver<bool>,
    state: watch::Sender<LoopState>,
    deduplicator: Arc<Deduplicator>,
    previous: HashMap<(String, Interval), Snapshot>,
}

impl ScanLoop {
    pub fn new(
        session_id: &str,
        source: Arc<dyn DataSource>,
        transport: Arc<dyn Transport>,
        config: watch::Receiver<Arc<SessionConfig>>,
        stop: watch::Receiver<bool>,
    ) -> Result<Self, ScanError> {
        validate(&config.borrow())?;
        let (state, _) = watch::channel(LoopState::Idle);
        Ok(Self {
            session_id: session_id.to_string(),
            source,
            transport,
            evaluator: None,
            config,
            stop,
            state,
            deduplicator: Arc::new(Deduplicator::new()),
            previous: HashMap::new(),
        })
    }

    /// Replaces the evaluator otherwise built from the session config each cycle.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn SignalEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn deduplicator(&self) -> Arc<Deduplicator> {
        Arc::clone(&self.deduplicator)
    }

    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    pub async fn run(mut self) -> LoopState {
        self.state.send_replace(LoopState::Running);
        info!("[{}] Scan loop running", self.session_id);

        let mut cycle: u64 = 0;
        while !self.stop_requested() {
            cycle += 1;
            let report = self.run_cycle().await;
            info!(
                "[{}] Cycle {}: {} fetched, {} unavailable, {} delivered, {} suppressed, {} gated",
                self.session_id, cycle, report.fetched, report.unavailable, report.delivered, report.suppressed, report.gated
            );
            if report.interrupted {
                break;
            }

            if !self.pause().await {
                break;
            }
        }

        self.state.send_replace(LoopState::Stopped);
        info!("[{}] Scan loop stopped after {} cycle(s)", self.session_id, cycle);
        LoopState::Stopped
    }

    /// Sleeps out the scan interval counted from when the pause began, so a
    /// shorter interval published meanwhile takes effect at once. Returns
    /// false when the stop sender is gone.
    async fn pause(&mut self) -> bool {
        let began = Instant::now();
        let mut config_open = true;
        loop {
            let deadline = began + self.config.borrow().scan_interval();
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                changed = self.stop.changed() => return changed.is_ok(),
                changed = self.config.changed(), if config_open => {
                    config_open = changed.is_ok();
                }
            }
        }
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        let config: Arc<SessionConfig> = self.config.borrow_and_update().clone();
        let evaluator = self
            .evaluator
            .clone()
            .unwrap_or_else(|| build_evaluator(config.evaluator, config.thresholds));
        let router = NotificationRouter::new(Arc::clone(&self.transport), config.recipients.clone());

        let mut report = CycleReport::default();
        for (instrument, interval) in config.universe() {
            if self.stop_requested() {
                report.interrupted = true;
                break;
            }

            let snapshot = match self.source.fetch(instrument, interval).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("[{}] {} {} unavailable: {}", self.session_id, instrument, interval, e);
                    report.unavailable += 1;
                    continue;
                }
            };
            report.fetched += 1;

            let pair = (instrument.to_string(), interval);
            let result = evaluator.evaluate(&snapshot, self.previous.get(&pair));
            self.previous.insert(pair, snapshot.clone());

            if result.kind == SignalKind::None {
                let cleared = self.deduplicator.clear_all(instrument, interval).await;
                if !cleared.is_empty() {
                    debug!("[{}] {} {}: condition reset, re-armed {:?}", self.session_id, instrument, interval, cleared);
                    report.cleared += cleared.len();
                }
                continue;
            }

            // Another kind now holds, so earlier conditions on this pair have ended.
            for stale in self.deduplicator.marked(instrument, interval).await {
                if stale != result.kind {
                    self.deduplicator.clear(&AlertKey::new(instrument, interval, stale)).await;
                    debug!("[{}] {} {}: {} replaced by {}, re-armed", self.session_id, instrument, interval, stale, result.kind);
                    report.cleared += 1;
                }
            }

            let key = AlertKey::new(instrument, interval, result.kind);
            if !self.deduplicator.should_notify(&key).await {
                debug!("[{}] {} still active, suppressed", self.session_id, key);
                report.suppressed += 1;
                continue;
            }

            let Some(target) = router.route(&snapshot, &result, &config.policy) else {
                report.gated += 1;
                continue;
            };

            let targets = matches!(result.kind, SignalKind::Pump | SignalKind::Buy)
                .then(|| TradeTargets::from_entry(snapshot.close_price, &config.take_profits, config.stop_loss));
            let message = format_alert(&snapshot, &result, targets.as_ref());

            info!("[{}] ALERT: {} confidence {} -> {:?}", self.session_id, key, result.confidence, target.tier);
            match router.deliver(&target, &message).await {
                Ok(()) => report.delivered += 1,
                Err(_) => report.failed_deliveries += 1,
            }
            // Marked even when delivery failed; a broken channel is not retried every cycle.
            self.deduplicator.mark_notified(key).await;
        }

        report
    }
}
