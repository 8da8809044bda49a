use crate::config::SessionConfig;
use crate::deduplication::Deduplicator;
use crate::market::DataSource;
use crate::notifier::{Collector, Recipients, Transport};
use crate::scanner::{validate, CycleReport, LoopState, ScanError, ScanLoop};
use crate::signal::SignalEvaluator;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("session {0} is already running")]
    AlreadyRunning(String),
    #[error("session {0} is not running")]
    NotRunning(String),
    #[error("session {session} failed setup: {source}")]
    Setup {
        session: String,
        #[source]
        source: ScanError,
    },
}

struct SessionHandle {
    config: watch::Sender<Arc<SessionConfig>>,
    stop: watch::Sender<bool>,
    state: watch::Receiver<LoopState>,
    deduplicator: Arc<Deduplicator>,
    task: JoinHandle<LoopState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: LoopState,
    pub active_alerts: usize,
    pub config: Option<SessionConfig>,
    pub error: Option<String>,
}

/// One pass over a universe, with the alerts it would have sent.
#[derive(Debug, Clone, Serialize)]
pub struct OnDemandScan {
    pub report: CycleReport,
    pub signals: Vec<String>,
}

/// Owns one scan loop per session: started at most once, stopped deterministically.
pub struct SessionSupervisor {
    source: Arc<dyn DataSource>,
    transport: Arc<dyn Transport>,
    evaluator: Option<Arc<dyn SignalEvaluator>>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    crashed: RwLock<HashMap<String, String>>,
}

impl SessionSupervisor {
    pub fn new(source: Arc<dyn DataSource>, transport: Arc<dyn Transport>) -> Self {
        Self {
            source,
            transport,
            evaluator: None,
            sessions: RwLock::new(HashMap::new()),
            crashed: RwLock::new(HashMap::new()),
        }
    }

    /// Every loop started afterwards uses `evaluator` instead of the configured one.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn SignalEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub async fn start(&self, session_id: &str, config: SessionConfig) -> Result<(), SupervisorError> {
        let mut sessions = self.sessions.write().await;

        if let Some(existing) = sessions.get(session_id) {
            if !existing.task.is_finished() {
                return Err(SupervisorError::AlreadyRunning(session_id.to_string()));
            }
            sessions.remove(session_id);
        }

        let (config_tx, config_rx) = watch::channel(Arc::new(config));
        let (stop_tx, stop_rx) = watch::channel(false);

        let scan_loop = match ScanLoop::new(
            session_id,
            Arc::clone(&self.source),
            Arc::clone(&self.transport),
            config_rx,
            stop_rx,
        ) {
            Ok(scan_loop) => scan_loop,
            Err(e) => {
                warn!("[Supervisor] Session {} crashed during setup: {}", session_id, e);
                self.crashed.write().await.insert(session_id.to_string(), e.to_string());
                return Err(SupervisorError::Setup {
                    session: session_id.to_string(),
                    source: e,
                });
            }
        };
        let scan_loop = match &self.evaluator {
            Some(evaluator) => scan_loop.with_evaluator(Arc::clone(evaluator)),
            None => scan_loop,
        };

        self.crashed.write().await.remove(session_id);
        let state = scan_loop.state();
        let deduplicator = scan_loop.deduplicator();
        let task = tokio::spawn(scan_loop.run());

        sessions.insert(
            session_id.to_string(),
            SessionHandle {
                config: config_tx,
                stop: stop_tx,
                state,
                deduplicator,
                task,
            },
        );
        info!("[Supervisor] Started session {} (total: {})", session_id, sessions.len());
        Ok(())
    }

    /// Signals the loop and waits for it to finish its current fetch.
    pub async fn stop(&self, session_id: &str) -> Result<LoopState, SupervisorError> {
        let handle = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| SupervisorError::NotRunning(session_id.to_string()))?;

        let _ = handle.stop.send(true);
        let state = match handle.task.await {
            Ok(state) => state,
            Err(e) => {
                warn!("[Supervisor] Session {} task ended abnormally: {}", session_id, e);
                LoopState::Crashed
            }
        };
        info!("[Supervisor] Stopped session {}", session_id);
        Ok(state)
    }

    /// Applies `update` to a copy of the session's config and publishes it;
    /// the loop sees it from its next cycle on. Invalid results are rejected.
    pub async fn update<F>(&self, session_id: &str, update: F) -> Result<SessionConfig, SupervisorError>
    where
        F: FnOnce(&mut SessionConfig),
    {
        let sessions = self.sessions.write().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| SupervisorError::NotRunning(session_id.to_string()))?;

        let mut next = SessionConfig::clone(&handle.config.borrow());
        update(&mut next);
        validate(&next).map_err(|source| SupervisorError::Setup {
            session: session_id.to_string(),
            source,
        })?;

        handle.config.send_replace(Arc::new(next.clone()));
        info!("[Supervisor] Updated settings for session {}", session_id);
        Ok(next)
    }

    /// Runs a single cycle over `config` with its own deduplicator and returns
    /// the rendered alerts instead of delivering them. Running sessions are
    /// left untouched.
    pub async fn scan_once(&self, session_id: &str, mut config: SessionConfig) -> Result<OnDemandScan, SupervisorError> {
        // Every tier routes back to the requester; only the mode threshold gates.
        config.recipients = Recipients {
            vip_chat_id: Some(session_id.to_string()),
            free_chat_id: Some(session_id.to_string()),
        };

        let collector = Arc::new(Collector::default());
        let (_config_tx, config_rx) = watch::channel(Arc::new(config));
        let (_stop_tx, stop_rx) = watch::channel(false);
        let scan_loop = ScanLoop::new(
            session_id,
            Arc::clone(&self.source),
            collector.clone(),
            config_rx,
            stop_rx,
        )
        .map_err(|source| SupervisorError::Setup {
            session: session_id.to_string(),
            source,
        })?;
        let mut scan_loop = match &self.evaluator {
            Some(evaluator) => scan_loop.with_evaluator(Arc::clone(evaluator)),
            None => scan_loop,
        };

        let report = scan_loop.run_cycle().await;
        let signals = collector.take().await;
        info!(
            "[Supervisor] On-demand scan for {}: {} fetched, {} signal(s)",
            session_id,
            report.fetched,
            signals.len()
        );
        Ok(OnDemandScan { report, signals })
    }

    /// Current settings of a running session.
    pub async fn session_config(&self, session_id: &str) -> Option<SessionConfig> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|h| SessionConfig::clone(&h.config.borrow()))
    }

    pub async fn is_running(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(session_id)
            .is_some_and(|h| !h.task.is_finished())
    }

    pub async fn status(&self) -> Vec<SessionStatus> {
        let mut out = Vec::new();
        for (id, handle) in self.sessions.read().await.iter() {
            let state = *handle.state.borrow();
            let config = SessionConfig::clone(&handle.config.borrow());
            let active_alerts = handle.deduplicator.active_count().await;
            out.push(SessionStatus {
                session_id: id.clone(),
                state,
                active_alerts,
                config: Some(config),
                error: None,
            });
        }
        for (id, error) in self.crashed.read().await.iter() {
            out.push(SessionStatus {
                session_id: id.clone(),
                state: LoopState::Crashed,
                active_alerts: 0,
                config: None,
                error: Some(error.clone()),
            });
        }
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        out
    }

    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                warn!("[Supervisor] {}", e);
            }
        }
    }
}
