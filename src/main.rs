use signals_pump::{
    config::{Config, SettingsPatch},
    market::BinanceSource,
    supervisor::{SessionSupervisor, SupervisorError},
    telegram::TelegramClient,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const DEFAULT_SESSION: &str = "default";

pub struct AppState {
    supervisor: SessionSupervisor,
    config: Config,
}

struct ApiError(SupervisorError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SupervisorError::AlreadyRunning(_) => StatusCode::CONFLICT,
            SupervisorError::NotRunning(_) => StatusCode::NOT_FOUND,
            SupervisorError::Setup { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("signals_pump=info")
        .init();
    dotenvy::dotenv().ok();

    info!("==================================================");
    info!("  SIGNALS-PUMP - market scanner");
    info!("==================================================");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Fatal configuration error: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Universe: {:?} on {:?}, every {}s",
        config.session.instruments, config.session.intervals, config.session.scan_interval_secs
    );
    info!("Policy: {:?}", config.session.policy);

    let supervisor = SessionSupervisor::new(
        Arc::new(BinanceSource::new()),
        Arc::new(TelegramClient::new(&config.telegram_token)),
    );

    if config.auto_start {
        supervisor.start(DEFAULT_SESSION, config.session.clone()).await?;
    }

    let port = config.port;
    let state = Arc::new(AppState { supervisor, config });

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/sessions/:id/start", post(start_session))
        .route("/api/sessions/:id/stop", post(stop_session))
        .route("/api/sessions/:id/scan", post(scan_session))
        .route("/api/sessions/:id/settings", patch(update_session))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Control API running on port {}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.supervisor.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "signals-pump",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn status(State(s): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions = s.supervisor.status().await;
    Json(serde_json::json!({
        "source": "Binance spot (public)",
        "sessions": sessions,
    }))
}

async fn start_session(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<SettingsPatch>>,
) -> Result<impl IntoResponse, ApiError> {
    let mut session = s.config.session.clone();
    if let Some(Json(patch)) = body {
        patch.apply(&mut session);
    }
    s.supervisor.start(&id, session).await.map_err(ApiError)?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "session": id, "state": "running" }))))
}

async fn stop_session(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = s.supervisor.stop(&id).await.map_err(ApiError)?;
    Ok(Json(serde_json::json!({ "session": id, "state": state })))
}

async fn update_session(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = s
        .supervisor
        .update(&id, move |config| patch.apply(config))
        .await
        .map_err(ApiError)?;
    Ok(Json(serde_json::json!({ "session": id, "settings": updated })))
}

/// One pass on demand: the session's live settings if it is running, the
/// configured defaults otherwise, plus any overrides in the body.
async fn scan_session(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<SettingsPatch>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = s
        .supervisor
        .session_config(&id)
        .await
        .unwrap_or_else(|| s.config.session.clone());
    if let Some(Json(patch)) = body {
        patch.apply(&mut session);
    }

    let scan = s.supervisor.scan_once(&id, session).await.map_err(ApiError)?;
    let summary = if scan.signals.is_empty() {
        "No clear signals".to_string()
    } else {
        format!("{} signal(s)", scan.signals.len())
    };
    Ok(Json(serde_json::json!({
        "session": id,
        "summary": summary,
        "report": scan.report,
        "signals": scan.signals,
    })))
}
