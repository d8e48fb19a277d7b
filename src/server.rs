use axum::{
    Form, Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
    routing::{get, get_service, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;

use tracing::info;

use crate::AppState;
use crate::config::{AppConfig, load_llm_settings};
use crate::error::{ApiError, ApiResult};
use crate::llm::{ChatModel, GeminiClient, ModelInfo, prompts::APOLOGY};
use crate::security::claims::Identity;
use crate::security::{middleware::auth_middleware, rate_limit::rate_limit_middleware};
use crate::sentiment::{SentimentReport, dashboard};
use crate::session::{ChatTurn, Role, SessionKind, resolve_session_key};

/// Username shown for callers without an account.
pub const GUEST_USERNAME: &str = "Guest";

/// Start the Axum server with the provided configuration.
///
/// Runs until SIGINT/SIGTERM, then drains in-flight requests and shuts the
/// session store down.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let settings = load_llm_settings(&config.llm);
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        api_key_present = settings.api_key.is_some(),
        "LLM configuration loaded"
    );
    if settings.api_key.is_none() {
        tracing::error!(
            name: "llm.config.missing_key",
            "{} is not set; replies will fall back to an apology",
            crate::config::API_KEY_ENV
        );
    }

    let model: Arc<dyn ChatModel> = Arc::new(GeminiClient::new(settings)?);
    let state = AppState::new(Arc::clone(&config), model);
    let sessions = state.sessions.clone();

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.shutdown().await;
    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Build the application router and its middleware stack.
pub fn build_router(state: AppState) -> Router {
    let timeout = state.config.request_timeout();

    Router::new()
        .route("/", get_service(ServeFile::new("static/index.html")))
        .route("/chat", post(chat))
        .route("/api/history", get(get_history).delete(clear_history))
        .route("/screening-data", get(screening_data))
        .route("/screening", get(screening))
        .route("/api/models", get(list_models))
        .route("/health", get(health))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                let Some(duration) = timeout else {
                    return next.run(req).await;
                };
                match tokio::time::timeout(duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(name: "server.signal", error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(name: "server.signal", error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!(name: "server.shutdown", "Shutdown signal received");
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Form body for the chat endpoint.
#[derive(Debug, Deserialize)]
struct ChatForm {
    #[serde(default)]
    message: String,
}

/// Response from the chat endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    /// The model's reply, or an apology when the model failed.
    pub response: String,
}

/// POST /chat - Relay one message to the model.
async fn chat(
    State(state): State<AppState>,
    Identity(user): Identity,
    mut jar: CookieJar,
    Form(form): Form<ChatForm>,
) -> ApiResult<(CookieJar, Json<ChatReply>)> {
    let message = form.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("Message cannot be empty".to_string()));
    }

    let key = resolve_session_key(user.as_ref(), &mut jar);
    let history = state.sessions.history(key.as_str());

    let response = match state.model.reply(&history, message).await {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(
                name: "chat.reply_failed",
                key = %key,
                transient = e.is_transient(),
                error = %e,
                "Error generating AI response"
            );
            APOLOGY.to_string()
        }
    };

    state.sessions.append_turn(key.as_str(), Role::User, message);
    state
        .sessions
        .append_turn(key.as_str(), Role::Model, response.clone());

    Ok((jar, Json(ChatReply { response })))
}

/// Current transcript of the caller's session.
#[derive(Debug, Serialize)]
struct HistoryResponse {
    kind: SessionKind,
    turns: Vec<ChatTurn>,
}

/// GET /api/history - Get the caller's chat history.
async fn get_history(
    State(state): State<AppState>,
    Identity(user): Identity,
    mut jar: CookieJar,
) -> (CookieJar, Json<HistoryResponse>) {
    let key = resolve_session_key(user.as_ref(), &mut jar);
    let turns = state.sessions.history(key.as_str());
    (
        jar,
        Json(HistoryResponse {
            kind: key.kind(),
            turns,
        }),
    )
}

/// DELETE /api/history - Forget the caller's conversation.
async fn clear_history(
    State(state): State<AppState>,
    Identity(user): Identity,
    mut jar: CookieJar,
) -> (CookieJar, StatusCode) {
    let key = resolve_session_key(user.as_ref(), &mut jar);
    state.sessions.purge(key.as_str());
    (jar, StatusCode::NO_CONTENT)
}

/// GET /screening-data - Sentiment of the caller's conversation.
async fn screening_data(
    State(state): State<AppState>,
    Identity(user): Identity,
    mut jar: CookieJar,
) -> ApiResult<(CookieJar, Json<SentimentReport>)> {
    let key = resolve_session_key(user.as_ref(), &mut jar);
    let username = user.as_ref().map_or(GUEST_USERNAME, |u| u.display_name());

    match state.sentiment.analyze(key.as_str(), username).await {
        Some(report) => Ok((jar, Json(report))),
        None => Err(ApiError::BadRequest(
            "No chat history available".to_string(),
        )),
    }
}

/// GET /screening - Dashboard rows; authenticated callers only.
async fn screening(
    State(state): State<AppState>,
    Identity(user): Identity,
    mut jar: CookieJar,
) -> ApiResult<Json<Vec<SentimentReport>>> {
    let Some(user) = user else {
        return Err(ApiError::Unauthorized);
    };

    let key = resolve_session_key(Some(&user), &mut jar);
    let report = state
        .sentiment
        .analyze(key.as_str(), user.display_name())
        .await;
    Ok(Json(dashboard(report, chrono::Local::now())))
}

/// GET /api/models - Models available to the configured key.
async fn list_models(State(state): State<AppState>) -> ApiResult<Json<Vec<ModelInfo>>> {
    let models = state.model.list_models().await?;
    Ok(Json(models))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
    pending_expiries: usize,
}

/// GET /health - Liveness and session counters.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.sessions.session_count(),
        pending_expiries: state.sessions.pending_expiries(),
    })
}
