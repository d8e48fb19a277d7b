use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use tower::ServiceExt;

use therapy_bot::AppState;
use therapy_bot::config::AppConfig;
use therapy_bot::llm::prompts::APOLOGY;
use therapy_bot::llm::{ChatModel, LlmError, ModelInfo};
use therapy_bot::security::claims::UserClaims;
use therapy_bot::server::build_router;
use therapy_bot::session::{ANONYMOUS_SESSION_SLOT, ChatTurn};

const SECRET: &str = "test-secret";

/// Model double with canned answers that records what it was asked.
#[derive(Debug, Default)]
struct ScriptedModel {
    fail_replies: bool,
    history_lengths: Mutex<Vec<usize>>,
    sentiment_calls: AtomicUsize,
}

#[async_trait::async_trait]
impl ChatModel for ScriptedModel {
    async fn reply(&self, history: &[ChatTurn], message: &str) -> Result<String, LlmError> {
        self.history_lengths
            .lock()
            .expect("lock")
            .push(history.len());
        if self.fail_replies {
            return Err(LlmError::Api {
                status: 500,
                message: "backend down".to_string(),
            });
        }
        Ok(format!("You said: {message}"))
    }

    async fn classify_sentiment(&self, _transcript: &str) -> Result<String, LlmError> {
        self.sentiment_calls.fetch_add(1, Ordering::SeqCst);
        Ok("Sentiment: Anxiety\nIntensity: 72%".to_string())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        Err(LlmError::RateLimited("quota exceeded".to_string()))
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::load_from_args(["therapy-bot"]).expect("default config");
    config.security.jwt_required = false;
    config.security.jwt_secret = Some(SECRET.to_string());
    config.resilience.rate_limit_enabled = false;
    config
}

fn app_with(config: AppConfig, model: Arc<ScriptedModel>) -> (Router, AppState) {
    let state = AppState::new(Arc::new(config), model);
    (build_router(state.clone()), state)
}

fn app(model: Arc<ScriptedModel>) -> (Router, AppState) {
    app_with(test_config(), model)
}

fn bearer(sub: &str, name: &str) -> String {
    let claims = UserClaims {
        sub: sub.to_string(),
        name: Some(name.to_string()),
        roles: None,
        exp: usize::try_from(chrono::Utc::now().timestamp() + 3600).expect("positive"),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("encode token");
    format!("Bearer {token}")
}

fn chat_request(message: &str, cookie: Option<&str>, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let body = format!("message={}", message.replace(' ', "+"));
    builder.body(Body::from(body)).expect("request")
}

fn get(uri: &str, cookie: Option<&str>, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).expect("request")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.expect("infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, json)
}

/// `name=value` pair of the anonymous session cookie, if one was set.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| v.starts_with(ANONYMOUS_SESSION_SLOT))
        .find_map(|v| v.split(';').next().map(str::to_string))
}

#[tokio::test]
async fn chat_rejects_empty_message() {
    let (app, state) = app(Arc::new(ScriptedModel::default()));

    let (status, _, body) = send(&app, chat_request("   ", None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Message cannot be empty");
    assert_eq!(state.sessions.session_count(), 0);
}

#[tokio::test]
async fn anonymous_chat_keeps_one_session_per_cookie() {
    let model = Arc::new(ScriptedModel::default());
    let (app, _state) = app(Arc::clone(&model));

    let (status, headers, body) = send(&app, chat_request("Hello there", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "You said: Hello there");

    let cookie = session_cookie(&headers).expect("anonymous cookie issued");
    assert!(cookie.starts_with(&format!("{ANONYMOUS_SESSION_SLOT}=anon_")));

    let (status, headers, _) = send(&app, chat_request("Again", Some(&cookie), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(session_cookie(&headers).is_none());

    // Second call saw the first exchange as history
    assert_eq!(*model.history_lengths.lock().expect("lock"), vec![0, 2]);

    let (status, _, body) = send(&app, get("/api/history", Some(&cookie), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "anonymous");
    let turns = body["turns"].as_array().expect("turns");
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[0]["content"], "Hello there");
    assert_eq!(turns[1]["role"], "model");
}

#[tokio::test]
async fn separate_browsers_do_not_share_history() {
    let (app, state) = app(Arc::new(ScriptedModel::default()));

    let (_, first, _) = send(&app, chat_request("one", None, None)).await;
    let (_, second, _) = send(&app, chat_request("two", None, None)).await;
    let first = session_cookie(&first).expect("cookie");
    let second = session_cookie(&second).expect("cookie");
    assert_ne!(first, second);
    assert_eq!(state.sessions.session_count(), 2);

    let (_, _, body) = send(&app, get("/api/history", Some(&second), None)).await;
    let turns = body["turns"].as_array().expect("turns");
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0]["content"], "two");
}

#[tokio::test]
async fn model_failure_returns_apology() {
    let model = Arc::new(ScriptedModel {
        fail_replies: true,
        ..ScriptedModel::default()
    });
    let (app, _state) = app(model);

    let (status, headers, body) = send(&app, chat_request("Hello", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], APOLOGY);

    let cookie = session_cookie(&headers).expect("cookie");
    let (_, _, body) = send(&app, get("/api/history", Some(&cookie), None)).await;
    assert_eq!(body["turns"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn clearing_history_empties_the_session() {
    let (app, state) = app(Arc::new(ScriptedModel::default()));

    let (_, headers, _) = send(&app, chat_request("Hello", None, None)).await;
    let cookie = session_cookie(&headers).expect("cookie");

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/history")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .expect("request");
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(state.sessions.session_count(), 0);

    let (_, _, body) = send(&app, get("/api/history", Some(&cookie), None)).await;
    assert_eq!(body["turns"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn screening_data_requires_history_and_respects_cooldown() {
    let model = Arc::new(ScriptedModel::default());
    let (app, _state) = app(Arc::clone(&model));

    let (status, _, body) = send(&app, get("/screening-data", None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No chat history available");

    let (_, headers, _) = send(&app, chat_request("I feel uneasy", None, None)).await;
    let cookie = session_cookie(&headers).expect("cookie");

    let (status, _, body) = send(&app, get("/screening-data", Some(&cookie), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sentiment"], "Anxiety");
    assert_eq!(body["level"], 72);
    assert_eq!(body["username"], "Guest");
    assert_eq!(body["status"], "Good");

    let (status, _, _) = send(&app, get("/screening-data", Some(&cookie), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(model.sentiment_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn screening_dashboard_requires_authentication() {
    let (app, _state) = app(Arc::new(ScriptedModel::default()));

    let (status, _, body) = send(&app, get("/screening", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "authentication required");
}

#[tokio::test]
async fn authenticated_user_gets_stable_session_and_dashboard() {
    let (app, state) = app(Arc::new(ScriptedModel::default()));
    let auth = bearer("42", "Ada");

    let (status, headers, _) = send(&app, chat_request("Hello", None, Some(&auth))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(session_cookie(&headers).is_none());
    assert_eq!(state.sessions.history("user_42").len(), 2);
    assert_eq!(state.sessions.pending_expiries(), 0);

    let (status, _, body) = send(&app, get("/screening", None, Some(&auth))).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().expect("rows");
    assert_eq!(rows.len(), 7);
    assert_eq!(rows[0]["id"], "user_42");
    assert_eq!(rows[0]["username"], "Ada");
    assert_eq!(rows[0]["sentiment"], "Anxiety");
}

#[tokio::test]
async fn invalid_token_is_rejected() {
    let (app, _state) = app(Arc::new(ScriptedModel::default()));

    let (status, _, _) = send(&app, get("/health", None, Some("Bearer not-a-jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn jwt_required_rejects_anonymous_callers() {
    let mut config = test_config();
    config.security.jwt_required = true;
    let (app, _state) = app_with(config, Arc::new(ScriptedModel::default()));

    let (status, _, _) = send(&app, chat_request("Hello", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(&app, chat_request("Hello", None, Some(&bearer("7", "Bo")))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn list_models_maps_quota_errors() {
    let (app, _state) = app(Arc::new(ScriptedModel::default()));

    let (status, _, body) = send(&app, get("/api/models", None, None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|e| e.contains("quota exceeded"))
    );
}

#[tokio::test]
async fn rate_limiter_rejects_bursts() {
    let mut config = test_config();
    config.resilience.rate_limit_enabled = true;
    config.resilience.requests_per_second = 0.01;
    config.resilience.burst_size = 1.0;
    let (app, _state) = app_with(config, Arc::new(ScriptedModel::default()));

    let (status, _, _) = send(&app, get("/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, get("/health", None, None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn health_reports_session_counters() {
    let (app, _state) = app(Arc::new(ScriptedModel::default()));
    send(&app, chat_request("Hello", None, None)).await;

    let (status, _, body) = send(&app, get("/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 1);
    assert_eq!(body["pending_expiries"], 2);
}

#[tokio::test]
async fn index_page_is_served() {
    let (app, _state) = app(Arc::new(ScriptedModel::default()));

    let response = app.oneshot(get("/", None, None)).await.expect("infallible");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert!(String::from_utf8_lossy(&bytes).contains("<form id=\"chat\">"));
}
