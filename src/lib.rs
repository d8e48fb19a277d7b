//! Therapy Bot
//!
//! A chat front-end that relays user messages to a generative-language model,
//! keeps short-lived per-session transcripts in memory, and periodically asks
//! the same model to classify the emotional tone of a conversation for a
//! screening dashboard.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP server with cookie-backed anonymous sessions
//! - **Session Store**: Mutex-guarded transcripts with retention pruning and
//!   timed purging of anonymous sessions
//! - **LLM**: Gemini `generateContent` client behind the [`llm::ChatModel`] trait
//! - **Sentiment**: Cooldown-limited screening of session transcripts
//!
//! # Modules
//!
//! - [`config`]: Layered configuration (defaults, file, env, CLI)
//! - [`llm`]: Model client and prompts
//! - [`security`]: Bearer-token identity and rate limiting
//! - [`sentiment`]: Sentiment parsing, reports and analysis
//! - [`server`]: Router, handlers and server lifecycle
//! - [`session`]: Conversation and session management

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod llm;
pub mod security;
pub mod sentiment;
pub mod server;
pub mod session;
pub mod telemetry;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::ChatModel;
use crate::security::rate_limit::SimpleRateLimiter;
use crate::sentiment::SentimentService;
use crate::session::ChatSessionStore;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Session store for conversation management.
    pub sessions: ChatSessionStore,
    /// Model used for replies, sentiment and model listing.
    pub model: Arc<dyn ChatModel>,
    /// Sentiment screening over the session store.
    pub sentiment: SentimentService,
    /// Global Rate Limiter
    pub rate_limiter: Arc<SimpleRateLimiter>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire up the application from its configuration and model.
    ///
    /// The returned state owns the only session store; call
    /// [`ChatSessionStore::shutdown`] on `sessions` during teardown.
    #[must_use]
    pub fn new(config: Arc<AppConfig>, model: Arc<dyn ChatModel>) -> Self {
        let sessions = ChatSessionStore::new(config.session.policy());
        let sentiment = SentimentService::new(sessions.clone(), Arc::clone(&model));
        let rate_limiter = Arc::new(SimpleRateLimiter::new(
            config.resilience.requests_per_second,
            config.resilience.burst_size,
        ));

        Self {
            sessions,
            model,
            sentiment,
            rate_limiter,
            config,
        }
    }
}
