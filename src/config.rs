use crate::llm::GeminiSettings;
use crate::session::SessionPolicy;
use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

/// Environment variable holding the Gemini API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Require JWT authentication
    #[arg(long, env = "JWT_REQUIRED")]
    pub jwt_required: Option<bool>,

    /// Enable rate limiting
    #[arg(long, env = "RATE_LIMIT_ENABLED")]
    pub rate_limit_enabled: Option<bool>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,

    /// Print the effective session configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub resilience: ResilienceConfig,
    pub session: SessionConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub jwt_required: bool,
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub rate_limit_enabled: bool,
    pub timeout_disabled: bool,
    pub requests_per_second: f32,
    pub burst_size: f32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub retention_window_secs: u64,
    pub anonymous_purge_delay_secs: u64,
    pub sentiment_cooldown_secs: u64,
}

impl SessionConfig {
    #[must_use]
    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            retention_window: Duration::from_secs(self.retention_window_secs),
            anonymous_purge_delay: Duration::from_secs(self.anonymous_purge_delay_secs),
            sentiment_cooldown: Duration::from_secs(self.sentiment_cooldown_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

impl AppConfig {
    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::from_cli(&cli)
    }

    /// Build the layered configuration.
    ///
    /// Priority: CLI flag (or its env var) > `THERAPY_*` env > config file >
    /// `./config.yaml` > defaults.
    pub fn from_cli(cli: &Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("security.jwt_required", false)?
            .set_default("resilience.rate_limit_enabled", true)?
            .set_default("resilience.timeout_disabled", false)?
            .set_default("resilience.requests_per_second", 5.0)?
            .set_default("resilience.burst_size", 10.0)?
            .set_default("resilience.request_timeout_secs", 30)?
            .set_default("session.retention_window_secs", 30 * 60)?
            .set_default("session.anonymous_purge_delay_secs", 15 * 60)?
            .set_default("session.sentiment_cooldown_secs", 2 * 60)?
            .set_default("llm.base_url", "https://generativelanguage.googleapis.com")?
            .set_default("llm.model", "gemini-1.5-flash")?
            .set_default("llm.temperature", 0.9)?
            .set_default("llm.top_p", 0.95)?
            .set_default("llm.top_k", 40)?
            .set_default("llm.max_output_tokens", 1000)?
            .set_default("llm.timeout_secs", 60)?;

        builder = builder.add_source(File::new("config.yaml", FileFormat::Yaml).required(false));
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // E.g. THERAPY_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("THERAPY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(required) = cli.jwt_required {
            builder = builder.set_override("security.jwt_required", required)?;
        }
        if let Some(rl) = cli.rate_limit_enabled {
            builder = builder.set_override("resilience.rate_limit_enabled", rl)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("resilience.timeout_disabled", td)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        let session = &self.session;
        if session.retention_window_secs == 0 {
            return Err(config::ConfigError::Message(
                "session.retention_window_secs must be greater than zero".to_string(),
            ));
        }
        if session.anonymous_purge_delay_secs == 0 {
            return Err(config::ConfigError::Message(
                "session.anonymous_purge_delay_secs must be greater than zero".to_string(),
            ));
        }
        let resilience = &self.resilience;
        if !resilience.timeout_disabled && resilience.request_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "resilience.request_timeout_secs must be greater than zero unless the timeout is disabled"
                    .to_string(),
            ));
        }
        if !resilience.requests_per_second.is_finite() || resilience.requests_per_second <= 0.0 {
            return Err(config::ConfigError::Message(
                "resilience.requests_per_second must be greater than zero".to_string(),
            ));
        }
        if !resilience.burst_size.is_finite() || resilience.burst_size < 1.0 {
            return Err(config::ConfigError::Message(
                "resilience.burst_size must be at least 1".to_string(),
            ));
        }
        if self.llm.base_url.trim().is_empty() || self.llm.model.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "llm.base_url and llm.model cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective request timeout, or `None` when disabled.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (!self.resilience.timeout_disabled)
            .then(|| Duration::from_secs(self.resilience.request_timeout_secs))
    }

    /// Log the session-related settings with recommendations.
    pub fn log_session_diagnostics(&self) {
        let policy = self.session.policy();
        tracing::info!(
            name: "config.session",
            retention_window_secs = policy.retention_window.as_secs(),
            anonymous_purge_delay_secs = policy.anonymous_purge_delay.as_secs(),
            sentiment_cooldown_secs = policy.sentiment_cooldown.as_secs(),
            cookie = crate::session::ANONYMOUS_SESSION_SLOT,
            jwt_required = self.security.jwt_required,
            jwt_secret_configured = self.security.jwt_secret.is_some(),
            "Session configuration"
        );

        if policy.anonymous_purge_delay < Duration::from_secs(60) {
            tracing::warn!(
                name: "config.session.recommendation",
                "Anonymous sessions are purged within a minute; consider a longer purge delay"
            );
        }
        if policy.anonymous_purge_delay > policy.retention_window {
            tracing::warn!(
                name: "config.session.recommendation",
                "Purge delay exceeds the retention window; turns will expire before the session does"
            );
        }
        if !self.security.jwt_required && self.security.jwt_secret.is_none() {
            tracing::warn!(
                name: "config.session.recommendation",
                "No JWT secret configured; every caller is anonymous and the screening dashboard is unreachable"
            );
        }
        if std::env::var(API_KEY_ENV).is_err() {
            tracing::warn!(
                name: "config.session.recommendation",
                "{API_KEY_ENV} is not set; chat replies will fall back to an apology"
            );
        }
    }
}

/// Gemini client settings: the `llm` section plus the API key from the environment.
#[must_use]
pub fn load_llm_settings(llm: &LlmConfig) -> GeminiSettings {
    let api_key = std::env::var(API_KEY_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty());

    GeminiSettings {
        base_url: llm.base_url.clone(),
        api_key,
        model: llm.model.clone(),
        temperature: llm.temperature,
        top_p: llm.top_p,
        top_k: llm.top_k,
        max_output_tokens: llm.max_output_tokens,
        timeout: Duration::from_secs(llm.timeout_secs),
    }
}
