//! Conversation sentiment screening.
//!
//! The model is asked to label a transcript with one emotion and an intensity
//! percentage. Its free-text answer is parsed leniently: anything that does
//! not match the expected `Sentiment:` / `Intensity:` shape falls back to
//! [`DEFAULT_SENTIMENT`] at [`DEFAULT_INTENSITY`].

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Local};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::llm::ChatModel;
use crate::session::{ChatSessionStore, ChatTurn};

/// Label used when the model's answer cannot be parsed.
pub const DEFAULT_SENTIMENT: &str = "Unknown";

/// Intensity used when the model's answer cannot be parsed.
pub const DEFAULT_INTENSITY: u8 = 50;

/// Rows shown on the screening dashboard.
pub const DASHBOARD_ROWS: usize = 7;

/// Label and intensity extracted from a model answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentimentReading {
    pub label: String,
    pub intensity: u8,
}

impl Default for SentimentReading {
    fn default() -> Self {
        Self {
            label: DEFAULT_SENTIMENT.to_string(),
            intensity: DEFAULT_INTENSITY,
        }
    }
}

/// Parse `Sentiment: <label>` / `Intensity: <n>%` lines out of `text`.
#[must_use]
pub fn parse_sentiment(text: &str) -> SentimentReading {
    let mut reading = SentimentReading::default();

    for line in text.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Sentiment:") {
            let label = rest.trim();
            if !label.is_empty() {
                reading.label = label.to_string();
            }
        } else if let Some(rest) = line.strip_prefix("Intensity:") {
            reading.intensity = rest
                .trim()
                .trim_end_matches('%')
                .trim()
                .parse::<i64>()
                .map_or(DEFAULT_INTENSITY, clamp_percent);
        }
    }

    reading
}

fn clamp_percent(n: i64) -> u8 {
    u8::try_from(n.clamp(0, 100)).unwrap_or(DEFAULT_INTENSITY)
}

/// Traffic-light bucket for an intensity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentStatus {
    Good,
    Moderate,
    Low,
}

impl SentimentStatus {
    #[must_use]
    pub fn from_level(level: u8) -> Self {
        match level {
            70.. => Self::Good,
            40.. => Self::Moderate,
            _ => Self::Low,
        }
    }

    /// CSS color class used by the dashboard.
    #[must_use]
    pub fn color(self) -> &'static str {
        match self {
            Self::Good => "success",
            Self::Moderate => "warning",
            Self::Low => "danger",
        }
    }
}

/// Human wording for an intensity level.
#[must_use]
pub fn level_description(level: u8) -> &'static str {
    match level {
        80.. => "excellent",
        60.. => "good",
        40.. => "okay",
        _ => "concerning",
    }
}

/// One dashboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentReport {
    pub id: String,
    pub sentiment: String,
    pub username: String,
    pub level: u8,
    pub level_description: String,
    pub status: SentimentStatus,
    pub status_color: String,
    /// Local time of the evaluation, `HH:MM`.
    pub time: String,
}

impl SentimentReport {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        reading: SentimentReading,
        at: DateTime<Local>,
    ) -> Self {
        let status = SentimentStatus::from_level(reading.intensity);
        Self {
            id: id.into(),
            sentiment: reading.label,
            username: username.into(),
            level: reading.intensity,
            level_description: level_description(reading.intensity).to_string(),
            status,
            status_color: status.color().to_string(),
            time: at.format("%H:%M").to_string(),
        }
    }
}

/// Sample rows shown alongside (or instead of) a real evaluation.
#[must_use]
pub fn sample_reports(now: DateTime<Local>) -> Vec<SentimentReport> {
    const SAMPLES: [(&str, u8); DASHBOARD_ROWS] = [
        ("Happiness", 85),
        ("Anxiety", 45),
        ("Depression", 30),
        ("Stress", 60),
        ("Anger", 25),
        ("Fear", 40),
        ("Admiration", 75),
    ];

    let mut rng = rand::rng();
    SAMPLES
        .iter()
        .enumerate()
        .map(|(i, (label, level))| {
            let ago = ChronoDuration::hours(rng.random_range(0..24))
                + ChronoDuration::minutes(rng.random_range(0..60));
            SentimentReport::new(
                format!("default-{i}"),
                format!("User{}", i + 1),
                SentimentReading {
                    label: (*label).to_string(),
                    intensity: *level,
                },
                now - ago,
            )
        })
        .collect()
}

/// The dashboard: the caller's report first, padded with samples.
#[must_use]
pub fn dashboard(report: Option<SentimentReport>, now: DateTime<Local>) -> Vec<SentimentReport> {
    let samples = sample_reports(now);
    match report {
        Some(report) => std::iter::once(report)
            .chain(samples.into_iter().take(DASHBOARD_ROWS - 1))
            .collect(),
        None => samples,
    }
}

/// Render turns as `role: content` lines for the classifier.
#[must_use]
pub fn transcript(history: &[ChatTurn]) -> String {
    history
        .iter()
        .map(|turn| format!("{}: {}", turn.role.as_str(), turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Evaluates session sentiment, at most once per cooldown period.
#[derive(Debug, Clone)]
pub struct SentimentService {
    sessions: ChatSessionStore,
    model: Arc<dyn ChatModel>,
}

impl SentimentService {
    #[must_use]
    pub fn new(sessions: ChatSessionStore, model: Arc<dyn ChatModel>) -> Self {
        Self { sessions, model }
    }

    /// Evaluate (or reuse) the sentiment of session `key`.
    ///
    /// Returns `None` when the session has no history. Within the cooldown
    /// the cached result is returned without calling the model.
    pub async fn analyze(&self, key: &str, username: &str) -> Option<SentimentReport> {
        let history = self.sessions.history(key);
        if history.is_empty() {
            return None;
        }

        if !self.sessions.is_sentiment_check_due(key) {
            if let Some(cached) = self.sessions.sentiment(key) {
                tracing::debug!(name: "sentiment.cached", key = %key, "Reusing cached sentiment");
                return Some(cached);
            }
        }

        let reading = match self.model.classify_sentiment(&transcript(&history)).await {
            Ok(text) => parse_sentiment(&text),
            Err(e) => {
                tracing::error!(
                    name: "sentiment.failed",
                    key = %key,
                    error = %e,
                    "Sentiment classification failed; using default"
                );
                SentimentReading::default()
            }
        };

        let report = SentimentReport::new(key, username, reading, Local::now());
        self.sessions.record_sentiment_check(key);
        self.sessions.set_sentiment(key, report.clone());

        tracing::info!(
            name: "sentiment.evaluated",
            key = %key,
            sentiment = %report.sentiment,
            level = report.level,
            "Sentiment evaluated"
        );
        Some(report)
    }
}
