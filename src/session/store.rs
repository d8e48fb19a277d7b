//! In-memory chat session store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::expiry::ExpiryTimers;
use super::identity::is_expiring_key;
use crate::sentiment::SentimentReport;

/// Default turn retention window (30 minutes).
pub const DEFAULT_RETENTION_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Default delay before an idle anonymous session is purged (15 minutes).
pub const DEFAULT_ANONYMOUS_PURGE_DELAY: Duration = Duration::from_secs(15 * 60);

/// Default minimum spacing between sentiment checks (2 minutes).
pub const DEFAULT_SENTIMENT_COOLDOWN: Duration = Duration::from_secs(2 * 60);

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// One message in a conversation. Immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Monotonic timestamp used for age checks.
    #[serde(skip)]
    recorded_at: Instant,
}

impl ChatTurn {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            created_at: Utc::now(),
            recorded_at: Instant::now(),
        }
    }

    /// Time elapsed since this turn was recorded.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.recorded_at.elapsed()
    }
}

/// Lifetimes governing the store's externally visible behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Turns older than this are pruned.
    pub retention_window: Duration,
    /// Anonymous sessions are purged this long after their last write.
    pub anonymous_purge_delay: Duration,
    /// Minimum time between two sentiment checks of one session.
    pub sentiment_cooldown: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            retention_window: DEFAULT_RETENTION_WINDOW,
            anonymous_purge_delay: DEFAULT_ANONYMOUS_PURGE_DELAY,
            sentiment_cooldown: DEFAULT_SENTIMENT_COOLDOWN,
        }
    }
}

/// The three per-session maps. Always accessed under one lock.
#[derive(Debug, Default)]
struct SessionTables {
    turns: HashMap<String, Vec<ChatTurn>>,
    last_sentiment_check: HashMap<String, Instant>,
    sentiment: HashMap<String, SentimentReport>,
}

impl SessionTables {
    fn purge(&mut self, key: &str) -> bool {
        let had_turns = self.turns.remove(key).is_some();
        let had_check = self.last_sentiment_check.remove(key).is_some();
        let had_result = self.sentiment.remove(key).is_some();
        had_turns || had_check || had_result
    }
}

#[derive(Debug)]
struct StoreInner {
    tables: Mutex<SessionTables>,
    policy: SessionPolicy,
    timers: ExpiryTimers,
}

impl StoreInner {
    /// Take the store lock, recovering the tables if a previous holder panicked.
    fn lock(&self) -> MutexGuard<'_, SessionTables> {
        self.tables.lock().unwrap_or_else(|poisoned| {
            tracing::error!(
                name: "session.lock.poisoned",
                "Session store lock was poisoned; continuing with recovered state"
            );
            poisoned.into_inner()
        })
    }

    fn purge(&self, key: &str) {
        if self.lock().purge(key) {
            tracing::debug!(name: "session.purged", key = %key, "Session purged");
        }
    }
}

/// Thread-safe store of short-lived chat sessions.
///
/// Cheap to clone; clones share the same state. All operations serialize on
/// a single mutex covering every session, and none of them surface errors:
/// faults are logged and a degraded value is returned instead.
#[derive(Debug, Clone)]
pub struct ChatSessionStore {
    inner: Arc<StoreInner>,
}

impl Default for ChatSessionStore {
    fn default() -> Self {
        Self::new(SessionPolicy::default())
    }
}

impl ChatSessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                tables: Mutex::new(SessionTables::default()),
                policy,
                timers: ExpiryTimers::new(),
            }),
        }
    }

    /// The policy this store was built with.
    #[must_use]
    pub fn policy(&self) -> SessionPolicy {
        self.inner.policy
    }

    /// Snapshot of the turns currently retained for `key`.
    ///
    /// Unknown keys yield an empty history.
    #[must_use]
    pub fn history(&self, key: &str) -> Vec<ChatTurn> {
        let retention = self.inner.policy.retention_window;
        let tables = self.inner.lock();
        tables
            .turns
            .get(key)
            .map(|turns| {
                turns
                    .iter()
                    .filter(|turn| turn.age() < retention)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append a turn to `key`, prune expired turns, and for anonymous (or
    /// temporary) keys schedule the session purge.
    pub fn append_turn(&self, key: &str, role: Role, content: impl Into<String>) {
        let retention = self.inner.policy.retention_window;
        {
            let mut tables = self.inner.lock();
            let turns = tables.turns.entry(key.to_string()).or_default();
            turns.push(ChatTurn::new(role, content.into()));
            turns.retain(|turn| turn.age() < retention);
        }

        if is_expiring_key(key) {
            self.schedule_purge(key);
        }
    }

    /// Remove every piece of state held for `key`. Unknown keys are a no-op.
    pub fn purge(&self, key: &str) {
        self.inner.purge(key);
    }

    /// Whether the sentiment of `key` should be (re)evaluated.
    #[must_use]
    pub fn is_sentiment_check_due(&self, key: &str) -> bool {
        let cooldown = self.inner.policy.sentiment_cooldown;
        self.inner
            .lock()
            .last_sentiment_check
            .get(key)
            .is_none_or(|checked_at| checked_at.elapsed() >= cooldown)
    }

    /// Record that a sentiment check of `key` happened now.
    pub fn record_sentiment_check(&self, key: &str) {
        let now = Instant::now();
        self.inner
            .lock()
            .last_sentiment_check
            .entry(key.to_string())
            .and_modify(|checked_at| *checked_at = (*checked_at).max(now))
            .or_insert(now);
    }

    /// Store the latest sentiment result for `key`.
    pub fn set_sentiment(&self, key: &str, report: SentimentReport) {
        self.inner
            .lock()
            .sentiment
            .insert(key.to_string(), report);
    }

    /// The latest sentiment result for `key`, if any.
    #[must_use]
    pub fn sentiment(&self, key: &str) -> Option<SentimentReport> {
        self.inner.lock().sentiment.get(key).cloned()
    }

    /// Number of sessions holding at least one turn inside the retention window.
    #[must_use]
    pub fn session_count(&self) -> usize {
        let retention = self.inner.policy.retention_window;
        self.inner
            .lock()
            .turns
            .values()
            .filter(|turns| turns.iter().any(|turn| turn.age() < retention))
            .count()
    }

    /// Number of anonymous purge timers that have not fired.
    #[must_use]
    pub fn pending_expiries(&self) -> usize {
        self.inner.timers.pending()
    }

    /// Cancel outstanding purge timers. Stored sessions are left untouched.
    pub async fn shutdown(&self) {
        self.inner.timers.shutdown().await;
        tracing::info!(name: "session.store.shutdown", "Session store shut down");
    }

    fn schedule_purge(&self, key: &str) {
        let delay = self.inner.policy.anonymous_purge_delay;
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let key = key.to_string();
        self.inner.timers.schedule(delay, move || async move {
            if let Some(inner) = weak.upgrade() {
                inner.purge(&key);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back_in_order() {
        let store = ChatSessionStore::default();
        store.append_turn("user_1", Role::User, "Hello");
        store.append_turn("user_1", Role::Model, "Hi there");

        let history = store.history("user_1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "Hello");
        assert_eq!(history[1].role, Role::Model);
        assert_eq!(history[1].content, "Hi there");
    }

    #[test]
    fn history_is_a_copy() {
        let store = ChatSessionStore::default();
        store.append_turn("user_1", Role::User, "Hello");

        let mut snapshot = store.history("user_1");
        snapshot.clear();

        assert_eq!(store.history("user_1").len(), 1);
    }

    #[test]
    fn unknown_key_is_empty() {
        let store = ChatSessionStore::default();
        assert!(store.history("nobody").is_empty());
        assert!(store.sentiment("nobody").is_none());
        assert!(store.is_sentiment_check_due("nobody"));
    }

    #[test]
    fn purge_unknown_key_is_noop() {
        let store = ChatSessionStore::default();
        store.purge("ghost");
        store.purge("ghost");
        assert!(store.history("ghost").is_empty());
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn sentiment_check_respects_cooldown_marker() {
        let store = ChatSessionStore::default();
        assert!(store.is_sentiment_check_due("user_1"));

        store.record_sentiment_check("user_1");
        assert!(!store.is_sentiment_check_due("user_1"));
        assert!(store.is_sentiment_check_due("user_2"));
    }

    fn short_retention() -> SessionPolicy {
        SessionPolicy {
            retention_window: Duration::from_secs(60),
            ..SessionPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn append_prunes_only_its_own_key() {
        let store = ChatSessionStore::new(short_retention());
        store.append_turn("user_b", Role::User, "old");

        tokio::time::sleep(Duration::from_secs(61)).await;
        store.append_turn("user_a", Role::User, "new");

        let tables = store.inner.lock();
        let b = tables.turns.get("user_b").expect("user_b still stored");
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].content, "old");
        assert_eq!(tables.turns.get("user_a").map(Vec::len), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn append_prunes_expired_turns_in_place() {
        let store = ChatSessionStore::new(short_retention());
        store.append_turn("user_a", Role::User, "old");

        tokio::time::sleep(Duration::from_secs(61)).await;
        store.append_turn("user_a", Role::User, "new");

        let tables = store.inner.lock();
        let a = tables.turns.get("user_a").expect("user_a stored");
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].content, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn session_count_ignores_fully_expired_sessions() {
        let store = ChatSessionStore::new(short_retention());
        store.append_turn("user_a", Role::User, "Hello");
        assert_eq!(store.session_count(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.session_count(), 0);

        store.append_turn("user_b", Role::User, "Hi");
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn anonymous_append_without_runtime_still_stores() {
        let store = ChatSessionStore::default();
        store.append_turn("anon_1", Role::User, "Hello");
        assert_eq!(store.history("anon_1").len(), 1);
        assert_eq!(store.pending_expiries(), 0);
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let store = ChatSessionStore::default();
        store.append_turn("user_1", Role::User, "Hello");

        let inner = Arc::clone(&store.inner);
        let _ = std::thread::spawn(move || {
            let _guard = inner.tables.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        store.append_turn("user_1", Role::Model, "Still here");
        assert_eq!(store.history("user_1").len(), 2);
    }
}
