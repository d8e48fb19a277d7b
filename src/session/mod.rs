//! Short-lived conversational state.
//!
//! This module holds per-session chat transcripts and sentiment bookkeeping
//! in process memory. Sessions are created lazily on first use and disappear
//! when the process exits; anonymous sessions are additionally purged a fixed
//! delay after their last write.
//!
//! # Architecture
//!
//! - [`ChatSessionStore`]: Thread-safe store for all active sessions
//! - [`resolve_session_key`]: Maps a request's identity to a [`SessionKey`]
//! - [`ExpiryTimers`]: Deferred purge tasks for anonymous sessions
//!
//! # Example
//!
//! ```rust
//! use therapy_bot::session::{ChatSessionStore, Role};
//!
//! let store = ChatSessionStore::default();
//! store.append_turn("user_7", Role::User, "Hello!");
//!
//! let history = store.history("user_7");
//! assert_eq!(history.len(), 1);
//! ```

mod expiry;
mod identity;
mod store;

pub use expiry::ExpiryTimers;
pub use identity::{
    ANONYMOUS_SESSION_SLOT, IdentityError, SessionKey, SessionKind, SessionSlot,
    is_anonymous_key, is_expiring_key, resolve_session_key,
};
pub use store::{
    ChatSessionStore, ChatTurn, DEFAULT_ANONYMOUS_PURGE_DELAY, DEFAULT_RETENTION_WINDOW,
    DEFAULT_SENTIMENT_COOLDOWN, Role, SessionPolicy,
};
