use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserClaims {
    pub sub: String, // Account id (Subject)
    pub name: Option<String>,
    pub roles: Option<Vec<String>>,
    pub exp: usize, // Expiration time (UNIX timestamp)
}

/// Authenticated caller, inserted into request extensions by the auth middleware.
#[derive(Clone, Debug)]
pub struct UserContext {
    pub user_id: String,
    pub claims: UserClaims,
}

impl UserContext {
    /// Name shown on the dashboard: the token's display name, else the account id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.claims
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.user_id)
    }
}

/// Extractor yielding the caller's [`UserContext`] when one was attached.
///
/// Never rejects; anonymous requests extract as `Identity(None)`.
#[derive(Clone, Debug)]
pub struct Identity(pub Option<UserContext>);

impl<S> axum::extract::FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<UserContext>().cloned()))
    }
}
