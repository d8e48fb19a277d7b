use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use super::claims::{UserClaims, UserContext};

/// Attach a [`UserContext`] to requests carrying a valid bearer token.
///
/// Requests without a token pass through anonymously unless
/// `security.jwt_required` is set. A token that fails verification is always
/// rejected, as is any token when no secret is configured.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header.and_then(|v| v.strip_prefix("Bearer ")) {
        Some(token) => token.trim(),
        None => {
            if !state.config.security.jwt_required {
                return Ok(next.run(request).await);
            }
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let Some(secret) = state.config.security.jwt_secret.as_deref() else {
        tracing::warn!(
            name: "auth.no_secret",
            "Bearer token presented but no JWT secret is configured"
        );
        return Err(StatusCode::UNAUTHORIZED);
    };

    // Note: In production, cache the DecodingKey
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::default();

    match decode::<UserClaims>(token, &key, &validation) {
        Ok(token_data) => {
            let claims = token_data.claims;
            let context = UserContext {
                user_id: claims.sub.clone(),
                claims,
            };
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        Err(e) => {
            tracing::debug!(name: "auth.rejected", error = %e, "Invalid bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
