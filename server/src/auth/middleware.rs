//! Authentication extractor.
//!
//! When `AUTH_SECRET` is configured every document route requires
//! `Authorization: Bearer <secret>`. Without it the server is open, which
//! suits a single-congregation deployment on a private network.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Caller that passed the bearer check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUser {
    /// No secret is configured.
    Anonymous,
    /// The request carried the configured secret.
    Authorized,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.auth_secret.as_deref() else {
            return Ok(AuthUser::Anonymous);
        };

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match auth_header {
            Some(header) => match header.strip_prefix("Bearer ") {
                Some(token) if tokens_match(token.trim(), secret) => Ok(AuthUser::Authorized),
                Some(_) => {
                    tracing::warn!("Rejected request with wrong bearer token");
                    Err((StatusCode::UNAUTHORIZED, "Invalid bearer token"))
                }
                None => Err((
                    StatusCode::UNAUTHORIZED,
                    "Invalid authorization header format",
                )),
            },
            None => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
        }
    }
}

fn tokens_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
