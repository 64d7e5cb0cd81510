use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};

use super::tokens::{SessionClaims, TokenService};
use crate::error::{AppError, TokenError};

/// Session claims from `Authorization: Bearer <jwt>`
#[async_trait]
impl<S> FromRequestParts<S> for SessionClaims
where
    Arc<TokenService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(TokenError::Missing)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("Invalid authorization header format".to_string()))?;

        let tokens = Arc::<TokenService>::from_ref(state);
        Ok(tokens.verify_session(token.trim())?)
    }
}
