use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use tracing::warn;
use uuid::Uuid;

use super::claims::verify_token;
use crate::state::AppState;

/// Authenticated caller, taken from the bearer token's `sub`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing Authorization header".into()))?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or((StatusCode::UNAUTHORIZED, "invalid auth scheme".into()))?;

        let claims = verify_token(&state.config.jwt, token).map_err(|e| {
            warn!(error = %e, "rejected bearer token");
            (StatusCode::UNAUTHORIZED, "invalid or expired token".to_string())
        })?;

        Ok(AuthUser(claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::sign_token;
    use axum::http::{header, Request};

    async fn extract(state: &AppState, auth: Option<String>) -> Result<AuthUser, (StatusCode, String)> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        AuthUser::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn accepts_valid_bearer_token() {
        let state = AppState::fake();
        let user = Uuid::new_v4();
        let token = sign_token(&state.config.jwt, user, 60).unwrap();
        let AuthUser(id) = extract(&state, Some(format!("Bearer {token}"))).await.unwrap();
        assert_eq!(id, user);
    }

    #[tokio::test]
    async fn rejects_missing_or_malformed_header() {
        let state = AppState::fake();
        let (status, _) = extract(&state, None).await.unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = sign_token(&state.config.jwt, Uuid::new_v4(), 60).unwrap();
        let (status, msg) = extract(&state, Some(format!("Token {token}"))).await.unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(msg, "invalid auth scheme");
    }

    #[tokio::test]
    async fn rejects_token_for_another_audience() {
        let state = AppState::fake();
        let mut other = state.config.jwt.clone();
        other.audience = "someone-else".into();
        let token = sign_token(&other, Uuid::new_v4(), 60).unwrap();
        let (status, _) = extract(&state, Some(format!("Bearer {token}"))).await.unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
