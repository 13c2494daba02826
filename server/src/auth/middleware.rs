//! Authentication extractor.
//!
//! Clients present a token either as the `token` query parameter (the only
//! option for browser WebSockets) or as a Bearer `Authorization` header.
//! When `AUTH_SECRET` is configured the token must equal it; otherwise any
//! non-empty token is accepted.

use axum::{
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from request.
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl FromRequestParts<AppState> for AuthToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let from_query = Query::<TokenQuery>::from_request_parts(parts, state)
            .await
            .ok()
            .and_then(|Query(q)| q.token);

        let from_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .map(str::to_string);

        let Some(token) = from_query.or(from_header) else {
            tracing::debug!("Rejected request without token");
            return Err(AppError::Unauthorized);
        };

        if !state.config.accepts_token(&token) {
            tracing::warn!(empty = token.is_empty(), "Rejected sync token");
            return Err(AppError::Unauthorized);
        }

        Ok(AuthToken { token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::http::Request;

    async fn extract(secret: Option<&str>, uri: &str, bearer: Option<&str>) -> Result<AuthToken, AppError> {
        let state = AppState::new(Config::local(secret));
        let mut request = Request::builder().uri(uri);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let (mut parts, _) = request.body(()).unwrap().into_parts();
        AuthToken::from_request_parts(&mut parts, &state).await
    }

    #[tokio::test]
    async fn token_from_query_or_header() {
        let auth = extract(None, "/sync/family?token=abc", None).await.unwrap();
        assert_eq!(auth.token, "abc");

        let auth = extract(None, "/sync/family", Some("xyz")).await.unwrap();
        assert_eq!(auth.token, "xyz");
    }

    #[tokio::test]
    async fn missing_or_empty_token_rejected() {
        assert!(matches!(
            extract(None, "/sync/family", None).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            extract(None, "/sync/family?token=", None).await,
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn secret_must_match() {
        assert!(extract(Some("s3cret"), "/sync/family?token=s3cret", None)
            .await
            .is_ok());
        assert!(matches!(
            extract(Some("s3cret"), "/sync/family?token=guess", None).await,
            Err(AppError::Unauthorized)
        ));
    }
}
