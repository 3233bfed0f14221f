//! Stand-in for the external auth collaborator. Token issuance and
//! verification live outside this service; the guard only checks that the
//! configured credentials are presented.

use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde_json::json;

use crate::api::ApiError;

pub struct AuthGuard {
    auth_token: String,
    api_key: String,
}

impl AuthGuard {
    pub fn new(auth_token: String, api_key: String) -> Self {
        Self {
            auth_token,
            api_key,
        }
    }

    /// Write endpoints require `Authorization: Bearer <token>`.
    pub fn require_bearer_token(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        match token {
            Some(token) if token == self.auth_token => Ok(()),
            _ => Err(unauthorized()),
        }
    }

    /// Read endpoints require an `X-Api-Key` header.
    pub fn require_api_key(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let key = headers.get("x-api-key").and_then(|value| value.to_str().ok());

        match key {
            Some(key) if key == self.api_key => Ok(()),
            _ => Err(unauthorized()),
        }
    }
}

fn unauthorized() -> ApiError {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> AuthGuard {
        AuthGuard::new("secret-token".to_string(), "secret-key".to_string())
    }

    #[test]
    fn accepts_the_configured_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer secret-token".parse().unwrap());
        assert!(guard().require_bearer_token(&headers).is_ok());
    }

    #[test]
    fn rejects_missing_or_wrong_bearer_token() {
        let guard = guard();
        assert!(guard.require_bearer_token(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert!(guard.require_bearer_token(&headers).is_err());

        // Token without the Bearer scheme.
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "secret-token".parse().unwrap());
        assert!(guard.require_bearer_token(&headers).is_err());
    }

    #[test]
    fn accepts_the_configured_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret-key".parse().unwrap());
        assert!(guard().require_api_key(&headers).is_ok());
    }

    #[test]
    fn rejects_missing_or_wrong_api_key() {
        let guard = guard();
        assert!(guard.require_api_key(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "nope".parse().unwrap());
        let err = guard.require_api_key(&headers).unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }
}
