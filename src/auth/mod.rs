//! PSK-based authentication with two roles.
//!
//! The admin key opens every route; the courier key opens courier routes
//! only. Keys are compared in constant time.

use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::errors::AppError;

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Role a route group requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Courier,
}

/// The configured pre-shared keys.
#[derive(Debug, Clone, Default)]
pub struct AccessKeys {
    pub admin: Option<String>,
    pub courier: Option<String>,
}

impl AccessKeys {
    pub fn from_config(config: &Config) -> Self {
        Self {
            admin: config.admin_psk.clone(),
            courier: config.courier_psk.clone(),
        }
    }

    /// Role granted by a presented key, if any.
    fn role_for(&self, provided: &str) -> Option<Role> {
        // Check both keys so timing does not reveal which one matched
        let is_admin = matches_key(provided, self.admin.as_deref());
        let is_courier = matches_key(provided, self.courier.as_deref());

        if is_admin {
            Some(Role::Admin)
        } else if is_courier {
            Some(Role::Courier)
        } else {
            None
        }
    }

    /// Decide whether a request with these headers may use a `required` route.
    pub fn authorize(&self, headers: &HeaderMap, required: Role) -> Result<(), AppError> {
        // No keys configured: dev mode
        if self.admin.is_none() && self.courier.is_none() {
            return Ok(());
        }

        let provided = provided_key(headers)
            .ok_or_else(|| AppError::Unauthorized("Missing or invalid API key".to_string()))?;

        match (self.role_for(provided), required) {
            (None, _) => Err(AppError::Unauthorized("Invalid API key".to_string())),
            (Some(Role::Admin), _) | (Some(Role::Courier), Role::Courier) => Ok(()),
            (Some(Role::Courier), Role::Admin) => Err(AppError::Forbidden(
                "This operation requires the admin key".to_string(),
            )),
        }
    }
}

/// Auth layer function for a route group requiring `required`.
pub async fn psk_auth_layer(
    keys: AccessKeys,
    required: Role,
    request: Request,
    next: Next,
) -> Response {
    match keys.authorize(request.headers(), required) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            tracing::debug!(path = %request.uri().path(), code = err.error_code(), "Request rejected");
            err.into_response()
        }
    }
}

/// The `x-api-key` header, falling back to a bearer token.
fn provided_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        })
}

fn matches_key(provided: &str, expected: Option<&str>) -> bool {
    expected.is_some_and(|expected| constant_time_compare(provided, expected))
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn keys() -> AccessKeys {
        AccessKeys {
            admin: Some("admin-key".to_string()),
            courier: Some("courier-key".to_string()),
        }
    }

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("test-key-123", "test-key-123"));
        assert!(!constant_time_compare("test-key-123", "test-key-124"));
        assert!(!constant_time_compare("short", "much-longer-key"));
        assert!(!constant_time_compare("", "not-empty"));
    }

    #[test]
    fn test_admin_key_opens_everything() {
        let h = headers(API_KEY_HEADER, "admin-key");
        assert!(keys().authorize(&h, Role::Admin).is_ok());
        assert!(keys().authorize(&h, Role::Courier).is_ok());
    }

    #[test]
    fn test_courier_key_is_forbidden_on_admin_routes() {
        let h = headers(API_KEY_HEADER, "courier-key");
        assert!(keys().authorize(&h, Role::Courier).is_ok());
        assert!(matches!(
            keys().authorize(&h, Role::Admin),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_missing_or_wrong_key_is_unauthorized() {
        assert!(matches!(
            keys().authorize(&HeaderMap::new(), Role::Courier),
            Err(AppError::Unauthorized(_))
        ));
        let h = headers(API_KEY_HEADER, "nope");
        assert!(matches!(
            keys().authorize(&h, Role::Courier),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_bearer_token_fallback() {
        let h = headers("authorization", "Bearer courier-key");
        assert!(keys().authorize(&h, Role::Courier).is_ok());
    }

    #[test]
    fn test_no_keys_is_dev_mode() {
        let open = AccessKeys::default();
        assert!(open.authorize(&HeaderMap::new(), Role::Admin).is_ok());
    }

    #[test]
    fn test_courier_key_alone_does_not_grant_admin() {
        let courier_only = AccessKeys {
            admin: None,
            courier: Some("courier-key".to_string()),
        };
        let h = headers(API_KEY_HEADER, "courier-key");
        assert!(matches!(
            courier_only.authorize(&h, Role::Admin),
            Err(AppError::Forbidden(_))
        ));
    }
}
