//! Auth Principal extraction and scope enforcement (C8/C9 middleware).
//!
//! Generalizes the teacher's `a2a/server.rs` single shared-secret
//! `require_bearer` middleware into the full scheme §6 calls for: JWT
//! *and* API-key headers, independently validated, attached to the
//! request as an [`AuthPrincipal`], with scope checks applied per-route
//! via [`RequireScopes`].

mod api_key;
mod jwt;

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::HelixError;

pub use api_key::{ApiKeyRecord, ApiKeyStore, InMemoryApiKeyStore};
pub use jwt::{Claims, JwtValidator};

/// How a principal was authenticated (§3 `AuthPrincipal.authMethod`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Jwt,
    ApiKey,
    OAuth,
    Anonymous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[default]
    User,
    Service,
}

/// §3 `AuthPrincipal`. Attached to the request extensions by the
/// gateway's auth middleware; every downstream handler reads it from
/// there rather than re-parsing headers.
#[derive(Debug, Clone)]
pub struct AuthPrincipal {
    pub subject: String,
    pub role: Role,
    pub scopes: HashSet<String>,
    pub api_key_id: Option<String>,
    pub auth_method: AuthMethod,
}

impl AuthPrincipal {
    pub fn anonymous(default_scopes: impl IntoIterator<Item = String>) -> Self {
        Self {
            subject: "anonymous".to_string(),
            role: Role::User,
            scopes: default_scopes.into_iter().collect(),
            api_key_id: None,
            auth_method: AuthMethod::Anonymous,
        }
    }

    /// Admins bypass per-scope checks entirely (§4.8 step 3).
    pub fn has_scope(&self, scope: &str) -> bool {
        self.role == Role::Admin || self.scopes.contains(scope)
    }
}

/// Credential headers as lifted off the wire, independent of any HTTP
/// framework so this module stays testable without spinning up axum.
#[derive(Debug, Clone, Default)]
pub struct AuthHeaders {
    pub bearer_token: Option<String>,
    pub api_key: Option<String>,
}

pub struct Authenticator {
    jwt: Option<JwtValidator>,
    api_keys: Arc<dyn ApiKeyStore>,
    anonymous_allowed: bool,
    anonymous_scopes: Vec<String>,
}

impl Authenticator {
    pub fn new(jwt: Option<JwtValidator>, api_keys: Arc<dyn ApiKeyStore>, anonymous_allowed: bool, anonymous_scopes: Vec<String>) -> Self {
        Self { jwt, api_keys, anonymous_allowed, anonymous_scopes }
    }

    /// §6 "Either is accepted; both are validated independently; a
    /// failing header yields 401 only if the other is absent." A
    /// present-but-invalid JWT with a valid API key still succeeds
    /// (API-key wins), and vice versa.
    pub fn authenticate(&self, headers: &AuthHeaders) -> Result<AuthPrincipal, HelixError> {
        let jwt_result = headers.bearer_token.as_deref().map(|t| self.try_jwt(t));
        let key_result = headers.api_key.as_deref().map(|k| self.try_api_key(k));

        match (jwt_result, key_result) {
            (Some(Ok(p)), _) => Ok(p),
            (_, Some(Ok(p))) => Ok(p),
            (Some(Err(e)), None) => Err(e),
            (None, Some(Err(e))) => Err(e),
            (Some(Err(_)), Some(Err(e))) => Err(e),
            (None, None) => {
                if self.anonymous_allowed {
                    Ok(AuthPrincipal::anonymous(self.anonymous_scopes.clone()))
                } else {
                    Err(HelixError::Auth { message: "missing credentials".to_string() })
                }
            }
        }
    }

    fn try_jwt(&self, token: &str) -> Result<AuthPrincipal, HelixError> {
        let validator = self.jwt.as_ref().ok_or_else(|| HelixError::Auth { message: "jwt auth not configured".to_string() })?;
        let claims = validator.validate(token)?;
        Ok(AuthPrincipal {
            subject: claims.sub,
            role: claims.role,
            scopes: claims.scopes.into_iter().collect(),
            api_key_id: None,
            auth_method: AuthMethod::Jwt,
        })
    }

    fn try_api_key(&self, key: &str) -> Result<AuthPrincipal, HelixError> {
        let record = self.api_keys.lookup(key).ok_or_else(|| HelixError::Auth { message: "invalid api key".to_string() })?;
        Ok(AuthPrincipal {
            subject: record.subject,
            role: record.role,
            scopes: record.scopes,
            api_key_id: Some(record.key_id),
            auth_method: AuthMethod::ApiKey,
        })
    }
}

/// Chainable scope-requirement check (§4.9 "RequireScopes(...) helper").
/// Framework-agnostic: the gateway wraps this in an axum middleware that
/// reads the principal out of request extensions.
pub struct RequireScopes {
    required: Vec<String>,
}

impl RequireScopes {
    pub fn new(required: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { required: required.into_iter().map(Into::into).collect() }
    }

    pub fn check(&self, principal: &AuthPrincipal) -> Result<(), HelixError> {
        if principal.role == Role::Admin {
            return Ok(());
        }
        let missing: Vec<&str> = self.required.iter().map(String::as_str).filter(|s| !principal.scopes.contains(*s)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HelixError::Forbidden { message: format!("missing required scope(s): {}", missing.join(", ")) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(jwt: Option<JwtValidator>, keys: Vec<ApiKeyRecord>, anon: bool) -> Authenticator {
        Authenticator::new(jwt, Arc::new(InMemoryApiKeyStore::new(keys)), anon, vec!["chat".to_string()])
    }

    #[test]
    fn no_credentials_falls_back_to_anonymous_when_allowed() {
        let authenticator = auth(None, vec![], true);
        let principal = authenticator.authenticate(&AuthHeaders::default()).unwrap();
        assert_eq!(principal.auth_method, AuthMethod::Anonymous);
        assert!(principal.has_scope("chat"));
    }

    #[test]
    fn no_credentials_rejected_when_anonymous_disallowed() {
        let authenticator = auth(None, vec![], false);
        assert!(authenticator.authenticate(&AuthHeaders::default()).is_err());
    }

    #[test]
    fn valid_api_key_authenticates() {
        let key = ApiKeyRecord { key_id: "k1".into(), secret: "s3cr3t".into(), subject: "svc-a".into(), role: Role::User, scopes: ["chat".to_string()].into() };
        let authenticator = auth(None, vec![key], false);
        let headers = AuthHeaders { bearer_token: None, api_key: Some("s3cr3t".to_string()) };
        let principal = authenticator.authenticate(&headers).unwrap();
        assert_eq!(principal.subject, "svc-a");
        assert_eq!(principal.auth_method, AuthMethod::ApiKey);
    }

    #[test]
    fn invalid_api_key_with_no_jwt_present_fails() {
        let authenticator = auth(None, vec![], false);
        let headers = AuthHeaders { bearer_token: None, api_key: Some("wrong".to_string()) };
        assert!(authenticator.authenticate(&headers).is_err());
    }

    #[test]
    fn invalid_jwt_falls_back_to_valid_api_key() {
        let key = ApiKeyRecord { key_id: "k1".into(), secret: "s3cr3t".into(), subject: "svc-a".into(), role: Role::User, scopes: [].into() };
        let validator = JwtValidator::new("secret");
        let authenticator = auth(Some(validator), vec![key], false);
        let headers = AuthHeaders { bearer_token: Some("not-a-jwt".to_string()), api_key: Some("s3cr3t".to_string()) };
        let principal = authenticator.authenticate(&headers).unwrap();
        assert_eq!(principal.auth_method, AuthMethod::ApiKey);
    }

    #[test]
    fn admin_bypasses_scope_requirement() {
        let admin = AuthPrincipal { subject: "root".into(), role: Role::Admin, scopes: HashSet::new(), api_key_id: None, auth_method: AuthMethod::Jwt };
        let gate = RequireScopes::new(["debates:write"]);
        assert!(gate.check(&admin).is_ok());
    }

    #[test]
    fn missing_scope_is_forbidden_for_non_admin() {
        let user = AuthPrincipal { subject: "u1".into(), role: Role::User, scopes: HashSet::new(), api_key_id: None, auth_method: AuthMethod::ApiKey };
        let gate = RequireScopes::new(["debates:write"]);
        assert!(matches!(gate.check(&user), Err(HelixError::Forbidden { .. })));
    }

    #[test]
    fn present_scope_satisfies_requirement() {
        let user = AuthPrincipal { subject: "u1".into(), role: Role::User, scopes: ["debates:write".to_string()].into(), api_key_id: None, auth_method: AuthMethod::ApiKey };
        let gate = RequireScopes::new(["debates:write"]);
        assert!(gate.check(&user).is_ok());
    }
}
