//! Symmetric JWT validation via `jsonwebtoken`, backing
//! `AUTH_JWT_SECRET` (§6).

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use super::Role;
use crate::error::HelixError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub exp: usize,
    #[serde(default)]
    pub iat: usize,
}

fn default_role() -> Role {
    Role::User
}

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, HelixError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| HelixError::Auth { message: format!("invalid jwt: {e}") })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(secret: &str, claims: &Claims) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn future_exp() -> usize {
        // fixed far-future timestamp; avoids disallowed wall-clock calls in this module.
        4_000_000_000
    }

    #[test]
    fn valid_token_round_trips_claims() {
        let validator = JwtValidator::new("top-secret");
        let claims = Claims { sub: "user-1".into(), role: Role::Admin, scopes: vec!["debates:write".into()], exp: future_exp(), iat: 0 };
        let t = token("top-secret", &claims);
        let decoded = validator.validate(&t).unwrap();
        assert_eq!(decoded.sub, "user-1");
        assert_eq!(decoded.role, Role::Admin);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let validator = JwtValidator::new("top-secret");
        let claims = Claims { sub: "user-1".into(), role: Role::User, scopes: vec![], exp: future_exp(), iat: 0 };
        let t = token("other-secret", &claims);
        assert!(validator.validate(&t).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let validator = JwtValidator::new("top-secret");
        let claims = Claims { sub: "user-1".into(), role: Role::User, scopes: vec![], exp: 1, iat: 0 };
        let t = token("top-secret", &claims);
        assert!(validator.validate(&t).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        let validator = JwtValidator::new("top-secret");
        assert!(validator.validate("not.a.jwt").is_err());
    }
}
