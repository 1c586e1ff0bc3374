use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("authentication token required")]
    MissingCredential,
    #[error("invalid token")]
    InvalidCredential,
    #[error("token expired")]
    ExpiredCredential,
}

/// Claims carried by the bearer token the CRUD backend issues at login.
/// This service only verifies; it never mints tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(rename = "rescueId", default)]
    pub rescue_id: Option<String>,
    pub exp: usize,
    #[serde(default)]
    pub iat: usize,
}

fn default_role() -> String {
    "user".to_string()
}

pub fn validate_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|err| match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::ExpiredCredential,
        _ => AuthError::InvalidCredential,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "unit-test-secret";

    fn token(claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn claims_expiring_at(exp: usize) -> Claims {
        Claims {
            user_id: "user-1".into(),
            role: "user".into(),
            rescue_id: Some("rescue-9".into()),
            exp,
            iat: 0,
        }
    }

    #[test]
    fn accepts_valid_token_and_extracts_claims() {
        let exp = (chrono::Utc::now().timestamp() + 600) as usize;
        let token = token(&claims_expiring_at(exp));

        let claims = validate_token(&token, SECRET).unwrap();
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.role, "user");
        assert_eq!(claims.rescue_id.as_deref(), Some("rescue-9"));
    }

    #[test]
    fn rejects_expired_token() {
        let exp = (chrono::Utc::now().timestamp() - 600) as usize;
        let token = token(&claims_expiring_at(exp));

        assert_eq!(
            validate_token(&token, SECRET),
            Err(AuthError::ExpiredCredential)
        );
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let exp = (chrono::Utc::now().timestamp() + 600) as usize;
        let token = token(&claims_expiring_at(exp));

        assert_eq!(
            validate_token(&token, "some-other-secret"),
            Err(AuthError::InvalidCredential)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            validate_token("not-a-jwt", SECRET),
            Err(AuthError::InvalidCredential)
        );
    }
}
