//! Stateless bearer-token verification.
//!
//! Tokens are HMAC-SHA256 JWTs signed with a shared secret (`TOKEN_SHARED_SECRET`).
//! The verifier never calls the network: it only decodes and checks the
//! signature, issuer, and expiry against the claims embedded in the token.

use crate::models::Role;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenVerifierError {
    #[error("malformed token")]
    Malformed,
    #[error("bad signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("unknown issuer")]
    UnknownIssuer,
}

/// The authenticated result of a verified token: subject identity, the
/// roles extracted from its claims, and the token's own validity window.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject_id: String,
    pub roles: HashSet<Role>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthContext {
    pub fn can_mutate(&self) -> bool {
        self.roles.iter().any(|r| r.can_mutate())
    }
}

/// Raw JWT claims as they appear on the wire. Role information may show up
/// under any of several legacy paths; all are checked in priority order.
#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: String,
    iat: i64,
    exp: i64,
    iss: Option<String>,
    user_roles: Option<Vec<String>>,
    user_role: Option<String>,
    app_metadata: Option<AppMetadata>,
    user_metadata: Option<UserMetadata>,
}

#[derive(Debug, Deserialize)]
struct AppMetadata {
    roles: Option<Vec<String>>,
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserMetadata {
    role: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    expected_issuer: Option<String>,
}

impl TokenVerifier {
    pub fn new(shared_secret: &str, expected_issuer: Option<String>) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(shared_secret.as_bytes()),
            expected_issuer,
        }
    }

    /// Verifies a bearer token and extracts `{subjectId, roles, expiry}`.
    /// Never performs I/O; rejects tokens whose `expiresAt <= now`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AuthContext, TokenVerifierError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // We check expiry ourselves against the caller-supplied `now` so the
        // rule stays a pure function of its inputs, instead of depending on
        // the system clock the `jsonwebtoken` crate would otherwise read.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let token_data = decode::<RawClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenVerifierError::BadSignature,
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenVerifierError::Expired,
                _ => TokenVerifierError::Malformed,
            })?;

        let claims = token_data.claims;

        if let Some(expected) = &self.expected_issuer {
            match &claims.iss {
                Some(iss) if iss == expected => {}
                _ => return Err(TokenVerifierError::UnknownIssuer),
            }
        }

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(TokenVerifierError::Malformed)?;
        if expires_at <= now {
            return Err(TokenVerifierError::Expired);
        }
        let issued_at = Utc
            .timestamp_opt(claims.iat, 0)
            .single()
            .ok_or(TokenVerifierError::Malformed)?;

        let roles = extract_roles(&claims);

        Ok(AuthContext {
            subject_id: claims.sub,
            roles,
            issued_at,
            expires_at,
        })
    }
}

/// Reads claims in priority order: `user_roles[]`, `user_role`,
/// `app_metadata.roles[]`, `app_metadata.role`, `user_metadata.role`.
/// Unknown role strings are dropped rather than rejecting the token.
fn extract_roles(claims: &RawClaims) -> HashSet<Role> {
    let mut raw_roles: Vec<String> = Vec::new();

    if let Some(roles) = &claims.user_roles {
        raw_roles.extend(roles.iter().cloned());
    } else if let Some(role) = &claims.user_role {
        raw_roles.push(role.clone());
    } else if let Some(app_metadata) = &claims.app_metadata {
        if let Some(roles) = &app_metadata.roles {
            raw_roles.extend(roles.iter().cloned());
        } else if let Some(role) = &app_metadata.role {
            raw_roles.push(role.clone());
        }
    } else if let Some(user_metadata) = &claims.user_metadata {
        if let Some(role) = &user_metadata.role {
            raw_roles.push(role.clone());
        }
    }

    raw_roles.iter().filter_map(|r| Role::parse(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-shared-secret";

    fn sign(claims: serde_json::Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token_with_top_level_roles() {
        let verifier = TokenVerifier::new(SECRET, None);
        let now = Utc::now();
        let token = sign(json!({
            "sub": "ref-1",
            "iat": now.timestamp(),
            "exp": (now + chrono::Duration::hours(1)).timestamp(),
            "user_roles": ["referee", "bogus"],
        }));

        let ctx = verifier.verify(&token, now).unwrap();
        assert_eq!(ctx.subject_id, "ref-1");
        assert!(ctx.roles.contains(&Role::Referee));
        assert_eq!(ctx.roles.len(), 1);
    }

    #[test]
    fn rejects_token_exactly_at_expiry() {
        let verifier = TokenVerifier::new(SECRET, None);
        let now = Utc::now();
        let token = sign(json!({
            "sub": "u1",
            "iat": now.timestamp() - 10,
            "exp": now.timestamp(),
        }));

        let err = verifier.verify(&token, now).unwrap_err();
        assert_eq!(err, TokenVerifierError::Expired);
    }

    #[test]
    fn rejects_bad_signature() {
        let verifier = TokenVerifier::new(SECRET, None);
        let now = Utc::now();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &json!({"sub": "u1", "iat": now.timestamp(), "exp": (now + chrono::Duration::hours(1)).timestamp()}),
            &EncodingKey::from_secret(b"different-secret"),
        )
        .unwrap();

        assert_eq!(verifier.verify(&token, now).unwrap_err(), TokenVerifierError::BadSignature);
    }

    #[test]
    fn falls_back_through_role_priority_chain() {
        let verifier = TokenVerifier::new(SECRET, None);
        let now = Utc::now();
        let token = sign(json!({
            "sub": "u2",
            "iat": now.timestamp(),
            "exp": (now + chrono::Duration::hours(1)).timestamp(),
            "app_metadata": {"role": "coach"},
        }));

        let ctx = verifier.verify(&token, now).unwrap();
        assert!(ctx.roles.contains(&Role::Coach));
    }

    #[test]
    fn rejects_unknown_issuer() {
        let verifier = TokenVerifier::new(SECRET, Some("tournament-idp".to_string()));
        let now = Utc::now();
        let token = sign(json!({
            "sub": "u3",
            "iat": now.timestamp(),
            "exp": (now + chrono::Duration::hours(1)).timestamp(),
            "iss": "someone-else",
        }));

        assert_eq!(verifier.verify(&token, now).unwrap_err(), TokenVerifierError::UnknownIssuer);
    }
}
