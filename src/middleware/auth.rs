//! Bearer token verification and the `AuthUser` / `AdminUser` extractors
//!
//! Access tokens are HS256 JWTs minted by the external auth provider.
//! This service only verifies them; the admin flag always comes from the
//! `user_roles` table, never from token claims.

use crate::config::AuthConfig;
use crate::error::{AppError, AppErrorKind, AuthError};
use crate::middleware::error::get_request_id_from_headers;
use crate::services::users::UserService;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct JwtHeader {
    alg: String,
}

/// Claims this service reads; anything else in the token is ignored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
    /// String or array of strings
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl Claims {
    fn has_audience(&self, expected: &str) -> bool {
        match &self.aud {
            Some(serde_json::Value::String(aud)) => aud == expected,
            Some(serde_json::Value::Array(list)) => list.iter().any(|a| a.as_str() == Some(expected)),
            _ => false,
        }
    }
}

pub struct TokenVerifier {
    secret: Vec<u8>,
    audience: Option<String>,
}

fn invalid(reason: &str) -> AppError {
    AppError::new(AppErrorKind::Auth(AuthError::InvalidToken {
        reason: reason.to_string(),
    }))
}

impl TokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>, audience: Option<String>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            audience,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, config.jwt_audience.clone())
    }

    fn mac(&self) -> Result<HmacSha256, AppError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| invalid("bad signing key"))
    }

    /// Checks signature, algorithm, expiry and audience
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, AppError> {
        let mut parts = token.split('.');
        let (header, payload, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(invalid("malformed token")),
        };

        let header: JwtHeader = URL_SAFE_NO_PAD
            .decode(header)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| invalid("malformed header"))?;
        if header.alg != "HS256" {
            return Err(invalid("unsupported algorithm"));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| invalid("malformed signature"))?;
        let mut mac = self.mac()?;
        mac.update(header_and_payload(token).as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| invalid("signature mismatch"))?;

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| invalid("malformed claims"))?;

        if claims.exp <= now {
            return Err(invalid("token expired"));
        }
        if let Some(expected) = &self.audience {
            if !claims.has_audience(expected) {
                return Err(invalid("audience mismatch"));
            }
        }

        Ok(claims)
    }

    /// Issues an HS256 token with the verifier's key, for tests and local
    /// tooling
    pub fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(claims).map_err(|_| invalid("unserializable claims"))?,
        );
        let signing_input = format!("{}.{}", header, payload);
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", signing_input, signature))
    }
}

fn header_and_payload(token: &str) -> &str {
    match token.rfind('.') {
        Some(idx) => &token[..idx],
        None => token,
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let value = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::new(AppErrorKind::Auth(AuthError::MissingToken)))?;

    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::new(AppErrorKind::Auth(AuthError::MissingToken)))
}

/// Attaches the request id, when the request carries one
pub(crate) fn tag_request(error: AppError, parts: &Parts) -> AppError {
    match get_request_id_from_headers(&parts.headers) {
        Some(request_id) => error.with_request_id(request_id),
        None => error,
    }
}

/// Signed-in user
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<TokenVerifier>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<TokenVerifier>::from_ref(state);
        let claims = bearer_token(parts)
            .and_then(|token| verifier.verify(token))
            .map_err(|e| tag_request(e, parts))?;
        debug!(user_id = %claims.sub, "Request authenticated");
        Ok(AuthUser {
            id: claims.sub,
            email: claims.email,
        })
    }
}

/// Signed-in user holding the admin role
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl AdminUser {
    pub fn id(&self) -> Uuid {
        self.0.id
    }
}

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    Arc<TokenVerifier>: FromRef<S>,
    Arc<UserService>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        let users = Arc::<UserService>::from_ref(state);
        let is_admin = users
            .is_admin(user.id)
            .await
            .map_err(|e| tag_request(e, parts))?;
        if !is_admin {
            return Err(tag_request(
                AppError::new(AppErrorKind::Auth(AuthError::Forbidden)),
                parts,
            ));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-test-secret-1234";

    fn claims(exp_offset: i64, aud: Option<&str>) -> Claims {
        Claims {
            sub: Uuid::new_v4(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
            email: Some("user@example.com".to_string()),
            aud: aud.map(|a| serde_json::Value::String(a.to_string())),
        }
    }

    #[test]
    fn test_round_trip_token() {
        let verifier = TokenVerifier::new(SECRET, Some("authenticated".to_string()));
        let issued = claims(3600, Some("authenticated"));
        let token = verifier.sign(&issued).unwrap();
        let verified = verifier.verify(&token).unwrap();
        assert_eq!(verified.sub, issued.sub);
        assert_eq!(verified.email.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let verifier = TokenVerifier::new(SECRET, None);
        let token = verifier.sign(&claims(-10, None)).unwrap();
        let err = verifier.verify(&token).unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn test_wrong_key_and_tampering_are_rejected() {
        let verifier = TokenVerifier::new(SECRET, None);
        let other = TokenVerifier::new("another-secret-another-secret", None);
        let token = other.sign(&claims(3600, None)).unwrap();
        assert!(verifier.verify(&token).is_err());

        let token = verifier.sign(&claims(3600, None)).unwrap();
        let mut pieces: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&claims(3600, None)).unwrap(),
        );
        pieces[1] = &forged;
        assert!(verifier.verify(&pieces.join(".")).is_err());

        assert!(verifier.verify("not-a-jwt").is_err());
    }

    #[test]
    fn test_audience_checks() {
        let verifier = TokenVerifier::new(SECRET, Some("authenticated".to_string()));
        let token = verifier.sign(&claims(3600, Some("anon"))).unwrap();
        assert!(verifier.verify(&token).is_err());

        let mut list = claims(3600, None);
        list.aud = Some(serde_json::json!(["x", "authenticated"]));
        let token = verifier.sign(&list).unwrap();
        assert!(verifier.verify(&token).is_ok());
    }

    #[test]
    fn test_alg_none_is_rejected() {
        let verifier = TokenVerifier::new(SECRET, None);
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims(3600, None)).unwrap());
        let token = format!("{}.{}.", header, payload);
        assert!(verifier.verify(&token).is_err());
    }
}
