//! Access token inspection
//!
//! Reads the claims embedded in a self-describing access token without
//! verifying its signature. The result only feeds the client-side "renew
//! soon" heuristic and the cached identity; the server stays the authority
//! on whether a token is valid.

use crate::types::{SessionIdentity, default_role};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while decoding a token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Wrong number of segments or an empty header/payload
    #[error("Malformed token: {0}")]
    Malformed(&'static str),

    /// A segment is not valid base64url
    #[error("Invalid token encoding: {0}")]
    Encoding(String),

    /// The payload is not a JSON object with the expected claims
    #[error("Invalid token payload: {0}")]
    Payload(String),

    /// A claim is missing or has the wrong type
    #[error("Invalid claim: {0}")]
    InvalidClaim(&'static str),
}

/// Claims the client cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub subject_id: String,
    pub role: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl TokenClaims {
    /// Identity cache entry derived from these claims
    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity::new(self.subject_id.clone(), self.role.clone())
    }
}

/// Reads expiry and identity out of an access token.
///
/// Implementations must be pure. Every decode failure is treated as an
/// expired token by the provided methods.
pub trait TokenInspector: Send + Sync {
    /// Decode subject, role and expiry
    fn decode(&self, token: &str) -> Result<TokenClaims, TokenError>;

    /// Decode only the expiry claim
    fn expiry(&self, token: &str) -> Result<DateTime<Utc>, TokenError> {
        self.decode(token).map(|claims| claims.expires_at)
    }

    /// Whether `token` is expired, or will be within `skew`, at `now`
    fn is_expired_at(&self, token: &str, skew: Duration, now: DateTime<Utc>) -> bool {
        let Ok(expires_at) = self.expiry(token) else {
            return true;
        };
        let skew = TimeDelta::from_std(skew).unwrap_or(TimeDelta::MAX);
        match now.checked_add_signed(skew) {
            Some(deadline) => deadline >= expires_at,
            None => true,
        }
    }

    /// Whether `token` is expired, or will be within `skew`, right now
    fn is_expired(&self, token: &str, skew: Duration) -> bool {
        self.is_expired_at(token, skew, Utc::now())
    }
}

/// Inspector for three-segment JWS compact tokens (`header.payload.signature`)
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtInspector;

impl JwtInspector {
    pub const fn new() -> Self {
        Self
    }

    fn payload(token: &str) -> Result<serde_json::Map<String, Value>, TokenError> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::Malformed("expected three segments"));
        };

        if header.is_empty() || payload.is_empty() {
            return Err(TokenError::Malformed("empty header or payload"));
        }

        // The header has to be a JSON object too, otherwise this is not a JWT
        // that happens to carry an `exp`.
        let header = decode_segment(header)?;
        if !header.is_object() {
            return Err(TokenError::Payload("header is not a JSON object".into()));
        }

        match decode_segment(payload)? {
            Value::Object(map) => Ok(map),
            _ => Err(TokenError::Payload("payload is not a JSON object".into())),
        }
    }
}

impl TokenInspector for JwtInspector {
    fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let payload = Self::payload(token)?;
        let expires_at = numeric_date(payload.get("exp"), "exp")?;
        let issued_at = match payload.get("iat") {
            Some(value) => Some(numeric_date(Some(value), "iat")?),
            None => None,
        };

        let subject: SubjectClaims = serde_json::from_value(Value::Object(payload))
            .map_err(|e| TokenError::Payload(e.to_string()))?;
        let subject_id = subject
            .sub
            .or(subject.id)
            .or(subject.user_id)
            .and_then(|value| match value {
                Value::String(s) if !s.is_empty() => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or(TokenError::InvalidClaim("sub"))?;

        Ok(TokenClaims {
            subject_id,
            role: subject.role.unwrap_or_else(default_role),
            issued_at,
            expires_at,
        })
    }

    fn expiry(&self, token: &str) -> Result<DateTime<Utc>, TokenError> {
        let payload = Self::payload(token)?;
        numeric_date(payload.get("exp"), "exp")
    }
}

#[derive(Deserialize)]
struct SubjectClaims {
    sub: Option<Value>,
    id: Option<Value>,
    #[serde(rename = "userId")]
    user_id: Option<Value>,
    role: Option<String>,
}

fn decode_segment(segment: &str) -> Result<Value, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| TokenError::Encoding(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenError::Payload(e.to_string()))
}

/// JWT NumericDate: seconds since the epoch, integer or fractional
fn numeric_date(value: Option<&Value>, claim: &'static str) -> Result<DateTime<Utc>, TokenError> {
    let value = value.ok_or(TokenError::InvalidClaim(claim))?;
    let seconds = match value.as_i64() {
        Some(seconds) => seconds,
        #[allow(clippy::cast_possible_truncation)]
        None => value
            .as_f64()
            .filter(|f| f.is_finite())
            .map(|f| f.floor() as i64)
            .ok_or(TokenError::InvalidClaim(claim))?,
    };
    DateTime::from_timestamp(seconds, 0).ok_or(TokenError::InvalidClaim(claim))
}
