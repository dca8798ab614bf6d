//! Token fixtures shared by the workspace's tests
//!
//! Enabled with the `tests` feature. The tokens carry an `alg: none` header
//! and a dummy signature, which is all the inspector looks at.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde_json::{Value, json};

/// Encode an arbitrary claims object as an unsigned three-segment token
pub fn encode_payload(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// Mint a token for `subject` with `role` expiring at the unix time `exp`
pub fn mint_token(subject: &str, role: &str, exp: i64) -> String {
    encode_payload(&json!({
        "sub": subject,
        "role": role,
        "iat": Utc::now().timestamp(),
        "exp": exp,
    }))
}

/// Token that expires `secs` seconds from now (negative for the past)
pub fn token_expiring_in(subject: &str, secs: i64) -> String {
    mint_token(subject, "user", Utc::now().timestamp() + secs)
}
