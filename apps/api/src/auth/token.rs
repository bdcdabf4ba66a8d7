//! Token codec: HMAC-SHA256 signed bearer tokens and time-slot sign-in codes.
//!
//! Token wire format: `base64url(json payload) "." base64url(hmac(payload part))`.
//! Magic links, sessions and sign-in codes all derive from one secret.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_TTL_DAYS: i64 = 14;
const MS_PER_MINUTE: i64 = 60_000;
const MS_PER_DAY: i64 = 24 * 60 * MS_PER_MINUTE;
const LOGIN_CODE_DOMAIN: &str = "login-code";
const LOGIN_CODE_MODULUS: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is not in payload.signature form")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token payload could not be decoded")]
    InvalidPayload,
    #[error("token payload is missing required fields")]
    MissingFields,
    #[error("token has expired")]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicLinkClaims {
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub uid: Uuid,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub nonce: String,
}

/// Index of the fixed-width window `now` falls in.
pub fn time_slot(now_ms: i64, ttl_minutes: i64) -> i64 {
    now_ms.div_euclid(ttl_minutes.max(1) * MS_PER_MINUTE)
}

fn new_nonce() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Byte-wise comparison in constant time; unequal lengths are rejected up front.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size")
    }

    fn signature(&self, encoded_payload: &str) -> String {
        let mut mac = self.mac();
        mac.update(encoded_payload.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    pub fn sign<T: Serialize>(&self, claims: &T) -> String {
        // Serializing plain structs of strings and integers cannot fail.
        let json = serde_json::to_vec(claims).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = self.signature(&payload);
        format!("{payload}.{signature}")
    }

    /// Verifies signature, structure, required fields and expiry, in that order.
    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        required: &[&str],
        now_ms: i64,
    ) -> Result<T, TokenError> {
        let parts: Vec<&str> = token.trim().split('.').collect();
        let [payload, signature] = parts.as_slice() else {
            return Err(TokenError::Malformed);
        };
        if payload.is_empty() || signature.is_empty() {
            return Err(TokenError::Malformed);
        }

        let expected = self.signature(payload);
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(TokenError::BadSignature);
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::InvalidPayload)?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|_| TokenError::InvalidPayload)?;
        let object = value.as_object().ok_or(TokenError::InvalidPayload)?;

        if required
            .iter()
            .any(|field| object.get(*field).map_or(true, Value::is_null))
        {
            return Err(TokenError::MissingFields);
        }

        let exp = object
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or(TokenError::MissingFields)?;
        if now_ms >= exp {
            return Err(TokenError::Expired);
        }

        serde_json::from_value(value).map_err(|_| TokenError::InvalidPayload)
    }

    pub fn issue_magic_link(
        &self,
        email: &str,
        ttl_minutes: i64,
        now: DateTime<Utc>,
    ) -> (String, MagicLinkClaims) {
        let iat = now.timestamp_millis();
        let claims = MagicLinkClaims {
            email: email.to_string(),
            iat,
            exp: iat + ttl_minutes * MS_PER_MINUTE,
            nonce: new_nonce(),
        };
        (self.sign(&claims), claims)
    }

    pub fn verify_magic_link(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<MagicLinkClaims, TokenError> {
        self.verify(token, &["email", "exp"], now.timestamp_millis())
    }

    pub fn issue_session(&self, uid: Uuid, email: &str, now: DateTime<Utc>) -> String {
        let iat = now.timestamp_millis();
        self.sign(&SessionClaims {
            uid,
            email: email.to_string(),
            iat,
            exp: iat + SESSION_TTL_DAYS * MS_PER_DAY,
            nonce: new_nonce(),
        })
    }

    pub fn verify_session(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        self.verify(token, &["uid", "email", "exp"], now.timestamp_millis())
    }

    /// Six-digit code for `email` in `slot`: first four HMAC bytes, big-endian, mod 10^6.
    pub fn login_code(&self, email: &str, slot: i64) -> String {
        let mut mac = self.mac();
        mac.update(format!("{email}|{slot}|{LOGIN_CODE_DOMAIN}").as_bytes());
        let digest = mac.finalize().into_bytes();
        let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        format!("{:06}", n % LOGIN_CODE_MODULUS)
    }

    /// Accepts the code for the current slot or the one immediately before it.
    pub fn verify_login_code(
        &self,
        email: &str,
        code: &str,
        ttl_minutes: i64,
        now: DateTime<Utc>,
    ) -> bool {
        let slot = time_slot(now.timestamp_millis(), ttl_minutes);
        let code = code.trim();
        [slot, slot - 1]
            .iter()
            .any(|s| constant_time_eq(self.login_code(email, *s).as_bytes(), code.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &str = "test-secret-for-token-codec";

    fn codec() -> TokenCodec {
        TokenCodec::new(SECRET)
    }

    #[test]
    fn test_magic_link_round_trip() {
        let now = Utc::now();
        let (token, claims) = codec().issue_magic_link("a@x.com", 10, now);
        let verified = codec().verify_magic_link(&token, now).unwrap();
        assert_eq!(verified, claims);
        assert_eq!(verified.exp - verified.iat, 10 * 60_000);
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let now = Utc::now();
        let (token, _) = codec().issue_magic_link("a@x.com", 10, now);
        let (payload, sig) = token.split_once('.').unwrap();
        let flipped = if sig.starts_with('A') { "B" } else { "A" };
        let tampered = format!("{payload}.{flipped}{}", &sig[1..]);
        assert_eq!(
            codec().verify_magic_link(&tampered, now),
            Err(TokenError::BadSignature)
        );
        assert_eq!(
            codec().verify_magic_link(&format!("{payload}.short"), now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let now = Utc::now();
        let (token, _) = codec().issue_magic_link("a@x.com", 10, now);
        let (_, sig) = token.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(
            br#"{"email":"admin@x.com","iat":0,"exp":99999999999999,"nonce":"n"}"#,
        );
        assert_eq!(
            codec().verify_magic_link(&format!("{forged}.{sig}"), now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_other_secret_rejected() {
        let now = Utc::now();
        let (token, _) = TokenCodec::new("another-secret").issue_magic_link("a@x.com", 10, now);
        assert_eq!(
            codec().verify_magic_link(&token, now),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_expired_rejected() {
        let issued = Utc::now();
        let (token, _) = codec().issue_magic_link("a@x.com", 10, issued);
        let later = issued + Duration::minutes(11);
        assert_eq!(
            codec().verify_magic_link(&token, later),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_malformed_rejected() {
        let now = Utc::now();
        for bad in ["", "nodot", "a.b.c", ".sig", "payload."] {
            assert_eq!(
                codec().verify_magic_link(bad, now),
                Err(TokenError::Malformed),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_missing_fields_rejected() {
        let now = Utc::now();
        let exp = now.timestamp_millis() + 60_000;
        let no_email = codec().sign(&serde_json::json!({ "exp": exp, "nonce": "n" }));
        assert_eq!(
            codec().verify_magic_link(&no_email, now),
            Err(TokenError::MissingFields)
        );
        let no_exp = codec().sign(&serde_json::json!({ "email": "a@x.com" }));
        assert_eq!(
            codec().verify_magic_link(&no_exp, now),
            Err(TokenError::MissingFields)
        );
    }

    #[test]
    fn test_unparseable_payload_rejected() {
        let payload = URL_SAFE_NO_PAD.encode(b"not json");
        let token = format!("{payload}.{}", codec().signature(&payload));
        assert_eq!(
            codec().verify_magic_link(&token, Utc::now()),
            Err(TokenError::InvalidPayload)
        );
    }

    #[test]
    fn test_session_round_trip_and_expiry() {
        let now = Utc::now();
        let uid = Uuid::new_v4();
        let token = codec().issue_session(uid, "a@x.com", now);
        let claims = codec().verify_session(&token, now).unwrap();
        assert_eq!(claims.uid, uid);
        assert_eq!(claims.exp - claims.iat, 14 * MS_PER_DAY);

        let later = now + Duration::days(14) + Duration::seconds(1);
        assert_eq!(
            codec().verify_session(&token, later),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_magic_link_is_not_a_session() {
        let now = Utc::now();
        let (token, _) = codec().issue_magic_link("a@x.com", 10, now);
        assert_eq!(
            codec().verify_session(&token, now),
            Err(TokenError::MissingFields)
        );
    }

    #[test]
    fn test_login_code_deterministic_six_digits() {
        let a = codec().login_code("a@x.com", 2_950_000);
        let b = codec().login_code("a@x.com", 2_950_000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 6);
        assert!(a.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_login_code_varies_by_slot_and_email() {
        let codes: std::collections::HashSet<String> =
            (0..20).map(|s| codec().login_code("a@x.com", s)).collect();
        assert!(codes.len() > 15);
        assert_ne!(
            codec().login_code("a@x.com", 7),
            codec().login_code("b@x.com", 7)
        );
    }

    #[test]
    fn test_login_code_grace_window() {
        let ttl = 10;
        let now = DateTime::parse_from_rfc3339("2026-10-16T12:05:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let slot = time_slot(now.timestamp_millis(), ttl);
        let current = codec().login_code("a@x.com", slot);
        let previous = codec().login_code("a@x.com", slot - 1);
        let stale = codec().login_code("a@x.com", slot - 2);

        assert!(codec().verify_login_code("a@x.com", &current, ttl, now));
        assert!(codec().verify_login_code("a@x.com", &previous, ttl, now));
        if stale != current && stale != previous {
            assert!(!codec().verify_login_code("a@x.com", &stale, ttl, now));
        }
    }

    #[test]
    fn test_code_issued_now_survives_into_next_slot() {
        let ttl = 10;
        let issued = DateTime::parse_from_rfc3339("2026-10-16T12:09:59Z")
            .unwrap()
            .with_timezone(&Utc);
        let code = codec().login_code("a@x.com", time_slot(issued.timestamp_millis(), ttl));
        assert!(codec().verify_login_code("a@x.com", &code, ttl, issued + Duration::seconds(2)));
    }

    #[test]
    fn test_time_slot() {
        assert_eq!(time_slot(0, 10), 0);
        assert_eq!(time_slot(599_999, 10), 0);
        assert_eq!(time_slot(600_000, 10), 1);
    }
}
