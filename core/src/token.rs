//! Token codec (spec.md §4.1): encrypts/decrypts arbitrary claim bags using
//! a key derived from the instance secret.
//!
//! The wire format is the "standard construction" spec.md §6 names (JWE
//! alg=`dir`, enc=`A256GCM`) realized without a JOSE crate that exposes
//! this exact primitive combination: a URL-safe base64 string of
//! `nonce || ciphertext`, where the plaintext is the claim bag
//! JSON-encoded and flattened with `iat`/`exp`/`jti`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hkdf::Hkdf;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::Duration;

use crate::error::{AuthError, AuthResult};

/// `Auth.js Generated Encryption Key` — the HKDF context string the
/// source uses to derive the AEAD key from the instance secret.
const HKDF_INFO: &[u8] = b"Auth.js Generated Encryption Key";

const NONCE_LEN: usize = 12;

/// Default `maxAge` for a token whose caller did not specify one.
pub const DEFAULT_MAX_AGE: Duration = Duration::seconds(86_400);
/// Default `maxAge` for an access-token cookie.
pub const DEFAULT_ACCESS_TOKEN_MAX_AGE: Duration = Duration::seconds(3_600);
/// Default `maxAge` for a refresh-token cookie.
pub const DEFAULT_REFRESH_TOKEN_MAX_AGE: Duration = Duration::seconds(604_800);

/// Clock skew tolerated when checking `exp` on decode.
const CLOCK_SKEW_SECS: i64 = 15;

fn derive_key(secret: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, secret);
    let mut out = [0u8; 32];
    hk.expand(HKDF_INFO, &mut out)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    out
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    #[serde(flatten)]
    claims: &'a T,
    iat: i64,
    exp: i64,
    jti: String,
}

#[derive(Deserialize)]
struct EnvelopeOwned<T> {
    #[serde(flatten)]
    claims: T,
    iat: i64,
    exp: i64,
    #[allow(dead_code)]
    jti: String,
}

/// Encrypt `token` into the opaque cookie value, valid for `max_age`
/// (default: [`DEFAULT_MAX_AGE`]).
///
/// # Errors
/// Returns [`AuthError::Configuration`] if the AEAD cipher cannot be
/// constructed from the derived key (never happens for a 32-byte key, but
/// the `aes-gcm` API is fallible).
pub fn encode<T: Serialize>(secret: &[u8], token: &T, max_age: Option<Duration>) -> AuthResult<String> {
    let max_age = max_age.unwrap_or(DEFAULT_MAX_AGE);
    let iat = now_unix();
    let envelope = EnvelopeRef {
        claims: token,
        iat,
        exp: iat + max_age.whole_seconds(),
        jti: uuid::Uuid::new_v4().to_string(),
    };
    let plaintext = serde_json::to_vec(&envelope)
        .map_err(|e| AuthError::Configuration(format!("token claims not serializable: {e}")))?;

    let key = derive_key(secret);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|e| AuthError::Configuration(format!("token encryption failed: {e}")))?;

    let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    wire.extend_from_slice(&nonce_bytes);
    wire.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(wire))
}

/// Decrypt a cookie value produced by [`encode`], returning the claim bag
/// if the ciphertext is valid, correctly authenticated, and unexpired
/// (within [`CLOCK_SKEW_SECS`] seconds).
///
/// This is a soft-failure API by design (spec.md §4.1, §7 "Decode
/// soft-failure"): callers get `None` on any failure and must not treat
/// that as an error to propagate. The secret and the decrypted payload are
/// never logged beyond length/`is_some` at `debug` level.
#[must_use]
pub fn decode<T: DeserializeOwned>(secret: &[u8], token: &str) -> Option<T> {
    let wire = URL_SAFE_NO_PAD.decode(token).ok()?;
    if wire.len() < NONCE_LEN {
        tracing::debug!("token decode failed: ciphertext shorter than nonce");
        return None;
    }
    let (nonce_bytes, ciphertext) = wire.split_at(NONCE_LEN);

    let key = derive_key(secret);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = match cipher.decrypt(nonce, ciphertext) {
        Ok(p) => p,
        Err(_) => {
            tracing::debug!("token decode failed: AEAD authentication failed");
            return None;
        }
    };

    let envelope: EnvelopeOwned<T> = match serde_json::from_slice(&plaintext) {
        Ok(e) => e,
        Err(_) => {
            tracing::debug!("token decode failed: claim bag did not parse");
            return None;
        }
    };

    if now_unix() > envelope.exp + CLOCK_SKEW_SECS {
        tracing::debug!("token decode failed: expired");
        return None;
    }

    Some(envelope.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Claims {
        id: u64,
        name: String,
    }

    #[test]
    fn round_trips_within_max_age() {
        let secret = b"test-secret-at-least-this-long";
        let claims = Claims {
            id: 42,
            name: "ada".to_string(),
        };
        let token = encode(secret, &claims, Some(Duration::seconds(60))).unwrap();
        let decoded: Claims = decode(secret, &token).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn wrong_secret_fails_to_decode() {
        let claims = Claims {
            id: 1,
            name: "x".to_string(),
        };
        let token = encode(b"secret-one-xxxxxxxxxxxxxxxxxxxx", &claims, None).unwrap();
        let decoded: Option<Claims> = decode(b"secret-two-xxxxxxxxxxxxxxxxxxxx", &token);
        assert!(decoded.is_none());
    }

    #[test]
    fn tampered_ciphertext_fails_to_decode() {
        let secret = b"test-secret-at-least-this-long";
        let claims = Claims {
            id: 1,
            name: "x".to_string(),
        };
        let mut token = encode(secret, &claims, None).unwrap();
        token.push('a');
        let decoded: Option<Claims> = decode(secret, &token);
        assert!(decoded.is_none());
    }
}
