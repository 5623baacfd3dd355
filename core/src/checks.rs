//! Anti-forgery checks: state, PKCE, nonce (spec.md §4.2).
//!
//! Each check is `create` (mint a fresh value, push a short-lived signed
//! cookie) and `use` (read the cookie back on callback, verify it
//! decodes, return a deletion cookie). `use` on a check the provider did
//! not configure is a no-op that returns [`CheckValue::Skip`], never an
//! error.

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::Duration;

use crate::cookie::{Cookie, CookieTemplate, SHORT_LIVED_MAX_AGE_SECS};
use crate::error::{AuthError, AuthResult};
use crate::io::InternalRequest;
use crate::token;

/// The subset of `{state, pkce, nonce, none}` a provider enforces on its
/// flow (spec.md §3 "client-checks set").
pub type CheckSet = HashSet<CheckKind>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckKind {
    State,
    Pkce,
    Nonce,
    None,
}

impl CheckKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            CheckKind::State => "state",
            CheckKind::Pkce => "pkce",
            CheckKind::Nonce => "nonce",
            CheckKind::None => "none",
        }
    }
}

/// Default check set for a freshly configured provider: `{pkce}`
/// (spec.md §3).
#[must_use]
pub fn default_checks() -> CheckSet {
    [CheckKind::Pkce].into_iter().collect()
}

/// Result of [`use_check`]: either the check was not configured and is
/// skipped entirely, or it decoded to a value the caller must verify
/// against the authorization response / ID token.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckValue {
    Skip,
    Value(String),
}

impl CheckValue {
    #[must_use]
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            CheckValue::Skip => None,
            CheckValue::Value(v) => Some(v.as_str()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CheckPayload {
    value: String,
}

fn random_url_safe(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `state` / `nonce` share the same shape: a fresh ≥16-byte random value,
/// stored verbatim in the cookie.
fn create_opaque(secret: &[u8], template: &CookieTemplate) -> (String, Cookie) {
    let value = random_url_safe(32);
    let cookie = build_check_cookie(secret, template, &value);
    (value, cookie)
}

fn build_check_cookie(secret: &[u8], template: &CookieTemplate, raw_value: &str) -> Cookie {
    let payload = CheckPayload {
        value: raw_value.to_string(),
    };
    let encrypted = token::encode(secret, &payload, Some(Duration::seconds(SHORT_LIVED_MAX_AGE_SECS)))
        .unwrap_or_default();
    template.build(encrypted, Some(Duration::seconds(SHORT_LIVED_MAX_AGE_SECS)))
}

fn use_opaque(
    kind: CheckKind,
    configured: &CheckSet,
    request_cookie: Option<&str>,
    secret: &[u8],
    template: &CookieTemplate,
) -> AuthResult<(CheckValue, Option<Cookie>)> {
    if !configured.contains(&kind) {
        return Ok((CheckValue::Skip, None));
    }
    let raw = request_cookie
        .ok_or_else(|| AuthError::Validation(format!("{} cookie was missing", kind.label())))?;
    let payload: CheckPayload = token::decode(secret, raw)
        .ok_or_else(|| AuthError::Validation(format!("{} value could not be parsed", kind.label())))?;
    Ok((CheckValue::Value(payload.value), Some(template.deletion())))
}

/// `state.create` (spec.md §4.2).
#[must_use]
pub fn create_state(secret: &[u8], template: &CookieTemplate) -> (String, Cookie) {
    create_opaque(secret, template)
}

/// `state.use` (spec.md §4.2).
pub fn use_state<Req>(
    request: &InternalRequest<Req>,
    configured: &CheckSet,
    secret: &[u8],
    template: &CookieTemplate,
) -> AuthResult<(CheckValue, Option<Cookie>)> {
    use_opaque(
        CheckKind::State,
        configured,
        request.cookie(&template.name),
        secret,
        template,
    )
}

/// `nonce.create` (spec.md §4.2).
#[must_use]
pub fn create_nonce(secret: &[u8], template: &CookieTemplate) -> (String, Cookie) {
    create_opaque(secret, template)
}

/// `nonce.use` (spec.md §4.2).
pub fn use_nonce<Req>(
    request: &InternalRequest<Req>,
    configured: &CheckSet,
    secret: &[u8],
    template: &CookieTemplate,
) -> AuthResult<(CheckValue, Option<Cookie>)> {
    use_opaque(
        CheckKind::Nonce,
        configured,
        request.cookie(&template.name),
        secret,
        template,
    )
}

/// `pkce.create`: generate a random code verifier (≥43 chars, url-safe)
/// and return `value = BASE64URL(SHA256(verifier))`; the cookie stores
/// the verifier, not the challenge (spec.md §4.2).
#[must_use]
pub fn create_pkce(secret: &[u8], template: &CookieTemplate) -> (String, Cookie) {
    let verifier = random_url_safe(48);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    let cookie = build_check_cookie(secret, template, &verifier);
    (challenge, cookie)
}

/// `pkce.use`: returns the raw *verifier* (needed for the token-exchange
/// POST), not the challenge (spec.md §4.2, §4.4).
pub fn use_pkce<Req>(
    request: &InternalRequest<Req>,
    configured: &CheckSet,
    secret: &[u8],
    template: &CookieTemplate,
) -> AuthResult<(CheckValue, Option<Cookie>)> {
    use_opaque(
        CheckKind::Pkce,
        configured,
        request.cookie(&template.name),
        secret,
        template,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie::CookiesOptions;
    use std::collections::HashMap;
    use url::Url;

    fn req(cookies: HashMap<String, String>) -> InternalRequest<()> {
        InternalRequest::new(Url::parse("https://app.example/auth/callback/test").unwrap(), cookies, ())
    }

    #[test]
    fn create_then_use_round_trips_the_value() {
        let secret = b"a-fairly-long-test-secret-value";
        let opts = CookiesOptions::new(false);
        let (value, cookie) = create_state(secret, &opts.state);

        let mut cookies = HashMap::new();
        cookies.insert(cookie.name.clone(), cookie.value.clone());
        let request = req(cookies);

        let configured: CheckSet = [CheckKind::State].into_iter().collect();
        let (used, deletion) = use_state(&request, &configured, secret, &opts.state).unwrap();
        assert_eq!(used, CheckValue::Value(value));
        let deletion = deletion.unwrap();
        assert_eq!(deletion.attrs.max_age, Some(Duration::ZERO));
    }

    #[test]
    fn unconfigured_check_is_skipped_without_error() {
        let secret = b"a-fairly-long-test-secret-value";
        let opts = CookiesOptions::new(false);
        let request = req(HashMap::new());
        let configured: CheckSet = HashSet::new();
        let (value, deletion) = use_state(&request, &configured, secret, &opts.state).unwrap();
        assert_eq!(value, CheckValue::Skip);
        assert!(deletion.is_none());
    }

    #[test]
    fn missing_cookie_fails_with_validation_error() {
        let secret = b"a-fairly-long-test-secret-value";
        let opts = CookiesOptions::new(false);
        let request = req(HashMap::new());
        let configured: CheckSet = [CheckKind::State].into_iter().collect();
        let err = use_state(&request, &configured, secret, &opts.state).unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[test]
    fn pkce_challenge_is_sha256_of_verifier() {
        let secret = b"a-fairly-long-test-secret-value";
        let opts = CookiesOptions::new(false);
        let (challenge, cookie) = create_pkce(secret, &opts.pkce_code_verifier);

        let mut cookies = HashMap::new();
        cookies.insert(cookie.name.clone(), cookie.value.clone());
        let request = req(cookies);
        let configured: CheckSet = [CheckKind::Pkce].into_iter().collect();
        let (verifier, _) = use_pkce(&request, &configured, secret, &opts.pkce_code_verifier).unwrap();
        let verifier = verifier.as_deref().unwrap();
        let recomputed = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        assert_eq!(recomputed, challenge);
    }
}
