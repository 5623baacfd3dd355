//! Error taxonomy for the auth core (spec.md §7).
//!
//! The session manager never raises through this type - a cookie that fails
//! to decrypt is logged and treated as an anonymous request. The OAuth/OIDC
//! engines and the router's dispatch, by contrast, always surface hard
//! failures as an `AuthError` packaged into `InternalResponse.error`.

use thiserror::Error;

/// Errors that can reach a caller through [`crate::io::InternalResponse::error`].
#[derive(Debug, Error)]
pub enum AuthError {
    /// Fatal at construction: missing secret, unknown endpoint after
    /// discovery, colliding provider ids.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// State/PKCE/nonce cookie missing or undecryptable, an OAuth2 error
    /// response, an ID-token claim mismatch, a missing `code`, or an empty
    /// profile.
    #[error("validation error: {0}")]
    Validation(String),

    /// An outbound HTTP call (discovery, token exchange, userinfo) failed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A user-supplied callback (`onAuth`, `handleRefresh`,
    /// `onInvalidateSession`, ...) raised.
    #[error("callback error: {0}")]
    Callback(#[source] eyre::Report),
}

impl AuthError {
    /// Short, adapter-facing message. Adapters translate this into a 500
    /// body by default (spec.md §7, "an `{ error }` response translates to
    /// HTTP 500 with a short message").
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
