//! Cookie shapes and the fixed set of cookie *roles* the core knows about
//! (spec.md §3 `CookiesOptions`, §6 "Cookie layout").

use time::{Duration, OffsetDateTime};

/// `sameSite` attribute. The core only ever emits `Lax`, but the type
/// carries the full set so adapters can round-trip whatever a host
/// framework's cookie jar expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Attributes shared by every cookie the core emits.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieAttrs {
    pub path: String,
    pub http_only: bool,
    pub same_site: SameSite,
    pub secure: bool,
    pub max_age: Option<Duration>,
    pub expires: Option<OffsetDateTime>,
}

impl CookieAttrs {
    /// The attribute set every role template starts from: `path=/`,
    /// `httpOnly=true`, `sameSite=lax`.
    fn base(secure: bool) -> Self {
        Self {
            path: "/".to_string(),
            http_only: true,
            same_site: SameSite::Lax,
            secure,
            max_age: None,
            expires: None,
        }
    }

    fn short_lived(secure: bool) -> Self {
        Self {
            max_age: Some(Duration::seconds(SHORT_LIVED_MAX_AGE_SECS)),
            ..Self::base(secure)
        }
    }

    #[must_use]
    pub fn with_max_age(&self, max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_expires(&self, expires: OffsetDateTime) -> Self {
        Self {
            expires: Some(expires),
            ..self.clone()
        }
    }
}

/// A fully materialized cookie, ready for an adapter to turn into a
/// `Set-Cookie` header. Order within a response's `Vec<Cookie>` is the
/// order headers are emitted (spec.md §3, §9 "Cookie ordering").
#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub attrs: CookieAttrs,
}

/// Short-lived anti-forgery cookies (state, PKCE, nonce) default to 15
/// minutes (spec.md §3, §6).
pub const SHORT_LIVED_MAX_AGE_SECS: i64 = 900;

/// The fixed set of cookie roles the core assigns names and attributes to
/// (spec.md §3 `CookiesOptions`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CookieRole {
    SessionToken,
    AccessToken,
    RefreshToken,
    CallbackUrl,
    CsrfToken,
    PkceCodeVerifier,
    State,
    Nonce,
}

/// Name + default attributes for one cookie role.
#[derive(Debug, Clone)]
pub struct CookieTemplate {
    pub name: String,
    pub attrs: CookieAttrs,
}

impl CookieTemplate {
    /// Materialize a cookie carrying `value`, overriding the template's
    /// `max_age` if one is supplied.
    #[must_use]
    pub fn build(&self, value: impl Into<String>, max_age: Option<Duration>) -> Cookie {
        let attrs = match max_age {
            Some(m) => self.attrs.with_max_age(m),
            None => self.attrs.clone(),
        };
        Cookie {
            name: self.name.clone(),
            value: value.into(),
            attrs,
        }
    }

    /// A deletion cookie: empty value, `maxAge=0`, same name and path.
    #[must_use]
    pub fn deletion(&self) -> Cookie {
        Cookie {
            name: self.name.clone(),
            value: String::new(),
            attrs: self.attrs.with_max_age(Duration::ZERO),
        }
    }
}

/// The full, fixed set of cookie templates for one `Auth` instance,
/// derived once from the `secure` flag (spec.md §3, §6).
///
/// Names are prefixed `__Secure-` when `secure` is requested, except the
/// csrf-token cookie, which takes the stricter `__Host-` prefix.
#[derive(Debug, Clone)]
pub struct CookiesOptions {
    pub session_token: CookieTemplate,
    pub access_token: CookieTemplate,
    pub refresh_token: CookieTemplate,
    pub callback_url: CookieTemplate,
    pub csrf_token: CookieTemplate,
    pub pkce_code_verifier: CookieTemplate,
    pub state: CookieTemplate,
    pub nonce: CookieTemplate,
}

fn prefixed(secure: bool, host_prefix: bool, base_name: &str) -> String {
    if !secure {
        return base_name.to_string();
    }
    if host_prefix {
        format!("__Host-{base_name}")
    } else {
        format!("__Secure-{base_name}")
    }
}

impl CookiesOptions {
    /// Build the canonical `aponia-auth.*` templates (spec.md §6).
    #[must_use]
    pub fn new(secure: bool) -> Self {
        let long_lived = CookieAttrs::base(secure);
        let short_lived = CookieAttrs::short_lived(secure);

        Self {
            session_token: CookieTemplate {
                name: prefixed(secure, false, "aponia-auth.session-token"),
                attrs: long_lived.clone(),
            },
            access_token: CookieTemplate {
                name: prefixed(secure, false, "aponia-auth.access-token"),
                attrs: long_lived.clone(),
            },
            refresh_token: CookieTemplate {
                name: prefixed(secure, false, "aponia-auth.refresh-token"),
                attrs: long_lived.clone(),
            },
            callback_url: CookieTemplate {
                name: prefixed(secure, false, "aponia-auth.callback-url"),
                attrs: long_lived.clone(),
            },
            csrf_token: CookieTemplate {
                name: prefixed(secure, true, "aponia-auth.csrf-token"),
                attrs: long_lived,
            },
            pkce_code_verifier: CookieTemplate {
                name: prefixed(secure, false, "aponia-auth.pkce.code_verifier"),
                attrs: short_lived.clone(),
            },
            state: CookieTemplate {
                name: prefixed(secure, false, "aponia-auth.state"),
                attrs: short_lived.clone(),
            },
            nonce: CookieTemplate {
                name: prefixed(secure, false, "aponia-auth.nonce"),
                attrs: short_lived,
            },
        }
    }

    #[must_use]
    pub fn template(&self, role: CookieRole) -> &CookieTemplate {
        match role {
            CookieRole::SessionToken => &self.session_token,
            CookieRole::AccessToken => &self.access_token,
            CookieRole::RefreshToken => &self.refresh_token,
            CookieRole::CallbackUrl => &self.callback_url,
            CookieRole::CsrfToken => &self.csrf_token,
            CookieRole::PkceCodeVerifier => &self.pkce_code_verifier,
            CookieRole::State => &self.state,
            CookieRole::Nonce => &self.nonce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_prefixes_all_but_csrf_with_secure_dash() {
        let opts = CookiesOptions::new(true);
        assert!(opts.access_token.name.starts_with("__Secure-"));
        assert!(opts.state.name.starts_with("__Secure-"));
        assert!(opts.csrf_token.name.starts_with("__Host-"));
    }

    #[test]
    fn insecure_leaves_names_bare() {
        let opts = CookiesOptions::new(false);
        assert_eq!(opts.access_token.name, "aponia-auth.access-token");
        assert_eq!(opts.csrf_token.name, "aponia-auth.csrf-token");
    }

    #[test]
    fn short_lived_templates_default_to_900_seconds() {
        let opts = CookiesOptions::new(false);
        assert_eq!(
            opts.state.attrs.max_age,
            Some(Duration::seconds(SHORT_LIVED_MAX_AGE_SECS))
        );
        assert_eq!(opts.access_token.attrs.max_age, None);
    }

    #[test]
    fn deletion_cookie_has_empty_value_and_zero_max_age() {
        let opts = CookiesOptions::new(false);
        let deletion = opts.state.deletion();
        assert_eq!(deletion.value, "");
        assert_eq!(deletion.attrs.max_age, Some(Duration::ZERO));
    }
}
