//! Provider engines: OAuth (§4.4), OIDC (§4.5), and the first-party
//! credentials/email providers (§4.6).

pub mod credentials;
pub mod email;
pub mod oauth;
pub mod oidc;

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::future::BoxFuture;
use crate::io::InternalResponse;

/// HTTP methods a login/callback endpoint accepts (spec.md §3
/// `ProviderPages`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// One endpoint record: route, accepted methods, and (for callback) an
/// optional default post-callback redirect (spec.md §3 `ProviderPages`).
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub route: String,
    pub methods: Vec<HttpMethod>,
    pub redirect: Option<String>,
}

/// `login` and `callback` route records for one provider (spec.md §3).
#[derive(Debug, Clone)]
pub struct ProviderPages {
    pub login: RouteSpec,
    pub callback: RouteSpec,
}

impl ProviderPages {
    /// `/auth/login/{id}` (GET), `/auth/callback/{id}` (GET), default
    /// redirect "/" (spec.md §3 defaults).
    #[must_use]
    pub fn defaults(provider_id: &str) -> Self {
        Self {
            login: RouteSpec {
                route: format!("/auth/login/{provider_id}"),
                methods: vec![HttpMethod::Get],
                redirect: None,
            },
            callback: RouteSpec {
                route: format!("/auth/callback/{provider_id}"),
                methods: vec![HttpMethod::Get],
                redirect: Some("/".to_string()),
            },
        }
    }
}

/// One provider's view of an authorization/token/userinfo endpoint:
/// a URL plus static params, an optional custom request function, and an
/// optional response-conforming transform (spec.md §3, Design Note on
/// `endpoints.userinfo.url`).
///
/// `url` is `None`, never a sentinel string, when a custom `request` is
/// supplied and no URL is configured (Design Note, resolved).
#[derive(Clone)]
pub struct EndpointConfig {
    pub url: Option<Url>,
    pub params: HashMap<String, String>,
    pub request: Option<CustomRequestFn>,
    pub conform: Option<ConformFn>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            params: HashMap::new(),
            request: None,
            conform: None,
        }
    }
}

impl EndpointConfig {
    #[must_use]
    pub fn with_url(url: Url) -> Self {
        Self {
            url: Some(url),
            ..Self::default()
        }
    }
}

pub type CustomRequestFn =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Option<serde_json::Value>> + Send + Sync>;
pub type ConformFn = Arc<dyn Fn(serde_json::Value) -> serde_json::Value + Send + Sync>;

/// The `authorization` / `token` / `userinfo` endpoint trio (spec.md §3).
#[derive(Clone, Default)]
pub struct Endpoints {
    pub authorization: EndpointConfig,
    pub token: EndpointConfig,
    pub userinfo: EndpointConfig,
}

/// `client_id` / `client_secret` / overrides (spec.md §3).
#[derive(Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// A raw (provider-specific) profile fetched from userinfo or an ID
/// token, handed to `onAuth`.
pub type Profile = serde_json::Value;

/// `onAuth` may raise (spec.md §4.8 "Upstream callback failure"); a raised
/// error is wired into [`crate::error::AuthError::Callback`] by the
/// provider's `callback` method, a `None` it returns just means "fall
/// through to the default post-callback redirect".
pub type OnAuthFn<U> =
    Arc<dyn Fn(Profile, String) -> BoxFuture<'static, eyre::Result<Option<InternalResponse<U>>>> + Send + Sync>;

/// The raw token-endpoint response, after `conform` and error checking
/// (spec.md §4.4 "process the token response into a `TokenSet`").
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

static INIT_RUSTLS: std::sync::Once = std::sync::Once::new();

/// `reqwest`'s `rustls-no-provider` feature leaves picking a rustls crypto
/// backend to the embedding application; since this crate is a library with
/// no process entry point of its own to do that from, it installs one the
/// first time any provider needs an HTTP client rather than requiring every
/// host to remember to.
fn ensure_rustls_provider() {
    INIT_RUSTLS.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Builds the `reqwest::Client` every provider uses for outbound calls:
/// a finite timeout and a bounded redirect policy (spec.md §5, §6).
#[must_use]
pub fn http_client() -> reqwest::Client {
    ensure_rustls_provider();
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(3))
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

/// A reusable OAuth "provider preset": the part of a provider's
/// configuration a caller builds once per third-party service (endpoints,
/// default checks, route shape) and merges with per-instance overrides by
/// calling further builder methods on the [`oauth::OAuthProviderConfig`] it
/// produces. The core ships this record type only, never a pre-baked
/// catalog of concrete providers (Design Note "Configuration merging").
#[derive(Clone)]
pub struct OAuthDefaultConfig {
    pub id: String,
    pub pages: ProviderPages,
    pub endpoints: Endpoints,
    pub checks: crate::checks::CheckSet,
}

impl OAuthDefaultConfig {
    #[must_use]
    pub fn new(id: impl Into<String>, endpoints: Endpoints) -> Self {
        let id = id.into();
        Self {
            pages: ProviderPages::defaults(&id),
            endpoints,
            checks: crate::checks::default_checks(),
            id,
        }
    }

    #[must_use]
    pub fn checks(mut self, checks: crate::checks::CheckSet) -> Self {
        self.checks = checks;
        self
    }

    #[must_use]
    pub fn pages(mut self, pages: ProviderPages) -> Self {
        self.pages = pages;
        self
    }

    /// Starts an [`oauth::OAuthProviderConfig`] from this preset; any
    /// builder method called on the result overrides the preset's value
    /// for that field.
    #[must_use]
    pub fn into_config<U>(self, client: ClientConfig, on_auth: OnAuthFn<U>) -> oauth::OAuthProviderConfig<U> {
        oauth::OAuthProviderConfig::new(self.id, client, on_auth)
            .checks(self.checks)
            .pages(self.pages)
            .endpoints(self.endpoints)
    }
}

/// The OIDC counterpart to [`OAuthDefaultConfig`], additionally carrying
/// default scopes (the issuer is per-instance, never part of a preset,
/// since two instances of the same issuer would be unusual).
#[derive(Clone)]
pub struct OIDCDefaultConfig {
    pub id: String,
    pub pages: ProviderPages,
    pub endpoints: Endpoints,
    pub checks: crate::checks::CheckSet,
    pub scopes: Vec<String>,
}

impl OIDCDefaultConfig {
    #[must_use]
    pub fn new(id: impl Into<String>, endpoints: Endpoints, scopes: Vec<String>) -> Self {
        let id = id.into();
        Self {
            pages: ProviderPages::defaults(&id),
            endpoints,
            checks: crate::checks::default_checks(),
            scopes,
            id,
        }
    }

    #[must_use]
    pub fn checks(mut self, checks: crate::checks::CheckSet) -> Self {
        self.checks = checks;
        self
    }

    #[must_use]
    pub fn pages(mut self, pages: ProviderPages) -> Self {
        self.pages = pages;
        self
    }

    #[must_use]
    pub fn into_config<U>(
        self,
        client: ClientConfig,
        issuer: Url,
        on_auth: OnAuthFn<U>,
    ) -> oidc::OIDCProviderConfig<U> {
        oidc::OIDCProviderConfig::new(self.id, client, issuer, on_auth)
            .checks(self.checks)
            .pages(self.pages)
            .endpoints(self.endpoints)
            .scopes(self.scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_on_auth<U>() -> OnAuthFn<U> {
        Arc::new(|_profile, _provider_id| Box::pin(async { Ok(None) }))
    }

    #[test]
    fn oauth_default_config_seeds_id_and_checks_into_the_built_config() {
        let mut endpoints = Endpoints::default();
        endpoints.authorization = EndpointConfig::with_url(Url::parse("https://example.test/authorize").unwrap());

        let preset = OAuthDefaultConfig::new("acme", endpoints);
        let config = preset.into_config::<serde_json::Value>(
            ClientConfig {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            noop_on_auth(),
        );

        assert_eq!(config.id, "acme");
        assert_eq!(config.pages.login.route, "/auth/login/acme");
        assert_eq!(config.checks, crate::checks::default_checks());
    }

    #[test]
    fn oauth_default_config_overrides_apply_after_the_preset() {
        let preset = OAuthDefaultConfig::new("acme", Endpoints::default());
        let config = preset
            .into_config::<serde_json::Value>(
                ClientConfig {
                    client_id: "id".to_string(),
                    client_secret: "secret".to_string(),
                },
                noop_on_auth(),
            )
            .checks([crate::checks::CheckKind::None].into_iter().collect());

        assert_eq!(config.checks, [crate::checks::CheckKind::None].into_iter().collect());
    }

    #[test]
    fn oidc_default_config_carries_scopes_into_the_built_config() {
        let preset = OIDCDefaultConfig::new("acme", Endpoints::default(), vec!["openid".to_string()]);
        let config = preset.into_config::<serde_json::Value>(
            ClientConfig {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            Url::parse("https://issuer.example").unwrap(),
            noop_on_auth(),
        );

        assert_eq!(config.scopes, vec!["openid".to_string()]);
    }
}
