//! OAuth 2.0 provider engine: the authorization-code flow (spec.md §4.4).

use std::sync::Arc;

use url::Url;

use crate::checks::{self, CheckSet, CheckValue};
use crate::cookie::{Cookie, CookieRole, CookiesOptions};
use crate::error::{AuthError, AuthResult};
use crate::io::{InternalRequest, InternalResponse};

use super::{ClientConfig, Endpoints, OnAuthFn, Profile, ProviderPages, TokenSet, http_client};

/// Registered OAuth provider state (spec.md §3 `OAuthProvider`).
///
/// Only parametric in `U`, the identified-user type `onAuth` returns; the
/// access/refresh token types live entirely on [`crate::session::SessionManager`]
/// and are never touched here.
pub struct OAuthProvider<U> {
    pub id: String,
    pub(crate) client: ClientConfig,
    pub(crate) checks: CheckSet,
    pub(crate) cookies: Arc<CookiesOptions>,
    pub(crate) secret: Arc<Vec<u8>>,
    pub(crate) pages: ProviderPages,
    pub(crate) endpoints: Endpoints,
    pub(crate) on_auth: OnAuthFn<U>,
    pub(crate) http: reqwest::Client,
}

/// Builder for [`OAuthProvider`], merged with the session manager's
/// secret/cookies at registration time (spec.md §3 "Providers inherit
/// these and do not have independent secrets unless explicitly
/// overridden").
pub struct OAuthProviderConfig<U> {
    pub id: String,
    pub client: ClientConfig,
    pub checks: CheckSet,
    pub pages: ProviderPages,
    pub endpoints: Endpoints,
    pub on_auth: OnAuthFn<U>,
}

impl<U> OAuthProviderConfig<U> {
    #[must_use]
    pub fn new(id: impl Into<String>, client: ClientConfig, on_auth: OnAuthFn<U>) -> Self {
        let id = id.into();
        Self {
            pages: ProviderPages::defaults(&id),
            id,
            client,
            checks: checks::default_checks(),
            endpoints: Endpoints::default(),
            on_auth,
        }
    }

    #[must_use]
    pub fn checks(mut self, checks: CheckSet) -> Self {
        self.checks = checks;
        self
    }

    #[must_use]
    pub fn pages(mut self, pages: ProviderPages) -> Self {
        self.pages = pages;
        self
    }

    #[must_use]
    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub(crate) fn build(self, cookies: Arc<CookiesOptions>, secret: Arc<Vec<u8>>) -> OAuthProvider<U> {
        OAuthProvider {
            id: self.id,
            client: self.client,
            checks: self.checks,
            cookies,
            secret,
            pages: self.pages,
            endpoints: self.endpoints,
            on_auth: self.on_auth,
            http: http_client(),
        }
    }
}

impl<U> OAuthProvider<U>
where
    U: Send + Sync + 'static,
{
    /// Plain OAuth has no discovery document, so PKCE's S256 downgrade
    /// path (spec.md §4.2) never triggers; only OIDC overrides this.
    pub(crate) fn supports_pkce_s256(&self) -> bool {
        true
    }

    fn redirect_uri<Req>(&self, request: &InternalRequest<Req>) -> String {
        format!("{}{}", request.origin(), self.pages.callback.route)
    }

    #[tracing::instrument(skip_all, fields(provider = %self.id))]
    pub async fn login<Req>(&self, request: &InternalRequest<Req>) -> AuthResult<InternalResponse<U>> {
        let auth_url = self
            .endpoints
            .authorization
            .url
            .clone()
            .ok_or_else(|| AuthError::Configuration(format!("provider {}: no authorization endpoint", self.id)))?;
        let mut url = auth_url;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.endpoints.authorization.params {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("client_id", &self.client.client_id);
            pairs.append_pair("response_type", "code");
        }
        if !url.query_pairs().any(|(k, _)| k == "redirect_uri") {
            let redirect_uri = self.redirect_uri(request);
            url.query_pairs_mut().append_pair("redirect_uri", &redirect_uri);
        }

        let mut cookies = Vec::new();
        apply_checks_for_login(&self.checks, self.supports_pkce_s256(), &self.secret, &self.cookies, &mut url, &mut cookies);

        let mut response = InternalResponse::redirect_to(url.to_string(), 302);
        response.extend_cookies(cookies);
        Ok(response)
    }

    #[tracing::instrument(skip_all, fields(provider = %self.id))]
    pub async fn callback<Req>(&self, request: &InternalRequest<Req>) -> AuthResult<InternalResponse<U>> {
        let mut deletion_cookies = Vec::new();

        let (state_value, state_del) =
            checks::use_state(request, &self.checks, &self.secret, &self.cookies.state)?;
        if let Some(c) = state_del {
            deletion_cookies.push(c);
        }

        if let Some(error) = request.query("error") {
            let description = request.query("error_description").unwrap_or(error);
            return Err(AuthError::Validation(description));
        }
        verify_state(&state_value, request)?;

        let code = request
            .query("code")
            .ok_or_else(|| AuthError::Validation("callback is missing `code`".to_string()))?;

        let (pkce_value, pkce_del) =
            checks::use_pkce(request, &self.checks, &self.secret, &self.cookies.pkce_code_verifier)?;
        if let Some(c) = pkce_del {
            deletion_cookies.push(c);
        }

        let token_set = self
            .exchange_code(request, &code, pkce_value.as_deref())
            .await?;

        let profile = self.fetch_profile(&token_set).await?;
        let profile_is_empty =
            profile.is_null() || profile.as_object().map(serde_json::Map::is_empty).unwrap_or(false);
        if profile_is_empty {
            return Err(AuthError::Validation("provider returned an empty profile".to_string()));
        }

        let mut response = (self.on_auth)(profile, self.id.clone())
            .await
            .map_err(AuthError::Callback)?
            .unwrap_or_else(|| {
                InternalResponse::redirect_to(
                    self.pages.callback.redirect.clone().unwrap_or_else(|| "/".to_string()),
                    302,
                )
            });
        let mut merged = deletion_cookies;
        merged.append(&mut response.cookies);
        response.cookies = merged;
        Ok(response)
    }

    pub(crate) async fn exchange_code<Req>(
        &self,
        request: &InternalRequest<Req>,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> AuthResult<TokenSet> {
        let token_url = self
            .endpoints
            .token
            .url
            .clone()
            .ok_or_else(|| AuthError::Configuration(format!("provider {}: no token endpoint", self.id)))?;

        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), self.redirect_uri(request)),
            ("client_id".to_string(), self.client.client_id.clone()),
            ("client_secret".to_string(), self.client.client_secret.clone()),
        ];
        if let Some(v) = pkce_verifier {
            form.push(("code_verifier".to_string(), v.to_string()));
        }

        let resp = self.http.post(token_url).form(&form).send().await?;

        if resp.headers().contains_key(reqwest::header::WWW_AUTHENTICATE) {
            return Err(AuthError::Validation(
                "token endpoint responded with a WWW-Authenticate challenge".to_string(),
            ));
        }

        let mut body: serde_json::Value = resp.json().await?;
        if let Some(conform) = &self.endpoints.token.conform {
            body = conform(body);
        }

        if let Some(error) = body.get("error").and_then(|v| v.as_str()) {
            let description = body
                .get("error_description")
                .and_then(|v| v.as_str())
                .unwrap_or(error)
                .to_string();
            return Err(AuthError::Validation(description));
        }

        serde_json::from_value(body)
            .map_err(|e| AuthError::Validation(format!("malformed token response: {e}")))
    }

    pub(crate) async fn fetch_profile(&self, tokens: &TokenSet) -> AuthResult<Profile> {
        if let Some(custom) = &self.endpoints.userinfo.request {
            let input = serde_json::json!({ "provider": self.id, "tokens": tokens });
            return custom(input)
                .await
                .ok_or_else(|| AuthError::Validation("userinfo request returned nothing".to_string()));
        }
        let url = self
            .endpoints
            .userinfo
            .url
            .clone()
            .ok_or_else(|| AuthError::Configuration(format!("provider {}: no userinfo endpoint", self.id)))?;
        let profile = self
            .http
            .get(url)
            .bearer_auth(&tokens.access_token)
            .send()
            .await?
            .json()
            .await?;
        Ok(profile)
    }
}

/// Applies the three anti-forgery checks in login-initiation order
/// (state → pkce → nonce), matching spec.md §4.2's combined semantics.
pub(crate) fn apply_checks_for_login(
    checks: &CheckSet,
    pkce_s256_supported: bool,
    secret: &[u8],
    cookies: &CookiesOptions,
    url: &mut Url,
    response_cookies: &mut Vec<Cookie>,
) {
    use crate::checks::CheckKind;

    if checks.contains(&CheckKind::State) {
        let (value, cookie) = checks::create_state(secret, cookies.template(CookieRole::State));
        url.query_pairs_mut().append_pair("state", &value);
        response_cookies.push(cookie);
    }

    let mut effective_nonce_required = checks.contains(&CheckKind::Nonce);
    if checks.contains(&CheckKind::Pkce) {
        if pkce_s256_supported {
            let (challenge, cookie) = checks::create_pkce(secret, cookies.template(CookieRole::PkceCodeVerifier));
            url.query_pairs_mut()
                .append_pair("code_challenge", &challenge)
                .append_pair("code_challenge_method", "S256");
            response_cookies.push(cookie);
        } else {
            effective_nonce_required = true;
        }
    }

    if effective_nonce_required {
        let (value, cookie) = checks::create_nonce(secret, cookies.template(CookieRole::Nonce));
        url.query_pairs_mut().append_pair("nonce", &value);
        response_cookies.push(cookie);
    }
}

fn verify_state<Req>(state_value: &CheckValue, request: &InternalRequest<Req>) -> AuthResult<()> {
    if let CheckValue::Value(expected) = state_value {
        let actual = request.query("state");
        if actual.as_deref() != Some(expected.as_str()) {
            return Err(AuthError::Validation("state did not match".to_string()));
        }
    }
    Ok(())
}
