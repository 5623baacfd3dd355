//! OIDC provider engine: same shape as the OAuth engine, with discovery
//! and ID-token validation replacing a userinfo call (spec.md §4.5).

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use openidconnect::core::{
    CoreAuthDisplay, CoreClaimName, CoreClaimType, CoreClient, CoreClientAuthMethod, CoreGrantType, CoreIdToken,
    CoreJsonWebKey, CoreJweContentEncryptionAlgorithm, CoreJweKeyManagementAlgorithm, CoreResponseMode,
    CoreResponseType, CoreSubjectIdentifierType,
};
use openidconnect::{
    AdditionalProviderMetadata, ClientId, ClientSecret, IssuerUrl, Nonce as OidcNonce, ProviderMetadata,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::checks::{self, CheckKind, CheckSet, CheckValue};
use crate::cookie::CookiesOptions;
use crate::error::{AuthError, AuthResult};
use crate::io::{InternalRequest, InternalResponse};

use super::oauth::apply_checks_for_login;
use super::{ClientConfig, Endpoints, OnAuthFn, Profile, ProviderPages, TokenSet, http_client};

/// The one discovery-document field the core needs beyond what
/// `openidconnect`'s own `CoreProviderMetadata` exposes (spec.md §4.2
/// "PKCE downgrade").
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PkceProviderMetadata {
    #[serde(default)]
    pub code_challenge_methods_supported: Option<Vec<String>>,
}

impl AdditionalProviderMetadata for PkceProviderMetadata {}

impl PkceProviderMetadata {
    fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported
            .as_ref()
            .is_some_and(|methods| methods.iter().any(|m| m == "S256"))
    }
}

/// Result of OIDC discovery, cached on the provider after first fetch
/// (spec.md §3).
pub type DiscoveredMetadata = ProviderMetadata<
    PkceProviderMetadata,
    CoreAuthDisplay,
    CoreClientAuthMethod,
    CoreClaimName,
    CoreClaimType,
    CoreGrantType,
    CoreJweContentEncryptionAlgorithm,
    CoreJweKeyManagementAlgorithm,
    CoreJsonWebKey,
    CoreResponseMode,
    CoreResponseType,
    CoreSubjectIdentifierType,
>;

fn supports_s256(metadata: &DiscoveredMetadata) -> bool {
    metadata.additional_metadata().supports_s256()
}

/// Registered OIDC provider state (spec.md §3 `OIDCProvider`).
pub struct OIDCProvider<U> {
    pub id: String,
    client: ClientConfig,
    /// Mutable because discovery can downgrade `{pkce}` to `{nonce}`
    /// (spec.md §4.2 "PKCE downgrade"). No lock is held across the
    /// discovery `.await` (spec.md §5, §9 "Lazy OIDC discovery").
    checks: ArcSwap<CheckSet>,
    cookies: Arc<CookiesOptions>,
    secret: Arc<Vec<u8>>,
    pages: ProviderPages,
    endpoints: Endpoints,
    on_auth: OnAuthFn<U>,
    http: reqwest::Client,
    issuer: Url,
    scopes: Vec<String>,
    metadata: ArcSwapOption<DiscoveredMetadata>,
}

/// Builder for [`OIDCProvider`].
pub struct OIDCProviderConfig<U> {
    pub id: String,
    pub client: ClientConfig,
    pub checks: CheckSet,
    pub pages: ProviderPages,
    pub endpoints: Endpoints,
    pub on_auth: OnAuthFn<U>,
    pub issuer: Url,
    pub scopes: Vec<String>,
}

impl<U> OIDCProviderConfig<U> {
    #[must_use]
    pub fn new(id: impl Into<String>, client: ClientConfig, issuer: Url, on_auth: OnAuthFn<U>) -> Self {
        let id = id.into();
        Self {
            pages: ProviderPages::defaults(&id),
            id,
            client,
            checks: checks::default_checks(),
            endpoints: Endpoints::default(),
            on_auth,
            issuer,
            scopes: Vec::new(),
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

    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub(crate) fn build(self, cookies: Arc<CookiesOptions>, secret: Arc<Vec<u8>>) -> OIDCProvider<U> {
        OIDCProvider {
            id: self.id,
            client: self.client,
            checks: ArcSwap::from_pointee(self.checks),
            cookies,
            secret,
            pages: self.pages,
            endpoints: self.endpoints,
            on_auth: self.on_auth,
            http: http_client(),
            issuer: self.issuer,
            scopes: self.scopes,
            metadata: ArcSwapOption::from(None),
        }
    }
}

impl<U> OIDCProvider<U>
where
    U: Send + Sync + 'static,
{
    fn redirect_uri<Req>(&self, request: &InternalRequest<Req>) -> String {
        format!("{}{}", request.origin(), self.pages.callback.route)
    }

    /// Lazy, idempotent discovery (spec.md §4.5, §5, §9). Concurrent
    /// initializers converge on the same value since the discovery
    /// document is a pure function of the issuer; no lock is required.
    #[tracing::instrument(skip(self), fields(provider = %self.id))]
    pub async fn initialize(&self) -> AuthResult<Arc<DiscoveredMetadata>> {
        if let Some(existing) = self.metadata.load_full() {
            return Ok(existing);
        }

        let issuer = IssuerUrl::new(self.issuer.to_string())
            .map_err(|e| AuthError::Configuration(format!("provider {}: invalid issuer: {e}", self.id)))?;
        let metadata = DiscoveredMetadata::discover_async(issuer, &self.http)
            .await
            .map_err(|e| AuthError::Validation(format!("OIDC discovery failed: {e}")))?;
        let metadata = Arc::new(metadata);
        self.metadata.store(Some(metadata.clone()));

        let current = self.checks.load_full();
        if current.contains(&CheckKind::Pkce) && !supports_s256(&metadata) {
            tracing::debug!(provider = %self.id, "OIDC server lacks S256; downgrading pkce check to nonce");
            let mut updated = (*current).clone();
            updated.remove(&CheckKind::Pkce);
            updated.insert(CheckKind::Nonce);
            self.checks.store(Arc::new(updated));
        }

        Ok(metadata)
    }

    #[tracing::instrument(skip_all, fields(provider = %self.id))]
    pub async fn login<Req>(&self, request: &InternalRequest<Req>) -> AuthResult<InternalResponse<U>> {
        let metadata = self.initialize().await?;

        let mut url = metadata.authorization_endpoint().url().clone();
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
        if !url.query_pairs().any(|(k, _)| k == "scope") {
            let scope = if self.scopes.iter().any(|s| s == "openid") {
                self.scopes.join(" ")
            } else {
                "openid profile email".to_string()
            };
            url.query_pairs_mut().append_pair("scope", &scope);
        }

        let checks = self.checks.load_full();
        let mut cookies = Vec::new();
        apply_checks_for_login(&checks, supports_s256(&metadata), &self.secret, &self.cookies, &mut url, &mut cookies);

        let mut response = InternalResponse::redirect_to(url.to_string(), 302);
        response.extend_cookies(cookies);
        Ok(response)
    }

    #[tracing::instrument(skip_all, fields(provider = %self.id))]
    pub async fn callback<Req>(&self, request: &InternalRequest<Req>) -> AuthResult<InternalResponse<U>> {
        let metadata = self.initialize().await?;
        let checks = self.checks.load_full();
        let mut deletion_cookies = Vec::new();

        let (state_value, state_del) =
            checks::use_state(request, &checks, &self.secret, &self.cookies.state)?;
        if let Some(c) = state_del {
            deletion_cookies.push(c);
        }

        if let Some(error) = request.query("error") {
            let description = request.query("error_description").unwrap_or(error);
            return Err(AuthError::Validation(description));
        }
        if let CheckValue::Value(expected) = &state_value {
            let actual = request.query("state");
            if actual.as_deref() != Some(expected.as_str()) {
                return Err(AuthError::Validation("state did not match".to_string()));
            }
        }

        let code = request
            .query("code")
            .ok_or_else(|| AuthError::Validation("callback is missing `code`".to_string()))?;

        let (pkce_value, pkce_del) =
            checks::use_pkce(request, &checks, &self.secret, &self.cookies.pkce_code_verifier)?;
        if let Some(c) = pkce_del {
            deletion_cookies.push(c);
        }

        let token_set = self
            .exchange_code(&metadata, request, &code, pkce_value.as_deref())
            .await?;

        let (nonce_value, nonce_del) =
            checks::use_nonce(request, &checks, &self.secret, &self.cookies.nonce)?;
        if let Some(c) = nonce_del {
            deletion_cookies.push(c);
        }

        let id_token = token_set
            .id_token
            .as_deref()
            .ok_or_else(|| AuthError::Validation("token response missing id_token".to_string()))?;
        let profile = self
            .validate_id_token(&metadata, id_token, nonce_value.as_deref())
            .await?;

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

    async fn exchange_code<Req>(
        &self,
        metadata: &DiscoveredMetadata,
        request: &InternalRequest<Req>,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> AuthResult<TokenSet> {
        let token_url = metadata
            .token_endpoint()
            .ok_or_else(|| AuthError::Configuration(format!("provider {}: no token endpoint", self.id)))?
            .url()
            .clone();

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

        let resp = self
            .http
            .post(token_url)
            .form(&form)
            .send()
            .await?;

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

    /// Validates the ID token's signature (via the issuer's JWKS, fetched
    /// through the discovered metadata), audience, issuer, expiry, and
    /// nonce (spec.md §4.5, §6). The client built here is used only for
    /// its verifier; it never makes a network call itself.
    async fn validate_id_token(
        &self,
        metadata: &DiscoveredMetadata,
        id_token: &str,
        nonce: Option<&str>,
    ) -> AuthResult<Profile> {
        let client = CoreClient::from_provider_metadata(
            metadata.clone(),
            ClientId::new(self.client.client_id.clone()),
            Some(ClientSecret::new(self.client.client_secret.clone())),
        );

        let parsed: CoreIdToken = id_token
            .parse()
            .map_err(|e| AuthError::Validation(format!("malformed id_token: {e}")))?;

        let nonce = OidcNonce::new(nonce.unwrap_or_default().to_string());
        let claims = parsed
            .claims(&client.id_token_verifier(), &nonce)
            .map_err(|e| AuthError::Validation(format!("id_token validation failed: {e}")))?;

        serde_json::to_value(claims)
            .map_err(|e| AuthError::Validation(format!("id_token claims not serializable: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s256_is_recognized_among_other_methods() {
        let metadata = PkceProviderMetadata {
            code_challenge_methods_supported: Some(vec!["plain".to_string(), "S256".to_string()]),
        };
        assert!(metadata.supports_s256());
    }

    #[test]
    fn missing_methods_does_not_support_s256() {
        let metadata = PkceProviderMetadata {
            code_challenge_methods_supported: None,
        };
        assert!(!metadata.supports_s256());
    }

    #[test]
    fn plain_only_does_not_support_s256() {
        let metadata = PkceProviderMetadata {
            code_challenge_methods_supported: Some(vec!["plain".to_string()]),
        };
        assert!(!metadata.supports_s256());
    }
}
