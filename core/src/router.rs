//! The request router/orchestrator: dispatches an [`InternalRequest`] to
//! the session manager and registered providers, merging their responses
//! into one [`InternalResponse`] (spec.md §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::AuthResult;
use crate::io::{InternalRequest, InternalResponse, RequestMethod};
use crate::provider::credentials::CredentialsProvider;
use crate::provider::email::EmailProvider;
use crate::provider::oauth::{OAuthProvider, OAuthProviderConfig};
use crate::provider::oidc::{OIDCProvider, OIDCProviderConfig};
use crate::provider::HttpMethod;
use crate::session::SessionManager;

/// The well-known, configurable paths the router itself handles
/// (spec.md §4.7, §6 "Route shape").
#[derive(Debug, Clone)]
pub struct Pages {
    pub login_redirect: String,
    pub logout_redirect: String,
    pub logout: String,
    pub session: String,
}

impl Default for Pages {
    fn default() -> Self {
        Self {
            login_redirect: "/".to_string(),
            logout_redirect: "/".to_string(),
            logout: "/auth/logout".to_string(),
            session: "/auth/session".to_string(),
        }
    }
}

/// Any one of the four provider engines, erased to a common shape the
/// router can dispatch through without knowing which kind it holds.
enum RegisteredProvider<U, Req> {
    OAuth(OAuthProvider<U>),
    Oidc(OIDCProvider<U>),
    Credentials(CredentialsProvider<U, Req>),
    Email(EmailProvider<U, Req>),
}

impl<U, Req> RegisteredProvider<U, Req>
where
    U: Send + Sync + 'static,
    Req: Send + Sync + 'static,
{
    fn login_route(&self) -> &crate::provider::RouteSpec {
        match self {
            RegisteredProvider::OAuth(p) => &p.pages.login,
            RegisteredProvider::Oidc(p) => &p.pages.login,
            RegisteredProvider::Credentials(p) => &p.pages.login,
            RegisteredProvider::Email(p) => &p.pages.login,
        }
    }

    fn callback_route(&self) -> &crate::provider::RouteSpec {
        match self {
            RegisteredProvider::OAuth(p) => &p.pages.callback,
            RegisteredProvider::Oidc(p) => &p.pages.callback,
            RegisteredProvider::Credentials(p) => &p.pages.callback,
            RegisteredProvider::Email(p) => &p.pages.callback,
        }
    }

    async fn login(&self, request: &Arc<InternalRequest<Req>>) -> AuthResult<InternalResponse<U>> {
        match self {
            RegisteredProvider::OAuth(p) => p.login(request).await,
            RegisteredProvider::Oidc(p) => p.login(request).await,
            RegisteredProvider::Credentials(p) => p.login(Arc::clone(request)).await,
            RegisteredProvider::Email(p) => p.login(request).await,
        }
    }

    async fn callback(&self, request: &Arc<InternalRequest<Req>>) -> AuthResult<InternalResponse<U>> {
        match self {
            RegisteredProvider::OAuth(p) => p.callback(request).await,
            RegisteredProvider::Oidc(p) => p.callback(request).await,
            RegisteredProvider::Credentials(p) => p.callback(Arc::clone(request)).await,
            RegisteredProvider::Email(p) => p.callback(request).await,
        }
    }
}

/// Builds an [`Auth`] instance: registers providers, propagating the
/// session manager's secret and [`crate::cookie::CookiesOptions`] into
/// each one (spec.md §4.7 "providers inherit these and do not have
/// independent secrets unless explicitly overridden").
pub struct AuthBuilder<A, R, U, Req> {
    session_manager: SessionManager<A, R, U>,
    providers: HashMap<String, RegisteredProvider<U, Req>>,
    pages: Pages,
}

impl<A, R, U, Req> AuthBuilder<A, R, U, Req>
where
    A: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    U: Send + Sync + 'static,
    Req: Send + Sync + 'static,
{
    #[must_use]
    pub fn new(session_manager: SessionManager<A, R, U>) -> Self {
        Self {
            session_manager,
            providers: HashMap::new(),
            pages: Pages::default(),
        }
    }

    #[must_use]
    pub fn pages(mut self, pages: Pages) -> Self {
        self.pages = pages;
        self
    }

    #[must_use]
    pub fn oauth_provider(mut self, id: impl Into<String>, config: OAuthProviderConfig<U>) -> Self {
        let provider = config.build(Arc::clone(self.session_manager.cookies()), self.secret_arc());
        self.providers.insert(id.into(), RegisteredProvider::OAuth(provider));
        self
    }

    #[must_use]
    pub fn oidc_provider(mut self, id: impl Into<String>, config: OIDCProviderConfig<U>) -> Self {
        let provider = config.build(Arc::clone(self.session_manager.cookies()), self.secret_arc());
        self.providers.insert(id.into(), RegisteredProvider::Oidc(provider));
        self
    }

    #[must_use]
    pub fn credentials_provider(mut self, id: impl Into<String>, provider: CredentialsProvider<U, Req>) -> Self {
        self.providers.insert(id.into(), RegisteredProvider::Credentials(provider));
        self
    }

    #[must_use]
    pub fn email_provider(mut self, id: impl Into<String>, provider: EmailProvider<U, Req>) -> Self {
        self.providers.insert(id.into(), RegisteredProvider::Email(provider));
        self
    }

    fn secret_arc(&self) -> Arc<Vec<u8>> {
        Arc::new(self.session_manager.secret().to_vec())
    }

    #[must_use]
    pub fn build(self) -> Auth<A, R, U, Req> {
        let mut login_routes = HashMap::new();
        let mut callback_routes = HashMap::new();
        for (id, provider) in &self.providers {
            login_routes.insert(provider.login_route().route.clone(), id.clone());
            callback_routes.insert(provider.callback_route().route.clone(), id.clone());
        }
        Auth {
            session_manager: self.session_manager,
            providers: self.providers,
            login_routes,
            callback_routes,
            pages: self.pages,
        }
    }
}

/// The top-level entry point: one instance per deployment, holding the
/// session manager, every registered provider, and the route maps built
/// once at construction (spec.md §3 `Auth`, §5 "write-once-read-many").
pub struct Auth<A, R, U, Req> {
    session_manager: SessionManager<A, R, U>,
    providers: HashMap<String, RegisteredProvider<U, Req>>,
    login_routes: HashMap<String, String>,
    callback_routes: HashMap<String, String>,
    pages: Pages,
}

impl<A, R, U, Req> Auth<A, R, U, Req>
where
    A: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    U: Serialize + Clone + Send + Sync + 'static,
    Req: RequestMethod + Send + Sync + 'static,
{
    #[must_use]
    pub fn session_manager(&self) -> &SessionManager<A, R, U> {
        &self.session_manager
    }

    #[must_use]
    pub fn pages(&self) -> &Pages {
        &self.pages
    }

    /// The full dispatch algorithm (spec.md §4.7). Never panics; any
    /// provider fault is caught and packaged as `{ error }` (spec.md
    /// §4.8).
    #[tracing::instrument(skip_all, fields(path = %request.url.path()))]
    pub async fn handle(&self, request: InternalRequest<Req>) -> InternalResponse<U> {
        let request = Arc::new(request);
        let path = request.url.path().to_string();
        let method = request.request_method();

        let refresh_response = match self.session_manager.handle_request(&request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(error = %error, "auth request failed");
                return InternalResponse::error(error);
            }
        };

        let result = self.dispatch(&path, method, &request).await;

        let mut response = match result {
            Ok(Some(dispatched)) => dispatched,
            Ok(None) => {
                let mut response = InternalResponse::new();
                response.user = refresh_response.user.clone();
                response
            }
            Err(error) => {
                tracing::warn!(error = %error, "auth request failed");
                InternalResponse::error(error)
            }
        };

        let mut merged = refresh_response.cookies;
        merged.append(&mut response.cookies);
        response.cookies = merged;
        response
    }

    async fn dispatch(
        &self,
        path: &str,
        method: Option<HttpMethod>,
        request: &Arc<InternalRequest<Req>>,
    ) -> AuthResult<Option<InternalResponse<U>>> {
        if path == self.pages.session {
            let user = self.session_manager.user_from_access_cookie(request).await;
            let mut response = InternalResponse::new();
            response.body = Some(serde_json::to_value(&user).unwrap_or(serde_json::Value::Null));
            response.user = user;
            return Ok(Some(response));
        }

        if path == self.pages.logout {
            let mut logout_response = self.session_manager.logout(request).await?;
            if logout_response.redirect.is_none() {
                logout_response.redirect = Some(self.pages.logout_redirect.clone());
                logout_response.status = Some(302);
            }
            return Ok(Some(logout_response));
        }

        if let Some(provider_id) = self.login_routes.get(path) {
            let route = self.providers[provider_id].login_route();
            if method_accepted(route, method) {
                let mut logged_in = self.providers[provider_id].login(request).await?;
                if logged_in.user.is_some() && logged_in.redirect.is_none() {
                    logged_in.redirect = Some(self.pages.login_redirect.clone());
                    logged_in.status = Some(302);
                }
                return Ok(Some(logged_in));
            }
        }

        if let Some(provider_id) = self.callback_routes.get(path) {
            let route = self.providers[provider_id].callback_route();
            if method_accepted(route, method) {
                let mut completed = self.providers[provider_id].callback(request).await?;
                if completed.user.is_some() && completed.redirect.is_none() {
                    completed.redirect = Some(self.pages.login_redirect.clone());
                    completed.status = Some(302);
                }
                return Ok(Some(completed));
            }
        }

        Ok(None)
    }
}

fn method_accepted(route: &crate::provider::RouteSpec, method: Option<HttpMethod>) -> bool {
    match method {
        Some(method) => route.methods.contains(&method),
        None => true,
    }
}
