//! Credentials provider: a thin pass-through to user code (spec.md §4.6).

use std::sync::Arc;

use crate::error::{AuthError, AuthResult};
use crate::future::BoxFuture;
use crate::io::{InternalRequest, InternalResponse};

use super::{HttpMethod, ProviderPages, RouteSpec};

/// `onAuth` may raise (spec.md §4.8); wired into [`AuthError::Callback`] by
/// [`CredentialsProvider::login`]/[`CredentialsProvider::callback`].
pub type CredentialsAuthFn<U, Req> = Arc<
    dyn Fn(Arc<InternalRequest<Req>>) -> BoxFuture<'static, eyre::Result<Option<InternalResponse<U>>>> + Send + Sync,
>;

/// Login and callback both defer entirely to `onAuth`; no cookies, no
/// JWT use beyond what the callback produces itself (spec.md §4.6).
pub struct CredentialsProvider<U, Req> {
    pub id: String,
    pub pages: ProviderPages,
    on_auth: CredentialsAuthFn<U, Req>,
}

impl<U, Req> CredentialsProvider<U, Req>
where
    U: Send + Sync + 'static,
    Req: Send + Sync + 'static,
{
    /// Default routes: `/auth/login/credentials` (POST),
    /// `/auth/callback/credentials` (POST) (spec.md §4.6).
    #[must_use]
    pub fn new(id: impl Into<String>, on_auth: CredentialsAuthFn<U, Req>) -> Self {
        let id = id.into();
        let route = |path: &str| RouteSpec {
            route: path.to_string(),
            methods: vec![HttpMethod::Post],
            redirect: None,
        };
        Self {
            pages: ProviderPages {
                login: route(&format!("/auth/login/{id}")),
                callback: route(&format!("/auth/callback/{id}")),
            },
            id,
            on_auth,
        }
    }

    #[must_use]
    pub fn pages(mut self, pages: ProviderPages) -> Self {
        self.pages = pages;
        self
    }

    /// # Errors
    /// Propagates `onAuth` raising as [`AuthError::Callback`].
    pub async fn login(&self, request: Arc<InternalRequest<Req>>) -> AuthResult<InternalResponse<U>> {
        (self.on_auth)(request).await.map(Option::unwrap_or_default).map_err(AuthError::Callback)
    }

    /// # Errors
    /// Propagates `onAuth` raising as [`AuthError::Callback`].
    pub async fn callback(&self, request: Arc<InternalRequest<Req>>) -> AuthResult<InternalResponse<U>> {
        (self.on_auth)(request).await.map(Option::unwrap_or_default).map_err(AuthError::Callback)
    }
}
