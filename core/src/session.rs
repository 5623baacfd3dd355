//! Session manager (spec.md §4.3): the lifecycle of access/refresh
//! tokens, expressed as user-supplied callbacks over opaque claim types.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use time::Duration;

use crate::cookie::{CookieRole, CookiesOptions};
use crate::error::{AuthError, AuthResult};
use crate::future::BoxFuture;
use crate::io::{InternalRequest, InternalResponse};
use crate::token::{self, DEFAULT_ACCESS_TOKEN_MAX_AGE, DEFAULT_REFRESH_TOKEN_MAX_AGE};

/// `{ user, accessToken, refreshToken? }` — what a host returns from
/// `createSession`/`handleRefresh` (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct NewSession<U, A, R> {
    pub user: U,
    pub access_token: A,
    pub refresh_token: Option<R>,
}

/// What `handleRefresh` is handed: whichever of the two cookies decoded
/// successfully (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct RefreshInput<A, R> {
    pub access_token: Option<A>,
    pub refresh_token: Option<R>,
}

type CreateSessionFn<U, A, R> =
    Arc<dyn Fn(U) -> BoxFuture<'static, Option<NewSession<U, A, R>>> + Send + Sync>;
type GetUserFn<A, U> = Arc<dyn Fn(A) -> BoxFuture<'static, Option<U>> + Send + Sync>;
/// `handleRefresh` may raise (spec.md §4.8 "Upstream callback failure");
/// a raised error is wired into [`AuthError::Callback`] by
/// [`SessionManager::handle_request`], a `None` it returns is simply "no
/// refresh happened".
type HandleRefreshFn<A, R, U> = Arc<
    dyn Fn(RefreshInput<A, R>) -> BoxFuture<'static, eyre::Result<Option<NewSession<U, A, R>>>> + Send + Sync,
>;
/// `onInvalidateSession(session, refresh, self)`: `self` is realized as a
/// borrow of the manager's [`CookiesOptions`] rather than the manager
/// itself, since the callback only ever needs it to build its own
/// deletion cookies (recorded in DESIGN.md). May raise, wired into
/// [`AuthError::Callback`] by [`SessionManager::logout`].
type OnInvalidateFn<A, R, U> = Arc<
    dyn Fn(Option<A>, Option<R>, Arc<CookiesOptions>) -> BoxFuture<'static, eyre::Result<Option<InternalResponse<U>>>>
        + Send
        + Sync,
>;

/// Builder-style configuration for [`SessionManager`] (ambient config
/// layer, SPEC_FULL.md §2).
pub struct SessionManagerConfig<A, R, U> {
    secret: Vec<u8>,
    cookies: Arc<CookiesOptions>,
    access_max_age: Duration,
    refresh_max_age: Duration,
    create_session: Option<CreateSessionFn<U, A, R>>,
    get_user_from_session: GetUserFn<A, U>,
    handle_refresh: Option<HandleRefreshFn<A, R, U>>,
    on_invalidate_session: Option<OnInvalidateFn<A, R, U>>,
}

impl<A, R, U> SessionManagerConfig<A, R, U>
where
    A: Send + Sync + 'static,
    R: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    /// `secret` is required (spec.md §7 "Configuration error"); the
    /// default `getUserFromSession` is the identity function when
    /// `U: From<A>`, matching spec.md §4.3's "default: identity".
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>, cookies: Arc<CookiesOptions>) -> Self
    where
        U: From<A>,
        A: Clone,
    {
        Self {
            secret: secret.into(),
            cookies,
            access_max_age: DEFAULT_ACCESS_TOKEN_MAX_AGE,
            refresh_max_age: DEFAULT_REFRESH_TOKEN_MAX_AGE,
            create_session: None,
            get_user_from_session: Arc::new(|a: A| Box::pin(async move { Some(U::from(a)) })),
            handle_refresh: None,
            on_invalidate_session: None,
        }
    }

    /// Build from an explicit `getUserFromSession`, for callers whose
    /// access-token claims and user type differ.
    #[must_use]
    pub fn with_user_mapping<F, Fut>(secret: impl Into<Vec<u8>>, cookies: Arc<CookiesOptions>, get_user: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Option<U>> + Send + 'static,
    {
        Self {
            secret: secret.into(),
            cookies,
            access_max_age: DEFAULT_ACCESS_TOKEN_MAX_AGE,
            refresh_max_age: DEFAULT_REFRESH_TOKEN_MAX_AGE,
            create_session: None,
            get_user_from_session: Arc::new(move |a| Box::pin(get_user(a))),
            handle_refresh: None,
            on_invalidate_session: None,
        }
    }

    #[must_use]
    pub fn access_max_age(mut self, max_age: Duration) -> Self {
        self.access_max_age = max_age;
        self
    }

    #[must_use]
    pub fn refresh_max_age(mut self, max_age: Duration) -> Self {
        self.refresh_max_age = max_age;
        self
    }

    #[must_use]
    pub fn create_session<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Option<NewSession<U, A, R>>> + Send + 'static,
        U: Clone,
    {
        self.create_session = Some(Arc::new(move |u| Box::pin(f(u))));
        self
    }

    #[must_use]
    pub fn handle_refresh<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RefreshInput<A, R>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = eyre::Result<Option<NewSession<U, A, R>>>> + Send + 'static,
    {
        self.handle_refresh = Some(Arc::new(move |input| Box::pin(f(input))));
        self
    }

    #[must_use]
    pub fn on_invalidate_session<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Option<A>, Option<R>, Arc<CookiesOptions>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = eyre::Result<Option<InternalResponse<U>>>> + Send + 'static,
    {
        self.on_invalidate_session = Some(Arc::new(move |a, r, c| Box::pin(f(a, r, c))));
        self
    }

    #[must_use]
    pub fn build(self) -> SessionManager<A, R, U> {
        SessionManager {
            secret: self.secret,
            cookies: self.cookies,
            access_max_age: self.access_max_age,
            refresh_max_age: self.refresh_max_age,
            create_session: self.create_session,
            get_user_from_session: self.get_user_from_session,
            handle_refresh: self.handle_refresh,
            on_invalidate_session: self.on_invalidate_session,
        }
    }
}

/// Maintains access/refresh cookies, delegating session creation,
/// refresh, and invalidation to user code (spec.md §4.3).
///
/// Holds no process-wide state; all state is in cookies (spec.md §5).
pub struct SessionManager<A, R, U> {
    secret: Vec<u8>,
    cookies: Arc<CookiesOptions>,
    access_max_age: Duration,
    refresh_max_age: Duration,
    create_session: Option<CreateSessionFn<U, A, R>>,
    get_user_from_session: GetUserFn<A, U>,
    handle_refresh: Option<HandleRefreshFn<A, R, U>>,
    on_invalidate_session: Option<OnInvalidateFn<A, R, U>>,
}

impl<A, R, U> SessionManager<A, R, U>
where
    A: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    #[must_use]
    pub fn cookies(&self) -> &Arc<CookiesOptions> {
        &self.cookies
    }

    #[must_use]
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    fn decode_access(&self, cookie: Option<&str>) -> Option<A> {
        let raw = cookie?;
        let claims = token::decode(&self.secret, raw);
        if claims.is_none() {
            tracing::debug!("session manager: access-token cookie present but undecryptable");
        }
        claims
    }

    fn decode_refresh(&self, cookie: Option<&str>) -> Option<R> {
        let raw = cookie?;
        let claims = token::decode(&self.secret, raw);
        if claims.is_none() {
            tracing::debug!("session manager: refresh-token cookie present but undecryptable");
        }
        claims
    }

    /// `createSession(user) -> NewSession | nullish`, exposed so
    /// first-party providers (credentials, email) can mint a session from
    /// an authenticated user (spec.md §4.6).
    pub async fn create_session(&self, user: U) -> Option<NewSession<U, A, R>> {
        let f = self.create_session.as_ref()?;
        f(user).await
    }

    /// Encode a [`NewSession`]'s tokens into access/refresh cookies, in
    /// that order (spec.md §4.3 "Cookie-building order").
    #[must_use]
    pub fn session_cookies(&self, session: &NewSession<U, A, R>) -> Vec<crate::cookie::Cookie> {
        let mut cookies = Vec::with_capacity(2);
        if let Ok(encoded) = token::encode(&self.secret, &session.access_token, Some(self.access_max_age)) {
            cookies.push(
                self.cookies
                    .template(CookieRole::AccessToken)
                    .build(encoded, Some(self.access_max_age)),
            );
        }
        if let Some(refresh) = &session.refresh_token
            && let Ok(encoded) = token::encode(&self.secret, refresh, Some(self.refresh_max_age))
        {
            cookies.push(
                self.cookies
                    .template(CookieRole::RefreshToken)
                    .build(encoded, Some(self.refresh_max_age)),
            );
        }
        cookies
    }

    /// The user decoded straight from the access-token cookie, with no
    /// refresh applied — what `pages.session` reports (spec.md §4.7 step 4
    /// "body is the user decoded from the access cookie").
    pub async fn user_from_access_cookie<Req>(&self, request: &InternalRequest<Req>) -> Option<U> {
        let access = self.decode_access(request.cookie(&self.cookies.access_token.name))?;
        (self.get_user_from_session)(access).await
    }

    /// Runs on every request, win or lose, so token refresh can piggyback
    /// on anything (spec.md §4.7 step 3).
    ///
    /// # Errors
    /// Propagates `handleRefresh` raising as [`AuthError::Callback`]
    /// (spec.md §4.8 "Upstream callback failure"). A cookie that fails to
    /// decrypt is a soft failure (logged, `None`), never an error here.
    #[tracing::instrument(skip_all)]
    pub async fn handle_request<Req>(&self, request: &InternalRequest<Req>) -> AuthResult<InternalResponse<U>> {
        let access_claims = self.decode_access(request.cookie(&self.cookies.access_token.name));
        let refresh_claims = self.decode_refresh(request.cookie(&self.cookies.refresh_token.name));

        let mut response = InternalResponse::new();
        if let Some(access) = access_claims.clone() {
            response.user = (self.get_user_from_session)(access).await;
        }

        if let Some(handle_refresh) = &self.handle_refresh {
            let input = RefreshInput {
                access_token: access_claims,
                refresh_token: refresh_claims,
            };
            match handle_refresh(input).await {
                Ok(Some(new_session)) => {
                    response.extend_cookies(self.session_cookies(&new_session));
                    if response.user.is_none() {
                        response.user = Some(new_session.user);
                    }
                }
                Ok(None) => {}
                Err(report) => return Err(AuthError::Callback(report)),
            }
        }

        Ok(response)
    }

    /// Invalidate the session and delete both cookies unconditionally
    /// (spec.md §4.3). A decode failure degrades silently to anonymous
    /// (spec.md §7 "Decode soft-failure"); `onInvalidateSession` raising
    /// propagates as [`AuthError::Callback`] (spec.md §4.8).
    ///
    /// # Errors
    /// Propagates `onInvalidateSession` raising.
    #[tracing::instrument(skip_all)]
    pub async fn logout<Req>(&self, request: &InternalRequest<Req>) -> AuthResult<InternalResponse<U>> {
        let access_claims = self.decode_access(request.cookie(&self.cookies.access_token.name));
        let refresh_claims = self.decode_refresh(request.cookie(&self.cookies.refresh_token.name));

        let mut response = match (&self.on_invalidate_session, access_claims.clone()) {
            (Some(callback), Some(access)) => {
                match callback(Some(access), refresh_claims.clone(), self.cookies.clone()).await {
                    Ok(opt) => opt.unwrap_or_default(),
                    Err(report) => return Err(AuthError::Callback(report)),
                }
            }
            _ => InternalResponse::new(),
        };

        response.push_cookie(self.cookies.access_token.deletion());
        response.push_cookie(self.cookies.refresh_token.deletion());
        Ok(response)
    }
}
