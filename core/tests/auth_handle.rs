//! End-to-end exercises of `Auth::handle` against the literal scenarios
//! and invariants of spec.md §8, driven through the public API only.

use std::collections::HashMap;
use std::sync::Arc;

use auth_core::checks::CheckKind;
use auth_core::cookie::CookiesOptions;
use auth_core::io::{InternalRequest, RequestMethod};
use auth_core::provider::oauth::OAuthProviderConfig;
use auth_core::provider::{ClientConfig, EndpointConfig, Endpoints, HttpMethod};
use auth_core::session::{NewSession, SessionManagerConfig};
use auth_core::{Auth, AuthBuilder};
use serde_json::{json, Value};
use url::Url;

/// The opaque "original request" the core never looks inside of, beyond
/// asking its HTTP method (Design Note "Opaque original request").
#[derive(Debug, Clone, Copy)]
struct TestReq {
    method: HttpMethod,
}

impl RequestMethod for TestReq {
    fn http_method(&self) -> Option<HttpMethod> {
        Some(self.method)
    }
}

fn get(url: &str, cookies: HashMap<String, String>) -> InternalRequest<TestReq> {
    InternalRequest::new(
        Url::parse(url).unwrap(),
        cookies,
        TestReq { method: HttpMethod::Get },
    )
}

const SECRET: &[u8] = b"a-fairly-long-integration-test-secret";

fn bare_auth() -> Auth<Value, Value, Value, TestReq> {
    let cookies = Arc::new(CookiesOptions::new(false));
    let session_manager = SessionManagerConfig::<Value, Value, Value>::new(SECRET.to_vec(), cookies).build();
    AuthBuilder::new(session_manager).build()
}

fn github_provider() -> OAuthProviderConfig<Value> {
    let mut endpoints = Endpoints::default();
    endpoints.authorization = EndpointConfig::with_url(Url::parse("https://github.com/login/oauth/authorize").unwrap());
    endpoints.token = EndpointConfig::with_url(Url::parse("https://github.com/login/oauth/access_token").unwrap());
    endpoints.userinfo = EndpointConfig::with_url(Url::parse("https://api.github.com/user").unwrap());

    OAuthProviderConfig::new(
        "github",
        ClientConfig {
            client_id: "client123".to_string(),
            client_secret: "secret456".to_string(),
        },
        Arc::new(|_profile, _provider_id| {
            Box::pin(async { Ok(None::<auth_core::io::InternalResponse<Value>>) })
        }),
    )
    .checks([CheckKind::Pkce, CheckKind::State].into_iter().collect())
    .endpoints(endpoints)
}

#[tokio::test]
async fn session_introspection_anonymous() {
    let auth = bare_auth();
    let request = get("https://app/auth/session", HashMap::new());
    let response = auth.handle(request).await;

    assert!(response.user.is_none());
    assert_eq!(response.body, Some(Value::Null));
    assert!(response.cookies.is_empty());
}

#[tokio::test]
async fn session_introspection_logged_in() {
    let auth = bare_auth();
    let claims = json!({ "id": 42 });
    let access_cookie = auth_core::token::encode(SECRET, &claims, None).unwrap();

    let cookies_opts = CookiesOptions::new(false);
    let mut cookies = HashMap::new();
    cookies.insert(cookies_opts.access_token.name.clone(), access_cookie);

    let request = get("https://app/auth/session", cookies);
    let response = auth.handle(request).await;

    assert_eq!(response.body, Some(claims));
}

#[tokio::test]
async fn github_login_initiation_sets_state_and_pkce() {
    let cookies = Arc::new(CookiesOptions::new(false));
    let session_manager = SessionManagerConfig::<Value, Value, Value>::new(SECRET.to_vec(), cookies.clone()).build();
    let auth = AuthBuilder::new(session_manager)
        .oauth_provider("github", github_provider())
        .build();

    let request = get("https://app/auth/login/github", HashMap::new());
    let response = auth.handle(request).await;

    assert_eq!(response.status, Some(302));
    let redirect = response.redirect.expect("login must redirect");
    assert!(redirect.starts_with("https://github.com/login/oauth/authorize?"));

    let parsed = Url::parse(&redirect).unwrap();
    let query: HashMap<_, _> = parsed.query_pairs().into_owned().collect();
    assert!(query.contains_key("state"));
    assert!(query.contains_key("code_challenge"));
    assert_eq!(query.get("code_challenge_method"), Some(&"S256".to_string()));
    assert_eq!(
        query.get("redirect_uri"),
        Some(&"https://app/auth/callback/github".to_string())
    );

    let cookie_names: Vec<_> = response.cookies.iter().map(|c| c.name.as_str()).collect();
    assert!(cookie_names.contains(&cookies.state.name.as_str()));
    assert!(cookie_names.contains(&cookies.pkce_code_verifier.name.as_str()));
    for cookie in &response.cookies {
        assert_eq!(cookie.attrs.max_age, Some(time::Duration::seconds(900)));
    }
}

#[tokio::test]
async fn github_callback_rejects_mismatched_state() {
    let cookies = Arc::new(CookiesOptions::new(false));
    let session_manager = SessionManagerConfig::<Value, Value, Value>::new(SECRET.to_vec(), cookies.clone()).build();
    let auth = AuthBuilder::new(session_manager)
        .oauth_provider("github", github_provider())
        .build();

    let (_value, state_cookie) = auth_core::checks::create_state(SECRET, &cookies.state);
    let mut request_cookies = HashMap::new();
    request_cookies.insert(state_cookie.name.clone(), state_cookie.value.clone());

    let request = get(
        "https://app/auth/callback/github?code=abc&state=WRONG",
        request_cookies,
    );
    let response = auth.handle(request).await;

    assert!(response.error.is_some());
    assert!(response.user.is_none());
    assert!(response.redirect.is_none());
}

#[tokio::test]
async fn logout_with_active_session_deletes_both_cookies_in_order() {
    let auth = bare_auth();
    let access = auth_core::token::encode(SECRET, &json!({"id": 1}), None).unwrap();
    let refresh = auth_core::token::encode(SECRET, &json!({"id": 1, "v": 1}), None).unwrap();

    let cookies_opts = CookiesOptions::new(false);
    let mut cookies = HashMap::new();
    cookies.insert(cookies_opts.access_token.name.clone(), access);
    cookies.insert(cookies_opts.refresh_token.name.clone(), refresh);

    let request = get("https://app/auth/logout", cookies);
    let response = auth.handle(request).await;

    assert_eq!(response.status, Some(302));
    assert_eq!(response.redirect.as_deref(), Some("/"));
    assert_eq!(response.cookies.len(), 2);
    assert_eq!(response.cookies[0].name, cookies_opts.access_token.name);
    assert_eq!(response.cookies[1].name, cookies_opts.refresh_token.name);
    for cookie in &response.cookies {
        assert_eq!(cookie.value, "");
        assert_eq!(cookie.attrs.max_age, Some(time::Duration::ZERO));
    }
}

#[tokio::test]
async fn token_refresh_on_unrelated_path_carries_new_cookies_and_user() {
    let cookies = Arc::new(CookiesOptions::new(false));
    let session_manager = SessionManagerConfig::<Value, Value, Value>::new(SECRET.to_vec(), cookies.clone())
        .handle_refresh(|_input| async move {
            Ok(Some(NewSession {
                user: json!({ "id": 7, "name": "ada" }),
                access_token: json!({ "id": 7 }),
                refresh_token: Some(json!({ "id": 7, "v": 2 })),
            }))
        })
        .build();
    let auth = AuthBuilder::new(session_manager).build();

    let refresh_token = auth_core::token::encode(SECRET, &json!({"id": 7, "v": 1}), None).unwrap();
    let mut request_cookies = HashMap::new();
    request_cookies.insert(cookies.refresh_token.name.clone(), refresh_token);

    let request = get("https://app/home", request_cookies);
    let response = auth.handle(request).await;

    assert_eq!(response.user, Some(json!({ "id": 7, "name": "ada" })));
    assert_eq!(response.cookies.len(), 2);
    assert_eq!(response.cookies[0].name, cookies.access_token.name);
    assert_eq!(response.cookies[1].name, cookies.refresh_token.name);
}

#[tokio::test]
async fn session_endpoint_ignores_a_refreshed_user_with_no_access_cookie() {
    let cookies = Arc::new(CookiesOptions::new(false));
    let session_manager = SessionManagerConfig::<Value, Value, Value>::new(SECRET.to_vec(), cookies.clone())
        .handle_refresh(|_input| async move {
            Ok(Some(NewSession {
                user: json!({ "id": 7, "name": "ada" }),
                access_token: json!({ "id": 7 }),
                refresh_token: Some(json!({ "id": 7, "v": 2 })),
            }))
        })
        .build();
    let auth = AuthBuilder::new(session_manager).build();

    let refresh_token = auth_core::token::encode(SECRET, &json!({"id": 7, "v": 1}), None).unwrap();
    let mut request_cookies = HashMap::new();
    request_cookies.insert(cookies.refresh_token.name.clone(), refresh_token);

    let request = get("https://app/auth/session", request_cookies);
    let response = auth.handle(request).await;

    assert_eq!(response.body, Some(Value::Null));
    assert!(response.user.is_none());
    assert_eq!(response.cookies.len(), 2, "the refresh still happens and carries new cookies");
}

#[tokio::test]
async fn on_auth_raising_surfaces_as_a_callback_error() {
    let cookies = Arc::new(CookiesOptions::new(false));
    let session_manager = SessionManagerConfig::<Value, Value, Value>::new(SECRET.to_vec(), cookies.clone()).build();
    let mut endpoints = Endpoints::default();
    endpoints.authorization = EndpointConfig::with_url(Url::parse("https://github.com/login/oauth/authorize").unwrap());
    endpoints.token = EndpointConfig::with_url(Url::parse("https://github.com/login/oauth/access_token").unwrap());
    endpoints.userinfo = EndpointConfig::with_url(Url::parse("https://api.github.com/user").unwrap());
    let provider = OAuthProviderConfig::new(
        "github",
        ClientConfig {
            client_id: "client123".to_string(),
            client_secret: "secret456".to_string(),
        },
        Arc::new(|_profile, _provider_id| {
            Box::pin(async { Err::<Option<auth_core::io::InternalResponse<Value>>, _>(eyre::eyre!("downstream lookup failed")) })
        }),
    )
    .checks([CheckKind::None].into_iter().collect())
    .endpoints(endpoints);

    let auth = AuthBuilder::new(session_manager).oauth_provider("github", provider).build();

    let request = get("https://app/auth/callback/github?code=abc", HashMap::new());
    let response = auth.handle(request).await;

    assert!(response.error.is_some());
    assert!(response.user.is_none());
}

#[tokio::test]
async fn unrelated_path_with_no_session_state_invokes_no_provider() {
    let cookies = Arc::new(CookiesOptions::new(false));
    let session_manager = SessionManagerConfig::<Value, Value, Value>::new(SECRET.to_vec(), cookies).build();
    let auth = AuthBuilder::new(session_manager)
        .oauth_provider("github", github_provider())
        .build();

    let request = get("https://app/some/unrelated/path", HashMap::new());
    let response = auth.handle(request).await;

    assert!(response.cookies.is_empty());
    assert!(response.redirect.is_none());
    assert!(response.error.is_none());
}
