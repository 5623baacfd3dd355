//! The abstract request/response shapes the core speaks in (spec.md §3,
//! §6). A framework adapter builds an [`InternalRequest`] from a
//! host-native request and translates the returned [`InternalResponse`]
//! back into one.

use std::collections::HashMap;

use url::Url;

use crate::cookie::Cookie;
use crate::error::AuthError;
use crate::provider::HttpMethod;

/// Lets the router ask the opaque original request "what HTTP method was
/// this?" without understanding anything else about the adapter's native
/// request type (spec.md §3 "original request ... opaque", §4.7 dispatch
/// skips a login/callback handler whose method doesn't match).
pub trait RequestMethod {
    fn http_method(&self) -> Option<HttpMethod>;
}

/// Immutable: the parsed absolute URL, a pre-parsed cookie map (per RFC
/// 6265), and the original host request kept opaque so provider code can
/// read form bodies or headers without the core understanding them
/// (Design Note "Opaque original request").
#[derive(Debug, Clone)]
pub struct InternalRequest<Req> {
    pub url: Url,
    pub cookies: HashMap<String, String>,
    pub request: Req,
}

impl<Req> InternalRequest<Req> {
    #[must_use]
    pub fn new(url: Url, cookies: HashMap<String, String>, request: Req) -> Self {
        Self {
            url,
            cookies,
            request,
        }
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// A single query parameter, first match, matching the common
    /// `?key=value` usage in callback handling.
    #[must_use]
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[must_use]
    pub fn origin(&self) -> String {
        let scheme = self.url.scheme();
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        }
    }

    /// The method of the underlying opaque request, if the adapter's
    /// request type can answer that (`None` method mismatches never fail a
    /// dispatch, they just skip the handler — spec.md §4.7).
    #[must_use]
    pub fn request_method(&self) -> Option<HttpMethod>
    where
        Req: RequestMethod,
    {
        self.request.http_method()
    }
}

/// Mutable: assembled by the core as it processes a request. Empty on
/// construction; merged and returned to the adapter (spec.md §3).
#[derive(Debug)]
pub struct InternalResponse<User> {
    pub user: Option<User>,
    pub status: Option<u16>,
    pub redirect: Option<String>,
    pub cookies: Vec<Cookie>,
    pub body: Option<serde_json::Value>,
    pub error: Option<AuthError>,
}

/// Manual `Default`: none of the fields require `User: Default` (we only
/// ever construct `None`/empty), so this must not be `#[derive(Default)]`,
/// which would wrongly require it.
impl<User> Default for InternalResponse<User> {
    fn default() -> Self {
        Self {
            user: None,
            status: None,
            redirect: None,
            cookies: Vec::new(),
            body: None,
            error: None,
        }
    }
}

impl<User> InternalResponse<User> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn redirect_to(target: impl Into<String>, status: u16) -> Self {
        Self {
            redirect: Some(target.into()),
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn error(error: AuthError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn push_cookie(&mut self, cookie: Cookie) {
        self.cookies.push(cookie);
    }

    pub fn extend_cookies(&mut self, cookies: impl IntoIterator<Item = Cookie>) {
        self.cookies.extend(cookies);
    }
}
