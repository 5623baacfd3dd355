//! Email provider: passwordless login via a random verification token
//! delivered through user-supplied email sending (spec.md §4.6).

use std::sync::Arc;

use rand::RngCore;

use crate::error::{AuthError, AuthResult};
use crate::future::BoxFuture;
use crate::io::{InternalRequest, InternalResponse};

use super::{HttpMethod, ProviderPages, RouteSpec};

/// Handed to the user-supplied `onAuth` delivery callback.
#[derive(Debug, Clone)]
pub struct EmailVerificationPayload {
    pub html: String,
    pub email: String,
    pub token: String,
    pub provider: String,
}

pub type GetEmailFn<Req> = Arc<dyn Fn(&InternalRequest<Req>) -> Option<String> + Send + Sync>;
/// `onAuth` may raise (spec.md §4.8); wired into [`AuthError::Callback`] by
/// [`EmailProvider::login`].
pub type EmailOnAuthFn<U> =
    Arc<dyn Fn(EmailVerificationPayload) -> BoxFuture<'static, eyre::Result<Option<InternalResponse<U>>>> + Send + Sync>;
/// `onVerify` may raise (spec.md §4.8); wired into [`AuthError::Callback`] by
/// [`EmailProvider::callback`].
pub type EmailOnVerifyFn<U> =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, eyre::Result<Option<InternalResponse<U>>>> + Send + Sync>;

pub struct EmailProvider<U, Req> {
    pub id: String,
    pub pages: ProviderPages,
    get_email: GetEmailFn<Req>,
    on_auth: EmailOnAuthFn<U>,
    on_verify: EmailOnVerifyFn<U>,
}

impl<U, Req> EmailProvider<U, Req>
where
    U: Send + Sync + 'static,
    Req: Send + Sync + 'static,
{
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        get_email: GetEmailFn<Req>,
        on_auth: EmailOnAuthFn<U>,
        on_verify: EmailOnVerifyFn<U>,
    ) -> Self {
        let id = id.into();
        Self {
            pages: ProviderPages {
                login: RouteSpec {
                    route: format!("/auth/login/{id}"),
                    methods: vec![HttpMethod::Post],
                    redirect: None,
                },
                callback: RouteSpec {
                    route: format!("/auth/callback/{id}"),
                    methods: vec![HttpMethod::Get],
                    redirect: Some("/".to_string()),
                },
            },
            id,
            get_email,
            on_auth,
            on_verify,
        }
    }

    #[must_use]
    pub fn pages(mut self, pages: ProviderPages) -> Self {
        self.pages = pages;
        self
    }

    /// Extracts the email, generates a one-time token, renders the
    /// deterministic HTML template, and hands delivery to `onAuth`
    /// (spec.md §4.6). Returns an empty response if no email was found,
    /// matching `{}` in the source.
    /// # Errors
    /// Propagates `onAuth` raising as [`AuthError::Callback`].
    #[tracing::instrument(skip_all, fields(provider = %self.id))]
    pub async fn login(&self, request: &InternalRequest<Req>) -> AuthResult<InternalResponse<U>> {
        let Some(email) = (self.get_email)(request) else {
            return Ok(InternalResponse::new());
        };

        let token = random_hex_token();
        let verification_url = format!(
            "{}{}?token={}&email={}",
            request.origin(),
            self.pages.callback.route,
            urlencode(&token),
            urlencode(&email),
        );
        let html = render_verification_email(&verification_url);

        let payload = EmailVerificationPayload {
            html,
            email,
            token,
            provider: self.id.clone(),
        };
        (self.on_auth)(payload)
            .await
            .map(Option::unwrap_or_default)
            .map_err(AuthError::Callback)
    }

    /// # Errors
    /// Propagates `onVerify` raising as [`AuthError::Callback`].
    #[tracing::instrument(skip_all, fields(provider = %self.id))]
    pub async fn callback(&self, request: &InternalRequest<Req>) -> AuthResult<InternalResponse<U>> {
        let Some(token) = request.query("token") else {
            return Ok(InternalResponse::new());
        };
        let Some(email) = request.query("email") else {
            return Ok(InternalResponse::new());
        };
        (self.on_verify)(token, email)
            .await
            .map(Option::unwrap_or_default)
            .map_err(AuthError::Callback)
    }
}

fn random_hex_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Deterministic, bit-identical for identical inputs (spec.md §4.6): same
/// markup, same color palette every time.
#[must_use]
pub fn render_verification_email(verification_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<body style="background: #f9f9f9; padding: 24px; font-family: -apple-system, sans-serif;">
  <table width="100%" border="0" cellspacing="0" cellpadding="0" style="max-width: 480px; margin: 0 auto; background: #ffffff; border-radius: 8px; overflow: hidden;">
    <tr>
      <td style="padding: 32px; text-align: center;">
        <h1 style="color: #1a1a1a; font-size: 20px; margin: 0 0 16px;">Sign in</h1>
        <p style="color: #4a4a4a; font-size: 14px; margin: 0 0 24px;">Click the button below to sign in.</p>
        <a href="{verification_url}" style="display: inline-block; background: #346df1; color: #ffffff; font-size: 14px; font-weight: 600; text-decoration: none; padding: 12px 24px; border-radius: 6px;">Sign in</a>
      </td>
    </tr>
  </table>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_is_bit_identical_for_identical_input() {
        let a = render_verification_email("https://app.example/auth/callback/email?token=t&email=e");
        let b = render_verification_email("https://app.example/auth/callback/email?token=t&email=e");
        assert_eq!(a, b);
    }

    #[test]
    fn template_embeds_the_verification_url() {
        let html = render_verification_email("https://app.example/verify?token=abc");
        assert!(html.contains("https://app.example/verify?token=abc"));
    }
}
