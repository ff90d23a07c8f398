//! Authenticated HTTP collaborator.
//!
//! The session needs exactly one REST call (push token registration) plus
//! a few facts about the logged-in account. [`AuthenticatedApi`] is that
//! seam; [`ReqwestApi`] is the production implementation.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, USER_AGENT};
use reqwest::Client;

use crate::constants;

/// Status of a completed HTTP call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Whether the status is 2xx.
    pub is_success: bool,
}

impl ApiResponse {
    /// Response with `status`.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        Self {
            status,
            is_success: (200..300).contains(&status),
        }
    }
}

/// Logged-in account context and form POST capability.
#[async_trait]
pub trait AuthenticatedApi: Send + Sync + std::fmt::Debug {
    /// Whether a user is logged in. The session does not start otherwise.
    fn is_authenticated(&self) -> bool;

    /// CSRF token of the current web session.
    fn csrf_token(&self) -> String;

    /// Id of the logged-in user.
    fn logged_in_user_id(&self) -> Option<i64>;

    /// POST `fields` as `application/x-www-form-urlencoded` to `uri`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the request could not be completed; HTTP
    /// error statuses come back as a non-success [`ApiResponse`].
    async fn post_form(&self, uri: &str, fields: &[(&str, String)]) -> Result<ApiResponse>;
}

/// Credentials of the logged-in account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountSession {
    /// Logged-in user id.
    pub user_id: Option<i64>,
    /// CSRF token.
    pub csrf_token: String,
    /// Raw `Cookie` header for the web session.
    pub cookie: Option<String>,
}

/// [`AuthenticatedApi`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestApi {
    client: Client,
    session: AccountSession,
}

impl ReqwestApi {
    /// Creates a client sending `user_agent` and the session cookie.
    ///
    /// # Arguments
    ///
    /// * `user_agent` - Application user agent
    /// * `session` - Account the requests are made for
    ///
    /// # Errors
    ///
    /// Returns an error if the cookie is not a valid header value or the
    /// HTTP client cannot be created.
    pub fn new(user_agent: &str, session: AccountSession) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
        if let Some(cookie) = &session.cookie {
            let mut value = HeaderValue::from_str(cookie)?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, session })
    }

    /// Creates an API with a pre-configured HTTP client.
    #[must_use]
    pub fn with_client(client: Client, session: AccountSession) -> Self {
        Self { client, session }
    }
}

#[async_trait]
impl AuthenticatedApi for ReqwestApi {
    fn is_authenticated(&self) -> bool {
        self.session.user_id.is_some()
    }

    fn csrf_token(&self) -> String {
        self.session.csrf_token.clone()
    }

    fn logged_in_user_id(&self) -> Option<i64> {
        self.session.user_id
    }

    async fn post_form(&self, uri: &str, fields: &[(&str, String)]) -> Result<ApiResponse> {
        let response = self
            .client
            .post(uri)
            .header("X-CSRFToken", &self.session.csrf_token)
            .form(fields)
            .send()
            .await?;
        Ok(ApiResponse::from_status(response.status().as_u16()))
    }
}
