#![forbid(unsafe_code)]

//! Thin Helix API client. Only the two read endpoints the downloader needs
//! are exposed: user lookup by login and the newest archived video.
//!
//! HTTP goes through [`HttpTransport`] so the retry policy can be exercised
//! without a network. [`UreqTransport`] is the production implementation.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::{Credential, TokenManager};
use crate::error::VodError;

pub const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";
/// Applied to every request, token fetches included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const UNAUTHORIZED: u16 = 401;

/// Status and body of a completed HTTP exchange. Non-2xx statuses are
/// returned here rather than as errors so callers can apply their own
/// policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait HttpTransport {
    /// Sends a form-encoded POST.
    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, VodError>;

    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, VodError>;
}

/// Blocking transport backed by a shared `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(REQUEST_TIMEOUT)
    }
}

impl HttpTransport for UreqTransport {
    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, VodError> {
        into_response(url, self.agent.post(url).send_form(form))
    }

    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, VodError> {
        let mut request = self.agent.get(url);
        for (key, value) in query {
            request = request.query(key, value);
        }
        for (name, value) in headers {
            request = request.set(name, value);
        }
        into_response(url, request.call())
    }
}

fn into_response(
    url: &str,
    result: Result<ureq::Response, ureq::Error>,
) -> Result<HttpResponse, VodError> {
    match result {
        Ok(response) => {
            let status = response.status();
            let body = response.into_string().map_err(|err| VodError::Transport {
                endpoint: url.to_string(),
                message: err.to_string(),
            })?;
            Ok(HttpResponse { status, body })
        }
        Err(ureq::Error::Status(status, response)) => Ok(HttpResponse {
            status,
            body: response.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Transport(transport)) => Err(VodError::Transport {
            endpoint: url.to_string(),
            message: transport.to_string(),
        }),
    }
}

/// Archived broadcast as returned by `GET /helix/videos`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VodDescriptor {
    pub id: String,
    pub title: String,
    /// ISO-8601 in UTC, e.g. `2024-03-01T18:04:05Z`.
    pub created_at: String,
    /// Human readable, e.g. `1h2m3s`.
    pub duration: String,
    pub url: String,
}

#[derive(Deserialize)]
struct HelixPage<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
struct HelixUser {
    id: String,
}

/// Lookups the orchestrator needs. `Ok(None)` means the platform answered
/// but had nothing to return.
pub trait VodLookup {
    fn resolve_user_id(&mut self, channel: &str) -> Result<Option<String>, VodError>;

    fn latest_archived_video(&mut self, user_id: &str) -> Result<Option<VodDescriptor>, VodError>;
}

pub struct HelixClient<T> {
    transport: T,
    tokens: TokenManager,
    base_url: String,
}

impl<T: HttpTransport> HelixClient<T> {
    pub fn new(transport: T, tokens: TokenManager) -> Self {
        Self {
            transport,
            tokens,
            base_url: HELIX_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetches an access token if none is held yet.
    pub fn ensure_token(&mut self) -> Result<&Credential, VodError> {
        self.tokens.ensure_token(&self.transport)
    }

    /// Authenticated GET against `<base>/<path>`. A 401 triggers exactly one
    /// token refresh and one retry; a second 401 is reported as
    /// [`VodError::AuthExpired`].
    fn helix_get<R: DeserializeOwned>(
        &mut self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<R, VodError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);

        let credential = self.tokens.ensure_token(&self.transport)?.clone();
        let mut response = send_authenticated(&self.transport, &url, query, &credential)?;

        if response.status == UNAUTHORIZED {
            warn!("{url} rejected the access token; refreshing and retrying once");
            let credential = self.tokens.refresh(&self.transport)?.clone();
            response = send_authenticated(&self.transport, &url, query, &credential)?;
            if response.status == UNAUTHORIZED {
                return Err(VodError::AuthExpired { endpoint: url });
            }
        }

        if !response.is_success() {
            return Err(VodError::ApiRequest {
                status: response.status,
                endpoint: url,
            });
        }

        serde_json::from_str(&response.body).map_err(|err| VodError::UnexpectedResponse {
            endpoint: url,
            message: err.to_string(),
        })
    }
}

fn send_authenticated<T: HttpTransport>(
    transport: &T,
    url: &str,
    query: &[(&str, &str)],
    credential: &Credential,
) -> Result<HttpResponse, VodError> {
    let bearer = credential.bearer();
    let headers = [
        ("Client-Id", credential.client_id()),
        ("Authorization", bearer.as_str()),
    ];
    let response = transport.get(url, query, &headers)?;
    debug!("GET {url} -> {}", response.status);
    Ok(response)
}

impl<T: HttpTransport> VodLookup for HelixClient<T> {
    fn resolve_user_id(&mut self, channel: &str) -> Result<Option<String>, VodError> {
        let page: HelixPage<HelixUser> = self.helix_get("users", &[("login", channel)])?;
        Ok(page.data.into_iter().next().map(|user| user.id))
    }

    fn latest_archived_video(&mut self, user_id: &str) -> Result<Option<VodDescriptor>, VodError> {
        let page: HelixPage<VodDescriptor> = self.helix_get(
            "videos",
            &[("user_id", user_id), ("type", "archive"), ("first", "1")],
        )?;
        Ok(page.data.into_iter().next())
    }
}
