#![forbid(unsafe_code)]

//! App access tokens via the client-credentials grant.
//!
//! The [`TokenManager`] is the only writer of the run's [`Credential`]. It is
//! owned by the API client, fetches lazily, and replaces the token in place
//! when the API rejects it. Nothing is persisted between runs.

use std::fmt;

use serde::Deserialize;
use tracing::debug;

use crate::api::HttpTransport;
use crate::error::VodError;

pub const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Anything this short is a typo or a placeholder, not a real client id.
const MIN_CREDENTIAL_LEN: usize = 7;

const NOT_SET: &str = "NOT SET";

/// Validated client id and secret.
#[derive(Clone)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    /// Checks presence and plausible length before any request is made.
    pub fn new(client_id: Option<&str>, client_secret: Option<&str>) -> Result<Self, VodError> {
        let client_id = plausible(client_id).ok_or_else(|| {
            VodError::AuthConfig("TWITCH_CLIENT_ID is missing or too short".into())
        })?;
        let client_secret = plausible(client_secret).ok_or_else(|| {
            VodError::AuthConfig("TWITCH_CLIENT_SECRET is missing or too short".into())
        })?;
        Ok(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_masked(f, "ClientCredentials", &self.client_id, &self.client_secret)
    }
}

/// Debug output for anything pairing a client id with a secret value.
fn debug_masked(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    client_id: &str,
    secret: &str,
) -> fmt::Result {
    f.debug_struct(name)
        .field("client_id", &mask_client_id(Some(client_id)))
        .field("secret", &mask_secret(Some(secret)))
        .finish()
}

fn plausible(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|value| value.chars().count() >= MIN_CREDENTIAL_LEN)
}

/// Bearer token plus the client id it was issued to.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    client_id: String,
    endpoint_status: u16,
}

impl Credential {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// HTTP status the token endpoint answered with.
    pub fn endpoint_status(&self) -> u16 {
        self.endpoint_status
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_masked(f, "Credential", &self.client_id, &self.access_token)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct TokenManager {
    credentials: ClientCredentials,
    token_url: String,
    current: Option<Credential>,
}

impl TokenManager {
    pub fn new(credentials: ClientCredentials) -> Self {
        Self {
            credentials,
            token_url: TOKEN_URL.to_string(),
            current: None,
        }
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    pub fn current(&self) -> Option<&Credential> {
        self.current.as_ref()
    }

    /// Returns the held token, fetching one on first use.
    pub fn ensure_token<T: HttpTransport + ?Sized>(
        &mut self,
        transport: &T,
    ) -> Result<&Credential, VodError> {
        let credential = match self.current.take() {
            Some(credential) => credential,
            None => self.fetch(transport)?,
        };
        Ok(&*self.current.insert(credential))
    }

    /// Drops the held token and fetches a new one. On failure no token is
    /// held afterwards.
    pub fn refresh<T: HttpTransport + ?Sized>(
        &mut self,
        transport: &T,
    ) -> Result<&Credential, VodError> {
        self.current = None;
        let credential = self.fetch(transport)?;
        Ok(&*self.current.insert(credential))
    }

    fn fetch<T: HttpTransport + ?Sized>(&self, transport: &T) -> Result<Credential, VodError> {
        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ];
        let response = transport.post_form(&self.token_url, &form)?;
        debug!("POST {} -> {}", self.token_url, response.status);

        if !response.is_success() {
            return Err(VodError::TokenRequest {
                status: response.status,
                body: response.body,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&response.body).map_err(|err| VodError::UnexpectedResponse {
                endpoint: self.token_url.clone(),
                message: err.to_string(),
            })?;
        if parsed.access_token.is_empty() {
            return Err(VodError::UnexpectedResponse {
                endpoint: self.token_url.clone(),
                message: "empty access_token".into(),
            });
        }

        Ok(Credential {
            access_token: parsed.access_token,
            client_id: self.credentials.client_id.clone(),
            endpoint_status: response.status,
        })
    }
}

/// `abc...xyz`, or `NOT SET` when absent or implausible.
pub fn mask_client_id(value: Option<&str>) -> String {
    match plausible(value) {
        Some(value) => {
            let head: String = value.chars().take(3).collect();
            format!("{head}...{}", last_chars(value, 3))
        }
        None => NOT_SET.to_string(),
    }
}

/// `***` followed by the last four characters.
pub fn mask_secret(value: Option<&str>) -> String {
    match plausible(value) {
        Some(value) => format!("***{}", last_chars(value, 4)),
        None => NOT_SET.to_string(),
    }
}

fn last_chars(value: &str, count: usize) -> String {
    let skip = value.chars().count().saturating_sub(count);
    value.chars().skip(skip).collect()
}
