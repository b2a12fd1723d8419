#![forbid(unsafe_code)]

//! Error taxonomy shared by the API client, the supervisor and the
//! orchestrator. "Not found" outcomes are modelled as `Option`, not here.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum VodError {
    /// Client id or secret missing or implausibly short. Raised before any
    /// network activity.
    #[error("invalid API credentials: {0}")]
    AuthConfig(String),

    #[error("token endpoint returned HTTP {status}: {body}")]
    TokenRequest { status: u16, body: String },

    /// The request was rejected with 401 even after a fresh token.
    #[error("authorization for {endpoint} failed again after refreshing the access token")]
    AuthExpired { endpoint: String },

    #[error("{endpoint} returned HTTP {status}")]
    ApiRequest { status: u16, endpoint: String },

    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("unexpected response from {endpoint}: {message}")]
    UnexpectedResponse { endpoint: String, message: String },

    #[error("invalid VOD timestamp {value:?}: {message}")]
    InvalidTimestamp { value: String, message: String },

    #[error("{tool} is not installed or not in PATH")]
    ToolNotInstalled { tool: String },

    #[error("capture tool exited with {status}: {diagnostics}")]
    DownloadFailed { status: String, diagnostics: String },

    #[error("download interrupted by operator")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VodError {
    /// Faults caused by the local environment rather than the remote side.
    pub fn is_fatal_setup(&self) -> bool {
        matches!(self, VodError::AuthConfig(_) | VodError::ToolNotInstalled { .. })
    }
}
