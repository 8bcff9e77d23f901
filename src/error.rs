//! Error types for each pipeline stage.
//!
//! Every error is fatal: the run stops at the first failing stage and the
//! top-level [`Error`] names which stage it was.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The address query had nothing to search for
    #[error("invalid input: {0}")]
    Input(String),

    #[error("address resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("place details lookup failed: {0}")]
    Details(#[from] DetailsError),

    #[error("CRM authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("CRM upsert failed: {0}")]
    Upsert(#[from] UpsertError),
}

/// Text Search failures.
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// The request URL carries the API key, so it is stripped on conversion.
    #[error("text search request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("text search returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("text search response is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error(
        "text search returned status {status}: {}",
        .message.as_deref().unwrap_or("no message")
    )]
    Provider {
        status: String,
        message: Option<String>,
    },

    #[error("no places found for query {query:?}")]
    NoResults { query: String },
}

impl From<reqwest::Error> for ResolutionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.without_url())
    }
}

/// Place Details failures.
#[derive(Error, Debug)]
pub enum DetailsError {
    /// The request URL carries the API key, so it is stripped on conversion.
    #[error("place details request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("place details returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("place details response is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error(
        "place details returned status {status}: {}",
        .message.as_deref().unwrap_or("no message")
    )]
    Provider {
        status: String,
        message: Option<String>,
    },
}

impl From<reqwest::Error> for DetailsError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.without_url())
    }
}

/// OAuth2 token exchange failures.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("token response was empty (unexpected end of stream)")]
    EmptyBody,

    #[error("token response is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    /// Carries the decoded structure so the operator can see what came back.
    #[error(
        "unable to fetch access token, check the CRM credentials in the \
         environment; got {decoded}"
    )]
    MissingToken { decoded: String },
}

/// Failures talking to the CRM data API, for the lookup and the upsert.
#[derive(Error, Debug)]
pub enum UpsertError {
    #[error("CRM request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid CRM URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("CRM returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("CRM response is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Shorten a response body for inclusion in an error message.
pub(crate) fn excerpt(body: &str) -> String {
    body.chars().take(200).collect()
}
