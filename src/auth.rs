//! OAuth2 password-grant token exchange.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};

use crate::config::GrantParams;
use crate::error::{excerpt, AuthError};

/// Token response from the identity provider. Secret: never log it outside
/// of the redacted `Debug` form.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub instance_url: String,
    #[serde(default)]
    pub token_type: String,
    /// Milliseconds since the epoch. Salesforce sends this as a string.
    #[serde(default, deserialize_with = "string_or_number")]
    pub issued_at: Option<i64>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub signature: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &str| if s.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("Credentials")
            .field("access_token", &redact(&self.access_token))
            .field("instance_url", &self.instance_url)
            .field("token_type", &self.token_type)
            .field("issued_at", &self.issued_at)
            .field("id", &self.id)
            .field("signature", &redact(&self.signature))
            .finish()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => {
            s.trim().parse().map(Some).map_err(serde::de::Error::custom)
        }
    }
}

/// Decode a token response body.
///
/// # Errors
///
/// - [`AuthError::EmptyBody`] if there is nothing to decode
/// - [`AuthError::Decode`] if the body is not JSON
/// - [`AuthError::MissingToken`] if the access token is empty
pub fn decode_credentials(body: &[u8]) -> Result<Credentials, AuthError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AuthError::EmptyBody);
    }

    let creds: Credentials =
        serde_json::from_slice(body).map_err(AuthError::Decode)?;
    if creds.access_token.is_empty() {
        return Err(AuthError::MissingToken {
            decoded: format!("{creds:?}"),
        });
    }
    Ok(creds)
}

/// Map a token endpoint reply to credentials. A non-2xx reply without a
/// usable token is reported with its status and a body excerpt.
pub(crate) fn token_response(
    status: StatusCode,
    body: &[u8],
) -> Result<Credentials, AuthError> {
    match decode_credentials(body) {
        Ok(creds) => Ok(creds),
        Err(_) if !status.is_success() => Err(AuthError::Status {
            status: status.as_u16(),
            body: excerpt(&String::from_utf8_lossy(body)),
        }),
        Err(e) => Err(e),
    }
}

/// Exchanges grant parameters for a bearer token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(
        &self,
        grant: &GrantParams,
    ) -> Result<Credentials, AuthError>;
}

pub struct OAuthClient {
    http: Client,
    token_url: String,
}

impl OAuthClient {
    /// `http` should have a cookie store enabled; the provider may set
    /// session cookies on the token response.
    pub fn new(http: Client, token_url: impl Into<String>) -> Self {
        Self {
            http,
            token_url: token_url.into(),
        }
    }
}

#[async_trait]
impl TokenExchange for OAuthClient {
    async fn exchange(
        &self,
        grant: &GrantParams,
    ) -> Result<Credentials, AuthError> {
        tracing::debug!(url = %self.token_url, "Posting token request");

        let response = self
            .http
            .post(&self.token_url)
            .form(&grant.form())
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        token_response(status, &body)
    }
}

/// Obtain credentials for the CRM.
pub async fn acquire(
    exchange: &dyn TokenExchange,
    grant: &GrantParams,
) -> Result<Credentials, AuthError> {
    let creds = exchange.exchange(grant).await?;
    tracing::info!(
        instance_url = %creds.instance_url,
        token_type = %creds.token_type,
        "Acquired CRM access token"
    );
    Ok(creds)
}
