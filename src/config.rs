//! Configuration loaded from environment variables.
//!
//! `main` loads an optional `.env` file first, so every variable below can
//! also live there.
//!
//! ## Required Variables
//!
//! - `PLACES_API_KEY` - Google Places API key
//! - `CRM_CLIENT_ID`, `CRM_CLIENT_SECRET` - connected app credentials
//! - `CRM_USERNAME`, `CRM_PASSWORD` - resource owner credentials
//!
//! ## Optional Variables
//!
//! - `CRM_SECURITY_TOKEN` - appended to the password (default: empty)
//! - `CRM_GRANT_TYPE` - OAuth2 grant type (default: `password`)
//! - `CRM_TOKEN_URL` - token endpoint (default: Salesforce production login)
//! - `CRM_INSTANCE_URL` - overrides the instance URL from the token response
//! - `CRM_API_VERSION` - REST API version (default: `58.0`)
//! - `PLACES_BASE_URL` - Places web service root
//! - `HTTP_TIMEOUT_SECS` - deadline for each request (default: 30)

use std::{env, fmt, time::Duration};

use anyhow::{bail, Context, Result};

pub const DEFAULT_PLACES_BASE_URL: &str =
    "https://maps.googleapis.com/maps/api/place";
pub const DEFAULT_TOKEN_URL: &str =
    "https://login.salesforce.com/services/oauth2/token";
pub const DEFAULT_API_VERSION: &str = "58.0";

/// OAuth2 password-grant parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct GrantParams {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub security_token: String,
}

impl GrantParams {
    /// Form fields for the token request. The password field carries the
    /// password with the security token appended.
    pub fn form(&self) -> [(&'static str, String); 5] {
        [
            ("grant_type", self.grant_type.clone()),
            ("client_id", self.client_id.clone()),
            ("client_secret", self.client_secret.clone()),
            ("username", self.username.clone()),
            ("password", format!("{}{}", self.password, self.security_token)),
        ]
    }
}

impl fmt::Debug for GrantParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantParams")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("security_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct Config {
    pub places_api_key: String,
    pub places_base_url: String,
    pub token_url: String,
    pub grant: GrantParams,
    /// When set, used instead of the instance URL the token endpoint returns.
    pub instance_url: Option<String>,
    pub api_version: String,
    pub http_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("places_api_key", &"<redacted>")
            .field("places_base_url", &self.places_base_url)
            .field("token_url", &self.token_url)
            .field("grant", &self.grant)
            .field("instance_url", &self.instance_url)
            .field("api_version", &self.api_version)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first required variable that is missing,
    /// or a variable that fails to parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("{key} must be set"))
        };
        let optional = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let grant = GrantParams {
            grant_type: optional("CRM_GRANT_TYPE", "password"),
            client_id: required("CRM_CLIENT_ID")?,
            client_secret: required("CRM_CLIENT_SECRET")?,
            username: required("CRM_USERNAME")?,
            password: required("CRM_PASSWORD")?,
            security_token: optional("CRM_SECURITY_TOKEN", ""),
        };

        let timeout = lookup("HTTP_TIMEOUT_SECS").filter(|v| !v.is_empty());
        let timeout_secs: u64 = match timeout {
            Some(v) => v.parse().with_context(|| {
                format!("HTTP_TIMEOUT_SECS must be a number, got '{v}'")
            })?,
            None => 30,
        };
        if timeout_secs == 0 {
            bail!("HTTP_TIMEOUT_SECS must be greater than 0");
        }

        Ok(Self {
            places_api_key: required("PLACES_API_KEY")?,
            places_base_url: optional(
                "PLACES_BASE_URL",
                DEFAULT_PLACES_BASE_URL,
            )
            .trim_end_matches('/')
            .to_string(),
            token_url: optional("CRM_TOKEN_URL", DEFAULT_TOKEN_URL),
            grant,
            instance_url: lookup("CRM_INSTANCE_URL")
                .filter(|v| !v.is_empty())
                .map(|v| v.trim_end_matches('/').to_string()),
            api_version: optional("CRM_API_VERSION", DEFAULT_API_VERSION),
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
