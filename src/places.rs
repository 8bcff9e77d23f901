//! Google Places web service client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{excerpt, DetailsError, ResolutionError};

/// One Text Search hit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlaceSummary {
    pub place_id: String,
    #[serde(default)]
    pub formatted_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddressComponent {
    #[serde(default)]
    pub long_name: String,
    pub short_name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

impl AddressComponent {
    pub fn has_type(&self, tag: &str) -> bool {
        self.types.iter().any(|t| t == tag)
    }
}

/// Place Details for a single place.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlaceResult {
    pub place_id: String,
    #[serde(default)]
    pub address_components: Vec<AddressComponent>,
}

/// Free-text place search, ranked by relevance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextSearch: Send + Sync {
    async fn text_search(
        &self,
        query: &str,
    ) -> Result<Vec<PlaceSummary>, ResolutionError>;
}

/// Structured details for a place identifier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaceDetails: Send + Sync {
    async fn place_details(
        &self,
        place_id: &str,
    ) -> Result<PlaceResult, DetailsError>;
}

#[derive(Debug, Deserialize)]
struct TextSearchResponse {
    #[serde(default)]
    results: Vec<PlaceSummary>,
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    result: Option<PlaceResult>,
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

pub struct GooglePlaces {
    http: Client,
    base_url: String,
    api_key: String,
}

impl GooglePlaces {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

/// Map a Text Search reply to its results. `ZERO_RESULTS` is an empty list.
pub(crate) fn decode_text_search(
    status: StatusCode,
    body: &str,
) -> Result<Vec<PlaceSummary>, ResolutionError> {
    if !status.is_success() {
        return Err(ResolutionError::Status {
            status: status.as_u16(),
            body: excerpt(body),
        });
    }
    let response: TextSearchResponse =
        serde_json::from_str(body).map_err(ResolutionError::Decode)?;

    match response.status.as_str() {
        "OK" => Ok(response.results),
        "ZERO_RESULTS" => Ok(Vec::new()),
        _ => Err(ResolutionError::Provider {
            status: response.status,
            message: response.error_message,
        }),
    }
}

/// Map a Place Details reply to the place.
pub(crate) fn decode_place_details(
    status: StatusCode,
    body: &str,
) -> Result<PlaceResult, DetailsError> {
    if !status.is_success() {
        return Err(DetailsError::Status {
            status: status.as_u16(),
            body: excerpt(body),
        });
    }
    let response: DetailsResponse =
        serde_json::from_str(body).map_err(DetailsError::Decode)?;

    match (response.status.as_str(), response.result) {
        ("OK", Some(result)) => Ok(result),
        (_, _) => Err(DetailsError::Provider {
            status: response.status,
            message: response.error_message,
        }),
    }
}

#[async_trait]
impl TextSearch for GooglePlaces {
    async fn text_search(
        &self,
        query: &str,
    ) -> Result<Vec<PlaceSummary>, ResolutionError> {
        let url = format!("{}/textsearch/json", self.base_url);
        tracing::debug!(%url, "Sending text search");

        let response = self
            .http
            .get(&url)
            .query(&[("query", query), ("key", self.api_key.as_str())])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        decode_text_search(status, &body)
    }
}

#[async_trait]
impl PlaceDetails for GooglePlaces {
    async fn place_details(
        &self,
        place_id: &str,
    ) -> Result<PlaceResult, DetailsError> {
        let url = format!("{}/details/json", self.base_url);
        tracing::debug!(%url, place_id, "Fetching place details");

        let response = self
            .http
            .get(&url)
            .query(&[
                ("place_id", place_id),
                ("fields", "place_id,address_components"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        decode_place_details(status, &body)
    }
}
