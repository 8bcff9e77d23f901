//! Salesforce REST client for `Property__c` records.

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use url::{ParseError, Url};

use crate::address::StructuredAddress;
use crate::auth::Credentials;
use crate::error::{excerpt, UpsertError};

pub const PROPERTY_OBJECT: &str = "Property__c";
pub const PLACE_ID_FIELD: &str = "Place_ID__c";

/// A `Property__c` record. `id` and `place_id` are only populated when read
/// back from the CRM and are never sent in an upsert body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    #[serde(rename = "Id", default, skip_serializing)]
    pub id: Option<String>,
    #[serde(rename = "Place_ID__c", default, skip_serializing)]
    pub place_id: Option<String>,
    #[serde(rename = "Zip_Code__c", default, deserialize_with = "nullable")]
    pub zip: String,
    #[serde(
        rename = "Street_Address__c",
        default,
        deserialize_with = "nullable"
    )]
    pub street: String,
    #[serde(
        rename = "State_Code__c",
        default,
        deserialize_with = "nullable"
    )]
    pub state: String,
    #[serde(rename = "City__c", default, deserialize_with = "nullable")]
    pub city: String,
}

impl PropertyRecord {
    pub fn from_address(address: &StructuredAddress) -> Self {
        Self {
            id: None,
            place_id: None,
            zip: address.zip.clone(),
            street: address.street_line(),
            state: address.state.clone(),
            city: address.city.clone(),
        }
    }

    /// True when the four address fields match.
    pub fn same_address(&self, other: &PropertyRecord) -> bool {
        self.zip == other.zip
            && self.street == other.street
            && self.state == other.state
            && self.city == other.city
    }
}

fn nullable<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of an upsert response. Updates answer 204 with no body; creates
/// answer 201 with the new record's id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpsertResponse {
    #[serde(default)]
    pub records: Vec<PropertyRecord>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub created: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(rename = "totalSize", default)]
    total_size: u64,
    #[serde(default)]
    records: Vec<PropertyRecord>,
}

/// Create-or-update a record by its place ID external-ID field.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PatchByExternalId: Send + Sync {
    async fn patch_by_external_id(
        &self,
        credentials: &Credentials,
        place_id: &str,
        record: &PropertyRecord,
    ) -> Result<UpsertResponse, UpsertError>;
}

/// Look up an existing record by place ID.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordQuery: Send + Sync {
    async fn find_by_place_id(
        &self,
        credentials: &Credentials,
        place_id: &str,
    ) -> Result<Option<PropertyRecord>, UpsertError>;
}

/// Quote a value as a SOQL string literal.
pub fn soql_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

pub fn place_id_query(place_id: &str) -> String {
    format!(
        "SELECT Id, Zip_Code__c, Street_Address__c, State_Code__c, \
         {PLACE_ID_FIELD}, City__c FROM {PROPERTY_OBJECT} \
         WHERE {PLACE_ID_FIELD} = {} LIMIT 1",
        soql_literal(place_id)
    )
}

pub struct CrmClient {
    http: Client,
    api_version: String,
    /// Replaces the instance URL from the token response when set.
    instance_override: Option<String>,
}

impl CrmClient {
    pub fn new(
        http: Client,
        api_version: impl Into<String>,
        instance_override: Option<String>,
    ) -> Self {
        Self {
            http,
            api_version: api_version.into(),
            instance_override,
        }
    }

    /// Build `<instance>/services/data/v<version>/<segments...>`, encoding
    /// each segment on its own.
    pub fn endpoint(
        &self,
        credentials: &Credentials,
        segments: &[&str],
    ) -> Result<Url, UpsertError> {
        let instance = self
            .instance_override
            .as_deref()
            .unwrap_or(&credentials.instance_url);
        let version = format!("v{}", self.api_version);
        let mut url = Url::parse(instance)?;
        url.path_segments_mut()
            .map_err(|_| ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(["services", "data", version.as_str()])
            .extend(segments);
        Ok(url)
    }
}

/// Decode a CRM reply, mapping non-2xx responses to
/// [`UpsertError::Status`]. An empty 2xx body decodes as `T::default()`.
pub(crate) fn decode_body<T>(
    status: StatusCode,
    body: &str,
) -> Result<T, UpsertError>
where
    T: DeserializeOwned + Default,
{
    if !status.is_success() {
        return Err(UpsertError::Status {
            status: status.as_u16(),
            body: excerpt(body),
        });
    }
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body).map_err(UpsertError::Decode)
}

/// Read the whole body, then decode it.
async fn read_json<T>(response: Response) -> Result<T, UpsertError>
where
    T: DeserializeOwned + Default,
{
    let status = response.status();
    let body = response.text().await?;
    decode_body(status, &body)
}

#[async_trait]
impl PatchByExternalId for CrmClient {
    async fn patch_by_external_id(
        &self,
        credentials: &Credentials,
        place_id: &str,
        record: &PropertyRecord,
    ) -> Result<UpsertResponse, UpsertError> {
        let url = self.endpoint(
            credentials,
            &["sobjects", PROPERTY_OBJECT, PLACE_ID_FIELD, place_id],
        )?;
        tracing::debug!(%url, "Sending upsert");

        let response = self
            .http
            .patch(url)
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(&credentials.access_token)
            .json(record)
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl RecordQuery for CrmClient {
    async fn find_by_place_id(
        &self,
        credentials: &Credentials,
        place_id: &str,
    ) -> Result<Option<PropertyRecord>, UpsertError> {
        let url = self.endpoint(credentials, &["query", ""])?;
        let soql = place_id_query(place_id);
        tracing::debug!(%url, %soql, "Querying existing record");

        let response = self
            .http
            .get(url)
            .query(&[("q", soql.as_str())])
            .header(header::ACCEPT, "application/json")
            .bearer_auth(&credentials.access_token)
            .send()
            .await?;
        let result: QueryResponse = read_json(response).await?;
        tracing::debug!(total_size = result.total_size, "Query complete");

        Ok(result.records.into_iter().next())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Written(UpsertResponse),
    /// The record already held this address; nothing was sent.
    Unchanged { record_id: Option<String> },
}

/// Write the address onto the record keyed by `place_id`.
///
/// Unless `force` is set, the existing record is read first and the upsert
/// is skipped when its address already matches.
pub async fn upsert(
    query: &dyn RecordQuery,
    patch: &dyn PatchByExternalId,
    credentials: &Credentials,
    place_id: &str,
    record: &PropertyRecord,
    force: bool,
) -> Result<UpsertOutcome, UpsertError> {
    if !force {
        let existing = query.find_by_place_id(credentials, place_id).await?;
        if let Some(existing) = existing {
            if existing.same_address(record) {
                tracing::info!(
                    place_id,
                    record_id = existing.id.as_deref().unwrap_or(""),
                    "Existing record already up to date"
                );
                return Ok(UpsertOutcome::Unchanged {
                    record_id: existing.id,
                });
            }
            tracing::info!(place_id, "Existing record differs, updating");
        } else {
            tracing::info!(place_id, "No existing record, creating");
        }
    }

    let response = patch
        .patch_by_external_id(credentials, place_id, record)
        .await?;
    Ok(UpsertOutcome::Written(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            access_token: "token".to_string(),
            instance_url: "https://na42.salesforce.com".to_string(),
            ..Default::default()
        }
    }

    fn record() -> PropertyRecord {
        PropertyRecord {
            zip: "90210".to_string(),
            street: "123 Main St".to_string(),
            state: "CA".to_string(),
            city: "Beverly Hills".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_payload_field_names() {
        let mut rec = record();
        rec.id = Some("a01".to_string());
        rec.place_id = Some("ChIJ".to_string());
        let json = serde_json::to_value(&rec).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "Zip_Code__c": "90210",
                "Street_Address__c": "123 Main St",
                "State_Code__c": "CA",
                "City__c": "Beverly Hills"
            })
        );
    }

    #[test]
    fn test_from_address() {
        let address = StructuredAddress {
            street_number: "123".to_string(),
            street: "Main St".to_string(),
            city: "Beverly Hills".to_string(),
            state: "CA".to_string(),
            zip: "90210".to_string(),
        };
        assert_eq!(PropertyRecord::from_address(&address), record());
    }

    #[test]
    fn test_query_response_nulls_become_empty() {
        let body = r#"{
            "totalSize": 1,
            "done": true,
            "records": [{
                "attributes": {"type": "Property__c"},
                "Id": "a01",
                "Zip_Code__c": "90210",
                "Street_Address__c": null,
                "State_Code__c": "CA",
                "Place_ID__c": "ChIJ",
                "City__c": null
            }]
        }"#;
        let response: QueryResponse =
            decode_body(StatusCode::OK, body).unwrap();
        let rec = &response.records[0];

        assert_eq!(response.total_size, 1);
        assert_eq!(rec.id.as_deref(), Some("a01"));
        assert_eq!(rec.place_id.as_deref(), Some("ChIJ"));
        assert_eq!(rec.street, "");
        assert_eq!(rec.city, "");
    }

    #[test]
    fn test_created_response() {
        let body = r#"{"id": "a01xx", "success": true, "created": true}"#;
        let response: UpsertResponse =
            decode_body(StatusCode::CREATED, body).unwrap();

        assert_eq!(response.id.as_deref(), Some("a01xx"));
        assert_eq!(response.created, Some(true));
        assert!(response.records.is_empty());
    }

    #[test]
    fn test_no_content_is_empty_response() {
        let response: UpsertResponse =
            decode_body(StatusCode::NO_CONTENT, "").unwrap();
        assert_eq!(response, UpsertResponse::default());
    }

    #[test]
    fn test_error_status_keeps_body() {
        let body = r#"[{"message":"bad field","errorCode":"INVALID_FIELD"}]"#;
        let err =
            decode_body::<UpsertResponse>(StatusCode::BAD_REQUEST, body)
                .unwrap_err();

        match err {
            UpsertError::Status { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("INVALID_FIELD"));
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn test_success_with_garbage_body() {
        let err = decode_body::<UpsertResponse>(StatusCode::OK, "<html>")
            .unwrap_err();
        assert!(matches!(err, UpsertError::Decode(_)));
    }

    #[test]
    fn test_soql_literal_escapes() {
        assert_eq!(soql_literal("ChIJ"), "'ChIJ'");
        assert_eq!(soql_literal("a'b\\c"), r"'a\'b\\c'");
    }

    #[test]
    fn test_place_id_query() {
        assert_eq!(
            place_id_query("ChIJ"),
            "SELECT Id, Zip_Code__c, Street_Address__c, State_Code__c, \
             Place_ID__c, City__c FROM Property__c \
             WHERE Place_ID__c = 'ChIJ' LIMIT 1"
        );
    }

    #[test]
    fn test_upsert_endpoint() {
        let client = CrmClient::new(Client::new(), "58.0", None);
        let url = client
            .endpoint(
                &creds(),
                &["sobjects", PROPERTY_OBJECT, PLACE_ID_FIELD, "ChIJ/x y"],
            )
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://na42.salesforce.com/services/data/v58.0\
             /sobjects/Property__c/Place_ID__c/ChIJ%2Fx%20y"
        );
    }

    #[test]
    fn test_instance_override() {
        let client = CrmClient::new(
            Client::new(),
            "60.0",
            Some("https://example.my.salesforce.com".to_string()),
        );
        let url = client.endpoint(&creds(), &["query", ""]).unwrap();

        assert_eq!(
            url.as_str(),
            "https://example.my.salesforce.com/services/data/v60.0/query/"
        );
    }

    #[test]
    fn test_bad_instance_url() {
        let client = CrmClient::new(Client::new(), "58.0", None);
        let bad = Credentials {
            instance_url: "not a url".to_string(),
            ..creds()
        };
        assert!(matches!(
            client.endpoint(&bad, &["query", ""]),
            Err(UpsertError::Url(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_skips_unchanged_record() {
        let mut query = MockRecordQuery::new();
        query
            .expect_find_by_place_id()
            .withf(|_, id| id == "ChIJ")
            .times(1)
            .returning(|_, _| {
                let mut existing = record();
                existing.id = Some("a01".to_string());
                Ok(Some(existing))
            });
        let patch = MockPatchByExternalId::new();

        let result =
            upsert(&query, &patch, &creds(), "ChIJ", &record(), false)
                .await
                .unwrap();
        assert_eq!(
            result,
            UpsertOutcome::Unchanged {
                record_id: Some("a01".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_upsert_patches_changed_record() {
        let mut query = MockRecordQuery::new();
        query.expect_find_by_place_id().returning(|_, _| {
            let mut existing = record();
            existing.zip = "90211".to_string();
            Ok(Some(existing))
        });
        let mut patch = MockPatchByExternalId::new();
        patch
            .expect_patch_by_external_id()
            .withf(|c, id, rec| {
                c.access_token == "token" && id == "ChIJ" && rec.zip == "90210"
            })
            .times(1)
            .returning(|_, _, _| Ok(UpsertResponse::default()));

        let result =
            upsert(&query, &patch, &creds(), "ChIJ", &record(), false)
                .await
                .unwrap();
        assert_eq!(result, UpsertOutcome::Written(UpsertResponse::default()));
    }

    #[tokio::test]
    async fn test_force_skips_lookup() {
        let query = MockRecordQuery::new();
        let mut patch = MockPatchByExternalId::new();
        patch
            .expect_patch_by_external_id()
            .times(1)
            .returning(|_, _, _| Ok(UpsertResponse::default()));

        let result =
            upsert(&query, &patch, &creds(), "ChIJ", &record(), true).await;
        assert!(matches!(result, Ok(UpsertOutcome::Written(_))));
    }

    #[tokio::test]
    async fn test_patch_error_propagates() {
        let mut query = MockRecordQuery::new();
        query.expect_find_by_place_id().returning(|_, _| Ok(None));
        let mut patch = MockPatchByExternalId::new();
        patch.expect_patch_by_external_id().returning(|_, _, _| {
            Err(UpsertError::Status {
                status: 400,
                body: "[{\"errorCode\":\"INVALID_FIELD\"}]".to_string(),
            })
        });

        let result =
            upsert(&query, &patch, &creds(), "ChIJ", &record(), false).await;
        assert!(matches!(
            result,
            Err(UpsertError::Status { status: 400, .. })
        ));
    }
}
