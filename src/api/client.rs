//! Control-plane Client
//!
//! [`RemoteClient`] is the seam between the reconciliation core and the
//! remote API. [`AssessmentClient`] implements it over REST; tests use
//! [`super::memory::MemoryClient`].

use super::auth::Credentials;
use super::http::ApiHttpClient;
use crate::assessment::model::{
    AccountRef, DesiredConfiguration, DestinationType, ReportsDestination, ResourceIdentifier,
    ResourceRecord, Role, RoleType, Scope, ServiceRef,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Errors reported by a [`RemoteClient`]
#[derive(Debug, Error)]
pub enum ClientError {
    /// The addressed resource does not exist remotely.
    #[error("resource not found")]
    NotFound,

    #[error("API request failed: {status} {message}")]
    Api { status: u16, message: String },

    #[error("failed to send request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to parse response: {0}")]
    Decode(String),

    #[error("authentication failed: {0}")]
    Auth(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Typed requests against the control plane.
///
/// Each call is a single atomic request from the caller's point of view.
/// Implementations must report remote absence as [`ClientError::NotFound`].
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get(&self, id: &ResourceIdentifier) -> Result<ResourceRecord, ClientError>;

    async fn create(&self, desired: &DesiredConfiguration)
        -> Result<ResourceIdentifier, ClientError>;

    async fn update(
        &self,
        id: &ResourceIdentifier,
        desired: &DesiredConfiguration,
    ) -> Result<ResourceRecord, ClientError>;

    async fn delete(&self, id: &ResourceIdentifier) -> Result<(), ClientError>;
}

/// REST client for the assessments API
#[derive(Clone)]
pub struct AssessmentClient {
    pub credentials: Credentials,
    pub http: ApiHttpClient,
    pub endpoint: Url,
}

impl AssessmentClient {
    pub fn new(endpoint: Url, credentials: Credentials) -> Result<Self, ClientError> {
        let http = ApiHttpClient::new()?;

        Ok(Self {
            credentials,
            http,
            endpoint,
        })
    }

    /// Build the collection URL
    pub fn assessments_url(&self) -> String {
        format!("{}/assessments", self.endpoint.as_str().trim_end_matches('/'))
    }

    /// Build the URL of a single assessment
    pub fn assessment_url(&self, id: &ResourceIdentifier) -> String {
        format!(
            "{}/{}",
            self.assessments_url(),
            urlencoding::encode(id.as_str())
        )
    }
}

#[async_trait]
impl RemoteClient for AssessmentClient {
    async fn get(&self, id: &ResourceIdentifier) -> Result<ResourceRecord, ClientError> {
        let token = self.credentials.get_token().await?;
        let response = self.http.get(&self.assessment_url(id), &token).await?;
        parse_assessment(&response)
    }

    async fn create(
        &self,
        desired: &DesiredConfiguration,
    ) -> Result<ResourceIdentifier, ClientError> {
        let token = self.credentials.get_token().await?;
        let response = self
            .http
            .post(&self.assessments_url(), &token, &create_body(desired))
            .await?;
        Ok(parse_assessment(&response)?.id)
    }

    async fn update(
        &self,
        id: &ResourceIdentifier,
        desired: &DesiredConfiguration,
    ) -> Result<ResourceRecord, ClientError> {
        let token = self.credentials.get_token().await?;
        let response = self
            .http
            .put(&self.assessment_url(id), &token, &update_body(desired))
            .await?;
        parse_assessment(&response)
    }

    async fn delete(&self, id: &ResourceIdentifier) -> Result<(), ClientError> {
        let token = self.credentials.get_token().await?;
        self.http.delete(&self.assessment_url(id), &token).await?;
        Ok(())
    }
}

// =============================================================================
// Wire format
// =============================================================================

pub(crate) fn roles_json(roles: &[Role]) -> Value {
    Value::Array(
        roles
            .iter()
            .map(|r| json!({ "roleArn": r.role_arn, "roleType": r.role_type.as_str() }))
            .collect(),
    )
}

pub(crate) fn scope_json(scope: &Scope) -> Value {
    json!({
        "awsAccounts": scope.aws_accounts.iter().map(|a| json!({ "id": a.id })).collect::<Vec<_>>(),
        "awsServices": scope
            .aws_services
            .iter()
            .map(|s| json!({ "serviceName": s.service_name }))
            .collect::<Vec<_>>(),
    })
}

pub(crate) fn destination_json(destination: &ReportsDestination) -> Value {
    json!({
        "destination": destination.destination,
        "destinationType": destination.destination_type.as_str(),
    })
}

/// Request body for POST /assessments
pub fn create_body(desired: &DesiredConfiguration) -> Value {
    let mut body = update_body(desired);
    if let Value::Object(ref mut map) = body {
        map.insert("frameworkId".to_string(), json!(desired.framework_id));
    }
    body
}

/// Request body for PUT /assessments/{id}.
///
/// Carries every attribute that can change in place. The control plane keeps
/// the current value of any field left out, so a missing description is sent
/// as `""` and the full tag map is always sent.
pub fn update_body(desired: &DesiredConfiguration) -> Value {
    json!({
        "assessmentName": desired.name,
        "assessmentDescription": desired.description.as_deref().unwrap_or_default(),
        "assessmentReportsDestination": destination_json(&desired.assessment_reports_destination),
        "roles": roles_json(&desired.roles),
        "scope": scope_json(&desired.scope),
        "tags": desired.tags,
    })
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

fn required_str(value: &Value, key: &str) -> Result<String, ClientError> {
    str_field(value, key)
        .map(|s| s.to_string())
        .ok_or_else(|| ClientError::Decode(format!("missing field {key}")))
}

fn parse_time(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    match value.get(key)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        // Epoch seconds, possibly fractional
        Value::Number(n) => n
            .as_f64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp_millis((secs * 1000.0) as i64)),
        _ => None,
    }
}

fn parse_roles(value: Option<&Value>) -> Result<Vec<Role>, ClientError> {
    let Some(items) = value.and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };

    items
        .iter()
        .map(|item| {
            let role_type = str_field(item, "roleType").unwrap_or_default();
            Ok(Role {
                role_arn: required_str(item, "roleArn")?,
                role_type: role_type
                    .parse::<RoleType>()
                    .map_err(|e| ClientError::Decode(e.to_string()))?,
            })
        })
        .collect()
}

fn parse_scope(value: Option<&Value>) -> Scope {
    let Some(scope) = value else {
        return Scope::default();
    };

    let aws_accounts = scope
        .get("awsAccounts")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|a| str_field(a, "id"))
                .map(|id| AccountRef { id: id.to_string() })
                .collect()
        })
        .unwrap_or_default();

    let aws_services = scope
        .get("awsServices")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|s| str_field(s, "serviceName"))
                .map(|name| ServiceRef {
                    service_name: name.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    Scope {
        aws_accounts,
        aws_services,
    }
}

/// Parse an `{"assessment": {...}}` response into a record
pub fn parse_assessment(response: &Value) -> Result<ResourceRecord, ClientError> {
    let assessment = response
        .get("assessment")
        .ok_or_else(|| ClientError::Decode("missing assessment".to_string()))?;
    let metadata = assessment
        .get("metadata")
        .ok_or_else(|| ClientError::Decode("missing assessment metadata".to_string()))?;

    let id = ResourceIdentifier::parse(&required_str(metadata, "id")?)
        .map_err(|e| ClientError::Decode(e.to_string()))?;

    let framework_id = assessment
        .get("framework")
        .and_then(|f| str_field(f, "id"))
        .map(|s| s.to_string())
        .ok_or_else(|| ClientError::Decode("missing framework id".to_string()))?;

    let destination = metadata
        .get("assessmentReportsDestination")
        .ok_or_else(|| ClientError::Decode("missing assessmentReportsDestination".to_string()))?;
    let destination_type = str_field(destination, "destinationType").unwrap_or_default();

    let tags: BTreeMap<String, String> = assessment
        .get("tags")
        .and_then(|t| t.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(ResourceRecord {
        id,
        arn: str_field(assessment, "arn").map(|s| s.to_string()),
        name: required_str(metadata, "name")?,
        description: str_field(metadata, "description").map(|s| s.to_string()),
        framework_id,
        roles: parse_roles(metadata.get("roles"))?,
        scope: parse_scope(metadata.get("scope")),
        assessment_reports_destination: ReportsDestination {
            destination: required_str(destination, "destination")?,
            destination_type: destination_type
                .parse::<DestinationType>()
                .map_err(|e| ClientError::Decode(e.to_string()))?,
        },
        tags,
        status: str_field(metadata, "status").map(|s| s.to_string()),
        creation_time: parse_time(metadata, "creationTime"),
        last_updated: parse_time(metadata, "lastUpdated"),
    })
}
