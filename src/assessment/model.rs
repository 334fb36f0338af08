//! Assessment data model
//!
//! [`DesiredConfiguration`] is the declarative intent read from a
//! configuration file; [`ResourceRecord`] is what the control plane reports
//! back. Both use the same attribute names so a record can be compared
//! field-by-field against the configuration that produced it.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Maximum identifier length accepted before a request is issued
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Maximum assessment name length
const MAX_NAME_LENGTH: usize = 300;

/// Maximum assessment description length
const MAX_DESCRIPTION_LENGTH: usize = 1000;

/// Maximum number of tags on one assessment
const MAX_TAGS: usize = 50;

/// Opaque identifier assigned by the control plane at creation time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceIdentifier(String);

impl ResourceIdentifier {
    /// Validate a raw identifier.
    /// Identifiers are 1-128 characters of ASCII letters, digits, `-`, `_`
    /// and `.`, and never `.` or `..` on their own.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(Error::Validation("identifier is empty".to_string()));
        }
        if raw.len() > MAX_IDENTIFIER_LENGTH {
            return Err(Error::Validation(format!(
                "identifier is longer than {MAX_IDENTIFIER_LENGTH} characters"
            )));
        }
        if raw == "." || raw == ".." {
            return Err(Error::Validation(format!("identifier {raw:?} is reserved")));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(Error::Validation(format!(
                "identifier {raw:?} contains invalid character {bad:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceIdentifier {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ResourceIdentifier> for String {
    fn from(id: ResourceIdentifier) -> Self {
        id.0
    }
}

/// Responsibility a role binding carries within an assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleType {
    ProcessOwner,
    ResourceOwner,
}

impl RoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessOwner => "PROCESS_OWNER",
            Self::ResourceOwner => "RESOURCE_OWNER",
        }
    }
}

impl FromStr for RoleType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PROCESS_OWNER" => Ok(Self::ProcessOwner),
            "RESOURCE_OWNER" => Ok(Self::ResourceOwner),
            _ => Err(Error::Validation(format!("unknown role type {s:?}"))),
        }
    }
}

/// Role binding: an IAM role reference plus its type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Role {
    pub role_arn: String,
    pub role_type: RoleType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceRef {
    pub service_name: String,
}

/// Accounts and services an assessment collects evidence from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub aws_accounts: Vec<AccountRef>,
    #[serde(default)]
    pub aws_services: Vec<ServiceRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationType {
    S3,
}

impl DestinationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "S3",
        }
    }
}

impl FromStr for DestinationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "S3" => Ok(Self::S3),
            _ => Err(Error::Validation(format!("unknown destination type {s:?}"))),
        }
    }
}

/// Where assessment reports are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportsDestination {
    pub destination: String,
    pub destination_type: DestinationType,
}

/// Declarative intent for one assessment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredConfiguration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub framework_id: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub scope: Scope,
    pub assessment_reports_destination: ReportsDestination,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl DesiredConfiguration {
    /// Check the configuration before anything is sent to the control plane
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".to_string()));
        }
        if self.name.chars().count() > MAX_NAME_LENGTH {
            return Err(Error::Validation(format!(
                "name must be at most {MAX_NAME_LENGTH} characters"
            )));
        }
        if let Some(description) = &self.description {
            if description.chars().count() > MAX_DESCRIPTION_LENGTH {
                return Err(Error::Validation(format!(
                    "description must be at most {MAX_DESCRIPTION_LENGTH} characters"
                )));
            }
        }
        if self.framework_id.trim().is_empty() {
            return Err(Error::Validation("framework_id must not be empty".to_string()));
        }

        let destination = &self.assessment_reports_destination;
        if destination.destination.trim().is_empty() {
            return Err(Error::Validation(
                "assessment_reports_destination.destination must not be empty".to_string(),
            ));
        }
        if destination.destination_type == DestinationType::S3
            && !destination.destination.starts_with("s3://")
        {
            return Err(Error::Validation(format!(
                "S3 report destination must start with s3://, got {:?}",
                destination.destination
            )));
        }

        if let Some(role) = self.roles.iter().find(|r| r.role_arn.trim().is_empty()) {
            return Err(Error::Validation(format!(
                "{} role is missing role_arn",
                role.role_type.as_str()
            )));
        }
        if self.scope.aws_accounts.iter().any(|a| a.id.trim().is_empty()) {
            return Err(Error::Validation("scope account id must not be empty".to_string()));
        }
        if self
            .scope
            .aws_services
            .iter()
            .any(|s| s.service_name.trim().is_empty())
        {
            return Err(Error::Validation(
                "scope service_name must not be empty".to_string(),
            ));
        }

        if self.tags.len() > MAX_TAGS {
            return Err(Error::Validation(format!("at most {MAX_TAGS} tags are allowed")));
        }
        if self.tags.keys().any(|k| k.trim().is_empty()) {
            return Err(Error::Validation("tag keys must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Materialized remote representation of an assessment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub framework_id: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub scope: Scope,
    pub assessment_reports_destination: ReportsDestination,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ResourceRecord {
    /// Record as the control plane would report it right after creation
    pub fn from_desired(id: ResourceIdentifier, desired: &DesiredConfiguration) -> Self {
        Self {
            id,
            arn: None,
            name: desired.name.clone(),
            description: desired.description.clone(),
            framework_id: desired.framework_id.clone(),
            roles: desired.roles.clone(),
            scope: desired.scope.clone(),
            assessment_reports_destination: desired.assessment_reports_destination.clone(),
            tags: desired.tags.clone(),
            status: None,
            creation_time: None,
            last_updated: None,
        }
    }

    /// Project the configurable attributes back out of the record
    pub fn desired(&self) -> DesiredConfiguration {
        DesiredConfiguration {
            name: self.name.clone(),
            description: self.description.clone(),
            framework_id: self.framework_id.clone(),
            roles: self.roles.clone(),
            scope: self.scope.clone(),
            assessment_reports_destination: self.assessment_reports_destination.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Builds the globally unique locator for an assessment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorScheme {
    pub partition: String,
    pub region: String,
    pub account_id: String,
}

impl LocatorScheme {
    pub fn locator(&self, id: &ResourceIdentifier) -> String {
        format!(
            "arn:{}:auditmanager:{}:{}:assessment/{}",
            self.partition, self.region, self.account_id, id
        )
    }
}

impl Default for LocatorScheme {
    fn default() -> Self {
        Self {
            partition: "aws".to_string(),
            region: "us-east-1".to_string(),
            account_id: "000000000000".to_string(),
        }
    }
}
