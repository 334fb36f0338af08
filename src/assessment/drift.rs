//! Drift detection
//!
//! Compares what the control plane reports with what the configuration asks
//! for. Roles, accounts and services are unordered: the control plane does
//! not preserve the order they were submitted in.

use super::model::{DesiredConfiguration, ResourceRecord};
use std::collections::BTreeSet;
use std::fmt;

/// A configurable attribute of an assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Attribute {
    Name,
    Description,
    FrameworkId,
    Roles,
    Scope,
    ReportsDestination,
    Tags,
}

impl Attribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::FrameworkId => "framework_id",
            Self::Roles => "roles",
            Self::Scope => "scope",
            Self::ReportsDestination => "assessment_reports_destination",
            Self::Tags => "tags",
        }
    }

    /// Changing this attribute needs a new resource
    pub fn requires_replace(&self) -> bool {
        matches!(self, Self::FrameworkId)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn same_set<T: Ord>(a: &[T], b: &[T]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

/// Attributes whose remote value differs from the desired one
pub fn diff(record: &ResourceRecord, desired: &DesiredConfiguration) -> Vec<Attribute> {
    let mut changes = Vec::new();

    if record.name != desired.name {
        changes.push(Attribute::Name);
    }
    // An empty description and no description are the same to the control plane
    let remote_description = record.description.as_deref().unwrap_or_default();
    let desired_description = desired.description.as_deref().unwrap_or_default();
    if remote_description != desired_description {
        changes.push(Attribute::Description);
    }
    if record.framework_id != desired.framework_id {
        changes.push(Attribute::FrameworkId);
    }
    if !same_set(&record.roles, &desired.roles) {
        changes.push(Attribute::Roles);
    }
    if !same_set(&record.scope.aws_accounts, &desired.scope.aws_accounts)
        || !same_set(&record.scope.aws_services, &desired.scope.aws_services)
    {
        changes.push(Attribute::Scope);
    }
    if record.assessment_reports_destination != desired.assessment_reports_destination {
        changes.push(Attribute::ReportsDestination);
    }
    if record.tags != desired.tags {
        changes.push(Attribute::Tags);
    }

    changes
}
