//! In-memory Control Plane
//!
//! A [`RemoteClient`] that keeps assessments in a map. It records every call
//! it receives, can hide freshly created records for a number of reads to
//! mimic eventual consistency, can drop records out-of-band, and can be told
//! to fail the next call.

use super::client::{
    destination_json, parse_assessment, roles_json, scope_json, update_body, ClientError,
    RemoteClient,
};
use crate::assessment::model::{DesiredConfiguration, ResourceIdentifier, ResourceRecord};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Kind of request received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Get,
    Create,
    Update,
    Delete,
}

/// One request as seen by the in-memory control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub kind: CallKind,
    /// Identifier the call addressed; `None` for create
    pub id: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, ResourceRecord>,
    /// Remaining reads for which a new record stays invisible
    hidden_reads: HashMap<String, u32>,
    settle_reads: u32,
    failures: VecDeque<ClientError>,
    calls: Vec<RecordedCall>,
}

#[derive(Default)]
pub struct MemoryClient {
    state: Mutex<MemoryState>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide every record created from now on for the first `reads` gets
    pub fn with_settle_reads(reads: u32) -> Self {
        let client = Self::default();
        client.lock().settle_reads = reads;
        client
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not poison the fake for others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a record that exists before any create, as for import
    pub fn insert(&self, record: ResourceRecord) {
        self.lock()
            .records
            .insert(record.id.as_str().to_string(), record);
    }

    /// Delete a record behind the reconciler's back
    pub fn remove(&self, id: &ResourceIdentifier) -> Option<ResourceRecord> {
        let mut state = self.lock();
        state.hidden_reads.remove(id.as_str());
        state.records.remove(id.as_str())
    }

    /// Fail the next call with `error`
    pub fn fail_next(&self, error: ClientError) {
        self.lock().failures.push_back(error);
    }

    pub fn contains(&self, id: &ResourceIdentifier) -> bool {
        self.lock().records.contains_key(id.as_str())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, kind: CallKind) -> usize {
        self.lock().calls.iter().filter(|c| c.kind == kind).count()
    }

    fn begin(
        &self,
        kind: CallKind,
        id: Option<&ResourceIdentifier>,
    ) -> Result<MutexGuard<'_, MemoryState>, ClientError> {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            kind,
            id: id.map(|i| i.as_str().to_string()),
        });
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl RemoteClient for MemoryClient {
    async fn get(&self, id: &ResourceIdentifier) -> Result<ResourceRecord, ClientError> {
        let mut state = self.begin(CallKind::Get, Some(id))?;

        if let Some(remaining) = state.hidden_reads.get_mut(id.as_str()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClientError::NotFound);
            }
        }
        state.hidden_reads.remove(id.as_str());

        state
            .records
            .get(id.as_str())
            .cloned()
            .ok_or(ClientError::NotFound)
    }

    async fn create(
        &self,
        desired: &DesiredConfiguration,
    ) -> Result<ResourceIdentifier, ClientError> {
        let mut state = self.begin(CallKind::Create, None)?;

        let id = ResourceIdentifier::parse(&Uuid::new_v4().to_string())
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        let now = Utc::now();
        let mut record = ResourceRecord::from_desired(id.clone(), desired);
        record.status = Some("ACTIVE".to_string());
        record.creation_time = Some(now);
        record.last_updated = Some(now);

        if state.settle_reads > 0 {
            let reads = state.settle_reads;
            state.hidden_reads.insert(id.as_str().to_string(), reads);
        }
        state.records.insert(id.as_str().to_string(), record);

        Ok(id)
    }

    async fn update(
        &self,
        id: &ResourceIdentifier,
        desired: &DesiredConfiguration,
    ) -> Result<ResourceRecord, ClientError> {
        let mut state = self.begin(CallKind::Update, Some(id))?;

        let Some(existing) = state.records.get(id.as_str()).cloned() else {
            return Err(ClientError::NotFound);
        };

        let mut updated = apply_update(&existing, &update_body(desired))?;
        updated.last_updated = Some(Utc::now());
        state
            .records
            .insert(id.as_str().to_string(), updated.clone());

        Ok(updated)
    }

    async fn delete(&self, id: &ResourceIdentifier) -> Result<(), ClientError> {
        let mut state = self.begin(CallKind::Delete, Some(id))?;
        state.hidden_reads.remove(id.as_str());
        state
            .records
            .remove(id.as_str())
            .map(|_| ())
            .ok_or(ClientError::NotFound)
    }
}

/// Apply a PUT body to a stored record the way the control plane does:
/// fields absent from the body keep their value, `framework_id` never changes
/// and an empty description reads back as none.
fn apply_update(existing: &ResourceRecord, body: &Value) -> Result<ResourceRecord, ClientError> {
    let field = |key: &str, current: Value| body.get(key).cloned().unwrap_or(current);

    let response = json!({
        "assessment": {
            "arn": existing.arn,
            "framework": { "id": existing.framework_id },
            "tags": field("tags", json!(existing.tags)),
            "metadata": {
                "id": existing.id.as_str(),
                "name": field("assessmentName", json!(existing.name)),
                "description": field("assessmentDescription", json!(existing.description)),
                "roles": field("roles", roles_json(&existing.roles)),
                "scope": field("scope", scope_json(&existing.scope)),
                "assessmentReportsDestination": field(
                    "assessmentReportsDestination",
                    destination_json(&existing.assessment_reports_destination),
                ),
            }
        }
    });

    let mut updated = parse_assessment(&response)?;
    if updated.description.as_deref() == Some("") {
        updated.description = None;
    }
    updated.status = existing.status.clone();
    updated.creation_time = existing.creation_time;
    updated.last_updated = existing.last_updated;

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::model::{DestinationType, ReportsDestination, Scope};
    use std::collections::BTreeMap;

    fn desired(name: &str) -> DesiredConfiguration {
        DesiredConfiguration {
            name: name.to_string(),
            description: None,
            framework_id: "framework-1".to_string(),
            roles: Vec::new(),
            scope: Scope::default(),
            assessment_reports_destination: ReportsDestination {
                destination: "s3://bucket".to_string(),
                destination_type: DestinationType::S3,
            },
            tags: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let client = MemoryClient::new();
        let id = client.create(&desired("a")).await.unwrap();
        let record = client.get(&id).await.unwrap();
        assert_eq!(record.name, "a");
        assert_eq!(record.status.as_deref(), Some("ACTIVE"));
        assert_eq!(client.call_count(CallKind::Create), 1);
        assert_eq!(client.call_count(CallKind::Get), 1);
    }

    #[tokio::test]
    async fn test_settle_reads_hide_new_records() {
        let client = MemoryClient::with_settle_reads(2);
        let id = client.create(&desired("a")).await.unwrap();
        assert!(matches!(client.get(&id).await, Err(ClientError::NotFound)));
        assert!(matches!(client.get(&id).await, Err(ClientError::NotFound)));
        assert!(client.get(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let client = MemoryClient::new();
        let id = client.create(&desired("a")).await.unwrap();
        client.fail_next(ClientError::Api {
            status: 500,
            message: "boom".to_string(),
        });
        assert!(matches!(
            client.get(&id).await,
            Err(ClientError::Api { status: 500, .. })
        ));
        assert!(client.get(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_keeps_framework() {
        let client = MemoryClient::new();
        let id = client.create(&desired("a")).await.unwrap();
        let mut changed = desired("b");
        changed.framework_id = "framework-2".to_string();
        let record = client.update(&id, &changed).await.unwrap();
        assert_eq!(record.name, "b");
        assert_eq!(record.framework_id, "framework-1");
    }

    #[tokio::test]
    async fn test_update_replaces_tags_and_clears_description() {
        let client = MemoryClient::new();
        let mut original = desired("a");
        original.description = Some("first".to_string());
        original.tags.insert("env".to_string(), "test".to_string());
        let id = client.create(&original).await.unwrap();

        let mut changed = desired("a");
        changed.tags.insert("team".to_string(), "audit".to_string());
        let record = client.update(&id, &changed).await.unwrap();

        assert_eq!(record.description, None);
        assert_eq!(
            record.tags,
            BTreeMap::from([("team".to_string(), "audit".to_string())])
        );
        assert_eq!(record.status.as_deref(), Some("ACTIVE"));
        assert_eq!(client.get(&id).await.unwrap(), record);
    }

    #[test]
    fn test_fields_missing_from_body_are_kept() {
        let mut existing =
            ResourceRecord::from_desired(ResourceIdentifier::parse("abc").unwrap(), &desired("a"));
        existing.tags.insert("env".to_string(), "test".to_string());

        let updated = apply_update(&existing, &json!({ "assessmentName": "b" })).unwrap();
        assert_eq!(updated.name, "b");
        assert_eq!(updated.tags, existing.tags);
        assert_eq!(updated.roles, existing.roles);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let client = MemoryClient::new();
        let id = ResourceIdentifier::parse("missing").unwrap();
        assert!(matches!(client.delete(&id).await, Err(ClientError::NotFound)));
    }
}
