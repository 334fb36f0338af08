//! Tracked State
//!
//! Maps resource addresses to the instances the reconciler manages and
//! persists them as pretty-printed JSON.

use crate::api::client::RemoteClient;
use crate::assessment::model::ResourceIdentifier;
use crate::assessment::reconciler::ResourceInstance;
use crate::assessment::verify::verify_destroyed;
use crate::context::CallContext;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const STATE_VERSION: u32 = 1;

fn default_version() -> u32 {
    STATE_VERSION
}

/// All tracked instances, keyed by address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceInstance>,
    /// Assessments deleted through this state, kept for destroy checks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destroyed: Vec<ResourceIdentifier>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            resources: BTreeMap::new(),
            destroyed: Vec::new(),
        }
    }
}

impl StateFile {
    /// Default state file location in the working directory
    pub fn default_path() -> PathBuf {
        PathBuf::from("assessctl.state.json")
    }

    /// Load state from `path`. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        let state: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file {}", path.display()))?;

        if state.version != STATE_VERSION {
            anyhow::bail!(
                "Unsupported state file version {} in {}",
                state.version,
                path.display()
            );
        }

        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write state file {}", path.display()))?;

        Ok(())
    }

    pub fn get(&self, address: &str) -> Option<&ResourceInstance> {
        self.resources.get(address)
    }

    /// Instance at `address`, or a fresh absent one
    pub fn instance(&self, address: &str) -> ResourceInstance {
        self.resources
            .get(address)
            .cloned()
            .unwrap_or_else(|| ResourceInstance::new(address))
    }

    /// Store `instance`, dropping it when it is absent
    pub fn put(&mut self, instance: ResourceInstance) {
        if instance.is_present() {
            if let Some(id) = &instance.id {
                self.destroyed.retain(|d| d != id);
            }
            self.resources.insert(instance.address.clone(), instance);
        } else {
            self.resources.remove(&instance.address);
        }
    }

    /// Remember that `id` was deleted
    pub fn record_destroyed(&mut self, id: ResourceIdentifier) {
        if !self.destroyed.contains(&id) {
            self.destroyed.push(id);
        }
    }

    /// Identifiers of every tracked assessment, skipping other resource types
    pub fn assessment_ids(&self) -> Vec<ResourceIdentifier> {
        self.resources
            .values()
            .filter(|i| i.is_assessment())
            .filter_map(|i| i.id.clone())
            .collect()
    }
}

/// Confirm that no assessment tracked in `state`, and none recorded as
/// destroyed, still exists remotely
pub async fn verify_state_destroyed<C>(
    client: &C,
    ctx: &CallContext,
    state: &StateFile,
) -> crate::error::Result<()>
where
    C: RemoteClient + ?Sized,
{
    let mut ids = state.assessment_ids();
    for id in &state.destroyed {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    verify_destroyed(client, ctx, &ids).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::{CallKind, MemoryClient};
    use crate::assessment::model::{
        DesiredConfiguration, DestinationType, LocatorScheme, ReportsDestination, Scope,
    };
    use crate::assessment::reconciler::{Phase, Reconciler};
    use crate::error::Error;
    use std::sync::Arc;

    fn desired(name: &str) -> DesiredConfiguration {
        DesiredConfiguration {
            name: name.to_string(),
            description: Some("tracked".to_string()),
            framework_id: "framework-1".to_string(),
            roles: Vec::new(),
            scope: Scope::default(),
            assessment_reports_destination: ReportsDestination {
                destination: "s3://bucket/reports".to_string(),
                destination_type: DestinationType::S3,
            },
            tags: Default::default(),
        }
    }

    fn foreign(address: &str, id: &str) -> ResourceInstance {
        let mut instance = ResourceInstance::new(address);
        instance.phase = Phase::Present;
        instance.id = Some(ResourceIdentifier::parse(id).unwrap());
        instance
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(state, StateFile::default());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(StateFile::load(&path).is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_preserves_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let reconciler = Reconciler::new(Arc::new(MemoryClient::new()), LocatorScheme::default());
        let mut instance = ResourceInstance::new(&ResourceInstance::address_for("saved"));
        reconciler
            .create(&CallContext::background(), &mut instance, &desired("saved"))
            .await
            .unwrap();

        let mut state = StateFile::default();
        state.put(instance.clone());
        state.save(&path).unwrap();

        let loaded = StateFile::load(&path).unwrap();
        assert_eq!(loaded.get(&instance.address), Some(&instance));
    }

    #[test]
    fn test_put_absent_instance_removes_it() {
        let mut state = StateFile::default();
        let mut instance = foreign("auditmanager_assessment.a", "a1");
        state.put(instance.clone());
        assert!(state.get("auditmanager_assessment.a").is_some());

        instance.id = None;
        instance.phase = Phase::Absent;
        state.put(instance);
        assert!(state.get("auditmanager_assessment.a").is_none());
    }

    #[tokio::test]
    async fn test_verify_state_destroyed_skips_other_types() {
        let client = MemoryClient::new();
        let mut state = StateFile::default();
        state.put(foreign("s3_bucket.logs", "bucket-1"));
        state.put(foreign("auditmanager_assessment.gone", "gone-1"));

        verify_state_destroyed(&client, &CallContext::background(), &state)
            .await
            .unwrap();
        assert_eq!(client.call_count(CallKind::Get), 1);
    }

    #[tokio::test]
    async fn test_verify_state_destroyed_names_survivors() {
        let client = Arc::new(MemoryClient::new());
        let reconciler = Reconciler::new(Arc::clone(&client), LocatorScheme::default());
        let ctx = CallContext::background();

        let mut state = StateFile::default();
        let mut kept = ResourceInstance::new(&ResourceInstance::address_for("kept"));
        reconciler.create(&ctx, &mut kept, &desired("kept")).await.unwrap();
        let kept_id = kept.id.clone().unwrap();
        state.put(kept);

        let err = verify_state_destroyed(client.as_ref(), &ctx, &state)
            .await
            .unwrap_err();
        match err {
            Error::Verification { subjects, .. } => {
                assert_eq!(subjects, vec![kept_id.to_string()]);
            }
            other => panic!("expected verification error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_destroyed_ids_are_checked_after_destroy() {
        let client = Arc::new(MemoryClient::new());
        let reconciler = Reconciler::new(Arc::clone(&client), LocatorScheme::default());
        let ctx = CallContext::background();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = StateFile::default();
        let mut instance = ResourceInstance::new(&ResourceInstance::address_for("a"));
        reconciler.create(&ctx, &mut instance, &desired("a")).await.unwrap();
        let id = instance.id.clone().unwrap();
        state.put(instance.clone());

        reconciler.delete(&ctx, &mut instance).await.unwrap();
        state.put(instance);
        state.record_destroyed(id.clone());
        state.save(&path).unwrap();

        let state = StateFile::load(&path).unwrap();
        assert!(state.resources.is_empty());
        assert_eq!(state.destroyed, vec![id]);

        let before = client.call_count(CallKind::Get);
        verify_state_destroyed(client.as_ref(), &ctx, &state)
            .await
            .unwrap();
        assert_eq!(client.call_count(CallKind::Get), before + 1);
    }

    #[tokio::test]
    async fn test_destroyed_id_that_still_exists_fails() {
        let client = Arc::new(MemoryClient::new());
        let reconciler = Reconciler::new(Arc::clone(&client), LocatorScheme::default());
        let ctx = CallContext::background();

        let mut instance = ResourceInstance::new(&ResourceInstance::address_for("a"));
        reconciler.create(&ctx, &mut instance, &desired("a")).await.unwrap();
        let id = instance.id.clone().unwrap();

        let mut state = StateFile::default();
        state.record_destroyed(id.clone());
        state.record_destroyed(id.clone());
        assert_eq!(state.destroyed.len(), 1);

        let err = verify_state_destroyed(client.as_ref(), &ctx, &state)
            .await
            .unwrap_err();
        match err {
            Error::Verification { subjects, .. } => {
                assert_eq!(subjects, vec![id.to_string()]);
            }
            other => panic!("expected verification error, got {other:?}"),
        }
    }

    #[test]
    fn test_tracking_an_id_again_clears_destroyed() {
        let mut state = StateFile::default();
        let instance = foreign("auditmanager_assessment.a", "a1");
        state.record_destroyed(instance.id.clone().unwrap());

        state.put(instance);
        assert!(state.destroyed.is_empty());
    }
}
