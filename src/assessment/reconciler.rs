//! Reconciler
//!
//! Drives Create, Read, Update and Delete against a [`RemoteClient`] and
//! keeps each tracked [`ResourceInstance`] in step with what the control
//! plane reports.
//!
//! Per instance the lifecycle is
//! `Absent -> Creating -> Present -> (Updating -> Present)* -> Deleting -> Absent`.
//! A Read that finds the resource gone moves the instance straight to
//! `Absent`, so the next plan recreates it instead of failing.
//!
//! The reconciler holds no per-instance state and takes no locks. Callers
//! own their instances and serialize operations on each of them; unrelated
//! instances can be reconciled concurrently through one shared reconciler.

use super::drift::{self, Attribute};
use super::lookup::lookup;
use super::verify::{verify_exists_eventually, Backoff};
use super::model::{DesiredConfiguration, LocatorScheme, ResourceIdentifier, ResourceRecord};
use crate::api::client::RemoteClient;
use crate::context::CallContext;
use crate::error::{Error, Operation, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Type name of the managed resource in tracked state
pub const RESOURCE_TYPE: &str = "auditmanager_assessment";

/// Lifecycle phase of one tracked instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Absent,
    Creating,
    Present,
    Updating,
    Deleting,
}

/// One tracked resource instance and its last known remote snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInstance {
    /// Address in tracked state, e.g. `auditmanager_assessment.test`
    pub address: String,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ResourceIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<ResourceRecord>,
}

impl ResourceInstance {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            phase: Phase::Absent,
            id: None,
            locator: None,
            attributes: None,
        }
    }

    /// Address for a resource of this type named `name`
    pub fn address_for(name: &str) -> String {
        format!("{RESOURCE_TYPE}.{name}")
    }

    /// Whether this instance belongs to the assessment resource type
    pub fn is_assessment(&self) -> bool {
        self.address
            .split_once('.')
            .map(|(kind, _)| kind == RESOURCE_TYPE)
            .unwrap_or(false)
    }

    pub fn is_present(&self) -> bool {
        self.id.is_some()
    }

    fn mark_present(&mut self, record: ResourceRecord) {
        self.phase = Phase::Present;
        self.id = Some(record.id.clone());
        self.locator = record.arn.clone();
        self.attributes = Some(record);
    }

    fn mark_absent(&mut self) {
        self.phase = Phase::Absent;
        self.id = None;
        self.locator = None;
        self.attributes = None;
    }
}

/// What reconciling an instance against its configuration requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    NoOp,
    Create,
    Update(Vec<Attribute>),
    Replace(Vec<Attribute>),
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

/// Move an error onto another operation, keeping its kind and identifier
fn reattribute(error: Error, operation: Operation) -> Error {
    match error {
        Error::NotFound { id, .. } => Error::NotFound { operation, id },
        Error::Transport { id, source, .. } => Error::Transport {
            operation,
            id,
            source,
        },
        Error::Cancelled { id, .. } => Error::Cancelled { operation, id },
        other => other,
    }
}

/// CRUD driver for assessments
pub struct Reconciler<C: ?Sized> {
    client: Arc<C>,
    locator: LocatorScheme,
}

impl<C: ?Sized> Clone for Reconciler<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            locator: self.locator.clone(),
        }
    }
}

impl<C: RemoteClient + ?Sized> Reconciler<C> {
    pub fn new(client: Arc<C>, locator: LocatorScheme) -> Self {
        Self { client, locator }
    }

    /// Fill in the locator when the control plane did not report one
    fn hydrate(&self, mut record: ResourceRecord) -> ResourceRecord {
        if record.arn.is_none() {
            record.arn = Some(self.locator.locator(&record.id));
        }
        record
    }

    /// Create the remote resource for an absent instance.
    ///
    /// The tracked attributes are built from `desired`, so server-assigned
    /// fields such as status and timestamps stay empty until [`confirm`] or
    /// the next Read.
    ///
    /// [`confirm`]: Reconciler::confirm
    pub async fn create(
        &self,
        ctx: &CallContext,
        instance: &mut ResourceInstance,
        desired: &DesiredConfiguration,
    ) -> Result<ResourceIdentifier> {
        if let Some(id) = &instance.id {
            return Err(Error::Validation(format!(
                "{} is already tracked as {}",
                instance.address, id
            )));
        }
        desired.validate()?;

        instance.phase = Phase::Creating;
        let created = ctx
            .run(Operation::Create, &instance.address, self.client.create(desired))
            .await;

        let id = match created {
            Ok(id) => id,
            Err(e) => {
                instance.phase = Phase::Absent;
                return Err(e);
            }
        };

        let record = self.hydrate(ResourceRecord::from_desired(id.clone(), desired));
        instance.mark_present(record);
        tracing::info!("{}: created {}", instance.address, id);

        Ok(id)
    }

    /// Wait until a freshly created instance is visible and record what the
    /// control plane reports for it.
    pub async fn confirm(
        &self,
        ctx: &CallContext,
        instance: &mut ResourceInstance,
        backoff: &Backoff,
    ) -> Result<ResourceRecord> {
        let Some(id) = instance.id.clone() else {
            return Err(Error::Validation(format!(
                "{} has no identifier to confirm",
                instance.address
            )));
        };

        let record = verify_exists_eventually(
            self.client.as_ref(),
            ctx,
            &instance.address,
            id.as_str(),
            backoff,
        )
        .await?;
        let record = self.hydrate(record);
        instance.mark_present(record.clone());

        Ok(record)
    }

    /// Refresh an instance from the control plane.
    ///
    /// Returns `None` when the instance is absent. A resource deleted
    /// out-of-band is not an error: the instance is moved to `Absent` and
    /// dropped from tracked state.
    pub async fn read(
        &self,
        ctx: &CallContext,
        instance: &mut ResourceInstance,
    ) -> Result<Option<ResourceRecord>> {
        let Some(id) = instance.id.clone() else {
            return Ok(None);
        };

        match lookup(self.client.as_ref(), ctx, &id).await {
            Ok(record) => {
                let record = self.hydrate(record);
                instance.mark_present(record.clone());
                Ok(Some(record))
            }
            Err(Error::NotFound { .. }) => {
                tracing::warn!(
                    "{}: {} not found, removing from state",
                    instance.address,
                    id
                );
                instance.mark_absent();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Update a present instance in place.
    ///
    /// Updating a resource that no longer exists fails with
    /// [`Error::NotFound`]; it is not retried or recreated here.
    pub async fn update(
        &self,
        ctx: &CallContext,
        instance: &mut ResourceInstance,
        desired: &DesiredConfiguration,
    ) -> Result<ResourceRecord> {
        let Some(id) = instance.id.clone() else {
            return Err(Error::Validation(format!(
                "{} has no identifier; create it before updating",
                instance.address
            )));
        };
        desired.validate()?;

        if let Some(current) = &instance.attributes {
            if current.framework_id != desired.framework_id {
                return Err(Error::Validation(format!(
                    "{}: framework_id cannot change in place ({} -> {})",
                    instance.address, current.framework_id, desired.framework_id
                )));
            }
        }

        instance.phase = Phase::Updating;
        let updated = ctx
            .run(Operation::Update, id.as_str(), self.client.update(&id, desired))
            .await;

        match updated {
            Ok(record) => {
                let record = self.hydrate(record);
                instance.mark_present(record.clone());
                tracing::info!("{}: updated {}", instance.address, id);
                Ok(record)
            }
            Err(e) => {
                instance.phase = Phase::Present;
                Err(e)
            }
        }
    }

    /// Delete the remote resource of an instance.
    ///
    /// Deleting something that is already gone succeeds. Success only means
    /// the request was accepted; use the destruction verifier to confirm
    /// absence.
    pub async fn delete(&self, ctx: &CallContext, instance: &mut ResourceInstance) -> Result<()> {
        let Some(id) = instance.id.clone() else {
            instance.mark_absent();
            return Ok(());
        };

        instance.phase = Phase::Deleting;
        let deleted = ctx
            .run(Operation::Delete, id.as_str(), self.client.delete(&id))
            .await;

        match deleted {
            Ok(()) => {
                tracing::info!("{}: deleted {}", instance.address, id);
                instance.mark_absent();
                Ok(())
            }
            Err(Error::NotFound { .. }) => {
                tracing::info!("{}: {} already deleted", instance.address, id);
                instance.mark_absent();
                Ok(())
            }
            Err(e) => {
                instance.phase = Phase::Present;
                Err(e)
            }
        }
    }

    /// Adopt an existing remote resource into tracked state
    pub async fn import(
        &self,
        ctx: &CallContext,
        address: &str,
        raw_id: &str,
    ) -> Result<ResourceInstance> {
        let id = ResourceIdentifier::parse(raw_id)?;
        let record = lookup(self.client.as_ref(), ctx, &id)
            .await
            .map_err(|e| reattribute(e, Operation::Import))?;

        let mut instance = ResourceInstance::new(address);
        instance.mark_present(self.hydrate(record));
        tracing::info!("{}: imported {}", address, id);

        Ok(instance)
    }

    /// Work out what reconciling `instance` against `desired` requires.
    /// Refreshes the instance first.
    pub async fn plan(
        &self,
        ctx: &CallContext,
        instance: &mut ResourceInstance,
        desired: &DesiredConfiguration,
    ) -> Result<Plan> {
        desired.validate()?;

        let Some(record) = self.read(ctx, instance).await? else {
            return Ok(Plan::Create);
        };

        let changes = drift::diff(&record, desired);
        if changes.is_empty() {
            Ok(Plan::NoOp)
        } else if changes.iter().any(|a| a.requires_replace()) {
            Ok(Plan::Replace(changes))
        } else {
            Ok(Plan::Update(changes))
        }
    }

    /// Plan and execute in one step. Returns the plan that was carried out.
    pub async fn apply(
        &self,
        ctx: &CallContext,
        instance: &mut ResourceInstance,
        desired: &DesiredConfiguration,
    ) -> Result<Plan> {
        let plan = self.plan(ctx, instance, desired).await?;

        match &plan {
            Plan::NoOp => {}
            Plan::Create => {
                self.create(ctx, instance, desired).await?;
            }
            Plan::Update(_) => {
                self.update(ctx, instance, desired).await?;
            }
            Plan::Replace(_) => {
                self.delete(ctx, instance).await?;
                self.create(ctx, instance, desired).await?;
            }
        }

        Ok(plan)
    }
}
