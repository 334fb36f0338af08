//! Existence and Destruction Verifiers
//!
//! Assertion helpers used after a create or a delete. Absence means opposite
//! things here: for [`verify_exists`] it is a failed assertion, for
//! [`verify_destroyed`] it is the expected terminal state. Any other lookup
//! failure propagates unchanged from both.

use super::lookup::lookup;
use super::model::{ResourceIdentifier, ResourceRecord};
use crate::api::client::RemoteClient;
use crate::context::CallContext;
use crate::error::{Error, Operation, Result, VerifyAction, VerifyFailure};
use futures::future::join_all;
use std::time::Duration;

/// Bounded exponential backoff used while waiting for a new resource to
/// become visible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_attempts: 8,
        }
    }
}

impl Backoff {
    /// Delay to wait after failed attempt number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial.saturating_mul(factor).min(self.max_delay)
    }
}

/// Confirm that `raw_id` exists remotely and return its record.
///
/// `name` is the caller's label for the resource (for example its address in
/// tracked state) and is used when the identifier itself is unusable.
pub async fn verify_exists<C>(
    client: &C,
    ctx: &CallContext,
    name: &str,
    raw_id: &str,
) -> Result<ResourceRecord>
where
    C: RemoteClient + ?Sized,
{
    if raw_id.is_empty() {
        return Err(Error::verification(
            VerifyAction::CheckingExistence,
            name,
            VerifyFailure::NotSet,
        ));
    }
    let id = ResourceIdentifier::parse(raw_id)?;

    match lookup(client, ctx, &id).await {
        Ok(record) => Ok(record),
        Err(Error::NotFound { .. }) => Err(Error::verification(
            VerifyAction::CheckingExistence,
            id.as_str(),
            VerifyFailure::NotFound,
        )),
        Err(e) => Err(e),
    }
}

/// Poll [`verify_exists`] until the resource is visible or `backoff` is
/// exhausted. Only "not found" is retried.
pub async fn verify_exists_eventually<C>(
    client: &C,
    ctx: &CallContext,
    name: &str,
    raw_id: &str,
    backoff: &Backoff,
) -> Result<ResourceRecord>
where
    C: RemoteClient + ?Sized,
{
    let attempts = backoff.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match verify_exists(client, ctx, name, raw_id).await {
            Err(Error::Verification {
                reason: VerifyFailure::NotFound,
                ..
            }) if attempt + 1 < attempts => {
                let delay = backoff.delay(attempt);
                tracing::debug!(
                    "{} not visible yet (attempt {}/{}), retrying in {:?}",
                    raw_id,
                    attempt + 1,
                    attempts,
                    delay
                );
                ctx.sleep(Operation::Read, raw_id, delay).await?;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Confirm that none of `ids` exists remotely any more.
///
/// All identifiers are checked concurrently. A lookup failure other than
/// "not found" is returned as-is (first in input order); otherwise every
/// identifier that still exists is named in one verification error.
pub async fn verify_destroyed<C>(
    client: &C,
    ctx: &CallContext,
    ids: &[ResourceIdentifier],
) -> Result<()>
where
    C: RemoteClient + ?Sized,
{
    let results = join_all(ids.iter().map(|id| lookup(client, ctx, id))).await;

    let mut survivors = Vec::new();
    for (id, result) in ids.iter().zip(results) {
        match result {
            Err(Error::NotFound { .. }) => {
                tracing::debug!("{} confirmed destroyed", id);
            }
            Ok(_) => survivors.push(id.to_string()),
            Err(e) => return Err(e),
        }
    }

    if survivors.is_empty() {
        return Ok(());
    }

    tracing::warn!("not destroyed: {}", survivors.join(", "));
    Err(Error::Verification {
        action: VerifyAction::CheckingDestroyed,
        subjects: survivors,
        reason: VerifyFailure::NotDestroyed,
    })
}
