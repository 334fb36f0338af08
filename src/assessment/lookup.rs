//! Lookup
//!
//! Resolves an identifier to the current remote record. Exactly one Get is
//! issued per call and nothing is cached: remote state may change between
//! calls.

use super::model::{ResourceIdentifier, ResourceRecord};
use crate::api::client::{ClientError, RemoteClient};
use crate::context::CallContext;
use crate::error::{Error, Operation, Result};

/// Find an assessment by its raw identifier.
///
/// Fails with `Error::Validation` for an empty or malformed identifier
/// without touching the client, `Error::NotFound` when the control plane
/// reports absence, and `Error::Transport` for anything else.
pub async fn find_assessment_by_id<C>(
    client: &C,
    ctx: &CallContext,
    raw_id: &str,
) -> Result<ResourceRecord>
where
    C: RemoteClient + ?Sized,
{
    let id = ResourceIdentifier::parse(raw_id)?;
    lookup(client, ctx, &id).await
}

/// Find an assessment by an already validated identifier
pub async fn lookup<C>(
    client: &C,
    ctx: &CallContext,
    id: &ResourceIdentifier,
) -> Result<ResourceRecord>
where
    C: RemoteClient + ?Sized,
{
    let record = ctx
        .run(Operation::Read, id.as_str(), client.get(id))
        .await?;

    // A record for another identifier would mean the remote matched the wrong resource
    if record.id != *id {
        return Err(Error::Transport {
            operation: Operation::Read,
            id: id.to_string(),
            source: ClientError::Decode(format!(
                "control plane returned assessment {} for {}",
                record.id, id
            )),
        });
    }

    Ok(record)
}
