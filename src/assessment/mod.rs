//! Assessment resource management
//!
//! # Module Structure
//!
//! - [`model`] - Identifier, desired configuration, remote record and locator
//! - [`lookup`] - Single-shot Get with not-found classification
//! - [`verify`] - Existence and destruction verifiers
//! - [`drift`] - Attribute-level comparison of remote and desired state
//! - [`reconciler`] - CRUD lifecycle, plan/apply and import

pub mod drift;
pub mod lookup;
pub mod model;
pub mod reconciler;
pub mod verify;

pub use lookup::{find_assessment_by_id, lookup};
pub use model::{DesiredConfiguration, LocatorScheme, ResourceIdentifier, ResourceRecord};
pub use reconciler::{Phase, Plan, Reconciler, ResourceInstance, RESOURCE_TYPE};
pub use verify::{verify_destroyed, verify_exists, verify_exists_eventually, Backoff};
