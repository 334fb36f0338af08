//! assessctl
//!
//! Reconciles Audit Manager assessments declared in configuration files with
//! what the control plane reports: lookup by identifier with not-found
//! classification, existence and destruction verification, drift detection
//! and a CRUD reconciler that treats out-of-band deletion as a state
//! transition rather than a failure.

pub mod api;
pub mod assessment;
pub mod config;
pub mod context;
pub mod error;
pub mod state;

pub use api::{ClientError, RemoteClient};
pub use context::{CallContext, CancelHandle};
pub use error::{Error, Operation, Result, VerifyAction, VerifyFailure};

/// Version injected at compile time via ASSESSCTL_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("ASSESSCTL_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
