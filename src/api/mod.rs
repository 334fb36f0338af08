//! Control-plane API interaction module
//!
//! Everything that talks to the remote assessments API lives here: bearer
//! authentication, the HTTP transport, the [`client::RemoteClient`] seam the
//! reconciler consumes, and an in-memory implementation of that seam.
//!
//! # Module Structure
//!
//! - [`auth`] - Static or Application Default Credentials with token caching
//! - [`http`] - HTTP utilities for REST API calls
//! - [`client`] - `RemoteClient` trait and the REST `AssessmentClient`
//! - [`memory`] - In-memory `RemoteClient` with call recording and fault injection
//!
//! # Example
//!
//! ```ignore
//! use assessctl::api::{auth::Credentials, client::AssessmentClient};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let endpoint = url::Url::parse("https://auditmanager.us-east-1.amazonaws.com")?;
//!     let client = AssessmentClient::new(endpoint, Credentials::from_adc().await?)?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod memory;

pub use client::{AssessmentClient, ClientError, RemoteClient};
pub use memory::MemoryClient;
