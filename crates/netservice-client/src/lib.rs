//! Netservice Client
//!
//! Client for the IP bookkeeping service ("netservice") that owns the
//! authoritative subnet and address pool. CloudNet components use it to
//! allocate and release pod addresses, reserve ENI primary addresses,
//! clean up after nodes and ENIs, and read the cluster quota.
//!
//! # Example
//!
//! ```no_run
//! use netservice_client::{NetServiceClient, NetServiceClientTrait, GetQuotaRequest};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = NetServiceClient::new(
//!     "http://netservice.cloudnet-system:8080".to_string(),
//!     Duration::from_secs(10),
//! )?;
//!
//! let quota = client.get_quota(&GetQuotaRequest { cluster: "cls-1".to_string() }).await?;
//! println!("cluster quota: {}", quota.limit);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod netservice_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::NetServiceClient;
pub use common::HttpClient;
pub use error::NetServiceError;
pub use models::*;
pub use netservice_trait::NetServiceClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockNetServiceClient;
