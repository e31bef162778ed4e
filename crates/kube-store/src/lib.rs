//! Kube Store
//!
//! Narrow, mockable access to the Kubernetes objects CloudNet reads and
//! writes:
//! - `NodeNetworkStore`: per-node ENI state in the system namespace
//! - `CloudIpStore`: per-address bookkeeping records
//! - `ClusterStore`: pods, workloads and pod binding
//!
//! plus a typed [`informer::Informer`] that dispatches watch events to
//! [`informer::EventHandler`]s.

pub mod cloud_ip;
pub mod cluster;
pub mod error;
pub mod informer;
pub mod node_network;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use cloud_ip::{CloudIpStore, KubeCloudIpStore};
pub use cluster::{ClusterStore, KubeClusterStore, Workload, node_internal_ip};
pub use error::StoreError;
pub use informer::{EventHandler, Informer};
pub use node_network::{KubeNodeNetworkStore, NodeNetworkStore};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockCloudIpStore, MockClusterStore, MockNodeNetworkStore};
