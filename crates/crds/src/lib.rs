//! CloudNet CRD Definitions
//!
//! Kubernetes Custom Resource Definitions shared by the ENI controller,
//! the node agent and the scheduler extender.

pub mod constants;
pub mod node_network;
pub mod cloud_ip;

pub use constants::*;
pub use node_network::*;
pub use cloud_ip::*;
