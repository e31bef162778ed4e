//! Well-known names shared across CloudNet components.
//!
//! Labels are used for selector-based listing of `CloudIP` objects,
//! annotations carry per-pod networking intent, and finalizers sequence
//! the teardown of `NodeNetwork` objects between controller and agent.

/// API group of all CloudNet CRDs
pub const API_GROUP: &str = "cloudnet.microscaler.io";

/// Node label selecting nodes that get a `NodeNetwork`
pub const NODE_ENI_LABEL: &str = "cloudnet.microscaler.io/eni";

/// Value of [`NODE_ENI_LABEL`] that enables ENI management
pub const NODE_ENI_LABEL_ENABLED: &str = "enabled";

/// Finalizer owned by the ENI controller
pub const CONTROLLER_FINALIZER: &str = "cloudnet.microscaler.io/eni-controller";

/// Finalizer owned by the node agent
pub const AGENT_FINALIZER: &str = "cloudnet.microscaler.io/eni-agent";

/// CloudIP label: owning host (node name)
pub const LABEL_HOST: &str = "cloudnet.microscaler.io/host";

/// CloudIP label: current [`crate::CloudIPState`]
pub const LABEL_STATUS: &str = "cloudnet.microscaler.io/status";

/// CloudIP label: `"true"` for fixed IPs
pub const LABEL_IS_FIXED: &str = "cloudnet.microscaler.io/is-fixed";

/// CloudIP label: `"true"` when the address is owned at cluster layer
/// (allocated for a pod of this cluster, as opposed to an ENI primary)
pub const LABEL_IS_CLUSTER_LAYER: &str = "cloudnet.microscaler.io/is-cluster-layer";

/// CloudIP label: id of the ENI carrying the address
pub const LABEL_ENI_ID: &str = "cloudnet.microscaler.io/eni-id";

/// CloudIP label: owner workload kind
pub const LABEL_WORKLOAD_KIND: &str = "cloudnet.microscaler.io/workload-kind";

/// CloudIP label: owner workload name
pub const LABEL_WORKLOAD_NAME: &str = "cloudnet.microscaler.io/workload-name";

/// Pod annotation declaring the networking mode; pods without it are not
/// managed by CloudNet
pub const ANNOTATION_NETWORKS: &str = "cloudnet.microscaler.io/networks";

/// Value of [`ANNOTATION_NETWORKS`] requesting a floating (underlay) IP
pub const NETWORKS_FLOATING_IP: &str = "floating-ip";

/// Pod annotation requesting a fixed IP (`"true"`)
pub const ANNOTATION_FIXED_IP: &str = "cloudnet.microscaler.io/fixed-ip";

/// Pod annotation pinning the fixed IP to a previously used address
pub const ANNOTATION_FIXED_IP_ADDRESS: &str = "cloudnet.microscaler.io/fixed-ip-address";

/// Link-local gateway handed to pods on allocation
pub const POD_GATEWAY: &str = "169.254.1.1";

/// Reserved ENI index used for pod (floating) IP allocation
pub const FLOATING_IP_ENI_INDEX: u32 = 0;

/// Returns `true` when the annotation map asks for a floating IP.
pub fn wants_floating_ip(annotations: &std::collections::BTreeMap<String, String>) -> bool {
    annotations
        .get(ANNOTATION_NETWORKS)
        .is_some_and(|v| v == NETWORKS_FLOATING_IP)
}

/// Returns `true` when the annotation map asks for a fixed IP.
pub fn wants_fixed_ip(annotations: &std::collections::BTreeMap<String, String>) -> bool {
    annotations
        .get(ANNOTATION_FIXED_IP)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}
