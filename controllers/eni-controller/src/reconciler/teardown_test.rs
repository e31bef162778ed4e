//! Unit tests for node teardown

#[cfg(test)]
mod tests {
    use crate::reconciler::Step;
    use crate::test_utils::*;
    use cloud_backend::{EniInfo, EniState};
    use crds::*;
    use kube_store::{CloudIpStore, NodeNetworkStore};
    use netservice_client::IpObject;

    fn attached(index: u32) -> EniInfo {
        let eni = create_test_eni(index, EniStatus::Ready);
        EniInfo {
            eni_id: eni.eni_id,
            eni_name: eni.eni_name,
            mac_address: eni.mac_address,
            subnet_id: eni.subnet_id,
            primary_ip: eni.primary_ip,
            secondary_ips: Vec::new(),
            attachment: Some(EniAttachment {
                attachment_id: format!("attach-{}", index),
                instance_id: "i-node-1".to_string(),
                device_index: index + 1,
            }),
            state: EniState::Attached,
        }
    }

    /// node-1 with two ready ENIs, both finalizers, already deleted.
    async fn deleted_node(harness: &TestHarness) {
        harness.cloud.insert_eni(attached(0));
        harness.cloud.insert_eni(attached(1));
        let mut nn = create_test_node_network(
            2,
            vec![create_test_eni(0, EniStatus::Ready), create_test_eni(1, EniStatus::Ready)],
        );
        nn.metadata.finalizers = Some(vec![CONTROLLER_FINALIZER.to_string(), AGENT_FINALIZER.to_string()]);
        harness.node_networks.insert(nn);
        harness.node_networks.delete("node-1").await.unwrap();
        assert!(harness.node_network().is_deleting());
    }

    #[tokio::test]
    async fn test_teardown_waits_for_pods_then_agent() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        deleted_node(&harness).await;
        harness
            .cloud_ips
            .insert(create_test_cloud_ip("10.0.1.9", "eni-test-0", CloudIPState::Active, false));

        let step = harness.drive(&reconciler).await;
        assert!(matches!(step, Step::Waiting(ref why) if why.contains("still active")));

        harness.cloud_ips.delete("default", "10.0.1.9").await.unwrap();
        let step = harness.drive(&reconciler).await;
        assert!(matches!(step, Step::Waiting(ref why) if why.contains("agent finalizer")));
        assert_eq!(harness.node_network().enis().len(), 2);

        // agent cleaned the host
        let nn = harness.node_network();
        harness.node_networks.remove_finalizer(&nn, AGENT_FINALIZER).await.unwrap();

        assert_eq!(harness.drive(&reconciler).await, Step::Converged);
        assert!(harness.node_networks.snapshot("node-1").is_none());
        assert_eq!(harness.cloud.eni_count(), 0);
        let releases = harness
            .netservice
            .calls()
            .into_iter()
            .filter(|c| c == "release_eni")
            .count();
        assert_eq!(releases, 2);
    }

    #[tokio::test]
    async fn test_vanished_instance_is_cleaned_for_the_agent() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        deleted_node(&harness).await;
        harness.cloud.remove_vm("10.0.0.10");
        harness
            .cloud_ips
            .insert(create_test_cloud_ip("10.0.1.9", "eni-test-0", CloudIPState::Active, false));
        harness
            .cloud_ips
            .insert(create_test_cloud_ip("10.0.1.10", "eni-test-1", CloudIPState::Available, true));
        harness.netservice.add_ip(IpObject {
            address: "10.0.1.9".to_string(),
            host: "node-1".to_string(),
            eni_id: "eni-test-0".to_string(),
            ..Default::default()
        });

        assert_eq!(harness.drive(&reconciler).await, Step::Converged);

        assert!(harness.node_networks.snapshot("node-1").is_none());
        assert!(harness.cloud_ips.all().is_empty());
        assert!(harness.netservice.get_ip("10.0.1.9").is_none());
        assert!(harness.netservice.calls().contains(&"clean_node".to_string()));
        assert_eq!(harness.cloud.eni_count(), 0);
    }

    #[tokio::test]
    async fn test_cloud_failure_aborts_and_backs_off() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        deleted_node(&harness).await;
        harness.cloud.fail_on("get_vm_info", "throttled");

        let nn = harness.node_network();
        assert!(reconciler.reconcile_node_network(&nn).await.is_err());
        assert_eq!(reconciler.get_backoff_for_resource("node-1"), (5, 1));

        // nothing was written
        assert_eq!(harness.node_network(), nn);
    }

    #[tokio::test]
    async fn test_released_object_is_ignored() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        let mut nn = create_test_node_network(0, Vec::new());
        nn.metadata.finalizers = Some(vec![AGENT_FINALIZER.to_string()]);

        assert_eq!(reconciler.finalize(&nn).await.unwrap(), Step::Converged);
        assert!(harness.cloud.calls().is_empty());
    }
}
