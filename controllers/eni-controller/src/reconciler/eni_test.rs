//! Unit tests for the ENI step machine

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::Step;
    use crate::test_utils::*;
    use cloud_backend::{EniInfo, EniState};
    use crds::*;
    use kube_store::CloudIpStore;
    use netservice_client::{IpObject, IpStatus};

    fn assert_stack_invariants(nn: &NodeNetwork) {
        nn.check_eni_invariants().unwrap();
        let moving = nn.enis().iter().filter(|e| e.status.is_transitional()).count();
        assert!(moving <= 1, "more than one transitional eni: {:?}", nn.enis());
    }

    /// Cloud ENI matching `create_test_eni(index, _)`, attached to node-1.
    fn attached_cloud_eni(index: u32) -> EniInfo {
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

    #[tokio::test]
    async fn test_scale_up_one_eni_at_a_time() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        harness.node_networks.insert(create_test_node_network(2, Vec::new()));

        let step = reconciler.reconcile_enis(&harness.node_network()).await.unwrap();
        assert!(matches!(step, Step::Progressed(_)));
        let nn = harness.node_network();
        assert_eq!(nn.enis().len(), 1);
        assert_eq!(nn.enis()[0].status, EniStatus::NotReady);
        assert_eq!(nn.enis()[0].eni_name, "i-node-1-eni-0");
        assert_stack_invariants(&nn);

        // attachment not confirmed yet: no second eni
        let step = harness.drive(&reconciler).await;
        assert!(matches!(step, Step::Waiting(_)));
        assert_eq!(harness.node_network().enis().len(), 1);

        harness.cloud.complete_attachments();
        let step = harness.drive(&reconciler).await;
        assert!(matches!(step, Step::Waiting(_)));
        let nn = harness.node_network();
        assert_eq!(nn.enis().len(), 2);
        assert_stack_invariants(&nn);

        harness.cloud.complete_attachments();
        assert_eq!(harness.drive(&reconciler).await, Step::Converged);

        let nn = harness.node_network();
        assert_stack_invariants(&nn);
        assert_eq!(nn.ready_enis().len(), 2);
        let first = &nn.enis()[0];
        assert_eq!(first.primary_ip, "10.0.1.2");
        assert_eq!(first.subnet_cidr, "10.0.1.0/24");
        assert_eq!(first.gateway.as_deref(), Some("10.0.1.1"));
        assert_eq!(first.route_table_id, 100);
        assert_eq!(nn.enis()[1].route_table_id, 101);
        assert!(first.attachment.is_some());

        let floating = nn.status.as_ref().and_then(|s| s.floating_ip_eni.as_ref()).unwrap();
        assert_eq!(floating.ip_limit, 9);
        assert!(nn.ready_floating_ip_eni().is_some());

        assert_eq!(harness.cloud.eni_count(), 2);
        assert_eq!(harness.netservice.ip_count(), 2);
    }

    #[tokio::test]
    async fn test_converged_node_is_left_alone() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        harness.node_networks.insert(create_test_node_network(
            1,
            vec![create_test_eni(0, EniStatus::Ready)],
        ));

        let step = reconciler.reconcile_enis(&harness.node_network()).await.unwrap();
        assert_eq!(step, Step::Converged);
        assert!(harness.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_attach_is_compensated() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        harness.node_networks.insert(create_test_node_network(1, Vec::new()));
        harness.cloud.fail_on("attach_eni", "device busy");

        let err = reconciler.reconcile_enis(&harness.node_network()).await.unwrap_err();
        assert!(matches!(err, ControllerError::Cloud(_)));

        assert_eq!(
            harness.cloud.calls(),
            vec!["find_eni", "create_eni", "get_max_eni_index", "attach_eni", "delete_eni"]
        );
        assert_eq!(harness.cloud.eni_count(), 0);
        assert_eq!(harness.netservice.ip_count(), 0);
        assert!(harness.node_network().enis().is_empty());
    }

    #[tokio::test]
    async fn test_retry_adopts_eni_from_interrupted_pass() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        harness.node_networks.insert(create_test_node_network(1, Vec::new()));

        // created by a pass whose status write never landed
        harness.cloud.insert_eni(EniInfo {
            eni_id: "eni-left-behind".to_string(),
            eni_name: "i-node-1-eni-0".to_string(),
            mac_address: "02:00:00:00:00:aa".to_string(),
            subnet_id: "subnet-eni".to_string(),
            primary_ip: "10.0.1.50".to_string(),
            secondary_ips: Vec::new(),
            attachment: None,
            state: EniState::Available,
        });
        harness.netservice.add_ip(IpObject {
            address: "10.0.1.50".to_string(),
            subnet_id: "subnet-eni".to_string(),
            subnet_cidr: "10.0.1.0/24".to_string(),
            host: "node-1".to_string(),
            status: IpStatus::Reserved,
            ..Default::default()
        });

        reconciler.reconcile_enis(&harness.node_network()).await.unwrap();

        let nn = harness.node_network();
        assert_eq!(nn.enis().len(), 1);
        assert_eq!(nn.enis()[0].eni_id, "eni-left-behind");
        assert_eq!(nn.enis()[0].subnet_cidr, "10.0.1.0/24");
        assert!(nn.enis()[0].attachment.is_some());
        assert!(!harness.cloud.calls().contains(&"create_eni".to_string()));
        assert_eq!(harness.cloud.eni_count(), 1);
    }

    #[tokio::test]
    async fn test_orphaned_eni_without_primary_is_replaced() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        harness.node_networks.insert(create_test_node_network(1, Vec::new()));

        // attach fails and so does the cloud half of the compensation
        harness.cloud.fail_on("attach_eni", "device busy");
        harness.cloud.fail_on("delete_eni", "throttled");
        reconciler.reconcile_enis(&harness.node_network()).await.unwrap_err();
        assert_eq!(harness.cloud.eni_count(), 1);
        assert_eq!(harness.netservice.ip_count(), 0);
        let orphan = "eni-00000001";
        assert_eq!(harness.cloud.eni(orphan).unwrap().eni_name, "i-node-1-eni-0");

        harness.cloud.clear_failures();
        let step = reconciler.reconcile_enis(&harness.node_network()).await.unwrap();
        assert!(matches!(step, Step::Progressed(_)));
        assert!(harness.cloud.eni(orphan).is_none());
        assert!(harness.node_network().enis().is_empty());

        assert!(matches!(harness.drive(&reconciler).await, Step::Waiting(_)));
        harness.cloud.complete_attachments();
        assert_eq!(harness.drive(&reconciler).await, Step::Converged);

        let nn = harness.node_network();
        assert_eq!(nn.ready_enis().len(), 1);
        assert_ne!(nn.enis()[0].eni_id, orphan);
        assert_stack_invariants(&nn);
        assert_eq!(harness.cloud.eni_count(), 1);
        assert_eq!(harness.netservice.ip_count(), 1);
    }

    #[tokio::test]
    async fn test_scale_down_waits_for_pod_ips_to_drain() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        harness.cloud.insert_eni(attached_cloud_eni(0));
        harness.cloud.insert_eni(attached_cloud_eni(1));
        harness.node_networks.insert(create_test_node_network(
            1,
            vec![create_test_eni(0, EniStatus::Ready), create_test_eni(1, EniStatus::Ready)],
        ));
        harness
            .cloud_ips
            .insert(create_test_cloud_ip("10.0.1.9", "eni-test-1", CloudIPState::Active, false));

        let step = harness.drive(&reconciler).await;
        assert!(matches!(step, Step::Waiting(_)));
        let nn = harness.node_network();
        assert_eq!(nn.enis()[1].status, EniStatus::Cleaning);
        assert_stack_invariants(&nn);

        // scale-down is committed even if the desired count goes back up
        let mut bumped = harness.node_network();
        bumped.spec.eni_num = 2;
        harness.node_networks.insert(bumped);
        assert!(matches!(harness.drive(&reconciler).await, Step::Waiting(_)));

        harness.cloud_ips.delete("default", "10.0.1.9").await.unwrap();
        let mut shrunk = harness.node_network();
        shrunk.spec.eni_num = 1;
        harness.node_networks.insert(shrunk);
        assert_eq!(harness.drive(&reconciler).await, Step::Converged);

        let nn = harness.node_network();
        assert_eq!(nn.enis().len(), 1);
        assert_stack_invariants(&nn);
        assert!(harness.cloud.eni("eni-test-1").is_none());
        assert!(harness.cloud.eni("eni-test-0").is_some());
        let calls = harness.netservice.calls();
        assert!(calls.contains(&"clean_eni".to_string()));
        assert!(calls.contains(&"release_eni".to_string()));
    }

    #[tokio::test]
    async fn test_removing_floating_eni_clears_floating_ip_eni() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        harness.cloud.insert_eni(attached_cloud_eni(0));
        let mut nn = create_test_node_network(0, vec![create_test_eni(0, EniStatus::Ready)]);
        if let Some(status) = nn.status.as_mut() {
            status.floating_ip_eni = Some(FloatingIpEni {
                eni: create_test_eni(0, EniStatus::Ready),
                ip_limit: 9,
            });
        }
        harness.node_networks.insert(nn);

        // Cleaning takes the floating eni out of service straight away
        reconciler.reconcile_enis(&harness.node_network()).await.unwrap();
        assert!(harness.node_network().ready_floating_ip_eni().is_none());

        assert_eq!(harness.drive(&reconciler).await, Step::Converged);
        let nn = harness.node_network();
        assert!(nn.enis().is_empty());
        assert!(nn.status.as_ref().and_then(|s| s.floating_ip_eni.as_ref()).is_none());
    }

    #[tokio::test]
    async fn test_vanished_not_ready_eni_is_dropped() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        harness.node_networks.insert(create_test_node_network(
            1,
            vec![create_test_eni(0, EniStatus::NotReady)],
        ));

        let step = reconciler.reconcile_enis(&harness.node_network()).await.unwrap();
        assert!(matches!(step, Step::Progressed(_)));
        assert!(harness.node_network().enis().is_empty());
        assert!(harness.netservice.calls().contains(&"release_eni".to_string()));
    }

    #[tokio::test]
    async fn test_broken_stack_is_rejected() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        harness.node_networks.insert(create_test_node_network(
            2,
            vec![create_test_eni(0, EniStatus::NotReady), create_test_eni(1, EniStatus::Ready)],
        ));

        let err = reconciler.reconcile_enis(&harness.node_network()).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_stale_object_conflicts() {
        let harness = TestHarness::new();
        let reconciler = harness.reconciler();
        harness.node_networks.insert(create_test_node_network(1, Vec::new()));
        let stale = harness.node_network();

        reconciler.reconcile_enis(&stale).await.unwrap();
        harness.cloud.complete_attachments();
        let err = reconciler.reconcile_enis(&stale).await.unwrap_err();
        assert!(matches!(err, ControllerError::Store(ref e) if e.is_conflict()));
    }
}
