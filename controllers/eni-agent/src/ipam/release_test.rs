//! Unit tests for the release pipeline

#[cfg(test)]
mod tests {
    use crate::error::ErrorCode;
    use crate::test_utils::*;
    use crds::*;
    use netservice_client::IpStatus;

    #[tokio::test]
    async fn test_floating_release_deletes_record() {
        let harness = AgentHarness::new();
        harness.cluster.add_pod(create_test_pod("web-abc", "ReplicaSet", "web-rs", false));
        let service = harness.ready_service(vec![create_test_eni(0, EniStatus::Ready)]).await;
        let allocation = service.allocate(&request("web-abc", "c-1")).await.unwrap();

        service.release(&request("web-abc", "c-1")).await.unwrap();

        assert!(harness.cloud_ips.snapshot("default", &allocation.ip_addr).is_none());
        assert!(harness.netservice.get_ip(&allocation.ip_addr).is_none());

        // nothing left to release
        let err = service.release(&request("web-abc", "c-1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CloudIpNotFound);
    }

    #[tokio::test]
    async fn test_fixed_release_keeps_record_available() {
        let harness = AgentHarness::new();
        harness.cluster.add_pod(create_test_pod("web-0", "StatefulSet", "web", true));
        harness.cluster.add_workload("StatefulSet", "default", "web");
        let service = harness.ready_service(vec![create_test_eni(0, EniStatus::Ready)]).await;
        let allocation = service.allocate(&request("web-0", "c-1")).await.unwrap();

        service.release(&request("web-0", "c-1")).await.unwrap();

        let record = harness.cloud_ips.snapshot("default", &allocation.ip_addr).unwrap();
        assert_eq!(record.state(), CloudIPState::Available);
        assert!(record.spec.is_fixed);
        assert_eq!(harness.netservice.get_ip(&allocation.ip_addr).unwrap().status, IpStatus::Available);
    }

    #[tokio::test]
    async fn test_release_matches_container() {
        let harness = AgentHarness::new();
        harness
            .cloud_ips
            .insert(create_test_cloud_ip("10.0.1.9", "eni-test-0", CloudIPState::Active, false));
        let service = harness.service(harness.inspector());

        // same pod, different sandbox
        let err = service.release(&request("web-0", "c-2")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CloudIpNotFound);
        assert!(harness.cloud_ips.snapshot("default", "10.0.1.9").is_some());
    }

    #[tokio::test]
    async fn test_release_unknown_to_netservice_drops_record() {
        let harness = AgentHarness::new();
        harness
            .cloud_ips
            .insert(create_test_cloud_ip("10.0.1.9", "eni-test-0", CloudIPState::Active, false));
        // release does not need a ready node
        let service = harness.service(harness.inspector());

        service.release(&request("web-0", "c-1")).await.unwrap();

        assert!(harness.cloud_ips.snapshot("default", "10.0.1.9").is_none());
        assert_eq!(harness.netservice.calls(), vec!["release_ip"]);
    }

    #[tokio::test]
    async fn test_netservice_failure_keeps_record_active() {
        let harness = AgentHarness::new();
        harness
            .cloud_ips
            .insert(create_test_cloud_ip("10.0.1.9", "eni-test-0", CloudIPState::Active, true));
        harness.netservice.fail_on("release_fixed_ip", 7, "database unavailable");
        let service = harness.service(harness.inspector());

        let err = service.release(&request("web-0", "c-1")).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::NetServiceFailure);
        let record = harness.cloud_ips.snapshot("default", "10.0.1.9").unwrap();
        assert_eq!(record.state(), CloudIPState::Active);
    }
}
