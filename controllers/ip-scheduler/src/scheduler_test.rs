//! Unit tests for predicate and bind

#[cfg(test)]
mod tests {
    use crate::error::SchedulerError;
    use crate::test_utils::*;
    use crds::*;
    use kube_store::EventHandler;
    use std::sync::Arc;

    fn one_eni_node(harness: &SchedulerHarness, node: &str, subnet: &str) {
        harness.node_networks.insert(create_test_node_network(
            node,
            vec![create_test_eni(node, 0, subnet, EniStatus::Ready)],
            2,
        ));
    }

    #[tokio::test]
    async fn test_pods_without_floating_ip_pass_through() {
        let harness = SchedulerHarness::new();
        let ctx = harness.context();
        let pod = create_test_pod("plain", "ReplicaSet", "rs", false, false);

        let result = ctx.predicates(&filter_args(pod, &["node-1", "node-2"])).await;
        assert_eq!(result.node_names.unwrap(), vec!["node-1", "node-2"]);
        assert!(result.failed_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_two_binds_then_reject() {
        let harness = SchedulerHarness::new();
        one_eni_node(&harness, "node-1", "subnet-a");
        for name in ["a", "b", "c"] {
            harness.cluster.add_pod(create_test_pod(name, "ReplicaSet", "rs", true, false));
        }
        let ctx = harness.context();

        let result = ctx
            .predicates(&filter_args(create_test_pod("a", "ReplicaSet", "rs", true, false), &["node-1"]))
            .await;
        assert_eq!(result.node_names.unwrap(), vec!["node-1"]);

        ctx.bind(&binding_args("a", "node-1")).await.unwrap();
        ctx.bind(&binding_args("b", "node-1")).await.unwrap();

        let result = ctx
            .predicates(&filter_args(create_test_pod("c", "ReplicaSet", "rs", true, false), &["node-1"]))
            .await;
        assert!(result.node_names.unwrap().is_empty());
        assert_eq!(result.failed_nodes["node-1"], "no available eni ip anymore");

        let err = ctx.bind(&binding_args("c", "node-1")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Capacity(_)));
        assert_eq!(harness.cluster.bindings().len(), 2);
        assert_eq!(ctx.cache.get_node_resources("node-1").len(), 2);
    }

    #[tokio::test]
    async fn test_nodes_without_ready_network_are_rejected() {
        let harness = SchedulerHarness::new();
        let mut not_ready = create_test_node_network("node-2", vec![create_test_eni("node-2", 0, "subnet-a", EniStatus::Ready)], 2);
        if let Some(status) = not_ready.status.as_mut() {
            status.status = NodeNetworkState::NotReady;
        }
        harness.node_networks.insert(not_ready);
        let ctx = harness.context();
        let pod = create_test_pod("a", "ReplicaSet", "rs", true, false);

        let result = ctx.predicates(&filter_args(pod, &["node-1", "node-2"])).await;

        assert!(result.node_names.unwrap().is_empty());
        assert!(result.failed_nodes["node-1"].contains("has no NodeNetwork"));
        assert!(result.failed_nodes["node-2"].contains("not ready"));
    }

    #[tokio::test]
    async fn test_fixed_ip_pod_needs_eni_in_previous_subnet() {
        let harness = SchedulerHarness::new();
        one_eni_node(&harness, "node-1", "subnet-a");
        one_eni_node(&harness, "node-2", "subnet-b");
        harness
            .cloud_ips
            .insert(create_test_cloud_ip("10.0.2.7", "web-0", "node-old", "subnet-b", CloudIPState::Available));
        harness.cluster.add_pod(create_test_pod("web-0", "StatefulSet", "web", true, true));
        let ctx = harness.context();
        let pod = create_test_pod("web-0", "StatefulSet", "web", true, true);

        let result = ctx.predicates(&filter_args(pod, &["node-1", "node-2"])).await;

        assert_eq!(result.node_names.unwrap(), vec!["node-2"]);
        assert!(result.failed_nodes["node-1"].contains("subnet-b"));

        ctx.bind(&binding_args("web-0", "node-2")).await.unwrap();
        let reserved = ctx.cache.get_resource("default/web-0").unwrap();
        assert_eq!(reserved.eni_id, "eni-node-2-0");
        assert_eq!(reserved.subnet_id, "subnet-b");
        assert_eq!(reserved.value, "10.0.2.7");
    }

    #[tokio::test]
    async fn test_failed_bind_rolls_back_reservation() {
        let harness = SchedulerHarness::new();
        one_eni_node(&harness, "node-1", "subnet-a");
        harness.cluster.add_pod(create_test_pod("a", "ReplicaSet", "rs", true, false));
        harness.cluster.set_fail_bind(true);
        let ctx = harness.context();

        let err = ctx.bind(&binding_args("a", "node-1")).await.unwrap_err();

        assert!(matches!(err, SchedulerError::Store(_)));
        assert_eq!(ctx.cache.count(), 0);
        assert!(harness.cluster.bindings().is_empty());
    }

    #[tokio::test]
    async fn test_quota_rejects_every_node() {
        let harness = SchedulerHarness::new();
        one_eni_node(&harness, "node-1", "subnet-a");
        one_eni_node(&harness, "node-2", "subnet-a");
        harness.cluster.add_pod(create_test_pod("a", "ReplicaSet", "rs", true, false));
        harness.netservice.set_quota("cls-1", 1);
        let ctx = harness.context();
        ctx.refresh_quota().await;

        ctx.bind(&binding_args("a", "node-1")).await.unwrap();
        let result = ctx
            .predicates(&filter_args(create_test_pod("b", "ReplicaSet", "rs", true, false), &["node-1", "node-2"]))
            .await;

        assert!(result.node_names.unwrap().is_empty());
        assert!(result.failed_nodes["node-2"].contains("quota"));
    }

    #[tokio::test]
    async fn test_bootstrap_and_pod_deletion() {
        let harness = SchedulerHarness::new();
        one_eni_node(&harness, "node-1", "subnet-a");
        harness
            .cloud_ips
            .insert(create_test_cloud_ip("10.0.1.2", "web-0", "node-1", "subnet-a", CloudIPState::Active));
        harness
            .cloud_ips
            .insert(create_test_cloud_ip("10.0.1.3", "web-1", "node-1", "subnet-a", CloudIPState::Active));
        harness
            .cloud_ips
            .insert(create_test_cloud_ip("10.0.1.4", "web-2", "node-1", "subnet-a", CloudIPState::Available));
        let ctx = harness.context();

        assert_eq!(ctx.bootstrap().await.unwrap(), 2);
        let result = ctx
            .predicates(&filter_args(create_test_pod("x", "ReplicaSet", "rs", true, false), &["node-1"]))
            .await;
        assert!(result.failed_nodes.contains_key("node-1"));

        ctx.on_delete(Arc::new(create_test_pod("web-0", "StatefulSet", "web", true, true))).await;
        assert_eq!(ctx.cache.count(), 1);
        let result = ctx
            .predicates(&filter_args(create_test_pod("x", "ReplicaSet", "rs", true, false), &["node-1"]))
            .await;
        assert_eq!(result.node_names.unwrap(), vec!["node-1"]);
    }
}
