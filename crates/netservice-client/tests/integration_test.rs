//! Integration tests for the netservice client
//!
//! These tests require a running netservice instance.
//! Set NETSERVICE_URL and CLUSTER_ID environment variables to run.

use netservice_client::{GetQuotaRequest, ListIpRequest, NetServiceClient, NetServiceClientTrait};
use std::time::Duration;

fn client() -> NetServiceClient {
    let url = std::env::var("NETSERVICE_URL")
        .unwrap_or_else(|_| "http://localhost:8080".to_string());
    NetServiceClient::new(url, Duration::from_secs(10)).expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires running netservice instance
async fn test_get_quota() {
    let cluster = std::env::var("CLUSTER_ID")
        .expect("CLUSTER_ID environment variable must be set");

    let quota = client()
        .get_quota(&GetQuotaRequest { cluster })
        .await
        .expect("Failed to get quota");

    println!("Cluster quota: {}", quota.limit);
}

#[tokio::test]
#[ignore]
async fn test_list_ip() {
    let cluster = std::env::var("CLUSTER_ID")
        .expect("CLUSTER_ID environment variable must be set");

    let ips = client()
        .list_ip(&ListIpRequest {
            cluster: Some(cluster),
            ..Default::default()
        })
        .await
        .expect("Failed to list IPs");

    println!("Found {} IP addresses", ips.len());
}
