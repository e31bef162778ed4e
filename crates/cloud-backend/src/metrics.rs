//! Metrics decorator for any [`CloudBackend`]
//!
//! Records one counter sample and one latency sample per cloud call:
//! `cloudnet_cloud_api_requests_total{method,result}` and
//! `cloudnet_cloud_api_duration_seconds{method}`.

use crate::cloud_trait::CloudBackend;
use crate::error::CloudError;
use crate::models::{EniInfo, EniLimit};
use crds::{EniAttachment, VmInfo};
use prometheus::{HistogramVec, IntCounterVec, Registry, opts};
use std::future::Future;
use std::time::Instant;

const NAMESPACE: &str = "cloudnet";

/// Wraps a backend and records call counts and latencies
#[derive(Debug, Clone)]
pub struct MetricsBackend<B> {
    inner: B,
    requests_total: IntCounterVec,
    duration_seconds: HistogramVec,
}

impl<B: CloudBackend> MetricsBackend<B> {
    /// Wrap `inner`, registering the metrics in `registry`.
    pub fn new(inner: B, registry: &Registry) -> Result<Self, CloudError> {
        let requests_total = IntCounterVec::new(
            opts!("cloud_api_requests_total", "Cloud API calls by method and result").namespace(NAMESPACE),
            &["method", "result"],
        )?;
        let duration_seconds = HistogramVec::new(
            opts!("cloud_api_duration_seconds", "Cloud API call latency in seconds")
                .namespace(NAMESPACE)
                .into(),
            &["method"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(duration_seconds.clone()))?;
        Ok(Self {
            inner,
            requests_total,
            duration_seconds,
        })
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    async fn observe<T, F>(&self, method: &str, call: F) -> Result<T, CloudError>
    where
        F: Future<Output = Result<T, CloudError>>,
    {
        let start = Instant::now();
        let result = call.await;
        self.duration_seconds
            .with_label_values(&[method])
            .observe(start.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(_) => "success",
            Err(CloudError::NotFound(_)) => "not_found",
            Err(_) => "error",
        };
        self.requests_total.with_label_values(&[method, outcome]).inc();
        result
    }
}

#[async_trait::async_trait]
impl<B: CloudBackend> CloudBackend for MetricsBackend<B> {
    fn provider(&self) -> &'static str {
        self.inner.provider()
    }

    async fn init(&self) -> Result<(), CloudError> {
        self.observe("init", self.inner.init()).await
    }

    async fn get_vm_info(&self, node_ip: &str) -> Result<VmInfo, CloudError> {
        self.observe("get_vm_info", self.inner.get_vm_info(node_ip)).await
    }

    async fn get_max_eni_index(&self, node_ip: &str) -> Result<u32, CloudError> {
        self.observe("get_max_eni_index", self.inner.get_max_eni_index(node_ip)).await
    }

    async fn get_eni_limit(&self, node_ip: &str) -> Result<EniLimit, CloudError> {
        self.observe("get_eni_limit", self.inner.get_eni_limit(node_ip)).await
    }

    async fn create_eni(&self, name: &str, subnet_id: &str, primary_ip: &str, ip_num: u32) -> Result<EniInfo, CloudError> {
        self.observe("create_eni", self.inner.create_eni(name, subnet_id, primary_ip, ip_num)).await
    }

    async fn attach_eni(&self, index: u32, eni_id: &str, instance_id: &str, mac: &str) -> Result<EniAttachment, CloudError> {
        self.observe("attach_eni", self.inner.attach_eni(index, eni_id, instance_id, mac)).await
    }

    async fn detach_eni(&self, eni_id: &str, attachment: &EniAttachment) -> Result<(), CloudError> {
        self.observe("detach_eni", self.inner.detach_eni(eni_id, attachment)).await
    }

    async fn delete_eni(&self, eni_id: &str) -> Result<(), CloudError> {
        self.observe("delete_eni", self.inner.delete_eni(eni_id)).await
    }

    async fn query_eni(&self, eni_id: &str) -> Result<EniInfo, CloudError> {
        self.observe("query_eni", self.inner.query_eni(eni_id)).await
    }

    async fn find_eni(&self, name: &str) -> Result<Option<EniInfo>, CloudError> {
        self.observe("find_eni", self.inner.find_eni(name)).await
    }
}
