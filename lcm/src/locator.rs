//! Maps a caller's source address to the pod it belongs to
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use lcm_client::KubeBackend;
use tracing::debug;

use crate::{
    cache::Cache,
    error::{Error, Result},
};

/// Service account a pod runs as when its spec names none.
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// An active pod and the Kubernetes service account it runs as
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
    /// Pod IP the workload was located by
    pub ip: String,
    /// Name of the pod's service account
    pub service_account: String,
}

impl Workload {
    /// Describe `pod`, found at `ip`
    pub fn from_pod(pod: &Pod, ip: &str) -> Self {
        let service_account = pod
            .spec
            .as_ref()
            .and_then(|s| s.service_account_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_owned());
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            ip: ip.to_owned(),
            service_account,
        }
    }
}

/// Looks up workloads by IP, remembering every hit for the life of the process
#[derive(Clone)]
pub struct WorkloadLocator {
    kube: Arc<dyn KubeBackend>,
    by_ip: Cache<String, Workload>,
}

impl WorkloadLocator {
    /// Locate workloads through `kube`
    pub fn new(kube: Arc<dyn KubeBackend>) -> Self {
        Self {
            kube,
            by_ip: Cache::new(),
        }
    }

    /// The workload holding `ip`
    pub async fn locate(&self, ip: &str) -> Result<Workload> {
        if let Some(workload) = self.by_ip.get(ip) {
            return Ok(workload);
        }
        let pods = self.kube.pods_with_ip(ip).await.map_err(Error::kube)?;
        let pod = pods
            .first()
            .ok_or_else(|| Error::NotFound(format!("no pod with ip {ip}")))?;
        let workload = Workload::from_pod(pod, ip);
        debug!(
            ip,
            pod = %workload.name,
            namespace = %workload.namespace,
            ksa = %workload.service_account,
            "located workload"
        );
        self.by_ip.insert(ip.to_owned(), workload.clone());
        Ok(workload)
    }
}
