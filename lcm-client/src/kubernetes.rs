//! The Kubernetes side of the server
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret, Service, ServiceAccount};
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    Client,
};
use tracing::debug;

use crate::{
    crd::{IAMPartialPolicy, IAMServiceAccount},
    Error, Result,
};

/// Kubernetes operations the metadata server depends on
#[async_trait]
pub trait KubeBackend: Send + Sync {
    /// Pods in any namespace that currently hold `ip` and have not terminated
    async fn pods_with_ip(&self, ip: &str) -> Result<Vec<Pod>>;

    /// A service account, or `None` if it does not exist
    async fn service_account(&self, namespace: &str, name: &str) -> Result<Option<ServiceAccount>>;

    /// `IAMPartialPolicy` objects in `namespace`, or in every namespace when `None`
    async fn partial_policies(&self, namespace: Option<&str>) -> Result<Vec<IAMPartialPolicy>>;

    /// An `IAMServiceAccount`, or `None` if it does not exist
    async fn iam_service_account(&self, namespace: &str, name: &str) -> Result<Option<IAMServiceAccount>>;

    /// Create or overwrite `secret` through server-side apply
    async fn apply_secret(&self, secret: &Secret) -> Result<Secret>;

    /// A service, or `None` if it does not exist
    async fn service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;
}

/// [`KubeBackend`] backed by a [`kube::Client`]
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    manager: String,
}

impl KubeClient {
    /// Wrap `client`, applying objects under the field manager `manager`
    pub fn new(client: Client, manager: impl Into<String>) -> Self {
        Self {
            client,
            manager: manager.into(),
        }
    }
}

/// Field selector matching live pods that own `ip`
pub fn pod_ip_selector(ip: &str) -> String {
    format!("status.podIP={ip},status.phase!=Failed,status.phase!=Succeeded")
}

#[async_trait]
impl KubeBackend for KubeClient {
    async fn pods_with_ip(&self, ip: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let lp = ListParams::default().fields(&pod_ip_selector(ip));
        let list = pods.list(&lp).await?;
        debug!(ip, count = list.items.len(), "listed pods by ip");
        Ok(list.items)
    }

    async fn service_account(&self, namespace: &str, name: &str) -> Result<Option<ServiceAccount>> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn partial_policies(&self, namespace: Option<&str>) -> Result<Vec<IAMPartialPolicy>> {
        let api: Api<IAMPartialPolicy> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn iam_service_account(&self, namespace: &str, name: &str) -> Result<Option<IAMServiceAccount>> {
        let api: Api<IAMServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<Secret> {
        let name = secret.metadata.name.as_deref().ok_or(Error::MissingField("metadata.name"))?;
        let ns = secret
            .metadata
            .namespace
            .as_deref()
            .ok_or(Error::MissingField("metadata.namespace"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), ns);
        let pp = PatchParams::apply(&self.manager).force();
        let applied = api.patch(name, &pp, &Patch::Apply(secret)).await?;
        debug!(name, namespace = ns, "applied secret");
        Ok(applied)
    }

    async fn service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
