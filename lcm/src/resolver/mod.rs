//! Binding of Kubernetes service accounts to cloud identities
//!
//! Exactly one [`BindingResolver`] strategy is active per deployment, chosen
//! through [`ResolverKind`]. Its answers are remembered per workload by
//! [`Bindings`]; a workload found unbound is asked about again on the next
//! request.
use std::sync::Arc;

use async_trait::async_trait;
use lcm_client::{CloudBackend, KubeBackend};
use tracing::{debug, warn};

use crate::{cache::Cache, config::ResolverKind, locator::Workload};

mod annotation;
mod custom_resource;
mod iam_query;

pub use annotation::AnnotationResolver;
pub use custom_resource::CustomResourceResolver;
pub use iam_query::IamQueryResolver;

/// A strategy mapping a workload's service account to a cloud identity
#[async_trait]
pub trait BindingResolver: Send + Sync {
    /// The email of the identity `workload` may act as, `None` when unbound
    async fn resolve(&self, workload: &Workload) -> lcm_client::Result<Option<String>>;
}

/// Build the resolver selected by `kind`
pub fn resolver_for(
    kind: ResolverKind,
    project_id: &str,
    kube: Arc<dyn KubeBackend>,
    cloud: Arc<dyn CloudBackend>,
) -> Arc<dyn BindingResolver> {
    match kind {
        ResolverKind::Annotation => Arc::new(AnnotationResolver::new(project_id, kube, cloud)),
        ResolverKind::Crd => Arc::new(CustomResourceResolver::new(project_id, kube)),
        ResolverKind::Iam => Arc::new(IamQueryResolver::new(project_id, cloud)),
    }
}

/// Resolved bindings, cached by pod
#[derive(Clone)]
pub struct Bindings {
    resolver: Arc<dyn BindingResolver>,
    by_pod: Cache<(String, String), String>,
}

impl Bindings {
    /// Cache the answers of `resolver`
    pub fn new(resolver: Arc<dyn BindingResolver>) -> Self {
        Self {
            resolver,
            by_pod: Cache::new(),
        }
    }

    /// The identity bound to `workload`, if any
    ///
    /// Resolver failures are logged and reported as unbound.
    pub async fn email_for(&self, workload: &Workload) -> Option<String> {
        let key = (workload.namespace.clone(), workload.name.clone());
        if let Some(email) = self.by_pod.get(&key) {
            return Some(email);
        }
        match self.resolver.resolve(workload).await {
            Ok(Some(email)) => {
                debug!(
                    pod = %workload.name,
                    namespace = %workload.namespace,
                    ksa = %workload.service_account,
                    %email,
                    "resolved binding"
                );
                self.by_pod.insert(key, email.clone());
                Some(email)
            }
            Ok(None) => {
                warn!(
                    pod = %workload.name,
                    namespace = %workload.namespace,
                    ksa = %workload.service_account,
                    "no cloud identity bound"
                );
                None
            }
            Err(err) => {
                warn!(
                    pod = %workload.name,
                    namespace = %workload.namespace,
                    ksa = %workload.service_account,
                    error = %err,
                    "failed to resolve binding"
                );
                None
            }
        }
    }
}
