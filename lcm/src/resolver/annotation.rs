use std::sync::Arc;

use async_trait::async_trait;
use lcm_client::{CloudBackend, KubeBackend, Result};
use lcm_core::{
    iam::{workload_identity_member, WORKLOAD_IDENTITY_USER_ROLE},
    metadata::GSA_ANNOTATION,
};
use tracing::warn;

use super::BindingResolver;
use crate::locator::Workload;

/// Reads the cloud identity from the service account annotation, then checks
/// that the identity's policy really admits the service account
pub struct AnnotationResolver {
    project_id: String,
    kube: Arc<dyn KubeBackend>,
    cloud: Arc<dyn CloudBackend>,
}

impl AnnotationResolver {
    /// Resolve bindings declared for `project_id`
    pub fn new(project_id: &str, kube: Arc<dyn KubeBackend>, cloud: Arc<dyn CloudBackend>) -> Self {
        Self {
            project_id: project_id.to_owned(),
            kube,
            cloud,
        }
    }
}

#[async_trait]
impl BindingResolver for AnnotationResolver {
    async fn resolve(&self, workload: &Workload) -> Result<Option<String>> {
        let Some(ksa) = self
            .kube
            .service_account(&workload.namespace, &workload.service_account)
            .await?
        else {
            return Ok(None);
        };
        let Some(email) = ksa
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(GSA_ANNOTATION))
            .filter(|e| !e.is_empty())
        else {
            return Ok(None);
        };

        let member = workload_identity_member(&self.project_id, &workload.namespace, &workload.service_account);
        let policy = self.cloud.get_iam_policy(email).await?;
        if !policy.has_member(WORKLOAD_IDENTITY_USER_ROLE, &member) {
            warn!(
                namespace = %workload.namespace,
                ksa = %workload.service_account,
                email = %email,
                "annotated identity does not grant workload identity"
            );
            return Ok(None);
        }
        Ok(Some(email.clone()))
    }
}
