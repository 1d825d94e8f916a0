use std::sync::Arc;

use async_trait::async_trait;
use lcm_client::{crd::IAMPartialPolicy, KubeBackend, Result};
use lcm_core::iam::{service_account_email, workload_identity_member, WORKLOAD_IDENTITY_USER_ROLE};
use tracing::debug;

use super::BindingResolver;
use crate::locator::Workload;

const SERVICE_ACCOUNT_KIND: &str = "IAMServiceAccount";

/// Follows Config Connector `IAMPartialPolicy` objects granting the workload
/// identity role to the service account
pub struct CustomResourceResolver {
    project_id: String,
    kube: Arc<dyn KubeBackend>,
}

impl CustomResourceResolver {
    /// Resolve bindings declared for `project_id`
    pub fn new(project_id: &str, kube: Arc<dyn KubeBackend>) -> Self {
        Self {
            project_id: project_id.to_owned(),
            kube,
        }
    }

    async fn search(&self, namespace: Option<&str>, member: &str) -> Result<Option<String>> {
        let policies = self.kube.partial_policies(namespace).await?;
        for policy in policies
            .iter()
            .filter(|p| p.grants(WORKLOAD_IDENTITY_USER_ROLE, member))
        {
            if let Some(email) = self.target_email(policy).await? {
                return Ok(Some(email));
            }
        }
        Ok(None)
    }

    /// Email of the service account `policy` applies to
    async fn target_email(&self, policy: &IAMPartialPolicy) -> Result<Option<String>> {
        let target = &policy.spec.resource_ref;
        if target.kind != SERVICE_ACCOUNT_KIND {
            return Ok(None);
        }
        if let Some(external) = target.external.as_deref() {
            return Ok(Some(external_email(external).to_owned()));
        }
        let Some(name) = target.name.as_deref() else {
            return Ok(None);
        };
        let namespace = target
            .namespace
            .as_deref()
            .or(policy.metadata.namespace.as_deref())
            .unwrap_or_default();
        let Some(sa) = self.kube.iam_service_account(namespace, name).await? else {
            debug!(namespace, name, "referenced IAMServiceAccount does not exist");
            return Ok(None);
        };
        let account_id = sa.spec.resource_id.as_deref().unwrap_or(name);
        Ok(Some(service_account_email(account_id, &self.project_id)))
    }
}

/// The email in an external reference, which may be a full resource name
fn external_email(external: &str) -> &str {
    match external.rfind("serviceAccounts/") {
        Some(idx) => &external[idx + "serviceAccounts/".len()..],
        None => external,
    }
}

#[async_trait]
impl BindingResolver for CustomResourceResolver {
    async fn resolve(&self, workload: &Workload) -> Result<Option<String>> {
        let member = workload_identity_member(&self.project_id, &workload.namespace, &workload.service_account);
        if let Some(email) = self.search(Some(&workload.namespace), &member).await? {
            return Ok(Some(email));
        }
        self.search(None, &member).await
    }
}
