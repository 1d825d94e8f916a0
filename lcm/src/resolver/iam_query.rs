use std::sync::Arc;

use async_trait::async_trait;
use lcm_client::{CloudBackend, Result};
use lcm_core::iam::{workload_identity_member, WORKLOAD_IDENTITY_USER_ROLE};
use tracing::warn;

use super::BindingResolver;
use crate::locator::Workload;

/// Scans the policies of every service account in the project
pub struct IamQueryResolver {
    project_id: String,
    cloud: Arc<dyn CloudBackend>,
}

impl IamQueryResolver {
    /// Resolve bindings among the service accounts of `project_id`
    pub fn new(project_id: &str, cloud: Arc<dyn CloudBackend>) -> Self {
        Self {
            project_id: project_id.to_owned(),
            cloud,
        }
    }
}

#[async_trait]
impl BindingResolver for IamQueryResolver {
    async fn resolve(&self, workload: &Workload) -> Result<Option<String>> {
        let member = workload_identity_member(&self.project_id, &workload.namespace, &workload.service_account);
        let accounts = self.cloud.list_service_accounts(&self.project_id).await?;
        for account in accounts.iter().filter(|a| !a.disabled) {
            match self.cloud.get_iam_policy(&account.email).await {
                Ok(policy) if policy.has_member(WORKLOAD_IDENTITY_USER_ROLE, &member) => {
                    return Ok(Some(account.email.clone()));
                }
                Ok(_) => {}
                Err(err) => warn!(email = %account.email, error = %err, "skipping unreadable policy"),
            }
        }
        Ok(None)
    }
}
