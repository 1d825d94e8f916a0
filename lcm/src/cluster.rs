//! Facts about the surrounding cluster and project, looked up once
use std::sync::Arc;

use lcm_client::{CloudBackend, KubeBackend};
use lcm_core::Project;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The cloud project, resolved on first use
///
/// A failed lookup is not remembered, so the next request tries again.
#[derive(Clone)]
pub struct ProjectCache {
    project_id: String,
    cloud: Arc<dyn CloudBackend>,
    project: Arc<OnceCell<Project>>,
}

impl ProjectCache {
    /// Look up `project_id` through `cloud` when first needed
    pub fn new(project_id: &str, cloud: Arc<dyn CloudBackend>) -> Self {
        Self {
            project_id: project_id.to_owned(),
            cloud,
            project: Arc::new(OnceCell::new()),
        }
    }

    /// The configured project id
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// The project record
    pub async fn get(&self) -> Result<&Project> {
        let (cloud, project_id) = (&self.cloud, self.project_id.as_str());
        self.project
            .get_or_try_init(move || async move {
                let project = cloud
                    .search_project(project_id)
                    .await
                    .map_err(Error::cloud)?
                    .ok_or_else(|| Error::NotFound(format!("project {project_id}")))?;
                debug!(project_id, name = %project.name, "resolved project");
                Ok(project)
            })
            .await
    }
}

/// Cluster IP of the Service fronting this server
pub async fn own_service_ip(kube: &dyn KubeBackend, namespace: &str, name: &str) -> Result<String> {
    let service = kube
        .service(namespace, name)
        .await
        .map_err(Error::kube)?
        .ok_or_else(|| Error::NotFound(format!("service {namespace}/{name}")))?;
    let ip = service
        .spec
        .and_then(|s| s.cluster_ip)
        .filter(|ip| !ip.is_empty() && ip != "None")
        .ok_or_else(|| Error::Malformed(format!("service {namespace}/{name} has no cluster ip")))?;
    info!(namespace, name, %ip, "resolved own service address");
    Ok(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCloud, FakeKube};

    #[tokio::test]
    async fn project_is_looked_up_once() {
        let cloud = Arc::new(FakeCloud::default());
        let cache = ProjectCache::new("project", cloud.clone());
        assert_eq!(cache.get().await.unwrap().numeric_id(), "424242");
        cloud.set_project(None);
        assert_eq!(cache.get().await.unwrap().project_id, "project");
    }

    #[tokio::test]
    async fn missing_project_is_retried() {
        let cloud = Arc::new(FakeCloud::default());
        let cache = ProjectCache::new("elsewhere", cloud.clone());
        assert!(matches!(cache.get().await, Err(Error::NotFound(_))));
        cloud.set_project(Some(Project {
            name: "projects/7".into(),
            project_id: "elsewhere".into(),
            display_name: None,
        }));
        assert_eq!(cache.get().await.unwrap().numeric_id(), "7");
    }

    #[tokio::test]
    async fn service_ip_is_read_from_spec() {
        let kube = FakeKube::default();
        kube.add_service("lcm-system", "lcm", "10.96.0.53");
        assert_eq!(own_service_ip(&kube, "lcm-system", "lcm").await.unwrap(), "10.96.0.53");
        assert!(matches!(
            own_service_ip(&kube, "lcm-system", "other").await,
            Err(Error::NotFound(_))
        ));
        kube.add_service("lcm-system", "headless", "None");
        assert!(matches!(
            own_service_ip(&kube, "lcm-system", "headless").await,
            Err(Error::Malformed(_))
        ));
    }
}
