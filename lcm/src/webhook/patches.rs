use std::{collections::HashSet, sync::Arc};

use k8s_openapi::api::core::v1::{Container, Pod};
use lcm_client::{CloudBackend, KubeBackend};
use lcm_core::{
    registry::{is_managed_registry, pull_secret_name, DockerConfig},
    ContainerKind, MetadataType, PodPatch, Rewiring,
};
use oci_client::Reference;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    FIELD_MANAGER,
};

const PULL_NEVER: &str = "Never";

/// Computes the patch rewiring a pod to this server
#[derive(Clone)]
pub struct PodMutator {
    kube: Arc<dyn KubeBackend>,
    cloud: Arc<dyn CloudBackend>,
    rewiring: Rewiring,
}

impl PodMutator {
    /// Rewire pods to `service_ip` for `metadata_type`
    pub fn new(
        kube: Arc<dyn KubeBackend>,
        cloud: Arc<dyn CloudBackend>,
        metadata_type: MetadataType,
        service_ip: &str,
    ) -> Self {
        Self {
            kube,
            cloud,
            rewiring: metadata_type.rewiring(service_ip),
        }
    }

    /// Patch operations for `pod`
    ///
    /// Containers come first, then init containers; each gets its pull secret
    /// reference followed by its environment. The host alias comes last. When
    /// `dry_run` is set no secret is written, but the patch is the same.
    pub async fn compute_patches(&self, pod: &Pod, dry_run: bool) -> Result<PodPatch> {
        let spec = pod
            .spec
            .as_ref()
            .ok_or_else(|| Error::Malformed("pod has no spec".into()))?;
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let mut patch = PodPatch::new(spec);
        let mut secrets = SecretWriter::new(self, namespace, dry_run);

        let containers = spec
            .containers
            .iter()
            .enumerate()
            .map(|(i, c)| (ContainerKind::Container, i, c));
        let init_containers = spec
            .init_containers
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, c)| (ContainerKind::InitContainer, i, c));
        for (kind, index, container) in containers.chain(init_containers) {
            if container.image_pull_policy.as_deref() == Some(PULL_NEVER) {
                continue;
            }
            if let Some(secret) = secrets.for_container(container).await? {
                patch.add_pull_secret(&secret);
            }
            patch.add_env(kind, index, container, &self.rewiring.env);
        }
        patch.add_host_aliases(&self.rewiring.host_aliases);

        debug!(
            pod = pod.metadata.name.as_deref().or(pod.metadata.generate_name.as_deref()),
            namespace,
            dry_run,
            operations = patch.operations().len(),
            "computed pod patch"
        );
        Ok(patch)
    }
}

/// Writes at most one pull secret per registry domain
struct SecretWriter<'a> {
    mutator: &'a PodMutator,
    namespace: &'a str,
    dry_run: bool,
    written: HashSet<String>,
    token: Option<SecretString>,
}

impl<'a> SecretWriter<'a> {
    fn new(mutator: &'a PodMutator, namespace: &'a str, dry_run: bool) -> Self {
        Self {
            mutator,
            namespace,
            dry_run,
            written: HashSet::new(),
            token: None,
        }
    }

    /// Name of the pull secret `container` needs, writing it on first sight
    async fn for_container(&mut self, container: &Container) -> Result<Option<String>> {
        let image = container
            .image
            .as_deref()
            .ok_or_else(|| Error::Malformed(format!("container {} has no image", container.name)))?;
        let image: Reference = image
            .parse()
            .map_err(|e| Error::Malformed(format!("container {} image {image}: {e}", container.name)))?;
        let domain = image.registry();
        if !is_managed_registry(domain) {
            return Ok(None);
        }
        let name = pull_secret_name(domain);
        if !self.dry_run && !self.written.contains(domain) {
            self.write(&name, domain).await?;
            self.written.insert(domain.to_owned());
        }
        Ok(Some(name))
    }

    async fn write(&mut self, name: &str, domain: &str) -> Result<()> {
        let token = match &self.token {
            Some(token) => token.clone(),
            None => {
                let token = self
                    .mutator
                    .cloud
                    .caller_access_token()
                    .await
                    .map_err(Error::cloud)?;
                self.token = Some(token.clone());
                token
            }
        };
        let secret = DockerConfig::bearer(domain, token.expose_secret())
            .into_secret(name, self.namespace, FIELD_MANAGER)
            .map_err(|e| Error::Malformed(format!("docker config: {e}")))?;
        self.mutator.kube.apply_secret(&secret).await.map_err(Error::kube)?;
        info!(secret = name, namespace = self.namespace, domain, "wrote pull secret");
        Ok(())
    }
}
