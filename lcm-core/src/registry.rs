//! Image pull secrets for cloud-managed container registries
use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::{
    api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::ObjectMeta, ByteString,
};
use serde::{Deserialize, Serialize};

/// Username the managed registries expect alongside an OAuth access token.
pub const REGISTRY_USERNAME: &str = "oauth2accesstoken";
/// Secret type understood by the kubelet for image pulls.
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
/// Data key holding the docker config in a [`DOCKER_CONFIG_JSON_TYPE`] secret.
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
/// Label marking secrets written by this server.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Whether images from `domain` are served by a cloud-managed registry
///
/// Container Registry (`gcr.io` and its regional `*.gcr.io` hosts) and
/// Artifact Registry (`<region>-docker.pkg.dev`) both accept the caller's
/// access token as a pull credential.
pub fn is_managed_registry(domain: &str) -> bool {
    let host = domain.split(':').next().unwrap_or(domain);
    host == "gcr.io" || host.ends_with(".gcr.io") || host.ends_with("docker.pkg.dev")
}

/// The deterministic secret name used for pulls from `domain`
///
/// ```
/// assert_eq!(lcm_core::registry::pull_secret_name("eu.gcr.io"), "registry-eu-gcr-io");
/// ```
pub fn pull_secret_name(domain: &str) -> String {
    let sanitized: String = domain
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("registry-{sanitized}")
}

/// A `~/.docker/config.json` document
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DockerConfig {
    /// Credentials keyed by registry domain
    pub auths: BTreeMap<String, DockerAuth>,
}

/// Credentials for a single registry
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DockerAuth {
    /// Registry username
    pub username: String,
    /// Registry password, here a bearer token
    pub password: String,
    /// Unused by modern registries, kept for compatibility
    pub email: String,
    /// Base64 of `username:password`
    pub auth: String,
}

impl DockerConfig {
    /// Config authenticating against `domain` with an OAuth access token
    pub fn bearer(domain: &str, token: &str) -> Self {
        let auth = DockerAuth {
            username: REGISTRY_USERNAME.to_owned(),
            password: token.to_owned(),
            email: String::new(),
            auth: STANDARD.encode(format!("{REGISTRY_USERNAME}:{token}")),
        };
        Self {
            auths: BTreeMap::from([(domain.to_owned(), auth)]),
        }
    }

    /// Wrap the config in a pull secret
    ///
    /// The secret data holds the raw JSON; the API server handles the base64 encoding.
    pub fn into_secret(
        self,
        name: &str,
        namespace: &str,
        manager: &str,
    ) -> Result<Secret, serde_json::Error> {
        let json = serde_json::to_vec(&self)?;
        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(namespace.to_owned()),
                labels: Some(BTreeMap::from([(MANAGED_BY_LABEL.to_owned(), manager.to_owned())])),
                ..ObjectMeta::default()
            },
            type_: Some(DOCKER_CONFIG_JSON_TYPE.to_owned()),
            data: Some(BTreeMap::from([(
                DOCKER_CONFIG_JSON_KEY.to_owned(),
                ByteString(json),
            )])),
            ..Secret::default()
        })
    }
}
