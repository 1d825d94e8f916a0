//! Process configuration, read from flags or the environment
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use lcm_core::MetadataType;

/// Strategy mapping a Kubernetes service account to a cloud identity
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResolverKind {
    /// `iam.gke.io/gcp-service-account` annotation, verified against IAM
    #[default]
    Annotation,
    /// Config Connector `IAMPartialPolicy` objects
    Crd,
    /// Scan of the project's service account policies
    Iam,
}

/// Configuration of the lcm server
#[derive(Parser, Clone, Debug)]
#[command(name = "lcm", version, about, long_about = None)]
pub struct Config {
    /// Port to serve metadata and webhook requests on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Metadata protocol to impersonate
    #[arg(long = "type", env = "TYPE", default_value = "google")]
    pub metadata_type: MetadataType,

    /// Id of the cloud project workloads belong to
    #[arg(long, env = "PROJECT_ID")]
    pub project_id: String,

    /// How service accounts are bound to cloud identities
    #[arg(long, env = "KSA_RESOLVER", value_enum, default_value_t = ResolverKind::Annotation)]
    pub ksa_resolver: ResolverKind,

    /// Service account key file; application default credentials when unset
    #[arg(long, env = "CLOUD_KEYFILE")]
    pub cloud_keyfile: Option<PathBuf>,

    /// Log filter, in `RUST_LOG` syntax
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Name of the Service fronting this server
    #[arg(long, env = "SERVICE_NAME", default_value = "lcm")]
    pub service_name: String,

    /// Namespace of the Service fronting this server
    #[arg(long, env = "SERVICE_NAMESPACE")]
    pub service_namespace: Option<String>,

    /// Namespace this server runs in, usually from the downward API
    #[arg(long, env = "POD_NAMESPACE", hide = true)]
    pub pod_namespace: Option<String>,

    /// Reported `instance/attributes/cluster-name`
    #[arg(long, env = "CLUSTER_NAME", default_value = "dev-cluster")]
    pub cluster_name: String,

    /// Reported `instance/attributes/cluster-location`
    #[arg(long, env = "CLUSTER_LOCATION", default_value = "europe-west1")]
    pub cluster_location: String,

    /// Reported `instance/attributes/cluster-uid`
    #[arg(long, env = "CLUSTER_UID", default_value = "1234567890")]
    pub cluster_uid: String,

    /// Reported `instance/id`
    #[arg(long, env = "INSTANCE_ID", default_value = "1234567890")]
    pub instance_id: String,

    /// Zone reported in `instance/zone`
    #[arg(long, env = "INSTANCE_ZONE", default_value = "europe-west1-d")]
    pub instance_zone: String,
}

impl Config {
    /// Namespace of the fronting Service
    pub fn service_namespace(&self) -> &str {
        self.service_namespace
            .as_deref()
            .or(self.pod_namespace.as_deref())
            .unwrap_or("default")
    }

    /// Reported `instance/hostname`
    pub fn hostname(&self) -> String {
        format!("node0.c.{}.internal", self.project_id)
    }

    #[cfg(test)]
    pub(crate) fn for_project(project_id: &str) -> Self {
        Self::parse_from(["lcm", "--project-id", project_id])
    }
}
