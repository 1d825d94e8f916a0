//! Metadata protocol constants and the pod rewiring each metadata type needs
use std::{fmt, str::FromStr};

use k8s_openapi::api::core::v1::{EnvVar, HostAlias};
use thiserror::Error;

/// Header every metadata request and response carries.
pub const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
/// Value of [`METADATA_FLAVOR_HEADER`] for the Google metadata protocol.
pub const METADATA_FLAVOR_GOOGLE: &str = "Google";
/// Value of the `Server` header on metadata responses.
pub const SERVER_NAME: &str = "GKE Metadata Server";
/// Hostname SDKs resolve the metadata server under.
pub const METADATA_HOST: &str = "metadata.google.internal";
/// Environment variable some SDKs read the metadata server address from.
pub const METADATA_IP_ENV: &str = "GCE_METADATA_IP";
/// Environment variable some SDKs read the metadata server host from.
pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
/// Annotation on a Kubernetes service account naming its cloud identity.
pub const GSA_ANNOTATION: &str = "iam.gke.io/gcp-service-account";

/// The metadata protocol being impersonated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MetadataType {
    /// The GCE / GKE metadata server
    #[default]
    Google,
}

/// Failed to parse a [`MetadataType`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown metadata type: {0}")]
pub struct UnknownMetadataType(String);

impl FromStr for MetadataType {
    type Err = UnknownMetadataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Self::Google),
            other => Err(UnknownMetadataType(other.to_owned())),
        }
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Google => f.write_str("google"),
        }
    }
}

impl MetadataType {
    /// What a pod needs so that its SDKs reach the server at `service_ip`
    pub fn rewiring(&self, service_ip: &str) -> Rewiring {
        match self {
            Self::Google => Rewiring {
                host_aliases: vec![HostAlias {
                    ip: service_ip.to_owned(),
                    hostnames: Some(vec![METADATA_HOST.to_owned()]),
                }],
                env: vec![
                    EnvVar {
                        name: METADATA_IP_ENV.to_owned(),
                        value: Some(service_ip.to_owned()),
                        ..EnvVar::default()
                    },
                    EnvVar {
                        name: METADATA_HOST_ENV.to_owned(),
                        value: Some(METADATA_HOST.to_owned()),
                        ..EnvVar::default()
                    },
                ],
            },
        }
    }
}

/// Additions that route a pod's metadata traffic to this server
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rewiring {
    /// `/etc/hosts` entries for the metadata hostname
    pub host_aliases: Vec<HostAlias>,
    /// Environment variables advertising the server address
    pub env: Vec<EnvVar>,
}
