//! Backends for the lcm metadata server
//!
//! Two narrow contracts sit between the engine and the outside world:
//!
//! - [`KubeBackend`] for the handful of Kubernetes reads and writes the
//!   server performs, implemented by [`KubeClient`] on top of [`kube::Client`]
//! - [`CloudBackend`] for the Google Cloud IAM, IAM credentials, resource
//!   manager and OAuth2 calls, implemented by [`GoogleClient`]
//!
//! Config Connector resources are typed in [`crd`].
//!
//! ```rust,no_run
//! use lcm_client::{gcp::Credentials, GoogleClient, KubeBackend, KubeClient};
//!
//! # async fn doc() -> Result<(), Box<dyn std::error::Error>> {
//! let kube = KubeClient::new(kube::Client::try_default().await?, "lcm");
//! let pods = kube.pods_with_ip("10.4.0.12").await?;
//!
//! let google = GoogleClient::try_default(Credentials::application_default()?)?;
//! # Ok(())
//! # }
//! ```
#![deny(unsafe_code)]

pub mod crd;
pub mod error;
pub mod gcp;
pub mod kubernetes;

pub use error::{Error, GoogleErrorResponse, Result};
pub use gcp::{CloudBackend, GoogleClient};
pub use kubernetes::{KubeBackend, KubeClient};
