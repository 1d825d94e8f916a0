//! Error handling in [`lcm_client`][crate]
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::gcp::auth::OAuthError;

/// Possible errors when talking to a backend
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API call failed
    #[error("KubeError: {0}")]
    Kube(#[source] kube::Error),

    /// A Google API answered with an error status
    #[error("GoogleApiError: {0} ({0:?})")]
    Api(#[source] GoogleErrorResponse),

    /// Transport failure towards a Google API
    #[error("ServiceError: {0}")]
    Service(#[source] tower::BoxError),

    /// Http based error
    #[error("HttpError: {0}")]
    HttpError(#[source] http::Error),

    /// Common error case when requesting parsing into own structs
    #[error("Error deserializing response: {0}")]
    SerdeError(#[source] serde_json::Error),

    /// Obtaining the caller's own credentials failed
    #[error("OAuthError: {0}")]
    OAuth(#[source] OAuthError),

    /// An object handed to the backend lacks a required field
    #[error("object is missing {0}")]
    MissingField(&'static str),
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Self::Kube(err)
    }
}

impl From<OAuthError> for Error {
    fn from(err: OAuthError) -> Self {
        Self::OAuth(err)
    }
}

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error body returned by Google REST APIs
#[derive(Error, Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[error("{message}: {status}")]
pub struct GoogleErrorResponse {
    /// HTTP status code
    pub code: u16,
    /// Human readable description
    #[serde(default)]
    pub message: String,
    /// Canonical status, e.g. `PERMISSION_DENIED`
    #[serde(default)]
    pub status: String,
}

#[derive(Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub(crate) error: GoogleErrorResponse,
}

impl GoogleErrorResponse {
    /// Whether the API reported a missing resource
    pub fn is_not_found(&self) -> bool {
        self.code == 404
    }

    /// Parse an error body, falling back to the bare status code
    pub(crate) fn from_body(code: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(envelope) => envelope.error,
            Err(_) => Self {
                code,
                message: String::from_utf8_lossy(body).into_owned(),
                status: String::new(),
            },
        }
    }
}
