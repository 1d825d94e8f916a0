//! Error handling in [`lcm`][crate]
use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Why a request could not be served
#[derive(Error, Debug)]
pub enum Error {
    /// The caller or a resource it refers to does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The request did not carry the metadata protocol headers
    #[error("forbidden")]
    Forbidden,

    /// The request could not be understood
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A backend call failed
    #[error("{backend} backend failed: {source}")]
    Upstream {
        /// `kubernetes` or `cloud`
        backend: &'static str,
        /// The backend's error
        #[source]
        source: lcm_client::Error,
    },

    /// An object was structurally unusable
    #[error("malformed: {0}")]
    Malformed(String),
}

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Wrap a failure of the Kubernetes backend
    pub fn kube(source: lcm_client::Error) -> Self {
        Self::Upstream {
            backend: "kubernetes",
            source,
        }
    }

    /// Wrap a failure of the cloud backend
    pub fn cloud(source: lcm_client::Error) -> Self {
        Self::Upstream {
            backend: "cloud",
            source,
        }
    }

    /// HTTP status the error is reported with
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { .. } | Self::Malformed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = match &self {
            Self::Forbidden => "Forbidden".to_owned(),
            other => other.to_string(),
        };
        (status, [(CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
    }
}
