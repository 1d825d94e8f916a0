use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use tame_oauth::gcp::{
    ServiceAccountInfo, ServiceAccountProvider, TokenOrRequest, TokenProvider, TokenProviderWrapper,
};
use thiserror::Error;

/// Scopes requested for the server's own credentials.
pub const CALLER_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/userinfo.email",
];

/// Failures obtaining the server's own Google credentials
#[derive(Error, Debug)]
pub enum OAuthError {
    /// Neither the environment, gcloud nor a metadata server had credentials
    #[error("no application default credentials found")]
    NoCredentials,

    /// The configured key file could not be read
    #[error("reading key file: {0}")]
    ReadKeyfile(#[source] std::io::Error),

    /// The key file is not a usable service account key
    #[error("invalid key file: {0}")]
    InvalidKeyfile(#[source] tame_oauth::Error),

    /// The token endpoint could not be reached
    #[error("token endpoint unreachable: {0}")]
    TokenEndpoint(#[source] tower::BoxError),

    /// The provider could not build a token request or accept its response
    #[error("token exchange failed: {0}")]
    Exchange(#[source] tame_oauth::Error),
}

/// Where the server's own Google credentials come from
pub enum Credentials {
    /// Application default credentials: environment, gcloud, or the metadata server
    Default(TokenProviderWrapper),
    /// A service account key file
    Keyfile(ServiceAccountProvider),
    /// A fixed bearer token, for emulators and tests
    Static(SecretString),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Default(_) => "Default",
            Self::Keyfile(_) => "Keyfile",
            Self::Static(_) => "Static",
        };
        f.debug_tuple("Credentials").field(&kind).finish()
    }
}

impl Credentials {
    /// Discover application default credentials
    pub fn application_default() -> Result<Self, OAuthError> {
        match TokenProviderWrapper::get_default_provider() {
            Ok(Some(provider)) => Ok(Self::Default(provider)),
            Ok(None) => Err(OAuthError::NoCredentials),
            Err(err) => Err(OAuthError::Exchange(err)),
        }
    }

    /// Load a service account key file
    pub fn from_keyfile(path: impl AsRef<Path>) -> Result<Self, OAuthError> {
        let data = std::fs::read_to_string(path).map_err(OAuthError::ReadKeyfile)?;
        let info = ServiceAccountInfo::deserialize(data).map_err(OAuthError::InvalidKeyfile)?;
        let provider = ServiceAccountProvider::new(info).map_err(OAuthError::InvalidKeyfile)?;
        Ok(Self::Keyfile(provider))
    }

    /// Credentials from a key file when given, application defaults otherwise
    pub fn from_optional_keyfile(path: Option<&Path>) -> Result<Self, OAuthError> {
        match path {
            Some(path) => Self::from_keyfile(path),
            None => Self::application_default(),
        }
    }
}

/// Outcome of asking a provider for a token
pub(crate) enum Step {
    /// A cached token was available
    Token(String),
    /// The provider needs this request sent, with the response fed to `finish`
    Request {
        request: http::Request<Vec<u8>>,
        scope_hash: u64,
    },
}

impl Credentials {
    pub(crate) fn start(&self) -> Result<Step, OAuthError> {
        let res = match self {
            Self::Default(p) => p.get_token(CALLER_SCOPES),
            Self::Keyfile(p) => p.get_token(CALLER_SCOPES),
            Self::Static(token) => return Ok(Step::Token(token.expose_secret().to_owned())),
        };
        match res {
            Ok(TokenOrRequest::Token(token)) => Ok(Step::Token(token.access_token)),
            Ok(TokenOrRequest::Request {
                request, scope_hash, ..
            }) => Ok(Step::Request { request, scope_hash }),
            Err(err) => Err(OAuthError::Exchange(err)),
        }
    }

    pub(crate) fn finish(
        &self,
        scope_hash: u64,
        response: http::Response<bytes::Bytes>,
    ) -> Result<String, OAuthError> {
        let res = match self {
            Self::Default(p) => p.parse_token_response(scope_hash, response),
            Self::Keyfile(p) => p.parse_token_response(scope_hash, response),
            Self::Static(token) => return Ok(token.expose_secret().to_owned()),
        };
        match res {
            Ok(token) => Ok(token.access_token),
            Err(err) => Err(OAuthError::Exchange(err)),
        }
    }
}
