//! The Google Cloud side of the server
//!
//! [`GoogleClient`] speaks the REST surface of IAM, IAM credentials, resource
//! manager and OAuth2 token info over a type-erased [`tower`] service. Every
//! call authenticates as the server itself, using the [`Credentials`] it was
//! built with.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Method, Request, Response,
};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::{client::legacy::Client as HyperClient, rt::TokioExecutor};
use lcm_core::{iam::service_account_resource, AccessToken, Policy, Project};
use secrecy::SecretString;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tower::{buffer::Buffer, util::BoxService, BoxError, Service, ServiceBuilder, ServiceExt};
use tracing::debug;

use crate::{error::GoogleErrorResponse, Error, Result};

pub mod auth;
use auth::Step;
pub use auth::{Credentials, OAuthError, CALLER_SCOPES};

const IAM_API: &str = "https://iam.googleapis.com/v1";
const IAM_CREDENTIALS_API: &str = "https://iamcredentials.googleapis.com/v1";
const RESOURCE_MANAGER_API: &str = "https://cloudresourcemanager.googleapis.com/v3";
const TOKEN_INFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Google Cloud operations the metadata server depends on
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// The project with id `project_id`, if visible to the caller
    async fn search_project(&self, project_id: &str) -> Result<Option<Project>>;

    /// The IAM policy attached to the service account `email`
    async fn get_iam_policy(&self, email: &str) -> Result<Policy>;

    /// Replace the IAM policy of the service account `email`
    async fn set_iam_policy(&self, email: &str, policy: &Policy) -> Result<Policy>;

    /// The subset of `permissions` the caller holds on the service account `email`
    async fn test_iam_permissions(&self, email: &str, permissions: &[&str]) -> Result<Vec<String>>;

    /// Mint an access token for `email`
    async fn generate_access_token(
        &self,
        email: &str,
        scopes: &[String],
        lifetime: Duration,
    ) -> Result<AccessToken>;

    /// Mint an identity token for `email` addressed to `audience`
    async fn generate_id_token(&self, email: &str, audience: &str) -> Result<String>;

    /// The email the caller authenticates as
    async fn caller_email(&self) -> Result<String>;

    /// An access token for the caller itself
    async fn caller_access_token(&self) -> Result<SecretString>;

    /// Every service account in `project_id`
    async fn list_service_accounts(&self, project_id: &str) -> Result<Vec<CloudServiceAccount>>;
}

/// A Google service account as listed by IAM
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloudServiceAccount {
    /// Resource name
    #[serde(default)]
    pub name: String,
    /// Account email
    pub email: String,
    /// Numeric id
    #[serde(default)]
    pub unique_id: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Whether the account is disabled
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectPage {
    #[serde(default)]
    projects: Vec<Project>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountPage {
    #[serde(default)]
    accounts: Vec<CloudServiceAccount>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct Permissions {
    #[serde(default)]
    permissions: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedAccessToken {
    access_token: String,
    expire_time: DateTime<Utc>,
}

#[derive(Deserialize)]
struct GeneratedIdToken {
    token: String,
}

#[derive(Deserialize)]
struct TokenInfo {
    email: Option<String>,
}

/// [`CloudBackend`] speaking the Google REST APIs
#[derive(Clone)]
pub struct GoogleClient {
    // - `Buffer` for cheap clone
    // - `BoxService` for dynamic response future type
    inner: Buffer<Request<Bytes>, BoxFuture<'static, Result<Response<Bytes>, BoxError>>>,
    credentials: Arc<Credentials>,
}

impl GoogleClient {
    /// Create a [`GoogleClient`] on top of a custom HTTP `Service`
    pub fn new<S>(service: S, credentials: Credentials) -> Self
    where
        S: Service<Request<Bytes>, Response = Response<Bytes>> + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
    {
        let service = service.map_err(|e| e.into());
        Self {
            inner: Buffer::new(BoxService::new(service), 1024),
            credentials: Arc::new(credentials),
        }
    }

    /// Create a [`GoogleClient`] using HTTPS with the platform's trust roots
    pub fn try_default(credentials: Credentials) -> Result<Self> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| Error::Service(e.into()))?
            .https_only()
            .enable_http1()
            .build();
        let client = HyperClient::builder(TokioExecutor::new()).build(https);
        let service = ServiceBuilder::new()
            .map_request(|req: Request<Bytes>| req.map(Full::new))
            .service(client)
            .map_err(|e| -> BoxError { Box::new(e) })
            .and_then(|res: Response<Incoming>| async move {
                let (parts, body) = res.into_parts();
                let bytes = body.collect().await?.to_bytes();
                Ok::<_, BoxError>(Response::from_parts(parts, bytes))
            });
        Ok(Self::new(service, credentials))
    }

    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let mut svc = self.inner.clone();
        svc.ready()
            .await
            .map_err(Error::Service)?
            .call(request)
            .await
            .map_err(Error::Service)
    }

    async fn bearer(&self) -> Result<String> {
        match self.credentials.start()? {
            Step::Token(token) => Ok(token),
            Step::Request { request, scope_hash } => {
                let res = self.send(request.map(Bytes::from)).await.map_err(|err| match err {
                    Error::Service(e) => Error::OAuth(OAuthError::TokenEndpoint(e)),
                    err => err,
                })?;
                Ok(self.credentials.finish(scope_hash, res)?)
            }
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: Request<Bytes>) -> Result<T> {
        let method = request.method().clone();
        let uri = request.uri().clone();
        let res = self.send(request).await?;
        let status = res.status();
        if !status.is_success() {
            let err = GoogleErrorResponse::from_body(status.as_u16(), res.body());
            debug!(%method, %uri, code = err.code, status = %err.status, "google api error");
            return Err(Error::Api(err));
        }
        serde_json::from_slice(res.body()).map_err(Error::SerdeError)
    }

    async fn get<T: DeserializeOwned>(&self, uri: &str) -> Result<T> {
        let token = self.bearer().await?;
        let req = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Bytes::new())
            .map_err(Error::HttpError)?;
        self.execute(req).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, uri: &str, body: &B) -> Result<T> {
        let token = self.bearer().await?;
        let body = serde_json::to_vec(body).map_err(Error::SerdeError)?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/json")
            .body(Bytes::from(body))
            .map_err(Error::HttpError)?;
        self.execute(req).await
    }
}

fn account_url(api: &str, email: &str, method: &str) -> String {
    format!("{api}/{}:{method}", service_account_resource(email))
}

#[async_trait]
impl CloudBackend for GoogleClient {
    async fn search_project(&self, project_id: &str) -> Result<Option<Project>> {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("query", &format!("id:{project_id}"))
            .finish();
        let page: ProjectPage = self
            .get(&format!("{RESOURCE_MANAGER_API}/projects:search?{query}"))
            .await?;
        Ok(page.projects.into_iter().next())
    }

    async fn get_iam_policy(&self, email: &str) -> Result<Policy> {
        self.post(&account_url(IAM_API, email, "getIamPolicy"), &json!({}))
            .await
    }

    async fn set_iam_policy(&self, email: &str, policy: &Policy) -> Result<Policy> {
        self.post(&account_url(IAM_API, email, "setIamPolicy"), &json!({ "policy": policy }))
            .await
    }

    async fn test_iam_permissions(&self, email: &str, permissions: &[&str]) -> Result<Vec<String>> {
        let granted: Permissions = self
            .post(
                &account_url(IAM_API, email, "testIamPermissions"),
                &json!({ "permissions": permissions }),
            )
            .await?;
        Ok(granted.permissions)
    }

    async fn generate_access_token(
        &self,
        email: &str,
        scopes: &[String],
        lifetime: Duration,
    ) -> Result<AccessToken> {
        let body = json!({
            "scope": scopes,
            "lifetime": format!("{}s", lifetime.as_secs()),
        });
        let token: GeneratedAccessToken = self
            .post(&account_url(IAM_CREDENTIALS_API, email, "generateAccessToken"), &body)
            .await?;
        Ok(AccessToken {
            token: token.access_token,
            expires_at: token.expire_time,
        })
    }

    async fn generate_id_token(&self, email: &str, audience: &str) -> Result<String> {
        let body = json!({ "audience": audience, "includeEmail": true });
        let token: GeneratedIdToken = self
            .post(&account_url(IAM_CREDENTIALS_API, email, "generateIdToken"), &body)
            .await?;
        Ok(token.token)
    }

    async fn caller_email(&self) -> Result<String> {
        let token = self.bearer().await?;
        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("access_token", &token)
            .finish();
        let req = Request::builder()
            .method(Method::POST)
            .uri(TOKEN_INFO_URL)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Bytes::from(form))
            .map_err(Error::HttpError)?;
        let info: TokenInfo = self.execute(req).await?;
        info.email.ok_or(Error::MissingField("email"))
    }

    async fn caller_access_token(&self) -> Result<SecretString> {
        Ok(SecretString::from(self.bearer().await?))
    }

    async fn list_service_accounts(&self, project_id: &str) -> Result<Vec<CloudServiceAccount>> {
        let mut accounts = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let uri = {
                let mut query = form_urlencoded::Serializer::new(String::new());
                query.append_pair("pageSize", "100");
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
                format!("{IAM_API}/projects/{project_id}/serviceAccounts?{}", query.finish())
            };
            let page: AccountPage = self.get(&uri).await?;
            accounts.extend(page.accounts);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        debug!(project_id, count = accounts.len(), "listed service accounts");
        Ok(accounts)
    }
}
