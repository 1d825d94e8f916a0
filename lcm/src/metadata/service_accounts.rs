use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use lcm_core::token::DEFAULT_SCOPES;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{listing, text};
use crate::{
    error::{Error, Result},
    server::Context,
};

const DEFAULT_ACCOUNT: &str = "default";

#[derive(Deserialize, Debug, Default)]
pub(super) struct AccountQuery {
    #[serde(default)]
    recursive: Option<String>,
    #[serde(default)]
    scopes: Option<String>,
    #[serde(default)]
    audience: Option<String>,
}

impl AccountQuery {
    fn recursive(&self) -> bool {
        self.recursive.as_deref() == Some("true")
    }
}

/// Recursive rendering of a service account directory
#[derive(Serialize, Debug, PartialEq)]
struct AccountInfo {
    aliases: Vec<&'static str>,
    email: String,
    scopes: Vec<&'static str>,
}

impl AccountInfo {
    fn new(email: &str) -> Self {
        Self {
            aliases: vec![DEFAULT_ACCOUNT],
            email: email.to_owned(),
            scopes: DEFAULT_SCOPES.to_vec(),
        }
    }
}

/// Email of the identity bound to the calling pod
async fn bound_email(ctx: &Context, caller: SocketAddr) -> Result<String> {
    let ip = caller.ip().to_canonical().to_string();
    let workload = ctx.locator.locate(&ip).await?;
    ctx.bindings.email_for(&workload).await.ok_or_else(|| {
        Error::NotFound(format!(
            "no service account bound to {}/{}",
            workload.namespace, workload.name
        ))
    })
}

/// Email of the account `acc` names, which must be the one bound to the caller
async fn requested_email(ctx: &Context, caller: SocketAddr, acc: &str) -> Result<String> {
    let email = bound_email(ctx, caller).await?;
    if acc != DEFAULT_ACCOUNT && acc != email {
        warn!(requested = acc, bound = %email, "service account not bound to caller");
        return Err(Error::NotFound(format!("service account {acc}")));
    }
    Ok(email)
}

pub(super) async fn list(
    State(ctx): State<Arc<Context>>,
    ConnectInfo(caller): ConnectInfo<SocketAddr>,
    Query(query): Query<AccountQuery>,
) -> Result<Response> {
    let email = bound_email(&ctx, caller).await?;
    if query.recursive() {
        let accounts = BTreeMap::from([
            (DEFAULT_ACCOUNT.to_owned(), AccountInfo::new(&email)),
            (email.clone(), AccountInfo::new(&email)),
        ]);
        return Ok(Json(accounts).into_response());
    }
    Ok(listing(&[format!("{DEFAULT_ACCOUNT}/").as_str(), format!("{email}/").as_str()]))
}

pub(super) async fn account_redirect(Path(acc): Path<String>) -> Redirect {
    Redirect::permanent(&format!("/computeMetadata/v1/instance/service-accounts/{acc}/"))
}

pub(super) async fn account(
    State(ctx): State<Arc<Context>>,
    ConnectInfo(caller): ConnectInfo<SocketAddr>,
    Path(acc): Path<String>,
    Query(query): Query<AccountQuery>,
) -> Result<Response> {
    let email = requested_email(&ctx, caller, &acc).await?;
    if query.recursive() {
        return Ok(Json(AccountInfo::new(&email)).into_response());
    }
    // trailing empty entry mirrors the real server
    Ok(listing(&["aliases", "email", "identity", "scopes", "token", ""]))
}

pub(super) async fn attribute(
    State(ctx): State<Arc<Context>>,
    ConnectInfo(caller): ConnectInfo<SocketAddr>,
    Path((acc, key)): Path<(String, String)>,
    Query(query): Query<AccountQuery>,
) -> Result<Response> {
    let email = requested_email(&ctx, caller, &acc).await?;
    debug!(%email, %key, "service account attribute requested");
    match key.as_str() {
        "aliases" => Ok(text(DEFAULT_ACCOUNT)),
        "email" => Ok(text(email)),
        "scopes" => Ok(text(DEFAULT_SCOPES.join(","))),
        "identity" => {
            let audience = query
                .audience
                .filter(|a| !a.is_empty())
                .ok_or_else(|| Error::BadRequest("non-empty audience parameter required".into()))?;
            let token = ctx.minter.identity_token(&email, &audience).await?;
            Ok(text(token))
        }
        "token" => {
            let scopes: Vec<String> = query
                .scopes
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .map(str::to_owned)
                .collect();
            let token = ctx.minter.access_token(&email, &scopes).await?;
            Ok(Json(token).into_response())
        }
        _ => Err(Error::NotFound(format!("attribute {key}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        server::router,
        testing::{pod, service_account, workload_identity_policy, FakeCloud, FakeKube},
    };
    use assert_json_diff::assert_json_eq;
    use axum::{
        body::{to_bytes, Body},
        extract::connect_info::MockConnectInfo,
        http::{header::CONTENT_TYPE, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const GSA: &str = "svc@project.iam.gserviceaccount.com";

    fn backends() -> (Arc<FakeKube>, Arc<FakeCloud>) {
        let kube = Arc::new(FakeKube::default());
        let cloud = Arc::new(FakeCloud::default());
        kube.add_pod(pod("web-0", "ns", "10.4.0.12", Some("ksa-a")));
        kube.add_service_account(service_account("ns", "ksa-a", Some(GSA)));
        cloud.set_policy(
            GSA,
            workload_identity_policy(&["serviceAccount:project.svc.id.goog[ns/ksa-a]"]),
        );
        cloud.permit(GSA);
        (kube, cloud)
    }

    struct Reply {
        status: StatusCode,
        content_type: Option<String>,
        body: String,
    }

    impl Reply {
        fn json(&self) -> Value {
            serde_json::from_str(&self.body).unwrap()
        }
    }

    async fn get(kube: Arc<FakeKube>, cloud: Arc<FakeCloud>, from: [u8; 4], path: &str) -> Reply {
        let ctx = Context::for_tests(kube, cloud);
        let app = router(ctx).layer(MockConnectInfo(SocketAddr::from((from, 40000))));
        let req = Request::get(path)
            .header("Metadata-Flavor", "Google")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_owned());
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        Reply {
            status,
            content_type,
            body: String::from_utf8(body.to_vec()).unwrap(),
        }
    }

    const CALLER: [u8; 4] = [10, 4, 0, 12];
    const ACCOUNTS: &str = "/computeMetadata/v1/instance/service-accounts/";

    #[tokio::test]
    async fn accounts_are_listed() {
        let (kube, cloud) = backends();
        let reply = get(kube, cloud, CALLER, ACCOUNTS).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, format!("default/\n{GSA}/"));
    }

    #[tokio::test]
    async fn recursive_listings_are_json() {
        let (kube, cloud) = backends();
        let reply = get(kube.clone(), cloud.clone(), CALLER, &format!("{ACCOUNTS}?recursive=true")).await;
        let info = json!({
            "aliases": ["default"],
            "email": GSA,
            "scopes": ["https://www.googleapis.com/auth/cloud-platform"]
        });
        assert_json_eq!(reply.json(), json!({ "default": info.clone(), GSA: info.clone() }));

        let reply = get(kube, cloud, CALLER, &format!("{ACCOUNTS}default/?recursive=true")).await;
        assert_json_eq!(reply.json(), info);
    }

    #[tokio::test]
    async fn account_directory_lists_attributes() {
        let (kube, cloud) = backends();
        let reply = get(kube, cloud, CALLER, &format!("{ACCOUNTS}{GSA}/")).await;
        assert_eq!(reply.body, "aliases\nemail\nidentity\nscopes\ntoken\n");
    }

    #[tokio::test]
    async fn email_leaf_is_plain_text() {
        let (kube, cloud) = backends();
        let reply = get(kube, cloud, CALLER, &format!("{ACCOUNTS}default/email")).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.content_type.as_deref(), Some("application/text"));
        assert_eq!(reply.body, GSA);
    }

    #[tokio::test]
    async fn other_accounts_are_not_found() {
        let (kube, cloud) = backends();
        let reply = get(
            kube,
            cloud,
            CALLER,
            &format!("{ACCOUNTS}other@project.iam.gserviceaccount.com/email"),
        )
        .await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_callers_and_unbound_pods_are_not_found() {
        let (kube, cloud) = backends();
        kube.add_pod(pod("lonely", "ns", "10.4.0.99", Some("nobody")));
        let stranger = get(kube.clone(), cloud.clone(), [10, 9, 9, 9], &format!("{ACCOUNTS}default/email")).await;
        assert_eq!(stranger.status, StatusCode::NOT_FOUND);
        let unbound = get(kube, cloud, [10, 4, 0, 99], &format!("{ACCOUNTS}default/email")).await;
        assert_eq!(unbound.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tokens_are_served_as_json() {
        let (kube, cloud) = backends();
        let reply = get(
            kube,
            cloud.clone(),
            CALLER,
            &format!("{ACCOUNTS}default/token?scopes=https://www.googleapis.com/auth/devstorage.read_only"),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);
        let token = reply.json();
        assert_eq!(
            token["access_token"],
            "ya29.1.https://www.googleapis.com/auth/devstorage.read_only"
        );
        assert_eq!(token["token_type"], "Bearer");
        assert!(token["expires_in"].as_i64().is_some());
        assert_eq!(cloud.mints(), 1);
    }

    #[tokio::test]
    async fn identity_requires_audience() {
        let (kube, cloud) = backends();
        let missing = get(kube.clone(), cloud.clone(), CALLER, &format!("{ACCOUNTS}default/identity")).await;
        assert_eq!(missing.status, StatusCode::BAD_REQUEST);
        let reply = get(
            kube,
            cloud,
            CALLER,
            &format!("{ACCOUNTS}default/identity?audience=https://api.example.com&format=full"),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, format!("eyJ.{GSA}.https://api.example.com.1"));
    }

    #[tokio::test]
    async fn mint_failures_are_server_errors() {
        let (kube, cloud) = backends();
        cloud.fail_mints();
        let reply = get(kube, cloud, CALLER, &format!("{ACCOUNTS}default/token")).await;
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn account_paths_redirect_to_directory() {
        let (kube, cloud) = backends();
        let ctx = Context::for_tests(kube, cloud);
        let app = router(ctx).layer(MockConnectInfo(SocketAddr::from((CALLER, 40000))));
        let req = Request::get(format!("{ACCOUNTS}default"))
            .header("Metadata-Flavor", "Google")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(res.headers()["location"], format!("{ACCOUNTS}default/"));
    }
}
