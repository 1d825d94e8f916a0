//! The Google compute metadata protocol
//!
//! Only the subset of the tree that SDKs and `gcloud` consult is served:
//! project identifiers, a synthetic instance, and the service account of the
//! calling pod. The caller is identified by its source address.
use std::sync::Arc;

use axum::{
    extract::{OriginalUri, Request},
    http::{header::CONTENT_TYPE, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use http::header::SERVER;
use lcm_core::metadata::{METADATA_FLAVOR_GOOGLE, METADATA_FLAVOR_HEADER, SERVER_NAME};

use crate::{error::Error, server::Context};

mod instance;
mod service_accounts;

/// Root of the metadata tree.
pub const ROOT: &str = "/computeMetadata/v1/";
const TEXT_CONTENT_TYPE: &str = "application/text";
const FORWARDED_FOR: &str = "x-forwarded-for";

/// Routes of the metadata server, guarded by the protocol headers
///
/// Everything under `/computeMetadata` is a metadata request, so unknown
/// paths there are checked and branded like the rest of the tree.
pub fn router() -> Router<Arc<Context>> {
    let tree = Router::new()
        .route("/", get(|| redirect(ROOT)))
        .route("/v1", get(|| redirect(ROOT)))
        .route("/v1/", get(index))
        .route("/v1/project", get(|| redirect("/computeMetadata/v1/project/")))
        .route("/v1/project/", get(instance::project))
        .route("/v1/project/project-id", get(instance::project_id))
        .route("/v1/project/numeric-project-id", get(instance::numeric_project_id))
        .route("/v1/instance", get(|| redirect("/computeMetadata/v1/instance/")))
        .route("/v1/instance/", get(instance::instance))
        .route("/v1/instance/hostname", get(instance::hostname))
        .route("/v1/instance/id", get(instance::id))
        .route("/v1/instance/zone", get(instance::zone))
        .route(
            "/v1/instance/attributes",
            get(|| redirect("/computeMetadata/v1/instance/attributes/")),
        )
        .route("/v1/instance/attributes/", get(instance::attributes))
        .route("/v1/instance/attributes/{key}", get(instance::attribute))
        .route(
            "/v1/instance/service-accounts",
            get(|| redirect("/computeMetadata/v1/instance/service-accounts/")),
        )
        .route("/v1/instance/service-accounts/", get(service_accounts::list))
        .route(
            "/v1/instance/service-accounts/{acc}",
            get(service_accounts::account_redirect),
        )
        .route("/v1/instance/service-accounts/{acc}/", get(service_accounts::account))
        .route(
            "/v1/instance/service-accounts/{acc}/{key}",
            get(service_accounts::attribute),
        )
        .fallback(not_found);

    Router::new()
        .route("/", get(|| redirect(ROOT)))
        .nest("/computeMetadata", tree)
        .layer(middleware::from_fn(metadata_headers))
}

/// Reject requests that are not metadata requests, and brand the responses
async fn metadata_headers(request: Request, next: Next) -> Response {
    let flavored = request
        .headers()
        .get(METADATA_FLAVOR_HEADER)
        .is_some_and(|v| v == METADATA_FLAVOR_GOOGLE);
    let forwarded = request.headers().contains_key(FORWARDED_FOR);
    if !flavored || forwarded {
        return Error::Forbidden.into_response();
    }
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(METADATA_FLAVOR_HEADER, HeaderValue::from_static(METADATA_FLAVOR_GOOGLE));
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    response
}

async fn redirect(to: &'static str) -> Redirect {
    Redirect::permanent(to)
}

async fn not_found(OriginalUri(uri): OriginalUri) -> Error {
    Error::NotFound(format!("metadata path {}", uri.path()))
}

async fn index() -> Response {
    text("project/\ninstance/")
}

/// A bare value or a directory listing
pub(crate) fn text(body: impl Into<String>) -> Response {
    ([(CONTENT_TYPE, TEXT_CONTENT_TYPE)], body.into()).into_response()
}

/// Entries of a directory, one per line
pub(crate) fn listing(entries: &[&str]) -> Response {
    text(entries.join("\n"))
}

#[cfg(test)]
mod tests {
    use crate::{
        server::{router, Context},
        testing::{FakeCloud, FakeKube},
    };
    use axum::{
        body::Body,
        extract::connect_info::MockConnectInfo,
        http::{Request, Response, StatusCode},
    };
    use std::{net::SocketAddr, sync::Arc};
    use tower::ServiceExt;

    async fn send(req: Request<Body>) -> Response<Body> {
        let ctx = Context::for_tests(Arc::new(FakeKube::default()), Arc::new(FakeCloud::default()));
        let app = router(ctx).layer(MockConnectInfo(SocketAddr::from(([10, 4, 0, 12], 40000))));
        app.oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn unknown_paths_require_the_flavor_header() {
        let req = Request::get("/computeMetadata/v1/instance/nope/x")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(req).await.status(), StatusCode::FORBIDDEN);

        let req = Request::get("/computeMetadata/v2/anything")
            .header("Metadata-Flavor", "Google")
            .header("X-Forwarded-For", "203.0.113.7")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(req).await.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_paths_are_branded_not_found() {
        let req = Request::get("/computeMetadata/v1/instance/nope/x")
            .header("Metadata-Flavor", "Google")
            .body(Body::empty())
            .unwrap();
        let res = send(req).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.headers()["metadata-flavor"], "Google");
        assert_eq!(res.headers()["server"], "GKE Metadata Server");
    }
}
