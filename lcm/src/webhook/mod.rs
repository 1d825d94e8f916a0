//! Mutating admission webhook for pods
use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use bytes::Bytes;
use k8s_openapi::api::core::v1::Pod;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    DynamicObject,
};
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    server::Context,
};

mod patches;
pub use patches::PodMutator;

/// Routes of the webhook
pub fn router() -> Router<Arc<Context>> {
    Router::new().route("/webhook/mutate", post(mutate))
}

async fn mutate(State(ctx): State<Arc<Context>>, body: Bytes) -> Result<Json<AdmissionReview<DynamicObject>>> {
    let review: AdmissionReview<Pod> = serde_json::from_slice(&body)
        .map_err(|e| Error::BadRequest(format!("invalid admission review: {e}")))?;
    let req: AdmissionRequest<Pod> = review
        .try_into()
        .map_err(|e| Error::BadRequest(format!("invalid admission review: {e}")))?;
    let res = AdmissionResponse::from(&req);

    let Some(mut pod) = req.object else {
        debug!(uid = %req.uid, "no pod in request, allowing unchanged");
        return Ok(Json(res.into_review()));
    };
    if pod.metadata.namespace.is_none() {
        pod.metadata.namespace = req.namespace.clone();
    }

    let patch = ctx.mutator.compute_patches(&pod, req.dry_run).await?;
    info!(
        uid = %req.uid,
        pod = pod.metadata.name.as_deref().or(pod.metadata.generate_name.as_deref()),
        namespace = pod.metadata.namespace.as_deref(),
        operations = patch.operations().len(),
        "mutating pod"
    );
    if patch.is_empty() {
        return Ok(Json(res.into_review()));
    }
    let res = res
        .with_patch(patch.into_patch())
        .map_err(|e| Error::Malformed(format!("patch: {e}")))?;
    Ok(Json(res.into_review()))
}
