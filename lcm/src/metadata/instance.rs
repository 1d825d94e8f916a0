use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Response,
};

use super::{listing, text};
use crate::{
    error::{Error, Result},
    server::Context,
};

pub(super) async fn project() -> Response {
    listing(&["project-id", "numeric-project-id"])
}

pub(super) async fn project_id(State(ctx): State<Arc<Context>>) -> Response {
    text(ctx.project.project_id())
}

pub(super) async fn numeric_project_id(State(ctx): State<Arc<Context>>) -> Result<Response> {
    let project = ctx.project.get().await?;
    Ok(text(project.numeric_id()))
}

pub(super) async fn instance() -> Response {
    listing(&["attributes/", "hostname", "id", "service-accounts/", "zone"])
}

pub(super) async fn hostname(State(ctx): State<Arc<Context>>) -> Response {
    text(ctx.config.hostname())
}

pub(super) async fn id(State(ctx): State<Arc<Context>>) -> Response {
    text(ctx.config.instance_id.as_str())
}

pub(super) async fn zone(State(ctx): State<Arc<Context>>) -> Result<Response> {
    let project = ctx.project.get().await?;
    Ok(text(format!(
        "projects/{}/zones/{}",
        project.numeric_id(),
        ctx.config.instance_zone
    )))
}

pub(super) async fn attributes() -> Response {
    listing(&["cluster-location", "cluster-name", "cluster-uid"])
}

pub(super) async fn attribute(State(ctx): State<Arc<Context>>, Path(key): Path<String>) -> Result<Response> {
    let value = match key.as_str() {
        "cluster-location" => &ctx.config.cluster_location,
        "cluster-name" => &ctx.config.cluster_name,
        "cluster-uid" => &ctx.config.cluster_uid,
        _ => return Err(Error::NotFound(format!("attribute {key}"))),
    };
    Ok(text(value.as_str()))
}
