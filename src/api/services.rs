//! Service endpoints

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use crate::backing::Details;
use crate::context::Context;
use crate::services::{bindings, instances, CatalogRequest, ServiceEntry};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CustomRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub unbind: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    #[serde(rename = "boundapps")]
    pub bound_apps: Vec<String>,
}

/// GET /orgs/:org/services
pub async fn index(
    State(ctx): State<Context>,
    Path(org): Path<String>,
) -> ApiResult<Json<Vec<ServiceEntry>>> {
    Ok(Json(instances::index(&ctx, &org).await?))
}

/// GET /orgs/:org/services/:service
pub async fn show(
    State(ctx): State<Context>,
    Path((org, service)): Path<(String, String)>,
) -> ApiResult<Json<Details>> {
    Ok(Json(instances::show(&ctx, &org, &service).await?))
}

/// POST /orgs/:org/services
pub async fn create(
    State(ctx): State<Context>,
    Path(org): Path<String>,
    payload: Result<Json<CatalogRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = payload?;
    instances::create_catalog(&ctx, &org, &request).await?;
    Ok(StatusCode::CREATED)
}

/// POST /orgs/:org/custom-services
pub async fn create_custom(
    State(ctx): State<Context>,
    Path(org): Path<String>,
    payload: Result<Json<CustomRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = payload?;
    instances::create_custom(&ctx, &org, &request.name, &request.data).await?;
    Ok(StatusCode::CREATED)
}

/// DELETE /orgs/:org/services/:service
///
/// The body is optional; without one bound applications block the delete.
pub async fn delete(
    State(ctx): State<Context>,
    Path((org, service)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<DeleteResponse>> {
    let request: DeleteRequest = if body.is_empty() {
        DeleteRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?
    };

    let bound_apps = bindings::delete_service(&ctx, &org, &service, request.unbind).await?;
    Ok(Json(DeleteResponse { bound_apps }))
}
