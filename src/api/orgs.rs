//! Organization and catalog endpoints

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::ApiResult;
use crate::backing::classes::{self, ServiceClass, ServicePlan};
use crate::context::Context;
use crate::services::organizations;

#[derive(Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrgRequest {
    #[serde(default)]
    pub name: String,
}

/// GET /info
pub async fn info() -> Json<InfoResponse> {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /orgs
pub async fn index(State(ctx): State<Context>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(organizations::list(&ctx).await?))
}

/// POST /orgs
pub async fn create(
    State(ctx): State<Context>,
    payload: Result<Json<CreateOrgRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = payload?;
    organizations::create(&ctx, &request.name).await?;
    Ok(StatusCode::CREATED)
}

/// DELETE /orgs/:org
pub async fn delete(State(ctx): State<Context>, Path(org): Path<String>) -> ApiResult<StatusCode> {
    organizations::delete(&ctx, &org).await?;
    Ok(StatusCode::OK)
}

/// GET /serviceclasses
pub async fn service_classes(State(ctx): State<Context>) -> ApiResult<Json<Vec<ServiceClass>>> {
    Ok(Json(classes::list_classes(&ctx).await?))
}

/// GET /serviceclasses/:class/serviceplans
pub async fn service_plans(
    State(ctx): State<Context>,
    Path(class): Path<String>,
) -> ApiResult<Json<Vec<ServicePlan>>> {
    Ok(Json(classes::list_plans(&ctx, &class).await?))
}
