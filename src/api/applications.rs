//! Application endpoints: registry, bindings, uploads and staging

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{ApiError, ApiResult};
use crate::context::Context;
use crate::domain::app::{AppRef, Application};
use crate::domain::staging::{StageOutcome, StageRequest, StageRun};
use crate::services::{
    applications, bindings, deployment, logs, organizations, staging, UploadOutcome,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub instances: i32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BindRequest {
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    #[serde(rename = "unboundservices")]
    pub unbound_services: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StageRef {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StageResponse {
    pub stage: StageRef,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub follow: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WaitResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// GET /orgs/:org/applications
pub async fn index(
    State(ctx): State<Context>,
    Path(org): Path<String>,
) -> ApiResult<Json<Vec<Application>>> {
    organizations::ensure_exists(&ctx, &org).await?;
    Ok(Json(applications::list(&ctx, &org).await?))
}

/// GET /orgs/:org/applications/:app
pub async fn show(
    State(ctx): State<Context>,
    Path((org, app)): Path<(String, String)>,
) -> ApiResult<Json<Application>> {
    organizations::ensure_exists(&ctx, &org).await?;
    Ok(Json(applications::get(&ctx, &org, &app).await?))
}

/// PATCH /orgs/:org/applications/:app
pub async fn update(
    State(ctx): State<Context>,
    Path((org, app)): Path<(String, String)>,
    payload: Result<Json<ScaleRequest>, JsonRejection>,
) -> ApiResult<Json<Application>> {
    let Json(request) = payload?;
    organizations::ensure_exists(&ctx, &org).await?;
    let app = applications::scale(&ctx, &AppRef::new(org, app), request.instances).await?;
    Ok(Json(app))
}

/// DELETE /orgs/:org/applications/:app
pub async fn delete(
    State(ctx): State<Context>,
    Path((org, app)): Path<(String, String)>,
) -> ApiResult<Json<DeleteResponse>> {
    organizations::ensure_exists(&ctx, &org).await?;
    let unbound_services = applications::delete(&ctx, &AppRef::new(org, app)).await?;
    Ok(Json(DeleteResponse { unbound_services }))
}

/// POST /orgs/:org/applications/:app/servicebindings
pub async fn bind(
    State(ctx): State<Context>,
    Path((org, app)): Path<(String, String)>,
    payload: Result<Json<BindRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = payload?;
    bindings::bind(&ctx, &org, &app, &request.names).await?;
    Ok(StatusCode::OK)
}

/// DELETE /orgs/:org/applications/:app/servicebindings/:service
pub async fn unbind(
    State(ctx): State<Context>,
    Path((org, app, service)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    bindings::unbind(&ctx, &org, &app, &service).await?;
    Ok(StatusCode::OK)
}

/// POST /orgs/:org/applications/:app/store
///
/// Expects the sources as a zip archive in the multipart field `file`.
pub async fn upload(
    State(ctx): State<Context>,
    Path((org, app)): Path<(String, String)>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadOutcome>> {
    info!("processing upload of {}/{}", org, app);

    let mut archive = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("can't read multipart file input: {}", e)))?
    {
        if field.name() == Some("file") {
            let data = field.bytes().await.map_err(|e| {
                ApiError::bad_request(format!("can't read multipart file input: {}", e))
            })?;
            archive = Some(data);
            break;
        }
    }
    let archive = archive.ok_or_else(|| ApiError::bad_request("can't read multipart file input"))?;

    Ok(Json(deployment::upload(&ctx, &org, &app, &archive).await?))
}

/// POST /orgs/:org/applications/:app/stage
pub async fn stage(
    State(ctx): State<Context>,
    Path((org, app)): Path<(String, String)>,
    payload: Result<Json<StageRequest>, JsonRejection>,
) -> ApiResult<Json<StageResponse>> {
    let Json(request) = payload.map_err(|e| {
        ApiError::bad_request(format!(
            "Failed to construct an Application from the request: {}",
            e.body_text()
        ))
    })?;
    organizations::ensure_exists(&ctx, &org).await?;
    if request.app.org != org {
        return Err(ApiError::bad_request(
            "org parameter from URL does not match org param in body",
        ));
    }

    let id = staging::stage(&ctx, &app, &request).await?;
    Ok(Json(StageResponse {
        stage: StageRef { id },
    }))
}

/// GET /orgs/:org/applications/:app/stage/:id
pub async fn stage_status(
    State(ctx): State<Context>,
    Path((org, app, id)): Path<(String, String, String)>,
) -> ApiResult<Json<StageRun>> {
    Ok(Json(
        staging::stage_status(&ctx, &AppRef::new(org, app), &id).await?,
    ))
}

/// GET /orgs/:org/applications/:app/stage/:id/wait
///
/// Blocks until the run is terminal; a failed run is a successful response
/// carrying the failure message.
pub async fn wait_until_staged(
    State(ctx): State<Context>,
    Path((org, app, id)): Path<(String, String, String)>,
) -> ApiResult<Json<WaitResponse>> {
    let outcome = staging::wait_until_staged(&ctx, &AppRef::new(org, app), &id).await?;
    Ok(Json(match outcome {
        StageOutcome::Succeeded => WaitResponse::default(),
        StageOutcome::Failed(message) => WaitResponse {
            error_message: Some(message),
        },
    }))
}

/// GET /orgs/:org/applications/:app/logs
///
/// Streams newline-delimited JSON `{pod, line}` objects. With `follow=true`
/// the response stays open and picks up new pods.
pub async fn logs(
    State(ctx): State<Context>,
    Path((org, app)): Path<(String, String)>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let lines = logs::app_logs(&ctx, &AppRef::new(org, app), query.follow).await?;

    let body = futures::stream::unfold(lines, |mut lines| async move {
        let line = lines.recv().await?;
        let mut json = serde_json::to_string(&line).unwrap_or_default();
        json.push('\n');
        Some((Ok::<_, Infallible>(json), lines))
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(body),
    )
        .into_response())
}
