//! REST surface
//!
//! All routes live under `/api/v1` and exchange JSON. Handlers are thin:
//! they decode the request, call one service operation and encode its
//! result or its issues.

pub mod applications;
pub mod error;
pub mod orgs;
pub mod services;

use anyhow::{Context as _, Result};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::context::Context;

pub const API_PREFIX: &str = "/api/v1";

/// Build the router with every endpoint
pub fn router(ctx: Context) -> Router {
    let api = Router::new()
        .route("/info", get(orgs::info))
        .route("/orgs", get(orgs::index).post(orgs::create))
        .route("/orgs/:org", axum::routing::delete(orgs::delete))
        .route("/serviceclasses", get(orgs::service_classes))
        .route(
            "/serviceclasses/:class/serviceplans",
            get(orgs::service_plans),
        )
        .route(
            "/orgs/:org/services",
            get(services::index).post(services::create),
        )
        .route("/orgs/:org/custom-services", post(services::create_custom))
        .route(
            "/orgs/:org/services/:service",
            get(services::show).delete(services::delete),
        )
        .route("/orgs/:org/applications", get(applications::index))
        .route(
            "/orgs/:org/applications/:app",
            get(applications::show)
                .patch(applications::update)
                .delete(applications::delete),
        )
        .route(
            "/orgs/:org/applications/:app/servicebindings",
            post(applications::bind),
        )
        .route(
            "/orgs/:org/applications/:app/servicebindings/:service",
            axum::routing::delete(applications::unbind),
        )
        .route("/orgs/:org/applications/:app/logs", get(applications::logs))
        .route("/orgs/:org/applications/:app/store", post(applications::upload))
        .route("/orgs/:org/applications/:app/stage", post(applications::stage))
        .route(
            "/orgs/:org/applications/:app/stage/:id",
            get(applications::stage_status),
        )
        .route(
            "/orgs/:org/applications/:app/stage/:id/wait",
            get(applications::wait_until_staged),
        );

    Router::new()
        .nest(API_PREFIX, api)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Serve the API on `listen` until the process is stopped
pub async fn serve(ctx: Context, listen: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!("Listening on {}", listen);

    axum::serve(listener, router(ctx))
        .await
        .context("API server failed")
}
