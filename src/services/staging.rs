//! Staging orchestrator
//!
//! Staging turns pushed sources into a running deployment by way of a
//! pipeline run in the staging namespace. At most one run per application
//! is in flight; a new request while one runs is refused.

use tracing::{debug, info};

use crate::context::Context;
use crate::domain::app::AppRef;
use crate::domain::retry::{poll_until, PollError};
use crate::domain::staging::{
    new_stage_id, StageOutcome, StageRequest, StageRun, StageState, DEFAULT_INSTANCES,
    STAGE_ID_LABEL,
};
use crate::error::{CarrierError, CarrierResult};
use crate::infrastructure::certificates::create_certificate;
use crate::infrastructure::pipeline::{PipelineRun, StagingParams};

fn run_selector(app: &AppRef, id: &str) -> String {
    format!("{},{}={}", app.selector(), STAGE_ID_LABEL, id)
}

/// Replica count of the live deployment, or the default for new apps
async fn existing_instances(ctx: &Context, app: &AppRef) -> CarrierResult<i32> {
    match ctx.cluster.get_deployment(&app.org, &app.name).await {
        Ok(deployment) => Ok(deployment
            .spec
            .and_then(|s| s.replicas)
            .unwrap_or(DEFAULT_INSTANCES)),
        Err(e) if e.is_not_found() => Ok(DEFAULT_INSTANCES),
        Err(e) => Err(e.into()),
    }
}

/// Start staging `request` for the application named `app_name`.
///
/// Returns the id of the new run without waiting for it.
pub async fn stage(ctx: &Context, app_name: &str, request: &StageRequest) -> CarrierResult<String> {
    if request.app.name != app_name {
        return Err(CarrierError::bad_request(
            "name parameter from URL does not match name param in body",
        ));
    }
    if matches!(request.instances, Some(n) if n < 0) {
        return Err(CarrierError::bad_request(
            "instances param should be integer equal or greater than zero",
        ));
    }

    let app = &request.app;
    let staging = ctx.staging_namespace();

    let runs = ctx.cluster.list_pipeline_runs(staging, &app.selector()).await?;
    if let Some(running) = runs.iter().find(|r| !r.is_terminal()) {
        debug!(
            "Run {} of {} is still {}",
            running.stage_id().unwrap_or_default(),
            app,
            running.state().name()
        );
        return Err(CarrierError::AlreadyStaging(app.to_string()));
    }

    let instances = match request.instances {
        Some(n) => n,
        None => existing_instances(ctx, app).await?,
    };

    let kubernetes = &ctx.config.kubernetes;
    let mut git = request.git.clone();
    if git.url.is_empty() {
        git.url = ctx.repository.repo_url(&app.org, &app.name);
    }

    let id = new_stage_id();
    let params = StagingParams {
        id: id.clone(),
        app: app.clone(),
        app_image: app.image_url(&kubernetes.registry_url, &git.revision),
        deployment_image: app.image_url(&kubernetes.deployment_registry, &git.revision),
        git,
        route: request.route.clone(),
        instances,
        service_account: kubernetes.staging_service_account.clone(),
        pipeline: kubernetes.staging_pipeline.clone(),
    };

    ctx.cluster
        .create_pipeline_run(staging, &PipelineRun::for_stage(&params))
        .await?;

    create_certificate(
        ctx.cluster.as_ref(),
        &ctx.config.certificates,
        &app.org,
        &app.name,
        &request.route,
    )
    .await?;

    info!("Staging {} as run {} ({} instances)", app, id, instances);
    Ok(id)
}

/// Delete the terminal runs of `app` other than `keep`
async fn prune_runs(ctx: &Context, app: &AppRef, keep: &str) -> CarrierResult<()> {
    let staging = ctx.staging_namespace();
    for run in ctx.cluster.list_pipeline_runs(staging, &app.selector()).await? {
        if run.stage_id() == Some(keep) || !run.is_terminal() {
            continue;
        }
        if let Some(name) = run.metadata.name.as_deref() {
            match ctx.cluster.delete_pipeline_run(staging, name).await {
                Ok(()) => debug!("Pruned staging run {}", name),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

/// Wait for run `id` to finish.
///
/// A failed run is reported as `StageOutcome::Failed` rather than an error.
/// After success, older runs of the application are removed.
pub async fn wait_until_staged(ctx: &Context, app: &AppRef, id: &str) -> CarrierResult<StageOutcome> {
    let staging = ctx.staging_namespace();
    let selector = run_selector(app, id);
    let selector = selector.as_str();

    let policy = ctx.config.timeouts.app_built_policy();
    let result = poll_until(&policy, move || async move {
        let runs = ctx.cluster.list_pipeline_runs(staging, selector).await?;
        let outcome = runs.iter().find_map(|run| match run.state() {
            StageState::Failed(message) => Some(StageOutcome::Failed(message)),
            StageState::Succeeded => Some(StageOutcome::Succeeded),
            StageState::Requested | StageState::Running => None,
        });
        Ok::<_, CarrierError>(outcome)
    })
    .await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(PollError::Probe(e)) => return Err(e),
        Err(PollError::Timeout(after)) => {
            return Err(CarrierError::Timeout {
                what: format!("staging run {} of {}", id, app),
                after,
            })
        }
    };

    match &outcome {
        StageOutcome::Succeeded => {
            prune_runs(ctx, app, id).await?;
            info!("Staging run {} of {} succeeded", id, app);
        }
        StageOutcome::Failed(message) => info!("Staging run {} of {} failed: {}", id, app, message),
    }
    Ok(outcome)
}

/// Current view of run `id`
pub async fn stage_status(ctx: &Context, app: &AppRef, id: &str) -> CarrierResult<StageRun> {
    let runs = ctx
        .cluster
        .list_pipeline_runs(ctx.staging_namespace(), &run_selector(app, id))
        .await?;
    runs.first()
        .map(PipelineRun::to_stage_run)
        .ok_or_else(|| CarrierError::NotFound(format!("Stage '{}' does not exist", id)))
}
