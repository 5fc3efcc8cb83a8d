//! Deployment orchestrator
//!
//! The push workflow takes a directory of sources to a running, routed
//! application: repository, webhook, manifests, certificate, git push,
//! staging and finally the workload itself. Steps run in a fixed order and
//! the first failure ends the push.
//!
//! `upload` is the server-side half used by the REST surface: it stops once
//! the sources are in the repository and leaves staging to the caller.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context as _, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::applications::workload_selector;
use super::logs::{follow_pods, LogLine};
use super::{organizations, sources, staging};
use crate::context::Context;
use crate::domain::app::{default_route, AppRef, GitRef};
use crate::domain::push::{PushConfig, PushPhase, PushStep, StepResult};
use crate::domain::retry::{poll_until, PollError};
use crate::domain::staging::{StageOutcome, StageRequest};
use crate::error::{CarrierError, CarrierResult};
use crate::infrastructure::certificates::{create_certificate, TlsIssuer};
use crate::k8s::{all_ready, is_bad_state, pod_statuses, PodStatus};
use crate::observability::{EventMetadata, PushTracker};

/// Where a pushed application ended up
#[derive(Debug)]
pub struct PushOutcome {
    pub app: AppRef,
    pub route: String,
    pub git: GitRef,
    pub stage_id: String,
    pub results: Vec<StepResult>,
}

/// Response of a source upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub git: GitRef,
    pub route: String,
}

/// Values produced by earlier steps for later ones
#[derive(Default)]
struct PushState {
    route: Option<String>,
    sources: Option<TempDir>,
    git: Option<GitRef>,
    stage_id: Option<String>,
}

fn produced<'a, T>(value: &'a Option<T>, what: &str) -> Result<&'a T> {
    value
        .as_ref()
        .with_context(|| format!("{} is not available yet", what))
}

/// Service running the push workflow
pub struct DeploymentService {
    ctx: Context,
}

impl DeploymentService {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Execute a full push
    pub async fn push(&self, config: PushConfig) -> Result<PushOutcome> {
        config.validate().map_err(|errors| {
            anyhow::anyhow!("Invalid push configuration:\n  {}", errors.join("\n  "))
        })?;

        let app = AppRef::new(&config.org, &config.app);
        self.print_header(&config);

        let mut tracker = PushTracker::new(EventMetadata::new(&app.org, &app.name));
        tracker.emit_started(PushStep::ALL.iter().map(|s| s.name().to_string()).collect());

        let mut state = PushState::default();
        let mut results = Vec::new();
        let mut tailer = None;

        for step in PushStep::ALL {
            if config.tail_logs && step.tails_logs() && tailer.is_none() {
                tailer = Some(scopeguard::guard(tail_logs(&self.ctx, &app), |handle| {
                    handle.abort()
                }));
            }

            info!("{} Starting: {}", step.emoji(), step.name());
            tracker.start_step(step.name());

            let start = Instant::now();
            let result = self.execute_step(&config, &app, step, &mut state).await;
            let duration = start.elapsed();

            match result {
                Ok(()) => {
                    info!(
                        "{} {} completed in {:.1}s",
                        "✅".green(),
                        step.name(),
                        duration.as_secs_f64()
                    );
                    tracker.complete_step();
                    results.push(StepResult::success(step, duration));
                }
                Err(e) => {
                    let msg = format!("{:#}", e);
                    info!("{} {} failed: {}", "❌".red(), step.name(), msg);
                    results.push(StepResult::failure(step, duration, &msg));
                    tracker.fail_step();
                    for rest in PushStep::ALL.iter().skip_while(|s| **s != step).skip(1) {
                        tracker.skip_step(rest.name());
                    }
                    tracker.emit_failed(step.name().to_string(), msg);

                    // Stop on first failure
                    self.print_summary(&app, &results, PushPhase::Failed(step));
                    return Err(e.context(format!("{} failed", step.name())));
                }
            }
        }
        drop(tailer);

        let route = produced(&state.route, "route")?.clone();
        let git = produced(&state.git, "pushed revision")?.clone();
        let stage_id = produced(&state.stage_id, "stage id")?.clone();

        tracker.emit_completed(route.clone(), git.revision.clone());
        self.print_summary(&app, &results, PushPhase::Completed);

        Ok(PushOutcome {
            app,
            route,
            git,
            stage_id,
            results,
        })
    }

    /// Execute a single push step
    async fn execute_step(
        &self,
        config: &PushConfig,
        app: &AppRef,
        step: PushStep,
        state: &mut PushState,
    ) -> Result<()> {
        match step {
            PushStep::ValidateOrg => self.step_validate_org(app).await,
            PushStep::CreateRepo => self.step_create_repo(app).await,
            PushStep::CreateWebhook => self.step_create_webhook(app).await,
            PushStep::DefaultRoute => {
                let route = default_route(&app.name, &self.ctx.config.domain);
                info!("Route: https://{}", route);
                state.route = Some(route);
                Ok(())
            }
            PushStep::PrepareCode => {
                let route = produced(&state.route, "route")?;
                let dir = sources::prepare(&config.source, app, route, &self.ctx.config.kubernetes)
                    .context("failed to prepare code")?;
                state.sources = Some(dir);
                Ok(())
            }
            PushStep::Certificate => {
                let route = produced(&state.route, "route")?;
                self.step_certificate(app, route).await
            }
            PushStep::GitPush => {
                let dir = produced(&state.sources, "prepared sources")?;
                let git = sources::push(&self.ctx, app, dir.path())
                    .await
                    .context("failed to git push code")?;
                state.git = Some(git);
                Ok(())
            }
            PushStep::Stage => {
                let request = StageRequest {
                    app: app.clone(),
                    instances: config.instances,
                    git: produced(&state.git, "pushed revision")?.clone(),
                    route: produced(&state.route, "route")?.clone(),
                };
                let id = staging::stage(&self.ctx, &app.name, &request)
                    .await
                    .context("failed to start staging")?;
                info!("Staging run: {}", id);
                state.stage_id = Some(id);
                Ok(())
            }
            PushStep::WaitForStaging => {
                let id = produced(&state.stage_id, "stage id")?;
                self.step_wait_for_staging(app, id).await
            }
            PushStep::WaitForApp => {
                let pods = wait_for_app(&self.ctx, app)
                    .await
                    .context("waiting for app failed")?;
                info!("{} of {} pods ready", pods.len(), pods.len());
                Ok(())
            }
        }
    }

    async fn step_validate_org(&self, app: &AppRef) -> Result<()> {
        organizations::ensure_exists(&self.ctx, &app.org)
            .await
            .context("Unable to push")
    }

    async fn step_create_repo(&self, app: &AppRef) -> Result<()> {
        let created = self
            .ctx
            .repository
            .ensure_repo(&app.org, &app.name)
            .await
            .context("create repo failed")?;
        if created {
            info!("Created repository {}", app);
        } else {
            info!("Repository {} already exists", app);
        }
        Ok(())
    }

    async fn step_create_webhook(&self, app: &AppRef) -> Result<()> {
        let created = self
            .ctx
            .repository
            .ensure_webhook(&app.org, &app.name)
            .await
            .context("webhook configuration failed")?;
        if !created {
            debug!("Webhook of {} already configured", app);
        }
        Ok(())
    }

    async fn step_certificate(&self, app: &AppRef, route: &str) -> Result<()> {
        let issuer = create_certificate(
            self.ctx.cluster.as_ref(),
            &self.ctx.config.certificates,
            &app.org,
            &app.name,
            route,
        )
        .await;

        match issuer {
            Ok(TlsIssuer::Production { cluster_issuer }) => {
                info!("Production certificate requested from {}", cluster_issuer);
                Ok(())
            }
            Ok(TlsIssuer::LocalCa { issuer, .. }) => {
                info!("Local certificate requested from {}", issuer);
                Ok(())
            }
            Err(e) => Err(e).context("create ssl certificate failed"),
        }
    }

    async fn step_wait_for_staging(&self, app: &AppRef, id: &str) -> Result<()> {
        let spinner = crate::ui::spinner(format!("Waiting for staging run {}", id));
        let outcome = staging::wait_until_staged(&self.ctx, app, id).await;
        spinner.finish_and_clear();

        let tracker = PushTracker::new(EventMetadata::new(&app.org, &app.name));
        match outcome.context("waiting for staging failed")? {
            StageOutcome::Succeeded => {
                tracker.emit_stage_finished(id, None);
                Ok(())
            }
            StageOutcome::Failed(message) => {
                tracker.emit_stage_finished(id, Some(&message));
                anyhow::bail!("staging run {} failed: {}", id, message)
            }
        }
    }

    fn print_header(&self, config: &PushConfig) {
        println!();
        println!(
            "{}",
            "╔════════════════════════════════════════════════════════════╗".bright_blue()
        );
        println!(
            "{}",
            format!("║  Push: {:<52}║", format!("{}/{}", config.org, config.app)).bright_blue()
        );
        println!(
            "{}",
            "╚════════════════════════════════════════════════════════════╝".bright_blue()
        );
        println!();
        info!("Sources: {}", config.source.display());
        info!("Organization: {}", config.org);
        println!();
    }

    fn print_summary(&self, app: &AppRef, results: &[StepResult], phase: PushPhase) {
        println!();
        println!(
            "{}",
            "════════════════════════════════════════════════════════════".bright_blue()
        );

        match phase {
            PushPhase::Completed => {
                println!(
                    "{}",
                    format!("✅ App is online: {}", app).bright_green().bold()
                );
            }
            PushPhase::Failed(step) => {
                println!(
                    "{}",
                    format!("❌ Push failed at {}: {}", step.name(), app)
                        .bright_red()
                        .bold()
                );
            }
        }

        println!();
        for result in results {
            let status = if result.success { "✅" } else { "❌" };
            println!(
                "   {} {} ({:.1}s)",
                status,
                result.step.name(),
                result.duration.as_secs_f64()
            );
            if let Some(message) = &result.message {
                println!("      {}", message.dimmed());
            }
        }
        println!();
    }
}

/// Wait until the application's pods exist and are all ready.
///
/// Pods stuck in a state they will not recover from (image pull errors,
/// crash loops) fail the wait immediately.
pub async fn wait_for_app(ctx: &Context, app: &AppRef) -> CarrierResult<Vec<PodStatus>> {
    let selector = workload_selector(app);
    let selector = selector.as_str();
    let namespace = app.org.as_str();
    let timeouts = &ctx.config.timeouts;

    let created = poll_until(&timeouts.app_built_policy(), move || async move {
        let pods = ctx.cluster.list_pods(namespace, selector).await?;
        Ok::<_, CarrierError>((!pods.is_empty()).then_some(()))
    })
    .await;
    match created {
        Ok(()) => debug!("Pods of {} exist", app),
        Err(PollError::Probe(e)) => return Err(e),
        Err(PollError::Timeout(after)) => {
            return Err(CarrierError::Timeout {
                what: format!("pods of {} to be created", app),
                after,
            })
        }
    }

    let ready = poll_until(&timeouts.pod_ready_policy(), move || async move {
        let statuses = pod_statuses(&ctx.cluster.list_pods(namespace, selector).await?);
        if let Some(bad) = statuses.iter().find(|p| is_bad_state(p)) {
            let reason = bad
                .container_state
                .as_ref()
                .and_then(|s| s.reason.clone())
                .unwrap_or_default();
            return Err(CarrierError::internal(format!(
                "pod {} is failing: {}",
                bad.name, reason
            )));
        }
        Ok::<_, CarrierError>(all_ready(&statuses).then_some(statuses))
    })
    .await;

    match ready {
        Ok(statuses) => Ok(statuses),
        Err(PollError::Probe(e)) => Err(e),
        Err(PollError::Timeout(after)) => Err(CarrierError::Timeout {
            what: format!("pods of {} to come online", app),
            after,
        }),
    }
}

/// `[pod] line`, pod name dimmed
pub fn print_log_line(line: &LogLine) {
    println!("{} {}", format!("[{}]", line.pod).dimmed(), line.line);
}

/// Follow the logs of staging and workload pods of `app` until aborted
pub fn tail_logs(ctx: &Context, app: &AppRef) -> JoinHandle<()> {
    let cluster = ctx.cluster.clone();
    let interval = ctx.config.timeouts.poll_interval;
    let targets = vec![
        (ctx.staging_namespace().to_string(), app.selector()),
        (app.org.clone(), workload_selector(app)),
    ];

    let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();
    tokio::spawn(async move {
        let printer = async move {
            while let Some(line) = rx.recv().await {
                print_log_line(&line);
            }
        };
        tokio::join!(follow_pods(cluster, targets, interval, true, tx), printer);
    })
}

/// Put uploaded sources (a zip archive) into the application's repository.
///
/// Creates the repository and webhook as needed and renders the manifests
/// for the default route. Staging is left to the caller.
pub async fn upload(ctx: &Context, org: &str, name: &str, archive: &[u8]) -> CarrierResult<UploadOutcome> {
    organizations::ensure_exists(ctx, org).await?;
    let app = AppRef::new(org, name);

    ctx.repository.ensure_repo(org, name).await?;
    ctx.repository.ensure_webhook(org, name).await?;

    let route = default_route(name, &ctx.config.domain);

    let unpacked = tempfile::Builder::new()
        .prefix("carrier-upload")
        .tempdir()
        .context("can't create temp directory")?;
    sources::unpack_zip(archive, unpacked.path())
        .context("failed to unpack app sources to temp location")?;

    let prepared = prepare_root(unpacked.path(), &app, &route, ctx)?;
    let git = sources::push(ctx, &app, prepared.path()).await?;

    info!("Uploaded {} at {}", app, git.revision);
    Ok(UploadOutcome { git, route })
}

/// Prepare the sources below `dir`, descending into a lone top-level directory
fn prepare_root(dir: &Path, app: &AppRef, route: &str, ctx: &Context) -> CarrierResult<TempDir> {
    let entries: Vec<_> = std::fs::read_dir(dir)
        .context("failed to read unpacked sources")?
        .filter_map(|e| e.ok())
        .collect();
    let root = match entries.as_slice() {
        [only] if only.path().is_dir() => only.path(),
        _ => dir.to_path_buf(),
    };
    Ok(sources::prepare(&root, app, route, &ctx.config.kubernetes)?)
}
