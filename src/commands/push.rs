use anyhow::Result;
use std::path::PathBuf;

use crate::context::Context;
use crate::domain::push::PushConfig;
use crate::services::DeploymentService;
use crate::ui;

pub async fn execute(
    ctx: Context,
    org: String,
    name: String,
    path: PathBuf,
    instances: Option<i32>,
    no_logs: bool,
) -> Result<()> {
    let mut config = PushConfig::new(org, name, path);
    if let Some(instances) = instances {
        config = config.with_instances(instances);
    }
    if no_logs {
        config = config.without_logs();
    }

    let outcome = DeploymentService::new(ctx).push(config).await?;

    ui::print_success(&format!("{} is online", outcome.app));
    ui::print_field("Route", &format!("https://{}", outcome.route));
    ui::print_field("Revision", &outcome.git.revision);
    ui::print_field("Stage", &outcome.stage_id);
    Ok(())
}
