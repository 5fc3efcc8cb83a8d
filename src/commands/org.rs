use anyhow::{Context as _, Result};

use crate::cli::OrgCommands;
use crate::context::Context;
use crate::services::organizations;
use crate::ui;

pub async fn execute(ctx: Context, command: OrgCommands) -> Result<()> {
    match command {
        OrgCommands::List => {
            let orgs = organizations::list(&ctx)
                .await
                .context("Failed to list organizations")?;
            if orgs.is_empty() {
                ui::print_info("No organizations");
                return Ok(());
            }
            let rows: Vec<Vec<String>> = orgs.into_iter().map(|o| vec![o]).collect();
            ui::print_table(&["name"], &rows);
        }
        OrgCommands::Create { name } => {
            organizations::create(&ctx, &name)
                .await
                .with_context(|| format!("Failed to create organization {}", name))?;
            ui::print_success(&format!("Organization {} created", name));
        }
        OrgCommands::Delete { name } => {
            let spinner = ui::spinner(format!("Deleting organization {}...", name));
            let result = organizations::delete(&ctx, &name).await;
            spinner.finish_and_clear();
            result.with_context(|| format!("Failed to delete organization {}", name))?;
            ui::print_success(&format!("Organization {} deleted", name));
        }
    }
    Ok(())
}
