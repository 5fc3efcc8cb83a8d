use anyhow::{Context as _, Result};

use crate::cli::AppCommands;
use crate::context::Context;
use crate::domain::app::AppRef;
use crate::services::deployment::print_log_line;
use crate::services::{applications, logs};
use crate::ui;

pub async fn execute(ctx: Context, org: String, command: AppCommands) -> Result<()> {
    match command {
        AppCommands::List => {
            let apps = applications::list(&ctx, &org)
                .await
                .with_context(|| format!("Failed to list applications of {}", org))?;
            if apps.is_empty() {
                ui::print_info(&format!("No applications in {}", org));
                return Ok(());
            }
            let rows: Vec<Vec<String>> = apps
                .into_iter()
                .map(|a| {
                    vec![
                        a.name,
                        a.status,
                        format!("{}/{}", a.ready_instances, a.desired_instances),
                        a.route.unwrap_or_default(),
                        a.bound_services.join(", "),
                    ]
                })
                .collect();
            ui::print_table(&["name", "status", "ready", "route", "services"], &rows);
        }
        AppCommands::Show { name } => {
            let app = applications::get(&ctx, &org, &name)
                .await
                .with_context(|| format!("Failed to show application {}", name))?;
            ui::print_header(&format!("Application {}", app.app_ref()));
            ui::print_field("Status", &app.status);
            ui::print_field(
                "Instances",
                &format!("{}/{}", app.ready_instances, app.desired_instances),
            );
            ui::print_field("Route", app.route.as_deref().unwrap_or("-"));
            ui::print_field("Revision", app.revision.as_deref().unwrap_or("-"));
            ui::print_field("Services", &app.bound_services.join(", "));

            let pods = applications::pods(&ctx, &app.app_ref())
                .await
                .with_context(|| format!("Failed to list pods of {}", name))?;
            if !pods.is_empty() {
                println!();
                let rows: Vec<Vec<String>> = pods
                    .into_iter()
                    .map(|p| {
                        let ready = if p.ready { "yes" } else { "no" };
                        vec![p.name, p.phase, ready.to_string()]
                    })
                    .collect();
                ui::print_table(&["pod", "phase", "ready"], &rows);
            }
        }
        AppCommands::Scale { name, instances } => {
            anyhow::ensure!(instances >= 0, "Instances must be zero or more");
            applications::scale(&ctx, &AppRef::new(&org, &name), instances)
                .await
                .with_context(|| format!("Failed to scale application {}", name))?;
            ui::print_success(&format!("{} scaled to {} instances", name, instances));
        }
        AppCommands::Delete { name } => {
            let spinner = ui::spinner(format!("Deleting application {}...", name));
            let result = applications::delete(&ctx, &AppRef::new(&org, &name)).await;
            spinner.finish_and_clear();
            let unbound = result.with_context(|| format!("Failed to delete application {}", name))?;
            if !unbound.is_empty() {
                ui::print_info(&format!("Unbound services: {}", unbound.join(", ")));
            }
            ui::print_success(&format!("Application {} deleted", name));
        }
        AppCommands::Logs { name, follow } => {
            let mut lines = logs::app_logs(&ctx, &AppRef::new(&org, &name), follow)
                .await
                .with_context(|| format!("Failed to stream logs of {}", name))?;
            while let Some(line) = lines.recv().await {
                print_log_line(&line);
            }
        }
    }
    Ok(())
}
