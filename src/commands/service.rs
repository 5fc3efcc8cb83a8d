use anyhow::{Context as _, Result};
use std::collections::BTreeMap;

use crate::backing::classes;
use crate::cli::ServiceCommands;
use crate::context::Context;
use crate::services::{bindings, instances, CatalogRequest};
use crate::ui;

pub async fn execute(ctx: Context, org: String, command: ServiceCommands) -> Result<()> {
    match command {
        ServiceCommands::List => {
            let services = instances::index(&ctx, &org)
                .await
                .with_context(|| format!("Failed to list services of {}", org))?;
            if services.is_empty() {
                ui::print_info(&format!("No services in {}", org));
                return Ok(());
            }
            let rows: Vec<Vec<String>> = services
                .into_iter()
                .map(|s| vec![s.name, s.bound_apps.join(", ")])
                .collect();
            ui::print_table(&["name", "applications"], &rows);
        }
        ServiceCommands::Show { name } => {
            let details = instances::show(&ctx, &org, &name)
                .await
                .with_context(|| format!("Failed to show service {}", name))?;
            ui::print_header(&format!("Service {}", name));
            for (key, value) in &details {
                ui::print_field(key, value);
            }
        }
        ServiceCommands::Create {
            name,
            class,
            plan,
            data,
            dont_wait,
        } => {
            let request = CatalogRequest {
                name: name.clone(),
                class,
                plan,
                data: data.into_iter().collect(),
                wait_for_provision: !dont_wait,
            };
            let spinner = ui::spinner(format!("Creating service {}...", name));
            let result = instances::create_catalog(&ctx, &org, &request).await;
            spinner.finish_and_clear();
            result.with_context(|| format!("Failed to create service {}", name))?;
            if dont_wait {
                ui::print_info(&format!("Service {} is being provisioned", name));
            } else {
                ui::print_success(&format!("Service {} provisioned", name));
            }
        }
        ServiceCommands::CreateCustom { name, data } => {
            let data: BTreeMap<String, String> = data.into_iter().collect();
            instances::create_custom(&ctx, &org, &name, &data)
                .await
                .with_context(|| format!("Failed to create custom service {}", name))?;
            ui::print_success(&format!("Custom service {} created", name));
        }
        ServiceCommands::Delete { name, unbind } => {
            let unbound = bindings::delete_service(&ctx, &org, &name, unbind)
                .await
                .with_context(|| format!("Failed to delete service {}", name))?;
            if !unbound.is_empty() {
                ui::print_warning(&format!("Unbound from: {}", unbound.join(", ")));
            }
            ui::print_success(&format!("Service {} deleted", name));
        }
        ServiceCommands::Bind { name, app } => {
            let spinner = ui::spinner(format!("Binding {} to {}...", name, app));
            let result = bindings::bind(&ctx, &org, &app, &[name.clone()]).await;
            spinner.finish_and_clear();
            result.with_context(|| format!("Failed to bind {} to {}", name, app))?;
            ui::print_success(&format!("Service {} bound to {}", name, app));
        }
        ServiceCommands::Unbind { name, app } => {
            bindings::unbind(&ctx, &org, &app, &name)
                .await
                .with_context(|| format!("Failed to unbind {} from {}", name, app))?;
            ui::print_success(&format!("Service {} unbound from {}", name, app));
        }
        ServiceCommands::Classes => {
            let classes = classes::list_classes(&ctx)
                .await
                .context("Failed to list service classes")?;
            let rows: Vec<Vec<String>> = classes
                .into_iter()
                .map(|c| vec![c.name, c.description, c.broker])
                .collect();
            ui::print_table(&["name", "description", "broker"], &rows);
        }
        ServiceCommands::Plans { class } => {
            let plans = classes::list_plans(&ctx, &class)
                .await
                .with_context(|| format!("Failed to list plans of {}", class))?;
            let rows: Vec<Vec<String>> = plans
                .into_iter()
                .map(|p| {
                    let free = if p.free { "yes" } else { "no" };
                    vec![p.name, p.description, free.to_string()]
                })
                .collect();
            ui::print_table(&["name", "description", "free"], &rows);
        }
    }
    Ok(())
}
