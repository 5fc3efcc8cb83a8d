//! CLI definitions for carrier
//!
//! This module contains all CLI argument parsing structures using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "carrier",
    version,
    about = "Application platform on Kubernetes",
    long_about = "Push application sources, stage them into images and run them on Kubernetes.\nBacking services are created and bound to applications by name."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ./carrier.yaml when present)
    #[arg(long, global = true, env = "CARRIER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Organization to work in
    #[arg(long, global = true, env = "CARRIER_ORG", default_value = "workspace")]
    pub org: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the REST API server
    Serve {
        /// Address to listen on (overrides `listen` from the config)
        #[arg(long, env = "CARRIER_LISTEN")]
        listen: Option<String>,
    },

    /// Show version and configured system domain
    Info,

    /// Push application sources, stage them and wait for the app to run
    Push {
        /// Application name
        name: String,

        /// Directory holding the sources
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Number of instances to run
        #[arg(long)]
        instances: Option<i32>,

        /// Do not follow staging and application logs
        #[arg(long)]
        no_logs: bool,
    },

    /// Manage organizations
    Org {
        #[command(subcommand)]
        command: OrgCommands,
    },

    /// Manage backing services
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },

    /// Manage applications
    App {
        #[command(subcommand)]
        command: AppCommands,
    },
}

#[derive(Subcommand)]
pub enum OrgCommands {
    /// List organizations
    List,

    /// Create an organization
    Create {
        name: String,
    },

    /// Delete an organization and everything in it
    Delete {
        name: String,
    },
}

#[derive(Subcommand)]
pub enum ServiceCommands {
    /// List services with the applications bound to them
    List,

    /// Show service details
    Show {
        name: String,
    },

    /// Create a service from the catalog
    Create {
        name: String,

        /// Service class (external name)
        class: String,

        /// Service plan (external name)
        plan: String,

        /// Provisioning parameters as key=value (can be specified multiple times)
        #[arg(long = "data", value_parser = parse_key_value)]
        data: Vec<(String, String)>,

        /// Return immediately instead of waiting for provisioning
        #[arg(long)]
        dont_wait: bool,
    },

    /// Create a custom service from literal credentials
    CreateCustom {
        name: String,

        /// Credentials as key=value (at least one)
        #[arg(value_parser = parse_key_value, required = true)]
        data: Vec<(String, String)>,
    },

    /// Delete a service
    Delete {
        name: String,

        /// Unbind the service from its applications first
        #[arg(long)]
        unbind: bool,
    },

    /// Bind a service to an application
    Bind {
        name: String,
        app: String,
    },

    /// Unbind a service from an application
    Unbind {
        name: String,
        app: String,
    },

    /// List catalog service classes
    Classes,

    /// List the plans of a catalog service class
    Plans {
        class: String,
    },
}

#[derive(Subcommand)]
pub enum AppCommands {
    /// List applications
    List,

    /// Show application details
    Show {
        name: String,
    },

    /// Set the number of instances
    Scale {
        name: String,
        instances: i32,
    },

    /// Delete an application, unbinding its services
    Delete {
        name: String,
    },

    /// Print the logs of an application's pods
    Logs {
        name: String,

        /// Keep streaming, including pods started later
        #[arg(long)]
        follow: bool,
    },
}

/// Parse `key=value`; the value may itself contain `=`
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}
