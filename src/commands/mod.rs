//! Command implementations behind the CLI subcommands

pub mod app;
pub mod info;
pub mod org;
pub mod push;
pub mod serve;
pub mod service;
