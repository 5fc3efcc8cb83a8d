use crate::config::CarrierConfig;
use crate::ui;

pub fn execute(config: &CarrierConfig) {
    ui::print_header("carrier");
    ui::print_field("Version", env!("CARGO_PKG_VERSION"));
    ui::print_field("Domain", &config.domain);
    ui::print_field("Repository", &config.gitea.url);
    ui::print_field("Staging", &config.kubernetes.staging_namespace);
}
