//! Resource naming rules
//!
//! Cluster object names must be DNS-1123 labels. User-facing names go
//! through `resource_name` so derived objects stay valid and stable.

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Maximum length of a DNS-1123 label
pub const MAX_NAME_LENGTH: usize = 63;

/// Characters kept from the readable prefix when a name has to be shortened
const TRUNCATED_PREFIX_LENGTH: usize = 30;

static DNS_LABEL: OnceLock<Option<Regex>> = OnceLock::new();

fn dns_label() -> Option<&'static Regex> {
    DNS_LABEL
        .get_or_init(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").ok())
        .as_ref()
}

/// Check that `name` is a valid DNS-1123 label.
///
/// Returns a human readable reason when it is not.
pub fn validate_dns_label(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(format!(
            "name '{}' is longer than {} characters",
            name, MAX_NAME_LENGTH
        ));
    }
    let valid = match dns_label() {
        Some(re) => re.is_match(name),
        None => name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
    };
    if !valid || name.starts_with('-') || name.ends_with('-') {
        return Err(format!(
            "name '{}' must consist of lowercase alphanumeric characters or '-', \
             and must start and end with an alphanumeric character",
            name
        ));
    }
    Ok(())
}

/// Build a stable, DNS-safe object name from its parts.
///
/// Parts are joined with `-`, lowercased and stripped of anything outside
/// `[a-z0-9-]`. Names longer than 63 characters keep a readable prefix and
/// get a hash suffix of the full joined name, so distinct inputs never
/// collapse onto the same truncated name.
pub fn resource_name(parts: &[&str]) -> String {
    let joined = parts.join("-");
    let sanitized = sanitize(&joined);

    if sanitized.len() <= MAX_NAME_LENGTH {
        return sanitized;
    }

    let digest = Sha256::digest(joined.as_bytes());
    let hash: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    let prefix = sanitized[..TRUNCATED_PREFIX_LENGTH].trim_end_matches('-');
    format!("{}-{}", prefix, &hash[..32])
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = false;
    for c in raw.chars().flat_map(|c| c.to_lowercase()) {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if mapped == '-' {
            if last_dash {
                continue;
            }
            last_dash = true;
        } else {
            last_dash = false;
        }
        out.push(mapped);
    }
    out.trim_matches('-').to_string()
}

/// Name of the secret backing a custom service
pub fn service_resource_name(org: &str, service: &str) -> String {
    resource_name(&["service", &format!("org-{}", org), &format!("svc-{}", service)])
}

/// Name of the binding object connecting a catalog service to an application
pub fn binding_resource_name(org: &str, service: &str, app: &str) -> String {
    resource_name(&[
        "binding",
        &format!("org-{}", org),
        &format!("svc-{}", service),
        &format!("app-{}", app),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_dns_label() {
        assert!(validate_dns_label("workspace").is_ok());
        assert!(validate_dns_label("team-a1").is_ok());
        assert!(validate_dns_label("").is_err());
        assert!(validate_dns_label("Upper").is_err());
        assert!(validate_dns_label("-leading").is_err());
        assert!(validate_dns_label("trailing-").is_err());
        assert!(validate_dns_label("under_score").is_err());
        assert!(validate_dns_label(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_resource_name_short() {
        assert_eq!(
            service_resource_name("workspace", "mydb"),
            "service-org-workspace-svc-mydb"
        );
        assert_eq!(resource_name(&["Foo_Bar", "baz"]), "foo-bar-baz");
    }

    #[test]
    fn test_resource_name_long_is_stable_and_bounded() {
        let long = "x".repeat(80);
        let a = resource_name(&["service", &long, "one"]);
        let b = resource_name(&["service", &long, "one"]);
        let c = resource_name(&["service", &long, "two"]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.len() <= MAX_NAME_LENGTH);
        assert!(validate_dns_label(&a).is_ok());
    }

    #[test]
    fn test_binding_name_differs_per_app() {
        let one = binding_resource_name("org", "db", "app1");
        let two = binding_resource_name("org", "db", "app2");
        assert_ne!(one, two);
        assert!(one.starts_with("binding-org-org-svc-db"));
    }
}
