//! Wait bounds, written as human durations (`"10m"`, `"90s"`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Interval between probes of every bounded wait
    #[serde(default = "default_poll_interval", with = "human_duration")]
    pub poll_interval: Duration,

    /// Staging a pushed application, and the appearance of its first pod
    #[serde(default = "default_app_built", with = "human_duration")]
    pub app_built: Duration,

    /// Pods becoming ready after they exist
    #[serde(default = "default_pod_ready", with = "human_duration")]
    pub pod_ready: Duration,

    /// Catalog service provisioning
    #[serde(default = "default_service_provision", with = "human_duration")]
    pub service_provision: Duration,

    /// Catalog binding secret appearing
    #[serde(default = "default_service_binding", with = "human_duration")]
    pub service_binding: Duration,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_app_built() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_pod_ready() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_service_provision() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_service_binding() -> Duration {
    Duration::from_secs(2 * 60)
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            app_built: default_app_built(),
            pod_ready: default_pod_ready(),
            service_provision: default_service_provision(),
            service_binding: default_service_binding(),
        }
    }
}

impl TimeoutsConfig {
    fn policy(&self, timeout: Duration) -> RetryPolicy {
        RetryPolicy::new(self.poll_interval, timeout)
    }

    pub fn app_built_policy(&self) -> RetryPolicy {
        self.policy(self.app_built)
    }

    pub fn pod_ready_policy(&self) -> RetryPolicy {
        self.policy(self.pod_ready)
    }

    pub fn provision_policy(&self) -> RetryPolicy {
        self.policy(self.service_provision)
    }

    pub fn binding_policy(&self) -> RetryPolicy {
        self.policy(self.service_binding)
    }
}

/// serde adapter for `humantime` duration strings
pub mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_human_durations() {
        let parsed: TimeoutsConfig = serde_yaml::from_str("app_built: 90s\npod_ready: 2m").unwrap();
        assert_eq!(parsed.app_built, Duration::from_secs(90));
        assert_eq!(parsed.pod_ready, Duration::from_secs(120));
        assert_eq!(parsed.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let parsed: Result<TimeoutsConfig, _> = serde_yaml::from_str("app_built: soon");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_policies_share_interval() {
        let timeouts = TimeoutsConfig::default();
        let policy = timeouts.app_built_policy();
        assert_eq!(policy.interval, Duration::from_secs(1));
        assert_eq!(policy.timeout, Duration::from_secs(600));
        assert!(policy.first_probe_immediate);
    }
}
