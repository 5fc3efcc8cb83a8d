//! Application log streams
//!
//! Pods are discovered by label selector and each one is streamed at most
//! once. Without `follow` the current logs of the running pods are sent and
//! the stream ends; with it, new pods are picked up until the receiver goes
//! away.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;

use super::{applications, organizations};
use crate::context::Context;
use crate::domain::app::AppRef;
use crate::error::CarrierResult;
use crate::infrastructure::ClusterApi;

/// One line of a pod's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub pod: String,
    pub line: String,
}

/// Namespace and label selector of a set of pods to follow
pub type LogTarget = (String, String);

/// Stream the logs of an application's workload pods
pub async fn app_logs(
    ctx: &Context,
    app: &AppRef,
    follow: bool,
) -> CarrierResult<mpsc::UnboundedReceiver<LogLine>> {
    organizations::ensure_exists(ctx, &app.org).await?;
    applications::get(ctx, &app.org, &app.name).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(follow_pods(
        ctx.cluster.clone(),
        vec![(app.org.clone(), applications::workload_selector(app))],
        ctx.config.timeouts.poll_interval,
        follow,
        tx,
    ));
    Ok(rx)
}

fn has_started(pod: &k8s_openapi::api::core::v1::Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase != "Pending")
}

/// Discover pods matching `targets` and forward their log lines to `sink`.
///
/// Pods are streamed once they leave `Pending`. Returns when the sink is
/// closed, or after one discovery round when not following.
pub(crate) async fn follow_pods(
    cluster: Arc<dyn ClusterApi>,
    targets: Vec<LogTarget>,
    interval: Duration,
    follow: bool,
    sink: mpsc::UnboundedSender<LogLine>,
) {
    let mut followed = HashSet::new();
    let mut streams = JoinSet::new();

    loop {
        if sink.is_closed() {
            return;
        }

        for (namespace, selector) in &targets {
            let pods = match cluster.list_pods(namespace, selector).await {
                Ok(pods) => pods,
                Err(e) => {
                    debug!("Listing pods in {} for logs failed: {}", namespace, e);
                    continue;
                }
            };

            for pod in pods {
                let started = has_started(&pod);
                let Some(name) = pod.metadata.name else {
                    continue;
                };
                if !started || !followed.insert((namespace.clone(), name.clone())) {
                    continue;
                }

                let cluster = cluster.clone();
                let namespace = namespace.clone();
                let sink = sink.clone();
                streams.spawn(async move {
                    let mut lines = match cluster.pod_logs(&namespace, &name, follow).await {
                        Ok(lines) => lines,
                        Err(e) => {
                            debug!("Cannot read logs of {}: {}", name, e);
                            return;
                        }
                    };
                    while let Some(line) = lines.next().await {
                        match line {
                            Ok(line) => {
                                let line = LogLine {
                                    pod: name.clone(),
                                    line,
                                };
                                if sink.send(line).is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                debug!("Log stream of {} ended: {}", name, e);
                                return;
                            }
                        }
                    }
                });
            }
        }

        if !follow {
            while streams.join_next().await.is_some() {}
            return;
        }

        while streams.try_join_next().is_some() {}
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::testing::test_context;
    use crate::domain::app::NAME_LABEL;
    use crate::services::applications::tests::with_app;
    use k8s_openapi::api::core::v1::{Pod, PodStatus};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    pub(crate) fn started_pod(name: &str, app: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(NAME_LABEL.to_string(), app.to_string())])),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn line(pod: &str, line: &str) -> LogLine {
        LogLine {
            pod: pod.to_string(),
            line: line.to_string(),
        }
    }

    #[tokio::test]
    async fn test_follow_forwards_started_pods_once() {
        let t = test_context().with_org("workspace");
        t.cluster.insert_pod(
            "workspace",
            started_pod("web-1", "web", "Running"),
            &["starting", "listening"],
        );
        t.cluster
            .insert_pod("workspace", started_pod("web-2", "web", "Pending"), &["never"]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(follow_pods(
            t.ctx.cluster.clone(),
            vec![(
                "workspace".to_string(),
                applications::workload_selector(&AppRef::new("workspace", "web")),
            )],
            Duration::from_millis(5),
            true,
            tx,
        ));

        assert_eq!(rx.recv().await.unwrap(), line("web-1", "starting"));
        assert_eq!(rx.recv().await.unwrap(), line("web-1", "listening"));

        // later discovery rounds must not replay the same pod
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_app_logs_without_follow_ends() {
        let t = test_context().with_org("workspace");
        with_app(&t, "workspace", "web");
        t.cluster
            .insert_pod("workspace", started_pod("web-1", "web", "Running"), &["a", "b"]);
        t.cluster
            .insert_pod("workspace", started_pod("api-1", "api", "Running"), &["other"]);

        let mut rx = app_logs(&t.ctx, &AppRef::new("workspace", "web"), false)
            .await
            .unwrap();
        let mut lines = Vec::new();
        while let Some(l) = rx.recv().await {
            lines.push(l);
        }
        assert_eq!(lines, vec![line("web-1", "a"), line("web-1", "b")]);
    }

    #[tokio::test]
    async fn test_app_logs_requires_app() {
        let t = test_context().with_org("workspace");
        assert!(matches!(
            app_logs(&t.ctx, &AppRef::new("workspace", "web"), false).await,
            Err(crate::error::CarrierError::AppNotFound(_))
        ));
    }
}
