//! Organization registry
//!
//! An organization is a namespace carrying the carrier org marker label,
//! plus a matching account in the source repository.

use anyhow::Context as _;
use k8s_openapi::api::core::v1::{LocalObjectReference, Namespace, Secret, ServiceAccount};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::context::Context;
use crate::domain::app::{COMPONENT_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::domain::naming::validate_dns_label;
use crate::error::{CarrierError, CarrierResult};

/// Component label value marking organization namespaces
pub const ORG_COMPONENT: &str = "carrier-org";

fn org_selector() -> String {
    format!("{}={}", COMPONENT_LABEL, ORG_COMPONENT)
}

/// Names of all organizations, sorted
pub async fn list(ctx: &Context) -> CarrierResult<Vec<String>> {
    let namespaces = ctx.cluster.list_namespaces(&org_selector()).await?;
    let mut names: Vec<String> = namespaces
        .into_iter()
        .filter_map(|ns| ns.metadata.name)
        .collect();
    names.sort();
    Ok(names)
}

pub async fn exists(ctx: &Context, name: &str) -> CarrierResult<bool> {
    Ok(list(ctx).await?.iter().any(|org| org == name))
}

/// Fail with `OrgNotFound` unless `name` is an organization
pub async fn ensure_exists(ctx: &Context, name: &str) -> CarrierResult<()> {
    if exists(ctx, name).await? {
        Ok(())
    } else {
        Err(CarrierError::OrgNotFound(name.to_string()))
    }
}

/// Copy of a staging secret suitable for creating in another namespace
fn relocated(secret: Secret) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: secret.metadata.name,
            labels: secret.metadata.labels,
            annotations: secret.metadata.annotations,
            ..Default::default()
        },
        ..secret
    }
}

/// Create an organization.
///
/// Steps run in order and the first failure aborts; nothing is rolled back.
pub async fn create(ctx: &Context, name: &str) -> CarrierResult<()> {
    validate_dns_label(name).map_err(CarrierError::BadRequest)?;

    if exists(ctx, name).await? {
        return Err(CarrierError::Conflict(format!(
            "Organization '{}' already exists",
            name
        )));
    }

    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([
                (COMPONENT_LABEL.to_string(), ORG_COMPONENT.to_string()),
                (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
            ])),
            ..Default::default()
        },
        ..Default::default()
    };

    match ctx.cluster.create_namespace(&namespace).await {
        Ok(()) => {}
        Err(e) if e.is_conflict() => {
            return Err(CarrierError::Conflict(format!(
                "Organization '{}' already exists",
                name
            )))
        }
        Err(e) => return Err(e.into()),
    }
    info!("Namespace {} created", name);

    if let Err(e) = provision(ctx, name).await {
        warn!(
            "Organization {} is partially provisioned; namespace {} was left in place",
            name, name
        );
        return Err(e);
    }

    info!("Organization {} created", name);
    Ok(())
}

async fn provision(ctx: &Context, name: &str) -> CarrierResult<()> {
    let kubernetes = &ctx.config.kubernetes;

    for secret_name in &kubernetes.copied_secrets {
        let secret = ctx
            .cluster
            .get_secret(&kubernetes.staging_namespace, secret_name)
            .await
            .with_context(|| {
                format!(
                    "reading secret {} from {}",
                    secret_name, kubernetes.staging_namespace
                )
            })?;
        ctx.cluster
            .create_secret(name, &relocated(secret))
            .await
            .with_context(|| format!("copying secret {} into {}", secret_name, name))?;
    }

    let account = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        automount_service_account_token: Some(false),
        image_pull_secrets: Some(vec![LocalObjectReference {
            name: kubernetes.pull_secret.clone(),
        }]),
        ..Default::default()
    };
    ctx.cluster
        .create_service_account(name, &account)
        .await
        .with_context(|| format!("creating service account {}", name))?;

    ctx.repository
        .create_org(name)
        .await
        .with_context(|| format!("creating repository organization {}", name))?;

    Ok(())
}

/// Delete an organization with everything in it
pub async fn delete(ctx: &Context, name: &str) -> CarrierResult<()> {
    ensure_exists(ctx, name).await?;

    ctx.cluster
        .delete_namespace(name)
        .await
        .with_context(|| format!("deleting namespace {}", name))?;
    ctx.repository
        .delete_org(name)
        .await
        .with_context(|| format!("deleting repository organization {}", name))?;

    info!("Organization {} deleted", name);
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::testing::{test_context, TestContext};
    use k8s_openapi::ByteString;

    /// Staging secrets every organization gets a copy of
    pub(crate) fn with_staging_secrets(t: &TestContext) {
        for name in ["registry-creds", "ca-cert"] {
            t.cluster.insert_secret(
                "tekton-staging",
                Secret {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: Some("tekton-staging".to_string()),
                        resource_version: Some("42".to_string()),
                        uid: Some("abc".to_string()),
                        ..Default::default()
                    },
                    data: Some(BTreeMap::from([(
                        "key".to_string(),
                        ByteString(b"value".to_vec()),
                    )])),
                    ..Default::default()
                },
            );
        }
    }

    #[tokio::test]
    async fn test_create_then_exists() {
        let t = test_context();
        with_staging_secrets(&t);

        create(&t.ctx, "workspace").await.unwrap();

        assert!(exists(&t.ctx, "workspace").await.unwrap());
        assert_eq!(list(&t.ctx).await.unwrap(), vec!["workspace"]);
        assert!(t.repository.has_org("workspace"));

        let copied = t.cluster.secret("workspace", "registry-creds").unwrap();
        assert_eq!(copied.metadata.resource_version, None);
        assert_eq!(copied.metadata.uid, None);
        assert_eq!(copied.metadata.namespace.as_deref(), Some("workspace"));
        assert!(copied.data.is_some());

        let account = t.cluster.service_account("workspace", "workspace").unwrap();
        assert_eq!(account.automount_service_account_token, Some(false));
        assert_eq!(
            account.image_pull_secrets.unwrap()[0].name,
            "registry-creds"
        );
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let t = test_context();
        with_staging_secrets(&t);

        create(&t.ctx, "workspace").await.unwrap();
        let err = create(&t.ctx, "workspace").await.unwrap_err();
        assert!(matches!(err, CarrierError::Conflict(_)));
        assert_eq!(err.status(), 409);
    }

    #[tokio::test]
    async fn test_invalid_name_is_bad_request() {
        let t = test_context();
        let err = create(&t.ctx, "Not_Valid").await.unwrap_err();
        assert!(matches!(err, CarrierError::BadRequest(_)));
        assert!(!t.cluster.has_namespace("Not_Valid"));
    }

    #[tokio::test]
    async fn test_failed_step_is_named_and_namespace_kept() {
        let t = test_context();
        // no staging secrets to copy
        let err = create(&t.ctx, "workspace").await.unwrap_err();
        assert!(err.is_internal());
        assert!(err.to_string().contains("reading secret registry-creds"));
        assert!(t.cluster.has_namespace("workspace"));
    }

    #[tokio::test]
    async fn test_unlabelled_namespace_is_not_an_org() {
        let t = test_context();
        t.cluster.insert_namespace("kube-system", &[]);
        assert!(!exists(&t.ctx, "kube-system").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let t = test_context();
        with_staging_secrets(&t);
        create(&t.ctx, "workspace").await.unwrap();

        delete(&t.ctx, "workspace").await.unwrap();
        assert!(!t.cluster.has_namespace("workspace"));
        assert!(!t.repository.has_org("workspace"));

        assert!(matches!(
            delete(&t.ctx, "workspace").await,
            Err(CarrierError::OrgNotFound(_))
        ));
    }
}
