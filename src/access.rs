use k8s_openapi::{
    api::{
        core::v1::ServiceAccount,
        rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject},
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::{cluster::ClusterApi, error::AppError};

/// Outcome of an ensure operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Ensured {
    Created,
    /// Existed but had to be amended, e.g. a binding gained a subject.
    Updated,
    AlreadyPresent,
}

/// Fixed names of the access bundle resources.
#[derive(Debug, Clone)]
pub struct AccessNames {
    pub cluster_role: String,
    pub service_account: String,
    pub role_binding: String,
}

impl Default for AccessNames {
    fn default() -> Self {
        Self {
            cluster_role: "backup-cluster-role".to_string(),
            service_account: "backup-service-account".to_string(),
            role_binding: "backup-cluster-role-binding".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessReport {
    pub cluster_role: Ensured,
    pub service_account: Ensured,
    pub role_binding: Ensured,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn cluster_role(names: &AccessNames) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(names.cluster_role.clone()),
            ..Default::default()
        },
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(strings(&[""])),
                resources: Some(strings(&[
                    "pods",
                    "persistentvolumeclaims",
                    "persistentvolumes",
                ])),
                verbs: strings(&["get", "list", "watch"]),
                ..Default::default()
            },
            // kubectl cp runs tar through exec
            PolicyRule {
                api_groups: Some(strings(&[""])),
                resources: Some(strings(&["pods/exec"])),
                verbs: strings(&["create", "get"]),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

pub fn service_account(names: &AccessNames) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(names.service_account.clone()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn role_binding(names: &AccessNames, namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(names.role_binding.clone()),
            ..Default::default()
        },
        subjects: Some(vec![service_account_subject(names, namespace)]),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: names.cluster_role.clone(),
        },
    }
}

pub async fn ensure_cluster_role(
    api: &dyn ClusterApi,
    names: &AccessNames,
) -> Result<Ensured, AppError> {
    if api.get_cluster_role(&names.cluster_role).await?.is_some() {
        debug!(name = %names.cluster_role, "ClusterRole already exists");
        return Ok(Ensured::AlreadyPresent);
    }
    api.create_cluster_role(&cluster_role(names)).await?;
    info!(name = %names.cluster_role, "Created ClusterRole");
    Ok(Ensured::Created)
}

pub async fn ensure_service_account(
    api: &dyn ClusterApi,
    names: &AccessNames,
    namespace: &str,
) -> Result<Ensured, AppError> {
    if api
        .get_service_account(namespace, &names.service_account)
        .await?
        .is_some()
    {
        debug!(name = %names.service_account, namespace, "ServiceAccount already exists");
        return Ok(Ensured::AlreadyPresent);
    }
    api.create_service_account(namespace, &service_account(names))
        .await?;
    info!(name = %names.service_account, namespace, "Created ServiceAccount");
    Ok(Ensured::Created)
}

fn service_account_subject(names: &AccessNames, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: names.service_account.clone(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Ensures the binding exists and names the service account of `namespace`
/// among its subjects. Backups into another namespace add their service
/// account to the existing binding.
pub async fn ensure_role_binding(
    api: &dyn ClusterApi,
    names: &AccessNames,
    namespace: &str,
) -> Result<Ensured, AppError> {
    let Some(mut binding) = api.get_cluster_role_binding(&names.role_binding).await? else {
        api.create_cluster_role_binding(&role_binding(names, namespace))
            .await?;
        info!(name = %names.role_binding, "Created ClusterRoleBinding");
        return Ok(Ensured::Created);
    };

    let subject = service_account_subject(names, namespace);
    let subjects = binding.subjects.get_or_insert_with(Vec::new);
    let bound = subjects.iter().any(|s| {
        s.kind == subject.kind && s.name == subject.name && s.namespace == subject.namespace
    });
    if bound {
        debug!(name = %names.role_binding, "ClusterRoleBinding already exists");
        return Ok(Ensured::AlreadyPresent);
    }

    subjects.push(subject);
    api.replace_cluster_role_binding(&binding).await?;
    info!(
        name = %names.role_binding,
        namespace,
        "Added ServiceAccount to ClusterRoleBinding"
    );
    Ok(Ensured::Updated)
}

/// Makes sure the backup identity exists in `namespace` and may read pods
/// and volumes cluster-wide and exec into pods.
///
/// Not transactional: two concurrent runs can both see a resource missing,
/// and the loser fails on the duplicate create.
#[tracing::instrument(skip(api, names))]
pub async fn ensure_access_bundle(
    api: &dyn ClusterApi,
    names: &AccessNames,
    namespace: &str,
) -> Result<AccessReport, AppError> {
    Ok(AccessReport {
        cluster_role: ensure_cluster_role(api, names).await?,
        service_account: ensure_service_account(api, names, namespace).await?,
        role_binding: ensure_role_binding(api, names, namespace).await?,
    })
}

/// Name of the most recent legacy token secret of the backup service
/// account, if the cluster still generates them.
pub async fn find_token_secret(
    api: &dyn ClusterApi,
    names: &AccessNames,
    namespace: &str,
) -> Result<Option<String>, AppError> {
    let prefix = format!("{}-token-", names.service_account);
    let secret = api
        .list_secrets(namespace)
        .await?
        .into_iter()
        .filter_map(|s| s.metadata.name)
        .filter(|name| name.starts_with(&prefix))
        .last();

    match &secret {
        Some(name) => debug!(secret = %name, "Found service account token secret"),
        None => debug!(namespace, "No service account token secret"),
    }
    Ok(secret)
}
