use std::{fmt::Debug, path::PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::{PersistentVolumeClaim, Pod, Secret, ServiceAccount},
    rbac::v1::{ClusterRole, ClusterRoleBinding},
};
use kube::{
    Client, Config,
    api::{Api, DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::{app_error, error::AppError};

/// Where to find cluster credentials.
#[derive(Debug, Clone, Default)]
pub struct ClusterConfig {
    /// Explicit kubeconfig path. Falls back to `<home>/.kube/config`.
    pub kubeconfig: Option<PathBuf>,
}

impl ClusterConfig {
    pub fn kubeconfig_path(&self) -> Result<PathBuf, AppError> {
        if let Some(path) = &self.kubeconfig {
            return Ok(path.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| app_error!("Can't determine home directory"))?;
        Ok(home.join(".kube").join("config"))
    }
}

/// Builds a client from the kubeconfig file resolved by `config`.
pub async fn connect(config: &ClusterConfig) -> Result<Client, AppError> {
    let path = config.kubeconfig_path()?;
    debug!("Using kubeconfig {path:?}");

    if !path.is_file() {
        return Err(app_error!("Kubeconfig not found at {}", path.display()));
    }

    let kubeconfig = Kubeconfig::read_from(&path)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    Ok(Client::try_from(config)?)
}

/// Builds a client from whatever credentials the environment provides,
/// in-cluster service account included.
pub async fn connect_inferred() -> Result<Client, AppError> {
    Client::try_default()
        .await
        .map_err(|e| app_error!("Can't connect to Kubernetes API: {e}"))
}

/// The slice of the Kubernetes API this tool talks to.
///
/// Getters map "not found" to `Ok(None)`; every other failure is returned
/// as-is.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, AppError>;

    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, AppError>;

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), AppError>;

    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, AppError>;

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, AppError>;

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, AppError>;

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, AppError>;

    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<Option<ClusterRoleBinding>, AppError>;

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, AppError>;

    async fn replace_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, AppError>;

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, AppError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, AppError>;

    /// Number of pods across all namespaces.
    async fn count_all_pods(&self) -> Result<usize, AppError>;

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, AppError>;
}

/// [`ClusterApi`] backed by a live API server.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn get_optional<K>(api: Api<K>, name: &str) -> Result<Option<K>, AppError>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, AppError> {
        get_optional(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, AppError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), claim).await?)
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), AppError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::foreground()).await?;
        Ok(())
    }

    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, AppError> {
        get_optional(Api::all(self.client.clone()), name).await
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, AppError> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), role).await?)
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, AppError> {
        get_optional(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, AppError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), account).await?)
    }

    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<Option<ClusterRoleBinding>, AppError> {
        get_optional(Api::all(self.client.clone()), name).await
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, AppError> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), binding).await?)
    }

    async fn replace_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, AppError> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        let name = binding.metadata.name.clone().unwrap_or_default();
        Ok(api.replace(&name, &PostParams::default(), binding).await?)
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, AppError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, AppError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn count_all_pods(&self) -> Result<usize, AppError> {
        let api: Api<Pod> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items.len())
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, AppError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), job).await?)
    }
}

/// Lists every pod in the cluster. A cluster without a single pod is
/// reported as a bad connection.
pub async fn check_connection(api: &dyn ClusterApi) -> Result<bool, AppError> {
    let count = api.count_all_pods().await?;
    info!(pods = count, "There are {count} pods in the cluster");
    Ok(count > 0)
}
