//! In-memory [`ClusterApi`] for tests that care about resulting cluster
//! state rather than call order.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::{PersistentVolumeClaim, Pod, Secret, ServiceAccount},
    rbac::v1::{ClusterRole, ClusterRoleBinding},
};

use crate::{app_err, cluster::ClusterApi, error::AppError};

type Key = (String, String);

#[derive(Default)]
struct State {
    claims: BTreeMap<Key, PersistentVolumeClaim>,
    cluster_roles: BTreeMap<String, ClusterRole>,
    service_accounts: BTreeMap<Key, ServiceAccount>,
    role_bindings: BTreeMap<String, ClusterRoleBinding>,
    secrets: Vec<Secret>,
    pods: Vec<Pod>,
    jobs: BTreeMap<Key, Job>,
    deleted_claims: Vec<String>,
    creates: usize,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn name_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

fn already_exists(kind: &str, name: &str) -> AppError {
    AppError::new(&format!("{kind} \"{name}\" already exists"))
}

impl FakeCluster {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn insert_claim(&self, claim: PersistentVolumeClaim) {
        let namespace = claim.metadata.namespace.clone().unwrap_or_default();
        self.state()
            .claims
            .insert(key(&namespace, &name_of(&claim.metadata)), claim);
    }

    pub fn insert_pod(&self, pod: Pod) {
        self.state().pods.push(pod);
    }

    pub fn insert_secret(&self, secret: Secret) {
        self.state().secrets.push(secret);
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.state().claims.get(&key(namespace, name)).cloned()
    }

    pub fn job(&self, namespace: &str, name: &str) -> Option<Job> {
        self.state().jobs.get(&key(namespace, name)).cloned()
    }

    pub fn role_binding(&self, name: &str) -> Option<ClusterRoleBinding> {
        self.state().role_bindings.get(name).cloned()
    }

    pub fn deleted_claims(&self) -> Vec<String> {
        self.state().deleted_claims.clone()
    }

    /// Number of successful create calls of any kind.
    pub fn create_count(&self) -> usize {
        self.state().creates
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, AppError> {
        Ok(self.claim(namespace, name))
    }

    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, AppError> {
        let mut state = self.state();
        let name = name_of(&claim.metadata);
        if state.claims.contains_key(&key(namespace, &name)) {
            return Err(already_exists("persistentvolumeclaims", &name));
        }
        state.claims.insert(key(namespace, &name), claim.clone());
        state.creates += 1;
        Ok(claim.clone())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), AppError> {
        let mut state = self.state();
        if state.claims.remove(&key(namespace, name)).is_none() {
            return app_err!("persistentvolumeclaims \"{name}\" not found");
        }
        state.deleted_claims.push(format!("{namespace}/{name}"));
        Ok(())
    }

    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, AppError> {
        Ok(self.state().cluster_roles.get(name).cloned())
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<ClusterRole, AppError> {
        let mut state = self.state();
        let name = name_of(&role.metadata);
        if state.cluster_roles.contains_key(&name) {
            return Err(already_exists("clusterroles", &name));
        }
        state.cluster_roles.insert(name, role.clone());
        state.creates += 1;
        Ok(role.clone())
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, AppError> {
        Ok(self
            .state()
            .service_accounts
            .get(&key(namespace, name))
            .cloned())
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, AppError> {
        let mut state = self.state();
        let name = name_of(&account.metadata);
        if state.service_accounts.contains_key(&key(namespace, &name)) {
            return Err(already_exists("serviceaccounts", &name));
        }
        state
            .service_accounts
            .insert(key(namespace, &name), account.clone());
        state.creates += 1;
        Ok(account.clone())
    }

    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<Option<ClusterRoleBinding>, AppError> {
        Ok(self.state().role_bindings.get(name).cloned())
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, AppError> {
        let mut state = self.state();
        let name = name_of(&binding.metadata);
        if state.role_bindings.contains_key(&name) {
            return Err(already_exists("clusterrolebindings", &name));
        }
        state.role_bindings.insert(name, binding.clone());
        state.creates += 1;
        Ok(binding.clone())
    }

    async fn replace_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, AppError> {
        let mut state = self.state();
        let name = name_of(&binding.metadata);
        if !state.role_bindings.contains_key(&name) {
            return app_err!("clusterrolebindings \"{name}\" not found");
        }
        state.role_bindings.insert(name, binding.clone());
        Ok(binding.clone())
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, AppError> {
        Ok(self
            .state()
            .secrets
            .iter()
            .filter(|s| s.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, AppError> {
        Ok(self
            .state()
            .pods
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn count_all_pods(&self) -> Result<usize, AppError> {
        Ok(self.state().pods.len())
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, AppError> {
        let mut state = self.state();
        let name = name_of(&job.metadata);
        if state.jobs.contains_key(&key(namespace, &name)) {
            return Err(already_exists("jobs.batch", &name));
        }
        state.jobs.insert(key(namespace, &name), job.clone());
        state.creates += 1;
        Ok(job.clone())
    }
}
