//! Cluster resource access used by the lifecycle operations.

mod kubernetes;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use snafu::Snafu;

pub use kubernetes::KubeCluster;

use crate::labels;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClusterError {
    #[snafu(display("{kind} '{name}' not found"))]
    NotFound { kind: &'static str, name: String },

    #[snafu(display("{kind} '{name}' already exists"))]
    Conflict { kind: &'static str, name: String },

    #[snafu(display("{kind} '{name}': {source}"))]
    Api {
        kind: &'static str,
        name: String,
        source: kube::Error,
    },

    #[snafu(display("Unable to connect to the cluster: {source}"))]
    Connect { source: kube::Error },

    #[snafu(display("Watching namespace '{name}' failed: {source}"))]
    Watch {
        name: String,
        source: kube::runtime::wait::Error,
    },

    #[snafu(display("Timed out after {waited:?} waiting for namespace '{name}' to be deleted"))]
    DeleteTimeout { name: String, waited: Duration },

    /// Failure injected by an in-memory cluster
    #[snafu(display("{message}"))]
    Injected { message: String },
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Desired name and labels of an instance namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl NamespaceSpec {
    /// Standard instance labels, pod security labels, and the istio
    /// injection label when requested.
    pub fn for_instance(name: &str, instance_type: &str, istio: bool) -> Self {
        let mut labels = BTreeMap::from([
            (labels::K8S_INSTANCE.to_string(), name.to_string()),
            (labels::K8S_NAME.to_string(), instance_type.to_string()),
            (labels::K8S_PART_OF.to_string(), instance_type.to_string()),
        ]);
        labels.extend(
            labels::POD_SECURITY_LABELS
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
        );
        if istio {
            labels.insert(
                labels::ISTIO_INJECTION.to_string(),
                labels::ISTIO_INJECTION_ENABLED.to_string(),
            );
        }

        Self {
            name: name.to_string(),
            labels,
        }
    }
}

/// Labels and data of a config map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMapInfo {
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
}

/// One published path of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    /// Virtual service name, or the backend service of an ingress path
    pub service: String,
    pub host: String,
    pub path: String,
}

/// Cluster operations needed by the orchestrator.
///
/// Missing objects surface as [`ClusterError::NotFound`] and creation
/// collisions as [`ClusterError::Conflict`].
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_namespace(&self, spec: &NamespaceSpec) -> Result<(), ClusterError>;

    /// Merge `spec.labels` into an existing namespace
    async fn patch_namespace(&self, spec: &NamespaceSpec) -> Result<(), ClusterError>;

    async fn namespace_labels(&self, name: &str) -> Result<BTreeMap<String, String>, ClusterError>;

    /// Delete a namespace and wait up to `timeout` for it to disappear
    async fn delete_namespace(&self, name: &str, timeout: Duration) -> Result<(), ClusterError>;

    async fn config_map(&self, namespace: &str, name: &str) -> Result<ConfigMapInfo, ClusterError>;

    /// Labels of every `gms` config map in the cluster
    async fn gms_config_map_labels(&self) -> Result<Vec<BTreeMap<String, String>>, ClusterError>;

    /// Succeeds when the service exists
    async fn read_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Daemon sets, deployments, replica sets, stateful sets and volume
    /// claims still carrying the helm management label
    async fn count_managed_workloads(&self, namespace: &str) -> Result<usize, ClusterError>;

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<String>, ClusterError>;

    /// Trigger a rolling restart by stamping the pod template
    async fn restart_deployment(
        &self,
        namespace: &str,
        name: &str,
        restarted_at: &str,
    ) -> Result<(), ClusterError>;

    /// Routes from istio virtual services, or from ingresses when the
    /// namespace does not use istio
    async fn list_routes(
        &self,
        namespace: &str,
        istio: bool,
    ) -> Result<Vec<RouteRule>, ClusterError>;

    /// API server version as `major.minor`
    async fn server_version(&self) -> Result<String, ClusterError>;
}
