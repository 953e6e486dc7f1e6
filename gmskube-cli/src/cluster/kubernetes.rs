use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
    PostParams,
};
use kube::runtime::wait::{await_condition, conditions};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde_json::json;
use snafu::ResultExt;
use tracing::debug;

use super::{
    ClusterClient, ClusterError, ConfigMapInfo, ConnectSnafu, DeleteTimeoutSnafu, NamespaceSpec,
    RouteRule, WatchSnafu,
};
use crate::labels;

/// [`ClusterClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connect using the in-cluster service account or the local kubeconfig
    pub async fn connect() -> Result<Self, ClusterError> {
        let client = Client::try_default().await.context(ConnectSnafu)?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn count_managed<K>(&self, namespace: &str) -> Result<usize, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let params = ListParams::default().labels(labels::MANAGED_BY_HELM_SELECTOR);
        let list = self
            .namespaced::<K>(namespace)
            .list_metadata(&params)
            .await
            .map_err(api_error("workload list", namespace))?;
        Ok(list.items.len())
    }
}

/// Separate missing and conflicting objects from every other API failure
/// by status code.
fn api_error(kind: &'static str, name: &str) -> impl FnOnce(kube::Error) -> ClusterError {
    let name = name.to_string();
    move |err| match err {
        kube::Error::Api(response) if response.code == 404 => ClusterError::NotFound { kind, name },
        kube::Error::Api(response) if response.code == 409 => ClusterError::Conflict { kind, name },
        source => ClusterError::Api { kind, name, source },
    }
}

fn virtual_service() -> ApiResource {
    let gvk = GroupVersionKind::gvk("networking.istio.io", "v1beta1", "VirtualService");
    ApiResource::from_gvk_with_plural(&gvk, "virtualservices")
}

/// Every `match.uri.prefix` of a virtual service, served on its first host.
/// Matches without a prefix are not routes.
fn virtual_service_routes(object: &DynamicObject) -> Vec<RouteRule> {
    let service = object.metadata.name.clone().unwrap_or_default();
    let spec = &object.data["spec"];
    let Some(host) = spec["hosts"][0].as_str() else {
        return Vec::new();
    };

    spec["http"]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|http| http["match"].as_array().into_iter().flatten())
        .filter_map(|m| m["uri"]["prefix"].as_str())
        .map(|prefix| RouteRule {
            service: service.clone(),
            host: host.to_string(),
            path: prefix.to_string(),
        })
        .collect()
}

fn ingress_routes(ingress: &Ingress) -> Vec<RouteRule> {
    let rules = ingress.spec.as_ref().and_then(|spec| spec.rules.as_ref());
    let mut routes = Vec::new();
    for rule in rules.into_iter().flatten() {
        let host = rule.host.clone().unwrap_or_default();
        for path in rule.http.iter().flat_map(|http| &http.paths) {
            let Some(backend) = &path.backend.service else {
                continue;
            };
            routes.push(RouteRule {
                service: backend.name.clone(),
                host: host.clone(),
                path: path.path.clone().unwrap_or_default(),
            });
        }
    }
    routes
}

fn namespace_object(spec: &NamespaceSpec) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            labels: Some(spec.labels.clone()),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn create_namespace(&self, spec: &NamespaceSpec) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.create(&PostParams::default(), &namespace_object(spec))
            .await
            .map_err(api_error("namespace", &spec.name))?;
        Ok(())
    }

    async fn patch_namespace(&self, spec: &NamespaceSpec) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "labels": spec.labels } });
        api.patch(&spec.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(api_error("namespace", &spec.name))?;
        Ok(())
    }

    async fn namespace_labels(&self, name: &str) -> Result<BTreeMap<String, String>, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = api.get(name).await.map_err(api_error("namespace", name))?;
        Ok(namespace.metadata.labels.unwrap_or_default())
    }

    async fn delete_namespace(&self, name: &str, timeout: Duration) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let deleted = api
            .delete(name, &DeleteParams::default())
            .await
            .map_err(api_error("namespace", name))?;

        // Right means the object was already gone when the call returned
        let Some(uid) = deleted.left().and_then(|ns| ns.metadata.uid) else {
            return Ok(());
        };

        debug!("Watching namespace {name} ({uid}) for deletion");
        tokio::time::timeout(timeout, await_condition(api, name, conditions::is_deleted(&uid)))
            .await
            .map_err(|_| {
                DeleteTimeoutSnafu {
                    name,
                    waited: timeout,
                }
                .build()
            })?
            .context(WatchSnafu { name })?;
        Ok(())
    }

    async fn config_map(&self, namespace: &str, name: &str) -> Result<ConfigMapInfo, ClusterError> {
        let config_map = self
            .namespaced::<ConfigMap>(namespace)
            .get(name)
            .await
            .map_err(api_error("configmap", name))?;

        Ok(ConfigMapInfo {
            labels: config_map.metadata.labels.unwrap_or_default(),
            data: config_map.data.unwrap_or_default(),
        })
    }

    async fn gms_config_map_labels(&self) -> Result<Vec<BTreeMap<String, String>>, ClusterError> {
        let api: Api<ConfigMap> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("metadata.name={}", labels::GMS_CONFIG_MAP));
        let list = api
            .list_metadata(&params)
            .await
            .map_err(api_error("configmap", labels::GMS_CONFIG_MAP))?;

        Ok(list
            .items
            .into_iter()
            .map(|item| item.metadata.labels.unwrap_or_default())
            .collect())
    }

    async fn read_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.namespaced::<Service>(namespace)
            .get_metadata(name)
            .await
            .map_err(api_error("service", name))?;
        Ok(())
    }

    async fn count_managed_workloads(&self, namespace: &str) -> Result<usize, ClusterError> {
        let daemonsets = self.count_managed::<DaemonSet>(namespace).await?;
        let deployments = self.count_managed::<Deployment>(namespace).await?;
        let replicasets = self.count_managed::<ReplicaSet>(namespace).await?;
        let statefulsets = self.count_managed::<StatefulSet>(namespace).await?;
        let claims = self.count_managed::<PersistentVolumeClaim>(namespace).await?;
        Ok(daemonsets + deployments + replicasets + statefulsets + claims)
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let list = self
            .namespaced::<Deployment>(namespace)
            .list_metadata(&ListParams::default().labels(selector))
            .await
            .map_err(api_error("deployment list", namespace))?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|item| item.metadata.name)
            .collect())
    }

    async fn restart_deployment(
        &self,
        namespace: &str,
        name: &str,
        restarted_at: &str,
    ) -> Result<(), ClusterError> {
        let patch = json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": { (labels::RESTARTED_AT_ANNOTATION): restarted_at }
                    }
                }
            }
        });
        self.namespaced::<Deployment>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(api_error("deployment", name))?;
        Ok(())
    }

    async fn list_routes(
        &self,
        namespace: &str,
        istio: bool,
    ) -> Result<Vec<RouteRule>, ClusterError> {
        if istio {
            let api: Api<DynamicObject> =
                Api::namespaced_with(self.client.clone(), namespace, &virtual_service());
            let list = api
                .list(&ListParams::default())
                .await
                .map_err(api_error("virtualservice list", namespace))?;
            return Ok(list.items.iter().flat_map(virtual_service_routes).collect());
        }

        let list = self
            .namespaced::<Ingress>(namespace)
            .list(&ListParams::default())
            .await
            .map_err(api_error("ingress list", namespace))?;
        Ok(list.items.iter().flat_map(ingress_routes).collect())
    }

    async fn server_version(&self) -> Result<String, ClusterError> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(api_error("version", "apiserver"))?;
        Ok(format!(
            "{}.{}",
            info.major,
            info.minor.trim_end_matches('+')
        ))
    }
}
