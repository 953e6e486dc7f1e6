//! Cluster lookups an operation performs once, before its first step.

use snafu::{OptionExt, ResultExt};
use tracing::debug;

use crate::cluster::ClusterClient;
use crate::error::{
    ClusterSnafu, MissingConfigEntrySnafu, MissingConfigMapSnafu, MissingInstanceTypeSnafu,
    Result,
};
use crate::instance::InstanceType;
use crate::labels;
use crate::settings::InstanceSettings;

/// Contents of the shared `ingress-ports-config` config map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressConfig {
    pub base_domain: String,
    pub istio_port: String,
    pub nginx_port: String,
}

/// What an operation knows about the cluster and its instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterFacts {
    pub base_domain: String,
    pub ingress_port: String,
    pub istio: bool,
}

impl ClusterFacts {
    /// Resolve the ingress address, honoring a port supplied on the
    /// command line.
    pub async fn fetch(
        cluster: &dyn ClusterClient,
        settings: &InstanceSettings,
        istio: bool,
    ) -> Result<Self> {
        let ingress = ingress_config(cluster).await?;
        let ingress_port = match &settings.ingress_port {
            Some(port) => port.clone(),
            None if istio => ingress.istio_port,
            None => ingress.nginx_port,
        };
        debug!("Base domain: {}", ingress.base_domain);
        debug!("Ingress port: {ingress_port}");

        Ok(Self {
            base_domain: ingress.base_domain,
            ingress_port,
            istio,
        })
    }
}

pub async fn ingress_config(cluster: &dyn ClusterClient) -> Result<IngressConfig> {
    let config_map = match cluster
        .config_map(labels::GMS_SYSTEM_NAMESPACE, labels::INGRESS_PORTS_CONFIG_MAP)
        .await
    {
        Ok(config_map) => config_map,
        Err(e) if e.is_not_found() => {
            return MissingConfigMapSnafu {
                config_map: labels::INGRESS_PORTS_CONFIG_MAP,
                namespace: labels::GMS_SYSTEM_NAMESPACE,
            }
            .fail();
        }
        Err(source) => return Err(source).context(ClusterSnafu),
    };

    let entry = |key: &str| {
        config_map.data.get(key).cloned().context(MissingConfigEntrySnafu {
            config_map: labels::INGRESS_PORTS_CONFIG_MAP,
            key,
        })
    };

    Ok(IngressConfig {
        base_domain: entry("base_domain")?,
        istio_port: entry("istio_port")?,
        nginx_port: entry("nginx_port")?,
    })
}

/// Whether the instance namespace has istio injection enabled
pub async fn namespace_istio(cluster: &dyn ClusterClient, namespace: &str) -> Result<bool> {
    let namespace_labels = cluster
        .namespace_labels(namespace)
        .await
        .context(ClusterSnafu)?;
    let istio = namespace_labels
        .get(labels::ISTIO_INJECTION)
        .is_some_and(|v| v == labels::ISTIO_INJECTION_ENABLED);
    debug!("Is Istio: {istio}");
    Ok(istio)
}

/// The instance type from the settings, or from the `gms/type` label the
/// install recorded on the instance's `gms` config map.
pub async fn instance_type(
    cluster: &dyn ClusterClient,
    settings: &InstanceSettings,
) -> Result<InstanceType> {
    if let Some(known) = settings.chart.known_type() {
        return Ok(known);
    }

    let namespace = settings.namespace();
    let config_map = match cluster.config_map(namespace, labels::GMS_CONFIG_MAP).await {
        Ok(config_map) => config_map,
        Err(e) if e.is_not_found() => {
            return MissingConfigMapSnafu {
                config_map: labels::GMS_CONFIG_MAP,
                namespace,
            }
            .fail();
        }
        Err(source) => return Err(source).context(ClusterSnafu),
    };

    let instance_type = config_map
        .labels
        .get(labels::GMS_TYPE)
        .and_then(|value| InstanceType::from_label(value))
        .context(MissingInstanceTypeSnafu { namespace })?;
    debug!("Instance type: {instance_type}");
    Ok(instance_type)
}
