//! Instance lifecycle orchestrator
//!
//! Each operation is a fixed sequence of steps against the cluster, the
//! package tool and the loader service. The first failing step ends the
//! operation; nothing that changed the cluster is retried or rolled back.

pub mod facts;
pub mod values;


use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::cluster::{ClusterClient, NamespaceSpec};
use crate::dataload::{DataLoadClient, DataLoadRequest, LoadEndpoint, loader_url};
use crate::error::{
    AugmentationSnafu, ClusterSnafu, DataLoadAfterApplySnafu, DataLoadSnafu, HelmGetValuesSnafu,
    HelmInstallSnafu, HelmListSnafu, HelmUpgradeSnafu, IoSnafu, MissingConfigOverrideSnafu,
    MissingTagSnafu, NamespaceDeleteSnafu, NamespaceExistsSnafu, PackageSnafu, ReleaseListSnafu,
    Result,
};
use crate::helm::{self, PackageManager, ReleaseAction, ReleaseCommand, ReleaseSummary};
use crate::ingress::IngressRoute;
use crate::instance::{InstanceType, rescope_sets};
use crate::labels;
use crate::listing::{InstanceRow, ListFilter, select_rows};
use crate::settings::{DryRun, InstanceSettings};
use facts::ClusterFacts;

/// Upper bound on waiting for a deleted namespace to disappear
pub const NAMESPACE_DELETE_TIMEOUT: Duration = Duration::from_secs(600);

/// Log drain progress every this many polls
const DRAIN_PROGRESS_EVERY: u64 = 15;

/// Runs lifecycle operations for one instance at a time
pub struct Orchestrator {
    cluster: Arc<dyn ClusterClient>,
    packages: Arc<dyn PackageManager>,
    loader: DataLoadClient,
}

impl Orchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        packages: Arc<dyn PackageManager>,
        loader: DataLoadClient,
    ) -> Self {
        Self {
            cluster,
            packages,
            loader,
        }
    }

    /// Create the namespace, install the chart, then load configuration
    pub async fn install(&self, settings: &InstanceSettings) -> Result<()> {
        ensure!(settings.image_tag.is_some(), MissingTagSnafu);
        let name = settings.name.as_str();
        let instance_type = facts::instance_type(self.cluster.as_ref(), settings).await?;

        info!("Installing {name}");
        let facts = ClusterFacts::fetch(self.cluster.as_ref(), settings, settings.istio).await?;
        info!("Ingress port: {}", facts.ingress_port);

        if !settings.dry_run.is_on() {
            info!("Setting up namespace {name}");
            self.create_namespace(settings, instance_type, facts.istio)
                .await?;
        }

        for augmentation in &settings.augmentations {
            info!("Enabling augmentation {augmentation}");
        }

        let command = ReleaseCommand {
            action: if settings.dry_run == DryRun::Local {
                ReleaseAction::Template
            } else {
                ReleaseAction::Install
            },
            release: name.to_string(),
            chart: settings.chart_ref(instance_type),
            namespace: settings.namespace().to_string(),
            timeout_minutes: settings.timeout_minutes,
            values: values::install_values(settings, instance_type, &facts),
            dry_run: settings.dry_run.is_on(),
        };

        info!("Running helm install");
        let output = self.packages.apply(&command).await.context(PackageSnafu)?;
        ensure!(
            output.success(),
            HelmInstallSnafu {
                name,
                stderr: output.stderr
            }
        );

        // Nothing was deployed, so there is nothing to load
        if settings.dry_run.is_on() {
            return Ok(());
        }

        info!("Beginning data load");
        let request = load_request(settings, &facts, LoadEndpoint::Load);
        self.loader
            .run_data_load(self.cluster.as_ref(), &request)
            .await
            .context(DataLoadAfterApplySnafu { name })?;

        info!("To list ingress routes for this instance, run `gmskube ingress {name}`");
        info!("{name} installed successfully!");
        Ok(())
    }

    /// Upgrade the release in place, layering its current values over the
    /// chart defaults
    pub async fn upgrade(&self, settings: &InstanceSettings) -> Result<()> {
        ensure!(settings.image_tag.is_some(), MissingTagSnafu);
        let name = settings.name.as_str();

        info!("Upgrading {name}");
        let instance_type = facts::instance_type(self.cluster.as_ref(), settings).await?;
        info!("Instance type is: {instance_type}");

        info!("Getting existing helm values");
        let existing = self
            .packages
            .get_values(name, settings.namespace())
            .await
            .context(PackageSnafu)?;
        ensure!(
            existing.success(),
            HelmGetValuesSnafu {
                name,
                stderr: existing.stderr
            }
        );

        info!("Saving existing helm values to a temporary file");
        let saved = helm::save_values(&existing.stdout).context(IoSnafu {
            path: std::env::temp_dir(),
        })?;

        for augmentation in &settings.augmentations {
            info!("Enabling augmentation {augmentation}");
        }

        let command = ReleaseCommand {
            action: ReleaseAction::Upgrade,
            release: name.to_string(),
            chart: settings.chart_ref(instance_type),
            namespace: settings.namespace().to_string(),
            timeout_minutes: settings.timeout_minutes,
            values: values::upgrade_values(settings, instance_type, saved.path()),
            dry_run: settings.dry_run.is_on(),
        };

        info!("Running helm upgrade");
        let output = self.packages.apply(&command).await.context(PackageSnafu)?;
        ensure!(
            output.success(),
            HelmUpgradeSnafu {
                name,
                stderr: output.stderr
            }
        );

        info!("{name} upgrade complete!");
        Ok(())
    }

    /// Uninstall the release, wait for its workloads to drain, then delete
    /// the namespace unless it is being reused
    pub async fn uninstall(&self, settings: &InstanceSettings) -> Result<()> {
        let name = settings.name.as_str();
        let namespace = settings.namespace();
        info!("Uninstalling {name}");

        info!("Running helm uninstall");
        let output = self
            .packages
            .uninstall(name, namespace)
            .await
            .context(PackageSnafu)?;

        if output.success() {
            self.wait_for_drain(settings).await?;
        } else {
            warn!("Helm uninstall unsuccessful.");
        }

        if !settings.reuse_namespace {
            info!("Deleting namespace");
            self.cluster
                .delete_namespace(namespace, NAMESPACE_DELETE_TIMEOUT)
                .await
                .context(NamespaceDeleteSnafu { name })?;
        }

        info!("{name} uninstall complete!");
        Ok(())
    }

    /// Run a reduced data load with new overrides, then restart the
    /// deployments that only read configuration at startup
    pub async fn reconfigure(&self, settings: &InstanceSettings) -> Result<()> {
        settings
            .config_override
            .as_ref()
            .context(MissingConfigOverrideSnafu)?;
        let name = settings.name.as_str();
        let namespace = settings.namespace();

        info!("Reconfiguring {name}");
        let istio = facts::namespace_istio(self.cluster.as_ref(), namespace).await?;
        info!("Instance istio status: {istio}");
        let facts = ClusterFacts::fetch(self.cluster.as_ref(), settings, istio).await?;
        info!("Ingress port: {}", facts.ingress_port);

        info!("Beginning data load");
        let request = load_request(settings, &facts, LoadEndpoint::Reload);
        self.loader
            .run_data_load(self.cluster.as_ref(), &request)
            .await
            .context(DataLoadSnafu)?;

        info!("Rollout restart deployments");
        info!(
            "Getting list of deployments with label `{}`",
            labels::RESTART_AFTER_RECONFIG_SELECTOR
        );
        let deployments = self
            .cluster
            .list_deployments(namespace, labels::RESTART_AFTER_RECONFIG_SELECTOR)
            .await
            .context(ClusterSnafu)?;

        let restarted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        for deployment in &deployments {
            info!("Restarting deployment {deployment}");
            self.cluster
                .restart_deployment(namespace, deployment, &restarted_at)
                .await
                .context(ClusterSnafu)?;
        }

        info!("{name} reconfig complete!");
        Ok(())
    }

    /// Enable one augmentation on a running instance. `settings.sets` are
    /// scoped to the augmentation's values.
    pub async fn apply_augmentation(
        &self,
        settings: &InstanceSettings,
        augmentation: &str,
    ) -> Result<()> {
        let name = settings.name.as_str();
        info!("Applying augmentation `{augmentation}` to instance `{name}`.");

        let mut scoped = settings.clone();
        scoped.sets = rescope_sets(augmentation, &settings.sets);
        scoped.augmentations = vec![augmentation.to_string()];

        self.upgrade(&scoped)
            .await
            .map_err(Box::new)
            .context(AugmentationSnafu {
                action: "apply",
                augmentation,
                name,
            })?;

        info!("Augmentation '{augmentation}' successfully applied to {name}");
        Ok(())
    }

    pub async fn delete_augmentation(
        &self,
        settings: &InstanceSettings,
        augmentation: &str,
    ) -> Result<()> {
        let name = settings.name.as_str();
        info!("Deleting augmentation `{augmentation}` from instance `{name}`.");

        let mut scoped = settings.clone();
        scoped.sets = rescope_sets(augmentation, &settings.sets);
        scoped
            .sets
            .push(format!("augmentation.{augmentation}.enabled=false"));
        scoped.augmentations.clear();

        self.upgrade(&scoped)
            .await
            .map_err(Box::new)
            .context(AugmentationSnafu {
                action: "delete",
                augmentation,
                name,
            })?;

        info!("Augmentation `{augmentation}` successfully deleted from instance `{name}`.");
        Ok(())
    }

    /// Releases joined with the metadata labels of their `gms` config maps
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<InstanceRow>> {
        let output = self.packages.list().await.context(PackageSnafu)?;
        ensure!(
            output.success(),
            HelmListSnafu {
                stderr: output.stderr
            }
        );

        let stdout = output.stdout.trim();
        let releases: Vec<ReleaseSummary> = if stdout.is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(stdout).context(ReleaseListSnafu)?
        };

        let config_labels = self
            .cluster
            .gms_config_map_labels()
            .await
            .context(ClusterSnafu)?;

        select_rows(&releases, &config_labels, filter)
    }

    /// Routes published by a running instance, optionally only those of
    /// one service
    pub async fn ingress_routes(
        &self,
        settings: &InstanceSettings,
        service: Option<&str>,
    ) -> Result<Vec<IngressRoute>> {
        let namespace = settings.namespace();
        let istio = facts::namespace_istio(self.cluster.as_ref(), namespace).await?;
        let facts = ClusterFacts::fetch(self.cluster.as_ref(), settings, istio).await?;

        let rules = self
            .cluster
            .list_routes(namespace, istio)
            .await
            .context(ClusterSnafu)?;

        Ok(rules
            .iter()
            .filter(|rule| service.is_none_or(|s| rule.service == s))
            .map(|rule| IngressRoute::from_rule(rule, &facts.ingress_port, istio))
            .collect())
    }

    async fn create_namespace(
        &self,
        settings: &InstanceSettings,
        instance_type: InstanceType,
        istio: bool,
    ) -> Result<()> {
        let spec = NamespaceSpec::for_instance(&settings.name, instance_type.as_str(), istio);
        if istio {
            info!("Adding `istio-injection=enabled` label.");
        }

        match self.cluster.create_namespace(&spec).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() && settings.reuse_namespace => {
                self.cluster
                    .patch_namespace(&spec)
                    .await
                    .context(ClusterSnafu)
            }
            Err(e) if e.is_conflict() => NamespaceExistsSnafu {
                name: settings.name.as_str(),
            }
            .fail(),
            Err(source) => Err(source).context(ClusterSnafu),
        }
    }

    /// `helm uninstall` returns before its objects are gone. Poll until
    /// nothing carrying the helm management label is left, or warn after
    /// the timeout.
    async fn wait_for_drain(&self, settings: &InstanceSettings) -> Result<()> {
        let polls = settings.wait.polls_within(settings.timeout());

        for poll in 0..polls {
            let remaining = self
                .cluster
                .count_managed_workloads(settings.namespace())
                .await
                .context(ClusterSnafu)?;
            if remaining == 0 {
                return Ok(());
            }

            if poll % DRAIN_PROGRESS_EVERY == 0 {
                info!("Waiting for helm resources to terminate, {remaining} resources remaining");
            }
            sleep(settings.wait.poll_interval).await;
        }

        warn!("Timed out waiting for helm resources to terminate");
        Ok(())
    }
}

fn load_request(
    settings: &InstanceSettings,
    facts: &ClusterFacts,
    endpoint: LoadEndpoint,
) -> DataLoadRequest {
    let base_url = settings.loader_url.clone().unwrap_or_else(|| {
        loader_url(&settings.name, &facts.base_domain, &facts.ingress_port)
    });

    DataLoadRequest {
        namespace: settings.namespace().to_string(),
        base_url,
        endpoint,
        timeout: settings.timeout(),
        override_root: settings.config_override.clone(),
    }
}
