//! Typed settings for one invocation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::instance::{ChartSource, InstanceType};

pub const APP_NAME: &str = "gmskube";

/// Deploy directory used inside the tool's container image
pub const CONTAINER_DEPLOY_DIR: &str = "/deploy";

pub const DEFAULT_TIMEOUT_MINUTES: u64 = 5;

/// Operator defaults read from the user config directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Directory holding the chart directories
    pub deploy_dir: PathBuf,
    pub timeout_minutes: u64,
    /// Registry used when `CI_DOCKER_REGISTRY` is not set
    pub docker_registry: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            deploy_dir: PathBuf::from(CONTAINER_DEPLOY_DIR),
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            docker_registry: String::new(),
        }
    }
}

impl Defaults {
    /// Load defaults from `path`, or from the standard config location.
    ///
    /// A file that cannot be read is reported and the built-in defaults
    /// are used instead.
    pub fn load(path: Option<&Path>) -> Self {
        let loaded = match path {
            Some(path) => confy::load_path(path),
            None => confy::load(APP_NAME, None),
        };

        match loaded {
            Ok(defaults) => {
                debug!("Loaded operator defaults: {defaults:?}");
                defaults
            }
            Err(e) => {
                warn!("Unable to read operator defaults, using built-in values: {e}");
                Self::default()
            }
        }
    }
}

/// How far `--dry-run` goes; repeating the flag renders locally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DryRun {
    #[default]
    Off,
    /// helm validates the release against the API server
    Server,
    /// `helm template`, without contacting the cluster
    Local,
}

impl DryRun {
    pub fn from_count(count: u8) -> Self {
        match count {
            0 => Self::Off,
            1 => Self::Server,
            _ => Self::Local,
        }
    }

    pub fn is_on(self) -> bool {
        self != Self::Off
    }
}

/// Poll cadence shared by every wait loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    pub poll_interval: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl WaitSettings {
    /// Number of polls that fit in `timeout`, at least one.
    pub fn polls_within(&self, timeout: Duration) -> u64 {
        let interval = self.poll_interval.as_millis().max(1);
        u64::try_from(timeout.as_millis() / interval)
            .unwrap_or(u64::MAX)
            .max(1)
    }
}

/// Everything one lifecycle operation needs to know about its instance
#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub name: String,
    pub chart: ChartSource,
    pub image_tag: Option<String>,
    /// Augmentations enabled by this operation
    pub augmentations: Vec<String>,
    pub sets: Vec<String>,
    pub set_strings: Vec<String>,
    pub values: Vec<PathBuf>,
    pub timeout_minutes: u64,
    pub reuse_namespace: bool,
    pub dry_run: DryRun,
    pub wallet_path: Option<PathBuf>,
    /// Enable istio injection for a new namespace
    pub istio: bool,
    /// Directory of configuration overrides bundled into the data load
    pub config_override: Option<PathBuf>,
    /// Overrides the ingress port from the cluster's ingress config
    pub ingress_port: Option<String>,
    pub deploy_dir: PathBuf,
    pub docker_registry: String,
    /// Operator recorded in `global.user`
    pub user: String,
    /// Overrides the loader address derived from the ingress config
    pub loader_url: Option<String>,
    pub wait: WaitSettings,
}

impl InstanceSettings {
    pub fn new(name: impl Into<String>, chart: ChartSource, defaults: &Defaults) -> Self {
        Self {
            name: name.into(),
            chart,
            image_tag: None,
            augmentations: Vec::new(),
            sets: Vec::new(),
            set_strings: Vec::new(),
            values: Vec::new(),
            timeout_minutes: defaults.timeout_minutes,
            reuse_namespace: false,
            dry_run: DryRun::Off,
            wallet_path: None,
            istio: false,
            config_override: None,
            ingress_port: None,
            deploy_dir: defaults.deploy_dir.clone(),
            docker_registry: defaults.docker_registry.clone(),
            user: whoami::username(),
            loader_url: None,
            wait: WaitSettings::default(),
        }
    }

    /// The namespace owning every object of the instance
    pub fn namespace(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }

    /// Tag to deploy; empty when not supplied to a non-mutating operation.
    pub fn tag(&self) -> &str {
        self.image_tag.as_deref().unwrap_or_default()
    }

    /// Chart argument given to helm, relative to the deploy directory
    pub fn chart_ref(&self, instance_type: InstanceType) -> String {
        match &self.chart {
            ChartSource::Custom(path) => path.display().to_string(),
            ChartSource::Type(_) | ChartSource::Installed => instance_type.as_str().to_string(),
        }
    }

    /// Default values file of the chart
    pub fn chart_values_file(&self, instance_type: InstanceType) -> PathBuf {
        self.deploy_dir
            .join(self.chart_ref(instance_type))
            .join("values.yaml")
    }
}
