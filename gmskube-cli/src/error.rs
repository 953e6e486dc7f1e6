use std::path::PathBuf;

use snafu::Snafu;

use crate::cluster::ClusterError;
use crate::dataload::DataLoadError;
use crate::helm::PackageError;

/// How an error should be presented to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad arguments, reported before anything in the cluster changed
    UserInput,
    /// The cluster is not in the state the operation requires
    Precondition,
    /// A step of the operation failed
    Operation,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display(
        "Instance name '{name}' is invalid. It must be 3-128 characters of lowercase \
         letters, numbers or hyphens, and may not start or end with a hyphen."
    ))]
    InvalidInstanceName { name: String },

    #[snafu(display("Tag name is required."))]
    MissingTag,

    #[snafu(display("Config override path must be specified with --config"))]
    MissingConfigOverride,

    #[snafu(display(
        "Namespace already exists. Run `gmskube uninstall {name}`, or use `--reuse-namespace` argument."
    ))]
    NamespaceExists { name: String },

    #[snafu(display("Configmap '{config_map}' not found in '{namespace}' namespace."))]
    MissingConfigMap {
        config_map: String,
        namespace: String,
    },

    #[snafu(display(
        "Unable to determine instance type from 'gms' configmap in '{namespace}' namespace."
    ))]
    MissingInstanceType { namespace: String },

    #[snafu(display("Configmap '{config_map}' has no '{key}' entry"))]
    MissingConfigEntry { config_map: String, key: String },

    #[snafu(display("Kubernetes request failed: {source}"))]
    Cluster { source: ClusterError },

    #[snafu(display("Failed to run helm: {source}"))]
    Package { source: PackageError },

    #[snafu(display("Could not install instance {name}\n{stderr}"))]
    HelmInstall { name: String, stderr: String },

    #[snafu(display("Could not upgrade instance {name}\n{stderr}"))]
    HelmUpgrade { name: String, stderr: String },

    #[snafu(display("Unable to get existing values for instance {name}\n{stderr}"))]
    HelmGetValues { name: String, stderr: String },

    #[snafu(display("Could not list instances\n{stderr}"))]
    HelmList { stderr: String },

    #[snafu(display("Could not parse helm release list: {source}"))]
    ReleaseList { source: serde_json::Error },

    #[snafu(display("Data load failed: {source}"))]
    DataLoad { source: DataLoadError },

    #[snafu(display(
        "{name} was applied but its data load failed: {source}\n\
         Fix the cause and run `gmskube reconfig --config <dir> {name}` to retry the load."
    ))]
    DataLoadAfterApply { name: String, source: DataLoadError },

    #[snafu(display("{name} uninstall unsuccessful, please review errors/warnings above: {source}"))]
    NamespaceDelete { name: String, source: ClusterError },

    #[snafu(display("Failed to {action} augmentation `{augmentation}` for instance `{name}`\n{source}"))]
    Augmentation {
        action: &'static str,
        augmentation: String,
        name: String,
        source: Box<Error>,
    },

    #[snafu(display("Instance name `{name}` does not exist."))]
    InstanceNotFound { name: String },

    #[snafu(display("Failed to access {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse {}: {source}", path.display()))]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInstanceName { .. } | Self::MissingTag | Self::MissingConfigOverride => {
                ErrorKind::UserInput
            }
            Self::NamespaceExists { .. }
            | Self::MissingConfigMap { .. }
            | Self::MissingInstanceType { .. }
            | Self::MissingConfigEntry { .. }
            | Self::InstanceNotFound { .. } => ErrorKind::Precondition,
            Self::Augmentation { source, .. } => source.kind(),
            _ => ErrorKind::Operation,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
