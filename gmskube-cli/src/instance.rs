//! Instance identity: names, types and augmentations.

use std::fmt;
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{InvalidInstanceNameSnafu, Result};

/// Augmentations that may be layered onto an instance.
pub const AUGMENTATIONS: &[&str] = &[
    "bastion",
    "bridged-data-source-simulator",
    "javadoc",
    "jest",
    "minio-test-reports",
    "mock-data-server",
    "mock-waveform-service",
    "oracle",
    "swagger",
];

/// Hostname label rule (RFC 1123), limited to 3-128 characters.
const INSTANCE_NAME_PATTERN: &str = r"^[a-z0-9][a-z0-9-]{1,126}[a-z0-9]$";

/// The kind of package an instance deploys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    Ian,
    Keycloak,
    Logging,
    /// A local chart directory rather than a packaged type
    #[value(skip)]
    Custom,
}

impl InstanceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ian => "ian",
            Self::Keycloak => "keycloak",
            Self::Logging => "logging",
            Self::Custom => "custom",
        }
    }

    /// Parse the `gms/type` label value
    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "ian" => Some(Self::Ian),
            "keycloak" => Some(Self::Keycloak),
            "logging" => Some(Self::Logging),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Whether value groups for `category` apply. Custom charts receive
    /// every group.
    pub fn includes(self, category: Self) -> bool {
        self == category || self == Self::Custom
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the chart for an instance comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartSource {
    /// A packaged chart named after the type under the deploy directory
    Type(InstanceType),
    /// A local chart directory
    Custom(PathBuf),
    /// Whatever type the running instance recorded in its `gms` config map
    Installed,
}

impl ChartSource {
    /// The type known without asking the cluster
    pub fn known_type(&self) -> Option<InstanceType> {
        match self {
            Self::Type(t) => Some(*t),
            Self::Custom(_) => Some(InstanceType::Custom),
            Self::Installed => None,
        }
    }
}

/// Maximum length of an image tag slug
const TAG_MAX_LEN: usize = 63;

/// Normalize a branch or tag name the way CI derives image tags: lowercase,
/// anything but `0-9a-z` replaced by `-`, at most 63 characters, and no
/// leading or trailing `-`.
pub fn slugify_tag(tag: &str) -> String {
    let slug: String = tag
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .take(TAG_MAX_LEN)
        .collect();
    slug.trim_matches('-').to_string()
}

/// `--set` values must be `key=value`
pub fn validate_set(value: &str) -> Result<String, String> {
    match value.split_once('=') {
        Some((key, _)) if !key.trim().is_empty() => Ok(value.to_string()),
        _ => Err(format!("'{value}' is not of the form KEY=VALUE")),
    }
}

/// Check that `name` can be used as a namespace and DNS label.
///
/// Instance names are 3-128 characters of lowercase letters, digits and
/// hyphens, and may not start or end with a hyphen.
pub fn validate_instance_name(name: &str) -> Result<()> {
    let valid = Regex::new(INSTANCE_NAME_PATTERN).is_ok_and(|re| re.is_match(name));
    ensure!(valid, InvalidInstanceNameSnafu { name });
    Ok(())
}

pub fn is_known_augmentation(name: &str) -> bool {
    AUGMENTATIONS.contains(&name)
}

/// Place `key=value` overrides under an augmentation's value scope.
pub fn rescope_sets(augmentation: &str, sets: &[String]) -> Vec<String> {
    sets.iter()
        .map(|set| format!("augmentation.{augmentation}.{set}"))
        .collect()
}
