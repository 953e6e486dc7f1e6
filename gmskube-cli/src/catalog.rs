//! Augmentation catalog read from the ian chart's augmentation values.

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use snafu::ResultExt;

use crate::error::{IoSnafu, Result, YamlSnafu};
use crate::listing::render_table;

/// Values file listing every augmentation, relative to the deploy directory
pub const AUGMENTATION_VALUES: &str = "ian/charts/augmentation/values.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AugmentationEntry {
    pub name: String,
    pub kind: String,
    pub labels: Vec<String>,
    pub wait: String,
    pub description: String,
}

fn string_field(metadata: &Value, key: &str, default: &str) -> String {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn entry(name: &Value, value: &Value) -> Option<AugmentationEntry> {
    let metadata = value.get("metadata").filter(|m| m.is_mapping())?;
    let labels = metadata
        .get("labels")
        .and_then(Value::as_sequence)
        .map(|seq| {
            seq.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(AugmentationEntry {
        name: name.as_str()?.to_string(),
        kind: string_field(metadata, "type", "none"),
        labels,
        wait: string_field(metadata, "wait", ""),
        description: string_field(metadata, "description", ""),
    })
}

/// Parse the augmentation values document. Keys without a `metadata`
/// mapping are not augmentations and are skipped. Entries are ordered by
/// type, keeping file order within a type.
pub fn parse_catalog(document: &str, path: &Path) -> Result<Vec<AugmentationEntry>> {
    let values: Value = serde_yaml::from_str(document).context(YamlSnafu { path })?;

    let mut entries: Vec<AugmentationEntry> = values
        .as_mapping()
        .map(|mapping| mapping.iter().filter_map(|(k, v)| entry(k, v)).collect())
        .unwrap_or_default();
    entries.sort_by(|a, b| a.kind.cmp(&b.kind));
    Ok(entries)
}

pub fn load_catalog(deploy_dir: &Path) -> Result<Vec<AugmentationEntry>> {
    let path: PathBuf = deploy_dir.join(AUGMENTATION_VALUES);
    let document = std::fs::read_to_string(&path).context(IoSnafu { path: &path })?;
    parse_catalog(&document, &path)
}

pub fn render_catalog(entries: &[AugmentationEntry]) -> String {
    let labels: Vec<String> = entries.iter().map(|e| e.labels.join(",")).collect();
    let rows: Vec<[&str; 4]> = entries
        .iter()
        .zip(&labels)
        .map(|(e, labels)| {
            [
                e.name.as_str(),
                e.kind.as_str(),
                labels.as_str(),
                e.description.as_str(),
            ]
        })
        .collect();
    render_table(["NAME", "TYPE", "LABELS", "DESCRIPTION"], &rows)
}
