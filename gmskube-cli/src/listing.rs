//! Installed instance listing.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use snafu::ensure;

use crate::error::{InstanceNotFoundSnafu, Result};
use crate::helm::ReleaseSummary;
use crate::labels;

const UNKNOWN: &str = "?";

/// Which releases to show
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub name: Option<String>,
    pub user: Option<String>,
    pub instance_type: Option<String>,
    /// Include releases that were not installed by gmskube
    pub show_all: bool,
}

/// One line of `gmskube list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRow {
    pub name: String,
    pub status: String,
    pub instance_type: String,
    pub user: String,
    pub updated: String,
    pub tag: String,
}

/// Labels of the `gms` config map recorded for `release`. Releases that
/// gmskube did not install have none.
fn labels_for<'a>(
    release: &ReleaseSummary,
    config_labels: &'a [BTreeMap<String, String>],
) -> Option<&'a BTreeMap<String, String>> {
    config_labels
        .iter()
        .find(|l| l.get(labels::GMS_NAME).is_some_and(|n| *n == release.name))
}

fn label<'a>(found: Option<&'a BTreeMap<String, String>>, key: &str) -> &'a str {
    found
        .and_then(|l| l.get(key))
        .map_or(UNKNOWN, String::as_str)
}

fn is_filtered(
    release: &ReleaseSummary,
    found: Option<&BTreeMap<String, String>>,
    filter: &ListFilter,
) -> bool {
    let unlabelled = found.is_none_or(BTreeMap::is_empty);
    (!filter.show_all && unlabelled)
        || filter.name.as_ref().is_some_and(|n| *n != release.name)
        || filter
            .user
            .as_deref()
            .is_some_and(|u| u != label(found, labels::GMS_USER))
        || filter
            .instance_type
            .as_deref()
            .is_some_and(|t| t != label(found, labels::GMS_TYPE))
}

/// Join helm releases with the `gms` config map labels and apply `filter`.
pub fn select_rows(
    releases: &[ReleaseSummary],
    config_labels: &[BTreeMap<String, String>],
    filter: &ListFilter,
) -> Result<Vec<InstanceRow>> {
    if let Some(name) = &filter.name {
        ensure!(
            releases.iter().any(|r| r.name == *name),
            InstanceNotFoundSnafu { name }
        );
    }

    Ok(releases
        .iter()
        .filter_map(|release| {
            let found = labels_for(release, config_labels);
            if is_filtered(release, found, filter) {
                return None;
            }
            Some(InstanceRow {
                name: release.name.clone(),
                status: release.status.clone(),
                instance_type: label(found, labels::GMS_TYPE).to_string(),
                user: label(found, labels::GMS_USER).to_string(),
                updated: label(found, labels::GMS_UPDATE_TIME).to_string(),
                tag: label(found, labels::GMS_IMAGE_TAG).to_string(),
            })
        })
        .collect())
}

/// Render rows as left-aligned columns separated by two spaces.
pub fn render_table<const N: usize>(headers: [&str; N], rows: &[[&str; N]]) -> String {
    let mut widths = headers.map(str::len);
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    for line in std::iter::once(&headers).chain(rows) {
        let mut rendered = String::new();
        for (i, (cell, width)) in line.iter().zip(widths).enumerate() {
            if i > 0 {
                rendered.push_str("  ");
            }
            let _ = write!(rendered, "{cell:<width$}");
        }
        out.push_str(rendered.trim_end());
        out.push('\n');
    }
    out
}

pub fn render_instances(rows: &[InstanceRow]) -> String {
    let cells: Vec<[&str; 6]> = rows
        .iter()
        .map(|r| {
            [
                r.name.as_str(),
                r.status.as_str(),
                r.instance_type.as_str(),
                r.user.as_str(),
                r.updated.as_str(),
                r.tag.as_str(),
            ]
        })
        .collect();
    render_table(["NAME", "STATUS", "TYPE", "USER", "UPDATED", "TAG"], &cells)
}
