use std::io::{Cursor, Write};
use std::path::Path;

use snafu::{ResultExt, ensure};
use tracing::debug;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use super::{
    BundleIoSnafu, BundleRootSnafu, BundleWalkSnafu, BundleWriteSnafu, DataLoadError,
};

/// The only override trees the loader accepts
pub const OVERRIDE_DIRS: [&str; 2] = ["processing", "user-preferences"];

/// Zip every file under the override trees of `root`, with entry names
/// relative to `root`. Other directories are left out, as are override
/// names that are not directories. Symlinks are followed.
pub fn build_override_bundle(root: &Path) -> Result<Vec<u8>, DataLoadError> {
    ensure!(root.is_dir(), BundleRootSnafu { path: root });

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for dir in OVERRIDE_DIRS {
        let tree = root.join(dir);
        if !tree.is_dir() {
            continue;
        }

        for entry in WalkDir::new(&tree).follow_links(true).sort_by_file_name() {
            let entry = entry.context(BundleWalkSnafu)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            debug!("Adding to zip: {name}");
            let contents = std::fs::read(entry.path()).context(BundleIoSnafu {
                path: entry.path(),
            })?;
            writer.start_file(name, options).context(BundleWriteSnafu)?;
            writer
                .write_all(&contents)
                .context(BundleIoSnafu { path: entry.path() })?;
        }
    }

    let cursor = writer.finish().context(BundleWriteSnafu)?;
    Ok(cursor.into_inner())
}
