// src/rebuild/bundle.rs

//! Bundling of a batch's archives
//!
//! Packs every `.deb` a batch produced into one gzip-compressed tar, each
//! stored as `./<file name>`. The bundle is written to a temporary file next
//! to its destination and renamed into place.

use crate::error::{Error, Result};
use crate::rebuild::BatchReport;
use flate2::write::GzEncoder;
use std::collections::HashSet;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default bundle file name, created in the output directory
pub const DEFAULT_BUNDLE_NAME: &str = "debforge-packages.tar.gz";

/// A written bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub path: PathBuf,
    /// Archives packed, repeats counted once
    pub packages: usize,
    /// Archives deleted after packing
    pub removed: usize,
}

/// Pack the successful archives of `report` into `archive_path`
///
/// With `remove_after`, each packed `.deb` is deleted once the bundle is in
/// place. A deletion failure is logged and leaves the bundle intact.
pub fn bundle(
    report: &BatchReport,
    archive_path: &Path,
    remove_after: bool,
) -> Result<Bundle> {
    let fail = |reason: String| Error::Bundle {
        path: archive_path.display().to_string(),
        reason,
    };
    let io_fail = |e: io::Error| fail(e.to_string());

    let mut seen = HashSet::new();
    let sources: Vec<&Path> = report
        .succeeded()
        .filter_map(|result| result.output_path())
        .filter(|path| seen.insert(*path))
        .collect();

    let parent = match archive_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = tempfile::Builder::new()
        .prefix(".debforge-")
        .suffix(".partial")
        .tempfile_in(parent)
        .map_err(|e| fail(format!("cannot write to {}: {}", parent.display(), e)))?;

    {
        let encoder =
            GzEncoder::new(BufWriter::new(temp.as_file()), flate2::Compression::default());
        let mut tar = tar::Builder::new(encoder);

        for source in &sources {
            let Some(name) = source.file_name() else {
                continue;
            };
            debug!("Bundling {}", source.display());
            tar.append_path_with_name(source, Path::new(".").join(name))
                .map_err(|e| fail(format!("{}: {}", source.display(), e)))?;
        }

        let mut writer = tar
            .into_inner()
            .and_then(GzEncoder::finish)
            .map_err(io_fail)?;
        writer.flush().map_err(io_fail)?;
    }

    temp.as_file().sync_all().map_err(io_fail)?;
    temp.persist(archive_path)
        .map_err(|e| fail(format!("cannot move bundle into place: {}", e.error)))?;

    let mut removed = 0;
    if remove_after {
        for source in &sources {
            match fs::remove_file(source) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Cannot remove {}: {}", source.display(), e),
            }
        }
    }

    info!(
        "Bundled {} packages into {}",
        sources.len(),
        archive_path.display()
    );

    Ok(Bundle {
        path: archive_path.to_path_buf(),
        packages: sources.len(),
        removed,
    })
}
