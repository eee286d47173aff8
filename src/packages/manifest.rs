// src/packages/manifest.rs

//! Installed file manifest resolution
//!
//! dpkg records the paths owned by each package in `<admin>/info/<id>.list`.
//! Every listed path is stat'd against the live filesystem under the
//! database root; paths that vanished since installation are kept as
//! [`EntryStatus::Missing`] so the archive builder can warn about them.

use crate::db::Database;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Maintainer side files copied into the control block, in archive order
pub const CONTROL_FILE_NAMES: [&str; 10] = [
    "conffiles",
    "preinst",
    "postinst",
    "prerm",
    "postrm",
    "config",
    "templates",
    "triggers",
    "shlibs",
    "symbols",
];

/// Type of a filesystem entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink { target: PathBuf },
    /// FIFOs, sockets and device nodes
    Other,
}

/// Filesystem metadata captured at resolve time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub kind: FileKind,
    /// Permission bits, including setuid/setgid/sticky
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Present(FileMetadata),
    Missing,
}

/// One path owned by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Absolute path as listed by dpkg
    pub path: PathBuf,
    pub status: EntryStatus,
}

impl ManifestEntry {
    /// Path relative to the filesystem root
    pub fn relative_path(&self) -> &Path {
        self.path.strip_prefix("/").unwrap_or(&self.path)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.status, EntryStatus::Missing)
    }

    pub fn metadata(&self) -> Option<&FileMetadata> {
        match &self.status {
            EntryStatus::Present(metadata) => Some(metadata),
            EntryStatus::Missing => None,
        }
    }
}

/// Maintainer side file found in the dpkg info directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFile {
    /// Member name inside the control block, e.g. `postinst`
    pub name: String,
    pub path: PathBuf,
}

/// Files owned by one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    pub package: String,
    /// Entries in list-file order, duplicates removed
    pub entries: Vec<ManifestEntry>,
    pub control_files: Vec<ControlFile>,
}

impl FileManifest {
    pub fn missing(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|entry| entry.is_missing())
    }

    pub fn present(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|entry| !entry.is_missing())
    }
}

/// Resolve the manifest of `identifier` against `db`
///
/// Fails only when the package is unknown or its list file cannot be read.
pub fn resolve(db: &Database, identifier: &str) -> Result<FileManifest> {
    if db.get(identifier).is_none() {
        return Err(Error::UnknownPackage(identifier.to_string()));
    }

    let list_path = db.info_dir().join(format!("{}.list", identifier));
    let list = fs::read(&list_path).map_err(|e| Error::Manifest {
        package: identifier.to_string(),
        reason: format!("{}: {}", list_path.display(), e),
    })?;

    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for line in list.split(|byte| *byte == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        // `/.` stands for the root directory itself, which every data block
        // already starts with
        if line.is_empty() || line == b"/." {
            continue;
        }

        let path = PathBuf::from(OsStr::from_bytes(line));
        if !seen.insert(path.clone()) {
            continue;
        }

        let status = stat_entry(db.root(), &path);
        entries.push(ManifestEntry { path, status });
    }

    let control_files = CONTROL_FILE_NAMES
        .iter()
        .filter_map(|name| {
            let path = db.info_dir().join(format!("{}.{}", identifier, name));
            path.is_file().then(|| ControlFile {
                name: name.to_string(),
                path,
            })
        })
        .collect();

    let manifest = FileManifest {
        package: identifier.to_string(),
        entries,
        control_files,
    };

    debug!(
        "Resolved {} entries ({} missing) for {}",
        manifest.entries.len(),
        manifest.missing().count(),
        identifier
    );

    Ok(manifest)
}

fn stat_entry(root: &Path, path: &Path) -> EntryStatus {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        warn!("Refusing {}: path leaves the root", path.display());
        return EntryStatus::Missing;
    }

    let relative = path.strip_prefix("/").unwrap_or(path);
    let on_disk = root.join(relative);

    let metadata = match fs::symlink_metadata(&on_disk) {
        Ok(metadata) => metadata,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Cannot stat {}: {}", on_disk.display(), e);
            }
            return EntryStatus::Missing;
        }
    };

    let file_type = metadata.file_type();
    let kind = if file_type.is_symlink() {
        match fs::read_link(&on_disk) {
            Ok(target) => FileKind::Symlink { target },
            Err(e) => {
                warn!("Cannot read link {}: {}", on_disk.display(), e);
                return EntryStatus::Missing;
            }
        }
    } else if file_type.is_dir() {
        FileKind::Directory
    } else if file_type.is_file() {
        FileKind::Regular
    } else {
        FileKind::Other
    };

    EntryStatus::Present(FileMetadata {
        kind,
        mode: metadata.mode() & 0o7777,
        uid: metadata.uid(),
        gid: metadata.gid(),
        size: if file_type.is_file() { metadata.len() } else { 0 },
        mtime: u64::try_from(metadata.mtime()).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseOptions};
    use std::os::unix::fs::symlink;

    fn fixture() -> (tempfile::TempDir, Database) {
        let root = tempfile::tempdir().unwrap();
        let admin = root.path().join("var/lib/dpkg");
        fs::create_dir_all(admin.join("info")).unwrap();
        fs::write(
            admin.join("status"),
            "Package: hosts\nVersion: 1.0.0\nStatus: install ok installed\n\nPackage: nolist\nVersion: 1\n",
        )
        .unwrap();
        fs::write(
            admin.join("info/hosts.list"),
            "/.\n/etc\n/etc/hosts\n/etc/hosts.link\n/etc/gone\n/etc/hosts\n",
        )
        .unwrap();
        fs::write(admin.join("info/hosts.postinst"), "#!/bin/sh\nexit 0\n").unwrap();

        fs::create_dir_all(root.path().join("etc")).unwrap();
        fs::write(root.path().join("etc/hosts"), "127.0.0.1 localhost\n").unwrap();
        symlink("hosts", root.path().join("etc/hosts.link")).unwrap();

        let db = Database::open_with(root.path(), &DatabaseOptions::default()).unwrap();
        (root, db)
    }

    #[test]
    fn test_resolve_entries() {
        let (_root, db) = fixture();
        let manifest = resolve(&db, "hosts").unwrap();

        let paths: Vec<_> = manifest.entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            [
                PathBuf::from("/etc"),
                PathBuf::from("/etc/hosts"),
                PathBuf::from("/etc/hosts.link"),
                PathBuf::from("/etc/gone"),
            ]
        );

        let kinds: Vec<_> = manifest
            .entries
            .iter()
            .map(|e| e.metadata().map(|m| m.kind.clone()))
            .collect();
        assert_eq!(kinds[0], Some(FileKind::Directory));
        assert_eq!(kinds[1], Some(FileKind::Regular));
        assert_eq!(
            kinds[2],
            Some(FileKind::Symlink {
                target: PathBuf::from("hosts")
            })
        );
        assert_eq!(kinds[3], None);

        assert_eq!(manifest.missing().count(), 1);
        assert_eq!(manifest.entries[1].metadata().unwrap().size, 20);
        assert_eq!(manifest.entries[1].relative_path(), Path::new("etc/hosts"));
    }

    #[test]
    fn test_control_files_collected() {
        let (_root, db) = fixture();
        let manifest = resolve(&db, "hosts").unwrap();

        assert_eq!(manifest.control_files.len(), 1);
        assert_eq!(manifest.control_files[0].name, "postinst");
    }

    #[test]
    fn test_missing_list_file_fails() {
        let (_root, db) = fixture();

        assert!(matches!(resolve(&db, "nolist"), Err(Error::Manifest { .. })));
        assert!(matches!(resolve(&db, "absent"), Err(Error::UnknownPackage(_))));
    }

    #[test]
    fn test_parent_components_stay_inside_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("root");
        let admin = root.join("var/lib/dpkg");
        fs::create_dir_all(admin.join("info")).unwrap();
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(admin.join("status"), "Package: sneaky\nVersion: 1\n").unwrap();
        fs::write(
            admin.join("info/sneaky.list"),
            "/etc\n/../outside\n/etc/../../outside\n",
        )
        .unwrap();
        fs::write(outer.path().join("outside"), "secret\n").unwrap();

        let db = Database::open(&root, false).unwrap();
        let manifest = resolve(&db, "sneaky").unwrap();

        assert_eq!(manifest.entries.len(), 3);
        assert!(!manifest.entries[0].is_missing());
        assert!(manifest.entries[1].is_missing());
        assert!(manifest.entries[2].is_missing());
    }
}
