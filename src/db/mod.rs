// src/db/mod.rs

//! dpkg database loading
//!
//! A [`Database`] owns every package record of one status snapshot together
//! with the filesystem root used to resolve their installed files:
//! - the admin directory defaults to `<root>/var/lib/dpkg`
//! - package records are parsed from `<admin>/status`
//! - file lists live in `<admin>/info/<identifier>.list`
//!
//! Loading is atomic: a parse failure, a duplicate identifier or an empty
//! status file fails the whole open.

pub mod handle;

use crate::control;
use crate::error::{Error, Result};
use crate::packages::PackageRecord;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use fs4::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default admin directory, relative to the filesystem root
pub const DEFAULT_ADMIN_DIR: &str = "var/lib/dpkg";

/// When derived package views are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Parse dependency lists of every package while loading
    Eager,
    /// Parse dependency lists on first access
    #[default]
    Deferred,
}

impl From<bool> for LoadMode {
    fn from(load_now: bool) -> Self {
        if load_now {
            LoadMode::Eager
        } else {
            LoadMode::Deferred
        }
    }
}

/// Order of [`Database::list_packages`] output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Status file order
    #[default]
    Unsorted,
    /// Identifier ascending
    ByIdentifier,
}

/// Options for opening a database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseOptions {
    /// Admin directory; relative paths are resolved against the root
    pub admin_dir: PathBuf,
    pub load: LoadMode,
    /// Hold dpkg's `<admin>/lock` exclusively while the status file is read
    #[serde(default)]
    pub lock: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            admin_dir: PathBuf::from(DEFAULT_ADMIN_DIR),
            load: LoadMode::default(),
            lock: false,
        }
    }
}

/// Exclusive lock on `<admin>/lock`, released on drop
#[derive(Debug)]
struct AdminLock {
    _file: File,
}

impl AdminLock {
    /// Block until no other process holds the lock
    fn acquire(admin_dir: &Path) -> Result<Self> {
        let path = admin_dir.join("lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::Database(format!("Cannot open {}: {}", path.display(), e)))?;

        debug!("Waiting for {}", path.display());
        file.lock_exclusive()
            .map_err(|e| Error::Database(format!("Cannot lock {}: {}", path.display(), e)))?;

        Ok(Self { _file: file })
    }
}

/// Loaded dpkg status snapshot
#[derive(Debug)]
pub struct Database {
    root: PathBuf,
    admin_dir: PathBuf,
    records: Vec<PackageRecord>,
    index: HashMap<String, usize>,
}

impl Database {
    /// Open the database under `root`
    ///
    /// `load_now` selects eager derived-field computation; it never changes
    /// what the accessors return.
    pub fn open(root: impl AsRef<Path>, load_now: bool) -> Result<Self> {
        let options = DatabaseOptions {
            load: LoadMode::from(load_now),
            ..DatabaseOptions::default()
        };
        Self::open_with(root, &options)
    }

    /// Open the database under `root` with explicit options
    pub fn open_with(root: impl AsRef<Path>, options: &DatabaseOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let admin_dir = root.join(&options.admin_dir);
        let status_path = admin_dir.join("status");

        debug!("Loading dpkg status from: {}", status_path.display());

        let lock = if options.lock {
            Some(AdminLock::acquire(&admin_dir)?)
        } else {
            None
        };
        let content = fs::read(&status_path).map_err(|e| {
            Error::Database(format!("Cannot read {}: {}", status_path.display(), e))
        })?;
        drop(lock);

        let stanzas = control::parse_stanzas(&content)
            .map_err(|e| Error::Database(format!("{}: {}", status_path.display(), e)))?;

        let mut records = Vec::with_capacity(stanzas.len());
        let mut index = HashMap::with_capacity(stanzas.len());

        for stanza in stanzas {
            let line = stanza.line;
            let record = PackageRecord::new(stanza.fields)?;

            if index.contains_key(record.identifier()) {
                return Err(Error::Database(format!(
                    "Duplicate package {} at line {}",
                    record.identifier(),
                    line
                )));
            }

            if options.load == LoadMode::Eager {
                record.preload();
            }

            index.insert(record.identifier().to_string(), records.len());
            records.push(record);
        }

        info!(
            "Loaded {} packages from {}",
            records.len(),
            status_path.display()
        );

        Ok(Self {
            root,
            admin_dir,
            records,
            index,
        })
    }

    /// Filesystem root the package files are resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn admin_dir(&self) -> &Path {
        &self.admin_dir
    }

    pub fn status_path(&self) -> PathBuf {
        self.admin_dir.join("status")
    }

    pub fn info_dir(&self) -> PathBuf {
        self.admin_dir.join("info")
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a package by identifier
    pub fn get(&self, identifier: &str) -> Option<&PackageRecord> {
        self.index.get(identifier).map(|&pos| &self.records[pos])
    }

    /// Position of a package in status file order
    pub(crate) fn position(&self, identifier: &str) -> Option<usize> {
        self.index.get(identifier).copied()
    }

    pub(crate) fn record_at(&self, position: usize) -> Option<&PackageRecord> {
        self.records.get(position)
    }

    /// All packages in the requested order
    pub fn list_packages(&self, order: SortOrder) -> Vec<&PackageRecord> {
        let mut packages: Vec<&PackageRecord> = self.records.iter().collect();
        if order == SortOrder::ByIdentifier {
            packages.sort_by(|a, b| a.identifier().cmp(b.identifier()));
        }
        packages
    }

    /// Installed packages no other installed package depends on
    ///
    /// Dependencies are taken from `Depends` and `Pre-Depends`, alternatives
    /// included. Required and essential packages are never leaves.
    pub fn leaves(&self, order: SortOrder) -> Vec<&PackageRecord> {
        let is_candidate = |pkg: &PackageRecord| {
            pkg.priority() != Some("required")
                && !pkg.is_essential()
                && pkg.status().is_none_or(|status| status.state.has_files())
        };

        let depended_on: HashSet<String> = self
            .records
            .iter()
            .filter(|pkg| is_candidate(*pkg))
            .flat_map(|pkg| pkg.dependency_names())
            .map(|name| {
                name.split_once(':')
                    .map_or(name.as_str(), |(bare, _)| bare)
                    .to_string()
            })
            .collect();

        self.list_packages(order)
            .into_iter()
            .filter(|pkg| is_candidate(*pkg))
            .filter(|pkg| !depended_on.contains(pkg.name()))
            .collect()
    }

    /// Release every record owned by this database
    pub fn close(self) {
        debug!("Closing database at {}", self.root.display());
        drop(self);
    }
}
