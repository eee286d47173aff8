// src/db/handle.rs

//! Handle-based access to opened databases
//!
//! A [`Session`] owns every database opened through it in a generational
//! arena. Callers hold small `Copy` tokens instead of references:
//! - [`DatabaseHandle`]: slot index plus the generation it was issued for
//! - [`PackageRef`]: a database handle plus the package's status-file position
//!
//! Closing a database bumps its slot's generation, so every token issued
//! before the close fails with [`Error::StaleHandle`] instead of reaching a
//! different database that reused the slot.

use crate::db::{Database, DatabaseOptions, SortOrder};
use crate::error::{Error, Result};
use crate::packages::PackageRecord;
use crate::packages::dependency::DependencySpec;
use crate::rebuild::progress::ProgressSink;
use crate::rebuild::{BatchReport, RebuildOptions, Rebuilder, Request};
use std::path::Path;
use tracing::debug;

/// Token for a database opened in a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatabaseHandle {
    slot: u32,
    generation: u32,
}

/// Token for one package of an open database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackageRef {
    database: DatabaseHandle,
    position: u32,
}

impl PackageRef {
    /// Database this package belongs to
    pub fn database(&self) -> DatabaseHandle {
        self.database
    }
}

struct Slot {
    generation: u32,
    database: Option<Database>,
}

/// Generational arena of opened databases
#[derive(Default)]
pub struct Session {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the database under `root`; see [`Database::open`]
    pub fn open(&mut self, root: impl AsRef<Path>, load_now: bool) -> Result<DatabaseHandle> {
        let database = Database::open(root, load_now)?;
        Ok(self.insert(database))
    }

    pub fn open_with(
        &mut self,
        root: impl AsRef<Path>,
        options: &DatabaseOptions,
    ) -> Result<DatabaseHandle> {
        let database = Database::open_with(root, options)?;
        Ok(self.insert(database))
    }

    fn insert(&mut self, database: Database) -> DatabaseHandle {
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.database = Some(database);
            return DatabaseHandle {
                slot,
                generation: entry.generation,
            };
        }

        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            database: Some(database),
        });
        DatabaseHandle {
            slot,
            generation: 0,
        }
    }

    /// The database behind `handle`
    pub fn database(&self, handle: DatabaseHandle) -> Result<&Database> {
        self.slots
            .get(handle.slot as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.database.as_ref())
            .ok_or(Error::StaleHandle)
    }

    /// Package tokens in the requested order
    pub fn list_packages(&self, handle: DatabaseHandle, order: SortOrder) -> Result<Vec<PackageRef>> {
        let database = self.database(handle)?;

        database
            .list_packages(order)
            .into_iter()
            .map(|record| self.package_ref(handle, database, record.identifier()))
            .collect()
    }

    /// Token for the package `identifier`
    pub fn find(&self, handle: DatabaseHandle, identifier: &str) -> Result<PackageRef> {
        let database = self.database(handle)?;
        self.package_ref(handle, database, identifier)
    }

    fn package_ref(
        &self,
        handle: DatabaseHandle,
        database: &Database,
        identifier: &str,
    ) -> Result<PackageRef> {
        let position = database
            .position(identifier)
            .ok_or_else(|| Error::UnknownPackage(identifier.to_string()))?;

        Ok(PackageRef {
            database: handle,
            position: position as u32,
        })
    }

    /// Borrowed view of one package
    pub fn package(&self, package: PackageRef) -> Result<PackageView<'_>> {
        let record = self
            .database(package.database)?
            .record_at(package.position as usize)
            .ok_or(Error::StaleHandle)?;

        Ok(PackageView { record })
    }

    /// Rebuild `packages` of the database behind `handle`
    ///
    /// Only a stale `handle` fails the call. A ref that is stale or belongs
    /// to another database gets a failure result in its slot of the report.
    pub fn rebuild(
        &self,
        handle: DatabaseHandle,
        packages: &[PackageRef],
        options: &RebuildOptions,
        sink: &mut dyn ProgressSink,
    ) -> Result<BatchReport> {
        let database = self.database(handle)?;

        let requests: Vec<Request<'_>> = packages
            .iter()
            .map(|package| match self.package(*package) {
                Ok(view) if package.database == handle => Request::Identifier(view.identifier()),
                Ok(view) => Request::Rejected {
                    package: view.identifier().to_string(),
                    message: Error::StaleHandle.to_string(),
                },
                Err(e) => Request::Rejected {
                    package: format!("#{}", package.position),
                    message: e.to_string(),
                },
            })
            .collect();

        Ok(Rebuilder::new(database, options.clone()).run(&requests, sink))
    }

    /// Close the database behind `handle`, invalidating every token issued for it
    pub fn close(&mut self, handle: DatabaseHandle) -> Result<()> {
        let slot = self
            .slots
            .get_mut(handle.slot as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(Error::StaleHandle)?;

        let database = slot.database.take().ok_or(Error::StaleHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.slot);

        debug!("Closed session slot {}", handle.slot);
        database.close();
        Ok(())
    }

    /// Number of open databases
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.database.is_some()).count()
    }
}

/// Read-only view of a package borrowed from a [`Session`]
#[derive(Debug, Clone, Copy)]
pub struct PackageView<'a> {
    record: &'a PackageRecord,
}

impl<'a> PackageView<'a> {
    pub fn identifier(&self) -> &'a str {
        self.record.identifier()
    }

    /// Field value, empty when the field is absent
    pub fn field(&self, name: &str) -> &'a str {
        self.record.field(name).unwrap_or_default()
    }

    pub fn section(&self) -> &'a str {
        self.record.section()
    }

    /// Bare names from `Depends` and `Pre-Depends`
    pub fn dependencies(&self) -> Vec<String> {
        self.record.dependency_names()
    }

    /// Parsed `Depends` field
    pub fn relations(&self) -> &'a [DependencySpec] {
        self.record.dependencies()
    }

    pub fn record(&self) -> &'a PackageRecord {
        self.record
    }
}
