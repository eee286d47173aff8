// src/packages/record.rs

//! Immutable package record built from one status stanza

use crate::control::{self, Fields};
use crate::error::{Error, Result};
use crate::packages::dependency::{DependencySpec, parse_relations};
use crate::packages::status::Status;
use std::sync::OnceLock;

/// Section reported for packages without a `Section` field
pub const UNKNOWN_SECTION: &str = "unknown";

/// One installed package as recorded in the dpkg database
///
/// Records are never mutated after creation; derived views are computed
/// from the raw field mapping. The dependency list is cached on first
/// access, or up front when the database is loaded eagerly.
#[derive(Debug)]
pub struct PackageRecord {
    identifier: String,
    fields: Fields,
    dependencies: OnceLock<Vec<DependencySpec>>,
}

impl PackageRecord {
    /// Wrap a raw field mapping
    ///
    /// `Multi-Arch: same` packages are identified as `name:arch`, matching the
    /// names dpkg gives their info side files.
    pub fn new(fields: Fields) -> Result<Self> {
        let name = control::lookup(&fields, "Package")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Database("stanza has no Package field".to_string()))?;

        let multi_arch_same = control::lookup(&fields, "Multi-Arch")
            .is_some_and(|value| value.eq_ignore_ascii_case("same"));
        let arch = control::lookup(&fields, "Architecture").unwrap_or_default();

        let identifier = if multi_arch_same && !arch.is_empty() {
            format!("{}:{}", name, arch)
        } else {
            name.to_string()
        };

        Ok(Self {
            identifier,
            fields,
            dependencies: OnceLock::new(),
        })
    }

    /// Unique identifier within one database snapshot
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Bare `Package` value, without any architecture qualifier
    pub fn name(&self) -> &str {
        self.field("Package").unwrap_or_default()
    }

    pub fn version(&self) -> &str {
        self.field("Version").unwrap_or_default()
    }

    /// Architecture, empty when the field is absent
    pub fn architecture(&self) -> &str {
        self.field("Architecture").unwrap_or_default()
    }

    /// Section, [`UNKNOWN_SECTION`] when the field is absent or empty
    pub fn section(&self) -> &str {
        match self.field("Section") {
            Some(section) if !section.is_empty() => section,
            _ => UNKNOWN_SECTION,
        }
    }

    pub fn priority(&self) -> Option<&str> {
        self.field("Priority")
    }

    /// Parsed `Status` field, `None` when absent or not understood
    pub fn status(&self) -> Option<Status> {
        self.field("Status")?.parse().ok()
    }

    pub fn is_essential(&self) -> bool {
        self.field("Essential")
            .is_some_and(|value| value.eq_ignore_ascii_case("yes"))
    }

    /// Field value by case-insensitive name
    pub fn field(&self, name: &str) -> Option<&str> {
        control::lookup(&self.fields, name)
    }

    /// Raw field mapping in original order
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Parsed `Depends` field
    ///
    /// An empty field and an absent field both yield an empty list.
    pub fn dependencies(&self) -> &[DependencySpec] {
        self.dependencies
            .get_or_init(|| parse_relations(self.field("Depends").unwrap_or_default()))
    }

    /// Parse any relationship field (`Pre-Depends`, `Recommends`, `Breaks`, ...)
    pub fn relations(&self, field: &str) -> Vec<DependencySpec> {
        if field.eq_ignore_ascii_case("Depends") {
            return self.dependencies().to_vec();
        }
        parse_relations(self.field(field).unwrap_or_default())
    }

    /// Every package name referenced by `Depends` and `Pre-Depends`
    ///
    /// Alternatives are flattened and version constraints dropped.
    pub fn dependency_names(&self) -> Vec<String> {
        let pre_depends = self.relations("Pre-Depends");
        self.dependencies()
            .iter()
            .chain(pre_depends.iter())
            .flat_map(|spec| spec.alternatives())
            .map(|dep| dep.name.clone())
            .collect()
    }

    /// Compute derived views now instead of on first access
    pub(crate) fn preload(&self) {
        let _ = self.dependencies();
    }

    /// Control file text for this package, fields in original order
    pub fn to_control(&self) -> String {
        control::write_stanza(&self.fields)
    }

    /// Canonical archive file name: `name_version_arch.deb`
    ///
    /// The epoch is dropped from the version as Debian pool file names do,
    /// and the architecture part is omitted when unknown.
    pub fn deb_file_name(&self) -> String {
        let version = self
            .version()
            .split_once(':')
            .map_or(self.version(), |(_, upstream)| upstream);

        let stem = if self.architecture().is_empty() {
            format!("{}_{}", self.name(), version)
        } else {
            format!("{}_{}_{}", self.name(), version, self.architecture())
        };

        format!("{}.deb", stem.replace(['/', '\\'], "_"))
    }
}
