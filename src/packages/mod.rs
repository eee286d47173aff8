// src/packages/mod.rs

//! Installed package model and `.deb` reconstruction
//!
//! - [`record`]: immutable package records built from status stanzas
//! - [`dependency`]: relationship field parsing
//! - [`status`]: typed `Status` field
//! - [`manifest`]: installed file lists resolved against the filesystem
//! - [`deb`]: the `.deb` archive writer
//! - [`compression`]: member compression formats

pub mod compression;
pub mod deb;
pub mod dependency;
pub mod manifest;
pub mod record;
pub mod status;

pub use compression::{Compression, CompressionFormat};
pub use deb::{BuiltPackage, DebBuilder};
pub use dependency::{Constraint, Dependency, DependencySpec, Relation};
pub use manifest::{FileManifest, ManifestEntry};
pub use record::PackageRecord;
pub use status::{Flag, State, Status, Want};
