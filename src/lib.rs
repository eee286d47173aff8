// src/lib.rs

//! debforge
//!
//! Reads an installed-package database in dpkg status format and rebuilds
//! reinstallable `.deb` archives from the files found on disk.
//!
//! # Architecture
//!
//! - Control format: stanza parser and writer shared by status and control files
//! - Package model: immutable records with lazily parsed relationship fields
//! - Database: one loaded status snapshot, plus a handle-based session layer
//! - Manifests: per-package file lists resolved against the live filesystem
//! - Rebuild: concurrent batch orchestration with per-package failure isolation

pub mod control;
pub mod db;
mod error;
pub mod packages;
pub mod rebuild;

pub use db::handle::{DatabaseHandle, PackageRef, PackageView, Session};
pub use db::{Database, DatabaseOptions, LoadMode, SortOrder};
pub use error::{Error, ParseError, Result};
pub use packages::{Compression, CompressionFormat, PackageRecord};
pub use rebuild::progress::{ProgressEvent, ProgressSink, Severity};
pub use rebuild::{BatchReport, BatchStatus, RebuildOptions, RebuildResult, Rebuilder, Selection};
