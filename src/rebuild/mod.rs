// src/rebuild/mod.rs

//! Batch rebuild of installed packages
//!
//! The orchestrator fans the requested packages out over a bounded worker
//! pool. Each package is resolved and archived on its own; a failure is
//! recorded in that package's result and never stops the batch.
//!
//! Guarantees of [`Rebuilder::rebuild`]:
//! - duplicate identifiers are processed once
//! - one result per requested element, in request order, whatever the completion order
//! - a package's own events are ordered (started, logs, finished/failed, increment)
//! - `AllFinished` is emitted exactly once, last

pub mod bundle;
pub mod progress;

use crate::db::{Database, SortOrder};
use crate::error::Error;
use crate::packages::compression::Compression;
use crate::packages::deb::DebBuilder;
use crate::packages::manifest;
use progress::{ProgressEvent, ProgressSink, Severity, SharedSink};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info, warn};

pub use progress::{NullSink, RecordingSink, TracingSink};

/// Options for a rebuild batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildOptions {
    /// Directory receiving the `.deb` files
    pub output_dir: PathBuf,
    /// Worker pool size; values below one are treated as one
    pub workers: usize,
    pub compression: Compression,
}

impl RebuildOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
            compression: Compression::default(),
        }
    }
}

/// Which packages a batch covers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Exactly these identifiers, in this order
    Named(Vec<String>),
    /// Packages nothing else depends on
    #[default]
    Leaves,
    All,
}

impl Selection {
    /// Named identifiers if any were given, otherwise leaves or every package
    pub fn from_args(packages: Vec<String>, all: bool) -> Self {
        match (packages.is_empty(), all) {
            (false, _) => Selection::Named(packages),
            (true, true) => Selection::All,
            (true, false) => Selection::Leaves,
        }
    }

    /// Identifiers to request from `db`
    pub fn identifiers(&self, db: &Database) -> Vec<String> {
        let records = match self {
            Selection::Named(packages) => return packages.clone(),
            Selection::Leaves => db.leaves(SortOrder::Unsorted),
            Selection::All => db.list_packages(SortOrder::Unsorted),
        };
        records
            .iter()
            .map(|record| record.identifier().to_string())
            .collect()
    }
}

/// Outcome of one requested package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum RebuildResult {
    Success {
        package: String,
        output_path: PathBuf,
        sha256: String,
        warnings: Vec<String>,
    },
    Failure {
        package: String,
        message: String,
    },
}

impl RebuildResult {
    /// Identifier of the package this result belongs to
    pub fn package(&self) -> &str {
        match self {
            RebuildResult::Success { package, .. } | RebuildResult::Failure { package, .. } => {
                package
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RebuildResult::Success { .. })
    }

    pub fn output_path(&self) -> Option<&Path> {
        match self {
            RebuildResult::Success { output_path, .. } => Some(output_path),
            RebuildResult::Failure { .. } => None,
        }
    }
}

/// Overall outcome of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    AllSucceeded,
    PartialSuccess,
    TotalFailure,
    NothingRequested,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::AllSucceeded => "all_succeeded",
            BatchStatus::PartialSuccess => "partial_success",
            BatchStatus::TotalFailure => "total_failure",
            BatchStatus::NothingRequested => "nothing_requested",
        }
    }

    /// Classify a result list
    pub fn of(results: &[RebuildResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        match (results.len(), succeeded) {
            (0, _) => BatchStatus::NothingRequested,
            (total, ok) if ok == total => BatchStatus::AllSucceeded,
            (_, 0) => BatchStatus::TotalFailure,
            _ => BatchStatus::PartialSuccess,
        }
    }
}

/// Status code plus one result per requested element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub status: BatchStatus,
    pub results: Vec<RebuildResult>,
}

impl BatchReport {
    fn new(results: Vec<RebuildResult>) -> Self {
        Self {
            status: BatchStatus::of(&results),
            results,
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &RebuildResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RebuildResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

/// One element of a batch request
pub(crate) enum Request<'r> {
    Identifier(&'r str),
    /// Fails without reaching the builder
    Rejected { package: String, message: String },
}

type CancelHook<'a> = Box<dyn Fn() -> bool + Send + Sync + 'a>;

/// Drives the archive builder over a set of packages of one database
pub struct Rebuilder<'a> {
    db: &'a Database,
    options: RebuildOptions,
    cancel: Option<CancelHook<'a>>,
}

impl<'a> Rebuilder<'a> {
    pub fn new(db: &'a Database, options: RebuildOptions) -> Self {
        Self {
            db,
            options,
            cancel: None,
        }
    }

    /// Install a hook polled before each package starts
    ///
    /// Once it returns `true`, every package not yet started fails with
    /// [`Error::Cancelled`]. Archives already being written are completed.
    pub fn with_cancel(mut self, hook: impl Fn() -> bool + Send + Sync + 'a) -> Self {
        self.cancel = Some(Box::new(hook));
        self
    }

    pub fn options(&self) -> &RebuildOptions {
        &self.options
    }

    /// Rebuild `packages`, reporting progress to `sink`
    ///
    /// The report holds one result per element of `packages`, repeats
    /// included; a repeated identifier is built once and its result shared.
    pub fn rebuild<S: AsRef<str>>(
        &self,
        packages: &[S],
        sink: &mut dyn ProgressSink,
    ) -> BatchReport {
        let requests: Vec<Request<'_>> = packages
            .iter()
            .map(|id| Request::Identifier(id.as_ref()))
            .collect();
        self.run(&requests, sink)
    }

    pub(crate) fn run(
        &self,
        requests: &[Request<'_>],
        sink: &mut dyn ProgressSink,
    ) -> BatchReport {
        let sink = SharedSink::new(sink);

        if requests.is_empty() {
            sink.emit(ProgressEvent::AllFinished);
            return BatchReport::new(Vec::new());
        }

        let mut seen = HashSet::new();
        let unique: Vec<&str> = requests
            .iter()
            .filter_map(|request| match request {
                Request::Identifier(id) => Some(*id),
                Request::Rejected { .. } => None,
            })
            .filter(|id| seen.insert(*id))
            .collect();

        for request in requests {
            if let Request::Rejected { package, message } = request {
                warn!("Rebuild of {} rejected: {}", package, message);
                sink.emit(ProgressEvent::Failed {
                    package: package.clone(),
                    message: message.clone(),
                });
                sink.emit(ProgressEvent::Increment { delta: 1 });
            }
        }

        let workers = self.options.workers.max(1);
        info!(
            "Rebuilding {} packages with {} workers into {}",
            unique.len(),
            workers,
            self.options.output_dir.display()
        );

        let processed = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| {
                unique
                    .par_iter()
                    .map(|id| self.process(id, &sink))
                    .collect::<Vec<_>>()
            }),
            Err(e) => {
                warn!("Cannot start worker pool ({}), rebuilding sequentially", e);
                unique.iter().map(|id| self.process(id, &sink)).collect()
            }
        };

        sink.emit(ProgressEvent::AllFinished);

        let by_identifier: HashMap<&str, RebuildResult> =
            unique.iter().copied().zip(processed).collect();
        let results = requests
            .iter()
            .filter_map(|request| match request {
                Request::Identifier(id) => by_identifier.get(id).cloned(),
                Request::Rejected { package, message } => Some(RebuildResult::Failure {
                    package: package.clone(),
                    message: message.clone(),
                }),
            })
            .collect();

        let report = BatchReport::new(results);
        info!(
            "Rebuild finished: {} ({} of {} succeeded)",
            report.status.as_str(),
            report.succeeded().count(),
            report.results.len()
        );
        report
    }

    /// Process one package and emit its events
    fn process(&self, identifier: &str, sink: &SharedSink<'_>) -> RebuildResult {
        let result = self.build_one(identifier, sink);

        match &result {
            RebuildResult::Success { output_path, .. } => sink.emit(ProgressEvent::Finished {
                package: identifier.to_string(),
                output_path: output_path.clone(),
            }),
            RebuildResult::Failure { message, .. } => {
                warn!("Rebuild of {} failed: {}", identifier, message);
                sink.emit(ProgressEvent::Failed {
                    package: identifier.to_string(),
                    message: message.clone(),
                });
            }
        }
        sink.emit(ProgressEvent::Increment { delta: 1 });

        result
    }

    fn build_one(&self, identifier: &str, sink: &SharedSink<'_>) -> RebuildResult {
        let failure = |error: Error| RebuildResult::Failure {
            package: identifier.to_string(),
            message: error.to_string(),
        };

        if self.cancel.as_ref().is_some_and(|hook| hook()) {
            return failure(Error::Cancelled);
        }

        let Some(record) = self.db.get(identifier) else {
            return failure(Error::UnknownPackage(identifier.to_string()));
        };

        sink.emit(ProgressEvent::Started {
            package: identifier.to_string(),
        });
        debug!("Started {}", identifier);

        let built = manifest::resolve(self.db, identifier).and_then(|manifest| {
            DebBuilder::new(record, &manifest, self.db.root())
                .compression(self.options.compression)
                .build(&self.options.output_dir)
        });

        match built {
            Ok(built) => {
                for warning in &built.warnings {
                    sink.emit(ProgressEvent::Log {
                        severity: Severity::Warning,
                        message: format!("{}: {}", identifier, warning),
                    });
                }
                RebuildResult::Success {
                    package: identifier.to_string(),
                    output_path: built.path,
                    sha256: built.sha256,
                    warnings: built.warnings,
                }
            }
            Err(e) => failure(e),
        }
    }
}

/// Rebuild `packages` of `db` with `options`
pub fn rebuild<S: AsRef<str>>(
    db: &Database,
    packages: &[S],
    options: &RebuildOptions,
    sink: &mut dyn ProgressSink,
) -> BatchReport {
    Rebuilder::new(db, options.clone()).rebuild(packages, sink)
}
