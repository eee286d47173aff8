// src/rebuild/progress.rs

//! Progress reporting for rebuild batches
//!
//! Every notification is a [`ProgressEvent`]. A [`ProgressSink`] can either
//! consume the raw event stream through [`ProgressSink::on_event`] or
//! implement only the per-kind callbacks it cares about; the default
//! `on_event` dispatches to them. Drivers that show a single progress bar
//! only need `on_increment`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Severity of a free-form log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// One transient progress notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { package: String },
    Finished { package: String, output_path: PathBuf },
    Failed { package: String, message: String },
    Log { severity: Severity, message: String },
    Increment { delta: u64 },
    AllFinished,
}

impl ProgressEvent {
    /// Package this event belongs to, if any
    pub fn package(&self) -> Option<&str> {
        match self {
            ProgressEvent::Started { package }
            | ProgressEvent::Finished { package, .. }
            | ProgressEvent::Failed { package, .. } => Some(package),
            _ => None,
        }
    }
}

/// Receiver of rebuild progress
///
/// Calls are serialized by the orchestrator, so implementations need no
/// locking of their own.
pub trait ProgressSink: Send {
    fn on_started(&mut self, _package: &str) {}

    fn on_finished(&mut self, _package: &str, _output_path: &Path) {}

    fn on_failed(&mut self, _package: &str, _message: &str) {}

    fn on_log(&mut self, _severity: Severity, _message: &str) {}

    fn on_increment(&mut self, _delta: u64) {}

    fn on_all_finished(&mut self) {}

    /// Entry point for every event; override to see the raw stream
    fn on_event(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { package } => self.on_started(package),
            ProgressEvent::Finished {
                package,
                output_path,
            } => self.on_finished(package, output_path),
            ProgressEvent::Failed { package, message } => self.on_failed(package, message),
            ProgressEvent::Log { severity, message } => self.on_log(*severity, message),
            ProgressEvent::Increment { delta } => self.on_increment(*delta),
            ProgressEvent::AllFinished => self.on_all_finished(),
        }
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {}

/// Sink that forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_started(&mut self, package: &str) {
        debug!("Rebuilding {}", package);
    }

    fn on_finished(&mut self, package: &str, output_path: &Path) {
        info!("Rebuilt {} -> {}", package, output_path.display());
    }

    fn on_failed(&mut self, package: &str, message: &str) {
        warn!("Failed to rebuild {}: {}", package, message);
    }

    fn on_log(&mut self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
    }

    fn on_all_finished(&mut self) {
        debug!("Rebuild batch complete");
    }
}

/// Sink that keeps every event, in arrival order
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<ProgressEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events belonging to `package`
    pub fn for_package<'a>(&'a self, package: &'a str) -> impl Iterator<Item = &'a ProgressEvent> {
        self.events
            .iter()
            .filter(move |event| event.package() == Some(package))
    }

    /// Sum of all increment deltas
    pub fn total_increment(&self) -> u64 {
        self.events
            .iter()
            .map(|event| match event {
                ProgressEvent::Increment { delta } => *delta,
                _ => 0,
            })
            .sum()
    }
}

impl ProgressSink for RecordingSink {
    fn on_event(&mut self, event: &ProgressEvent) {
        self.events.push(event.clone());
    }
}

/// Serializes events from concurrent workers into one sink
pub(crate) struct SharedSink<'a> {
    inner: Mutex<&'a mut dyn ProgressSink>,
}

impl<'a> SharedSink<'a> {
    pub(crate) fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self {
            inner: Mutex::new(sink),
        }
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        // a sink that panicked mid-event still receives later events
        let mut sink = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sink.on_event(&event);
    }
}
