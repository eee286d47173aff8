// src/error.rs

use thiserror::Error;

/// Core error types for debforge
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed status or control text
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The package database could not be loaded
    #[error("Database error: {0}")]
    Database(String),

    /// A package's installed file list could not be read
    #[error("Cannot resolve file list of {package}: {reason}")]
    Manifest { package: String, reason: String },

    /// A package archive could not be produced
    #[error("Cannot build archive for {package}: {reason}")]
    Build { package: String, reason: String },

    /// A handle was used after its database was closed, or with the wrong database
    #[error("Handle is stale or belongs to another database")]
    StaleHandle,

    /// Requested identifier is not present in the database
    #[error("Package not found: {0}")]
    UnknownPackage(String),

    /// Rebuilt archives could not be packed into one bundle
    #[error("Cannot write bundle {path}: {reason}")]
    Bundle { path: String, reason: String },

    /// The batch was stopped before this package started
    #[error("Rebuild cancelled")]
    Cancelled,
}

/// Errors raised while splitting control-format text into stanzas.
///
/// Line numbers are 1-based and refer to the whole input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("input contains no stanzas")]
    Empty,

    #[error("stanza {stanza} starting at line {line} has no Package field")]
    MissingPackage { stanza: usize, line: usize },

    #[error("continuation line {line} appears before any field")]
    OrphanContinuation { line: usize },

    #[error("line {line} is not a `Field: value` pair")]
    MalformedLine { line: usize },

    #[error("field `{field}` repeated at line {line}")]
    DuplicateField { field: String, line: usize },

    #[error("line {line} is not valid UTF-8")]
    InvalidUtf8 { line: usize },
}

/// Result type alias using debforge's Error type
pub type Result<T> = std::result::Result<T, Error>;
