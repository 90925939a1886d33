//! Diagnostics reported when a migration fails.
//!
//! The runner hands every failure to a [`DiagnosticsSink`] before returning it,
//! so a state loader can surface it to the user as a load or import failure.

use crate::errors::MigrationError;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The operation failed.
    Error,
    /// The operation succeeded but something deserves attention.
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single user-facing report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Empty when the failure is not tied to one resource type.
    pub resource_type: String,
    pub summary: String,
    pub detail: String,
}

impl Diagnostic {
    /// Builds an error diagnostic describing `error`.
    pub fn from_error(error: &MigrationError) -> Self {
        let summary = match error {
            MigrationError::UnknownSchemaVersion { .. } => "Unknown schema version",
            MigrationError::MalformedState { .. } => "Malformed resource state",
            MigrationError::ResourceTypeNotFound(_) => "Unknown resource type",
            _ => "State migration failed",
        };

        Self {
            severity: Severity::Error,
            resource_type: error.resource_type().unwrap_or_default().to_string(),
            summary: summary.to_string(),
            detail: error.to_string(),
        }
    }
}

/// Receives diagnostics produced while migrating state.
pub trait DiagnosticsSink: Send + Sync {
    /// Records one diagnostic.
    fn report(&self, diagnostic: Diagnostic);
}

/// Emits diagnostics as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => tracing::error!(
                resource_type = %diagnostic.resource_type,
                "{}: {}",
                diagnostic.summary,
                diagnostic.detail
            ),
            Severity::Warning => tracing::warn!(
                resource_type = %diagnostic.resource_type,
                "{}: {}",
                diagnostic.summary,
                diagnostic.detail
            ),
        }
    }
}

/// Keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectedDiagnostics {
    entries: Mutex<Vec<Diagnostic>>,
}

impl CollectedDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything reported so far.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Removes and returns everything reported so far.
    pub fn drain(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Returns `true` if any error-severity diagnostic was reported.
    pub fn has_errors(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

impl DiagnosticsSink for CollectedDiagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}
