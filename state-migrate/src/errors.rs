//! Error types for migration operations.

use std::fmt;
use thiserror::Error;

/// File I/O operation kind.
///
/// Identifies the specific type of I/O operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperationKind {
    /// Reading from a file
    Read,
    /// Writing to a file
    Write,
    /// Creating a new file
    Create,
    /// Renaming/moving a file
    Rename,
    /// Creating a directory
    CreateDir,
    /// Syncing file contents to disk
    Sync,
}

impl fmt::Display for IoOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Create => write!(f, "create"),
            Self::Rename => write!(f, "rename"),
            Self::CreateDir => write!(f, "create directory"),
            Self::Sync => write!(f, "sync"),
        }
    }
}

/// Format I/O error message with operation, path, context, and error details.
fn format_io_error(
    operation: &IoOperationKind,
    path: &str,
    context: &Option<String>,
    error: &str,
) -> String {
    if let Some(ctx) = context {
        format!("Failed to {} {} at '{}': {}", operation, ctx, path, error)
    } else {
        format!("Failed to {} file at '{}': {}", operation, path, error)
    }
}

/// A step precondition on existing attributes did not hold.
///
/// Returned by step bodies; the step that ran the body wraps it into
/// [`MigrationError::MalformedState`] with the resource type and version hop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct MalformedState {
    /// Human-readable description of what was wrong with the stored attributes.
    pub reason: String,
}

impl MalformedState {
    /// Creates a new error with a free-form reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// A required legacy attribute is absent.
    pub fn missing_attribute(key: &str) -> Self {
        Self::new(format!("required attribute '{}' is missing", key))
    }

    /// An attribute is present but its value cannot be interpreted.
    pub fn invalid_value(key: &str, value: &str, expected: &str) -> Self {
        Self::new(format!(
            "attribute '{}' has value '{}', expected {}",
            key, value, expected
        ))
    }
}

/// Error types that can occur during migration operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MigrationError {
    /// The stored state declares a version with no registered upgrade path.
    #[error("Unexpected schema version {version} for '{resource_type}': no upgrade path to version {target}")]
    UnknownSchemaVersion {
        /// The resource type.
        resource_type: String,
        /// The version the state was at when no step could be found.
        version: u32,
        /// The version the migration was asked to reach.
        target: u32,
    },

    /// A migration step found the stored attributes in an unexpected shape.
    #[error("Malformed '{resource_type}' state while migrating v{from} to v{to}: {reason}")]
    MalformedState {
        /// The resource type.
        resource_type: String,
        /// The source version of the failing step.
        from: u32,
        /// The target version of the failing step.
        to: u32,
        /// What was wrong with the stored attributes.
        reason: String,
    },

    /// The requested resource type has no registered migrations.
    #[error("Resource type '{0}' not found")]
    ResourceTypeNotFound(String),

    /// A resource type was registered twice.
    #[error("Resource type '{0}' is already registered")]
    DuplicateResourceType(String),

    /// A migration path does not end at the schema version its resource type declares.
    #[error("Migration path for '{resource_type}' reaches version {reached} but the resource declares schema version {declared}")]
    SchemaVersionMismatch {
        /// The resource type.
        resource_type: String,
        /// The schema version declared by the resource type.
        declared: u32,
        /// The version the registered steps actually reach.
        reached: u32,
    },

    /// A migration path has a step starting at the highest representable version.
    #[error("Migration path for '{resource_type}' steps past the highest schema version {}", u32::MAX)]
    VersionOverflow {
        /// The resource type.
        resource_type: String,
    },

    /// `install_global` was called more than once.
    #[error("Global migration registry is already installed")]
    GlobalRegistryAlreadyInstalled,

    /// `global` was called before `install_global`.
    #[error("Global migration registry has not been installed")]
    GlobalRegistryNotInstalled,

    /// Failed to deserialize the data.
    #[error("Failed to deserialize: {0}")]
    DeserializationError(String),

    /// Failed to serialize the data.
    #[error("Failed to serialize: {0}")]
    SerializationError(String),

    /// File I/O error with detailed operation context.
    ///
    /// Provides specific information about which I/O operation failed,
    /// along with optional context (e.g., "temporary file", "after 3 retries").
    #[error("{}", format_io_error(.operation, .path, .context, .error))]
    IoError {
        /// The I/O operation that failed.
        operation: IoOperationKind,
        /// The file path where the error occurred.
        path: String,
        /// Additional context (e.g., "temporary file", "after 3 retries").
        context: Option<String>,
        /// The underlying I/O error message.
        error: String,
    },

    /// File locking error.
    #[error("Failed to acquire file lock for '{path}': {error}")]
    LockError {
        /// The file path.
        path: String,
        /// The error message.
        error: String,
    },

    /// TOML parsing error.
    #[error("Failed to parse TOML: {0}")]
    TomlParseError(String),

    /// TOML serialization error.
    #[error("Failed to serialize to TOML: {0}")]
    TomlSerializeError(String),

    /// Failed to resolve path.
    #[error("Failed to resolve path: {0}")]
    PathResolution(String),
}

impl MigrationError {
    /// The resource type this error concerns, when it concerns one.
    pub fn resource_type(&self) -> Option<&str> {
        match self {
            Self::UnknownSchemaVersion { resource_type, .. }
            | Self::MalformedState { resource_type, .. }
            | Self::SchemaVersionMismatch { resource_type, .. }
            | Self::VersionOverflow { resource_type } => Some(resource_type),
            Self::ResourceTypeNotFound(resource_type)
            | Self::DuplicateResourceType(resource_type) => Some(resource_type),
            _ => None,
        }
    }
}
