//! # state-migrate
//!
//! Versioned schema migration for persisted resource state.
//!
//! A resource instance is persisted as a flat map of string attributes plus
//! the integer schema version those attributes conform to. When the schema
//! changes, state written by an older release has to be upgraded before it
//! can be used. This crate does that one version at a time.
//!
//! ## Features
//!
//! - **Single-increment steps**: every schema change is one step from `N` to `N + 1`
//! - **Registry**: steps are looked up by resource type and source version
//! - **Loud failures**: an unknown version or malformed state is an error, never a guess
//! - **All-or-nothing**: a failing run leaves the stored attributes untouched
//! - **Multi-format records**: load persisted records from JSON, TOML, YAML, or any serde format
//! - **State files**: load, migrate, and atomically rewrite a whole state document
//!
//! ## Basic Example
//!
//! ```ignore
//! use state_migrate::{AttributeStore, Delta, MigrationRegistry, MigrationRunner, ResourceSchema};
//!
//! #[derive(ResourceSchema)]
//! #[resource(type_name = "example_authority", schema_version = 1)]
//! struct Authority;
//!
//! let mut registry = MigrationRegistry::new();
//! registry.register(
//!     MigrationRegistry::define_for::<Authority>()
//!         .from(0)
//!         .delta(Delta::new().add_default("permanent_deletion_time_in_days", "30"))
//!         .into_current(),
//! )?;
//!
//! let runner = MigrationRunner::new(&registry);
//! let store = AttributeStore::from_attributes(0, [("name", "acme")]);
//! let store = runner.migrate_resource::<Authority>(store)?;
//! assert_eq!(store.get("permanent_deletion_time_in_days"), Some("30"));
//! ```
//!
//! ## Process-wide registry
//!
//! ```ignore
//! build_registry().install_global()?;
//!
//! // later, from any thread
//! let runner = MigrationRunner::new(MigrationRegistry::global()?);
//! ```
//!
//! ## Design Philosophy
//!
//! - Upgrade paths are data registered once at startup, not a growing `match` on version numbers
//! - Each step only adds, renames, or removes the keys it is about; other keys pass through
//! - Steps are pure and synchronous; they never perform I/O

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

mod attributes;
pub mod diagnostics;
pub mod errors;
mod registry;
mod runner;
mod step;
pub mod storage;

// Re-export the derive macro
pub use state_migrate_macro::ResourceSchema;

pub use attributes::AttributeStore;
pub use diagnostics::{CollectedDiagnostics, Diagnostic, DiagnosticsSink, Severity, TracingDiagnostics};
pub use errors::{MalformedState, MigrationError};
pub use registry::{HasFrom, MigrationPath, MigrationPathBuilder, MigrationRegistry, Start};
pub use runner::{MigrationRunner, RunnerOptions};
pub use step::{Delta, MigrationStep, StepFn};
pub use storage::{FormatStrategy, LoadBehavior, StateFile, StateFileStrategy};

/// A resource type with a current schema version.
///
/// Usually derived with `#[derive(ResourceSchema)]` and
/// `#[resource(type_name = "...", schema_version = N)]`.
pub trait ResourceSchema {
    /// The resource type name state is registered and stored under.
    const TYPE_NAME: &'static str;

    /// The schema version new state of this type is written at.
    const SCHEMA_VERSION: u32;
}

/// One resource instance as it is persisted.
///
/// Serializes as `{"resource_type":"...","schema_version":N,"attributes":{...}}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecord {
    /// The resource type.
    pub resource_type: String,
    /// The schema version the attributes conform to.
    pub schema_version: u32,
    /// The flat attribute map.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl PersistedRecord {
    /// Creates a new record.
    pub fn new(
        resource_type: impl Into<String>,
        schema_version: u32,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            schema_version,
            attributes,
        }
    }

    /// Creates a record from a store, taking the store's version.
    pub fn from_store(resource_type: impl Into<String>, store: AttributeStore) -> Self {
        let schema_version = store.version();
        Self::new(resource_type, schema_version, store.into_attributes())
    }

    /// Converts this record into an attribute store at `schema_version`.
    pub fn into_store(self) -> AttributeStore {
        AttributeStore::from_attributes(self.schema_version, self.attributes)
    }
}
