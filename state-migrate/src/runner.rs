//! Drives a stored resource from its declared schema version to a target version.

use crate::attributes::AttributeStore;
use crate::diagnostics::{Diagnostic, DiagnosticsSink, TracingDiagnostics};
use crate::errors::MigrationError;
use crate::registry::MigrationRegistry;
use crate::{PersistedRecord, ResourceSchema};
use serde::Serialize;
use std::sync::Arc;

/// Options controlling how a [`MigrationRunner`] reports progress.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Log attribute snapshots before and after every step at debug level (default: true)
    pub log_snapshots: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            log_snapshots: true,
        }
    }
}

impl RunnerOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether attribute snapshots are logged.
    pub fn with_log_snapshots(mut self, enabled: bool) -> Self {
        self.log_snapshots = enabled;
        self
    }
}

/// Applies registered steps in order until a store reaches its target version.
///
/// The runner never guesses: a version with no registered step is an error,
/// and a failing step aborts the whole run without touching the caller's store.
pub struct MigrationRunner<'r> {
    registry: &'r MigrationRegistry,
    options: RunnerOptions,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl<'r> MigrationRunner<'r> {
    /// Creates a runner with default options that reports failures through `tracing`.
    pub fn new(registry: &'r MigrationRegistry) -> Self {
        Self {
            registry,
            options: RunnerOptions::default(),
            diagnostics: Arc::new(TracingDiagnostics),
        }
    }

    /// Replaces the runner options.
    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the diagnostics sink.
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn registry(&self) -> &'r MigrationRegistry {
        self.registry
    }

    /// Migrates `store` from `declared_version` to `target_version`.
    ///
    /// An empty store is returned unchanged whatever the versions. Migrating
    /// a version to itself returns the store as given, even for an
    /// unregistered type. Otherwise the result carries the version the run
    /// reached, starting from `declared_version` rather than the store's own.
    ///
    /// # Errors
    ///
    /// - `UnknownSchemaVersion` if some version on the way has no registered step,
    ///   or `declared_version` is newer than `target_version`
    /// - `MalformedState` if a step rejects the stored attributes
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = AttributeStore::from_attributes(0, [("name", "acme")]);
    /// let migrated = runner.migrate("example_authority", store, 0, 1)?;
    /// assert_eq!(migrated.version(), 1);
    /// ```
    pub fn migrate(
        &self,
        resource_type: &str,
        mut store: AttributeStore,
        declared_version: u32,
        target_version: u32,
    ) -> Result<AttributeStore, MigrationError> {
        self.migrate_in_place(resource_type, &mut store, declared_version, target_version)?;
        Ok(store)
    }

    /// Like [`migrate`](Self::migrate), but replaces `store` only once every step succeeded.
    pub fn migrate_in_place(
        &self,
        resource_type: &str,
        store: &mut AttributeStore,
        declared_version: u32,
        target_version: u32,
    ) -> Result<(), MigrationError> {
        if store.is_empty() {
            tracing::debug!(resource_type, "empty state; nothing to migrate");
            return Ok(());
        }

        if declared_version == target_version {
            return Ok(());
        }

        let mut working = store.clone();
        working.set_version(declared_version);

        self.run(resource_type, &mut working, target_version)
            .map_err(|e| self.report(e))?;

        *store = working;
        Ok(())
    }

    fn run(
        &self,
        resource_type: &str,
        working: &mut AttributeStore,
        target_version: u32,
    ) -> Result<(), MigrationError> {
        // Each iteration moves one version closer, so this ends within
        // target - declared hops.
        loop {
            let current = working.version();
            if current == target_version {
                return Ok(());
            }

            let step = match self.registry.lookup(resource_type, current) {
                Some(step) if current < target_version => step,
                _ => {
                    return Err(MigrationError::UnknownSchemaVersion {
                        resource_type: resource_type.to_string(),
                        version: current,
                        target: target_version,
                    })
                }
            };

            tracing::info!(
                resource_type,
                "found {} state v{}; migrating to v{}",
                resource_type,
                step.from_version(),
                step.to_version()
            );
            step.transform(working, self.options.log_snapshots)?;

            if working.version() != step.to_version() {
                return Err(MigrationError::MalformedState {
                    resource_type: resource_type.to_string(),
                    from: current,
                    to: step.to_version(),
                    reason: format!(
                        "step left state at schema version {}",
                        working.version()
                    ),
                });
            }
        }
    }

    fn report(&self, error: MigrationError) -> MigrationError {
        tracing::warn!(
            resource_type = error.resource_type().unwrap_or_default(),
            "state migration failed: {}",
            error
        );
        self.diagnostics.report(Diagnostic::from_error(&error));
        error
    }

    /// Migrates `store` from its own version to the registered current version.
    ///
    /// # Errors
    ///
    /// Returns `ResourceTypeNotFound` if `resource_type` is not registered,
    /// otherwise the same errors as [`migrate`](Self::migrate).
    pub fn migrate_to_current(
        &self,
        resource_type: &str,
        store: AttributeStore,
    ) -> Result<AttributeStore, MigrationError> {
        let target = self
            .registry
            .current_version(resource_type)
            .ok_or_else(|| self.report(MigrationError::ResourceTypeNotFound(resource_type.to_string())))?;
        let declared = store.version();
        self.migrate(resource_type, store, declared, target)
    }

    /// Migrates `store` to the schema version `R` declares.
    pub fn migrate_resource<R: ResourceSchema>(
        &self,
        store: AttributeStore,
    ) -> Result<AttributeStore, MigrationError> {
        let declared = store.version();
        self.migrate(R::TYPE_NAME, store, declared, R::SCHEMA_VERSION)
    }

    /// Migrates a persisted record to its type's current schema version.
    pub fn migrate_record(&self, record: PersistedRecord) -> Result<PersistedRecord, MigrationError> {
        let resource_type = record.resource_type.clone();
        let store = self.migrate_to_current(&resource_type, record.into_store())?;
        Ok(PersistedRecord::from_store(resource_type, store))
    }

    /// Loads a persisted record from any serde-compatible value and migrates it.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let toml_data: toml::Value = toml::from_str(toml_str)?;
    /// let record = runner.load_record_from(toml_data)?;
    /// ```
    pub fn load_record_from<T: Serialize>(&self, data: T) -> Result<PersistedRecord, MigrationError> {
        let value = serde_json::to_value(data).map_err(|e| {
            MigrationError::DeserializationError(format!(
                "Failed to convert input data to internal format: {}",
                e
            ))
        })?;

        let record: PersistedRecord = serde_json::from_value(value).map_err(|e| {
            MigrationError::DeserializationError(format!(
                "Failed to parse persisted record: {}",
                e
            ))
        })?;

        self.migrate_record(record)
    }

    /// Loads a persisted record from a JSON string and migrates it.
    pub fn load_record(&self, json: &str) -> Result<PersistedRecord, MigrationError> {
        let data: serde_json::Value = serde_json::from_str(json).map_err(|e| {
            MigrationError::DeserializationError(format!("Failed to parse JSON: {}", e))
        })?;
        self.load_record_from(data)
    }

    /// Serializes a record to compact JSON.
    pub fn save_record(&self, record: &PersistedRecord) -> Result<String, MigrationError> {
        serde_json::to_string(record).map_err(|e| {
            MigrationError::SerializationError(format!("Failed to serialize record: {}", e))
        })
    }
}
