//! Migration registry and builder pattern for defining per-resource upgrade paths.

use crate::attributes::AttributeStore;
use crate::errors::{MalformedState, MigrationError};
use crate::step::{Delta, MigrationStep};
use crate::ResourceSchema;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::OnceLock;

static GLOBAL_REGISTRY: OnceLock<MigrationRegistry> = OnceLock::new();

/// The registered steps for one resource type.
struct ResourceMigrations {
    /// Maps from-version -> step to the next version
    steps: BTreeMap<u32, MigrationStep>,
    /// The schema version state of this type is upgraded to
    current_version: u32,
}

/// Maps `(resource type, from-version)` to the step that upgrades it.
///
/// Populated once during setup and only read afterwards; lookups take `&self`
/// so the registry can be shared across threads without locking.
pub struct MigrationRegistry {
    resources: HashMap<String, ResourceMigrations>,
}

impl MigrationRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
        }
    }

    /// Starts defining the upgrade path for a resource type.
    pub fn define(resource_type: &str) -> MigrationPathBuilder<Start> {
        MigrationPathBuilder::new(resource_type.to_string(), None)
    }

    /// Starts defining the upgrade path for `R`.
    ///
    /// Registration fails unless the path ends at `R::SCHEMA_VERSION`.
    pub fn define_for<R: ResourceSchema>() -> MigrationPathBuilder<Start> {
        MigrationPathBuilder::new(R::TYPE_NAME.to_string(), Some(R::SCHEMA_VERSION))
    }

    /// Registers a migration path.
    ///
    /// # Errors
    ///
    /// - `DuplicateResourceType` if the resource type already has a path
    /// - `SchemaVersionMismatch` if the path does not reach the declared schema version
    /// - `VersionOverflow` if a step starts at `u32::MAX`
    pub fn register(&mut self, path: MigrationPath) -> Result<(), MigrationError> {
        if self.resources.contains_key(&path.resource_type) {
            return Err(MigrationError::DuplicateResourceType(path.resource_type));
        }

        if path.steps.iter().any(|step| step.from_version() == u32::MAX) {
            return Err(MigrationError::VersionOverflow {
                resource_type: path.resource_type,
            });
        }

        if let Some(declared) = path.declared_version {
            if declared != path.current_version {
                return Err(MigrationError::SchemaVersionMismatch {
                    resource_type: path.resource_type,
                    declared,
                    reached: path.current_version,
                });
            }
        }

        let steps = path
            .steps
            .into_iter()
            .map(|step| (step.from_version(), step))
            .collect();

        self.resources.insert(
            path.resource_type,
            ResourceMigrations {
                steps,
                current_version: path.current_version,
            },
        );
        Ok(())
    }

    /// Returns the step that upgrades `resource_type` state from `from_version`.
    pub fn lookup(&self, resource_type: &str, from_version: u32) -> Option<&MigrationStep> {
        self.resources
            .get(resource_type)
            .and_then(|resource| resource.steps.get(&from_version))
    }

    /// The schema version `resource_type` state is upgraded to.
    pub fn current_version(&self, resource_type: &str) -> Option<u32> {
        self.resources
            .get(resource_type)
            .map(|resource| resource.current_version)
    }

    /// Registered resource types, in no particular order.
    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Number of registered resource types.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Installs this registry as the process-wide registry.
    ///
    /// # Errors
    ///
    /// Returns `GlobalRegistryAlreadyInstalled` on every call after the first.
    pub fn install_global(self) -> Result<&'static MigrationRegistry, MigrationError> {
        GLOBAL_REGISTRY
            .set(self)
            .map_err(|_| MigrationError::GlobalRegistryAlreadyInstalled)?;
        Self::global()
    }

    /// Returns the process-wide registry.
    ///
    /// # Errors
    ///
    /// Returns `GlobalRegistryNotInstalled` if `install_global` has not been called.
    pub fn global() -> Result<&'static MigrationRegistry, MigrationError> {
        GLOBAL_REGISTRY
            .get()
            .ok_or(MigrationError::GlobalRegistryNotInstalled)
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Marker type for builder state: start
pub struct Start;

/// Marker type for builder state: has a starting version
pub struct HasFrom;

/// Builder for defining migration paths.
pub struct MigrationPathBuilder<State> {
    resource_type: String,
    declared_version: Option<u32>,
    next_version: u32,
    steps: Vec<MigrationStep>,
    _state: PhantomData<State>,
}

impl MigrationPathBuilder<Start> {
    fn new(resource_type: String, declared_version: Option<u32>) -> Self {
        Self {
            resource_type,
            declared_version,
            next_version: 0,
            steps: Vec::new(),
            _state: PhantomData,
        }
    }

    /// Sets the oldest schema version that can still be upgraded.
    pub fn from(self, version: u32) -> MigrationPathBuilder<HasFrom> {
        MigrationPathBuilder {
            resource_type: self.resource_type,
            declared_version: self.declared_version,
            next_version: version,
            steps: self.steps,
            _state: PhantomData,
        }
    }
}

impl MigrationPathBuilder<HasFrom> {
    /// Adds a step upgrading the current end of the path by one version.
    pub fn step<F>(mut self, body: F) -> Self
    where
        F: Fn(&mut AttributeStore) -> Result<(), MalformedState> + Send + Sync + 'static,
    {
        let step = MigrationStep::new(self.resource_type.clone(), self.next_version, body);
        self.push(step);
        self
    }

    /// Adds a declarative step upgrading the current end of the path by one version.
    pub fn delta(mut self, delta: Delta) -> Self {
        let step = MigrationStep::from_delta(self.resource_type.clone(), self.next_version, delta);
        self.push(step);
        self
    }

    fn push(&mut self, step: MigrationStep) {
        self.next_version = step.to_version();
        self.steps.push(step);
    }

    /// Finalizes the path; the last step's target becomes the current schema version.
    pub fn into_current(self) -> MigrationPath {
        MigrationPath {
            resource_type: self.resource_type,
            declared_version: self.declared_version,
            current_version: self.next_version,
            steps: self.steps,
        }
    }
}

/// A complete upgrade path for one resource type.
pub struct MigrationPath {
    resource_type: String,
    declared_version: Option<u32>,
    current_version: u32,
    steps: Vec<MigrationStep>,
}

impl MigrationPath {
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// The version the path ends at.
    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }
}
