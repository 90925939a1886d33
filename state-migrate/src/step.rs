//! Single-increment migration steps.

use crate::attributes::AttributeStore;
use crate::errors::{MalformedState, MigrationError};
use std::fmt;

/// The body of a migration step: one schema delta applied to a working copy.
pub type StepFn = Box<dyn Fn(&mut AttributeStore) -> Result<(), MalformedState> + Send + Sync>;

/// Transforms a resource's attributes from `from_version` to `from_version + 1`.
///
/// Steps are strictly single-increment, so every schema change is one
/// auditable unit that can be tested on its own.
pub struct MigrationStep {
    resource_type: String,
    from_version: u32,
    body: StepFn,
}

impl MigrationStep {
    /// Creates a step for `resource_type` starting at `from_version`.
    pub fn new<F>(resource_type: impl Into<String>, from_version: u32, body: F) -> Self
    where
        F: Fn(&mut AttributeStore) -> Result<(), MalformedState> + Send + Sync + 'static,
    {
        Self {
            resource_type: resource_type.into(),
            from_version,
            body: Box::new(body),
        }
    }

    /// Creates a step whose body is a declarative [`Delta`].
    pub fn from_delta(resource_type: impl Into<String>, from_version: u32, delta: Delta) -> Self {
        Self::new(resource_type, from_version, move |store| delta.apply(store))
    }

    /// The resource type this step belongs to.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// The schema version this step upgrades from.
    pub fn from_version(&self) -> u32 {
        self.from_version
    }

    /// The schema version this step upgrades to.
    ///
    /// A step starting at `u32::MAX` has no next version; it reports
    /// `u32::MAX` here and fails when applied.
    pub fn to_version(&self) -> u32 {
        self.from_version.saturating_add(1)
    }

    /// Applies this step to `store`.
    ///
    /// An empty store is left untouched. Otherwise the delta runs on a working
    /// copy which replaces `store` only when the delta succeeds, so on error
    /// `store` is exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::MalformedState`] if the store is not at
    /// `from_version` or the delta rejects the stored attributes.
    pub fn apply(&self, store: &mut AttributeStore) -> Result<(), MigrationError> {
        if store.is_empty() {
            tracing::debug!(
                resource_type = %self.resource_type,
                "empty state; nothing to migrate"
            );
            return Ok(());
        }
        self.transform(store, true)
    }

    /// Runs the delta whether or not the store is empty.
    ///
    /// The runner checks emptiness once on entry; a store emptied by an
    /// earlier step in the same run must still advance through later steps.
    pub(crate) fn transform(
        &self,
        store: &mut AttributeStore,
        log_snapshots: bool,
    ) -> Result<(), MigrationError> {
        if self.from_version == u32::MAX {
            return Err(self.malformed(MalformedState::new(format!(
                "no schema version follows {}",
                self.from_version
            ))));
        }

        if store.version() != self.from_version {
            return Err(self.malformed(MalformedState::new(format!(
                "state is at schema version {}, step starts at version {}",
                store.version(),
                self.from_version
            ))));
        }

        let mut working = store.clone();
        if log_snapshots {
            tracing::debug!(
                resource_type = %self.resource_type,
                "attributes before migration: {:?}",
                working.attributes()
            );
        }

        (self.body)(&mut working).map_err(|e| self.malformed(e))?;
        working.set_version(self.to_version());

        if log_snapshots {
            tracing::debug!(
                resource_type = %self.resource_type,
                "attributes after migration: {:?}",
                working.attributes()
            );
        }

        *store = working;
        Ok(())
    }

    fn malformed(&self, error: MalformedState) -> MigrationError {
        MigrationError::MalformedState {
            resource_type: self.resource_type.clone(),
            from: self.from_version,
            to: self.to_version(),
            reason: error.reason,
        }
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("resource_type", &self.resource_type)
            .field("from_version", &self.from_version)
            .field("to_version", &self.to_version())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Operation {
    Require(String),
    AddDefault(String, String),
    Set(String, String),
    Rename(String, String),
    Remove(String),
}

/// An ordered list of attribute edits forming one schema delta.
///
/// Covers the common shapes of a schema change without a hand-written closure:
///
/// ```ignore
/// let delta = Delta::new()
///     .require("arn")
///     .add_default("permanent_deletion_time_in_days", "30")
///     .rename("type", "certificate_authority_type");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Delta {
    operations: Vec<Operation>,
}

impl Delta {
    /// Creates an empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the step with malformed state if `key` is absent.
    pub fn require(mut self, key: impl Into<String>) -> Self {
        self.operations.push(Operation::Require(key.into()));
        self
    }

    /// Adds `key` with `value` unless it is already present.
    pub fn add_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.operations
            .push(Operation::AddDefault(key.into(), value.into()));
        self
    }

    /// Sets `key` to `value` unconditionally.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.operations.push(Operation::Set(key.into(), value.into()));
        self
    }

    /// Moves the value under `from` to `to`; no-op when `from` is absent.
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.operations.push(Operation::Rename(from.into(), to.into()));
        self
    }

    /// Removes `key` if present.
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.operations.push(Operation::Remove(key.into()));
        self
    }

    /// Number of edits in this delta.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns `true` if the delta has no edits.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Applies every edit in order.
    pub fn apply(&self, store: &mut AttributeStore) -> Result<(), MalformedState> {
        for operation in &self.operations {
            match operation {
                Operation::Require(key) => {
                    store.require(key)?;
                }
                Operation::AddDefault(key, value) => {
                    store.set_default(key, value.as_str());
                }
                Operation::Set(key, value) => store.set(key.as_str(), value.as_str()),
                Operation::Rename(from, to) => {
                    store.rename(from, to);
                }
                Operation::Remove(key) => {
                    store.remove(key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deletion_window_step() -> MigrationStep {
        MigrationStep::new("example_authority", 0, |store| {
            store.set_default("permanent_deletion_time_in_days", "30");
            Ok(())
        })
    }

    #[test]
    fn test_step_versions() {
        let step = deletion_window_step();
        assert_eq!(step.resource_type(), "example_authority");
        assert_eq!(step.from_version(), 0);
        assert_eq!(step.to_version(), 1);
    }

    #[test]
    fn test_apply_advances_version_and_adds_default() {
        let step = deletion_window_step();
        let mut store = AttributeStore::from_attributes(0, [("name", "acme")]);

        step.apply(&mut store).unwrap();

        assert_eq!(store.version(), 1);
        assert_eq!(store.get("name"), Some("acme"));
        assert_eq!(store.get("permanent_deletion_time_in_days"), Some("30"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_apply_keeps_existing_value() {
        let step = deletion_window_step();
        let mut store = AttributeStore::from_attributes(
            0,
            [("name", "acme"), ("permanent_deletion_time_in_days", "7")],
        );

        step.apply(&mut store).unwrap();
        assert_eq!(store.get("permanent_deletion_time_in_days"), Some("7"));
    }

    #[test]
    fn test_apply_on_empty_store_is_noop() {
        let step = deletion_window_step();
        let mut store = AttributeStore::new(0);

        step.apply(&mut store).unwrap();

        assert!(store.is_empty());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_failed_step_leaves_store_unmodified() {
        let step = MigrationStep::new("example_authority", 0, |store| {
            store.set("half_written", "yes");
            store.require("arn")?;
            Ok(())
        });
        let mut store = AttributeStore::from_attributes(0, [("name", "acme")]);
        let before = store.clone();

        let err = step.apply(&mut store).unwrap_err();

        assert!(matches!(
            err,
            MigrationError::MalformedState { from: 0, to: 1, .. }
        ));
        assert_eq!(store, before);
    }

    #[test]
    fn test_apply_rejects_store_at_other_version() {
        let step = deletion_window_step();
        let mut store = AttributeStore::from_attributes(2, [("name", "acme")]);

        let err = step.apply(&mut store).unwrap_err();
        assert!(err.to_string().contains("schema version 2"));
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_delta_operations_in_order() {
        let delta = Delta::new()
            .require("name")
            .rename("type", "kind")
            .add_default("kind", "ROOT")
            .set("revision", "2")
            .remove("legacy");
        assert_eq!(delta.len(), 5);

        let mut store =
            AttributeStore::from_attributes(0, [("name", "acme"), ("legacy", "x"), ("type", "SUB")]);
        delta.apply(&mut store).unwrap();

        assert_eq!(store.get("kind"), Some("SUB"));
        assert_eq!(store.get("revision"), Some("2"));
        assert!(!store.contains("type"));
        assert!(!store.contains("legacy"));
    }

    #[test]
    fn test_delta_require_fails_on_missing_key() {
        let step = MigrationStep::from_delta("example_authority", 0, Delta::new().require("arn"));
        let mut store = AttributeStore::from_attributes(0, [("name", "acme")]);

        let err = step.apply(&mut store).unwrap_err();
        match err {
            MigrationError::MalformedState {
                resource_type,
                reason,
                ..
            } => {
                assert_eq!(resource_type, "example_authority");
                assert!(reason.contains("'arn'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_transform_advances_emptied_store() {
        let step = MigrationStep::new("example_authority", 1, |store| {
            store.set_default("x", "1");
            Ok(())
        });
        let mut store = AttributeStore::new(1);

        step.transform(&mut store, false).unwrap();

        assert_eq!(store.version(), 2);
        assert_eq!(store.get("x"), Some("1"));
    }

    #[test]
    fn test_step_at_max_version_fails_instead_of_overflowing() {
        let step = MigrationStep::new("example_authority", u32::MAX, |_| Ok(()));
        assert_eq!(step.to_version(), u32::MAX);

        let mut store = AttributeStore::from_attributes(u32::MAX, [("name", "acme")]);
        let err = step.apply(&mut store).unwrap_err();

        assert!(err.to_string().contains("no schema version follows"));
        assert_eq!(store.version(), u32::MAX);
    }

    #[test]
    fn test_step_debug_omits_body() {
        let debug = format!("{:?}", deletion_window_step());
        assert!(debug.contains("from_version: 0"));
        assert!(debug.contains("to_version: 1"));
    }
}
