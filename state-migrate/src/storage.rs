//! State file storage with atomic writes.
//!
//! Loads a document of persisted records, migrates them to their current
//! schema versions, and writes the result back through a temporary file and
//! an atomic rename.

use crate::errors::IoOperationKind;
use crate::{MigrationError, MigrationRunner, PersistedRecord};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

/// File format strategy for storage operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStrategy {
    /// JSON format
    Json,
    /// TOML format (records become `[[resources]]` tables)
    Toml,
}

/// Configuration for atomic write operations.
#[derive(Debug, Clone)]
pub struct AtomicWriteConfig {
    /// Number of times to retry rename operation (default: 3)
    pub retry_count: usize,
    /// Whether to clean up old temporary files (best effort)
    pub cleanup_tmp_files: bool,
}

impl Default for AtomicWriteConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            cleanup_tmp_files: true,
        }
    }
}

/// Behavior when loading a file that doesn't exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBehavior {
    /// Start with no records if file is missing
    CreateIfMissing,
    /// Return an error if file is missing
    ErrorIfMissing,
}

/// Strategy for state file operations.
#[derive(Debug, Clone)]
pub struct StateFileStrategy {
    /// File format to use
    pub format: FormatStrategy,
    /// Atomic write configuration
    pub atomic_write: AtomicWriteConfig,
    /// Behavior when file doesn't exist
    pub load_behavior: LoadBehavior,
}

impl Default for StateFileStrategy {
    fn default() -> Self {
        Self {
            format: FormatStrategy::Json,
            atomic_write: AtomicWriteConfig::default(),
            load_behavior: LoadBehavior::CreateIfMissing,
        }
    }
}

impl StateFileStrategy {
    /// Create a new strategy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the file format.
    pub fn with_format(mut self, format: FormatStrategy) -> Self {
        self.format = format;
        self
    }

    /// Set the retry count for atomic writes.
    pub fn with_retry_count(mut self, count: usize) -> Self {
        self.atomic_write.retry_count = count;
        self
    }

    /// Set whether to cleanup temporary files.
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.atomic_write.cleanup_tmp_files = cleanup;
        self
    }

    /// Set the load behavior.
    pub fn with_load_behavior(mut self, behavior: LoadBehavior) -> Self {
        self.load_behavior = behavior;
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct StateDocument {
    #[serde(default)]
    resources: Vec<PersistedRecord>,
}

/// A state file holding persisted resource records.
///
/// Provides:
/// - **Atomicity**: saves go through a tmp file + atomic rename, and
///   `migrate_all` either upgrades every record or none
/// - **Isolation**: an exclusive lock file is held while writing
/// - **Durability**: explicit fsync before rename
pub struct StateFile {
    path: PathBuf,
    records: Vec<PersistedRecord>,
    strategy: StateFileStrategy,
}

impl StateFile {
    /// Opens a state file and reads its records.
    ///
    /// # Behavior
    ///
    /// Depends on `strategy.load_behavior`:
    /// - `CreateIfMissing`: starts with no records if the file doesn't exist
    /// - `ErrorIfMissing`: returns an error if the file doesn't exist
    ///
    /// An empty file holds no records.
    pub fn open(path: PathBuf, strategy: StateFileStrategy) -> Result<Self, MigrationError> {
        let document = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| MigrationError::IoError {
                operation: IoOperationKind::Read,
                path: path.display().to_string(),
                context: None,
                error: e.to_string(),
            })?;

            if content.trim().is_empty() {
                StateDocument::default()
            } else {
                match strategy.format {
                    FormatStrategy::Json => serde_json::from_str(&content).map_err(|e| {
                        MigrationError::DeserializationError(format!(
                            "Failed to parse state file: {}",
                            e
                        ))
                    })?,
                    FormatStrategy::Toml => toml::from_str(&content)
                        .map_err(|e| MigrationError::TomlParseError(e.to_string()))?,
                }
            }
        } else {
            match strategy.load_behavior {
                LoadBehavior::CreateIfMissing => StateDocument::default(),
                LoadBehavior::ErrorIfMissing => {
                    return Err(MigrationError::IoError {
                        operation: IoOperationKind::Read,
                        path: path.display().to_string(),
                        context: None,
                        error: "File not found".to_string(),
                    });
                }
            }
        };

        tracing::debug!(
            path = %path.display(),
            records = document.resources.len(),
            "loaded state file"
        );

        Ok(Self {
            path,
            records: document.resources,
            strategy,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The records currently held in memory.
    pub fn records(&self) -> &[PersistedRecord] {
        &self.records
    }

    /// Adds a record in memory (does not save to file).
    pub fn push(&mut self, record: PersistedRecord) {
        self.records.push(record);
    }

    /// Migrates every record to its type's current schema version.
    ///
    /// Returns how many records changed version. If any record fails, no
    /// record is changed.
    pub fn migrate_all(&mut self, runner: &MigrationRunner<'_>) -> Result<usize, MigrationError> {
        let mut migrated = Vec::with_capacity(self.records.len());
        let mut changed = 0;

        for record in &self.records {
            let before = record.schema_version;
            let after = runner.migrate_record(record.clone())?;
            if after.schema_version != before {
                changed += 1;
            }
            migrated.push(after);
        }

        self.records = migrated;
        tracing::info!(
            path = %self.path.display(),
            "migrated {} of {} records",
            changed,
            self.records.len()
        );
        Ok(changed)
    }

    /// Migrates every record, then saves if anything changed.
    pub fn migrate_and_save(&mut self, runner: &MigrationRunner<'_>) -> Result<usize, MigrationError> {
        let changed = self.migrate_all(runner)?;
        if changed > 0 {
            self.save()?;
        }
        Ok(changed)
    }

    /// Save current records to file atomically.
    ///
    /// Uses a temporary file + atomic rename to ensure durability.
    /// Retries according to `strategy.atomic_write.retry_count`. On failure
    /// the temporary file is removed and the state file is left as it was.
    pub fn save(&self) -> Result<(), MigrationError> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| MigrationError::IoError {
                    operation: IoOperationKind::CreateDir,
                    path: parent.display().to_string(),
                    context: None,
                    error: e.to_string(),
                })?;
            }
        }

        let document = StateDocument {
            resources: self.records.clone(),
        };

        let content = match self.strategy.format {
            FormatStrategy::Json => serde_json::to_string_pretty(&document)
                .map_err(|e| MigrationError::SerializationError(e.to_string()))?,
            FormatStrategy::Toml => toml::to_string_pretty(&document)
                .map_err(|e| MigrationError::TomlSerializeError(e.to_string()))?,
        };

        let _lock = FileLock::acquire(&self.path)?;

        let tmp_path = self.get_temp_path()?;
        if let Err(e) = self.write_temp_and_rename(&tmp_path, &content) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        if self.strategy.atomic_write.cleanup_tmp_files {
            let _ = self.cleanup_temp_files();
        }

        Ok(())
    }

    /// Writes `content` to `tmp_path`, syncs it, then renames it over the state file.
    ///
    /// The caller removes `tmp_path` if this fails.
    fn write_temp_and_rename(&self, tmp_path: &Path, content: &str) -> Result<(), MigrationError> {
        let mut tmp_file = File::create(tmp_path).map_err(|e| MigrationError::IoError {
            operation: IoOperationKind::Create,
            path: tmp_path.display().to_string(),
            context: Some("temporary file".to_string()),
            error: e.to_string(),
        })?;

        tmp_file
            .write_all(content.as_bytes())
            .map_err(|e| MigrationError::IoError {
                operation: IoOperationKind::Write,
                path: tmp_path.display().to_string(),
                context: Some("temporary file".to_string()),
                error: e.to_string(),
            })?;

        // Ensure data is written to disk
        tmp_file.sync_all().map_err(|e| MigrationError::IoError {
            operation: IoOperationKind::Sync,
            path: tmp_path.display().to_string(),
            context: Some("temporary file".to_string()),
            error: e.to_string(),
        })?;

        drop(tmp_file);

        self.atomic_rename(tmp_path)
    }

    /// Get path to temporary file for atomic writes.
    fn get_temp_path(&self) -> Result<PathBuf, MigrationError> {
        let parent = self.path.parent().ok_or_else(|| {
            MigrationError::PathResolution("Path has no parent directory".to_string())
        })?;

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| MigrationError::PathResolution("Path has no file name".to_string()))?;

        let tmp_name = format!(
            ".{}.tmp.{}",
            file_name.to_string_lossy(),
            std::process::id()
        );
        Ok(parent.join(tmp_name))
    }

    /// Atomically rename temporary file to target path with retry.
    fn atomic_rename(&self, tmp_path: &Path) -> Result<(), MigrationError> {
        let retry_count = self.strategy.atomic_write.retry_count.max(1);
        let mut last_error = String::new();

        for attempt in 0..retry_count {
            match fs::rename(tmp_path, &self.path) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 < retry_count {
                        std::thread::sleep(std::time::Duration::from_millis(10));
                    }
                }
            }
        }

        Err(MigrationError::IoError {
            operation: IoOperationKind::Rename,
            path: self.path.display().to_string(),
            context: Some(format!("after {} retries", retry_count)),
            error: last_error,
        })
    }

    /// Clean up old temporary files (best effort).
    fn cleanup_temp_files(&self) -> std::io::Result<()> {
        let parent = match self.path.parent() {
            Some(p) => p,
            None => return Ok(()),
        };

        let file_name = match self.path.file_name() {
            Some(f) => f.to_string_lossy(),
            None => return Ok(()),
        };

        let prefix = format!(".{}.tmp.", file_name);

        for entry in fs::read_dir(parent)?.flatten() {
            if let Ok(name) = entry.file_name().into_string() {
                if name.starts_with(&prefix) {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }

        Ok(())
    }
}

/// Exclusive lock on a state file, released when dropped.
struct FileLock {
    file: File,
    lock_path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock next to `path` (`<file>.lock`).
    fn acquire(path: &Path) -> Result<Self, MigrationError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| MigrationError::PathResolution("Path has no file name".to_string()))?;
        let lock_path = path.with_file_name(format!("{}.lock", file_name.to_string_lossy()));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| MigrationError::LockError {
                path: lock_path.display().to_string(),
                error: e.to_string(),
            })?;

        FileExt::lock_exclusive(&file)
            .map_err(|e| MigrationError::LockError {
                path: lock_path.display().to_string(),
                error: format!("Failed to acquire exclusive lock: {}", e),
            })?;

        Ok(FileLock { file, lock_path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.lock_path);
    }
}
