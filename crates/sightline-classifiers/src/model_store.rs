//! On-disk model store
//!
//! Layout: every installed classifier lives at
//! `<models_dir>/<classifier_id>.<compiled_extension>` (a file or a bundle
//! directory). Resolution only reads that layout and never reaches the network;
//! downloading is the [`ModelFetcher`](crate::model_fetcher::ModelFetcher)'s job.
//!
//! Each classifier id has its own reader/writer lock. Resolution holds the
//! reader side, installation and eviction hold the writer side while they swap
//! the final artifact, so a resolver never sees the gap between removing an old
//! model and moving the new one into place.

use crate::artifact::{copy_artifact, remove_artifact, TempArtifact};
use crate::classifier::{InferenceEngine, LoadedModel};
use crate::config::BackupExclusionConfig;
use parking_lot::{Mutex, RwLock};
use sightline_core::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Marks installed artifacts as excluded from backup/sync
pub trait BackupExclusion: Send + Sync {
    fn exclude(&self, path: &Path) -> Result<()>;
}

/// Sets an extended attribute on the artifact
#[derive(Debug, Clone)]
pub struct XattrExclusion {
    attribute: String,
    value: String,
}

impl XattrExclusion {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

impl BackupExclusion for XattrExclusion {
    #[cfg(unix)]
    fn exclude(&self, path: &Path) -> Result<()> {
        xattr::set(path, &self.attribute, self.value.as_bytes()).map_err(|e| {
            Error::BackupExclusion(format!(
                "cannot set {} on {}: {}",
                self.attribute,
                path.display(),
                e
            ))
        })
    }

    #[cfg(not(unix))]
    fn exclude(&self, path: &Path) -> Result<()> {
        Err(Error::BackupExclusion(format!(
            "extended attributes unsupported for {}",
            path.display()
        )))
    }
}

/// Leaves artifacts untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackupExclusion;

impl BackupExclusion for NoBackupExclusion {
    fn exclude(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

impl BackupExclusionConfig {
    /// Build the exclusion strategy described by this configuration
    pub fn to_strategy(&self) -> Arc<dyn BackupExclusion> {
        if self.enabled {
            Arc::new(XattrExclusion::new(&self.attribute, &self.value))
        } else {
            Arc::new(NoBackupExclusion)
        }
    }
}

/// Reject identifiers that could escape the models directory
pub fn validate_classifier_id(classifier_id: &str) -> Result<()> {
    let invalid = classifier_id.is_empty()
        || classifier_id == "."
        || classifier_id == ".."
        || classifier_id.starts_with('.')
        || classifier_id
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control());

    if invalid {
        Err(Error::InvalidClassifierId(classifier_id.to_string()))
    } else {
        Ok(())
    }
}

/// Resolves classifier ids to loaded models and owns the installed artifacts
pub struct ModelStore {
    engine: Arc<dyn InferenceEngine>,
    models_dir: PathBuf,
    compiled_extension: String,
    backup_exclusion: Arc<dyn BackupExclusion>,
    cache: RwLock<HashMap<String, Arc<LoadedModel>>>,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl ModelStore {
    /// Create a store rooted at `models_dir`
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        models_dir: impl Into<PathBuf>,
        compiled_extension: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            models_dir: models_dir.into(),
            compiled_extension: compiled_extension.into(),
            backup_exclusion: Arc::new(NoBackupExclusion),
            cache: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Set the backup exclusion strategy applied after install
    pub fn with_backup_exclusion(mut self, exclusion: Arc<dyn BackupExclusion>) -> Self {
        self.backup_exclusion = exclusion;
        self
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Canonical installed path for a classifier
    pub fn model_path(&self, classifier_id: &str) -> Result<PathBuf> {
        validate_classifier_id(classifier_id)?;
        Ok(self
            .models_dir
            .join(format!("{}.{}", classifier_id, self.compiled_extension)))
    }

    fn lock_for(&self, classifier_id: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(classifier_id.to_string()).or_default())
    }

    /// Drop the per-id lock once no other caller holds it
    fn release_lock(&self, classifier_id: &str, lock: Arc<RwLock<()>>) {
        let mut locks = self.locks.lock();
        let unshared = locks
            .get(classifier_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if unshared {
            locks.remove(classifier_id);
        }
    }

    /// Resolve a classifier to a loaded model
    ///
    /// Returns `Ok(None)` when nothing is installed and
    /// `Err(Error::ModelLoadFailed)` when the installed artifact cannot be
    /// loaded.
    pub fn resolve(&self, classifier_id: &str) -> Result<Option<Arc<LoadedModel>>> {
        let path = self.model_path(classifier_id)?;
        let lock = self.lock_for(classifier_id);
        let resolved = {
            let _guard = lock.read();
            self.resolve_locked(classifier_id, path)
        };

        if matches!(resolved, Ok(None)) {
            self.release_lock(classifier_id, lock);
        }
        resolved
    }

    fn resolve_locked(
        &self,
        classifier_id: &str,
        path: PathBuf,
    ) -> Result<Option<Arc<LoadedModel>>> {
        if !path.exists() {
            // Removed behind our back; forget any stale handle
            self.cache.write().remove(classifier_id);
            return Ok(None);
        }

        if let Some(model) = self.cache.read().get(classifier_id) {
            return Ok(Some(Arc::clone(model)));
        }

        debug!(classifier_id = %classifier_id, path = %path.display(), "Loading model");
        let compiled = self.engine.load(&path).map_err(|e| match e {
            Error::ModelLoadFailed { .. } => e,
            other => Error::model_load(classifier_id, other.to_string()),
        })?;

        let model = Arc::new(LoadedModel::new(classifier_id, path, compiled));
        self.cache
            .write()
            .insert(classifier_id.to_string(), Arc::clone(&model));

        Ok(Some(model))
    }

    /// Modification time of the installed artifact
    pub fn installed_at(&self, classifier_id: &str) -> Result<Option<SystemTime>> {
        let path = self.model_path(classifier_id)?;
        match fs::metadata(&path) {
            Ok(metadata) => Ok(Some(metadata.modified()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Identifiers of all installed models, sorted
    pub fn installed_models(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.models_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let suffix = format!(".{}", self.compiled_extension);
        let mut ids = Vec::new();

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            if let Some(id) = name.strip_suffix(&suffix) {
                if validate_classifier_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Install a compiled artifact as the model for `classifier_id`
    ///
    /// The artifact is first copied to a staging name inside the models
    /// directory, then swapped in under the classifier's write lock: remove the
    /// previous model, rename the staged copy. Blocking; call from a blocking
    /// context.
    pub fn install(&self, classifier_id: &str, compiled: &Path) -> Result<PathBuf> {
        let final_path = self.model_path(classifier_id)?;

        fs::create_dir_all(&self.models_dir).map_err(|e| {
            Error::install(format!(
                "cannot create {}: {}",
                self.models_dir.display(),
                e
            ))
        })?;

        let staging = TempArtifact::new(self.models_dir.join(format!(
            ".{}.{}.staging",
            classifier_id,
            uuid::Uuid::new_v4()
        )));

        copy_artifact(compiled, staging.path()).map_err(|e| {
            Error::install(format!(
                "cannot copy {} into {}: {}",
                compiled.display(),
                self.models_dir.display(),
                e
            ))
        })?;

        {
            let lock = self.lock_for(classifier_id);
            let _guard = lock.write();

            remove_artifact(&final_path).map_err(|e| {
                Error::install(format!(
                    "cannot remove previous model {}: {}",
                    final_path.display(),
                    e
                ))
            })?;

            fs::rename(staging.path(), &final_path).map_err(|e| {
                Error::install(format!(
                    "cannot move model into {}: {}",
                    final_path.display(),
                    e
                ))
            })?;

            self.cache.write().remove(classifier_id);
        }

        if let Err(e) = self.backup_exclusion.exclude(&final_path) {
            warn!(
                classifier_id = %classifier_id,
                error = %e,
                "Could not exclude model from backup"
            );
        }

        info!(classifier_id = %classifier_id, path = %final_path.display(), "Model installed");
        Ok(final_path)
    }

    /// Drop the cached handle and delete the installed artifact
    ///
    /// Returns whether an artifact was removed.
    pub fn evict(&self, classifier_id: &str) -> Result<bool> {
        let path = self.model_path(classifier_id)?;
        let lock = self.lock_for(classifier_id);
        let removed = {
            let _guard = lock.write();
            self.cache.write().remove(classifier_id);

            if path.exists() {
                remove_artifact(&path)?;
                info!(classifier_id = %classifier_id, "Model evicted");
                true
            } else {
                false
            }
        };

        self.release_lock(classifier_id, lock);
        Ok(removed)
    }

    /// Number of cached model handles
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }
}
