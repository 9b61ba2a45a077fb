//! Local recognizer: the public entry point
//!
//! Wires the model store, fetcher and fan-out engine together from one
//! [`RecognizerConfig`].

use crate::classifier::{InferenceEngine, LoadedModel};
use crate::config::RecognizerConfig;
use crate::model_fetcher::{Credentials, ModelFetcher, RemoteClassifier};
use crate::model_store::{BackupExclusion, ModelStore};
use crate::pipeline::{ClassificationEngine, EngineOptions};
use chrono::{DateTime, Utc};
use sightline_core::{ClassifiedImages, Error, Result, DEFAULT_CLASSIFIER_ID};
use sightline_telemetry::{FetchOutcome, MetricsCollector, MetricsSnapshot};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs locally installed classifiers and keeps them in sync with the remote service
pub struct LocalRecognizer {
    config: RecognizerConfig,
    store: Arc<ModelStore>,
    fetcher: ModelFetcher,
    engine: ClassificationEngine,
    metrics: MetricsCollector,
}

impl LocalRecognizer {
    /// Create a recognizer with the configured backup exclusion strategy
    pub fn new(config: RecognizerConfig, inference: Arc<dyn InferenceEngine>) -> Result<Self> {
        RecognizerBuilder::new(config, inference).build()
    }

    /// Start a builder for custom collaborators
    pub fn builder(
        config: RecognizerConfig,
        inference: Arc<dyn InferenceEngine>,
    ) -> RecognizerBuilder {
        RecognizerBuilder::new(config, inference)
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    /// Classify an image with locally installed classifiers
    ///
    /// `classifier_ids` defaults to the built-in classifier and
    /// `confidence_floor` to the configured floor.
    pub async fn classify_locally(
        &self,
        image: &[u8],
        classifier_ids: Option<&[String]>,
        confidence_floor: Option<f64>,
    ) -> Result<ClassifiedImages> {
        let floor = confidence_floor.unwrap_or(self.config.confidence_floor);
        let default_ids = [DEFAULT_CLASSIFIER_ID.to_string()];
        let classifier_ids = classifier_ids.unwrap_or(&default_ids);

        self.engine.classify(image, classifier_ids, floor).await
    }

    /// Resolve a classifier to its loaded local model, if installed
    pub fn resolve_model(&self, classifier_id: &str) -> Result<Option<Arc<LoadedModel>>> {
        self.store.resolve(classifier_id)
    }

    /// Download, compile and install the model for a classifier
    pub async fn download_and_install_model(
        &self,
        classifier_id: &str,
        credentials: &Credentials,
    ) -> Result<PathBuf> {
        match self.fetcher.fetch(classifier_id, credentials).await {
            Ok(path) => {
                self.metrics.record_fetch(FetchOutcome::Installed);
                Ok(path)
            }
            Err(e) => {
                warn!(classifier_id = %classifier_id, error = %e, "Model fetch failed");
                self.metrics.record_fetch(FetchOutcome::Failed);
                Err(e)
            }
        }
    }

    /// Bring the local model for a classifier up to date
    ///
    /// Downloads when nothing is installed, when the remote classifier was
    /// retrained after the local install, or when the remote does not report a
    /// retraining time.
    pub async fn update_model(&self, classifier_id: &str, credentials: &Credentials) -> Result<()> {
        let remote = match self.fetcher.remote_classifier(classifier_id, credentials).await {
            Ok(remote) => remote,
            Err(e) => {
                self.metrics.record_fetch(FetchOutcome::Failed);
                return Err(e);
            }
        };

        let installed_at = self.store.installed_at(classifier_id)?.map(DateTime::<Utc>::from);

        if !needs_update(&remote, installed_at) {
            info!(classifier_id = %classifier_id, "Local model is up to date");
            self.metrics.record_fetch(FetchOutcome::UpToDate);
            return Ok(());
        }

        self.download_and_install_model(classifier_id, credentials)
            .await
            .map(|_| ())
    }

    /// Identifiers of all locally installed models
    pub fn list_local_models(&self) -> Result<Vec<String>> {
        self.store.installed_models()
    }

    /// Remove the local model for a classifier
    pub fn delete_local_model(&self, classifier_id: &str) -> Result<()> {
        if self.store.evict(classifier_id)? {
            Ok(())
        } else {
            Err(Error::ModelNotFound(classifier_id.to_string()))
        }
    }

    /// Current metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// A local model is stale when the remote classifier was retrained after it was installed
fn needs_update(remote: &RemoteClassifier, installed_at: Option<DateTime<Utc>>) -> bool {
    match (remote.updated, installed_at) {
        (_, None) => true,
        (None, Some(_)) => true,
        (Some(updated), Some(installed)) => updated > installed,
    }
}

/// Builder for [`LocalRecognizer`]
pub struct RecognizerBuilder {
    config: RecognizerConfig,
    inference: Arc<dyn InferenceEngine>,
    backup_exclusion: Option<Arc<dyn BackupExclusion>>,
    metrics: Option<MetricsCollector>,
}

impl RecognizerBuilder {
    pub fn new(config: RecognizerConfig, inference: Arc<dyn InferenceEngine>) -> Self {
        Self {
            config,
            inference,
            backup_exclusion: None,
            metrics: None,
        }
    }

    /// Override the backup exclusion strategy from configuration
    pub fn backup_exclusion(mut self, exclusion: Arc<dyn BackupExclusion>) -> Self {
        self.backup_exclusion = Some(exclusion);
        self
    }

    /// Share a metrics collector with the rest of the application
    pub fn metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the recognizer
    pub fn build(self) -> Result<LocalRecognizer> {
        self.config.validate()?;

        let exclusion = self
            .backup_exclusion
            .unwrap_or_else(|| self.config.backup_exclusion.to_strategy());
        let metrics = self.metrics.unwrap_or_default();

        let store = Arc::new(
            ModelStore::new(
                Arc::clone(&self.inference),
                self.config.models_dir.clone(),
                self.config.compiled_extension.clone(),
            )
            .with_backup_exclusion(exclusion),
        );

        let fetcher = ModelFetcher::new(
            &self.config,
            Arc::clone(&self.inference),
            Arc::clone(&store),
        )?;
        let engine =
            ClassificationEngine::new(Arc::clone(&store), EngineOptions::from(&self.config))
                .with_metrics(metrics.clone());

        info!(
            models_dir = %self.config.models_dir.display(),
            scratch_dir = %self.config.scratch_dir.display(),
            "Local recognizer initialized"
        );

        Ok(LocalRecognizer {
            config: self.config,
            store,
            fetcher,
            engine,
            metrics,
        })
    }
}
