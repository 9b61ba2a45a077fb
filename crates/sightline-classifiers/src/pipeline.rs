//! Classification fan-out engine
//!
//! One classification request fans out to one task per requested classifier.
//! Each task resolves its model through the [`ModelStore`], scales the image
//! to the model's input size, runs inference and normalizes the output. The
//! request completes once every task has finished; classifiers that are not
//! installed, fail to load, fail inference or time out are left out of the
//! merged result instead of failing the request.

use crate::classifier::LoadedModel;
use crate::config::{validate_confidence_floor, PreprocessConfig, RecognizerConfig, ResultOrder};
use crate::model_store::ModelStore;
use crate::{normalizer, preprocess};
use image::DynamicImage;
use sightline_core::{ClassifiedImages, ClassifierResult, Error, Result, WarningInfo};
use sightline_telemetry::MetricsCollector;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Behavior switches for the fan-out engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub preprocessing: PreprocessConfig,
    pub result_order: ResultOrder,
    pub dedup_classifiers: bool,
    pub require_any_classifier: bool,
    pub report_skipped: bool,
    pub inference_timeout: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&RecognizerConfig::default())
    }
}

impl From<&RecognizerConfig> for EngineOptions {
    fn from(config: &RecognizerConfig) -> Self {
        Self {
            preprocessing: config.preprocessing.clone(),
            result_order: config.result_order,
            dedup_classifiers: config.dedup_classifiers,
            require_any_classifier: config.require_any_classifier,
            report_skipped: config.report_skipped,
            inference_timeout: config.inference_timeout(),
        }
    }
}

/// What happened to one requested classifier
#[derive(Debug)]
enum Outcome {
    Classified {
        result: ClassifierResult,
        latency_us: u64,
    },
    NotInstalled,
    LoadFailed(Error),
    InferenceFailed(Error),
    TimedOut,
    Panicked(String),
}

#[derive(Debug)]
struct TaskReport {
    position: usize,
    classifier_id: String,
    outcome: Outcome,
}

/// Runs requested classifiers concurrently and merges their output
pub struct ClassificationEngine {
    store: Arc<ModelStore>,
    options: EngineOptions,
    metrics: MetricsCollector,
}

impl ClassificationEngine {
    pub fn new(store: Arc<ModelStore>, options: EngineOptions) -> Self {
        Self {
            store,
            options,
            metrics: MetricsCollector::new(),
        }
    }

    /// Record into a shared metrics collector
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Classify `image` with every classifier in `classifier_ids`
    ///
    /// Fails with `ImageDecode` before any model is touched when the image
    /// cannot be decoded, and with `NoClassifiersAvailable` only when
    /// `require_any_classifier` is set and no classifier resolved. A NaN
    /// `confidence_floor` is rejected as a configuration error.
    pub async fn classify(
        &self,
        image: &[u8],
        classifier_ids: &[String],
        confidence_floor: f64,
    ) -> Result<ClassifiedImages> {
        validate_confidence_floor(confidence_floor)?;

        let start = Instant::now();
        self.metrics.record_request();

        let decoded = match preprocess::decode(image) {
            Ok(decoded) => Arc::new(decoded),
            Err(e) => {
                self.metrics.record_rejected();
                return Err(e);
            }
        };

        let requested = self.requested_ids(classifier_ids);
        let mut tasks = JoinSet::new();

        for (position, classifier_id) in requested.into_iter().enumerate() {
            tasks.spawn(run_classifier(
                position,
                classifier_id,
                Arc::clone(&self.store),
                Arc::clone(&decoded),
                self.options.preprocessing.clone(),
                confidence_floor,
                self.options.inference_timeout,
            ));
        }

        let mut collected = Vec::new();
        let mut warnings = Vec::new();
        let mut resolved = 0usize;

        while let Some(joined) = tasks.join_next().await {
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    warn!(error = %e, "Classifier task aborted");
                    self.metrics.record_inference_failure();
                    continue;
                }
            };

            if !matches!(report.outcome, Outcome::NotInstalled | Outcome::LoadFailed(_)) {
                resolved += 1;
            }

            match report.outcome {
                Outcome::Classified { result, latency_us } => {
                    self.metrics.record_inference(latency_us);
                    collected.push((report.position, result));
                }
                outcome => {
                    if let Some(warning) = self.skip(&report.classifier_id, outcome) {
                        warnings.push(warning);
                    }
                }
            }
        }

        if resolved == 0 && self.options.require_any_classifier {
            return Err(Error::NoClassifiersAvailable);
        }

        if self.options.result_order == ResultOrder::Request {
            collected.sort_by_key(|(position, _)| *position);
        }

        let results: Vec<ClassifierResult> =
            collected.into_iter().map(|(_, result)| result).collect();

        debug!(
            classifiers = results.len(),
            latency_us = start.elapsed().as_micros() as u64,
            "Local classification finished"
        );

        let warnings = if self.options.report_skipped {
            warnings
        } else {
            Vec::new()
        };

        Ok(normalizer::merge_with_warnings(results, warnings))
    }

    fn requested_ids(&self, classifier_ids: &[String]) -> Vec<String> {
        if !self.options.dedup_classifiers {
            return classifier_ids.to_vec();
        }

        let mut seen = HashSet::new();
        classifier_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }

    /// Log a skipped classifier and describe it as a warning
    fn skip(&self, classifier_id: &str, outcome: Outcome) -> Option<WarningInfo> {
        let description = match outcome {
            Outcome::Classified { .. } => return None,
            Outcome::NotInstalled => {
                debug!(classifier_id = %classifier_id, "No local model, skipping");
                self.metrics.record_skipped("not_installed");
                format!("classifier '{}' is not installed locally", classifier_id)
            }
            Outcome::LoadFailed(e) => {
                warn!(classifier_id = %classifier_id, error = %e, "Model failed to load, skipping");
                self.metrics.record_skipped("load_failed");
                e.to_string()
            }
            Outcome::InferenceFailed(e) => {
                warn!(classifier_id = %classifier_id, error = %e, "Inference failed, skipping");
                self.metrics.record_inference_failure();
                e.to_string()
            }
            Outcome::TimedOut => {
                warn!(classifier_id = %classifier_id, "Inference timed out, skipping");
                self.metrics.record_inference_failure();
                format!("classifier '{}' timed out", classifier_id)
            }
            Outcome::Panicked(reason) => {
                warn!(
                    classifier_id = %classifier_id,
                    reason = %reason,
                    "Inference task panicked, skipping"
                );
                self.metrics.record_inference_failure();
                format!("classifier '{}' failed: {}", classifier_id, reason)
            }
        };

        Some(WarningInfo::new("classifier_skipped", description))
    }
}

async fn run_classifier(
    position: usize,
    classifier_id: String,
    store: Arc<ModelStore>,
    image: Arc<DynamicImage>,
    preprocessing: PreprocessConfig,
    floor: f64,
    timeout: Option<Duration>,
) -> TaskReport {
    let id = classifier_id.clone();
    let work = tokio::task::spawn_blocking(move || {
        classify_blocking(&id, &store, &image, &preprocessing, floor)
    });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(joined) => joined,
            Err(_) => {
                return TaskReport {
                    position,
                    classifier_id,
                    outcome: Outcome::TimedOut,
                }
            }
        },
        None => work.await,
    };

    let outcome = joined.unwrap_or_else(|e| Outcome::Panicked(e.to_string()));

    TaskReport {
        position,
        classifier_id,
        outcome,
    }
}

fn classify_blocking(
    classifier_id: &str,
    store: &ModelStore,
    image: &DynamicImage,
    preprocessing: &PreprocessConfig,
    floor: f64,
) -> Outcome {
    let model = match store.resolve(classifier_id) {
        Ok(Some(model)) => model,
        Ok(None) => return Outcome::NotInstalled,
        Err(e) => return Outcome::LoadFailed(e),
    };

    run_model(classifier_id, &model, image, preprocessing, floor)
}

fn run_model(
    classifier_id: &str,
    model: &LoadedModel,
    image: &DynamicImage,
    preprocessing: &PreprocessConfig,
    floor: f64,
) -> Outcome {
    let start = Instant::now();
    let prepared = preprocess::prepare_for(image, model.input_size(), preprocessing);

    match model.predict(&prepared) {
        Ok(raw) => Outcome::Classified {
            result: normalizer::normalize(raw, model.metadata(), floor),
            latency_us: start.elapsed().as_micros() as u64,
        },
        Err(e) => Outcome::InferenceFailed(match e {
            Error::InferenceFailed { .. } => e,
            other => Error::inference(classifier_id, other.to_string()),
        }),
    }
}
