//! Result normalization and merging
//!
//! Turns raw per-model predictions into [`ClassifierResult`]s and merges them
//! into the envelope returned by the remote service, so consumers do not need
//! to know whether a response was produced locally.

use crate::classifier::{ModelMetadata, RawPrediction};
use sightline_core::{ClassificationRecord, ClassifiedImages, ClassifierResult, WarningInfo};

/// Whether a raw score is exposed under `floor`
///
/// Scores outside `[0, 1]` (or NaN) are never exposed; in-range scores must be
/// strictly greater than the floor.
pub fn passes_floor(score: f64, floor: f64) -> bool {
    (0.0..=1.0).contains(&score) && score > floor
}

/// Convert raw predictions into a canonical classifier result
///
/// Prediction order is preserved. Missing metadata names become empty strings.
pub fn normalize<I>(raw: I, metadata: &ModelMetadata, floor: f64) -> ClassifierResult
where
    I: IntoIterator<Item = RawPrediction>,
{
    let classes = raw
        .into_iter()
        .filter(|prediction| passes_floor(prediction.score, floor))
        .map(|prediction| ClassificationRecord::new(prediction.label, prediction.score))
        .collect();

    ClassifierResult {
        display_name: metadata.display_name.clone().unwrap_or_default(),
        classifier_id: metadata.classifier_id.clone().unwrap_or_default(),
        classes,
    }
}

/// Merge per-classifier results into a single-image envelope
pub fn merge(results: Vec<ClassifierResult>) -> ClassifiedImages {
    ClassifiedImages::single(results)
}

/// Merge results and attach warnings
pub fn merge_with_warnings(
    results: Vec<ClassifierResult>,
    warnings: Vec<WarningInfo>,
) -> ClassifiedImages {
    let mut merged = merge(results);
    merged.warnings = warnings;
    merged
}
