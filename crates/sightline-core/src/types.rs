//! Core types for Sightline
//!
//! The serialized shape of these types matches the remote classification
//! service, so callers can treat locally produced and remotely produced
//! responses the same way.

use serde::{Deserialize, Serialize};

/// Reserved identifier of the built-in/primary classifier
pub const DEFAULT_CLASSIFIER_ID: &str = "default";

/// Default confidence floor; scores must be strictly greater to be exposed
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.01;

/// A single label produced by a classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    /// Class label
    #[serde(rename = "class")]
    pub label: String,

    /// Confidence score (0.0-1.0)
    #[serde(rename = "score")]
    pub confidence: f64,
}

impl ClassificationRecord {
    /// Create a new classification record
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Output of one classifier for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResult {
    /// Human readable classifier name
    #[serde(rename = "name")]
    pub display_name: String,

    /// Classifier identifier
    pub classifier_id: String,

    /// Classes in the order the model produced them
    pub classes: Vec<ClassificationRecord>,
}

impl ClassifierResult {
    /// Create an empty result for a classifier
    pub fn new(classifier_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            classifier_id: classifier_id.into(),
            classes: Vec::new(),
        }
    }

    /// Look up a class by label
    pub fn class(&self, label: &str) -> Option<&ClassificationRecord> {
        self.classes.iter().find(|c| c.label == label)
    }
}

/// Per-image entry of the response envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedImage {
    #[serde(default)]
    pub source_url: String,

    #[serde(default)]
    pub resolved_url: String,

    /// Raw image reference (file name when uploaded)
    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub error: String,

    #[serde(default)]
    pub classifiers: Vec<ClassifierResult>,
}

/// Non-fatal notice attached to a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningInfo {
    pub warning_id: String,
    pub description: String,
}

impl WarningInfo {
    pub fn new(warning_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            warning_id: warning_id.into(),
            description: description.into(),
        }
    }
}

/// Response envelope shared by local and remote classification
///
/// Local classification always produces exactly one image entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedImages {
    #[serde(default)]
    pub images: Vec<ClassifiedImage>,

    #[serde(rename = "warning", default)]
    pub warnings: Vec<WarningInfo>,
}

/// The merged result of a local classification call
pub type MergedClassification = ClassifiedImages;

impl ClassifiedImages {
    /// Wrap classifier results for a single image
    pub fn single(classifiers: Vec<ClassifierResult>) -> Self {
        Self {
            images: vec![ClassifiedImage {
                classifiers,
                ..Default::default()
            }],
            warnings: Vec::new(),
        }
    }

    /// All classifier results across images
    pub fn classifier_results(&self) -> impl Iterator<Item = &ClassifierResult> {
        self.images.iter().flat_map(|image| image.classifiers.iter())
    }

    /// Result of a specific classifier, if present
    pub fn classifier(&self, classifier_id: &str) -> Option<&ClassifierResult> {
        self.classifier_results()
            .find(|c| c.classifier_id == classifier_id)
    }

    /// Whether no classifier produced output
    pub fn is_empty(&self) -> bool {
        self.classifier_results().next().is_none()
    }
}
