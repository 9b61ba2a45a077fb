//! Inference engine traits and loaded model handles
//!
//! The inference engine itself is an external collaborator. Sightline only
//! needs three capabilities from it: compile a downloaded artifact, load a
//! compiled artifact, and run a loaded model on prepared pixels.

use image::RgbImage;
use sightline_core::Result;
use std::fmt;
use std::path::{Path, PathBuf};

/// Label/score pair as produced by an inference engine
#[derive(Debug, Clone, PartialEq)]
pub struct RawPrediction {
    pub label: String,
    pub score: f64,
}

impl RawPrediction {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

impl<S: Into<String>> From<(S, f64)> for RawPrediction {
    fn from((label, score): (S, f64)) -> Self {
        Self::new(label, score)
    }
}

/// Metadata embedded in a compiled model
///
/// Every field is optional; missing names surface as empty strings in
/// classification output rather than as errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelMetadata {
    /// Human readable classifier name
    pub display_name: Option<String>,

    /// Classifier identifier the model was trained for
    pub classifier_id: Option<String>,

    /// Model version string
    pub version: Option<String>,

    /// Expected input size (width, height) in pixels
    pub input_size: Option<(u32, u32)>,
}

/// A compiled model loaded into the inference engine
pub trait CompiledModel: Send + Sync {
    /// Metadata embedded in the artifact
    fn metadata(&self) -> ModelMetadata;

    /// Run the model on an image already scaled to its input size
    fn predict(&self, image: &RgbImage) -> Result<Vec<RawPrediction>>;
}

/// Inference engine capabilities used by the model store and fetcher
pub trait InferenceEngine: Send + Sync {
    /// Compile a raw downloaded artifact into a loadable form at `destination`
    fn compile(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Load a compiled artifact
    fn load(&self, path: &Path) -> Result<Box<dyn CompiledModel>>;
}

/// Immutable handle to a compiled model owned by the model store cache
pub struct LoadedModel {
    classifier_id: String,
    path: PathBuf,
    metadata: ModelMetadata,
    model: Box<dyn CompiledModel>,
}

impl LoadedModel {
    pub(crate) fn new(
        classifier_id: impl Into<String>,
        path: impl Into<PathBuf>,
        model: Box<dyn CompiledModel>,
    ) -> Self {
        let metadata = model.metadata();
        Self {
            classifier_id: classifier_id.into(),
            path: path.into(),
            metadata,
            model,
        }
    }

    /// Identifier the model was resolved under
    pub fn classifier_id(&self) -> &str {
        &self.classifier_id
    }

    /// Location of the installed artifact
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get model metadata
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Input size declared by the model
    pub fn input_size(&self) -> Option<(u32, u32)> {
        self.metadata.input_size
    }

    /// Run inference on prepared pixels
    pub fn predict(&self, image: &RgbImage) -> Result<Vec<RawPrediction>> {
        self.model.predict(image)
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("classifier_id", &self.classifier_id)
            .field("path", &self.path)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
