//! Sightline Classifiers
//!
//! Client-side orchestration of locally installed image classifiers.
//!
//! - [`model_store`]: resolves classifier ids to compiled models on disk
//! - [`model_fetcher`]: downloads, compiles and atomically installs models
//! - [`pipeline`]: runs the requested classifiers concurrently and joins them
//! - [`normalizer`]: filters and merges per-model output into the response
//!   envelope shared with the remote service
//!
//! The inference engine is supplied by the application through
//! [`InferenceEngine`].

pub mod artifact;
pub mod classifier;
pub mod config;
pub mod model_fetcher;
pub mod model_store;
pub mod normalizer;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;

pub use classifier::{CompiledModel, InferenceEngine, LoadedModel, ModelMetadata, RawPrediction};
pub use config::{BackupExclusionConfig, PreprocessConfig, RecognizerConfig, ResultOrder, ScaleMode};
pub use model_fetcher::{Credentials, ModelFetcher, RemoteClassifier};
pub use model_store::{BackupExclusion, ModelStore, NoBackupExclusion, XattrExclusion};
pub use pipeline::{ClassificationEngine, EngineOptions};
pub use recognizer::{LocalRecognizer, RecognizerBuilder};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::{CompiledModel, InferenceEngine, ModelMetadata, RawPrediction};
    pub use crate::config::RecognizerConfig;
    pub use crate::model_fetcher::Credentials;
    pub use crate::recognizer::LocalRecognizer;
    pub use sightline_core::prelude::*;
}
