//! Sightline Core
//!
//! Core types and error handling shared across Sightline components.
//!
//! This crate provides:
//! - The error taxonomy used by classification and model management
//! - The response envelope shared by local and remote classification

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    ClassificationRecord, ClassifiedImage, ClassifiedImages, ClassifierResult,
    MergedClassification, WarningInfo, DEFAULT_CLASSIFIER_ID, DEFAULT_CONFIDENCE_FLOOR,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{
        ClassificationRecord, ClassifiedImages, ClassifierResult, DEFAULT_CLASSIFIER_ID,
    };
}
