//! Error types for Sightline

/// Result type alias using Sightline's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Sightline operations
///
/// Errors fall into two groups. Per-classifier conditions (`ModelNotFound`,
/// `ModelLoadFailed`, `InferenceFailed`) are swallowed by the fan-out engine and
/// only degrade a classification result. Everything else is terminal for the
/// call that produced it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input image could not be decoded into pixels
    #[error("image decode error: {0}")]
    ImageDecode(String),

    /// No installed model for the classifier
    #[error("no local model installed for classifier '{0}'")]
    ModelNotFound(String),

    /// Installed artifact exists but could not be loaded
    #[error("failed to load model for classifier '{classifier_id}': {reason}")]
    ModelLoadFailed {
        classifier_id: String,
        reason: String,
    },

    /// Model loaded but inference failed
    #[error("inference failed for classifier '{classifier_id}': {reason}")]
    InferenceFailed {
        classifier_id: String,
        reason: String,
    },

    /// No response from the remote service
    #[error("transport error: {0}")]
    Transport(String),

    /// Remote service answered with a non-success status
    #[error("remote service returned status {status} for classifier '{classifier_id}'")]
    Remote { classifier_id: String, status: u16 },

    /// Downloaded artifact could not be compiled
    #[error("compile error: {0}")]
    Compile(String),

    /// Compiled artifact could not be moved into the final location
    #[error("install error: {0}")]
    Install(String),

    /// Backup-exclusion flag could not be set
    #[error("backup exclusion failed: {0}")]
    BackupExclusion(String),

    /// None of the requested classifiers resolved to a local model
    #[error("no requested classifier is available locally")]
    NoClassifiersAvailable,

    /// Classifier identifier cannot be mapped onto the models directory
    #[error("invalid classifier id: {0:?}")]
    InvalidClassifierId(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new image decode error
    pub fn image_decode(msg: impl Into<String>) -> Self {
        Self::ImageDecode(msg.into())
    }

    /// Create a new model load error
    pub fn model_load(classifier_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelLoadFailed {
            classifier_id: classifier_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new inference error
    pub fn inference(classifier_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InferenceFailed {
            classifier_id: classifier_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new compile error
    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }

    /// Create a new install error
    pub fn install(msg: impl Into<String>) -> Self {
        Self::Install(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
