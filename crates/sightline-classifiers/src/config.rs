//! Configuration for local classification and model management

use serde::{Deserialize, Serialize};
use sightline_core::{Error, Result, DEFAULT_CONFIDENCE_FLOOR};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the local recognizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// Root directory holding installed (compiled) models
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// Scratch directory for in-flight downloads and compilations
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Base URL of the remote classification service
    #[serde(default = "default_service_url")]
    pub service_url: String,

    /// Optional API version date sent as the `version` query parameter
    #[serde(default)]
    pub api_version: Option<String>,

    /// Header carrying the API key
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// HTTP request timeout for model downloads
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// File extension of compiled models
    #[serde(default = "default_compiled_extension")]
    pub compiled_extension: String,

    /// File extension of downloaded (raw) models
    #[serde(default = "default_raw_extension")]
    pub raw_extension: String,

    /// Scores must be strictly greater than this to be reported
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    /// Drop repeated classifier ids in a request (first occurrence wins)
    #[serde(default = "default_true")]
    pub dedup_classifiers: bool,

    /// Ordering of classifier results in the merged response
    #[serde(default)]
    pub result_order: ResultOrder,

    /// Fail with `NoClassifiersAvailable` instead of returning an empty result
    #[serde(default)]
    pub require_any_classifier: bool,

    /// Add a warning to the response for every skipped classifier
    #[serde(default)]
    pub report_skipped: bool,

    /// Per-classifier inference timeout in milliseconds
    #[serde(default)]
    pub inference_timeout_ms: Option<u64>,

    /// Image preprocessing
    #[serde(default)]
    pub preprocessing: PreprocessConfig,

    /// Backup exclusion of installed models
    #[serde(default)]
    pub backup_exclusion: BackupExclusionConfig,
}

/// How an image is scaled to a model's input size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    /// Stretch to the exact input size, ignoring aspect ratio
    #[default]
    Fill,
    /// Scale to fit inside the input size and pad the remainder
    Fit,
    /// Scale to cover the input size and crop the overflow around the center
    CenterCrop,
}

/// Ordering of classifier results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrder {
    /// Same order as the requested classifier ids
    #[default]
    Request,
    /// Order in which inference tasks finished
    Completion,
}

/// Preprocessing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default)]
    pub scale_mode: ScaleMode,

    /// Input width used when a model does not declare one
    #[serde(default = "default_input_side")]
    pub input_width: u32,

    /// Input height used when a model does not declare one
    #[serde(default = "default_input_side")]
    pub input_height: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            scale_mode: ScaleMode::Fill,
            input_width: default_input_side(),
            input_height: default_input_side(),
        }
    }
}

/// Backup exclusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupExclusionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Extended attribute name set on installed models
    #[serde(default = "default_exclusion_attribute")]
    pub attribute: String,

    /// Extended attribute value
    #[serde(default = "default_exclusion_value")]
    pub value: String,
}

impl Default for BackupExclusionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attribute: default_exclusion_attribute(),
            value: default_exclusion_value(),
        }
    }
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            scratch_dir: default_scratch_dir(),
            service_url: default_service_url(),
            api_version: None,
            api_key_header: default_api_key_header(),
            request_timeout_secs: default_request_timeout_secs(),
            compiled_extension: default_compiled_extension(),
            raw_extension: default_raw_extension(),
            confidence_floor: default_confidence_floor(),
            dedup_classifiers: true,
            result_order: ResultOrder::Request,
            require_any_classifier: false,
            report_skipped: false,
            inference_timeout_ms: None,
            preprocessing: PreprocessConfig::default(),
            backup_exclusion: BackupExclusionConfig::default(),
        }
    }
}

impl RecognizerConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid recognizer config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        validate_confidence_floor(self.confidence_floor)?;

        if self.compiled_extension.is_empty() || self.raw_extension.is_empty() {
            return Err(Error::config("model file extensions must not be empty"));
        }
        if self.compiled_extension == self.raw_extension {
            return Err(Error::config(
                "compiled and raw model extensions must differ",
            ));
        }
        if self.preprocessing.input_width == 0 || self.preprocessing.input_height == 0 {
            return Err(Error::config("preprocessing input size must be non-zero"));
        }
        if self.api_key_header.trim().is_empty() {
            return Err(Error::config("api_key_header must not be empty"));
        }

        Ok(())
    }

    /// Inference timeout as a duration
    pub fn inference_timeout(&self) -> Option<Duration> {
        self.inference_timeout_ms.map(Duration::from_millis)
    }

    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// A confidence floor must be a number
///
/// Any other value is usable: a floor at or above 1 filters every class and a
/// negative floor keeps every in-range score.
pub fn validate_confidence_floor(floor: f64) -> Result<()> {
    if floor.is_nan() {
        Err(Error::config("confidence floor must be a number, got NaN"))
    } else {
        Ok(())
    }
}

fn default_models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sightline")
        .join("models")
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("sightline")
}

fn default_service_url() -> String {
    "http://localhost:8080/api/v3".to_string()
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_compiled_extension() -> String {
    "mlmodelc".to_string()
}

fn default_raw_extension() -> String {
    "mlmodel".to_string()
}

fn default_confidence_floor() -> f64 {
    DEFAULT_CONFIDENCE_FLOOR
}

fn default_input_side() -> u32 {
    224
}

fn default_exclusion_attribute() -> String {
    if cfg!(target_os = "macos") {
        "com.apple.metadata:com_apple_backup_excludeItem".to_string()
    } else {
        "user.sightline.exclude_from_backup".to_string()
    }
}

fn default_exclusion_value() -> String {
    "com.apple.backupd".to_string()
}

fn default_true() -> bool {
    true
}
