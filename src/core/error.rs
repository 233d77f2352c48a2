//! Error types for augforge.
//!
//! Uses thiserror for structured errors with context. Errors are split along
//! the failure policy of a run:
//! - configuration errors are fatal and surface before any pair is processed
//! - pair errors are captured per pair and recorded in the manifest
//! - mask load failures only degrade a pair to image-only

use crate::core::types::TransformId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for augforge.
#[derive(Error, Debug)]
pub enum AugmentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] toml::de::Error),

    #[error("Execution error: {0}")]
    Execution(String),
}

/// Fatal configuration errors. A run that hits one never processes a pair.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("Transform '{0}' is not in the transform catalog")]
    UnknownTransform(String),

    #[error("Transform '{0}' is not supported by the capability provider")]
    UnsupportedTransform(String),

    #[error("Transform '{transform}' configuration is incompatible with the provider: {cause} (params: {params})")]
    IncompatibleTransform {
        transform: String,
        params: String,
        cause: String,
    },

    #[error("Duplicate transform id '{0}'")]
    DuplicateId(String),

    #[error("Malformed pipeline: {0}")]
    Malformed(String),

    #[error("Number of variants must be positive, got {0}")]
    InvalidVariantCount(u32),

    #[error("Input directory does not exist: {0}")]
    MissingInputDirectory(String),
}

/// Rejections reported by a capability provider when building a transform.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("unknown transform '{0}'")]
    UnknownTransform(String),

    #[error("unexpected parameter '{name}'")]
    UnknownParameter { name: String },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// Failure while applying a built transform to a sample.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("{transform} failed: {reason}")]
    Failed { transform: String, reason: String },
}

/// Failure of the image codec.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Failure while loading a mask. Never fatal to a pair.
#[derive(Error, Debug)]
pub enum MaskError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid .npy file: {0}")]
    Npy(String),

    #[error("unsupported mask shape {0:?}")]
    UnsupportedShape(Vec<usize>),
}

/// Errors from scanning directories and checking image/mask agreement.
#[derive(Error, Debug)]
pub enum PairingError {
    #[error("Failed to read directory {path}: {source}")]
    UnreadableDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dimension mismatch: image {image_height}x{image_width} vs mask {mask_height}x{mask_width}")]
    DimensionMismatch {
        image_height: u32,
        image_width: u32,
        mask_height: u32,
        mask_width: u32,
    },
}

/// Failure of one pair. Captured in the manifest; never crosses the pair
/// boundary.
#[derive(Error, Debug)]
pub enum PairError {
    #[error("{0}")]
    Decode(CodecError),

    #[error("{0}")]
    Transform(#[from] TransformError),

    #[error("{0}")]
    Encode(CodecError),
}

// ============================================================================
// Validation Report
// ============================================================================

/// Problems found by `PipelineConfig::validate`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Pipeline must have at least one transform")]
    EmptyPipeline,

    #[error("Transform '{transform}' ({id}) is not available from the capability provider")]
    UnknownToProvider { id: TransformId, transform: String },

    #[error("Transform '{transform}' ({id}) has invalid parameters: {error}")]
    InvalidParameter {
        id: TransformId,
        transform: String,
        error: String,
    },

    #[error("Transform '{transform}' ({id}) initialization failed: {error}")]
    InstantiationFailed {
        id: TransformId,
        transform: String,
        error: String,
    },
}

impl ValidationError {
    /// Get suggestion for fixing this error.
    pub fn suggested_fix(&self) -> Option<String> {
        match self {
            ValidationError::EmptyPipeline => Some("Add at least one transform".to_string()),
            ValidationError::UnknownToProvider { transform, .. } => Some(format!(
                "Remove '{}' or use a provider that supports it",
                transform
            )),
            ValidationError::InvalidParameter { .. } => {
                Some("Check the parameter against `augforge info <transform>`".to_string())
            }
            ValidationError::InstantiationFailed { .. } => None,
        }
    }

    /// Get the transform this error refers to, if any.
    pub fn transform_id(&self) -> Option<&TransformId> {
        match self {
            ValidationError::EmptyPipeline => None,
            ValidationError::UnknownToProvider { id, .. }
            | ValidationError::InvalidParameter { id, .. }
            | ValidationError::InstantiationFailed { id, .. } => Some(id),
        }
    }
}

/// Non-fatal validation warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    /// Warning message.
    pub message: String,
    /// Transform that triggered the warning, if applicable.
    pub transform_id: Option<TransformId>,
    /// Suggestion for addressing the warning.
    pub suggestion: Option<String>,
}

/// Result of validating a pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether validation passed without errors.
    pub success: bool,
    /// List of errors found.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<ValidationWarning>,
    /// Time taken for validation in milliseconds.
    pub duration_ms: u64,
}

impl ValidationReport {
    /// Create a new empty report (success).
    pub fn new() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Add an error to the report.
    pub fn add_error(&mut self, error: ValidationError) {
        self.success = false;
        self.errors.push(error);
    }

    /// Add a warning to the report.
    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Check if the pipeline can be run.
    pub fn can_execute(&self) -> bool {
        self.success
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        if self.success {
            if self.warnings.is_empty() {
                "✓ Pipeline is valid".to_string()
            } else {
                format!("✓ Pipeline is valid with {} warning(s)", self.warnings.len())
            }
        } else {
            format!("✗ Validation failed with {} error(s)", self.errors.len())
        }
    }

    /// Get detailed error messages with suggestions.
    pub fn detailed_errors(&self) -> Vec<String> {
        self.errors
            .iter()
            .enumerate()
            .map(|(i, error)| {
                let mut msg = format!("{}. {}", i + 1, error);
                if let Some(fix) = error.suggested_fix() {
                    msg.push_str(&format!("\n   → Suggestion: {}", fix));
                }
                msg
            })
            .collect()
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Result type alias for augforge operations.
pub type AugmentResult<T> = Result<T, AugmentError>;
