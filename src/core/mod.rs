//! Core types shared across augforge.
//!
//! This module contains:
//! - Parameter values and transform categories
//! - Parameter schemas and constraints
//! - Error types and the validation report

pub mod error;
pub mod param;
pub mod types;

// Re-export commonly used types
pub use error::{
    AugmentError, ConfigError, PairError, ProviderError, TransformError, ValidationError,
    ValidationReport, ValidationWarning,
};
pub use param::{Constraint, ParameterDefinition};
pub use types::{Category, ImageMaskPair, ParamType, ParamValue, Params, TransformId};
