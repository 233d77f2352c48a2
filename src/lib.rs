//! # Augforge - Reproducible image/mask augmentation
//!
//! Augforge generates augmented variants of a directory of images, optionally
//! paired with segmentation masks, from an ordered and editable pipeline of
//! transforms.
//!
//! ## Features
//!
//! - **Editable pipelines**: add, remove, reorder and re-parameterise transforms
//! - **Joint geometry**: geometric transforms move image and mask together
//! - **Deterministic variants**: variant `i` is seeded with `seed + i`
//! - **Mask resolution**: `<stem>`, `<stem>_mask` and `<stem>_gt` lookups, `.npy` layers
//! - **Auditable runs**: live `progress.json`, terminal `manifest.json`, cooperative cancellation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use augforge::prelude::*;
//!
//! let mut config = PipelineConfig::new().named("flips and blur");
//! config.add("HorizontalFlip", Params::new())?;
//! config.add("GaussianBlur", Params::new())?;
//!
//! let provider = ProviderRegistry::with_builtins();
//! let report = config.validate(&provider);
//! assert!(report.can_execute());
//!
//! let request = RunRequest::new("data/images", "outputs")
//!     .with_masks("data/masks")
//!     .with_variants(5)
//!     .with_seed(42);
//! let outcome = BatchExecutor::new(config).run(&request)?;
//! println!("{} outputs", outcome.manifest.statistics.total_outputs);
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: parameter values, schemas and error types
//! - [`catalog`]: the named transform catalog and categories
//! - [`provider`]: the capability provider seam and the built-in transforms
//! - [`config`]: pipeline configuration, interchange formats and run settings
//! - [`pairing`]: image discovery, mask resolution and mask loading
//! - [`codec`]: image decoding and encoding
//! - [`execution`]: the batch executor, progress and manifests

#![warn(clippy::all)]

pub mod catalog;
pub mod codec;
pub mod config;
pub mod core;
pub mod execution;
pub mod pairing;
pub mod provider;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use augforge::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::types::{Category, ImageMaskPair, ParamType, ParamValue, Params, TransformId};
    pub use crate::core::param::{Constraint, ParameterDefinition};

    // Errors
    pub use crate::core::error::{
        AugmentError, ConfigError, PairError, ProviderError, TransformError, ValidationError,
        ValidationReport, ValidationWarning,
    };

    // Catalog
    pub use crate::catalog::{CatalogBuilder, TransformCatalog, TransformInfo};

    // Providers
    pub use crate::provider::{CapabilityProvider, Pipeline, ProviderRegistry, Sample, Transform};

    // Configuration
    pub use crate::config::{BuiltPipelines, PipelineConfig, RunSettings, SettingsOverrides};

    // Pairing
    pub use crate::pairing::{load_mask, scan_pairs, validate_dimensions};

    // Codec
    pub use crate::codec::{ImageCodec, ImageCrateCodec};

    // Execution
    pub use crate::execution::{
        BatchExecutor, CancellationToken, ExecutorOptions, Progress, ProgressUpdate, RunManifest,
        RunOutcome, RunRequest, RunState,
    };
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
        assert_eq!(super::NAME, "augforge");
    }

    #[test]
    fn test_prelude_covers_authoring_flow() {
        let mut config = PipelineConfig::new();
        let id = config.add("VerticalFlip", Params::new()).unwrap();
        assert_eq!(config.get(&id).map(|t| t.category()), Some(Category::Geometric));

        let report = config.validate(&ProviderRegistry::with_builtins());
        assert!(report.can_execute());
    }
}
