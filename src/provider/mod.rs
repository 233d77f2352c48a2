//! Capability provider seam.
//!
//! A provider turns a transform name plus a parameter mapping into a callable
//! [`Transform`]. Configurations only ever talk to providers through the
//! [`CapabilityProvider`] trait; the built-in provider implements a subset of
//! the catalog on top of `image` and `imageproc`.

pub mod builtin;

use crate::core::error::{ProviderError, TransformError};
use crate::core::types::{Category, Params};
use image::{GrayImage, RgbImage};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use std::sync::Arc;

/// One image and, optionally, its mask travelling through a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image: RgbImage,
    pub mask: Option<GrayImage>,
}

impl Sample {
    /// Create a sample.
    pub fn new(image: RgbImage, mask: Option<GrayImage>) -> Self {
        Self { image, mask }
    }

    /// Create a sample without a mask.
    pub fn image_only(image: RgbImage) -> Self {
        Self { image, mask: None }
    }

    /// Image dimensions as (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// A built transform, ready to apply.
///
/// Implementations draw every random choice from the supplied generator so
/// that the same seed always reproduces the same output. Geometric
/// transforms must apply the same spatial change to the image and the mask.
pub trait Transform: Send + Sync {
    /// Transform name as listed in the catalog.
    fn name(&self) -> &str;

    /// Apply to a sample.
    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError>;
}

/// An ordered composition of transforms sharing one category.
pub struct Pipeline {
    category: Category,
    transforms: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new(category: Category) -> Self {
        Self {
            category,
            transforms: Vec::new(),
        }
    }

    /// Append a transform.
    pub fn push(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    /// Category of every transform in this pipeline.
    pub fn category(&self) -> Category {
        self.category
    }

    /// Names of the composed transforms, in order.
    pub fn names(&self) -> Vec<&str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Apply every transform in order.
    ///
    /// A geometric pipeline transforms image and mask jointly and fails if
    /// they come out with different extents. A pixel pipeline never sees the
    /// mask; it is detached before the first transform and reattached as-is.
    pub fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        match self.category {
            Category::Geometric => {
                let mut sample = sample;
                for transform in &self.transforms {
                    sample = transform.apply(sample, rng)?;
                }

                if let Some(mask) = &sample.mask {
                    if mask.dimensions() != sample.image.dimensions() {
                        return Err(TransformError::Failed {
                            transform: self.names().join(" -> "),
                            reason: format!(
                                "image {:?} and mask {:?} diverged",
                                sample.image.dimensions(),
                                mask.dimensions()
                            ),
                        });
                    }
                }

                Ok(sample)
            }
            Category::Pixel => {
                let Sample { mut image, mask } = sample;
                for transform in &self.transforms {
                    image = transform.apply(Sample::image_only(image), rng)?.image;
                }
                Ok(Sample { image, mask })
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("category", &self.category)
            .field("transforms", &self.names())
            .finish()
    }
}

/// Supplies concrete transform implementations by name.
pub trait CapabilityProvider: Send + Sync {
    /// Provider name for logs and reports.
    fn name(&self) -> &str;

    /// Check if the provider can build this transform.
    fn supports(&self, transform: &str) -> bool;

    /// Every transform name this provider can build.
    fn supported(&self) -> Vec<&str>;

    /// Build a transform from its stored parameters.
    fn instantiate(&self, transform: &str, params: &Params)
        -> Result<Box<dyn Transform>, ProviderError>;
}

/// Factory function building one transform kind from parameters.
pub type TransformFactory =
    Arc<dyn Fn(&Params) -> Result<Box<dyn Transform>, ProviderError> + Send + Sync>;

/// Provider backed by a name -> factory table.
#[derive(Clone)]
pub struct ProviderRegistry {
    name: String,
    factories: IndexMap<String, TransformFactory>,
}

impl ProviderRegistry {
    /// Create an empty provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factories: IndexMap::new(),
        }
    }

    /// Create the built-in provider.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new("builtin");
        builtin::register_all(&mut registry);
        registry
    }

    /// Register a factory under a transform name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Params) -> Result<Box<dyn Transform>, ProviderError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Unregister a transform.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.factories.shift_remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CapabilityProvider for ProviderRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, transform: &str) -> bool {
        self.factories.contains_key(transform)
    }

    fn supported(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    fn instantiate(
        &self,
        transform: &str,
        params: &Params,
    ) -> Result<Box<dyn Transform>, ProviderError> {
        let factory = self
            .factories
            .get(transform)
            .ok_or_else(|| ProviderError::UnknownTransform(transform.to_string()))?;
        factory(params)
    }
}
