//! Pipeline configuration: an ordered, editable list of transform specs.
//!
//! A configuration is authored (add/remove/reorder/edit), validated against a
//! capability provider, and finally built into a geometric and a pixel
//! pipeline. Each spec's category is fixed when it is added and is never
//! recomputed afterwards.

use crate::catalog::TransformCatalog;
use crate::config::native::{NativeDocument, NativeTransform};
use crate::core::error::{
    AugmentError, ConfigError, ProviderError, TransformError, ValidationError, ValidationReport,
    ValidationWarning,
};
use crate::core::types::{Category, Params, TransformId};
use crate::provider::{CapabilityProvider, Pipeline, Sample};
use chrono::Local;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Descriptive metadata of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineMetadata {
    pub name: String,
    pub version: String,
    pub created_at: String,
    pub author: String,
    pub description: String,
}

impl Default for PipelineMetadata {
    fn default() -> Self {
        Self {
            name: "Untitled Pipeline".to_string(),
            version: "1.0".to_string(),
            created_at: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            author: String::new(),
            description: String::new(),
        }
    }
}

/// One transform instance inside a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    id: TransformId,
    #[serde(rename = "type")]
    transform_type: String,
    category: Category,
    #[serde(default)]
    params: Params,
}

impl TransformSpec {
    pub fn id(&self) -> &TransformId {
        &self.id
    }

    /// Catalog name of the transform.
    pub fn transform_type(&self) -> &str {
        &self.transform_type
    }

    /// Category resolved when the spec was created.
    pub fn category(&self) -> Category {
        self.category
    }

    pub fn params(&self) -> &Params {
        &self.params
    }
}

/// How the transforms are composed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeSpec {
    #[serde(rename = "type")]
    pub compose_type: String,
}

impl Default for ComposeSpec {
    fn default() -> Self {
        Self {
            compose_type: "Sequential".to_string(),
        }
    }
}

/// On-disk portable form.
#[derive(Debug, Serialize, Deserialize)]
struct PortableForm {
    #[serde(default)]
    metadata: PipelineMetadata,
    #[serde(default)]
    transforms: Vec<TransformSpec>,
    #[serde(default)]
    compose: ComposeSpec,
}

/// The two composed sub-pipelines of a built configuration.
#[derive(Debug, Default)]
pub struct BuiltPipelines {
    /// Applied jointly to image and mask.
    pub geometric: Option<Pipeline>,
    /// Applied to the image only.
    pub pixel: Option<Pipeline>,
}

impl BuiltPipelines {
    /// Apply the geometric pipeline, then the pixel pipeline.
    pub fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        let sample = match &self.geometric {
            Some(pipeline) => pipeline.apply(sample, rng)?,
            None => sample,
        };
        match &self.pixel {
            Some(pipeline) => pipeline.apply(sample, rng),
            None => Ok(sample),
        }
    }

    /// Total number of built transforms.
    pub fn len(&self) -> usize {
        self.geometric.as_ref().map_or(0, Pipeline::len) + self.pixel.as_ref().map_or(0, Pipeline::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An ordered, editable transform pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub metadata: PipelineMetadata,
    transforms: Vec<TransformSpec>,
    pub compose: ComposeSpec,
    catalog: Arc<TransformCatalog>,
}

impl PipelineConfig {
    /// Create an empty pipeline over the standard catalog.
    pub fn new() -> Self {
        Self::with_catalog(TransformCatalog::standard())
    }

    /// Create an empty pipeline over a custom catalog.
    pub fn with_catalog(catalog: Arc<TransformCatalog>) -> Self {
        Self {
            metadata: PipelineMetadata::default(),
            transforms: Vec::new(),
            compose: ComposeSpec::default(),
            catalog,
        }
    }

    /// Set the pipeline name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Catalog used to classify added transforms.
    pub fn catalog(&self) -> &TransformCatalog {
        &self.catalog
    }

    pub fn transforms(&self) -> &[TransformSpec] {
        &self.transforms
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Look up a transform by id.
    pub fn get(&self, id: &TransformId) -> Option<&TransformSpec> {
        self.transforms.iter().find(|t| &t.id == id)
    }

    /// Ids in pipeline order.
    pub fn ids(&self) -> Vec<TransformId> {
        self.transforms.iter().map(|t| t.id.clone()).collect()
    }

    // ========================================================================
    // Authoring
    // ========================================================================

    /// Append a transform. Its category is looked up in the catalog now and
    /// stored; names the catalog does not know are rejected.
    pub fn add(
        &mut self,
        transform_type: impl Into<String>,
        params: Params,
    ) -> Result<TransformId, ConfigError> {
        let transform_type = transform_type.into();
        let category = self
            .catalog
            .category_of(&transform_type)
            .ok_or_else(|| ConfigError::UnknownTransform(transform_type.clone()))?;

        let mut id = TransformId::new();
        while self.get(&id).is_some() {
            id = TransformId::new();
        }

        log::debug!("Added {} ({}) as {}", transform_type, category, id);
        self.transforms.push(TransformSpec {
            id: id.clone(),
            transform_type,
            category,
            params,
        });
        Ok(id)
    }

    /// Remove a transform. Returns true if it existed.
    pub fn remove(&mut self, id: &TransformId) -> bool {
        let before = self.transforms.len();
        self.transforms.retain(|t| &t.id != id);
        self.transforms.len() < before
    }

    /// Replace the ordering. `order` must name every current id exactly
    /// once; otherwise nothing changes and false is returned.
    pub fn reorder(&mut self, order: &[TransformId]) -> bool {
        if order.len() != self.transforms.len() {
            return false;
        }
        let requested: HashSet<&TransformId> = order.iter().collect();
        if requested.len() != order.len() {
            return false;
        }
        if !self.transforms.iter().all(|t| requested.contains(&t.id)) {
            return false;
        }

        let mut remaining = std::mem::take(&mut self.transforms);
        for id in order {
            if let Some(pos) = remaining.iter().position(|t| &t.id == id) {
                self.transforms.push(remaining.swap_remove(pos));
            }
        }
        true
    }

    /// Mutable access to a transform's parameters. The category is not
    /// affected by edits.
    pub fn params_mut(&mut self, id: &TransformId) -> Option<&mut Params> {
        self.transforms
            .iter_mut()
            .find(|t| &t.id == id)
            .map(|t| &mut t.params)
    }

    /// Check if any transform produces values unsuitable for 8-bit output.
    pub fn has_normalizing_transform(&self) -> bool {
        self.transforms.iter().any(|t| self.is_normalizing(t))
    }

    fn is_normalizing(&self, spec: &TransformSpec) -> bool {
        self.catalog
            .info(&spec.transform_type)
            .map_or(false, |info| info.normalizes_values)
    }

    /// Same transform sequence (type and params), ignoring ids.
    pub fn same_intent(&self, other: &PipelineConfig) -> bool {
        self.transforms.len() == other.transforms.len()
            && self
                .transforms
                .iter()
                .zip(&other.transforms)
                .all(|(a, b)| a.transform_type == b.transform_type && a.params == b.params)
    }

    // ========================================================================
    // Validation and building
    // ========================================================================

    /// Check every transform against the catalog schema and the provider.
    ///
    /// All transforms are checked; problems are collected rather than
    /// returned at the first failure.
    pub fn validate(&self, provider: &dyn CapabilityProvider) -> ValidationReport {
        let start = Instant::now();
        let mut report = ValidationReport::new();

        if self.transforms.is_empty() {
            report.add_error(ValidationError::EmptyPipeline);
        }

        for spec in &self.transforms {
            if self.is_normalizing(spec) {
                report.add_warning(ValidationWarning {
                    message: format!(
                        "Pipeline contains {}, which maps pixel values to roughly [-2, 2] for model input. \
                         Saved 8-bit images will come out nearly black.",
                        spec.transform_type
                    ),
                    transform_id: Some(spec.id.clone()),
                    suggestion: Some(format!(
                        "Remove {} if you want viewable saved images",
                        spec.transform_type
                    )),
                });
            }

            if !provider.supports(&spec.transform_type) {
                report.add_error(ValidationError::UnknownToProvider {
                    id: spec.id.clone(),
                    transform: spec.transform_type.clone(),
                });
                continue;
            }

            if let Err(error) = self.check_schema(spec) {
                report.add_error(ValidationError::InvalidParameter {
                    id: spec.id.clone(),
                    transform: spec.transform_type.clone(),
                    error,
                });
                continue;
            }

            if let Err(e) = provider.instantiate(&spec.transform_type, &spec.params) {
                let id = spec.id.clone();
                let transform = spec.transform_type.clone();
                let error = e.to_string();
                report.add_error(match e {
                    ProviderError::UnknownTransform(_) => ValidationError::InstantiationFailed {
                        id,
                        transform,
                        error,
                    },
                    _ => ValidationError::InvalidParameter {
                        id,
                        transform,
                        error,
                    },
                });
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        report
    }

    /// Check declared parameters against the catalog schema.
    fn check_schema(&self, spec: &TransformSpec) -> Result<(), String> {
        let Some(info) = self.catalog.info(&spec.transform_type) else {
            return Ok(());
        };
        for (name, value) in &spec.params {
            if let Some(def) = info.param(name) {
                def.validate(value)?;
            }
        }
        Ok(())
    }

    /// Build the geometric and pixel pipelines.
    ///
    /// Either pipeline is `None` when no transform of its category is
    /// present. Any transform the provider refuses fails the whole build.
    pub fn build(&self, provider: &dyn CapabilityProvider) -> Result<BuiltPipelines, ConfigError> {
        let mut geometric = Pipeline::new(Category::Geometric);
        let mut pixel = Pipeline::new(Category::Pixel);

        for spec in &self.transforms {
            if let Err(cause) = self.check_schema(spec) {
                let params = serde_json::to_string(&spec.params).unwrap_or_default();
                log::error!(
                    "Transform '{}' has out-of-schema parameters {}: {}",
                    spec.transform_type,
                    params,
                    cause
                );
                return Err(ConfigError::IncompatibleTransform {
                    transform: spec.transform_type.clone(),
                    params,
                    cause,
                });
            }

            let transform = provider
                .instantiate(&spec.transform_type, &spec.params)
                .map_err(|e| {
                    let params = serde_json::to_string(&spec.params).unwrap_or_default();
                    log::error!(
                        "Transform '{}' failed to instantiate with parameters {}: {}",
                        spec.transform_type,
                        params,
                        e
                    );
                    match e {
                        ProviderError::UnknownTransform(name) => {
                            ConfigError::UnsupportedTransform(name)
                        }
                        other => ConfigError::IncompatibleTransform {
                            transform: spec.transform_type.clone(),
                            params,
                            cause: other.to_string(),
                        },
                    }
                })?;

            match spec.category {
                Category::Geometric => geometric.push(transform),
                Category::Pixel => pixel.push(transform),
            }
        }

        log::debug!(
            "Built {} geometric and {} pixel transform(s) with provider '{}'",
            geometric.len(),
            pixel.len(),
            provider.name()
        );

        Ok(BuiltPipelines {
            geometric: (!geometric.is_empty()).then_some(geometric),
            pixel: (!pixel.is_empty()).then_some(pixel),
        })
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Serialize to the portable JSON form.
    pub fn to_portable(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&PortableForm {
            metadata: self.metadata.clone(),
            transforms: self.transforms.clone(),
            compose: self.compose.clone(),
        })
    }

    /// Parse the portable JSON form over the standard catalog.
    pub fn from_portable(json: &str) -> Result<Self, ConfigError> {
        Self::from_portable_with(json, TransformCatalog::standard())
    }

    /// Parse the portable JSON form. Stored categories are kept as written.
    pub fn from_portable_with(json: &str, catalog: Arc<TransformCatalog>) -> Result<Self, ConfigError> {
        let form: PortableForm =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;

        let mut seen = HashSet::new();
        for spec in &form.transforms {
            if !seen.insert(&spec.id) {
                return Err(ConfigError::DuplicateId(spec.id.to_string()));
            }
        }

        Ok(Self {
            metadata: form.metadata,
            transforms: form.transforms,
            compose: form.compose,
            catalog,
        })
    }

    /// Export to the provider's native interchange document.
    pub fn to_native(&self) -> NativeDocument {
        NativeDocument::new(
            self.transforms
                .iter()
                .map(|t| NativeTransform::new(&t.transform_type, t.params.clone()))
                .collect(),
        )
    }

    /// Serialize to native JSON.
    pub fn to_native_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_native())
    }

    /// Import a native document. Categories are re-derived from the catalog.
    pub fn from_native(document: NativeDocument, catalog: Arc<TransformCatalog>) -> Result<Self, ConfigError> {
        let mut config = Self::with_catalog(catalog);
        config.metadata.name = "Imported from Albumentations".to_string();
        config.metadata.version = document.version_string();

        for entry in document.transform.transforms {
            let name = entry.short_name().to_string();
            config.add(name, entry.params)?;
        }
        Ok(config)
    }

    /// Parse either format, detecting native documents by their marker keys.
    pub fn parse(json: &str, catalog: Arc<TransformCatalog>) -> Result<Self, ConfigError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;

        if NativeDocument::is_native(&value) {
            let document: NativeDocument =
                serde_json::from_value(value).map_err(|e| ConfigError::Malformed(e.to_string()))?;
            Self::from_native(document, catalog)
        } else {
            Self::from_portable_with(json, catalog)
        }
    }

    /// Load a pipeline file in either format.
    pub fn load(path: impl AsRef<Path>, catalog: Arc<TransformCatalog>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Malformed(format!("{}: {}", path.display(), e)))?;
        Self::parse(&json, catalog)
    }

    /// Load a pipeline file over the standard catalog.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(path, TransformCatalog::standard())
    }

    /// Save in the portable form.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AugmentError> {
        std::fs::write(path, self.to_portable()?)?;
        Ok(())
    }

    /// Save in the native form.
    pub fn save_native(&self, path: impl AsRef<Path>) -> Result<(), AugmentError> {
        std::fs::write(path, self.to_native_json()?)?;
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}
