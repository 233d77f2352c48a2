//! Transform catalog: the static name -> category/schema table.
//!
//! The catalog is the single authority on whether a transform is geometric
//! (applied jointly to image and mask) or pixel (image only). It also carries
//! a declared parameter schema per transform so configurations can be checked
//! before a provider ever builds them.

use crate::core::param::{Constraint, ParameterDefinition};
use crate::core::types::{Category, ParamType, ParamValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// Catalog entry for one named transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformInfo {
    /// Transform name as used in pipeline files.
    pub name: String,
    /// Geometric or pixel.
    pub category: Category,
    /// Short human-readable description.
    pub description: String,
    /// Declared parameters. Parameters not listed here are passed through
    /// to the provider unchecked.
    pub params: Vec<ParameterDefinition>,
    /// Output value range is not suitable for direct 8-bit persistence.
    pub normalizes_values: bool,
}

impl TransformInfo {
    /// Create an entry with no declared parameters.
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            category,
            description: String::new(),
            params: Vec::new(),
            normalizes_values: false,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a parameter.
    pub fn with_param(mut self, param: ParameterDefinition) -> Self {
        self.params.push(param);
        self
    }

    /// Declare the standard `p` parameter with the usual default of 0.5.
    pub fn with_probability(self) -> Self {
        self.with_param(ParameterDefinition::probability(0.5))
    }

    /// Mark this transform as producing values outside the 8-bit range.
    pub fn normalizing(mut self) -> Self {
        self.normalizes_values = true;
        self
    }

    /// Look up a declared parameter.
    pub fn param(&self, name: &str) -> Option<&ParameterDefinition> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Registry of every known transform name.
#[derive(Debug, Clone, Default)]
pub struct TransformCatalog {
    /// Entries indexed by name.
    transforms: IndexMap<String, TransformInfo>,
    /// Names grouped by category.
    categories: IndexMap<Category, Vec<String>>,
}

impl TransformCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            transforms: IndexMap::new(),
            categories: IndexMap::new(),
        }
    }

    /// Create a catalog holding the standard transform set.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        register_standard(&mut catalog);
        catalog
    }

    /// Shared instance of the standard catalog.
    pub fn standard() -> Arc<TransformCatalog> {
        static STANDARD: OnceLock<Arc<TransformCatalog>> = OnceLock::new();
        STANDARD
            .get_or_init(|| Arc::new(TransformCatalog::with_builtins()))
            .clone()
    }

    /// Register (or replace) an entry.
    pub fn register(&mut self, info: TransformInfo) {
        if let Some(previous) = self.transforms.get(&info.name) {
            let previous_category = previous.category;
            if let Some(names) = self.categories.get_mut(&previous_category) {
                names.retain(|n| n != &info.name);
            }
        }

        self.categories
            .entry(info.category)
            .or_default()
            .push(info.name.clone());
        self.transforms.insert(info.name.clone(), info);
    }

    /// Check if a transform name is known.
    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Get the entry for a transform.
    pub fn info(&self, name: &str) -> Option<&TransformInfo> {
        self.transforms.get(name)
    }

    /// Category of a transform, if known.
    pub fn category_of(&self, name: &str) -> Option<Category> {
        self.transforms.get(name).map(|i| i.category)
    }

    /// Check if a transform is geometric. Unknown names are not.
    pub fn is_geometric(&self, name: &str) -> bool {
        self.category_of(name) == Some(Category::Geometric)
    }

    /// Declared parameter schema of a transform (empty when unknown).
    pub fn param_schema(&self, name: &str) -> &[ParameterDefinition] {
        self.transforms
            .get(name)
            .map(|i| i.params.as_slice())
            .unwrap_or(&[])
    }

    /// All transform names, sorted.
    pub fn list_all(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transforms.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Geometric transform names, sorted.
    pub fn list_geometric(&self) -> Vec<&str> {
        self.by_category(Category::Geometric)
    }

    /// Pixel transform names, sorted.
    pub fn list_pixel(&self) -> Vec<&str> {
        self.by_category(Category::Pixel)
    }

    /// Transform names in one category, sorted.
    pub fn by_category(&self, category: Category) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .categories
            .get(&category)
            .map(|names| names.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Case-insensitive substring search over names, sorted.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let query = query.to_lowercase();
        self.list_all()
            .into_iter()
            .filter(|name| name.to_lowercase().contains(&query))
            .collect()
    }

    /// Number of known transforms.
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Check if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

/// Builder for catalogs extended beyond the standard set.
pub struct CatalogBuilder {
    catalog: TransformCatalog,
    include_standard: bool,
}

impl CatalogBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            catalog: TransformCatalog::new(),
            include_standard: true,
        }
    }

    /// Include or exclude the standard transform set.
    pub fn with_standard(mut self, include: bool) -> Self {
        self.include_standard = include;
        self
    }

    /// Whitelist a transform name outside the standard set as pixel-only.
    pub fn allow_pixel_safe(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.catalog.register(
            TransformInfo::new(name, Category::Pixel)
                .with_description("Explicitly allowed pixel-level transform"),
        );
        self
    }

    /// Register a fully described transform.
    pub fn with_transform(mut self, info: TransformInfo) -> Self {
        self.catalog.register(info);
        self
    }

    /// Build the catalog. Explicit entries win over standard ones.
    pub fn build(self) -> TransformCatalog {
        if !self.include_standard {
            return self.catalog;
        }

        let mut catalog = TransformCatalog::with_builtins();
        for info in self.catalog.transforms.into_values() {
            catalog.register(info);
        }
        catalog
    }
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Standard transform set
// ============================================================================

fn float(name: &str, default: f64, min: f64, max: f64) -> ParameterDefinition {
    ParameterDefinition::new(name, ParamType::Float, ParamValue::Float(default)).with_range(min, max)
}

fn int(name: &str, default: i64, min: f64, max: f64) -> ParameterDefinition {
    ParameterDefinition::new(name, ParamType::Int, ParamValue::Int(default)).with_range(min, max)
}

/// A `[min, max]` parameter that also accepts a scalar.
fn range(name: &str, default: ParamValue, min: f64, max: f64) -> ParameterDefinition {
    ParameterDefinition::new(name, ParamType::Range, default).with_range(min, max)
}

fn geometric(name: &str, description: &str) -> TransformInfo {
    TransformInfo::new(name, Category::Geometric)
        .with_description(description)
        .with_probability()
}

fn pixel(name: &str, description: &str) -> TransformInfo {
    TransformInfo::new(name, Category::Pixel)
        .with_description(description)
        .with_probability()
}

fn register_standard(catalog: &mut TransformCatalog) {
    let geometric_set = [
        geometric("OpticalDistortion", "Applies barrel or pincushion distortion to simulate lens effects")
            .with_param(range("distort_limit", ParamValue::Float(0.05), -2.0, 2.0))
            .with_param(range("shift_limit", ParamValue::Float(0.05), 0.0, 1.0)),
        geometric("GridDistortion", "Applies grid-based distortion")
            .with_param(int("num_steps", 5, 1.0, 20.0))
            .with_param(range("distort_limit", ParamValue::Float(0.3), -1.0, 1.0)),
        geometric("ElasticTransform", "Applies elastic deformation")
            .with_param(float("alpha", 1.0, 0.0, 300.0))
            .with_param(float("sigma", 50.0, 0.0, 100.0)),
        geometric("Perspective", "Apply random perspective transformation")
            .with_param(range("scale", ParamValue::range(0.05, 0.1), 0.0, 0.3)),
        geometric("Affine", "Affine transformation: translation, rotation, shear and scale"),
        geometric("ShiftScaleRotate", "Randomly apply affine transforms")
            .with_param(range("shift_limit", ParamValue::Float(0.0625), -1.0, 1.0))
            .with_param(range("scale_limit", ParamValue::Float(0.1), -1.0, 2.0))
            .with_param(range("rotate_limit", ParamValue::Int(45), -180.0, 180.0)),
        geometric("Rotate", "Rotate image by angle")
            .with_param(range("limit", ParamValue::Int(90), -180.0, 180.0)),
        geometric("HorizontalFlip", "Flip image horizontally"),
        geometric("VerticalFlip", "Flip image vertically"),
        geometric("Transpose", "Swap rows and columns"),
        geometric("RandomRotate90", "Rotate by a random multiple of 90 degrees"),
        geometric("Resize", "Resize to a fixed height and width")
            .with_param(int("height", 256, 1.0, 16384.0))
            .with_param(int("width", 256, 1.0, 16384.0)),
        geometric("RandomCrop", "Crop a random region of fixed size")
            .with_param(int("height", 256, 1.0, 16384.0))
            .with_param(int("width", 256, 1.0, 16384.0)),
        geometric("CenterCrop", "Crop the central region of fixed size")
            .with_param(int("height", 256, 1.0, 16384.0))
            .with_param(int("width", 256, 1.0, 16384.0)),
        geometric("Crop", "Crop a fixed region"),
        geometric("PadIfNeeded", "Pad to a minimum size"),
        geometric("RandomResizedCrop", "Crop a random region and resize it"),
        geometric("RandomSizedCrop", "Crop a random-sized region and resize it"),
        geometric("LongestMaxSize", "Rescale so the longest side matches a size"),
        geometric("SmallestMaxSize", "Rescale so the shortest side matches a size"),
        geometric("PiecewiseAffine", "Apply local affine transformations on a grid"),
    ];

    let pixel_set = [
        pixel("GaussNoise", "Add Gaussian noise to image")
            .with_param(range("var_limit", ParamValue::range(10.0, 50.0), 0.0, 200.0))
            .with_param(float("mean", 0.0, -100.0, 100.0)),
        pixel("GaussianBlur", "Apply Gaussian blur")
            .with_param(range("blur_limit", ParamValue::int_range(3, 7), 0.0, 31.0)),
        pixel("MotionBlur", "Apply motion blur")
            .with_param(range("blur_limit", ParamValue::Int(7), 3.0, 31.0)),
        pixel("MedianBlur", "Apply median blur")
            .with_param(range("blur_limit", ParamValue::Int(7), 3.0, 31.0)),
        pixel("Sharpen", "Sharpen the image")
            .with_param(range("alpha", ParamValue::range(0.2, 0.5), 0.0, 1.0))
            .with_param(range("lightness", ParamValue::range(0.5, 1.0), 0.0, 2.0)),
        pixel("RandomBrightnessContrast", "Randomly adjust brightness and contrast")
            .with_param(range("brightness_limit", ParamValue::Float(0.2), -1.0, 1.0))
            .with_param(range("contrast_limit", ParamValue::Float(0.2), -1.0, 1.0)),
        pixel("HueSaturationValue", "Randomly change hue, saturation, and value")
            .with_param(range("hue_shift_limit", ParamValue::Int(20), -180.0, 180.0))
            .with_param(range("sat_shift_limit", ParamValue::Int(30), -100.0, 100.0))
            .with_param(range("val_shift_limit", ParamValue::Int(20), -100.0, 100.0)),
        pixel("RGBShift", "Randomly shift each RGB channel"),
        pixel("ChannelShuffle", "Randomly rearrange the RGB channels"),
        pixel("CLAHE", "Apply Contrast Limited Adaptive Histogram Equalization")
            .with_param(range("clip_limit", ParamValue::Float(4.0), 1.0, 20.0)),
        pixel("Equalize", "Equalize the image histogram"),
        pixel("ColorJitter", "Randomly adjust brightness, contrast, saturation, and hue")
            .with_param(range("brightness", ParamValue::Float(0.2), 0.0, 1.0))
            .with_param(range("contrast", ParamValue::Float(0.2), 0.0, 1.0))
            .with_param(range("saturation", ParamValue::Float(0.2), 0.0, 1.0))
            .with_param(range("hue", ParamValue::Float(0.2), -0.5, 0.5)),
        pixel("ToGray", "Convert the image to grayscale"),
        pixel("Blur", "Blur with a random-sized box kernel"),
        pixel("Defocus", "Simulate an out-of-focus lens"),
        pixel("Emboss", "Emboss the image and overlay the result"),
        pixel("FancyPCA", "PCA-based color augmentation"),
        pixel("GlassBlur", "Apply glass noise"),
        pixel("ISONoise", "Apply camera sensor noise"),
        pixel("ImageCompression", "Degrade quality by lossy re-compression"),
        pixel("InvertImg", "Invert pixel values"),
        pixel("MultiplicativeNoise", "Multiply pixels by random noise"),
        pixel("Normalize", "Normalize values by mean and standard deviation")
            .with_param(
                ParameterDefinition::new(
                    "mean",
                    ParamType::List,
                    ParamValue::List(vec![ParamValue::Float(0.485), ParamValue::Float(0.456), ParamValue::Float(0.406)]),
                )
                .with_constraint(Constraint::Length(3)),
            )
            .with_param(
                ParameterDefinition::new(
                    "std",
                    ParamType::List,
                    ParamValue::List(vec![ParamValue::Float(0.229), ParamValue::Float(0.224), ParamValue::Float(0.225)]),
                )
                .with_constraint(Constraint::Length(3))
                .with_constraint(Constraint::Positive),
            )
            .with_param(
                float("max_pixel_value", 255.0, 0.0, f64::MAX).with_constraint(Constraint::Positive),
            )
            .normalizing(),
        pixel("Posterize", "Reduce the number of bits per channel")
            .with_param(range("num_bits", ParamValue::Int(4), 0.0, 8.0)),
        pixel("RingingOvershoot", "Create ringing or overshoot artefacts"),
        pixel("Solarize", "Invert all pixel values above a threshold")
            .with_param(range("threshold", ParamValue::Int(128), 0.0, 255.0)),
        pixel("Superpixels", "Replace regions by their superpixel average"),
        pixel("ToSepia", "Apply a sepia filter"),
    ];

    for info in geometric_set.into_iter().chain(pixel_set) {
        catalog.register(info);
    }
}
