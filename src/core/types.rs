//! Core value types shared by the catalog, the pipeline configuration and the
//! batch executor.
//!
//! Transform parameters are a closed tagged union rather than an opaque JSON
//! bag so that a per-transform schema can check them before any provider is
//! asked to build a transform.

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Ordered parameter mapping of one transform instance.
pub type Params = IndexMap<String, ParamValue>;

/// Whether a transform alters spatial layout or only appearance.
///
/// Geometric transforms are applied jointly to image and mask; pixel
/// transforms never see the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Alters spatial layout (rotation, crop, distortion).
    Geometric,
    /// Alters appearance only (blur, color, noise).
    Pixel,
}

impl Category {
    /// Get the display name for this category.
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Geometric => "geometric",
            Category::Pixel => "pixel",
        }
    }

    /// Both categories in display order.
    pub fn all() -> &'static [Category] {
        &[Category::Geometric, Category::Pixel]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "geometric" => Ok(Category::Geometric),
            "pixel" => Ok(Category::Pixel),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// Opaque identifier of a transform inside one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformId(pub String);

impl TransformId {
    /// Create a new random 8-character id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string()[..8].to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransformId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransformId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single transform parameter value.
///
/// A two-element numeric array is read as a `[min, max]` range; any other
/// array is kept as a list. Serialization writes both back as JSON arrays,
/// so imported values round-trip verbatim. Nested mappings are rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Explicit absence (`null`).
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Free-form string.
    Str(String),
    /// Inclusive numeric range `[min, max]`.
    Range(serde_json::Number, serde_json::Number),
    /// Any other list.
    List(Vec<ParamValue>),
}

/// Declared type of a parameter in the catalog schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    Bool,
    String,
    /// A `[min, max]` pair; a scalar is accepted as shorthand.
    Range,
    List,
    Any,
}

impl ParamValue {
    /// Build a range value from two floats.
    pub fn range(min: f64, max: f64) -> Self {
        match (serde_json::Number::from_f64(min), serde_json::Number::from_f64(max)) {
            (Some(a), Some(b)) => ParamValue::Range(a, b),
            _ => ParamValue::Null,
        }
    }

    /// Build a range value from two integers.
    pub fn int_range(min: i64, max: i64) -> Self {
        ParamValue::Range(min.into(), max.into())
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Null => "null",
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Str(_) => "string",
            ParamValue::Range(_, _) => "range",
            ParamValue::List(_) => "list",
        }
    }

    /// Try to get this value as a float. Integers are converted.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(f) => Some(*f),
            ParamValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as an integer. Integral floats are accepted.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        if let ParamValue::Bool(b) = self {
            Some(*b)
        } else {
            None
        }
    }

    /// Try to get this value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        if let ParamValue::Str(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// Try to get this value as a `(min, max)` pair.
    ///
    /// Scalars are returned as-is on both ends; callers that want the
    /// symmetric `(-x, x)` reading use [`ParamValue::as_symmetric_range`].
    pub fn as_range(&self) -> Option<(f64, f64)> {
        match self {
            ParamValue::Range(a, b) => Some((a.as_f64()?, b.as_f64()?)),
            other => other.as_float().map(|v| (v, v)),
        }
    }

    /// Range reading where a scalar `x` means `(-x, x)`.
    pub fn as_symmetric_range(&self) -> Option<(f64, f64)> {
        match self {
            ParamValue::Range(_, _) => self.as_range(),
            other => other.as_float().map(|v| (-v.abs(), v.abs())),
        }
    }

    /// Try to get this value as a list of floats.
    pub fn as_float_list(&self) -> Option<Vec<f64>> {
        match self {
            ParamValue::Range(a, b) => Some(vec![a.as_f64()?, b.as_f64()?]),
            ParamValue::List(items) => items.iter().map(ParamValue::as_float).collect(),
            other => other.as_float().map(|v| vec![v]),
        }
    }

    /// Numeric values contained in this parameter, for range constraints.
    pub fn numeric_values(&self) -> Vec<f64> {
        match self {
            ParamValue::Int(i) => vec![*i as f64],
            ParamValue::Float(f) => vec![*f],
            ParamValue::Range(a, b) => [a.as_f64(), b.as_f64()].into_iter().flatten().collect(),
            ParamValue::List(items) => items.iter().filter_map(ParamValue::as_float).collect(),
            _ => Vec::new(),
        }
    }

    /// Check if this value is `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }
}

impl TryFrom<serde_json::Value> for ParamValue {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value as J;
        match value {
            J::Null => Ok(ParamValue::Null),
            J::Bool(b) => Ok(ParamValue::Bool(b)),
            J::Number(n) => match n.as_i64() {
                Some(i) => Ok(ParamValue::Int(i)),
                None => n
                    .as_f64()
                    .map(ParamValue::Float)
                    .ok_or_else(|| format!("number {} is out of range", n)),
            },
            J::String(s) => Ok(ParamValue::Str(s)),
            J::Array(items) => {
                if let [J::Number(a), J::Number(b)] = items.as_slice() {
                    return Ok(ParamValue::Range(a.clone(), b.clone()));
                }
                items
                    .into_iter()
                    .map(ParamValue::try_from)
                    .collect::<Result<Vec<_>, _>>()
                    .map(ParamValue::List)
            }
            J::Object(_) => Err(
                "nested mappings are not allowed; params must be a flat name -> value mapping"
                    .to_string(),
            ),
        }
    }
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        ParamValue::try_from(raw).map_err(D::Error::custom)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Str(s) => write!(f, "\"{}\"", s),
            ParamValue::Range(a, b) => write!(f, "[{}, {}]", a, b),
            ParamValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl ParamType {
    /// Check if a value matches this declared type.
    pub fn matches(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (ParamType::Any, _) | (_, ParamValue::Null) => true,
            (ParamType::Int, v) => v.as_int().is_some(),
            (ParamType::Float, v) => v.as_float().is_some(),
            (ParamType::Bool, ParamValue::Bool(_)) => true,
            (ParamType::String, ParamValue::Str(_)) => true,
            (ParamType::Range, ParamValue::Range(_, _)) => true,
            (ParamType::Range, v) => v.as_float().is_some(),
            (ParamType::List, ParamValue::List(_) | ParamValue::Range(_, _)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::String => "string",
            ParamType::Range => "range",
            ParamType::List => "list",
            ParamType::Any => "any",
        };
        f.write_str(name)
    }
}

/// One source image and the mask resolved for it, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMaskPair {
    pub image_path: PathBuf,
    pub mask_path: Option<PathBuf>,
}

impl ImageMaskPair {
    /// Create a pair.
    pub fn new(image_path: impl Into<PathBuf>, mask_path: Option<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            mask_path,
        }
    }

    /// Whether a mask file was resolved for this image.
    pub fn has_mask(&self) -> bool {
        self.mask_path.is_some()
    }

    /// File name of the source image.
    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.image_path.file_name()
    }

    /// Stem of the source image (used for mask output names).
    pub fn stem(&self) -> Option<&std::ffi::OsStr> {
        Path::new(&self.image_path).file_stem()
    }
}
