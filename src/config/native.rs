//! The capability provider ecosystem's own interchange format.
//!
//! ```json
//! {"__version__": "1.4.24",
//!  "transform": {"__class_fullname__": "albumentations.core.composition.Compose",
//!                "p": 1.0,
//!                "transforms": [{"__class_fullname__": "...Rotate", "always_apply": false, "limit": 30}],
//!                "bbox_params": null, "keypoint_params": null, "additional_targets": {}}}
//! ```

use crate::core::types::Params;
use serde::{Deserialize, Serialize};

/// Version written into exported documents.
pub const NATIVE_FORMAT_VERSION: &str = "1.4.24";

/// Fully qualified class name of the composing container.
pub const COMPOSE_CLASS: &str = "albumentations.core.composition.Compose";

/// Module prefix synthesized for exported transform class names.
pub const TRANSFORM_CLASS_PREFIX: &str = "albumentations.augmentations.transforms";

/// Top-level native document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeDocument {
    #[serde(rename = "__version__")]
    pub version: serde_json::Value,
    pub transform: NativeCompose,
}

/// The composing container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeCompose {
    #[serde(rename = "__class_fullname__", default = "compose_class")]
    pub class_fullname: String,
    #[serde(default = "one")]
    pub p: f64,
    #[serde(default)]
    pub transforms: Vec<NativeTransform>,
    #[serde(default)]
    pub bbox_params: serde_json::Value,
    #[serde(default)]
    pub keypoint_params: serde_json::Value,
    #[serde(default)]
    pub additional_targets: serde_json::Map<String, serde_json::Value>,
}

/// One transform entry. Every key besides the bookkeeping fields is a
/// parameter, kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeTransform {
    #[serde(rename = "__class_fullname__")]
    pub class_fullname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_apply: Option<serde_json::Value>,
    #[serde(flatten)]
    pub params: Params,
}

fn compose_class() -> String {
    COMPOSE_CLASS.to_string()
}

fn one() -> f64 {
    1.0
}

impl NativeDocument {
    /// Build a document around a list of transforms.
    pub fn new(transforms: Vec<NativeTransform>) -> Self {
        Self {
            version: serde_json::Value::String(NATIVE_FORMAT_VERSION.to_string()),
            transform: NativeCompose {
                class_fullname: compose_class(),
                p: 1.0,
                transforms,
                bbox_params: serde_json::Value::Null,
                keypoint_params: serde_json::Value::Null,
                additional_targets: serde_json::Map::new(),
            },
        }
    }

    /// Version rendered as text, whatever JSON type it was stored as.
    pub fn version_string(&self) -> String {
        match &self.version {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Check whether a JSON document looks like this format.
    pub fn is_native(value: &serde_json::Value) -> bool {
        value
            .as_object()
            .map_or(false, |o| o.contains_key("__version__") && o.contains_key("transform"))
    }
}

impl NativeTransform {
    /// Build an entry for a catalog transform name.
    pub fn new(name: &str, params: Params) -> Self {
        Self {
            class_fullname: format!("{}.{}", TRANSFORM_CLASS_PREFIX, name),
            always_apply: Some(serde_json::Value::Bool(false)),
            params,
        }
    }

    /// Short class name: the last dotted segment.
    pub fn short_name(&self) -> &str {
        self.class_fullname
            .rsplit('.')
            .next()
            .unwrap_or(&self.class_fullname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ParamValue;

    const SAMPLE: &str = r#"{
        "__version__": "1.3.0",
        "transform": {
            "__class_fullname__": "albumentations.core.composition.Compose",
            "p": 1.0,
            "transforms": [
                {"__class_fullname__": "albumentations.augmentations.geometric.rotate.Rotate",
                 "always_apply": false, "limit": [-30, 30], "p": 0.7, "border_mode": 0},
                {"__class_fullname__": "GaussianBlur", "blur_limit": [3, 7, 9]}
            ],
            "bbox_params": null,
            "keypoint_params": null,
            "additional_targets": {}
        }
    }"#;

    #[test]
    fn test_parse_strips_bookkeeping() {
        let doc: NativeDocument = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(doc.version_string(), "1.3.0");
        let rotate = &doc.transform.transforms[0];
        assert_eq!(rotate.short_name(), "Rotate");
        let keys: Vec<_> = rotate.params.keys().cloned().collect();
        assert_eq!(keys, vec!["limit", "p", "border_mode"]);
        assert_eq!(rotate.params["limit"], ParamValue::int_range(-30, 30));

        let blur = &doc.transform.transforms[1];
        assert_eq!(blur.short_name(), "GaussianBlur");
        assert!(matches!(blur.params["blur_limit"], ParamValue::List(ref v) if v.len() == 3));
    }

    #[test]
    fn test_detection() {
        let native: serde_json::Value = serde_json::from_str(SAMPLE).unwrap();
        assert!(NativeDocument::is_native(&native));
        let portable = serde_json::json!({"metadata": {}, "transforms": []});
        assert!(!NativeDocument::is_native(&portable));
    }

    #[test]
    fn test_export_shape() {
        let mut params = Params::new();
        params.insert("limit".into(), ParamValue::Int(30));
        let doc = NativeDocument::new(vec![NativeTransform::new("Rotate", params)]);
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["transform"]["__class_fullname__"], COMPOSE_CLASS);
        assert_eq!(
            value["transform"]["transforms"][0]["__class_fullname__"],
            "albumentations.augmentations.transforms.Rotate"
        );
        assert_eq!(value["transform"]["transforms"][0]["always_apply"], false);
        assert_eq!(value["transform"]["transforms"][0]["limit"], 30);
        assert!(value["transform"]["bbox_params"].is_null());
        assert!(value["transform"]["additional_targets"].as_object().unwrap().is_empty());
    }
}
