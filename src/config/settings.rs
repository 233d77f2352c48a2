//! Run settings loaded from TOML.
//!
//! ```toml
//! [input]
//! images = "data/images"
//! masks = "data/masks"
//!
//! [output]
//! dir = "outputs"
//!
//! [run]
//! variants = 3
//! seed = 42
//! workers = 4
//!
//! [logging]
//! level = "info"
//! ```

use crate::core::error::AugmentError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Input directories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    pub images: Option<PathBuf>,
    pub masks: Option<PathBuf>,
}

/// Output location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub dir: Option<PathBuf>,
}

/// Batch parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Variants generated per pair.
    pub variants: u32,
    /// Base seed; variant `i` uses `seed + i`.
    pub seed: Option<u64>,
    /// Pairs processed concurrently.
    pub workers: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            variants: 3,
            seed: None,
            workers: 1,
        }
    }
}

/// Logging filter for the command-line front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// All run settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub input: InputSettings,
    pub output: OutputSettings,
    pub run: RunOptions,
    pub logging: LoggingSettings,
}

/// Values given explicitly on the command line. `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub images: Option<PathBuf>,
    pub masks: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub variants: Option<u32>,
    pub seed: Option<u64>,
    pub workers: Option<usize>,
}

impl RunSettings {
    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, AugmentError> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AugmentError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Apply command-line overrides on top of these settings.
    pub fn merge(mut self, overrides: SettingsOverrides) -> Self {
        if overrides.images.is_some() {
            self.input.images = overrides.images;
        }
        if overrides.masks.is_some() {
            self.input.masks = overrides.masks;
        }
        if overrides.output.is_some() {
            self.output.dir = overrides.output;
        }
        if let Some(variants) = overrides.variants {
            self.run.variants = variants;
        }
        if overrides.seed.is_some() {
            self.run.seed = overrides.seed;
        }
        if let Some(workers) = overrides.workers {
            self.run.workers = workers;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = RunSettings::from_toml("").unwrap();
        assert_eq!(settings.run.variants, 3);
        assert_eq!(settings.run.workers, 1);
        assert_eq!(settings.run.seed, None);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_parse_full() {
        let settings = RunSettings::from_toml(
            r#"
            [input]
            images = "data/images"
            masks = "data/masks"

            [output]
            dir = "out"

            [run]
            variants = 5
            seed = 42
            workers = 4
            "#,
        )
        .unwrap();
        assert_eq!(settings.input.images, Some(PathBuf::from("data/images")));
        assert_eq!(settings.output.dir, Some(PathBuf::from("out")));
        assert_eq!(settings.run.seed, Some(42));
        assert_eq!(settings.run.workers, 4);
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let settings = RunSettings::from_toml("[run]\nvariants = 5\nseed = 1").unwrap();
        let merged = settings.merge(SettingsOverrides {
            seed: Some(9),
            output: Some(PathBuf::from("o")),
            ..Default::default()
        });
        assert_eq!(merged.run.variants, 5);
        assert_eq!(merged.run.seed, Some(9));
        assert_eq!(merged.output.dir, Some(PathBuf::from("o")));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            RunSettings::from_toml("[run]\nvariants = \"many\""),
            Err(AugmentError::Settings(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("augforge.toml");
        std::fs::write(&path, "[run]\nworkers = 2\n").unwrap();
        assert_eq!(RunSettings::from_file(&path).unwrap().run.workers, 2);
    }
}
