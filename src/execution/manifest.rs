//! The run manifest: the terminal, auditable record of a run.

use crate::core::error::AugmentError;
use crate::core::types::ImageMaskPair;
use crate::execution::persist::{read_json, write_json_atomic};
use crate::execution::run::RunState;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outputs of one variant of one pair. Paths are relative to the run dir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    pub variant_name: String,
    pub output_image_path: PathBuf,
    #[serde(default)]
    pub output_mask_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairStatus {
    Success,
    Error,
}

/// Outcome of one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairResult {
    pub input_image: PathBuf,
    #[serde(default)]
    pub input_mask: Option<PathBuf>,
    pub status: PairStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<VariantResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Seconds spent on this pair.
    pub processing_time: f64,
    pub timestamp: DateTime<Local>,
}

impl PairResult {
    pub fn success(
        pair: &ImageMaskPair,
        outputs: Vec<VariantResult>,
        warnings: Vec<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            input_image: pair.image_path.clone(),
            input_mask: pair.mask_path.clone(),
            status: PairStatus::Success,
            outputs,
            error: None,
            warnings,
            processing_time: elapsed.as_secs_f64(),
            timestamp: Local::now(),
        }
    }

    pub fn failure(
        pair: &ImageMaskPair,
        message: impl Into<String>,
        warnings: Vec<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            input_image: pair.image_path.clone(),
            input_mask: pair.mask_path.clone(),
            status: PairStatus::Error,
            outputs: Vec::new(),
            error: Some(message.into()),
            warnings,
            processing_time: elapsed.as_secs_f64(),
            timestamp: Local::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PairStatus::Success
    }
}

/// Which pipeline produced the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReference {
    pub name: String,
    /// Source file the pipeline was loaded from, if any.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Snapshot written into the run directory.
    pub snapshot: PathBuf,
}

/// Run parameters as they were at start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub num_variants: u32,
    pub random_seed: Option<u64>,
    pub has_masks: bool,
    pub input_image_dir: PathBuf,
    pub input_mask_dir: Option<PathBuf>,
    pub workers: usize,
}

/// Aggregate counts and timings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total_images: usize,
    /// Pairs that actually ran; below `total_images` after a cancellation.
    #[serde(default)]
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_outputs: usize,
    pub duration_seconds: f64,
    /// Mean processing time of successful pairs, in seconds.
    pub avg_time_per_image: f64,
}

impl RunStatistics {
    /// Compute statistics over the processed pairs.
    ///
    /// `total_images` counts the pairs that were resolved, including any
    /// never started because of cancellation.
    pub fn compute(total_images: usize, results: &[PairResult], duration: Duration) -> Self {
        let successes: Vec<&PairResult> = results.iter().filter(|r| r.is_success()).collect();
        let successful = successes.len();
        let avg = if successful == 0 {
            0.0
        } else {
            successes.iter().map(|r| r.processing_time).sum::<f64>() / successful as f64
        };

        Self {
            total_images,
            processed: results.len(),
            successful,
            failed: results.len() - successful,
            total_outputs: successes.iter().map(|r| r.outputs.len()).sum(),
            duration_seconds: duration.as_secs_f64(),
            avg_time_per_image: avg,
        }
    }
}

/// Short error record for the manifest's `errors` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub image: PathBuf,
    pub error: String,
}

/// The complete record of a run, written once when the run ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub timestamp: DateTime<Local>,
    pub state: RunState,
    pub pipeline: PipelineReference,
    pub configuration: RunConfiguration,
    pub statistics: RunStatistics,
    pub results: Vec<PairResult>,
    pub errors: Vec<ErrorSummary>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RunManifest {
    /// Assemble a manifest; errors and warnings are collected from `results`.
    pub fn new(
        run_id: impl Into<String>,
        state: RunState,
        pipeline: PipelineReference,
        configuration: RunConfiguration,
        statistics: RunStatistics,
        results: Vec<PairResult>,
    ) -> Self {
        let errors = results
            .iter()
            .filter_map(|r| {
                r.error.as_ref().map(|error| ErrorSummary {
                    image: r.input_image.clone(),
                    error: error.clone(),
                })
            })
            .collect();

        let warnings = results
            .iter()
            .flat_map(|r| {
                let name = r
                    .input_image
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                r.warnings.iter().map(move |w| format!("{}: {}", name, w))
            })
            .collect();

        Self {
            run_id: run_id.into(),
            timestamp: Local::now(),
            state,
            pipeline,
            configuration,
            statistics,
            results,
            errors,
            warnings,
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), AugmentError> {
        write_json_atomic(path, self)
    }

    pub fn load(path: &Path) -> Result<Self, AugmentError> {
        read_json(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(name: &str) -> ImageMaskPair {
        ImageMaskPair::new(format!("/in/{}", name), None)
    }

    fn variant(i: u32) -> VariantResult {
        VariantResult {
            variant_name: format!("distortion_{:03}", i),
            output_image_path: PathBuf::from(format!("distortion_{:03}/images/a.png", i)),
            output_mask_path: None,
        }
    }

    fn configuration() -> RunConfiguration {
        RunConfiguration {
            num_variants: 2,
            random_seed: Some(1),
            has_masks: false,
            input_image_dir: PathBuf::from("/in"),
            input_mask_dir: None,
            workers: 1,
        }
    }

    fn reference() -> PipelineReference {
        PipelineReference {
            name: "test".to_string(),
            path: None,
            snapshot: PathBuf::from("pipeline.json"),
        }
    }

    #[test]
    fn test_statistics_average_over_successes() {
        let results = vec![
            PairResult::success(&pair("a.png"), vec![variant(1), variant(2)], vec![], Duration::from_secs(2)),
            PairResult::success(&pair("b.png"), vec![variant(1), variant(2)], vec![], Duration::from_secs(4)),
            PairResult::failure(&pair("c.png"), "boom", vec![], Duration::from_secs(100)),
        ];
        let stats = RunStatistics::compute(5, &results, Duration::from_secs(10));
        assert_eq!(stats.total_images, 5);
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_outputs, 4);
        assert!((stats.avg_time_per_image - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_errors_and_warnings_collected() {
        let results = vec![
            PairResult::success(
                &pair("a.png"),
                vec![variant(1)],
                vec!["mask dropped".to_string()],
                Duration::ZERO,
            ),
            PairResult::failure(&pair("b.png"), "cannot decode", vec![], Duration::ZERO),
        ];
        let stats = RunStatistics::compute(2, &results, Duration::ZERO);
        let manifest = RunManifest::new("run_x", RunState::Completed, reference(), configuration(), stats, results);

        assert_eq!(manifest.errors.len(), 1);
        assert_eq!(manifest.errors[0].error, "cannot decode");
        assert_eq!(manifest.warnings, vec!["a.png: mask dropped".to_string()]);
    }

    #[test]
    fn test_serialized_shape() {
        let results = vec![PairResult::failure(&pair("b.png"), "bad", vec![], Duration::ZERO)];
        let stats = RunStatistics::compute(1, &results, Duration::ZERO);
        let manifest = RunManifest::new("run_x", RunState::Canceled, reference(), configuration(), stats, results);

        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["state"], "canceled");
        assert_eq!(value["results"][0]["status"], "error");
        assert_eq!(value["statistics"]["failed"], 1);
        assert!(value["results"][0].get("outputs").is_none());
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = RunManifest::new(
            "run_x",
            RunState::Completed,
            reference(),
            configuration(),
            RunStatistics::default(),
            Vec::new(),
        );
        manifest.write(&path).unwrap();
        assert_eq!(RunManifest::load(&path).unwrap(), manifest);
    }
}
