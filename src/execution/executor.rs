//! Batch executor.
//!
//! A run moves through `INITIALIZING -> RUNNING -> COMPLETED | CANCELED`.
//! Configuration problems abort before any pair is touched; problems with a
//! single pair are recorded in the manifest and the run carries on.

use crate::codec::{ImageCodec, ImageCrateCodec};
use crate::config::{BuiltPipelines, PipelineConfig, RunSettings};
use crate::core::error::{AugmentError, ConfigError, PairError, TransformError};
use crate::core::types::ImageMaskPair;
use crate::execution::manifest::{
    PairResult, PipelineReference, RunConfiguration, RunManifest, RunStatistics, VariantResult,
};
use crate::execution::progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
use crate::execution::run::{CancellationToken, RunContext, RunState, PIPELINE_FILE};
use crate::pairing::{load_mask, scan_pairs, validate_dimensions};
use crate::provider::{CapabilityProvider, ProviderRegistry, Sample};
use image::{GrayImage, RgbImage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Random generator of variant `index`.
///
/// Seeded runs use `seed + index`, so variant `i` of an image is reproducible
/// across runs.
pub fn variant_rng(seed: Option<u64>, index: u32) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(index))),
        None => StdRng::from_entropy(),
    }
}

/// Augment one sample: geometric transforms on image and mask together, then
/// pixel transforms on the image alone.
pub fn augment_sample(
    pipelines: &BuiltPipelines,
    sample: Sample,
    rng: &mut StdRng,
) -> Result<Sample, TransformError> {
    pipelines.apply(sample, rng)
}

/// Execution options.
#[derive(Clone)]
pub struct ExecutorOptions {
    /// Pairs processed concurrently. `0` and `1` both mean sequential.
    pub workers: usize,
    /// Progress callback.
    pub progress_callback: Option<Arc<ProgressCallback>>,
    /// In-process cancellation, checked alongside the stop flag.
    pub cancellation: CancellationToken,
}

impl std::fmt::Debug for ExecutorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorOptions")
            .field("workers", &self.workers)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .field("cancellation", &self.cancellation.is_cancelled())
            .finish()
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            progress_callback: None,
            cancellation: CancellationToken::new(),
        }
    }
}

impl ExecutorOptions {
    /// Create a new options builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Share a cancellation token with the caller.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub image_dir: PathBuf,
    pub mask_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub num_variants: u32,
    pub random_seed: Option<u64>,
    /// File the pipeline came from, recorded in the manifest.
    pub pipeline_path: Option<PathBuf>,
}

impl RunRequest {
    pub fn new(image_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            mask_dir: None,
            output_dir: output_dir.into(),
            num_variants: 3,
            random_seed: None,
            pipeline_path: None,
        }
    }

    pub fn with_masks(mut self, mask_dir: impl Into<PathBuf>) -> Self {
        self.mask_dir = Some(mask_dir.into());
        self
    }

    pub fn with_variants(mut self, num_variants: u32) -> Self {
        self.num_variants = num_variants;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn with_pipeline_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pipeline_path = Some(path.into());
        self
    }

    /// Build a request from run settings.
    pub fn from_settings(settings: &RunSettings) -> Result<Self, ConfigError> {
        let image_dir = settings
            .input
            .images
            .clone()
            .ok_or_else(|| ConfigError::Malformed("no input image directory configured".to_string()))?;
        let output_dir = settings
            .output
            .dir
            .clone()
            .ok_or_else(|| ConfigError::Malformed("no output directory configured".to_string()))?;

        Ok(Self {
            image_dir,
            mask_dir: settings.input.masks.clone(),
            output_dir,
            num_variants: settings.run.variants,
            random_seed: settings.run.seed,
            pipeline_path: None,
        })
    }
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_dir: PathBuf,
    pub manifest: RunManifest,
}

/// Everything a pair needs, shared by all workers.
struct PairJob<'a> {
    ctx: &'a RunContext,
    pipelines: &'a BuiltPipelines,
    with_masks: bool,
}

/// Runs a frozen pipeline over a directory of images.
pub struct BatchExecutor {
    config: PipelineConfig,
    provider: Arc<dyn CapabilityProvider>,
    codec: Arc<dyn ImageCodec>,
    options: ExecutorOptions,
}

impl BatchExecutor {
    /// Create an executor over the built-in provider. The configuration is
    /// taken by value and cannot change during a run.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            provider: Arc::new(ProviderRegistry::with_builtins()),
            codec: Arc::new(ImageCrateCodec),
            options: ExecutorOptions::default(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run and write its manifest.
    ///
    /// Returns an error only for configuration problems; per-pair failures
    /// end up in the manifest.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome, AugmentError> {
        let started = Instant::now();

        if request.num_variants == 0 {
            return Err(ConfigError::InvalidVariantCount(request.num_variants).into());
        }
        if !request.image_dir.is_dir() {
            return Err(
                ConfigError::MissingInputDirectory(request.image_dir.display().to_string()).into(),
            );
        }

        let ctx = RunContext::create(&request.output_dir, request.num_variants, request.random_seed)?;
        log::info!("Run {} {}", ctx.run_id, RunState::Initializing);

        let pipelines = self.config.build(self.provider.as_ref())?;
        log::info!(
            "Built pipeline '{}' ({} transforms)",
            self.config.metadata.name,
            pipelines.len()
        );

        self.config.save(ctx.pipeline_path())?;

        let pairs = scan_pairs(&request.image_dir, request.mask_dir.as_deref())?;
        let with_masks = pairs.iter().any(ImageMaskPair::has_mask);

        let mut tracker = ProgressTracker::new(&ctx.run_dir, pairs.len());
        if let Some(callback) = &self.options.progress_callback {
            tracker = tracker.with_callback(callback.clone());
        }
        tracker.start()?;

        let configuration = RunConfiguration {
            num_variants: request.num_variants,
            random_seed: request.random_seed,
            has_masks: with_masks,
            input_image_dir: request.image_dir.clone(),
            input_mask_dir: request.mask_dir.clone(),
            workers: self.options.workers.max(1),
        };
        let reference = PipelineReference {
            name: self.config.metadata.name.clone(),
            path: request.pipeline_path.clone(),
            snapshot: PathBuf::from(PIPELINE_FILE),
        };

        if pairs.is_empty() {
            log::warn!("No images found in {}", request.image_dir.display());
            let manifest = RunManifest::new(
                ctx.run_id.clone(),
                RunState::Completed,
                reference,
                configuration,
                RunStatistics::compute(0, &[], started.elapsed()),
                Vec::new(),
            );
            manifest.write(&ctx.manifest_path())?;
            tracker.completed(0, 0);
            log::info!("Run {} {}", ctx.run_id, RunState::Completed);
            return Ok(RunOutcome {
                run_dir: ctx.run_dir,
                manifest,
            });
        }

        ctx.create_variant_dirs(with_masks)?;

        let job = PairJob {
            ctx: &ctx,
            pipelines: &pipelines,
            with_masks,
        };

        log::info!(
            "Run {} {}: {} pairs x {} variants",
            ctx.run_id,
            RunState::Running,
            pairs.len(),
            request.num_variants
        );

        let mut indexed = if self.options.workers <= 1 {
            self.run_sequential(&job, &pairs, &tracker)
        } else {
            self.run_parallel(&job, &pairs, &tracker)?
        };
        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<PairResult> = indexed.into_iter().map(|(_, result)| result).collect();

        let state = if results.len() < pairs.len() {
            RunState::Canceled
        } else {
            RunState::Completed
        };

        let statistics = RunStatistics::compute(pairs.len(), &results, started.elapsed());
        log::info!(
            "Run {} {}: {} successful, {} failed, {} outputs in {:.2}s",
            ctx.run_id,
            state,
            statistics.successful,
            statistics.failed,
            statistics.total_outputs,
            statistics.duration_seconds
        );

        match state {
            RunState::Canceled => tracker.cancelled(),
            _ => tracker.completed(statistics.successful, statistics.failed),
        }

        let manifest = RunManifest::new(
            ctx.run_id.clone(),
            state,
            reference,
            configuration,
            statistics,
            results,
        );
        manifest.write(&ctx.manifest_path())?;

        Ok(RunOutcome {
            run_dir: ctx.run_dir,
            manifest,
        })
    }

    fn should_stop(&self, ctx: &RunContext) -> bool {
        if self.options.cancellation.is_cancelled() {
            return true;
        }
        if ctx.stop_requested() {
            self.options.cancellation.cancel();
            return true;
        }
        false
    }

    fn run_sequential(
        &self,
        job: &PairJob<'_>,
        pairs: &[ImageMaskPair],
        tracker: &ProgressTracker,
    ) -> Vec<(usize, PairResult)> {
        let mut results = Vec::with_capacity(pairs.len());
        for (index, pair) in pairs.iter().enumerate() {
            if self.should_stop(job.ctx) {
                log::info!("Cancellation observed after {} pairs", index);
                break;
            }
            let result = self.process_pair(job, pair);
            tracker.pair_finished(&pair.image_path, result.is_success());
            results.push((index, result));
        }
        results
    }

    fn run_parallel(
        &self,
        job: &PairJob<'_>,
        pairs: &[ImageMaskPair],
        tracker: &ProgressTracker,
    ) -> Result<Vec<(usize, PairResult)>, AugmentError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers)
            .build()
            .map_err(|e| AugmentError::Execution(format!("failed to start worker pool: {}", e)))?;

        Ok(pool.install(|| {
            pairs
                .par_iter()
                .enumerate()
                .filter_map(|(index, pair)| {
                    if self.should_stop(job.ctx) {
                        return None;
                    }
                    let result = self.process_pair(job, pair);
                    tracker.pair_finished(&pair.image_path, result.is_success());
                    Some((index, result))
                })
                .collect()
        }))
    }

    fn process_pair(&self, job: &PairJob<'_>, pair: &ImageMaskPair) -> PairResult {
        let start = Instant::now();
        let mut warnings = Vec::new();

        match self.augment_pair(job, pair, &mut warnings) {
            Ok(outputs) => {
                log::debug!(
                    "Processed {} in {:.3}s",
                    pair.image_path.display(),
                    start.elapsed().as_secs_f64()
                );
                PairResult::success(pair, outputs, warnings, start.elapsed())
            }
            Err(e) => {
                log::error!("Failed to process {}: {}", pair.image_path.display(), e);
                PairResult::failure(pair, e.to_string(), warnings, start.elapsed())
            }
        }
    }

    fn load_pair_mask(
        &self,
        pair: &ImageMaskPair,
        image: &RgbImage,
        warnings: &mut Vec<String>,
    ) -> Option<GrayImage> {
        let path = pair.mask_path.as_deref()?;
        let Some(mask) = load_mask(path) else {
            warnings.push(format!("mask {} could not be loaded; processed image-only", path.display()));
            return None;
        };
        match validate_dimensions(image, &mask) {
            Ok(()) => Some(mask),
            Err(e) => {
                log::warn!("Dropping mask {}: {}", path.display(), e);
                warnings.push(format!("mask dropped: {}", e));
                None
            }
        }
    }

    fn augment_pair(
        &self,
        job: &PairJob<'_>,
        pair: &ImageMaskPair,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<VariantResult>, PairError> {
        let image = self
            .codec
            .decode_image(&pair.image_path)
            .map_err(PairError::Decode)?;
        let mask = self.load_pair_mask(pair, &image, warnings);

        let file_name = pair
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("image.png"));
        let mask_name = format!(
            "{}.png",
            pair.stem().map(|s| s.to_string_lossy()).unwrap_or_default()
        );

        let mut outputs = Vec::with_capacity(job.ctx.num_variants as usize);
        for index in 0..job.ctx.num_variants {
            let mut rng = variant_rng(job.ctx.random_seed, index);
            let sample = Sample::new(image.clone(), mask.clone());
            let augmented = augment_sample(job.pipelines, sample, &mut rng)?;

            let variant_name = RunContext::variant_name(index);
            let image_rel = Path::new(&variant_name).join("images").join(&file_name);
            self.codec
                .encode_image(&augmented.image, &job.ctx.run_dir.join(&image_rel))
                .map_err(PairError::Encode)?;

            let mask_rel = match (&augmented.mask, job.with_masks) {
                (Some(out_mask), true) => {
                    let rel = Path::new(&variant_name).join("masks").join(&mask_name);
                    self.codec
                        .encode_mask(out_mask, &job.ctx.run_dir.join(&rel))
                        .map_err(PairError::Encode)?;
                    Some(rel)
                }
                _ => None,
            };

            outputs.push(VariantResult {
                variant_name,
                output_image_path: image_rel,
                output_mask_path: mask_rel,
            });
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ParamValue, Params};
    use image::Rgb;

    fn write_image(dir: &Path, name: &str) {
        RgbImage::from_fn(8, 6, |x, y| Rgb([(x * 30) as u8, (y * 40) as u8, 90]))
            .save(dir.join(name))
            .unwrap();
    }

    fn flip_pipeline() -> PipelineConfig {
        let mut config = PipelineConfig::new().named("flip");
        let mut params = Params::new();
        params.insert("p".to_string(), ParamValue::Float(1.0));
        config.add("HorizontalFlip", params).unwrap();
        config
    }

    #[test]
    fn test_options_builder() {
        let token = CancellationToken::new();
        let options = ExecutorOptions::new()
            .with_workers(4)
            .with_cancellation(token.clone())
            .with_progress(|_| {});
        assert_eq!(options.workers, 4);
        assert!(options.progress_callback.is_some());
        token.cancel();
        assert!(options.cancellation.is_cancelled());
    }

    #[test]
    fn test_variant_rng_is_deterministic() {
        use rand::Rng;
        let a: u64 = variant_rng(Some(5), 1).gen();
        let b: u64 = variant_rng(Some(5), 1).gen();
        let c: u64 = variant_rng(Some(6), 0).gen();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_run_writes_layout() {
        let images = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_image(images.path(), "a.png");

        let request = RunRequest::new(images.path(), out.path())
            .with_variants(2)
            .with_seed(3);
        let outcome = BatchExecutor::new(flip_pipeline()).run(&request).unwrap();

        assert_eq!(outcome.manifest.state, RunState::Completed);
        assert_eq!(outcome.manifest.statistics.total_outputs, 2);
        assert!(outcome.run_dir.join("pipeline.json").is_file());
        assert!(outcome.run_dir.join("manifest.json").is_file());
        assert!(outcome.run_dir.join("distortion_002/images/a.png").is_file());
        assert!(!outcome.run_dir.join("distortion_001/masks").exists());
    }

    #[test]
    fn test_build_failure_aborts_before_pairs() {
        let images = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_image(images.path(), "a.png");

        let mut config = PipelineConfig::new();
        let mut params = Params::new();
        params.insert("blur_limit".to_string(), ParamValue::Str("huge".to_string()));
        config.add("GaussianBlur", params).unwrap();

        let err = BatchExecutor::new(config)
            .run(&RunRequest::new(images.path(), out.path()))
            .unwrap_err();
        assert!(matches!(
            err,
            AugmentError::Config(ConfigError::IncompatibleTransform { .. })
        ));
    }

    #[test]
    fn test_out_of_schema_range_rejected_before_pairs() {
        let images = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_image(images.path(), "a.png");

        let mut config = PipelineConfig::new();
        config
            .add(
                "Rotate",
                serde_json::from_str(r#"{"limit": [-1e308, 1e308], "p": 1.0}"#).unwrap(),
            )
            .unwrap();

        let err = BatchExecutor::new(config)
            .run(&RunRequest::new(images.path(), out.path()))
            .unwrap_err();
        assert!(matches!(err, AugmentError::Config(_)));

        let manifests = std::fs::read_dir(out.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().join("manifest.json").exists())
            .count();
        assert_eq!(manifests, 0);
    }

    #[test]
    fn test_missing_image_dir_creates_nothing() {
        let out = tempfile::tempdir().unwrap();
        let request = RunRequest::new(out.path().join("nope"), out.path().join("runs"));
        let err = BatchExecutor::new(flip_pipeline()).run(&request).unwrap_err();
        assert!(matches!(
            err,
            AugmentError::Config(ConfigError::MissingInputDirectory(_))
        ));
        assert!(!out.path().join("runs").exists());
    }

    #[test]
    fn test_cancel_before_start_processes_nothing() {
        let images = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_image(images.path(), "a.png");
        write_image(images.path(), "b.png");

        let token = CancellationToken::new();
        token.cancel();
        let outcome = BatchExecutor::new(flip_pipeline())
            .with_options(ExecutorOptions::new().with_cancellation(token))
            .run(&RunRequest::new(images.path(), out.path()))
            .unwrap();

        assert_eq!(outcome.manifest.state, RunState::Canceled);
        assert!(outcome.manifest.results.is_empty());
        assert_eq!(outcome.manifest.statistics.total_images, 2);
    }

    #[test]
    fn test_mismatched_mask_is_dropped_with_warning() {
        let images = tempfile::tempdir().unwrap();
        let masks = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_image(images.path(), "a.png");
        GrayImage::new(3, 3).save(masks.path().join("a_mask.png")).unwrap();

        let request = RunRequest::new(images.path(), out.path())
            .with_masks(masks.path())
            .with_variants(1);
        let outcome = BatchExecutor::new(flip_pipeline()).run(&request).unwrap();

        let result = &outcome.manifest.results[0];
        assert!(result.is_success());
        assert_eq!(result.outputs[0].output_mask_path, None);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(outcome.manifest.statistics.failed, 0);
        assert_eq!(outcome.manifest.warnings.len(), 1);
    }
}
