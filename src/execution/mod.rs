//! Batch execution module.
//!
//! This module runs a built pipeline over every resolved pair, producing the
//! run directory, live progress and the final manifest.

pub mod executor;
pub mod manifest;
pub mod persist;
pub mod progress;
pub mod run;

pub use executor::{
    augment_sample, variant_rng, BatchExecutor, ExecutorOptions, RunOutcome, RunRequest,
};
pub use manifest::{
    ErrorSummary, PairResult, PairStatus, PipelineReference, RunConfiguration, RunManifest,
    RunStatistics, VariantResult,
};
pub use progress::{
    find_active_run, latest_progress, Progress, ProgressCallback, ProgressTracker, ProgressUpdate,
};
pub use run::{request_cancel, CancellationToken, RunContext, RunState};
