//! Run directories, run state and cancellation.
//!
//! Each run owns one directory under the output root:
//!
//! ```text
//! run_20240101_120000/
//!   pipeline.json
//!   progress.json
//!   stop.flag          (present once cancellation is requested)
//!   manifest.json
//!   distortion_001/{images,masks}/
//! ```

use crate::core::error::{AugmentError, ConfigError};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Prefix of every run directory name.
pub const RUN_PREFIX: &str = "run_";
/// Cancellation sentinel file.
pub const STOP_FLAG: &str = "stop.flag";
/// Live progress file.
pub const PROGRESS_FILE: &str = "progress.json";
/// Terminal run record.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Pipeline snapshot taken at run start.
pub const PIPELINE_FILE: &str = "pipeline.json";

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Initializing,
    Running,
    Completed,
    Canceled,
}

impl RunState {
    /// Whether the run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Canceled)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Initializing => "INITIALIZING",
            RunState::Running => "RUNNING",
            RunState::Completed => "COMPLETED",
            RunState::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// In-process cancellation flag, shared between a controller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Pairs already started still finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Identity and layout of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub num_variants: u32,
    pub random_seed: Option<u64>,
    pub started_at: DateTime<Local>,
}

impl RunContext {
    /// Claim a fresh run directory under `output_dir`.
    ///
    /// The id is `run_<YYYYMMDD_HHMMSS>`; when that directory already exists
    /// a `_2`, `_3`, ... suffix is appended until an unused name is found.
    pub fn create(
        output_dir: &Path,
        num_variants: u32,
        random_seed: Option<u64>,
    ) -> Result<Self, AugmentError> {
        if num_variants == 0 {
            return Err(ConfigError::InvalidVariantCount(num_variants).into());
        }
        std::fs::create_dir_all(output_dir)?;

        let started_at = Local::now();
        let base = format!("{}{}", RUN_PREFIX, started_at.format("%Y%m%d_%H%M%S"));

        let mut attempt = 1u32;
        loop {
            let run_id = if attempt == 1 {
                base.clone()
            } else {
                format!("{}_{}", base, attempt)
            };
            let run_dir = output_dir.join(&run_id);
            match std::fs::create_dir(&run_dir) {
                Ok(()) => {
                    log::debug!("Claimed run directory {}", run_dir.display());
                    return Ok(Self {
                        run_id,
                        run_dir,
                        num_variants,
                        random_seed,
                        started_at,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Directory name of variant `index` (0-based): `distortion_001`, ...
    pub fn variant_name(index: u32) -> String {
        format!("distortion_{:03}", index + 1)
    }

    pub fn variant_dir(&self, index: u32) -> PathBuf {
        self.run_dir.join(Self::variant_name(index))
    }

    /// Seed of variant `index`, if the run is seeded.
    pub fn variant_seed(&self, index: u32) -> Option<u64> {
        self.random_seed.map(|seed| seed.wrapping_add(u64::from(index)))
    }

    pub fn stop_flag_path(&self) -> PathBuf {
        self.run_dir.join(STOP_FLAG)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.run_dir.join(PROGRESS_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.run_dir.join(MANIFEST_FILE)
    }

    pub fn pipeline_path(&self) -> PathBuf {
        self.run_dir.join(PIPELINE_FILE)
    }

    /// Whether the cancellation sentinel exists.
    pub fn stop_requested(&self) -> bool {
        self.stop_flag_path().exists()
    }

    /// Create `images/` (and `masks/` when needed) for every variant.
    pub fn create_variant_dirs(&self, with_masks: bool) -> std::io::Result<()> {
        for index in 0..self.num_variants {
            let dir = self.variant_dir(index);
            std::fs::create_dir_all(dir.join("images"))?;
            if with_masks {
                std::fs::create_dir_all(dir.join("masks"))?;
            }
        }
        Ok(())
    }
}

/// Ask the run in `run_dir` to stop at its next pair boundary.
pub fn request_cancel(run_dir: &Path) -> std::io::Result<PathBuf> {
    let flag = run_dir.join(STOP_FLAG);
    std::fs::write(&flag, Local::now().to_rfc3339())?;
    log::info!("Cancellation requested for {}", run_dir.display());
    Ok(flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_claims_unique_dirs() {
        let out = tempfile::tempdir().unwrap();
        let first = RunContext::create(out.path(), 2, Some(7)).unwrap();
        let second = RunContext::create(out.path(), 2, Some(7)).unwrap();

        assert!(first.run_id.starts_with(RUN_PREFIX));
        assert!(first.run_dir.is_dir());
        assert!(second.run_dir.is_dir());
        assert_ne!(first.run_dir, second.run_dir);
    }

    #[test]
    fn test_zero_variants_rejected() {
        let out = tempfile::tempdir().unwrap();
        assert!(matches!(
            RunContext::create(out.path(), 0, None),
            Err(AugmentError::Config(ConfigError::InvalidVariantCount(0)))
        ));
    }

    #[test]
    fn test_variant_layout_and_seeds() {
        let out = tempfile::tempdir().unwrap();
        let ctx = RunContext::create(out.path(), 3, Some(42)).unwrap();
        ctx.create_variant_dirs(false).unwrap();

        assert_eq!(RunContext::variant_name(0), "distortion_001");
        assert!(ctx.variant_dir(2).join("images").is_dir());
        assert!(!ctx.variant_dir(0).join("masks").exists());
        assert_eq!(ctx.variant_seed(0), Some(42));
        assert_eq!(ctx.variant_seed(2), Some(44));
    }

    #[test]
    fn test_stop_flag() {
        let out = tempfile::tempdir().unwrap();
        let ctx = RunContext::create(out.path(), 1, None).unwrap();
        assert!(!ctx.stop_requested());
        request_cancel(&ctx.run_dir).unwrap();
        assert!(ctx.stop_requested());
    }

    #[test]
    fn test_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
