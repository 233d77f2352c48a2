//! Progress tracking for batch runs.
//!
//! The tracker is the single writer of `progress.json`. Every finished pair
//! (success or error) bumps the counter and atomically replaces the file;
//! external observers poll that file, in-process observers get a callback.

use crate::core::error::AugmentError;
use crate::execution::persist::{read_json, write_json_atomic};
use crate::execution::run::{PROGRESS_FILE, RUN_PREFIX};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Contents of `progress.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub timestamp: DateTime<Local>,
}

impl Progress {
    pub fn new(current: usize, total: usize) -> Self {
        Self {
            current,
            total,
            timestamp: Local::now(),
        }
    }

    /// A run is only considered live while `current < total`.
    pub fn is_active(&self) -> bool {
        self.current < self.total
    }

    /// Percentage of pairs processed.
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            return 100.0;
        }
        (self.current as f32 / self.total as f32) * 100.0
    }

    /// Read a progress file.
    pub fn read(path: &Path) -> Result<Self, AugmentError> {
        read_json(path)
    }
}

/// A progress event.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// Pairs resolved; processing is about to start.
    Started { total: usize },
    /// One pair finished.
    PairCompleted {
        current: usize,
        total: usize,
        image: PathBuf,
        success: bool,
    },
    /// The run stopped early.
    Cancelled { processed: usize, total: usize },
    /// The run processed every pair.
    Completed {
        successful: usize,
        failed: usize,
        duration_ms: u64,
    },
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Tracks processed pairs and mirrors the count into `progress.json`.
pub struct ProgressTracker {
    path: PathBuf,
    total: usize,
    current: Mutex<usize>,
    start_time: Instant,
    callback: Option<Arc<ProgressCallback>>,
}

impl ProgressTracker {
    /// Create a tracker writing to `<run_dir>/progress.json`.
    pub fn new(run_dir: &Path, total: usize) -> Self {
        Self {
            path: run_dir.join(PROGRESS_FILE),
            total,
            current: Mutex::new(0),
            start_time: Instant::now(),
            callback: None,
        }
    }

    /// Set a callback for progress updates.
    pub fn with_callback(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn current(&self) -> usize {
        *self.current.lock()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Write the initial `{0, total}` record.
    pub fn start(&self) -> Result<(), AugmentError> {
        let current = self.current.lock();
        write_json_atomic(&self.path, &Progress::new(*current, self.total))?;
        drop(current);
        self.send_update(ProgressUpdate::Started { total: self.total });
        Ok(())
    }

    /// Record one finished pair and return the new count.
    ///
    /// A failed progress write is logged and does not affect the pair.
    pub fn pair_finished(&self, image: &Path, success: bool) -> usize {
        let current = {
            let mut current = self.current.lock();
            *current += 1;
            if let Err(e) = write_json_atomic(&self.path, &Progress::new(*current, self.total)) {
                log::warn!("Failed to update {}: {}", self.path.display(), e);
            }
            *current
        };

        self.send_update(ProgressUpdate::PairCompleted {
            current,
            total: self.total,
            image: image.to_path_buf(),
            success,
        });
        current
    }

    pub fn cancelled(&self) {
        self.send_update(ProgressUpdate::Cancelled {
            processed: self.current(),
            total: self.total,
        });
    }

    pub fn completed(&self, successful: usize, failed: usize) {
        self.send_update(ProgressUpdate::Completed {
            successful,
            failed,
            duration_ms: self.elapsed_ms(),
        });
    }

    fn send_update(&self, update: ProgressUpdate) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }
}

fn run_dirs(output_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(output_dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .map_or(false, |n| n.to_string_lossy().starts_with(RUN_PREFIX))
        })
        .collect();
    dirs.sort();
    dirs
}

/// The lexicographically last run under `output_dir` whose progress shows
/// `current < total`.
pub fn find_active_run(output_dir: &Path) -> Option<PathBuf> {
    run_dirs(output_dir).into_iter().rev().find(|dir| {
        Progress::read(&dir.join(PROGRESS_FILE))
            .map(|p| p.is_active())
            .unwrap_or(false)
    })
}

/// The lexicographically last run with a readable progress file.
pub fn latest_progress(output_dir: &Path) -> Option<(PathBuf, Progress)> {
    run_dirs(output_dir)
        .into_iter()
        .rev()
        .find_map(|dir| Progress::read(&dir.join(PROGRESS_FILE)).ok().map(|p| (dir, p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_progress_file_tracks_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProgressTracker::new(dir.path(), 3);
        tracker.start().unwrap();

        let progress = Progress::read(&dir.path().join(PROGRESS_FILE)).unwrap();
        assert_eq!((progress.current, progress.total), (0, 3));

        tracker.pair_finished(Path::new("a.png"), true);
        tracker.pair_finished(Path::new("b.png"), false);
        let progress = Progress::read(&dir.path().join(PROGRESS_FILE)).unwrap();
        assert_eq!((progress.current, progress.total), (2, 3));
        assert!(progress.is_active());
    }

    #[test]
    fn test_percent() {
        assert_eq!(Progress::new(0, 0).percent(), 100.0);
        assert_eq!(Progress::new(1, 4).percent(), 25.0);
        assert!(!Progress::new(4, 4).is_active());
    }

    #[test]
    fn test_callback_invoked() {
        let dir = tempfile::tempdir().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let callback: ProgressCallback = Box::new(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        });

        let tracker = ProgressTracker::new(dir.path(), 1).with_callback(Arc::new(callback));
        tracker.start().unwrap();
        tracker.pair_finished(Path::new("a.png"), true);
        tracker.completed(1, 0);

        assert_eq!(count.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_find_active_run() {
        let out = tempfile::tempdir().unwrap();
        let write = |name: &str, current, total| {
            let dir = out.path().join(name);
            std::fs::create_dir(&dir).unwrap();
            write_json_atomic(&dir.join(PROGRESS_FILE), &Progress::new(current, total)).unwrap();
            dir
        };

        let active = write("run_20240101_000000", 1, 5);
        write("run_20240102_000000", 5, 5);
        std::fs::create_dir(out.path().join("run_20240103_000000")).unwrap();
        std::fs::create_dir(out.path().join("other")).unwrap();

        assert_eq!(find_active_run(out.path()), Some(active));
        let (latest, progress) = latest_progress(out.path()).unwrap();
        assert!(latest.ends_with("run_20240102_000000"));
        assert_eq!(progress.current, 5);
    }

    #[test]
    fn test_no_runs() {
        let out = tempfile::tempdir().unwrap();
        assert!(find_active_run(out.path()).is_none());
        assert!(find_active_run(&out.path().join("missing")).is_none());
    }
}
