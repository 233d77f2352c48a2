//! End-to-end batch runs over temporary directories.

use augforge::execution::run::PROGRESS_FILE;
use augforge::execution::{
    find_active_run, request_cancel, BatchExecutor, ExecutorOptions, PairStatus, Progress,
    ProgressUpdate, RunManifest, RunRequest, RunState,
};
use augforge::prelude::*;
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::path::{Path, PathBuf};

fn params(json: &str) -> Params {
    serde_json::from_str(json).unwrap()
}

fn write_image(dir: &Path, name: &str, seed: u8) {
    RgbImage::from_fn(16, 12, |x, y| {
        Rgb([
            (x as u8).wrapping_mul(15).wrapping_add(seed),
            (y as u8).wrapping_mul(20),
            seed.wrapping_mul(3),
        ])
    })
    .save(dir.join(name))
    .unwrap();
}

fn write_mask(dir: &Path, name: &str) {
    GrayImage::from_fn(16, 12, |x, y| Luma([if x < 8 && y < 6 { 255 } else { 0 }]))
        .save(dir.join(name))
        .unwrap();
}

fn five_images(dir: &Path) {
    for i in 1..=5u8 {
        write_image(dir, &format!("img_{}.png", i), i * 10);
    }
}

fn random_pipeline() -> PipelineConfig {
    let mut config = PipelineConfig::new().named("random");
    config.add("Rotate", params(r#"{"limit": 30, "p": 1.0}"#)).unwrap();
    config.add("HorizontalFlip", params(r#"{"p": 0.5}"#)).unwrap();
    config
        .add("GaussNoise", params(r#"{"var_limit": [10, 50], "p": 1.0}"#))
        .unwrap();
    config
        .add("RandomBrightnessContrast", params(r#"{"p": 1.0}"#))
        .unwrap();
    config
}

fn read(path: PathBuf) -> Vec<u8> {
    std::fs::read(&path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

#[test]
fn test_empty_directory_completes_with_empty_manifest() {
    let images = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let outcome = BatchExecutor::new(random_pipeline())
        .run(&RunRequest::new(images.path(), out.path()))
        .unwrap();

    let manifest = RunManifest::load(&outcome.run_dir.join("manifest.json")).unwrap();
    assert_eq!(manifest.state, RunState::Completed);
    assert_eq!(manifest.statistics.total_images, 0);
    assert_eq!(manifest.statistics.successful, 0);
    assert_eq!(manifest.statistics.failed, 0);
    assert!(manifest.results.is_empty());

    let progress = Progress::read(&outcome.run_dir.join(PROGRESS_FILE)).unwrap();
    assert_eq!((progress.current, progress.total), (0, 0));
}

#[test]
fn test_corrupt_image_is_isolated() {
    let images = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    five_images(images.path());
    std::fs::write(images.path().join("img_3.png"), b"this is not a png").unwrap();

    let outcome = BatchExecutor::new(random_pipeline())
        .run(&RunRequest::new(images.path(), out.path()).with_variants(2).with_seed(1))
        .unwrap();
    let manifest = outcome.manifest;

    assert_eq!(manifest.results.len(), 5);
    for (i, result) in manifest.results.iter().enumerate() {
        if i == 2 {
            assert_eq!(result.status, PairStatus::Error);
            assert!(!result.error.as_deref().unwrap_or("").is_empty());
        } else {
            assert_eq!(result.status, PairStatus::Success, "pair {}", i + 1);
            assert_eq!(result.outputs.len(), 2);
        }
    }
    assert_eq!(manifest.statistics.failed, 1);
    assert_eq!(manifest.statistics.successful, 4);
    assert_eq!(manifest.errors.len(), 1);
    assert!(manifest.errors[0].image.ends_with("img_3.png"));
}

#[test]
fn test_stop_flag_after_second_pair() {
    let images = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    five_images(images.path());

    let output_dir = out.path().to_path_buf();
    let options = ExecutorOptions::new().with_workers(1).with_progress(move |update| {
        if let ProgressUpdate::PairCompleted { current: 2, .. } = update {
            let run_dir = find_active_run(&output_dir).expect("run should be active");
            request_cancel(&run_dir).unwrap();
        }
    });

    let outcome = BatchExecutor::new(random_pipeline())
        .with_options(options)
        .run(&RunRequest::new(images.path(), out.path()).with_variants(1))
        .unwrap();

    assert_eq!(outcome.manifest.state, RunState::Canceled);
    assert_eq!(outcome.manifest.results.len(), 2);
    assert!(outcome.manifest.results.iter().all(|r| r.status == PairStatus::Success));
    assert_eq!(outcome.manifest.statistics.total_images, 5);
    assert_eq!(outcome.manifest.statistics.processed, 2);

    let progress = Progress::read(&outcome.run_dir.join(PROGRESS_FILE)).unwrap();
    assert_eq!((progress.current, progress.total), (2, 5));
    assert!(outcome.run_dir.join("stop.flag").exists());
    assert!(outcome.run_dir.join("manifest.json").exists());
}

#[test]
fn test_stop_flag_with_worker_pool() {
    let images = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    for i in 1..=24u8 {
        write_image(images.path(), &format!("img_{:02}.png", i), i);
    }

    let output_dir = out.path().to_path_buf();
    let options = ExecutorOptions::new().with_workers(3).with_progress(move |update| {
        if let ProgressUpdate::PairCompleted { current: 2, .. } = update {
            let run_dir = find_active_run(&output_dir).expect("run should be active");
            request_cancel(&run_dir).unwrap();
        }
    });

    let outcome = BatchExecutor::new(random_pipeline())
        .with_options(options)
        .run(&RunRequest::new(images.path(), out.path()).with_variants(1))
        .unwrap();

    let results = &outcome.manifest.results;
    assert_eq!(outcome.manifest.state, RunState::Canceled);
    assert!(results.len() >= 2 && results.len() < 24, "{} results", results.len());
    assert!(results
        .windows(2)
        .all(|w| w[0].input_image < w[1].input_image));

    let progress = Progress::read(&outcome.run_dir.join(PROGRESS_FILE)).unwrap();
    assert_eq!(progress.current, results.len());
    assert_eq!(progress.total, 24);
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let images = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_image(images.path(), "a.png", 7);
    write_image(images.path(), "b.png", 99);

    let request = RunRequest::new(images.path(), out.path())
        .with_variants(2)
        .with_seed(1234);
    let first = BatchExecutor::new(random_pipeline()).run(&request).unwrap();
    let second = BatchExecutor::new(random_pipeline()).run(&request).unwrap();
    assert_ne!(first.run_dir, second.run_dir);

    for name in ["a.png", "b.png"] {
        for variant in ["distortion_001", "distortion_002"] {
            let rel = Path::new(variant).join("images").join(name);
            assert_eq!(
                read(first.run_dir.join(&rel)),
                read(second.run_dir.join(&rel)),
                "{} differs between runs",
                rel.display()
            );
        }
        assert_ne!(
            read(first.run_dir.join("distortion_001/images").join(name)),
            read(first.run_dir.join("distortion_002/images").join(name)),
        );
    }
}

#[test]
fn test_parallel_run_matches_sequential() {
    let images = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    five_images(images.path());

    let request = RunRequest::new(images.path(), out.path())
        .with_variants(2)
        .with_seed(9);
    let sequential = BatchExecutor::new(random_pipeline()).run(&request).unwrap();
    let parallel = BatchExecutor::new(random_pipeline())
        .with_options(ExecutorOptions::new().with_workers(3))
        .run(&request)
        .unwrap();

    let inputs = |m: &RunManifest| -> Vec<PathBuf> {
        m.results.iter().map(|r| r.input_image.clone()).collect()
    };
    assert_eq!(inputs(&sequential.manifest), inputs(&parallel.manifest));

    for result in &sequential.manifest.results {
        for output in &result.outputs {
            assert_eq!(
                read(sequential.run_dir.join(&output.output_image_path)),
                read(parallel.run_dir.join(&output.output_image_path)),
            );
        }
    }
}

#[test]
fn test_geometric_pipeline_keeps_image_and_mask_aligned() {
    let images = tempfile::tempdir().unwrap();
    let masks = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_image(images.path(), "a.jpg", 3);
    write_mask(masks.path(), "a_mask.png");

    let mut config = PipelineConfig::new();
    config
        .add("RandomCrop", params(r#"{"height": 8, "width": 10}"#))
        .unwrap();
    config.add("Rotate", params(r#"{"limit": 45, "p": 1.0}"#)).unwrap();
    config.add("Transpose", params(r#"{"p": 1.0}"#)).unwrap();

    let outcome = BatchExecutor::new(config)
        .run(
            &RunRequest::new(images.path(), out.path())
                .with_masks(masks.path())
                .with_variants(3)
                .with_seed(5),
        )
        .unwrap();

    let result = &outcome.manifest.results[0];
    assert_eq!(result.status, PairStatus::Success);
    assert!(outcome.manifest.configuration.has_masks);
    for output in &result.outputs {
        let mask_rel = output.output_mask_path.as_ref().expect("mask output");
        assert!(mask_rel.ends_with("masks/a.png"));

        let image = image::open(outcome.run_dir.join(&output.output_image_path)).unwrap();
        let mask = image::open(outcome.run_dir.join(mask_rel)).unwrap();
        assert_eq!(image.width(), mask.width());
        assert_eq!(image.height(), mask.height());
        assert_eq!((image.width(), image.height()), (8, 10));
    }
}

#[test]
fn test_pixel_pipeline_leaves_mask_untouched() {
    let images = tempfile::tempdir().unwrap();
    let masks = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_image(images.path(), "a.png", 3);
    write_mask(masks.path(), "a.png");

    let mut config = PipelineConfig::new();
    config.add("InvertImg", params(r#"{"p": 1.0}"#)).unwrap();
    config
        .add("GaussNoise", params(r#"{"var_limit": 40, "p": 1.0}"#))
        .unwrap();
    config.add("MedianBlur", params(r#"{"blur_limit": 3, "p": 1.0}"#)).unwrap();

    let outcome = BatchExecutor::new(config)
        .run(
            &RunRequest::new(images.path(), out.path())
                .with_masks(masks.path())
                .with_variants(2),
        )
        .unwrap();

    let original = image::open(masks.path().join("a.png")).unwrap().to_luma8();
    for output in &outcome.manifest.results[0].outputs {
        let rel = output.output_mask_path.as_ref().unwrap();
        let written = image::open(outcome.run_dir.join(rel)).unwrap().to_luma8();
        assert_eq!(written, original);
    }
}

#[test]
fn test_layered_npy_mask_is_merged() {
    let images = tempfile::tempdir().unwrap();
    let masks = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_image(images.path(), "scan.png", 1);

    // (2, 12, 16) uint8 layers: left half in layer 0, bottom row in layer 1
    let mut data = vec![0u8; 2 * 12 * 16];
    for y in 0..12 {
        for x in 0..8 {
            data[y * 16 + x] = 1;
        }
    }
    for x in 0..16 {
        data[12 * 16 + 11 * 16 + x] = 1;
    }
    let header = "{'descr': '|u1', 'fortran_order': False, 'shape': (2, 12, 16), }";
    let padding = 64 - (10 + header.len() + 1) % 64;
    let mut npy = b"\x93NUMPY\x01\x00".to_vec();
    let header_len = (header.len() + padding + 1) as u16;
    npy.extend_from_slice(&header_len.to_le_bytes());
    npy.extend_from_slice(header.as_bytes());
    npy.extend(std::iter::repeat(b' ').take(padding));
    npy.push(b'\n');
    npy.extend_from_slice(&data);
    std::fs::write(masks.path().join("scan_gt.npy"), npy).unwrap();

    let mut config = PipelineConfig::new();
    config.add("ToGray", params(r#"{"p": 1.0}"#)).unwrap();

    let outcome = BatchExecutor::new(config)
        .run(
            &RunRequest::new(images.path(), out.path())
                .with_masks(masks.path())
                .with_variants(1),
        )
        .unwrap();

    let result = &outcome.manifest.results[0];
    assert!(result.input_mask.as_ref().unwrap().ends_with("scan_gt.npy"));
    let rel = result.outputs[0].output_mask_path.as_ref().unwrap();
    let mask = image::open(outcome.run_dir.join(rel)).unwrap().to_luma8();
    assert_eq!(mask.get_pixel(0, 0), &Luma([255]));
    assert_eq!(mask.get_pixel(15, 0), &Luma([0]));
    assert_eq!(mask.get_pixel(15, 11), &Luma([255]));
}

#[test]
fn test_unknown_transform_rejected_before_run() {
    let out = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::new();
    assert!(matches!(
        config.add("MadeUpTransform", Params::new()),
        Err(ConfigError::UnknownTransform(_))
    ));

    // Known to the catalog but not implemented by the built-in provider.
    config.add("ElasticTransform", Params::new()).unwrap();
    let images = tempfile::tempdir().unwrap();
    write_image(images.path(), "a.png", 0);

    let err = BatchExecutor::new(config)
        .run(&RunRequest::new(images.path(), out.path()))
        .unwrap_err();
    assert!(matches!(
        err,
        AugmentError::Config(ConfigError::UnsupportedTransform(_))
    ));
}
