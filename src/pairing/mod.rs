//! Image discovery and mask resolution.
//!
//! Every recognised image in the image directory becomes one
//! [`ImageMaskPair`]. Masks are looked up by basename in a fixed order:
//!
//! 1. `<stem>.<ext>`
//! 2. `<stem>_mask.<ext>`
//! 3. `<stem>_gt.<ext>`
//!
//! where `<ext>` runs over [`MASK_EXTENSIONS`]. The first existing file wins.

pub mod mask;
pub mod npy;

use crate::core::error::PairingError;
use crate::core::types::ImageMaskPair;
use image::GenericImageView;
use std::path::{Path, PathBuf};

pub use mask::{convert_masks, load_mask, overlay, try_load_mask, ConversionSummary};

/// Image extensions picked up by the scanner (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

/// Mask extensions, in lookup order.
pub const MASK_EXTENSIONS: &[&str] = &[
    "npy", "png", "PNG", "tif", "TIF", "tiff", "TIFF", "bmp", "BMP",
];

/// Basename suffixes, in lookup order.
pub const MASK_SUFFIXES: &[&str] = &["", "_mask", "_gt"];

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// List recognised image files in `dir`, sorted by path.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, PairingError> {
    let entries = std::fs::read_dir(dir).map_err(|source| PairingError::UnreadableDirectory {
        path: dir.display().to_string(),
        source,
    })?;

    let mut images: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_image_extension(path))
        .collect();
    images.sort();
    Ok(images)
}

/// Resolve the mask belonging to `image_path`, if any.
pub fn find_mask_for_image(image_path: &Path, mask_dir: &Path) -> Option<PathBuf> {
    let stem = image_path.file_stem()?.to_string_lossy();

    MASK_SUFFIXES.iter().find_map(|suffix| {
        MASK_EXTENSIONS.iter().find_map(|ext| {
            let candidate = mask_dir.join(format!("{}{}.{}", stem, suffix, ext));
            candidate.is_file().then_some(candidate)
        })
    })
}

/// Scan `image_dir` and pair each image with its mask from `mask_dir`.
///
/// A mask directory that is absent or missing on disk yields image-only pairs.
pub fn scan_pairs(
    image_dir: &Path,
    mask_dir: Option<&Path>,
) -> Result<Vec<ImageMaskPair>, PairingError> {
    let images = list_images(image_dir)?;
    let mask_dir = mask_dir.filter(|dir| {
        let exists = dir.is_dir();
        if !exists {
            log::warn!("Mask directory {} not found; using image-only pairs", dir.display());
        }
        exists
    });

    let pairs: Vec<ImageMaskPair> = images
        .into_iter()
        .map(|image| {
            let mask = mask_dir.and_then(|dir| find_mask_for_image(&image, dir));
            ImageMaskPair::new(image, mask)
        })
        .collect();

    log::info!(
        "Found {} images ({} with masks) in {}",
        pairs.len(),
        pairs.iter().filter(|p| p.has_mask()).count(),
        image_dir.display()
    );
    Ok(pairs)
}

/// Check that image and mask share height and width. Channels may differ.
pub fn validate_dimensions<I, M>(image: &I, mask: &M) -> Result<(), PairingError>
where
    I: GenericImageView,
    M: GenericImageView,
{
    let (image_width, image_height) = image.dimensions();
    let (mask_width, mask_height) = mask.dimensions();
    if (image_width, image_height) == (mask_width, mask_height) {
        Ok(())
    } else {
        Err(PairingError::DimensionMismatch {
            image_height,
            image_width,
            mask_height,
            mask_width,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};
    use std::fs;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_list_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.JPG");
        touch(dir.path(), "a.png");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "c.tiff");
        fs::create_dir(dir.path().join("sub.png")).unwrap();

        let names: Vec<String> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.JPG", "c.tiff"]);
    }

    #[test]
    fn test_same_basename_beats_suffix() {
        let masks = tempfile::tempdir().unwrap();
        touch(masks.path(), "foo_mask.png");
        let plain = touch(masks.path(), "foo.png");

        let found = find_mask_for_image(Path::new("/images/foo.jpg"), masks.path());
        assert_eq!(found, Some(plain));
    }

    #[test]
    fn test_suffix_tiers() {
        let masks = tempfile::tempdir().unwrap();
        let gt = touch(masks.path(), "bar_gt.tif");
        assert_eq!(
            find_mask_for_image(Path::new("bar.png"), masks.path()),
            Some(gt)
        );

        let mask = touch(masks.path(), "bar_mask.bmp");
        assert_eq!(
            find_mask_for_image(Path::new("bar.png"), masks.path()),
            Some(mask)
        );
    }

    #[test]
    fn test_npy_preferred_within_tier() {
        let masks = tempfile::tempdir().unwrap();
        touch(masks.path(), "img.png");
        let npy = touch(masks.path(), "img.npy");
        assert_eq!(
            find_mask_for_image(Path::new("img.jpg"), masks.path()),
            Some(npy)
        );
    }

    #[test]
    fn test_scan_pairs() {
        let images = tempfile::tempdir().unwrap();
        let masks = tempfile::tempdir().unwrap();
        touch(images.path(), "one.png");
        touch(images.path(), "two.jpg");
        touch(masks.path(), "one_mask.png");

        let pairs = scan_pairs(images.path(), Some(masks.path())).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs[0].has_mask());
        assert!(!pairs[1].has_mask());
    }

    #[test]
    fn test_missing_mask_dir_means_no_masks() {
        let images = tempfile::tempdir().unwrap();
        touch(images.path(), "one.png");
        let pairs = scan_pairs(images.path(), Some(&images.path().join("nope"))).unwrap();
        assert_eq!(pairs.len(), 1);
        assert!(!pairs[0].has_mask());
    }

    #[test]
    fn test_missing_image_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            scan_pairs(&dir.path().join("missing"), None),
            Err(PairingError::UnreadableDirectory { .. })
        ));
    }

    #[test]
    fn test_validate_dimensions_ignores_channels() {
        let image = RgbImage::new(4, 3);
        assert!(validate_dimensions(&image, &GrayImage::new(4, 3)).is_ok());

        let err = validate_dimensions(&image, &GrayImage::new(3, 4)).unwrap_err();
        assert!(err.to_string().contains("3x4"));
    }
}
