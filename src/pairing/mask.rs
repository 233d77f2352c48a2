//! Mask loading, overlay rendering and batch `.npy` conversion.

use super::npy::read_npy;
use crate::core::error::{AugmentError, MaskError};
use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{ArrayD, Axis};
use std::path::{Path, PathBuf};

/// Load a mask, logging and swallowing any failure.
///
/// A bad mask only degrades its pair to image-only.
pub fn load_mask(path: &Path) -> Option<GrayImage> {
    match try_load_mask(path) {
        Ok(mask) => Some(mask),
        Err(e) => {
            log::warn!("Ignoring mask {}: {}", path.display(), e);
            None
        }
    }
}

/// Load a mask as a single-channel 8-bit image.
///
/// Image files are converted to grayscale. `.npy` arrays are squeezed; a
/// remaining 3-D array is treated as stacked region layers and merged with an
/// element-wise maximum. Arrays whose maximum is at most 1 are scaled to 255.
pub fn try_load_mask(path: &Path) -> Result<GrayImage, MaskError> {
    let is_npy = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("npy"));

    if is_npy {
        let array = read_npy(path)?;
        array_to_mask(array, path)
    } else {
        Ok(image::open(path)?.to_luma8())
    }
}

/// Convert a raw array to a mask image.
pub fn array_to_mask(array: ArrayD<f64>, path: &Path) -> Result<GrayImage, MaskError> {
    let mut array = array;
    for axis in (0..array.ndim()).rev() {
        if array.shape()[axis] == 1 {
            array = array.index_axis_move(Axis(axis), 0);
        }
    }

    if array.ndim() == 3 {
        log::info!(
            "Merging {} regions in {}",
            array.shape()[0],
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        );
        if array.shape()[0] == 0 {
            return Err(MaskError::UnsupportedShape(array.shape().to_vec()));
        }
        array = array.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, v| acc.max(*v));
    }

    let (height, width) = match array.shape() {
        [h, w] if *h > 0 && *w > 0 => (*h, *w),
        other => return Err(MaskError::UnsupportedShape(other.to_vec())),
    };
    let (width_u32, height_u32) = match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => return Err(MaskError::UnsupportedShape(vec![height, width])),
    };

    let max = array.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let scale = if max <= 1.0 { 255.0 } else { 1.0 };

    Ok(GrayImage::from_fn(width_u32, height_u32, |x, y| {
        let v = array[&[y as usize, x as usize][..]] * scale;
        // integer cast keeping the low 8 bits
        Luma([v as i64 as u8])
    }))
}

/// Highlight masked pixels: darken them and blend in cyan.
pub fn overlay(image: &RgbImage, mask: &GrayImage, alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let src = *image.get_pixel(x, y);
        let masked = x < mask.width() && y < mask.height() && mask.get_pixel(x, y).0[0] > 0;
        if !masked {
            return src;
        }
        let alpha = alpha as f64;
        let cyan = [0.0f64, 255.0, 255.0];
        let mut out = [0u8; 3];
        for c in 0..3 {
            let darkened = src.0[c] as f64 * 0.5;
            out[c] = (darkened * (1.0 - alpha) + cyan[c] * alpha) as u8;
        }
        Rgb(out)
    })
}

/// Outcome of a batch mask conversion.
#[derive(Debug, Clone, Default)]
pub struct ConversionSummary {
    /// Written PNG files.
    pub converted: Vec<PathBuf>,
    /// Source files that could not be converted, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Convert every `.npy` mask in `src` to a same-basename PNG in `dst`.
pub fn convert_masks(src: &Path, dst: &Path) -> Result<ConversionSummary, AugmentError> {
    std::fs::create_dir_all(dst)?;

    let mut sources: Vec<PathBuf> = std::fs::read_dir(src)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |e| e.eq_ignore_ascii_case("npy"))
        })
        .collect();
    sources.sort();

    log::info!("Converting {} masks from .npy to .png", sources.len());

    let mut summary = ConversionSummary::default();
    for source in sources {
        let Some(stem) = source.file_stem() else {
            continue;
        };
        let target = dst.join(format!("{}.png", stem.to_string_lossy()));
        let converted = try_load_mask(&source)
            .and_then(|mask| mask.save(&target).map_err(MaskError::from));
        match converted {
            Ok(()) => summary.converted.push(target),
            Err(e) => {
                log::warn!("Error converting {}: {}", source.display(), e);
                summary.skipped.push((source, e.to_string()));
            }
        }
    }

    Ok(summary)
}
