//! Image codec seam.
//!
//! The executor never touches image files directly. It decodes and encodes
//! through an [`ImageCodec`], so tests can substitute failing or in-memory
//! codecs.

use crate::core::error::CodecError;
use image::{GrayImage, RgbImage};
use std::path::Path;

/// Decodes source images and encodes augmented outputs.
pub trait ImageCodec: Send + Sync {
    /// Decode an image file as 8-bit RGB.
    fn decode_image(&self, path: &Path) -> Result<RgbImage, CodecError>;

    /// Encode an image; the format follows the file extension.
    fn encode_image(&self, image: &RgbImage, path: &Path) -> Result<(), CodecError>;

    /// Encode a single-channel mask; the format follows the file extension.
    fn encode_mask(&self, mask: &GrayImage, path: &Path) -> Result<(), CodecError>;
}

/// [`ImageCodec`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateCodec;

impl ImageCodec for ImageCrateCodec {
    fn decode_image(&self, path: &Path) -> Result<RgbImage, CodecError> {
        image::open(path)
            .map(|img| img.to_rgb8())
            .map_err(|source| CodecError::Decode {
                path: path.display().to_string(),
                source,
            })
    }

    fn encode_image(&self, image: &RgbImage, path: &Path) -> Result<(), CodecError> {
        image.save(path).map_err(|source| CodecError::Encode {
            path: path.display().to_string(),
            source,
        })
    }

    fn encode_mask(&self, mask: &GrayImage, path: &Path) -> Result<(), CodecError> {
        mask.save(path).map_err(|source| CodecError::Encode {
            path: path.display().to_string(),
            source,
        })
    }
}
