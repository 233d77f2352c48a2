//! Geometric transforms: flips, rotations, affine and perspective warps,
//! lens distortion, resize and crops.
//!
//! Every random choice is drawn once per call and then applied to the image
//! (bilinear) and the mask (nearest neighbour) alike.

use super::params::{fires, uniform, uniform_int, ParamReader};
use super::boxed;
use crate::core::error::{ProviderError, TransformError};
use crate::core::types::Params;
use crate::provider::{ProviderRegistry, Sample, Transform};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage};
use imageproc::geometric_transformations::{
    rotate_about_center, warp, warp_with, Interpolation, Projection,
};
use rand::rngs::StdRng;
use rand::Rng;

/// Register geometric transforms.
pub fn register(registry: &mut ProviderRegistry) {
    registry.register("HorizontalFlip", |p: &Params| HorizontalFlip::from_params(p).map(boxed));
    registry.register("VerticalFlip", |p: &Params| VerticalFlip::from_params(p).map(boxed));
    registry.register("Transpose", |p: &Params| Transpose::from_params(p).map(boxed));
    registry.register("RandomRotate90", |p: &Params| RandomRotate90::from_params(p).map(boxed));
    registry.register("Rotate", |p: &Params| Rotate::from_params(p).map(boxed));
    registry.register("ShiftScaleRotate", |p: &Params| {
        ShiftScaleRotate::from_params(p).map(boxed)
    });
    registry.register("Perspective", |p: &Params| Perspective::from_params(p).map(boxed));
    registry.register("OpticalDistortion", |p: &Params| {
        OpticalDistortion::from_params(p).map(boxed)
    });
    registry.register("Resize", |p: &Params| Resize::from_params(p).map(boxed));
    registry.register("CenterCrop", |p: &Params| CenterCrop::from_params(p).map(boxed));
    registry.register("RandomCrop", |p: &Params| RandomCrop::from_params(p).map(boxed));
}

const IMAGE_FILL: Rgb<u8> = Rgb([0, 0, 0]);
const MASK_FILL: Luma<u8> = Luma([0]);

/// Apply one spatial operation to the image and, if present, the mask.
fn map_both<F, G>(sample: Sample, on_image: F, on_mask: G) -> Sample
where
    F: FnOnce(&RgbImage) -> RgbImage,
    G: FnOnce(&GrayImage) -> GrayImage,
{
    let image = on_image(&sample.image);
    let mask = sample.mask.as_ref().map(on_mask);
    Sample { image, mask }
}

fn transpose<P: Pixel>(img: &ImageBuffer<P, Vec<P::Subpixel>>) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let (width, height) = img.dimensions();
    ImageBuffer::from_fn(height, width, |x, y| *img.get_pixel(y, x))
}

fn warp_both(sample: Sample, projection: &Projection) -> Sample {
    map_both(
        sample,
        |img| warp(img, projection, Interpolation::Bilinear, IMAGE_FILL),
        |mask| warp(mask, projection, Interpolation::Nearest, MASK_FILL),
    )
}

/// Flip around the vertical axis.
#[derive(Debug, Clone)]
pub struct HorizontalFlip {
    p: f64,
}

impl HorizontalFlip {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &[])?;
        Ok(Self {
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for HorizontalFlip {
    fn name(&self) -> &str {
        "HorizontalFlip"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        Ok(map_both(
            sample,
            |img| imageops::flip_horizontal(img),
            |mask| imageops::flip_horizontal(mask),
        ))
    }
}

/// Flip around the horizontal axis.
#[derive(Debug, Clone)]
pub struct VerticalFlip {
    p: f64,
}

impl VerticalFlip {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &[])?;
        Ok(Self {
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for VerticalFlip {
    fn name(&self) -> &str {
        "VerticalFlip"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        Ok(map_both(
            sample,
            |img| imageops::flip_vertical(img),
            |mask| imageops::flip_vertical(mask),
        ))
    }
}

/// Swap rows and columns.
#[derive(Debug, Clone)]
pub struct Transpose {
    p: f64,
}

impl Transpose {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &[])?;
        Ok(Self {
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for Transpose {
    fn name(&self) -> &str {
        "Transpose"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        Ok(map_both(sample, |img| transpose(img), |mask| transpose(mask)))
    }
}

/// Rotate by 0, 90, 180 or 270 degrees.
#[derive(Debug, Clone)]
pub struct RandomRotate90 {
    p: f64,
}

impl RandomRotate90 {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &[])?;
        Ok(Self {
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for RandomRotate90 {
    fn name(&self) -> &str {
        "RandomRotate90"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let quarter_turns = rng.gen_range(0..4u8);
        Ok(match quarter_turns {
            1 => map_both(sample, |i| imageops::rotate90(i), |m| imageops::rotate90(m)),
            2 => map_both(sample, |i| imageops::rotate180(i), |m| imageops::rotate180(m)),
            3 => map_both(sample, |i| imageops::rotate270(i), |m| imageops::rotate270(m)),
            _ => sample,
        })
    }
}

/// Rotate about the centre by a random angle, keeping the canvas size.
#[derive(Debug, Clone)]
pub struct Rotate {
    limit: (f64, f64),
    p: f64,
}

impl Rotate {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["limit"])?;
        Ok(Self {
            limit: reader.symmetric_range("limit", (-90.0, 90.0))?,
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for Rotate {
    fn name(&self) -> &str {
        "Rotate"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        // positive angles turn counter-clockwise
        let theta = -(uniform(rng, self.limit).to_radians()) as f32;
        Ok(map_both(
            sample,
            |img| rotate_about_center(img, theta, Interpolation::Bilinear, IMAGE_FILL),
            |mask| rotate_about_center(mask, theta, Interpolation::Nearest, MASK_FILL),
        ))
    }
}

/// Random translation, scaling and rotation about the centre.
#[derive(Debug, Clone)]
pub struct ShiftScaleRotate {
    shift_limit: (f64, f64),
    scale_limit: (f64, f64),
    rotate_limit: (f64, f64),
    p: f64,
}

impl ShiftScaleRotate {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["shift_limit", "scale_limit", "rotate_limit"])?;
        let scale_limit = reader.symmetric_range("scale_limit", (-0.1, 0.1))?;
        if scale_limit.0 <= -1.0 || scale_limit.1 <= -1.0 {
            return Err(ProviderError::InvalidParameter {
                name: "scale_limit".to_string(),
                reason: "scale factor must stay above zero".to_string(),
            });
        }
        Ok(Self {
            shift_limit: reader.symmetric_range("shift_limit", (-0.0625, 0.0625))?,
            scale_limit,
            rotate_limit: reader.symmetric_range("rotate_limit", (-45.0, 45.0))?,
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for ShiftScaleRotate {
    fn name(&self) -> &str {
        "ShiftScaleRotate"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let (width, height) = sample.dimensions();
        let angle = uniform(rng, self.rotate_limit);
        let scale = 1.0 + uniform(rng, self.scale_limit);
        let dx = uniform(rng, self.shift_limit) * width as f64;
        let dy = uniform(rng, self.shift_limit) * height as f64;

        let cx = width as f32 / 2.0;
        let cy = height as f32 / 2.0;
        let projection = Projection::translate(cx + dx as f32, cy + dy as f32)
            * Projection::rotate(-(angle.to_radians()) as f32)
            * Projection::scale(scale as f32, scale as f32)
            * Projection::translate(-cx, -cy);

        Ok(warp_both(sample, &projection))
    }
}

/// Random four-point perspective warp, keeping the canvas size.
#[derive(Debug, Clone)]
pub struct Perspective {
    scale: (f64, f64),
    p: f64,
}

impl Perspective {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["scale", "keep_size", "fit_output", "pad_mode", "pad_val", "mask_pad_val"])?;
        Ok(Self {
            scale: reader.upper_range("scale", (0.05, 0.1))?,
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for Perspective {
    fn name(&self) -> &str {
        "Perspective"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let (width, height) = sample.dimensions();
        let (w, h) = (width as f32, height as f32);
        let from = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];

        // each corner moves inwards by a random fraction of the extent
        let inward = [(1.0, 1.0), (-1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)];
        let mut to = from;
        for (corner, (sx, sy)) in to.iter_mut().zip(inward) {
            corner.0 += sx * uniform(rng, self.scale) as f32 * w;
            corner.1 += sy * uniform(rng, self.scale) as f32 * h;
        }

        let projection =
            Projection::from_control_points(from, to).ok_or_else(|| TransformError::Failed {
                transform: "Perspective".to_string(),
                reason: "degenerate control points".to_string(),
            })?;

        Ok(warp_both(sample, &projection))
    }
}

/// Radial barrel/pincushion distortion around a jittered centre.
#[derive(Debug, Clone)]
pub struct OpticalDistortion {
    distort_limit: (f64, f64),
    shift_limit: (f64, f64),
    p: f64,
}

impl OpticalDistortion {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["distort_limit", "shift_limit", "mode"])?;
        Ok(Self {
            distort_limit: reader.symmetric_range("distort_limit", (-0.05, 0.05))?,
            shift_limit: reader.symmetric_range("shift_limit", (-0.05, 0.05))?,
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for OpticalDistortion {
    fn name(&self) -> &str {
        "OpticalDistortion"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let (width, height) = sample.dimensions();
        let k = uniform(rng, self.distort_limit) as f32;
        let dx = uniform(rng, self.shift_limit) as f32 * width as f32;
        let dy = uniform(rng, self.shift_limit) as f32 * height as f32;

        let cx = width as f32 / 2.0 + dx;
        let cy = height as f32 / 2.0 + dy;
        let fx = (width.max(1)) as f32;
        let fy = (height.max(1)) as f32;

        let mapping = move |x: f32, y: f32| {
            let nx = (x - cx) / fx;
            let ny = (y - cy) / fy;
            let r2 = nx * nx + ny * ny;
            let factor = 1.0 + k * r2 + k * r2 * r2;
            (cx + nx * factor * fx, cy + ny * factor * fy)
        };

        Ok(map_both(
            sample,
            |img| warp_with(img, mapping, Interpolation::Bilinear, IMAGE_FILL),
            |mask| warp_with(mask, mapping, Interpolation::Nearest, MASK_FILL),
        ))
    }
}

/// Resize to a fixed size.
#[derive(Debug, Clone)]
pub struct Resize {
    height: u32,
    width: u32,
    p: f64,
}

impl Resize {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["height", "width"])?;
        Ok(Self {
            height: reader.required_u32("height")?,
            width: reader.required_u32("width")?,
            p: reader.probability(1.0)?,
        })
    }
}

impl Transform for Resize {
    fn name(&self) -> &str {
        "Resize"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let (width, height) = (self.width, self.height);
        Ok(map_both(
            sample,
            |img| imageops::resize(img, width, height, FilterType::Triangle),
            |mask| imageops::resize(mask, width, height, FilterType::Nearest),
        ))
    }
}

fn check_crop(
    transform: &str,
    sample: &Sample,
    width: u32,
    height: u32,
) -> Result<(), TransformError> {
    let (w, h) = sample.dimensions();
    if width > w || height > h {
        return Err(TransformError::Failed {
            transform: transform.to_string(),
            reason: format!(
                "crop {}x{} is larger than the image {}x{}",
                height, width, h, w
            ),
        });
    }
    Ok(())
}

fn crop_both(sample: Sample, x: u32, y: u32, width: u32, height: u32) -> Sample {
    map_both(
        sample,
        |img| imageops::crop_imm(img, x, y, width, height).to_image(),
        |mask| imageops::crop_imm(mask, x, y, width, height).to_image(),
    )
}

/// Crop the central region.
#[derive(Debug, Clone)]
pub struct CenterCrop {
    height: u32,
    width: u32,
    p: f64,
}

impl CenterCrop {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["height", "width"])?;
        Ok(Self {
            height: reader.required_u32("height")?,
            width: reader.required_u32("width")?,
            p: reader.probability(1.0)?,
        })
    }
}

impl Transform for CenterCrop {
    fn name(&self) -> &str {
        "CenterCrop"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        check_crop(self.name(), &sample, self.width, self.height)?;
        let (w, h) = sample.dimensions();
        let x = (w - self.width) / 2;
        let y = (h - self.height) / 2;
        Ok(crop_both(sample, x, y, self.width, self.height))
    }
}

/// Crop a random region.
#[derive(Debug, Clone)]
pub struct RandomCrop {
    height: u32,
    width: u32,
    p: f64,
}

impl RandomCrop {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["height", "width"])?;
        Ok(Self {
            height: reader.required_u32("height")?,
            width: reader.required_u32("width")?,
            p: reader.probability(1.0)?,
        })
    }
}

impl Transform for RandomCrop {
    fn name(&self) -> &str {
        "RandomCrop"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        check_crop(self.name(), &sample, self.width, self.height)?;
        let (w, h) = sample.dimensions();
        let x = uniform_int(rng, (0, (w - self.width) as i64)) as u32;
        let y = uniform_int(rng, (0, (h - self.height) as i64)) as u32;
        Ok(crop_both(sample, x, y, self.width, self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params(json: &str) -> Params {
        serde_json::from_str(json).unwrap()
    }

    /// 6x4 image with a 2x2 white block in the top-left corner of the mask.
    fn sample() -> Sample {
        let image = RgbImage::from_fn(6, 4, |x, y| Rgb([(x * 40) as u8, (y * 60) as u8, 7]));
        let mask = GrayImage::from_fn(6, 4, |x, y| Luma([if x < 2 && y < 2 { 255 } else { 0 }]));
        Sample::new(image, Some(mask))
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_flip_moves_image_and_mask_together() {
        let t = HorizontalFlip::from_params(&params(r#"{"p": 1.0}"#)).unwrap();
        let out = t.apply(sample(), &mut rng()).unwrap();
        let mask = out.mask.unwrap();
        assert_eq!(mask.get_pixel(5, 0), &Luma([255]));
        assert_eq!(mask.get_pixel(0, 0), &Luma([0]));
        assert_eq!(out.image.get_pixel(5, 0), &Rgb([0, 0, 7]));
    }

    #[test]
    fn test_probability_zero_is_identity() {
        let t = VerticalFlip::from_params(&params(r#"{"p": 0.0}"#)).unwrap();
        let input = sample();
        let out = t.apply(input.clone(), &mut rng()).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_transpose_swaps_extents() {
        let t = Transpose::from_params(&params(r#"{"p": 1.0}"#)).unwrap();
        let out = t.apply(sample(), &mut rng()).unwrap();
        assert_eq!(out.image.dimensions(), (4, 6));
        assert_eq!(out.mask.unwrap().dimensions(), (4, 6));
    }

    #[test]
    fn test_random_rotate90_keeps_pair_consistent() {
        let t = RandomRotate90::from_params(&params(r#"{"p": 1.0}"#)).unwrap();
        for seed in 0..8 {
            let out = t.apply(sample(), &mut StdRng::seed_from_u64(seed)).unwrap();
            let mask = out.mask.unwrap();
            assert_eq!(mask.dimensions(), out.image.dimensions());
            // the white block is always in some corner
            let white = mask.pixels().filter(|p| p.0[0] == 255).count();
            assert_eq!(white, 4);
        }
    }

    #[test]
    fn test_rotate_is_deterministic_per_seed() {
        let t = Rotate::from_params(&params(r#"{"limit": 30, "p": 1.0, "border_mode": 0}"#)).unwrap();
        let a = t.apply(sample(), &mut rng()).unwrap();
        let b = t.apply(sample(), &mut rng()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.image.dimensions(), (6, 4));
    }

    #[test]
    fn test_mask_stays_binary_after_warps() {
        let transforms: Vec<Box<dyn Transform>> = vec![
            Box::new(Rotate::from_params(&params(r#"{"limit": 45, "p": 1.0}"#)).unwrap()),
            Box::new(ShiftScaleRotate::from_params(&params(r#"{"p": 1.0}"#)).unwrap()),
            Box::new(Perspective::from_params(&params(r#"{"scale": [0.05, 0.1], "p": 1.0}"#)).unwrap()),
            Box::new(OpticalDistortion::from_params(&params(r#"{"distort_limit": 0.5, "p": 1.0}"#)).unwrap()),
        ];
        for t in transforms {
            let out = t.apply(sample(), &mut rng()).unwrap();
            let mask = out.mask.unwrap();
            assert_eq!(mask.dimensions(), out.image.dimensions(), "{}", t.name());
            assert!(mask.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255), "{}", t.name());
        }
    }

    #[test]
    fn test_resize_and_crops() {
        let resize = Resize::from_params(&params(r#"{"height": 8, "width": 3}"#)).unwrap();
        let out = resize.apply(sample(), &mut rng()).unwrap();
        assert_eq!(out.image.dimensions(), (3, 8));
        assert_eq!(out.mask.unwrap().dimensions(), (3, 8));

        let crop = CenterCrop::from_params(&params(r#"{"height": 2, "width": 2}"#)).unwrap();
        let out = crop.apply(sample(), &mut rng()).unwrap();
        assert_eq!(out.image.dimensions(), (2, 2));

        let crop = RandomCrop::from_params(&params(r#"{"height": 3, "width": 5}"#)).unwrap();
        let out = crop.apply(sample(), &mut rng()).unwrap();
        assert_eq!(out.mask.unwrap().dimensions(), (5, 3));
    }

    #[test]
    fn test_oversized_crop_fails() {
        let crop = CenterCrop::from_params(&params(r#"{"height": 10, "width": 10}"#)).unwrap();
        assert!(crop.apply(sample(), &mut rng()).is_err());
    }

    #[test]
    fn test_resize_requires_size() {
        assert!(Resize::from_params(&params(r#"{"height": 8}"#)).is_err());
    }

    #[test]
    fn test_rotate_rejects_non_numeric_limit() {
        let err = Rotate::from_params(&params(r#"{"limit": "wide"}"#)).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidParameter { ref name, .. } if name == "limit"));
    }
}
