//! Pixel-level transforms: blur, noise, tone and colour adjustments.
//!
//! These only ever receive the image; the composed pipeline keeps the mask
//! out of their reach.

use super::boxed;
use super::params::{fires, to_u8, uniform, uniform_int, ParamReader};
use crate::core::error::{ProviderError, TransformError};
use crate::core::types::Params;
use crate::provider::{ProviderRegistry, Sample, Transform};
use image::{imageops, GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

/// Register pixel-level transforms.
pub fn register(registry: &mut ProviderRegistry) {
    registry.register("GaussianBlur", |p: &Params| GaussianBlur::from_params(p).map(boxed));
    registry.register("MedianBlur", |p: &Params| MedianBlur::from_params(p).map(boxed));
    registry.register("GaussNoise", |p: &Params| GaussNoise::from_params(p).map(boxed));
    registry.register("RandomBrightnessContrast", |p: &Params| {
        RandomBrightnessContrast::from_params(p).map(boxed)
    });
    registry.register("ToGray", |p: &Params| ToGray::from_params(p).map(boxed));
    registry.register("InvertImg", |p: &Params| InvertImg::from_params(p).map(boxed));
    registry.register("Solarize", |p: &Params| Solarize::from_params(p).map(boxed));
    registry.register("Posterize", |p: &Params| Posterize::from_params(p).map(boxed));
    registry.register("Equalize", |p: &Params| Equalize::from_params(p).map(boxed));
    registry.register("Sharpen", |p: &Params| Sharpen::from_params(p).map(boxed));
    registry.register("ChannelShuffle", |p: &Params| ChannelShuffle::from_params(p).map(boxed));
    registry.register("Normalize", |p: &Params| Normalize::from_params(p).map(boxed));
}

/// Replace the image of a sample, keeping whatever else it carries.
fn with_image(sample: Sample, image: RgbImage) -> Sample {
    Sample {
        image,
        mask: sample.mask,
    }
}

/// Apply a per-channel-value function to every pixel.
fn map_values<F: Fn(u8) -> u8>(image: &mut RgbImage, f: F) {
    for pixel in image.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = f(*c);
        }
    }
}

/// Random odd kernel size from an inclusive range.
fn odd_kernel(rng: &mut StdRng, (lo, hi): (f64, f64)) -> u32 {
    let k = uniform_int(rng, (lo.round() as i64, hi.round() as i64)).max(1);
    (if k % 2 == 0 { k + 1 } else { k }) as u32
}

/// Gaussian blur with a random odd kernel size.
#[derive(Debug, Clone)]
pub struct GaussianBlur {
    blur_limit: (f64, f64),
    sigma_limit: (f64, f64),
    p: f64,
}

impl GaussianBlur {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["blur_limit", "sigma_limit"])?;
        Ok(Self {
            blur_limit: reader.range("blur_limit", (3.0, 7.0))?,
            sigma_limit: reader.range("sigma_limit", (0.0, 0.0))?,
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for GaussianBlur {
    fn name(&self) -> &str {
        "GaussianBlur"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let ksize = odd_kernel(rng, self.blur_limit);
        let sigma = uniform(rng, self.sigma_limit);
        // kernel-size rule of thumb when no sigma is configured
        let sigma = if sigma > 0.0 {
            sigma
        } else {
            0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8
        };
        let blurred = gaussian_blur_f32(&sample.image, sigma.max(0.1) as f32);
        Ok(with_image(sample, blurred))
    }
}

/// Median blur with a random odd aperture.
#[derive(Debug, Clone)]
pub struct MedianBlur {
    blur_limit: (f64, f64),
    p: f64,
}

impl MedianBlur {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["blur_limit"])?;
        let blur_limit = reader.upper_range("blur_limit", (3.0, 7.0))?;
        Ok(Self {
            blur_limit: (blur_limit.0.max(3.0), blur_limit.1.max(3.0)),
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for MedianBlur {
    fn name(&self) -> &str {
        "MedianBlur"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let radius = odd_kernel(rng, self.blur_limit) / 2;
        let blurred = median_filter(&sample.image, radius, radius);
        Ok(with_image(sample, blurred))
    }
}

/// Additive Gaussian noise with a random variance.
#[derive(Debug, Clone)]
pub struct GaussNoise {
    var_limit: (f64, f64),
    mean: f64,
    p: f64,
}

impl GaussNoise {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["var_limit", "mean", "per_channel"])?;
        let var_limit = reader.upper_range("var_limit", (10.0, 50.0))?;
        if var_limit.0 < 0.0 || var_limit.1 < 0.0 {
            return Err(ProviderError::InvalidParameter {
                name: "var_limit".to_string(),
                reason: "variance cannot be negative".to_string(),
            });
        }
        Ok(Self {
            var_limit,
            mean: reader.float("mean", 0.0)?,
            p: reader.probability(0.5)?,
        })
    }
}

/// Standard normal sample (Box-Muller).
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

impl Transform for GaussNoise {
    fn name(&self) -> &str {
        "GaussNoise"
    }

    fn apply(&self, mut sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let sigma = uniform(rng, self.var_limit).sqrt();
        for pixel in sample.image.pixels_mut() {
            for c in pixel.0.iter_mut() {
                let noise = self.mean + sigma * standard_normal(rng);
                *c = to_u8(*c as f64 + noise);
            }
        }
        Ok(sample)
    }
}

/// Random linear brightness and contrast change.
#[derive(Debug, Clone)]
pub struct RandomBrightnessContrast {
    brightness_limit: (f64, f64),
    contrast_limit: (f64, f64),
    p: f64,
}

impl RandomBrightnessContrast {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(
            params,
            &["brightness_limit", "contrast_limit", "brightness_by_max", "ensure_safe_range"],
        )?;
        Ok(Self {
            brightness_limit: reader.symmetric_range("brightness_limit", (-0.2, 0.2))?,
            contrast_limit: reader.symmetric_range("contrast_limit", (-0.2, 0.2))?,
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for RandomBrightnessContrast {
    fn name(&self) -> &str {
        "RandomBrightnessContrast"
    }

    fn apply(&self, mut sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let alpha = 1.0 + uniform(rng, self.contrast_limit);
        let beta = uniform(rng, self.brightness_limit) * 255.0;
        map_values(&mut sample.image, |v| to_u8(alpha * v as f64 + beta));
        Ok(sample)
    }
}

/// Convert to grayscale, keeping three channels.
#[derive(Debug, Clone)]
pub struct ToGray {
    p: f64,
}

impl ToGray {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["num_output_channels", "method"])?;
        Ok(Self {
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for ToGray {
    fn name(&self) -> &str {
        "ToGray"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let gray = imageops::grayscale(&sample.image);
        let image = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
            let Luma([v]) = *gray.get_pixel(x, y);
            Rgb([v, v, v])
        });
        Ok(with_image(sample, image))
    }
}

/// Invert every channel value.
#[derive(Debug, Clone)]
pub struct InvertImg {
    p: f64,
}

impl InvertImg {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &[])?;
        Ok(Self {
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for InvertImg {
    fn name(&self) -> &str {
        "InvertImg"
    }

    fn apply(&self, mut sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        imageops::invert(&mut sample.image);
        Ok(sample)
    }
}

/// Invert values at or above a random threshold.
#[derive(Debug, Clone)]
pub struct Solarize {
    threshold: (f64, f64),
    p: f64,
}

impl Solarize {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["threshold", "threshold_range"])?;
        Ok(Self {
            threshold: reader.range("threshold", (128.0, 128.0))?,
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for Solarize {
    fn name(&self) -> &str {
        "Solarize"
    }

    fn apply(&self, mut sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let threshold = uniform(rng, self.threshold);
        map_values(&mut sample.image, |v| {
            if v as f64 >= threshold {
                255 - v
            } else {
                v
            }
        });
        Ok(sample)
    }
}

/// Keep only the top bits of each channel.
#[derive(Debug, Clone)]
pub struct Posterize {
    num_bits: (f64, f64),
    p: f64,
}

impl Posterize {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["num_bits"])?;
        let num_bits = reader.range("num_bits", (4.0, 4.0))?;
        if [num_bits.0, num_bits.1].iter().any(|b| !(0.0..=8.0).contains(b)) {
            return Err(ProviderError::InvalidParameter {
                name: "num_bits".to_string(),
                reason: "bit count must be between 0 and 8".to_string(),
            });
        }
        Ok(Self {
            num_bits,
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for Posterize {
    fn name(&self) -> &str {
        "Posterize"
    }

    fn apply(&self, mut sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let bits = uniform_int(rng, (self.num_bits.0 as i64, self.num_bits.1 as i64)) as u32;
        let keep: u8 = if bits == 0 { 0 } else { !((1u16 << (8 - bits)) - 1) as u8 };
        map_values(&mut sample.image, |v| v & keep);
        Ok(sample)
    }
}

/// Per-channel histogram equalisation.
#[derive(Debug, Clone)]
pub struct Equalize {
    p: f64,
}

impl Equalize {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["mode", "by_channels"])?;
        Ok(Self {
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for Equalize {
    fn name(&self) -> &str {
        "Equalize"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let (width, height) = sample.dimensions();
        let channels: Vec<GrayImage> = (0..3)
            .map(|c| {
                let plane = GrayImage::from_fn(width, height, |x, y| {
                    Luma([sample.image.get_pixel(x, y).0[c]])
                });
                equalize_histogram(&plane)
            })
            .collect();
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                channels[0].get_pixel(x, y).0[0],
                channels[1].get_pixel(x, y).0[0],
                channels[2].get_pixel(x, y).0[0],
            ])
        });
        Ok(with_image(sample, image))
    }
}

/// Unsharp masking with random strength and lightness.
#[derive(Debug, Clone)]
pub struct Sharpen {
    alpha: (f64, f64),
    lightness: (f64, f64),
    p: f64,
}

impl Sharpen {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["alpha", "lightness", "method", "kernel_size", "sigma"])?;
        Ok(Self {
            alpha: reader.range("alpha", (0.2, 0.5))?,
            lightness: reader.range("lightness", (0.5, 1.0))?,
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for Sharpen {
    fn name(&self) -> &str {
        "Sharpen"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let alpha = uniform(rng, self.alpha);
        let lightness = uniform(rng, self.lightness);
        let blurred = gaussian_blur_f32(&sample.image, 1.0);
        let image = RgbImage::from_fn(sample.image.width(), sample.image.height(), |x, y| {
            let src = sample.image.get_pixel(x, y).0;
            let blur = blurred.get_pixel(x, y).0;
            let mut out = [0u8; 3];
            for c in 0..3 {
                let v = src[c] as f64;
                let sharp = lightness * v + (v - blur[c] as f64);
                out[c] = to_u8((1.0 - alpha) * v + alpha * sharp);
            }
            Rgb(out)
        });
        Ok(with_image(sample, image))
    }
}

/// Random permutation of the RGB channels.
#[derive(Debug, Clone)]
pub struct ChannelShuffle {
    p: f64,
}

impl ChannelShuffle {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &[])?;
        Ok(Self {
            p: reader.probability(0.5)?,
        })
    }
}

impl Transform for ChannelShuffle {
    fn name(&self) -> &str {
        "ChannelShuffle"
    }

    fn apply(&self, mut sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        let mut order = [0usize, 1, 2];
        order.shuffle(rng);
        for pixel in sample.image.pixels_mut() {
            let src = pixel.0;
            pixel.0 = [src[order[0]], src[order[1]], src[order[2]]];
        }
        Ok(sample)
    }
}

/// `(v / max_pixel_value - mean) / std`, stored back into 8 bits.
///
/// The normalised values mostly fall in a few units around zero, so the
/// persisted image is nearly black. Configuration validation warns about it.
#[derive(Debug, Clone)]
pub struct Normalize {
    mean: Vec<f64>,
    std: Vec<f64>,
    max_pixel_value: f64,
    p: f64,
}

impl Normalize {
    pub fn from_params(params: &Params) -> Result<Self, ProviderError> {
        let reader = ParamReader::new(params, &["mean", "std", "max_pixel_value", "normalization"])?;
        let std = reader.float_list("std", &[0.229, 0.224, 0.225], 3)?;
        if std.iter().any(|s| *s == 0.0) {
            return Err(ProviderError::InvalidParameter {
                name: "std".to_string(),
                reason: "standard deviation cannot be zero".to_string(),
            });
        }
        let max_pixel_value = reader.float("max_pixel_value", 255.0)?;
        if max_pixel_value <= 0.0 {
            return Err(ProviderError::InvalidParameter {
                name: "max_pixel_value".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(Self {
            mean: reader.float_list("mean", &[0.485, 0.456, 0.406], 3)?,
            std,
            max_pixel_value,
            p: reader.probability(1.0)?,
        })
    }
}

impl Transform for Normalize {
    fn name(&self) -> &str {
        "Normalize"
    }

    fn apply(&self, mut sample: Sample, rng: &mut StdRng) -> Result<Sample, TransformError> {
        if !fires(rng, self.p) {
            return Ok(sample);
        }
        for pixel in sample.image.pixels_mut() {
            for (c, v) in pixel.0.iter_mut().enumerate() {
                let normalized = (*v as f64 / self.max_pixel_value - self.mean[c]) / self.std[c];
                *v = to_u8(normalized);
            }
        }
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params(json: &str) -> Params {
        serde_json::from_str(json).unwrap()
    }

    fn gradient() -> Sample {
        Sample::image_only(RgbImage::from_fn(16, 8, |x, y| {
            Rgb([(x * 16) as u8, (y * 32) as u8, ((x + y) * 8) as u8])
        }))
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(3)
    }

    #[test]
    fn test_every_builtin_pixel_transform_keeps_extent() {
        let mut registry = ProviderRegistry::new("pixel");
        register(&mut registry);
        let always: Params = params(r#"{"p": 1.0}"#);
        for name in crate::provider::CapabilityProvider::supported(&registry) {
            let t = crate::provider::CapabilityProvider::instantiate(&registry, name, &always)
                .unwrap();
            let out = t.apply(gradient(), &mut rng()).unwrap();
            assert_eq!(out.image.dimensions(), (16, 8), "{}", name);
        }
    }

    #[test]
    fn test_invert_twice_is_identity() {
        let t = InvertImg::from_params(&params(r#"{"p": 1.0}"#)).unwrap();
        let once = t.apply(gradient(), &mut rng()).unwrap();
        let twice = t.apply(once, &mut rng()).unwrap();
        assert_eq!(twice, gradient());
    }

    #[test]
    fn test_to_gray_equalizes_channels() {
        let t = ToGray::from_params(&params(r#"{"p": 1.0}"#)).unwrap();
        let out = t.apply(gradient(), &mut rng()).unwrap();
        assert!(out.image.pixels().all(|p| p.0[0] == p.0[1] && p.0[1] == p.0[2]));
    }

    #[test]
    fn test_posterize_keeps_top_bits() {
        let t = Posterize::from_params(&params(r#"{"num_bits": 2, "p": 1.0}"#)).unwrap();
        let out = t.apply(gradient(), &mut rng()).unwrap();
        assert!(out.image.pixels().all(|p| p.0.iter().all(|v| v & 0x3F == 0)));
    }

    #[test]
    fn test_solarize_threshold() {
        let t = Solarize::from_params(&params(r#"{"threshold": 100, "p": 1.0}"#)).unwrap();
        let input = Sample::image_only(RgbImage::from_pixel(1, 1, Rgb([50, 100, 200])));
        let out = t.apply(input, &mut rng()).unwrap();
        assert_eq!(out.image.get_pixel(0, 0), &Rgb([50, 155, 55]));
    }

    #[test]
    fn test_noise_is_seed_deterministic() {
        let t = GaussNoise::from_params(&params(r#"{"var_limit": [10, 50], "p": 1.0}"#)).unwrap();
        let a = t.apply(gradient(), &mut rng()).unwrap();
        let b = t.apply(gradient(), &mut rng()).unwrap();
        let c = t.apply(gradient(), &mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_normalize_darkens() {
        let t = Normalize::from_params(&Params::new()).unwrap();
        let out = t
            .apply(Sample::image_only(RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]))), &mut rng())
            .unwrap();
        assert!(out.image.pixels().all(|p| p.0.iter().all(|v| *v <= 3)));
    }

    #[test]
    fn test_normalize_rejects_zero_std() {
        assert!(Normalize::from_params(&params(r#"{"std": [0.2, 0.0, 0.2]}"#)).is_err());
    }

    #[test]
    fn test_channel_shuffle_is_a_permutation() {
        let t = ChannelShuffle::from_params(&params(r#"{"p": 1.0}"#)).unwrap();
        let input = Sample::image_only(RgbImage::from_pixel(1, 1, Rgb([1, 2, 3])));
        let out = t.apply(input, &mut rng()).unwrap();
        let mut values = out.image.get_pixel(0, 0).0;
        values.sort_unstable();
        assert_eq!(values, [1, 2, 3]);
    }
}
