//! Parameter reading and sampling helpers for the built-in transforms.

use crate::core::error::ProviderError;
use crate::core::types::{ParamValue, Params};
use rand::rngs::StdRng;
use rand::Rng;

/// Interchange-only keys that carry no meaning for the built-in
/// implementations. Accepted and ignored.
const IGNORED: &[&str] = &[
    "always_apply",
    "interpolation",
    "border_mode",
    "value",
    "mask_value",
    "fill",
    "fill_mask",
    "mask_interpolation",
    "rotate_method",
    "crop_border",
];

/// Typed access to a transform's parameter mapping.
///
/// Construction rejects any key the transform does not know. Absent and
/// `null` values fall back to the given default.
pub(crate) struct ParamReader<'a> {
    params: &'a Params,
}

impl<'a> ParamReader<'a> {
    pub fn new(params: &'a Params, known: &[&str]) -> Result<Self, ProviderError> {
        if let Some(name) = params.keys().find(|k| {
            let k = k.as_str();
            k != "p" && !known.contains(&k) && !IGNORED.contains(&k)
        }) {
            return Err(ProviderError::UnknownParameter { name: name.clone() });
        }
        Ok(Self { params })
    }

    fn get(&self, name: &str) -> Option<&'a ParamValue> {
        self.params.get(name).filter(|v| !v.is_null())
    }

    fn invalid(name: &str, expected: &str, value: &ParamValue) -> ProviderError {
        ProviderError::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected {}, got {}", expected, value),
        }
    }

    /// Application probability, checked to lie in [0, 1].
    pub fn probability(&self, default: f64) -> Result<f64, ProviderError> {
        let p = self.float("p", default)?;
        if !(0.0..=1.0).contains(&p) {
            return Err(ProviderError::InvalidParameter {
                name: "p".to_string(),
                reason: format!("probability {} is outside [0, 1]", p),
            });
        }
        Ok(p)
    }

    pub fn float(&self, name: &str, default: f64) -> Result<f64, ProviderError> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v.as_float().ok_or_else(|| Self::invalid(name, "a number", v)),
        }
    }

    pub fn int(&self, name: &str, default: i64) -> Result<i64, ProviderError> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v.as_int().ok_or_else(|| Self::invalid(name, "an integer", v)),
        }
    }

    /// A parameter the transform cannot work without.
    pub fn required_u32(&self, name: &str) -> Result<u32, ProviderError> {
        let value = self.get(name).ok_or_else(|| ProviderError::InvalidParameter {
            name: name.to_string(),
            reason: "missing required parameter".to_string(),
        })?;
        value
            .as_int()
            .filter(|v| *v > 0)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| Self::invalid(name, "a positive integer", value))
    }

    /// Rejects ranges whose width does not fit in an `f64`; they cannot be
    /// sampled.
    fn sampleable(name: &str, (lo, hi): (f64, f64)) -> Result<(f64, f64), ProviderError> {
        if (hi - lo).is_finite() {
            Ok((lo, hi))
        } else {
            Err(ProviderError::InvalidParameter {
                name: name.to_string(),
                reason: format!("range [{}, {}] is too wide to sample", lo, hi),
            })
        }
    }

    /// `[min, max]`; a scalar `x` reads as `(x, x)`.
    pub fn range(&self, name: &str, default: (f64, f64)) -> Result<(f64, f64), ProviderError> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_range()
                .ok_or_else(|| Self::invalid(name, "a number or [min, max]", v))
                .and_then(|r| Self::sampleable(name, r)),
        }
    }

    /// `[min, max]`; a scalar `x` reads as `(0, x)`.
    pub fn upper_range(&self, name: &str, default: (f64, f64)) -> Result<(f64, f64), ProviderError> {
        match self.get(name) {
            None => Ok(default),
            Some(ParamValue::Range(_, _)) => self.range(name, default),
            Some(v) => v
                .as_float()
                .map(|x| (0.0, x))
                .ok_or_else(|| Self::invalid(name, "a number or [min, max]", v))
                .and_then(|r| Self::sampleable(name, r)),
        }
    }

    /// `[min, max]`; a scalar `x` reads as `(-x, x)`.
    pub fn symmetric_range(
        &self,
        name: &str,
        default: (f64, f64),
    ) -> Result<(f64, f64), ProviderError> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_symmetric_range()
                .ok_or_else(|| Self::invalid(name, "a number or [min, max]", v))
                .and_then(|r| Self::sampleable(name, r)),
        }
    }

    /// List of exactly `len` numbers; a scalar is broadcast.
    pub fn float_list(
        &self,
        name: &str,
        default: &[f64],
        len: usize,
    ) -> Result<Vec<f64>, ProviderError> {
        let Some(value) = self.get(name) else {
            return Ok(default.to_vec());
        };
        let values = value
            .as_float_list()
            .ok_or_else(|| Self::invalid(name, "a list of numbers", value))?;
        match values.len() {
            1 => Ok(vec![values[0]; len]),
            n if n == len => Ok(values),
            n => Err(ProviderError::InvalidParameter {
                name: name.to_string(),
                reason: format!("expected {} values, got {}", len, n),
            }),
        }
    }
}

/// Sample uniformly from an inclusive range given in either order.
pub(crate) fn uniform(rng: &mut StdRng, (a, b): (f64, f64)) -> f64 {
    if a == b {
        return a;
    }
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    rng.gen_range(lo..=hi)
}

/// Sample an integer uniformly from an inclusive range given in either order.
pub(crate) fn uniform_int(rng: &mut StdRng, (a, b): (i64, i64)) -> i64 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    rng.gen_range(lo..=hi)
}

/// Decide whether a transform fires. Always consumes one draw so the stream
/// position does not depend on `p`.
pub(crate) fn fires(rng: &mut StdRng, p: f64) -> bool {
    rng.gen::<f64>() < p
}

/// Clamp a float to the 8-bit range and round.
pub(crate) fn to_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
