//! Reader for `.npy` raw array files.
//!
//! Supports format versions 1.0, 2.0 and 3.0, little and big endian, C and
//! Fortran order, and the boolean, integer and float dtypes up to 8 bytes.
//! Every element is widened to `f64`.

use crate::core::error::MaskError;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use std::path::Path;

const MAGIC: &[u8] = b"\x93NUMPY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Bool,
    Unsigned,
    Signed,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Dtype {
    kind: Kind,
    size: usize,
    big_endian: bool,
}

/// Parsed `.npy` header.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

fn malformed(msg: impl Into<String>) -> MaskError {
    MaskError::Npy(msg.into())
}

/// Read an `.npy` file into an `f64` array.
pub fn read_npy(path: impl AsRef<Path>) -> Result<ArrayD<f64>, MaskError> {
    let bytes = std::fs::read(path)?;
    parse_npy(&bytes)
}

/// Parse `.npy` bytes into an `f64` array.
pub fn parse_npy(bytes: &[u8]) -> Result<ArrayD<f64>, MaskError> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(malformed("missing magic string"));
    }

    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(malformed("truncated header length"));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
            (len, 12)
        }
        other => return Err(malformed(format!("unsupported format version {}", other))),
    };

    let data_start = header_start + header_len;
    let header_bytes = bytes
        .get(header_start..data_start)
        .ok_or_else(|| malformed("truncated header"))?;
    let header_text =
        std::str::from_utf8(header_bytes).map_err(|_| malformed("header is not text"))?;
    let header = parse_header(header_text)?;

    let count = header
        .shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| malformed("array too large"))?;
    let data = &bytes[data_start..];
    let needed = count
        .checked_mul(header.dtype.size)
        .ok_or_else(|| malformed("array too large"))?;
    if data.len() < needed {
        return Err(malformed(format!(
            "expected {} data bytes, found {}",
            needed,
            data.len()
        )));
    }

    let values: Vec<f64> = data[..needed]
        .chunks_exact(header.dtype.size)
        .map(|chunk| decode(chunk, header.dtype))
        .collect();

    let shape = IxDyn(&header.shape);
    let array = if header.fortran_order {
        ArrayD::from_shape_vec(shape.f(), values)
    } else {
        ArrayD::from_shape_vec(shape, values)
    };
    array.map_err(|e| malformed(e.to_string()))
}

fn decode(chunk: &[u8], dtype: Dtype) -> f64 {
    let mut buf = [0u8; 8];
    let n = chunk.len();
    if dtype.big_endian {
        buf[..n].copy_from_slice(chunk);
        buf[..n].reverse();
    } else {
        buf[..n].copy_from_slice(chunk);
    }

    match (dtype.kind, n) {
        (Kind::Bool, _) => (buf[0] != 0) as u8 as f64,
        (Kind::Unsigned, 1) => buf[0] as f64,
        (Kind::Unsigned, 2) => u16::from_le_bytes([buf[0], buf[1]]) as f64,
        (Kind::Unsigned, 4) => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
        (Kind::Unsigned, _) => u64::from_le_bytes(buf) as f64,
        (Kind::Signed, 1) => buf[0] as i8 as f64,
        (Kind::Signed, 2) => i16::from_le_bytes([buf[0], buf[1]]) as f64,
        (Kind::Signed, 4) => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
        (Kind::Signed, _) => i64::from_le_bytes(buf) as f64,
        (Kind::Float, 4) => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
        (Kind::Float, _) => f64::from_le_bytes(buf),
    }
}

fn parse_header(text: &str) -> Result<Header, MaskError> {
    let descr = dict_value(text, "descr").ok_or_else(|| malformed("header has no descr"))?;
    let descr = descr
        .trim_start()
        .strip_prefix(['\'', '"'])
        .and_then(|rest| rest.split(['\'', '"']).next())
        .ok_or_else(|| malformed("descr is not a string"))?;
    let dtype = parse_dtype(descr)?;

    let fortran_order = match dict_value(text, "fortran_order").map(str::trim) {
        Some(v) if v.starts_with("True") => true,
        Some(v) if v.starts_with("False") => false,
        _ => return Err(malformed("header has no fortran_order")),
    };

    let shape_text = dict_value(text, "shape").ok_or_else(|| malformed("header has no shape"))?;
    let open = shape_text.find('(').ok_or_else(|| malformed("shape is not a tuple"))?;
    let close = shape_text.find(')').ok_or_else(|| malformed("shape is not a tuple"))?;
    let shape = shape_text
        .get(open + 1..close)
        .filter(|_| close > open)
        .ok_or_else(|| malformed("shape is not a tuple"))?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| malformed(format!("bad shape entry '{}'", s)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Header {
        dtype,
        fortran_order,
        shape,
    })
}

/// Text following `'key':` in the header dictionary.
fn dict_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let quoted = [format!("'{}'", key), format!("\"{}\"", key)];
    let start = quoted.iter().find_map(|k| text.find(k.as_str()).map(|i| i + k.len()))?;
    let rest = &text[start..];
    let colon = rest.find(':')?;
    Some(&rest[colon + 1..])
}

fn parse_dtype(descr: &str) -> Result<Dtype, MaskError> {
    let mut chars = descr.chars();
    let (big_endian, body) = match chars.next() {
        Some('>') => (true, chars.as_str()),
        Some('<') | Some('|') | Some('=') => (false, chars.as_str()),
        _ => (false, descr),
    };

    let kind = match body.chars().next() {
        Some('b') | Some('?') => Kind::Bool,
        Some('u') => Kind::Unsigned,
        Some('i') => Kind::Signed,
        Some('f') => Kind::Float,
        _ => return Err(malformed(format!("unsupported dtype '{}'", descr))),
    };
    let size = if body == "?" {
        1
    } else {
        body[1..]
            .parse::<usize>()
            .map_err(|_| malformed(format!("unsupported dtype '{}'", descr)))?
    };

    let supported = match kind {
        Kind::Bool => size == 1,
        Kind::Unsigned | Kind::Signed => matches!(size, 1 | 2 | 4 | 8),
        Kind::Float => matches!(size, 4 | 8),
    };
    if !supported {
        return Err(malformed(format!("unsupported dtype '{}'", descr)));
    }

    Ok(Dtype {
        kind,
        size,
        big_endian,
    })
}

/// Encode an array as a version 1.0 `.npy` file.
#[cfg(test)]
pub(crate) fn encode_npy(descr: &str, shape: &[usize], fortran: bool, data: &[u8]) -> Vec<u8> {
    let shape_text = match shape {
        [single] => format!("({},)", single),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': {}, 'shape': {}, }}",
        descr,
        if fortran { "True" } else { "False" },
        shape_text
    );
    let total = MAGIC.len() + 4 + header.len() + 1;
    header.push_str(&" ".repeat((64 - total % 64) % 64));
    header.push('\n');

    let mut out = MAGIC.to_vec();
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(data);
    out
}
