//! Raw little-endian volume files.

use std::fs;
use std::path::Path;

use anyhow::{Context, bail};
use ndarray::Array3;
use tomopar_core::Element;

/// Element types with a fixed little-endian encoding.
pub trait RawElement: Element {
    const WIDTH: usize;

    fn read_le(bytes: &[u8]) -> Self;

    fn write_le(self, out: &mut Vec<u8>);
}

impl RawElement for f32 {
    const WIDTH: usize = 4;

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        f32::from_le_bytes(buf)
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl RawElement for f64 {
    const WIDTH: usize = 8;

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        f64::from_le_bytes(buf)
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// Parse `N,H,W` into a volume shape.
pub fn parse_shape(s: &str) -> Result<[usize; 3], String> {
    let dims = s
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .map_err(|e| format!("invalid dimension `{}`: {}", part.trim(), e))
        })
        .collect::<Result<Vec<_>, _>>()?;
    match dims.as_slice() {
        &[slices, rows, columns] => Ok([slices, rows, columns]),
        _ => Err(format!("expected SLICES,ROWS,COLUMNS, got {} dimensions", dims.len())),
    }
}

/// Load a volume of `shape` from a raw file.
pub fn read_volume<T: RawElement>(path: &Path, shape: [usize; 3]) -> anyhow::Result<Array3<T>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let expected = shape
        .iter()
        .try_fold(T::WIDTH, |acc, &d| acc.checked_mul(d))
        .with_context(|| format!("shape {:?} of {} is too large to address", shape, T::TYPE))?;
    if bytes.len() != expected {
        bail!(
            "{} holds {} bytes, but shape {:?} of {} needs {}",
            path.display(),
            bytes.len(),
            shape,
            T::TYPE,
            expected
        );
    }
    let values = bytes.chunks_exact(T::WIDTH).map(T::read_le).collect();
    Ok(Array3::from_shape_vec((shape[0], shape[1], shape[2]), values)?)
}

/// Write a volume as raw little-endian values in row-major order.
pub fn write_volume<T: RawElement>(path: &Path, data: &Array3<T>) -> anyhow::Result<()> {
    let mut out = Vec::with_capacity(data.len() * T::WIDTH);
    for &value in data.iter() {
        value.write_le(&mut out);
    }
    fs::write(path, out).with_context(|| format!("Failed to write {}", path.display()))
}

/// Read whitespace-separated monitor counts.
pub fn read_counts(path: &Path) -> anyhow::Result<Vec<f64>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    text.split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .with_context(|| format!("invalid count `{}` in {}", token, path.display()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape("4,8,16").unwrap(), [4, 8, 16]);
        assert_eq!(parse_shape(" 1, 2 ,3").unwrap(), [1, 2, 3]);
        assert!(parse_shape("4,8").is_err());
        assert!(parse_shape("4,x,8").is_err());
    }

    #[test]
    fn test_volume_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("volume.raw");
        let data = Array3::from_shape_fn((2, 3, 4), |(s, r, c)| (s * 100 + r * 10 + c) as f32);

        write_volume(&path, &data).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 96);
        assert_eq!(read_volume::<f32>(&path, [2, 3, 4]).unwrap(), data);

        let err = read_volume::<f64>(&path, [2, 3, 4]).unwrap_err();
        assert!(err.to_string().contains("needs 192"));
    }

    #[test]
    fn test_counts_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("counts.txt");
        fs::write(&path, "10 20\n30\n").unwrap();
        assert_eq!(read_counts(&path).unwrap(), vec![10.0, 20.0, 30.0]);

        fs::write(&path, "10 abc").unwrap();
        assert!(read_counts(&path).is_err());
    }
}
