//! Self-describing numeric array envelope
//!
//! Arrays are packed as the MessagePack map understood by `msgpack-numpy`
//! decoders: binary keys `nd`, `type`, `kind`, `shape` and `data`, with the
//! element type given as a NumPy type descriptor.

use bytes::{BufMut, BytesMut};
use rmp::encode;

use super::EncodeError;

/// Element type of a packed array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    /// Unsigned byte, used for RGBA color
    U8,
    /// Little-endian 32-bit float, used for depth
    F32,
}

impl Dtype {
    /// NumPy type descriptor
    pub fn descr(&self) -> &'static str {
        match self {
            Dtype::U8 => "|u1",
            Dtype::F32 => "<f4",
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Dtype::U8 => 1,
            Dtype::F32 => 4,
        }
    }
}

pub(super) fn pack_err(e: impl std::fmt::Display) -> EncodeError {
    EncodeError::Pack(e.to_string())
}

/// Append one packed array to `out`
pub fn write_array(
    out: &mut Vec<u8>,
    dtype: Dtype,
    shape: &[u32],
    data: &[u8],
) -> Result<(), EncodeError> {
    let elements: usize = shape.iter().map(|&d| d as usize).product();
    if elements * dtype.size() != data.len() {
        return Err(EncodeError::ShapeMismatch(format!(
            "shape {shape:?} of {} needs {} bytes, got {}",
            dtype.descr(),
            elements * dtype.size(),
            data.len()
        )));
    }

    encode::write_map_len(out, 5).map_err(pack_err)?;

    encode::write_bin(out, b"nd").map_err(pack_err)?;
    encode::write_bool(out, true).map_err(pack_err)?;

    encode::write_bin(out, b"type").map_err(pack_err)?;
    encode::write_str(out, dtype.descr()).map_err(pack_err)?;

    encode::write_bin(out, b"kind").map_err(pack_err)?;
    encode::write_bin(out, b"").map_err(pack_err)?;

    encode::write_bin(out, b"shape").map_err(pack_err)?;
    encode::write_array_len(out, shape.len() as u32).map_err(pack_err)?;
    for &dim in shape {
        encode::write_uint(out, u64::from(dim)).map_err(pack_err)?;
    }

    encode::write_bin(out, b"data").map_err(pack_err)?;
    encode::write_bin(out, data).map_err(pack_err)?;
    Ok(())
}

/// RGBA8 color as a `height x width x 4` byte array
pub fn pack_color(width: u32, height: u32, color: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(color.len() + 64);
    write_array(&mut out, Dtype::U8, &[height, width, 4], color)?;
    Ok(out)
}

/// Linear depth as a `height x width` float array
pub fn pack_depth(width: u32, height: u32, depth: &[f32]) -> Result<Vec<u8>, EncodeError> {
    let raw = depth_le_bytes(depth);
    let mut out = Vec::with_capacity(raw.len() + 64);
    write_array(&mut out, Dtype::F32, &[height, width], &raw)?;
    Ok(out)
}

/// Depth values as consecutive little-endian `f32`s
pub fn depth_le_bytes(depth: &[f32]) -> BytesMut {
    let mut raw = BytesMut::with_capacity(depth.len() * 4);
    for &d in depth {
        raw.put_f32_le(d);
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmp::decode;

    fn read_bin<'a>(rd: &mut &'a [u8]) -> &'a [u8] {
        let len = decode::read_bin_len(rd).unwrap() as usize;
        let (data, rest) = rd.split_at(len);
        *rd = rest;
        data
    }

    fn read_str<'a>(rd: &mut &'a [u8]) -> &'a str {
        let len = decode::read_str_len(rd).unwrap() as usize;
        let (data, rest) = rd.split_at(len);
        *rd = rest;
        std::str::from_utf8(data).unwrap()
    }

    #[test]
    fn test_color_envelope_layout() {
        let color: Vec<u8> = (0..2 * 3 * 4).map(|i| i as u8).collect();
        let packed = pack_color(3, 2, &color).unwrap();
        let mut rd = packed.as_slice();

        assert_eq!(decode::read_map_len(&mut rd).unwrap(), 5);
        assert_eq!(read_bin(&mut rd), b"nd");
        assert!(decode::read_bool(&mut rd).unwrap());
        assert_eq!(read_bin(&mut rd), b"type");
        assert_eq!(read_str(&mut rd), "|u1");
        assert_eq!(read_bin(&mut rd), b"kind");
        assert_eq!(read_bin(&mut rd), b"");
        assert_eq!(read_bin(&mut rd), b"shape");
        assert_eq!(decode::read_array_len(&mut rd).unwrap(), 3);
        let shape: Vec<u64> = (0..3)
            .map(|_| decode::read_int::<u64, _>(&mut rd).unwrap())
            .collect();
        assert_eq!(shape, vec![2, 3, 4]);
        assert_eq!(read_bin(&mut rd), b"data");
        assert_eq!(read_bin(&mut rd), color.as_slice());
        assert!(rd.is_empty());
    }

    #[test]
    fn test_depth_is_little_endian_f32() {
        let packed = pack_depth(2, 1, &[1.5, -2.0]).unwrap();
        let tail = &packed[packed.len() - 8..];
        assert_eq!(&tail[..4], &1.5f32.to_le_bytes());
        assert_eq!(&tail[4..], &(-2.0f32).to_le_bytes());
        // descriptor is present
        assert!(packed.windows(3).any(|w| w == b"<f4"));
    }

    #[test]
    fn test_shape_mismatch() {
        let mut out = Vec::new();
        let err = write_array(&mut out, Dtype::U8, &[2, 2, 4], &[0u8; 15]).unwrap_err();
        assert!(matches!(err, EncodeError::ShapeMismatch(_)));
    }
}
