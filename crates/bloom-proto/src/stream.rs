//! Primitive field encoders/decoders.
//!
//! All integers and floats are native byte order (the worker always runs
//! on the same machine as the engine). Every reader propagates a short
//! read as an error instead of returning a zeroed value.

use crate::ProtoError;
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Longest accepted string field, in bytes.
pub const MAX_STRING_LEN: u32 = 1 << 16;

/// Longest accepted f32 vector field, in elements. Sized for the RGBA
/// buffer of an 8k x 8k raster.
pub const MAX_VEC_LEN: u32 = 1 << 28;

/// Writes one `u32`.
pub fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<(), ProtoError> {
    w.write_u32::<NativeEndian>(v)?;
    Ok(())
}

/// Reads one `u32`.
pub fn read_u32<R: Read>(r: &mut R) -> Result<u32, ProtoError> {
    Ok(r.read_u32::<NativeEndian>()?)
}

/// Writes one `f32`.
pub fn write_f32<W: Write>(w: &mut W, v: f32) -> Result<(), ProtoError> {
    w.write_f32::<NativeEndian>(v)?;
    Ok(())
}

/// Reads one `f32`.
pub fn read_f32<R: Read>(r: &mut R) -> Result<f32, ProtoError> {
    Ok(r.read_f32::<NativeEndian>()?)
}

/// Writes a u32-length-prefixed UTF-8 string.
pub fn write_string<W: Write>(w: &mut W, s: &str) -> Result<(), ProtoError> {
    write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

/// Reads a u32-length-prefixed UTF-8 string.
///
/// The length prefix is validated against [`MAX_STRING_LEN`] before any
/// allocation, so a corrupt prefix cannot demand gigabytes.
pub fn read_string<R: Read>(r: &mut R) -> Result<String, ProtoError> {
    let len = read_u32(r)?;
    if len > MAX_STRING_LEN {
        return Err(ProtoError::FieldTooLarge {
            len,
            max: MAX_STRING_LEN,
        });
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}

/// Writes a u32-count-prefixed flat f32 vector.
pub fn write_f32_vec<W: Write>(w: &mut W, v: &[f32]) -> Result<(), ProtoError> {
    write_u32(w, v.len() as u32)?;
    for &x in v {
        w.write_f32::<NativeEndian>(x)?;
    }
    Ok(())
}

/// Reads a u32-count-prefixed flat f32 vector.
///
/// The count prefix is validated against [`MAX_VEC_LEN`] before any
/// allocation.
pub fn read_f32_vec<R: Read>(r: &mut R) -> Result<Vec<f32>, ProtoError> {
    let count = read_u32(r)?;
    if count > MAX_VEC_LEN {
        return Err(ProtoError::FieldTooLarge {
            len: count,
            max: MAX_VEC_LEN,
        });
    }
    let mut out = vec![0.0f32; count as usize];
    r.read_f32_into::<NativeEndian>(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_scalar_round_trip() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 0xDEAD_BEEF).unwrap();
        write_f32(&mut buf, -1.5).unwrap();

        let mut cur = Cursor::new(buf);
        assert_eq!(read_u32(&mut cur).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_f32(&mut cur).unwrap(), -1.5);
    }

    #[test]
    fn test_string_round_trip() {
        for s in ["", "stat-lock-42", "日本語"] {
            let mut buf = Vec::new();
            write_string(&mut buf, s).unwrap();
            let mut cur = Cursor::new(buf);
            assert_eq!(read_string(&mut cur).unwrap(), s);
        }
    }

    #[test]
    fn test_vec_round_trip() {
        for v in [vec![], vec![1.0f32, -2.5, 0.0, f32::MAX]] {
            let mut buf = Vec::new();
            write_f32_vec(&mut buf, &v).unwrap();
            let mut cur = Cursor::new(buf);
            assert_eq!(read_f32_vec(&mut cur).unwrap(), v);
        }
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        // A corrupt prefix must fail before any allocation is attempted.
        let mut buf = Vec::new();
        write_u32(&mut buf, u32::MAX).unwrap();

        let mut cur = Cursor::new(buf.clone());
        assert!(matches!(
            read_string(&mut cur),
            Err(ProtoError::FieldTooLarge { .. })
        ));
        let mut cur = Cursor::new(buf);
        assert!(matches!(
            read_f32_vec(&mut cur),
            Err(ProtoError::FieldTooLarge { .. })
        ));
    }

    #[test]
    fn test_short_read_fails_closed() {
        let mut buf = Vec::new();
        write_f32_vec(&mut buf, &[1.0, 2.0, 3.0]).unwrap();
        buf.truncate(buf.len() - 2);

        let mut cur = Cursor::new(buf);
        assert!(read_f32_vec(&mut cur).is_err());
    }
}
