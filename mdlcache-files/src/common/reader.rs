use std::io::Read;
use std::ops::Range;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::ParserError;
use crate::common::types::{Vector2, Vector3, Vector4};

pub(crate) trait Parseable<T> {
    fn parse<R: Read>(rdr: &mut R) -> Result<T, ParserError>;
}

impl Parseable<Vector3> for Vector3 {
    fn parse<R: Read>(rdr: &mut R) -> Result<Vector3, ParserError> {
        Ok(Vector3 {
            x: rdr.read_f32::<LittleEndian>()?,
            y: rdr.read_f32::<LittleEndian>()?,
            z: rdr.read_f32::<LittleEndian>()?,
        })
    }
}

impl Parseable<Vector2> for Vector2 {
    fn parse<R: Read>(rdr: &mut R) -> Result<Vector2, ParserError> {
        Ok(Vector2 {
            x: rdr.read_f32::<LittleEndian>()?,
            y: rdr.read_f32::<LittleEndian>()?,
        })
    }
}

impl Parseable<Vector4> for Vector4 {
    fn parse<R: Read>(rdr: &mut R) -> Result<Vector4, ParserError> {
        Ok(Vector4 {
            x: rdr.read_f32::<LittleEndian>()?,
            y: rdr.read_f32::<LittleEndian>()?,
            z: rdr.read_f32::<LittleEndian>()?,
            w: rdr.read_f32::<LittleEndian>()?,
        })
    }
}

impl Parseable<u8> for u8 {
    fn parse<R: Read>(rdr: &mut R) -> Result<u8, ParserError> {
        Ok(rdr.read_u8()?)
    }
}

impl Parseable<u16> for u16 {
    fn parse<R: Read>(rdr: &mut R) -> Result<u16, ParserError> {
        Ok(rdr.read_u16::<LittleEndian>()?)
    }
}

impl Parseable<u32> for u32 {
    fn parse<R: Read>(rdr: &mut R) -> Result<u32, ParserError> {
        Ok(rdr.read_u32::<LittleEndian>()?)
    }
}

impl Parseable<i32> for i32 {
    fn parse<R: Read>(rdr: &mut R) -> Result<i32, ParserError> {
        Ok(rdr.read_i32::<LittleEndian>()?)
    }
}

impl Parseable<f32> for f32 {
    fn parse<R: Read>(rdr: &mut R) -> Result<f32, ParserError> {
        Ok(rdr.read_f32::<LittleEndian>()?)
    }
}

/// Reads `count` consecutive records.
pub(crate) fn read_array<T: Parseable<T>, R: Read>(rdr: &mut R, count: usize) -> Result<Vec<T>, ParserError> {
    let mut list = Vec::with_capacity(count);
    for _ in 0..count {
        list.push(T::parse(rdr)?);
    }
    Ok(list)
}

/// Resolves `count` records of `stride` bytes at `offset`, failing when the table leaves `length`.
pub(crate) fn table_range(
    length: usize,
    offset: i32,
    count: i32,
    stride: usize,
    what: &'static str,
) -> Result<Range<usize>, ParserError> {
    if count < 0 || offset < 0 {
        return Err(ParserError::FormatError {
            reason: "negative table offset or count",
        });
    }

    let start = offset as usize;
    let end = (count as usize)
        .checked_mul(stride)
        .and_then(|size| size.checked_add(start))
        .ok_or(ParserError::OutOfBounds {
            what,
            offset: start,
            length,
        })?;

    if end > length {
        return Err(ParserError::OutOfBounds {
            what,
            offset: start,
            length,
        });
    }

    Ok(start..end)
}

/// Reads the NUL-terminated string starting at `offset`.
pub(crate) fn read_cstring_at(data: &[u8], offset: usize, what: &'static str) -> Result<String, ParserError> {
    let tail = data.get(offset..).ok_or(ParserError::OutOfBounds {
        what,
        offset,
        length: data.len(),
    })?;

    let end = tail
        .iter()
        .position(|&c| c == 0)
        .ok_or(ParserError::FormatError {
            reason: "unterminated string",
        })?;

    Ok(String::from_utf8(tail[..end].to_vec())?)
}

/// Turns a fixed, NUL padded name field into a string.
pub(crate) fn fixed_name(bytes: &[u8]) -> Result<String, ParserError> {
    let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8(bytes[..end].to_vec())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_range_rejects_overflowing_tables() {
        assert!(table_range(64, 60, 1, 8, "table").is_err());
        assert!(table_range(64, -4, 1, 8, "table").is_err());
        assert_eq!(table_range(64, 48, 2, 8, "table").ok(), Some(48..64));
    }

    #[test]
    fn cstring_stops_at_nul() -> Result<(), anyhow::Error> {
        let data = b"xxmodels/a.mdl\0rest";
        assert_eq!(read_cstring_at(data, 2, "name")?, "models/a.mdl");
        assert!(read_cstring_at(b"abc", 0, "name").is_err());
        Ok(())
    }
}
