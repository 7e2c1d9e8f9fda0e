//! The zlib envelope some asset packs wrap payloads in.
//!
//! Layout: `id: u32 = "ZCMP"`, `actual_size: u32`, `compressed_size: u32`, then `compressed_size`
//! bytes of zlib stream. Anything not starting with the id is stored raw.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::ParserError;
use crate::common::types::fourcc;

pub const ENVELOPE_ID: u32 = fourcc(b"ZCMP");
pub const ENVELOPE_HEADER_SIZE: usize = 12;
/// Upfront allocation is bounded by this multiple of the stream; larger payloads grow on demand.
const PREALLOCATION_RATIO: usize = 8;

pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= ENVELOPE_HEADER_SIZE && data[0..4] == ENVELOPE_ID.to_le_bytes()
}

/// Unpacks an enveloped blob. Returns `None` when `data` is not enveloped.
pub fn decompress(data: &[u8]) -> Result<Option<Vec<u8>>, ParserError> {
    if !is_compressed(data) {
        return Ok(None);
    }

    let mut rdr = Cursor::new(data);
    let _id = rdr.read_u32::<LittleEndian>()?;
    let actual_size = rdr.read_u32::<LittleEndian>()? as usize;
    let compressed_size = rdr.read_u32::<LittleEndian>()? as usize;

    let stream = data
        .get(ENVELOPE_HEADER_SIZE..ENVELOPE_HEADER_SIZE + compressed_size)
        .ok_or(ParserError::OutOfBounds {
            what: "compressed stream",
            offset: ENVELOPE_HEADER_SIZE,
            length: data.len(),
        })?;

    let mut decoded = Vec::with_capacity(actual_size.min(stream.len().saturating_mul(PREALLOCATION_RATIO)));
    ZlibDecoder::new(stream)
        .take(actual_size as u64 + 1)
        .read_to_end(&mut decoded)?;

    if decoded.len() != actual_size {
        return Err(ParserError::DecodeFailure {
            expected: actual_size,
            actual: decoded.len(),
        });
    }

    Ok(Some(decoded))
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>, ParserError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let stream = encoder.finish()?;

    let mut out = Vec::with_capacity(ENVELOPE_HEADER_SIZE + stream.len());
    out.write_u32::<LittleEndian>(ENVELOPE_ID)?;
    out.write_u32::<LittleEndian>(data.len() as u32)?;
    out.write_u32::<LittleEndian>(stream.len() as u32)?;
    out.extend_from_slice(&stream);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_blobs_pass_through() -> Result<(), anyhow::Error> {
        assert_eq!(decompress(b"IDST and some more bytes")?, None);
        Ok(())
    }

    #[test]
    fn enveloped_blob_unpacks() -> Result<(), anyhow::Error> {
        let payload = vec![7u8; 4096];
        let packed = compress(&payload)?;
        assert!(is_compressed(&packed));
        assert!(packed.len() < payload.len());
        assert_eq!(decompress(&packed)?, Some(payload));
        Ok(())
    }

    #[test]
    fn size_mismatch_is_a_decode_failure() -> Result<(), anyhow::Error> {
        let mut packed = compress(b"twelve bytes")?;
        packed[4..8].copy_from_slice(&20u32.to_le_bytes());
        assert!(matches!(
            decompress(&packed),
            Err(ParserError::DecodeFailure {
                expected: 20,
                actual: 12
            })
        ));
        Ok(())
    }

    #[test]
    fn oversized_declaration_fails_without_trusting_it() -> Result<(), anyhow::Error> {
        let mut packed = compress(b"tiny")?;
        packed[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decompress(&packed),
            Err(ParserError::DecodeFailure { actual: 4, .. })
        ));

        let payload = vec![0u8; 1 << 16];
        let packed = compress(&payload)?;
        assert!(packed.len() * PREALLOCATION_RATIO < payload.len());
        assert_eq!(decompress(&packed)?, Some(payload));
        Ok(())
    }
}
