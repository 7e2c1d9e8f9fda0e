use mdlcache_files::ParserError;
use mdlcache_files::common::compression;

/// Applied to every blob before it is validated.
pub trait PayloadTransform: Send + Sync {
    fn apply(&self, data: Vec<u8>) -> Result<Vec<u8>, ParserError>;
}

/// Inflates blobs wrapped in the `ZCMP` envelope, everything else passes unchanged.
#[derive(Debug, Default, Copy, Clone)]
pub struct ZlibEnvelope;

impl PayloadTransform for ZlibEnvelope {
    fn apply(&self, data: Vec<u8>) -> Result<Vec<u8>, ParserError> {
        Ok(compression::decompress(&data)?.unwrap_or(data))
    }
}

#[derive(Debug, Default, Copy, Clone)]
pub struct PassThrough;

impl PayloadTransform for PassThrough {
    fn apply(&self, data: Vec<u8>) -> Result<Vec<u8>, ParserError> {
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_is_unpacked_and_plain_data_kept() -> Result<(), anyhow::Error> {
        let plain = b"IDST plain model bytes".to_vec();
        let packed = compression::compress(&plain)?;

        assert_eq!(ZlibEnvelope.apply(packed.clone())?, plain);
        assert_eq!(ZlibEnvelope.apply(plain.clone())?, plain);
        assert_eq!(PassThrough.apply(packed.clone())?, packed);
        Ok(())
    }
}
