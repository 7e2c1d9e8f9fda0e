use std::io::Cursor;

use crate::ParserError;
use crate::common::reader::{Parseable, read_array, table_range};
use crate::common::types::Vector4;
use crate::vvd::types::{
    FIXUP_SIZE, FOURCC_VERTEX_FILE, MAX_NUM_LODS, STUDIO_VERTEX_SIZE, StudioVertex, TANGENT_SIZE,
    VERTEX_FILE_HEADER_SIZE, VERTEX_FILE_VERSION, VertexData, VertexFileHeader, VertexFixup,
};

pub struct VertexReader {}

impl VertexReader {
    pub fn parse_header(data: &[u8]) -> Result<VertexFileHeader, ParserError> {
        if data.is_empty() {
            return Err(ParserError::EmptySource);
        }

        if data.len() < VERTEX_FILE_HEADER_SIZE {
            return Err(ParserError::FormatError {
                reason: "vertex header is truncated",
            });
        }

        VertexFileHeader::parse(&mut Cursor::new(data))
    }

    /// Checks that a vertex file belongs to the model with `checksum`.
    pub fn check(header: &VertexFileHeader, checksum: i32) -> Result<(), ParserError> {
        if header.id != FOURCC_VERTEX_FILE {
            return Err(ParserError::InvalidMagicValue { magic: header.id as u32 });
        }

        if header.version != VERTEX_FILE_VERSION {
            return Err(ParserError::UnsupportedVersion {
                version: header.version,
            });
        }

        if header.checksum != checksum {
            return Err(ParserError::ChecksumMismatch {
                expected: checksum,
                found: header.checksum,
            });
        }

        if header.num_lods <= 0 {
            return Err(ParserError::FormatError {
                reason: "vertex file has no levels of detail",
            });
        }

        if header.num_lods > MAX_NUM_LODS as i32 {
            return Err(ParserError::FormatError {
                reason: "vertex file has more levels of detail than a model supports",
            });
        }

        Ok(())
    }

    pub fn parse(data: &[u8]) -> Result<VertexData, ParserError> {
        let header = VertexReader::parse_header(data)?;
        let count = header.num_lod_vertexes[0];

        let fixups: Vec<VertexFixup> = if header.num_fixups > 0 {
            let range = table_range(data.len(), header.fixup_table_start, header.num_fixups, FIXUP_SIZE, "fixups")?;
            read_array(&mut Cursor::new(&data[range]), header.num_fixups as usize)?
        } else {
            Vec::new()
        };

        let range = table_range(data.len(), header.vertex_data_start, count, STUDIO_VERTEX_SIZE, "vertices")?;
        let vertices: Vec<StudioVertex> = read_array(&mut Cursor::new(&data[range]), count as usize)?;

        let tangents: Vec<Vector4> = if header.tangent_data_start > 0 {
            let range = table_range(data.len(), header.tangent_data_start, count, TANGENT_SIZE, "tangents")?;
            read_array(&mut Cursor::new(&data[range]), count as usize)?
        } else {
            Vec::new()
        };

        Ok(VertexData {
            header,
            fixups,
            vertices,
            tangents,
        })
    }
}
