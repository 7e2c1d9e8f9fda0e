use std::io::Cursor;

use crate::ParserError;
use crate::common::reader::{Parseable, read_array, table_range};
use crate::vtx::types::{
    BODY_PART_HEADER_SIZE, BodyPartHeader, MESH_INDEX_HEADER_SIZE, MESH_INDEX_VERSION, MODEL_HEADER_SIZE,
    MODEL_LOD_HEADER_SIZE, MeshBodyPart, MeshIndex, MeshIndexHeader, MeshModel, ModelHeader, ModelLod,
};

pub struct MeshIndexReader {}

impl MeshIndexReader {
    pub fn parse_header(data: &[u8]) -> Result<MeshIndexHeader, ParserError> {
        if data.is_empty() {
            return Err(ParserError::EmptySource);
        }

        if data.len() < MESH_INDEX_HEADER_SIZE {
            return Err(ParserError::FormatError {
                reason: "mesh index header is truncated",
            });
        }

        MeshIndexHeader::parse(&mut Cursor::new(data))
    }

    pub fn check(header: &MeshIndexHeader, checksum: i32) -> Result<(), ParserError> {
        if header.version != MESH_INDEX_VERSION {
            return Err(ParserError::UnsupportedVersion {
                version: header.version,
            });
        }

        if header.check_sum != checksum {
            return Err(ParserError::ChecksumMismatch {
                expected: checksum,
                found: header.check_sum,
            });
        }

        Ok(())
    }

    /// Reads `count` records at `parent + offset`; child tables are addressed from their parent.
    fn read_children<T: Parseable<T>>(
        data: &[u8],
        parent: usize,
        offset: i32,
        count: i32,
        stride: usize,
        what: &'static str,
    ) -> Result<(usize, Vec<T>), ParserError> {
        let start = (parent as i64 + offset as i64).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        let range = table_range(data.len(), start, count, stride, what)?;
        let base = range.start;
        Ok((base, read_array(&mut Cursor::new(&data[range]), count as usize)?))
    }

    pub fn parse(data: &[u8]) -> Result<MeshIndex, ParserError> {
        let header = MeshIndexReader::parse_header(data)?;

        let (parts_base, parts): (usize, Vec<BodyPartHeader>) = MeshIndexReader::read_children(
            data,
            0,
            header.body_part_offset,
            header.num_body_parts,
            BODY_PART_HEADER_SIZE,
            "body parts",
        )?;

        let mut body_parts = Vec::with_capacity(parts.len());
        for (part_idx, part) in parts.iter().enumerate() {
            let part_pos = parts_base + part_idx * BODY_PART_HEADER_SIZE;
            let (models_base, models): (usize, Vec<ModelHeader>) = MeshIndexReader::read_children(
                data,
                part_pos,
                part.model_offset,
                part.num_models,
                MODEL_HEADER_SIZE,
                "models",
            )?;

            let mut mesh_models = Vec::with_capacity(models.len());
            for (model_idx, model) in models.iter().enumerate() {
                let model_pos = models_base + model_idx * MODEL_HEADER_SIZE;
                let (_, lods): (usize, Vec<ModelLod>) = MeshIndexReader::read_children(
                    data,
                    model_pos,
                    model.lod_offset,
                    model.num_lods,
                    MODEL_LOD_HEADER_SIZE,
                    "model lods",
                )?;
                mesh_models.push(MeshModel { lods });
            }

            body_parts.push(MeshBodyPart { models: mesh_models });
        }

        Ok(MeshIndex { header, body_parts })
    }
}
