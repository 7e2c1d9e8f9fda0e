use std::io::Cursor;

use crate::ParserError;
use crate::common::reader::{Parseable, fixed_name, read_array, read_cstring_at, table_range};
use crate::studio::types::{
    AnimBlockRange, FOURCC_STUDIO_HEADER, IncludeModel, RawIncludeModel, RawStudioHeader, STUDIO_HEADER_SIZE,
    STUDIO_VERSIONS, SequenceDesc, StudioHeader,
};

pub struct StudioReader {}

impl StudioReader {
    fn read_table<T: Parseable<T>>(
        data: &[u8],
        offset: i32,
        count: i32,
        stride: usize,
        what: &'static str,
    ) -> Result<Vec<T>, ParserError> {
        let range = table_range(data.len(), offset, count, stride, what)?;
        read_array(&mut Cursor::new(&data[range]), count as usize)
    }

    /// Reads only the fixed part, enough to check identity and version.
    pub(crate) fn parse_raw(data: &[u8]) -> Result<RawStudioHeader, ParserError> {
        if data.is_empty() {
            return Err(ParserError::EmptySource);
        }

        if data.len() < STUDIO_HEADER_SIZE {
            return Err(ParserError::FormatError {
                reason: "studio header is truncated",
            });
        }

        let raw = RawStudioHeader::parse(&mut Cursor::new(data))?;
        if raw.id != FOURCC_STUDIO_HEADER {
            return Err(ParserError::InvalidMagicValue { magic: raw.id });
        }

        if !STUDIO_VERSIONS.contains(&raw.version) {
            return Err(ParserError::UnsupportedVersion { version: raw.version });
        }

        if raw.length < STUDIO_HEADER_SIZE as i32 || raw.length as usize > data.len() {
            return Err(ParserError::FormatError {
                reason: "declared studio length disagrees with the data",
            });
        }

        Ok(raw)
    }

    pub fn parse_header(data: &[u8]) -> Result<StudioHeader, ParserError> {
        let raw = StudioReader::parse_raw(data)?;
        let data = &data[..raw.length as usize];

        let sequences: Vec<SequenceDesc> =
            StudioReader::read_table(data, raw.localseqindex, raw.numlocalseq, 8, "sequence table")?;
        let anim_blocks: Vec<AnimBlockRange> =
            StudioReader::read_table(data, raw.animblockindex, raw.numanimblocks, 8, "animation block table")?;
        if !anim_blocks.iter().all(AnimBlockRange::is_valid) {
            return Err(ParserError::FormatError {
                reason: "animation block range is negative or reversed",
            });
        }
        let raw_includes: Vec<RawIncludeModel> =
            StudioReader::read_table(data, raw.includemodelindex, raw.numincludemodels, 8, "include table")?;

        let anim_block_name = match raw.animblocknameindex {
            0 => None,
            index if index < 0 => {
                return Err(ParserError::FormatError {
                    reason: "negative animation block name offset",
                });
            }
            index => Some(read_cstring_at(data, index as usize, "animation block name")?),
        };

        let include_models = raw_includes
            .iter()
            .map(|include| {
                if include.label_index < 0 || include.name_index < 0 {
                    return Err(ParserError::FormatError {
                        reason: "negative include string offset",
                    });
                }

                Ok(IncludeModel {
                    label: read_cstring_at(data, include.label_index as usize, "include label")?,
                    name: read_cstring_at(data, include.name_index as usize, "include name")?,
                })
            })
            .collect::<Result<Vec<_>, ParserError>>()?;

        Ok(StudioHeader {
            version: raw.version,
            checksum: raw.checksum,
            name: fixed_name(&raw.name)?,
            length: raw.length,
            flags: raw.flags,
            num_body_parts: raw.numbodyparts,
            num_flex_desc: raw.numflexdesc,
            sequences,
            anim_blocks,
            anim_block_name,
            include_models,
            root_lod: raw.rootlod,
            num_allowed_root_lods: raw.numallowedrootlods,
        })
    }
}
