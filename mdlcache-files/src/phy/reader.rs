use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::ParserError;
use crate::common::reader::Parseable;
use crate::phy::types::{CollisionFile, PHY_HEADER_SIZE, PhyHeader};

pub struct PhyReader {}

impl PhyReader {
    pub fn parse_header(data: &[u8]) -> Result<PhyHeader, ParserError> {
        if data.is_empty() {
            return Err(ParserError::EmptySource);
        }

        PhyHeader::parse(&mut Cursor::new(data))
    }

    /// Splits a collision file into its solids. A header without solids yields an empty list.
    pub fn parse(data: &[u8]) -> Result<CollisionFile, ParserError> {
        let header = PhyReader::parse_header(data)?;
        if header.size != PHY_HEADER_SIZE {
            return Err(ParserError::FormatError {
                reason: "collision header size must be 16",
            });
        }

        let mut rdr = Cursor::new(data);
        rdr.set_position(PHY_HEADER_SIZE as u64);

        let mut solids = Vec::with_capacity(header.solid_count.max(0) as usize);
        for _ in 0..header.solid_count.max(0) {
            let size = rdr.read_i32::<LittleEndian>()?;
            if size < 0 {
                return Err(ParserError::FormatError {
                    reason: "negative solid size",
                });
            }

            let mut solid = vec![0u8; size as usize];
            rdr.read_exact(&mut solid)?;
            solids.push(solid);
        }

        let mut text = Vec::new();
        rdr.read_to_end(&mut text)?;
        while text.last() == Some(&0) {
            text.pop();
        }

        Ok(CollisionFile {
            header,
            solids,
            key_values: String::from_utf8(text)?,
        })
    }
}
