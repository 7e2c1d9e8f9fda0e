use crate::common::types::fourcc;
use bitflags::bitflags;
use mdlcache_files_derive_parseable::Parse;

pub const FOURCC_STUDIO_HEADER: u32 = fourcc(b"IDST");
pub const STUDIO_HEADER_SIZE: usize = 124;
pub const STUDIO_VERSIONS: std::ops::RangeInclusive<i32> = 44..=49;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct StudioFlags: i32 {
        const AUTOGENERATED_HITBOX = 0x0001;
        const USES_ENV_CUBEMAP = 0x0002;
        const FORCE_OPAQUE = 0x0004;
        const TRANSLUCENT_TWOPASS = 0x0008;
        const STATIC_PROP = 0x0010;
        const HAS_SHADOW_LOD = 0x0040;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SequenceFlags: i32 {
        const LOOPING = 0x0001;
        const SNAP = 0x0002;
        const DELTA = 0x0004;
        /// Plays on its own whenever the model is shown.
        const AUTOPLAY = 0x0008;
    }
}

/// The on-disk header, exactly as it is laid out.
#[derive(Debug, Clone, Parse)]
pub(crate) struct RawStudioHeader {
    pub id: u32,
    pub version: i32,
    pub checksum: i32,
    pub name: [u8; 64],
    pub length: i32,
    pub flags: i32,
    pub numbodyparts: i32,
    pub numflexdesc: i32,
    pub numlocalseq: i32,
    pub localseqindex: i32,
    pub numanimblocks: i32,
    pub animblockindex: i32,
    pub animblocknameindex: i32,
    pub numincludemodels: i32,
    pub includemodelindex: i32,
    pub rootlod: u8,
    pub numallowedrootlods: u8,
    pub unused: [u8; 2],
}

#[derive(Debug, Copy, Clone, PartialEq, Parse)]
pub struct SequenceDesc {
    pub flags: i32,
    pub num_frames: i32,
}

impl SequenceDesc {
    pub fn is_autoplay(&self) -> bool {
        self.sequence_flags().contains(SequenceFlags::AUTOPLAY)
    }

    pub fn sequence_flags(&self) -> SequenceFlags {
        SequenceFlags::from_bits_retain(self.flags)
    }
}

/// Byte range `[data_start, data_end)` inside the animation block file.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Parse)]
pub struct AnimBlockRange {
    pub data_start: i32,
    pub data_end: i32,
}

impl AnimBlockRange {
    pub fn len(&self) -> usize {
        (self.data_end as i64 - self.data_start as i64).max(0) as usize
    }

    pub fn is_valid(&self) -> bool {
        self.data_start >= 0 && self.data_end >= self.data_start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Copy, Clone, Parse)]
pub(crate) struct RawIncludeModel {
    pub label_index: i32,
    pub name_index: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeModel {
    pub label: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudioHeader {
    pub version: i32,
    pub checksum: i32,
    pub name: String,
    /// Declared size of the header blob.
    pub length: i32,
    pub flags: i32,
    pub num_body_parts: i32,
    pub num_flex_desc: i32,
    pub sequences: Vec<SequenceDesc>,
    /// Index 0 is reserved and never loaded.
    pub anim_blocks: Vec<AnimBlockRange>,
    pub anim_block_name: Option<String>,
    pub include_models: Vec<IncludeModel>,
    pub root_lod: u8,
    pub num_allowed_root_lods: u8,
}

impl StudioHeader {
    pub fn autoplay_sequences(&self) -> Vec<u16> {
        self.sequences
            .iter()
            .enumerate()
            .filter(|(_, seq)| seq.is_autoplay())
            .map(|(idx, _)| idx as u16)
            .collect()
    }

    pub fn studio_flags(&self) -> StudioFlags {
        StudioFlags::from_bits_retain(self.flags)
    }

    pub fn has_flexes(&self) -> bool {
        self.num_flex_desc > 0
    }

    pub fn num_anim_blocks(&self) -> usize {
        self.anim_blocks.len()
    }

    /// Picks the root level of detail, bounded by what the model allows.
    pub fn set_root_lod(&mut self, lod: u8) {
        self.root_lod = match self.num_allowed_root_lods {
            0 => lod,
            allowed => lod.min(allowed - 1),
        };
    }

    /// Approximate footprint, used to account the header in its cache section.
    pub fn memory_size(&self) -> usize {
        self.length.max(0) as usize
    }
}
