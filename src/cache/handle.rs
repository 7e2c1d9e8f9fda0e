use std::fmt::{Display, Formatter};

use bitflags::bitflags;

/// Identifies one named model. Stale once the model is fully released; the slot may be reused
/// under a new generation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelHandle {
    index: u32,
    generation: u32,
}

impl ModelHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Display for ModelHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataKind {
    StudioHeader,
    HardwareMesh,
    Collision,
    AnimBlock,
    VirtualModel,
    Vertexes,
}

impl DataKind {
    pub const ALL: [DataKind; 6] = [
        DataKind::StudioHeader,
        DataKind::HardwareMesh,
        DataKind::Collision,
        DataKind::AnimBlock,
        DataKind::VirtualModel,
        DataKind::Vertexes,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DataKind::StudioHeader => "studiohdr",
            DataKind::HardwareMesh => "studiohwdata",
            DataKind::Collision => "vcollide",
            DataKind::AnimBlock => "animblock",
            DataKind::VirtualModel => "virtualmodel",
            DataKind::Vertexes => "vertexes",
        }
    }
}

impl Display for DataKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One piece of a model's data. `block` is only meaningful for animation blocks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DataKey {
    pub handle: ModelHandle,
    pub kind: DataKind,
    pub block: u32,
}

impl DataKey {
    pub fn new(handle: ModelHandle, kind: DataKind) -> Self {
        Self { handle, kind, block: 0 }
    }

    pub fn anim_block(handle: ModelHandle, block: u32) -> Self {
        Self {
            handle,
            kind: DataKind::AnimBlock,
            block,
        }
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FlushFlags: u32 {
        const STUDIO_HEADER = 0x01;
        const HARDWARE_MESH = 0x02;
        const COLLISION = 0x04;
        const ANIM_BLOCK = 0x08;
        const VIRTUAL_MODEL = 0x10;
        const AUTOPLAY = 0x20;
        const VERTEXES = 0x40;
        /// Removes entries even while they are locked.
        const IGNORE_LOCK = 0x8000_0000;
        const ALL = 0xFFFF_FFFF;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct RecordFlags: u16 {
        const MESH_LOADED = 0x0001;
        const COLLISION_LOADED = 0x0002;
        /// The header came from the fallback model.
        const ERROR_MODEL = 0x0004;
        const NO_MESH = 0x0008;
        const NO_VERTEX_DATA = 0x0010;
        const COLLISION_SHARED = 0x0020;
        /// Header pinned by the map-load lock.
        const LOCKED_HEADER = 0x0040;
    }
}
