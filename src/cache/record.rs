use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::handle::RecordFlags;
use crate::cache::section::EntryRef;
use crate::cache::virtual_model::VirtualModel;
use crate::collision::decoder::CollisionSet;

#[derive(Debug, Default, Clone, Copy)]
pub struct AnimBlockSlot {
    pub entry: Option<EntryRef>,
    /// First request time while a diagnostic stall is configured.
    pub stall_started: Option<Instant>,
}

pub type UserData = Arc<dyn Any + Send + Sync>;

/// Per-model bookkeeping, owned by the registry.
pub struct AssetRecord {
    pub name: String,
    pub ref_count: u32,
    pub flags: RecordFlags,
    pub header: Option<EntryRef>,
    pub vertexes: Option<EntryRef>,
    pub hardware: Option<EntryRef>,
    /// Allocated on first use, one slot per declared block.
    pub anim_blocks: Option<Vec<AnimBlockSlot>>,
    pub autoplay: Option<Arc<[u16]>>,
    pub virtual_model: Option<Arc<VirtualModel>>,
    pub collision: Option<Arc<CollisionSet>>,
    pub user_data: Option<UserData>,
}

impl AssetRecord {
    pub fn new(name: String) -> Self {
        Self {
            name,
            ref_count: 1,
            flags: RecordFlags::empty(),
            header: None,
            vertexes: None,
            hardware: None,
            anim_blocks: None,
            autoplay: None,
            virtual_model: None,
            collision: None,
            user_data: None,
        }
    }

    pub fn anim_block_entry(&self, block: usize) -> Option<EntryRef> {
        self.anim_blocks.as_ref()?.get(block)?.entry
    }
}
