use mdlcache_files_derive_parseable::Parse;

pub const PHY_HEADER_SIZE: i32 = 16;

#[derive(Debug, Copy, Clone, PartialEq, Parse)]
pub struct PhyHeader {
    pub size: i32,
    pub id: i32,
    pub solid_count: i32,
    pub check_sum: i32,
}

impl PhyHeader {
    pub fn is_valid(&self) -> bool {
        self.size == PHY_HEADER_SIZE && self.solid_count > 0
    }
}

#[derive(Debug, Clone)]
pub struct CollisionFile {
    pub header: PhyHeader,
    pub solids: Vec<Vec<u8>>,
    /// Trailing text block describing the solids.
    pub key_values: String,
}

impl CollisionFile {
    pub fn memory_size(&self) -> usize {
        PHY_HEADER_SIZE as usize + self.solids.iter().map(|solid| solid.len() + 4).sum::<usize>() + self.key_values.len()
    }
}
