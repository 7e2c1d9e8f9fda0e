use log::debug;
use mdlcache_files::phy::reader::PhyReader;

/// Decoded collision data of one model, possibly shared with the models including it.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionSet {
    pub solids: Vec<Vec<u8>>,
    pub key_values: String,
}

impl CollisionSet {
    pub fn solid_count(&self) -> usize {
        self.solids.len()
    }

    pub fn memory_size(&self) -> usize {
        self.solids.iter().map(|solid| solid.len()).sum::<usize>() + self.key_values.len()
    }
}

pub trait CollisionDecoder: Send + Sync {
    /// Decodes a whole collision file. A set without solids means the model has no collision.
    fn decode(&self, data: &[u8]) -> Option<CollisionSet>;

    fn unload(&self, _collision: &CollisionSet) {}
}

#[derive(Debug, Default, Copy, Clone)]
pub struct SolidCollisionDecoder;

impl CollisionDecoder for SolidCollisionDecoder {
    fn decode(&self, data: &[u8]) -> Option<CollisionSet> {
        match PhyReader::parse(data) {
            Ok(file) => Some(CollisionSet {
                solids: file.solids,
                key_values: file.key_values,
            }),
            Err(err) => {
                debug!("Collision data is unusable: {}", err);
                None
            }
        }
    }
}
