use std::sync::{Arc, Mutex};

use crate::cache::section::CacheSection;
use crate::util::lock;

pub trait FrameLockable: Send + Sync {
    fn begin_frame_locking(&self) -> u32;

    /// Returns whether the outermost frame lock was released.
    fn end_frame_locking(&self) -> bool;

    fn frame_lock_depth(&self) -> u32;
}

impl<T: Clone + Send + Sync> FrameLockable for CacheSection<T> {
    fn begin_frame_locking(&self) -> u32 {
        CacheSection::begin_frame_locking(self)
    }

    fn end_frame_locking(&self) -> bool {
        CacheSection::end_frame_locking(self)
    }

    fn frame_lock_depth(&self) -> u32 {
        CacheSection::frame_lock_depth(self)
    }
}

/// Frame locks the header and mesh sections together, and remembers how deeply they were
/// nested when a frame lock gets broken.
pub struct FrameLockCoordinator {
    models: Arc<dyn FrameLockable>,
    meshes: Arc<dyn FrameLockable>,
    /// Depths of (models, meshes) taken by the last break.
    saved: Mutex<(u32, u32)>,
}

impl FrameLockCoordinator {
    pub fn new(models: Arc<dyn FrameLockable>, meshes: Arc<dyn FrameLockable>) -> Self {
        Self {
            models,
            meshes,
            saved: Mutex::new((0, 0)),
        }
    }

    pub fn begin_lock(&self) {
        self.models.begin_frame_locking();
        self.meshes.begin_frame_locking();
    }

    pub fn end_lock(&self) {
        self.models.end_frame_locking();
        self.meshes.end_frame_locking();
    }

    fn unwind(section: &dyn FrameLockable) -> u32 {
        let mut depth = 0;
        while section.frame_lock_depth() > 0 {
            depth += 1;
            if section.end_frame_locking() {
                break;
            }
        }
        depth
    }

    /// Releases every nesting level of the chosen sections, saving the depth for `restore`.
    pub fn break_lock(&self, models: bool, meshes: bool) {
        let mut saved = lock(&self.saved);
        if models {
            saved.0 += Self::unwind(self.models.as_ref());
        }
        if meshes {
            saved.1 += Self::unwind(self.meshes.as_ref());
        }
    }

    /// Re-enters as many frame locks as the last break released.
    pub fn restore(&self) {
        let (models, meshes) = std::mem::take(&mut *lock(&self.saved));
        for _ in 0..models {
            self.models.begin_frame_locking();
        }
        for _ in 0..meshes {
            self.meshes.begin_frame_locking();
        }
    }

    pub fn depths(&self) -> (u32, u32) {
        (self.models.frame_lock_depth(), self.meshes.frame_lock_depth())
    }
}
