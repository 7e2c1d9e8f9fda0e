#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use mdlcache::cache::{CacheNotify, DataKind, ModelCache, ModelHandle};
use mdlcache::io::memory::{AsyncMode, MemoryFileSystem};
use mdlcache::settings::{CacheSettings, SectionBudgets};
use mdlcache::util::with_extension;
use mdlcache_files::builders::{MeshIndexBuilder, PhyBuilder, StudioBuilder, VertexFileBuilder, rigid_vertex};
use mdlcache_files::common::types::Vector3;

pub const VTX: &str = ".dx90.vtx";
pub const AUTOPLAY: i32 = 0x0008;

pub fn vertices(count: usize) -> Vec<mdlcache_files::vvd::types::StudioVertex> {
    (0..count)
        .map(|idx| {
            rigid_vertex(Vector3 {
                x: idx as f32,
                y: 0.0,
                z: 1.0,
            })
        })
        .collect()
}

pub fn studio(name: &str, checksum: i32) -> StudioBuilder {
    StudioBuilder::new(name, checksum).sequence(0, 10)
}

/// Writes every file of a model built from `header`: `.mdl`, `.vvd`, the mesh index and `.phy`.
pub fn install(fs: &MemoryFileSystem, name: &str, header: StudioBuilder) {
    let checksum = header.checksum;
    fs.insert(name, header.build());
    fs.insert(
        &with_extension(name, ".vvd"),
        VertexFileBuilder::new(checksum, vertices(8)).build(),
    );
    fs.insert(&with_extension(name, VTX), MeshIndexBuilder::new(checksum).build());
    fs.insert(
        &with_extension(name, ".phy"),
        PhyBuilder::new(checksum)
            .solid(&[1, 2, 3, 4])
            .key_values("solid { \"index\" \"0\" }")
            .build(),
    );
}

pub fn install_model(fs: &MemoryFileSystem, name: &str, checksum: i32) {
    install(fs, name, studio(name, checksum));
}

pub fn memory_fs() -> Arc<MemoryFileSystem> {
    Arc::new(MemoryFileSystem::new())
}

pub fn manual_fs() -> Arc<MemoryFileSystem> {
    Arc::new(MemoryFileSystem::with_mode(AsyncMode::Manual))
}

pub fn cache_with(fs: &Arc<MemoryFileSystem>, settings: CacheSettings) -> Arc<ModelCache> {
    ModelCache::builder(fs.clone()).with_settings(settings).build()
}

pub fn cache(fs: &Arc<MemoryFileSystem>) -> Arc<ModelCache> {
    cache_with(fs, CacheSettings::default())
}

pub fn budgeted_cache(fs: &Arc<MemoryFileSystem>, budgets: SectionBudgets) -> Arc<ModelCache> {
    ModelCache::builder(fs.clone()).with_budgets(budgets).build()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    Loaded(DataKind, ModelHandle),
    Unloaded(DataKind, ModelHandle),
}

#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl CacheNotify for Recorder {
    fn on_data_loaded(&self, kind: DataKind, handle: ModelHandle) {
        if let Ok(mut events) = self.events.lock() {
            events.push(Event::Loaded(kind, handle));
        }
    }

    fn on_data_unloaded(&self, kind: DataKind, handle: ModelHandle) {
        if let Ok(mut events) = self.events.lock() {
            events.push(Event::Unloaded(kind, handle));
        }
    }
}
