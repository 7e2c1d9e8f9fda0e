use std::sync::atomic::{AtomicBool, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, Weak};
use std::thread::ThreadId;

use log::{debug, error, trace, warn};
use mdlcache_files::ParserError;
use mdlcache_files::studio::reader::StudioReader;
use mdlcache_files::studio::types::StudioHeader;
use mdlcache_files::vtx::reader::MeshIndexReader;
use mdlcache_files::vvd::reader::VertexReader;
use mdlcache_files::vvd::types::{ThinVertexData, VertexData};
use thiserror::Error;

use crate::cache::async_tracker::{AsyncTracker, PollResult, RequestId};
use crate::cache::frame_lock::FrameLockCoordinator;
use crate::cache::handle::{DataKey, DataKind, FlushFlags, ModelHandle, RecordFlags};
use crate::cache::record::UserData;
use crate::cache::registry::HandleRegistry;
use crate::cache::section::{CacheSection, EntryRef, EvictionNotice, SectionLimits, SectionStatus};
use crate::collision::decoder::{CollisionDecoder, SolidCollisionDecoder};
use crate::io::common::loader::FileSystem;
use crate::io::common::transform::{PayloadTransform, ZlibEnvelope};
use crate::io::queued::QueuedLoader;
use crate::mesh::builder::{HardwareMesh, HardwareMeshBuilder, StudioMeshBuilder};
use crate::settings::{CacheSettings, SectionBudgets};
use crate::util::{lock, read, with_extension, write};

/// Loaded in place of any model whose header cannot be read.
pub const ERROR_MODEL_NAME: &str = "models/error.mdl";

/// Load tracing: `info` with the `MDLCache:` prefix when enabled, `trace` otherwise.
macro_rules! load_msg {
    ($cache:expr, $($arg:tt)+) => {
        if $cache.trace_load() {
            log::info!("MDLCache: {}", format_args!($($arg)+));
        } else {
            log::trace!("MDLCache: {}", format_args!($($arg)+));
        }
    };
}

mod loading;
mod queued;

pub use queued::ModelPart;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CacheError {
    #[error("{handle} is not a valid model handle")]
    InvalidHandle { handle: ModelHandle },

    #[error("Model {name} not found and {} couldn't be loaded", ERROR_MODEL_NAME)]
    Unloadable { name: String },
}

/// Callbacks for consumers that mirror cache residency.
pub trait CacheNotify: Send + Sync {
    fn on_data_loaded(&self, _kind: DataKind, _handle: ModelHandle) {}

    fn on_data_unloaded(&self, _kind: DataKind, _handle: ModelHandle) {}
}

/// Vertex data as cached: either full, or reduced for decal projection once a mesh was built.
#[derive(Debug, Clone, PartialEq)]
pub enum VertexPayload {
    Full(VertexData),
    Thin(ThinVertexData),
}

impl VertexPayload {
    pub fn checksum(&self) -> i32 {
        match self {
            VertexPayload::Full(data) => data.header.checksum,
            VertexPayload::Thin(data) => data.checksum,
        }
    }

    pub fn vertex_count(&self) -> usize {
        match self {
            VertexPayload::Full(data) => data.vertices.len(),
            VertexPayload::Thin(data) => data.vertex_count(),
        }
    }

    pub fn is_thin(&self) -> bool {
        matches!(self, VertexPayload::Thin(_))
    }

    pub fn memory_size(&self) -> usize {
        match self {
            VertexPayload::Full(data) => data.memory_size(),
            VertexPayload::Thin(data) => data.memory_size(),
        }
    }
}

/// Contents of the mesh section.
#[derive(Debug, Clone)]
pub enum MeshData {
    Vertexes(Arc<VertexPayload>),
    Hardware(Arc<HardwareMesh>),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum AsyncOutcome {
    /// Not on the main thread or no such request.
    Indeterminate,
    Pending,
    Done,
}

pub struct ModelCacheBuilder {
    file_system: Arc<dyn FileSystem>,
    settings: CacheSettings,
    budgets: SectionBudgets,
    transform: Box<dyn PayloadTransform>,
    mesh_builder: Box<dyn HardwareMeshBuilder>,
    collision_decoder: Box<dyn CollisionDecoder>,
    queued_loader: Option<Arc<dyn QueuedLoader>>,
}

impl ModelCacheBuilder {
    pub fn new(file_system: Arc<dyn FileSystem>) -> Self {
        Self {
            file_system,
            settings: CacheSettings::default(),
            budgets: SectionBudgets::default(),
            transform: Box::new(ZlibEnvelope),
            mesh_builder: Box::new(StudioMeshBuilder),
            collision_decoder: Box::new(SolidCollisionDecoder),
            queued_loader: None,
        }
    }

    pub fn with_settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_budgets(mut self, budgets: SectionBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    pub fn with_transform(mut self, transform: impl PayloadTransform + 'static) -> Self {
        self.transform = Box::new(transform);
        self
    }

    pub fn with_mesh_builder(mut self, builder: impl HardwareMeshBuilder + 'static) -> Self {
        self.mesh_builder = Box::new(builder);
        self
    }

    pub fn with_collision_decoder(mut self, decoder: impl CollisionDecoder + 'static) -> Self {
        self.collision_decoder = Box::new(decoder);
        self
    }

    pub fn with_queued_loader(mut self, loader: Arc<dyn QueuedLoader>) -> Self {
        self.queued_loader = Some(loader);
        self
    }

    /// The calling thread becomes the main thread of the cache.
    pub fn build(self) -> Arc<ModelCache> {
        let limits = |max_bytes: Option<usize>| SectionLimits {
            max_bytes,
            max_items: None,
        };

        Arc::new_cyclic(|weak: &Weak<ModelCache>| {
            let model_section = Arc::new(CacheSection::new("model", limits(self.budgets.model)));
            let mesh_section = Arc::new(CacheSection::new("mesh", limits(self.budgets.mesh)));
            let anim_section = Arc::new(CacheSection::new("anim", limits(self.budgets.anim)));

            let cache = weak.clone();
            model_section.set_listener(Box::new(move |notice| {
                if let Some(cache) = cache.upgrade() {
                    cache.on_header_evicted(notice);
                }
            }));
            let cache = weak.clone();
            mesh_section.set_listener(Box::new(move |notice| {
                if let Some(cache) = cache.upgrade() {
                    cache.on_mesh_evicted(notice);
                }
            }));
            let cache = weak.clone();
            anim_section.set_listener(Box::new(move |notice| {
                if let Some(cache) = cache.upgrade() {
                    cache.on_anim_block_evicted(notice);
                }
            }));

            let frame_locks = FrameLockCoordinator::new(model_section.clone(), mesh_section.clone());

            ModelCache {
                registry: HandleRegistry::new(),
                model_section,
                mesh_section,
                anim_section,
                tracker: AsyncTracker::new(),
                frame_locks,
                settings: RwLock::new(self.settings),
                file_system: self.file_system,
                transform: self.transform,
                mesh_builder: self.mesh_builder,
                collision_decoder: self.collision_decoder,
                queued_loader: RwLock::new(self.queued_loader),
                notify: RwLock::new(None),
                queued_models: Arc::new(Mutex::new(Vec::new())),
                header_loads: Mutex::new(HashMap::new()),
                header_loaded: Condvar::new(),
                draining: AtomicBool::new(false),
                lost_video_memory: AtomicBool::new(false),
            }
        })
    }
}

/// Marks a header load in flight until dropped.
struct HeaderClaim<'a> {
    cache: &'a ModelCache,
    handle: ModelHandle,
    owned: bool,
}

impl Drop for HeaderClaim<'_> {
    fn drop(&mut self) {
        if self.owned {
            lock(&self.cache.header_loads).remove(&self.handle);
            self.cache.header_loaded.notify_all();
        }
    }
}

/// Loads, caches and reference counts everything a studio model consists of.
///
/// Headers live in the model section, vertex and hardware mesh data in the mesh section and
/// animation blocks in the anim section. Async completions are only ever processed on the thread
/// that built the cache.
pub struct ModelCache {
    registry: HandleRegistry,
    model_section: Arc<CacheSection<Arc<StudioHeader>>>,
    mesh_section: Arc<CacheSection<MeshData>>,
    anim_section: Arc<CacheSection<Arc<Vec<u8>>>>,
    tracker: AsyncTracker,
    frame_locks: FrameLockCoordinator,
    settings: RwLock<CacheSettings>,
    file_system: Arc<dyn FileSystem>,
    transform: Box<dyn PayloadTransform>,
    mesh_builder: Box<dyn HardwareMeshBuilder>,
    collision_decoder: Box<dyn CollisionDecoder>,
    queued_loader: RwLock<Option<Arc<dyn QueuedLoader>>>,
    notify: RwLock<Option<Arc<dyn CacheNotify>>>,
    queued_models: Arc<Mutex<Vec<Arc<queued::QueuedModel>>>>,
    /// Headers being read and the thread reading them. Only held while claiming, never while
    /// loading or notifying.
    header_loads: Mutex<HashMap<ModelHandle, ThreadId>>,
    header_loaded: Condvar,
    draining: AtomicBool,
    lost_video_memory: AtomicBool,
}

impl ModelCache {
    pub fn builder(file_system: Arc<dyn FileSystem>) -> ModelCacheBuilder {
        ModelCacheBuilder::new(file_system)
    }

    fn trace_load(&self) -> bool {
        read(&self.settings).trace_load
    }

    pub fn settings(&self) -> CacheSettings {
        read(&self.settings).clone()
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut CacheSettings)) {
        update(&mut write(&self.settings));
    }

    pub fn get_async_load(&self, kind: DataKind) -> bool {
        read(&self.settings).async_load(kind)
    }

    /// Returns the previous value.
    pub fn set_async_load(&self, kind: DataKind, enabled: bool) -> bool {
        write(&self.settings).set_async_load(kind, enabled)
    }

    pub fn set_cache_notify(&self, notify: Option<Arc<dyn CacheNotify>>) {
        *write(&self.notify) = notify;
    }

    pub fn set_queued_loader(&self, loader: Option<Arc<dyn QueuedLoader>>) {
        *write(&self.queued_loader) = loader;
    }

    fn notify_loaded(&self, kind: DataKind, handle: ModelHandle) {
        let notify = read(&self.notify).clone();
        if let Some(notify) = notify {
            notify.on_data_loaded(kind, handle);
        }
    }

    fn notify_unloaded(&self, kind: DataKind, handle: ModelHandle) {
        let notify = read(&self.notify).clone();
        if let Some(notify) = notify {
            notify.on_data_unloaded(kind, handle);
        }
    }

    fn flags(&self, handle: ModelHandle) -> RecordFlags {
        self.registry
            .with_record(handle, |record| record.flags)
            .unwrap_or_default()
    }

    fn set_flags(&self, handle: ModelHandle, flags: RecordFlags) {
        self.registry.with_record_mut(handle, |record| record.flags |= flags);
    }

    fn clear_flags(&self, handle: ModelHandle, flags: RecordFlags) {
        self.registry.with_record_mut(handle, |record| record.flags -= flags);
    }

    /// Path of one of the model's companion files, derived from the name actually loaded.
    fn model_path(&self, handle: ModelHandle, extension: &str) -> Option<String> {
        self.get_actual_model_name(handle)
            .map(|name| with_extension(&name, extension))
    }

    fn vtx_extension(&self) -> &'static str {
        read(&self.settings).vtx_extension()
    }

    pub fn find_model(&self, name: &str) -> ModelHandle {
        let (handle, created) = self.registry.find_or_create(name);
        if created {
            load_msg!(self, "Registered {} as {}", name, handle);
        }
        handle
    }

    pub fn add_ref(&self, handle: ModelHandle) -> u32 {
        self.registry.add_ref(handle)
    }

    /// Tears the model down once the last reference is gone.
    pub fn release(&self, handle: ModelHandle) -> u32 {
        if !self.registry.is_valid(handle) {
            return 0;
        }

        let remaining = self.registry.release(handle);
        if remaining == 0 {
            self.teardown(handle);
        }
        remaining
    }

    fn teardown(&self, handle: ModelHandle) {
        load_msg!(self, "Free {}", self.get_model_name(handle).unwrap_or_default());
        self.flush_model(handle, FlushFlags::ALL);
        self.tracker.clear_handle(handle, self.file_system.as_ref());
        self.registry.destroy(handle);
    }

    pub fn get_ref(&self, handle: ModelHandle) -> u32 {
        self.registry.get_ref(handle)
    }

    pub fn is_valid(&self, handle: ModelHandle) -> bool {
        self.registry.is_valid(handle)
    }

    pub fn get_model_name(&self, handle: ModelHandle) -> Option<String> {
        if !self.registry.is_initialized() {
            return None;
        }
        self.registry.name(handle)
    }

    /// The fallback name once the model was substituted by the error model.
    pub fn get_actual_model_name(&self, handle: ModelHandle) -> Option<String> {
        if self.is_error_model(handle) {
            return Some(ERROR_MODEL_NAME.to_string());
        }
        self.get_model_name(handle)
    }

    pub fn is_error_model(&self, handle: ModelHandle) -> bool {
        self.flags(handle).contains(RecordFlags::ERROR_MODEL)
    }

    /// Only forgets the substitution; cached data of the error model stays until flushed.
    pub fn reset_error_model_status(&self, handle: ModelHandle) {
        self.clear_flags(handle, RecordFlags::ERROR_MODEL);
    }

    pub fn set_user_data(&self, handle: ModelHandle, data: Option<UserData>) {
        self.registry.with_record_mut(handle, |record| record.user_data = data);
    }

    pub fn get_user_data(&self, handle: ModelHandle) -> Option<UserData> {
        self.registry
            .with_record(handle, |record| record.user_data.clone())
            .flatten()
    }

    /// Returns the header, loading it synchronously on a miss. A model that cannot be read is
    /// substituted by the error model once; failing that is the only hard error of the cache.
    pub fn get_studio_header(&self, handle: ModelHandle) -> Result<Arc<StudioHeader>, CacheError> {
        if !self.registry.is_valid(handle) {
            return Err(CacheError::InvalidHandle { handle });
        }

        if let Some(header) = self.cached_header(handle) {
            self.repin_header(handle);
            return Ok(header);
        }

        let header = {
            let _claim = match self.claim_header_load(handle) {
                Ok(claim) => claim,
                Err(header) => return Ok(header),
            };
            self.load_studio_header(handle)?
        };

        if read(&self.settings).force_data {
            self.load_all_virtual_models_and_anim_blocks(handle);
        }

        Ok(header)
    }

    /// Waits while another thread reads the header of `handle`. `Err` carries the header that
    /// arrived meanwhile. The reading thread itself may claim again, so a notify callback can
    /// ask for any header, its own included.
    fn claim_header_load(&self, handle: ModelHandle) -> Result<HeaderClaim<'_>, Arc<StudioHeader>> {
        let current = std::thread::current().id();
        let mut loads = lock(&self.header_loads);
        loop {
            if let Some(header) = self.cached_header(handle) {
                return Err(header);
            }

            match loads.get(&handle).copied() {
                Some(owner) if owner == current => {
                    return Ok(HeaderClaim { cache: self, handle, owned: false });
                }
                Some(_) => {
                    loads = self
                        .header_loaded
                        .wait(loads)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                None => {
                    loads.insert(handle, current);
                    return Ok(HeaderClaim { cache: self, handle, owned: true });
                }
            }
        }
    }

    /// With headers locked on load, asking for an unpinned header pins it again. Map loads rely
    /// on that to tell used headers from stray ones.
    fn repin_header(&self, handle: ModelHandle) {
        if !read(&self.settings).lock_headers_on_load {
            return;
        }

        let entry = self
            .registry
            .with_record_mut(handle, |record| {
                if record.flags.contains(RecordFlags::LOCKED_HEADER) {
                    return None;
                }
                let entry = record.header?;
                record.flags |= RecordFlags::LOCKED_HEADER;
                Some(entry)
            })
            .flatten();

        if let Some(entry) = entry {
            self.model_section.lock(entry);
        }
    }

    fn load_studio_header(&self, handle: ModelHandle) -> Result<Arc<StudioHeader>, CacheError> {
        profiling::scope!("ModelCache::load_studio_header");
        let name = self
            .get_actual_model_name(handle)
            .ok_or(CacheError::InvalidHandle { handle })?;

        let header = match self.read_studio_header(&name) {
            Some(header) => header,
            None => {
                let first_failure = !self.is_error_model(handle);
                self.set_flags(handle, RecordFlags::ERROR_MODEL);
                let fallback = if first_failure {
                    self.read_studio_header(ERROR_MODEL_NAME)
                } else {
                    None
                };

                match fallback {
                    Some(header) => header,
                    None => {
                        error!("Model {} not found and {} couldn't be loaded", name, ERROR_MODEL_NAME);
                        return Err(CacheError::Unloadable { name });
                    }
                }
            }
        };

        Ok(self.cache_studio_header(handle, header))
    }

    fn cached_header(&self, handle: ModelHandle) -> Option<Arc<StudioHeader>> {
        let entry = self.registry.with_record(handle, |record| record.header).flatten()?;
        self.model_section.get(entry)
    }

    fn read_studio_header(&self, path: &str) -> Option<StudioHeader> {
        load_msg!(self, "Load studiohdr {}", path);
        match self.file_system.read_file(path) {
            Ok(bytes) => self.decode_studio_header(path, bytes),
            Err(err) => {
                debug!("Failed to load {}: {}", path, err);
                None
            }
        }
    }

    fn decode_studio_header(&self, path: &str, bytes: Vec<u8>) -> Option<StudioHeader> {
        let decoded = self
            .transform
            .apply(bytes)
            .and_then(|bytes| StudioReader::parse_header(&bytes));

        let header = match decoded {
            Ok(header) => header,
            Err(err) => {
                warn!("Model {} is not a usable studio model: {}", path, err);
                return None;
            }
        };

        if read(&self.settings).verify_level >= 2 && !self.verify_headers(path, &header) {
            warn!("Model {} has mismatched .vvd + .vtx files!", path);
            return None;
        }

        Some(header)
    }

    /// Checks that the vertex and mesh-index files on disk belong to `header`.
    fn verify_headers(&self, path: &str, header: &StudioHeader) -> bool {
        if header.num_body_parts == 0 {
            return true;
        }

        let read_decoded = |extension: &str| -> Option<Vec<u8>> {
            let bytes = self.file_system.read_file(&with_extension(path, extension)).ok()?;
            self.transform.apply(bytes).ok()
        };

        let vertexes_match = read_decoded(".vvd").is_some_and(|bytes| {
            VertexReader::parse_header(&bytes)
                .and_then(|vertex_header| VertexReader::check(&vertex_header, header.checksum))
                .is_ok()
        });
        let mesh_index_matches = read_decoded(self.vtx_extension()).is_some_and(|bytes| {
            MeshIndexReader::parse_header(&bytes)
                .and_then(|index_header| MeshIndexReader::check(&index_header, header.checksum))
                .is_ok()
        });

        vertexes_match && mesh_index_matches
    }

    fn cache_studio_header(&self, handle: ModelHandle, mut header: StudioHeader) -> Arc<StudioHeader> {
        let (root_lod, lock_on_load) = {
            let settings = read(&self.settings);
            (settings.root_lod, settings.lock_headers_on_load)
        };

        if root_lod > 0 {
            header.set_root_lod(root_lod);
        }

        let header = Arc::new(header);
        load_msg!(self, "Alloc studiohdr {}", header.name);
        let entry = self.model_section.add(
            DataKey::new(handle, DataKind::StudioHeader),
            header.clone(),
            header.memory_size(),
        );
        if lock_on_load {
            self.model_section.lock(entry);
        }

        let autoplay: Option<Arc<[u16]>> = if header.include_models.is_empty() {
            Some(header.autoplay_sequences())
                .filter(|sequences| !sequences.is_empty())
                .map(Arc::from)
        } else {
            None
        };

        let stale = self
            .registry
            .with_record_mut(handle, |record| {
                if lock_on_load {
                    record.flags |= RecordFlags::LOCKED_HEADER;
                }
                if autoplay.is_some() {
                    record.autoplay = autoplay;
                }
                record.header.replace(entry)
            })
            .flatten();

        if let Some(stale) = stale.filter(|stale| *stale != entry) {
            self.model_section.break_lock(stale);
            self.model_section.remove(stale);
        }

        self.notify_loaded(DataKind::StudioHeader, handle);
        header
    }

    fn load_all_virtual_models_and_anim_blocks(&self, handle: ModelHandle) {
        let groups: Vec<ModelHandle> = match self.get_virtual_model(handle) {
            Some(virtual_model) => virtual_model.groups().iter().map(|group| group.handle).collect(),
            None => vec![handle],
        };

        for group in groups {
            let Ok(header) = self.get_studio_header(group) else {
                continue;
            };
            for block in 1..header.num_anim_blocks() {
                self.get_anim_block(group, block);
            }
        }
    }

    /// Pins the header until a matching [`ModelCache::unlock_studio_header`].
    pub fn lock_studio_header(&self, handle: ModelHandle) -> Option<Arc<StudioHeader>> {
        let header = self.get_studio_header(handle).ok()?;
        let entry = self.registry.with_record(handle, |record| record.header).flatten()?;
        self.model_section.lock(entry);
        Some(header)
    }

    pub fn unlock_studio_header(&self, handle: ModelHandle) {
        if let Some(entry) = self.registry.with_record(handle, |record| record.header).flatten() {
            self.model_section.unlock(entry);
        }
    }

    /// Autoplay sequences of the model, aggregated over its included models if there are any.
    pub fn get_autoplay_list(&self, handle: ModelHandle) -> Vec<u16> {
        if let Some(virtual_model) = self.get_virtual_model(handle) {
            return virtual_model.autoplay_sequences().to_vec();
        }

        self.registry
            .with_record(handle, |record| record.autoplay.as_deref().map(<[u16]>::to_vec))
            .flatten()
            .unwrap_or_default()
    }

    pub fn is_data_loaded(&self, handle: ModelHandle, kind: DataKind) -> bool {
        let Some((flags, header, vertexes, anim_blocks, has_virtual_model)) = self.registry.with_record(handle, |record| {
            let anim_blocks: Option<Vec<Option<EntryRef>>> = record
                .anim_blocks
                .as_ref()
                .map(|slots| slots.iter().skip(1).map(|slot| slot.entry).collect());
            (
                record.flags,
                record.header,
                record.vertexes,
                anim_blocks,
                record.virtual_model.is_some(),
            )
        }) else {
            return false;
        };

        match kind {
            DataKind::StudioHeader => header.is_some_and(|entry| self.model_section.is_present(entry)),
            DataKind::HardwareMesh => flags.contains(RecordFlags::MESH_LOADED),
            DataKind::Collision => flags.contains(RecordFlags::COLLISION_LOADED),
            DataKind::AnimBlock => anim_blocks.is_some_and(|entries| {
                entries
                    .iter()
                    .all(|entry| entry.is_some_and(|entry| self.anim_section.is_present(entry)))
            }),
            DataKind::VirtualModel => has_virtual_model,
            DataKind::Vertexes => vertexes.is_some_and(|entry| self.mesh_section.is_present(entry)),
        }
    }

    /// Brings everything of the model in: included headers, animation blocks, vertexes and the mesh.
    pub fn touch_all_data(&self, handle: ModelHandle) {
        let Ok(header) = self.get_studio_header(handle) else {
            return;
        };

        if let Some(virtual_model) = self.get_virtual_model(handle) {
            for group in virtual_model.included() {
                let _ = self.get_studio_header(group.handle);
            }
        }

        for block in 1..header.num_anim_blocks() {
            self.get_anim_block(handle, block);
        }

        self.get_vertex_data(handle);
        self.get_hardware_data(handle);
    }

    /// Drops the chosen kinds of one model. Locked entries are only forced out with
    /// [`FlushFlags::IGNORE_LOCK`], otherwise a warning is logged.
    pub fn flush_model(&self, handle: ModelHandle, flags: FlushFlags) {
        if !self.registry.is_valid(handle) {
            return;
        }

        let file_system = self.file_system.as_ref();
        let ignore_lock = flags.contains(FlushFlags::IGNORE_LOCK);

        if flags.contains(FlushFlags::HARDWARE_MESH) {
            if self
                .tracker
                .clear(DataKey::new(handle, DataKind::HardwareMesh), true, file_system)
            {
                self.unlock_vertexes(handle);
            }
            self.unload_hardware_data(handle);
            self.clear_flags(handle, RecordFlags::NO_MESH);
        }

        if flags.contains(FlushFlags::COLLISION) {
            self.tracker
                .clear(DataKey::new(handle, DataKind::Collision), true, file_system);
            self.destroy_collision(handle);
        }

        if flags.contains(FlushFlags::VIRTUAL_MODEL) {
            self.free_virtual_model(handle);
        }

        if flags.contains(FlushFlags::ANIM_BLOCK) {
            self.free_anim_blocks(handle);
        }

        if flags.contains(FlushFlags::AUTOPLAY) {
            self.registry.with_record_mut(handle, |record| record.autoplay = None);
        }

        if flags.contains(FlushFlags::STUDIO_HEADER) {
            let (entry, was_locked) = self
                .registry
                .with_record_mut(handle, |record| {
                    let was_locked = record.flags.contains(RecordFlags::LOCKED_HEADER);
                    record.flags -= RecordFlags::LOCKED_HEADER;
                    (record.header.take(), was_locked)
                })
                .unwrap_or((None, false));

            if let Some(entry) = entry {
                load_msg!(self, "Free studiohdr {}", handle);
                if was_locked {
                    self.model_section.unlock(entry);
                }
                if self.uncache(self.model_section.as_ref(), Some(entry), ignore_lock).is_some() {
                    self.notify_unloaded(DataKind::StudioHeader, handle);
                }
            }
        }

        if flags.contains(FlushFlags::VERTEXES) {
            self.tracker
                .clear(DataKey::new(handle, DataKind::Vertexes), true, file_system);
            let entry = self
                .registry
                .with_record_mut(handle, |record| {
                    record.flags -= RecordFlags::NO_VERTEX_DATA;
                    record.vertexes.take()
                })
                .flatten();

            if entry.is_some() {
                load_msg!(self, "Free vertex data {}", handle);
                if self.uncache(self.mesh_section.as_ref(), entry, ignore_lock).is_some() {
                    self.notify_unloaded(DataKind::Vertexes, handle);
                }
            }
        }

        let unloaded = [
            (DataKind::StudioHeader, ".mdl"),
            (DataKind::HardwareMesh, self.vtx_extension()),
            (DataKind::Vertexes, ".vvd"),
            (DataKind::Collision, ".phy"),
        ];
        for (kind, extension) in unloaded {
            if !self.is_data_loaded(handle, kind) {
                if let Some(path) = self.model_path(handle, extension) {
                    file_system.notify_unloaded(&path);
                }
            }
        }
    }

    /// Flushes every model.
    pub fn flush(&self, flags: FlushFlags) {
        for handle in self.registry.handles() {
            self.flush_model(handle, flags);
        }
    }

    /// Removes an entry the record no longer points to, breaking its locks first.
    fn uncache<T: Clone>(&self, section: &CacheSection<T>, entry: Option<EntryRef>, ignore_lock: bool) -> Option<T> {
        let entry = entry?;
        if section.break_lock(entry) > 0 && !ignore_lock {
            warn!("MDLCache: freeing a locked resource of the {} section", section.name());
        }
        section.remove(entry)
    }

    fn unlock_vertexes(&self, handle: ModelHandle) {
        if let Some(entry) = self.registry.with_record(handle, |record| record.vertexes).flatten() {
            self.mesh_section.unlock(entry);
        }
    }

    fn on_header_evicted(&self, notice: EvictionNotice<Arc<StudioHeader>>) {
        let handle = notice.client.handle;
        let owned = self
            .registry
            .with_record_mut(handle, |record| {
                if record.header != Some(notice.entry) {
                    return false;
                }
                record.header = None;
                record.flags -= RecordFlags::LOCKED_HEADER;
                true
            })
            .unwrap_or(false);

        if owned {
            load_msg!(self, "Evicted studiohdr {}", notice.data.name);
            self.notify_unloaded(DataKind::StudioHeader, handle);
        }
    }

    fn on_mesh_evicted(&self, notice: EvictionNotice<MeshData>) {
        let handle = notice.client.handle;
        match notice.data {
            MeshData::Vertexes(_) => {
                let owned = self
                    .registry
                    .with_record_mut(handle, |record| {
                        let owned = record.vertexes == Some(notice.entry);
                        if owned {
                            record.vertexes = None;
                        }
                        owned
                    })
                    .unwrap_or(false);

                if owned {
                    load_msg!(self, "Evicted vertex data of {}", handle);
                    self.notify_unloaded(DataKind::Vertexes, handle);
                }
            }
            MeshData::Hardware(mesh) => {
                let owned = self
                    .registry
                    .with_record_mut(handle, |record| {
                        let owned = record.hardware == Some(notice.entry);
                        if owned {
                            record.hardware = None;
                            record.flags -= RecordFlags::MESH_LOADED;
                        }
                        owned
                    })
                    .unwrap_or(false);

                self.mesh_builder.unload(&mesh);
                if owned {
                    load_msg!(self, "Evicted studiomdl of {}", handle);
                    self.notify_unloaded(DataKind::HardwareMesh, handle);
                }
            }
        }
    }

    fn on_anim_block_evicted(&self, notice: EvictionNotice<Arc<Vec<u8>>>) {
        let block = notice.client.block as usize;
        self.registry.with_record_mut(notice.client.handle, |record| {
            if let Some(slot) = record.anim_blocks.as_mut().and_then(|slots| slots.get_mut(block)) {
                if slot.entry == Some(notice.entry) {
                    slot.entry = None;
                }
            }
        });
        trace!("Evicted anim block {} of {}", block, notice.client.handle);
    }

    pub fn begin_lock(&self) {
        self.frame_locks.begin_lock();
    }

    pub fn end_lock(&self) {
        self.frame_locks.end_lock();
    }

    /// Releases every frame lock and unpins headers locked on load.
    pub fn begin_map_load(&self) {
        self.frame_locks.break_lock(true, true);

        for handle in self.registry.handles() {
            let entry = self
                .registry
                .with_record_mut(handle, |record| {
                    if !record.flags.contains(RecordFlags::LOCKED_HEADER) {
                        return None;
                    }
                    record.flags -= RecordFlags::LOCKED_HEADER;
                    record.header
                })
                .flatten();

            if let Some(entry) = entry {
                self.model_section.unlock(entry);
            }
        }
    }

    /// Drops the headers no model asked for during the load when headers are locked on load.
    pub fn end_map_load(&self) {
        self.finish_pending_loads();

        if read(&self.settings).lock_headers_on_load {
            for handle in self.registry.handles() {
                if !self.flags(handle).contains(RecordFlags::LOCKED_HEADER) {
                    self.flush_model(handle, FlushFlags::STUDIO_HEADER);
                }
            }
        }

        self.frame_locks.restore();
    }

    /// The device lost its video memory: hardware meshes are dropped and refused until restored.
    pub fn release_material_system_objects(&self) {
        self.lost_video_memory.store(true, Ordering::Release);
        self.frame_locks.break_lock(false, true);

        for handle in self.registry.handles() {
            self.unload_hardware_data(handle);
        }

        self.frame_locks.restore();
    }

    pub fn restore_material_system_objects(&self, vertex_format_changed: bool) {
        self.lost_video_memory.store(false, Ordering::Release);
        self.frame_locks.break_lock(false, true);

        for handle in self.registry.handles() {
            if vertex_format_changed {
                if self.tracker.clear(
                    DataKey::new(handle, DataKind::HardwareMesh),
                    true,
                    self.file_system.as_ref(),
                ) {
                    self.unlock_vertexes(handle);
                }
                self.flush_model(handle, FlushFlags::VERTEXES);
            }

            if self.is_data_loaded(handle, DataKind::StudioHeader) {
                self.get_hardware_data(handle);
            }
        }

        self.frame_locks.restore();
    }

    /// Polls one request and processes its data if it completed.
    fn process_pending_async(&self, id: RequestId) -> AsyncOutcome {
        match self.tracker.poll(id) {
            PollResult::Indeterminate => AsyncOutcome::Indeterminate,
            PollResult::Pending => AsyncOutcome::Pending,
            PollResult::Completed { key, data } => {
                let data = data.and_then(|bytes| self.decode_payload(key, bytes));
                self.process_data_into_cache(key, data);
                AsyncOutcome::Done
            }
        }
    }

    fn decode_payload(&self, key: DataKey, bytes: Vec<u8>) -> Option<Vec<u8>> {
        match self.transform.apply(bytes) {
            Ok(bytes) => Some(bytes),
            Err(err @ ParserError::DecodeFailure { .. }) => {
                warn!("Payload of {} {} is corrupt: {}", key.handle, key.kind, err);
                None
            }
            Err(err) => {
                debug!("Payload of {} {} is unreadable: {}", key.handle, key.kind, err);
                None
            }
        }
    }

    /// Drains completed requests oldest first, stopping at the first one still pending.
    pub fn process_pending_asyncs(&self, filter: Option<DataKind>) {
        profiling::scope!("ModelCache::process_pending_asyncs");
        if !self.tracker.is_main_thread() {
            return;
        }

        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }

        for (id, _) in self.tracker.pending_in_order(filter) {
            if self.process_pending_async(id) != AsyncOutcome::Done {
                break;
            }
        }

        self.draining.store(false, Ordering::Release);
    }

    pub fn clear_async(&self, key: DataKey, abort: bool) -> bool {
        self.tracker.clear(key, abort, self.file_system.as_ref())
    }

    /// Forces every outstanding read to complete, then drains them.
    pub fn finish_pending_loads(&self) {
        if !self.tracker.is_main_thread() {
            return;
        }

        self.tracker.finish_all(self.file_system.as_ref());
        self.process_pending_asyncs(None);
    }

    pub fn pending_async_count(&self) -> usize {
        self.tracker.count()
    }

    /// Once per frame: processes queued model loads and completed async reads.
    pub fn mark_frame(&self) {
        self.process_queued_loads();
        self.process_pending_asyncs(None);
    }

    pub fn section_status(&self, kind: DataKind) -> SectionStatus {
        match kind {
            DataKind::StudioHeader | DataKind::Collision | DataKind::VirtualModel => self.model_section.status(),
            DataKind::HardwareMesh | DataKind::Vertexes => self.mesh_section.status(),
            DataKind::AnimBlock => self.anim_section.status(),
        }
    }

    /// Flushes everything. Afterwards every query answers with its safe default.
    pub fn shutdown(&self) {
        let file_system = self.file_system.as_ref();
        for handle in self.registry.handles() {
            self.tracker.clear_handle(handle, file_system);
        }
        self.flush(FlushFlags::ALL);
        self.registry.shutdown();
    }
}
