use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use log::{debug, warn};
use mdlcache_files::ParserError;
use mdlcache_files::phy::reader::PhyReader;
use mdlcache_files::studio::types::StudioHeader;
use mdlcache_files::vtx::reader::MeshIndexReader;
use mdlcache_files::vvd::reader::VertexReader;

use super::{AsyncOutcome, MeshData, ModelCache, VertexPayload};
use crate::cache::async_tracker::RequestId;
use crate::cache::handle::{DataKey, DataKind, FlushFlags, ModelHandle, RecordFlags};
use crate::cache::record::AnimBlockSlot;
use crate::cache::virtual_model::VirtualModel;
use crate::collision::decoder::CollisionSet;
use crate::io::common::loader::AsyncReadRequest;
use crate::mesh::builder::HardwareMesh;
use crate::util::read;

fn log_invalid(what: &str, name: &str, err: &ParserError) {
    match err {
        ParserError::ChecksumMismatch { .. } | ParserError::UnsupportedVersion { .. } => {
            warn!("{} of {} does not belong to the model: {}", what, name, err)
        }
        _ => debug!("{} of {} is unusable: {}", what, name, err),
    }
}

impl ModelCache {
    /// Issues the read for `key` unless one is already in flight, returning the request to poll.
    fn request(&self, key: DataKey, request: AsyncReadRequest, asynchronous: bool) -> Option<RequestId> {
        if let Some(id) = self.tracker.index_for(key) {
            return Some(id);
        }

        match self
            .tracker
            .begin_load(key, request, asynchronous, self.file_system.as_ref())
        {
            Ok(id) => Some(id),
            Err(err) => {
                warn!("{}", err);
                self.tracker.index_for(key)
            }
        }
    }

    /// Routes completed data of any kind but the header to its kind. `None` is a failed read.
    pub(super) fn process_data_into_cache(&self, key: DataKey, data: Option<Vec<u8>>) -> bool {
        let handle = key.handle;
        let header = match self.get_studio_header(handle) {
            Ok(header) => header,
            Err(err) => {
                debug!("Dropping {} of {}: {}", key.kind, handle, err);
                if key.kind == DataKind::HardwareMesh {
                    self.unlock_vertexes(handle);
                }
                return false;
            }
        };

        match key.kind {
            DataKind::Vertexes => self.process_vertex_data(handle, &header, data),
            DataKind::HardwareMesh => self.process_hardware_data(handle, &header, data),
            DataKind::Collision => self.process_collision(handle, data),
            DataKind::AnimBlock => self.process_anim_block(handle, key.block as usize, data),
            DataKind::StudioHeader | DataKind::VirtualModel => false,
        }
    }

    pub fn get_vertex_data(&self, handle: ModelHandle) -> Option<Arc<VertexPayload>> {
        {
            let settings = read(&self.settings);
            if settings.test_not_available || settings.test_verts_not_available {
                return None;
            }
        }

        if !self.registry.is_valid(handle) {
            return None;
        }

        if let Some(vertexes) = self.cached_vertexes(handle, true) {
            return Some(vertexes);
        }

        if self.flags(handle).contains(RecordFlags::NO_VERTEX_DATA) {
            return None;
        }

        let header = self.get_studio_header(handle).ok()?;
        if header.num_body_parts == 0 {
            self.set_flags(handle, RecordFlags::NO_VERTEX_DATA);
            return None;
        }

        let key = DataKey::new(handle, DataKind::Vertexes);
        let id = match self.tracker.index_for(key) {
            Some(id) => id,
            None => {
                let path = self.model_path(handle, ".vvd")?;
                let asynchronous = read(&self.settings).async_mesh;
                load_msg!(self, "{} load vertex data {}", if asynchronous { "Async" } else { "Sync" }, path);
                self.request(key, AsyncReadRequest::whole_file(&path), asynchronous)?
            }
        };

        if self.process_pending_async(id) != AsyncOutcome::Done {
            return None;
        }

        self.cached_vertexes(handle, true)
    }

    fn cached_vertexes(&self, handle: ModelHandle, touch: bool) -> Option<Arc<VertexPayload>> {
        let entry = self.registry.with_record(handle, |record| record.vertexes).flatten()?;
        let data = if touch {
            self.mesh_section.get(entry)
        } else {
            self.mesh_section.get_no_touch(entry)
        };

        match data? {
            MeshData::Vertexes(vertexes) => Some(vertexes),
            MeshData::Hardware(_) => None,
        }
    }

    fn process_vertex_data(&self, handle: ModelHandle, header: &StudioHeader, data: Option<Vec<u8>>) -> bool {
        let vertexes = data.and_then(|bytes| {
            let parsed = VertexReader::parse_header(&bytes)
                .and_then(|vertex_header| VertexReader::check(&vertex_header, header.checksum))
                .and_then(|_| VertexReader::parse(&bytes));

            parsed
                .map_err(|err| log_invalid("Vertex data", &header.name, &err))
                .ok()
        });

        let Some(vertexes) = vertexes else {
            self.set_flags(handle, RecordFlags::NO_VERTEX_DATA);
            if header.num_body_parts > 0 {
                warn!("Failed to load vertex data for {}", header.name);
            }
            return false;
        };

        self.cache_vertexes(handle, VertexPayload::Full(self.mesh_builder.build_vertex_data(header, &vertexes)));
        load_msg!(self, "Finish load vertex data {}", header.name);
        self.notify_loaded(DataKind::Vertexes, handle);
        true
    }

    fn cache_vertexes(&self, handle: ModelHandle, vertexes: VertexPayload) {
        let size = vertexes.memory_size();
        let entry = self.mesh_section.add(
            DataKey::new(handle, DataKind::Vertexes),
            MeshData::Vertexes(Arc::new(vertexes)),
            size,
        );

        let stale = self
            .registry
            .with_record_mut(handle, |record| record.vertexes.replace(entry))
            .flatten();
        if let Some(stale) = stale.filter(|stale| *stale != entry) {
            self.mesh_section.break_lock(stale);
            self.mesh_section.remove(stale);
        }
    }

    /// `None` while the mesh is still loading, when it is known missing or video memory is lost.
    pub fn get_hardware_data(&self, handle: ModelHandle) -> Option<Arc<HardwareMesh>> {
        {
            let settings = read(&self.settings);
            if settings.test_not_available || settings.test_mesh_not_available {
                return None;
            }
        }

        if !self.registry.is_valid(handle) {
            return None;
        }

        if self.flags(handle).contains(RecordFlags::MESH_LOADED) {
            if let Some(mesh) = self.cached_hardware(handle) {
                return Some(mesh);
            }
        }

        if !self.load_hardware_data(handle) {
            return None;
        }

        self.cached_hardware(handle)
    }

    fn cached_hardware(&self, handle: ModelHandle) -> Option<Arc<HardwareMesh>> {
        let entry = self.registry.with_record(handle, |record| record.hardware).flatten()?;
        match self.mesh_section.get(entry)? {
            MeshData::Hardware(mesh) => Some(mesh),
            MeshData::Vertexes(_) => None,
        }
    }

    fn load_hardware_data(&self, handle: ModelHandle) -> bool {
        if self.lost_video_memory.load(Ordering::Acquire) {
            return false;
        }

        match self.get_studio_header(handle) {
            Ok(header) if header.num_body_parts > 0 => {}
            _ => {
                self.set_flags(handle, RecordFlags::NO_MESH);
                return false;
            }
        }

        if self.flags(handle).contains(RecordFlags::NO_MESH) {
            return false;
        }

        if self.get_vertex_data(handle).is_none() {
            if self.flags(handle).contains(RecordFlags::NO_VERTEX_DATA) {
                self.set_flags(handle, RecordFlags::NO_MESH);
            }
            return false;
        }

        let key = DataKey::new(handle, DataKind::HardwareMesh);
        let id = match self.tracker.index_for(key) {
            Some(id) => id,
            None => {
                let Some(path) = self.model_path(handle, self.vtx_extension()) else {
                    return false;
                };

                // Held until the mesh is built so the vertexes cannot be evicted under it.
                let Some(vertexes) = self.registry.with_record(handle, |record| record.vertexes).flatten() else {
                    return false;
                };
                self.mesh_section.lock(vertexes);

                let asynchronous = read(&self.settings).async_mesh;
                load_msg!(self, "{} load studiomdl {}", if asynchronous { "Async" } else { "Sync" }, path);
                match self.request(key, AsyncReadRequest::whole_file(&path), asynchronous) {
                    Some(id) => id,
                    None => {
                        self.mesh_section.unlock(vertexes);
                        return false;
                    }
                }
            }
        };

        if self.process_pending_async(id) != AsyncOutcome::Done {
            return false;
        }

        let flags = self.flags(handle);
        !flags.contains(RecordFlags::NO_MESH) && flags.contains(RecordFlags::MESH_LOADED)
    }

    fn process_hardware_data(&self, handle: ModelHandle, header: &StudioHeader, data: Option<Vec<u8>>) -> bool {
        let vertexes_missing = self.flags(handle).contains(RecordFlags::NO_VERTEX_DATA);
        let mesh = data.filter(|_| !vertexes_missing).and_then(|bytes| {
            let checked = MeshIndexReader::parse_header(&bytes)
                .and_then(|index_header| MeshIndexReader::check(&index_header, header.checksum));
            if let Err(err) = checked {
                log_invalid("Mesh index", &header.name, &err);
                return None;
            }

            self.frame_locks.begin_lock();
            let mesh = self.mesh_builder.build(header, &bytes);
            self.frame_locks.end_lock();
            mesh
        });

        let built = match mesh {
            Some(mesh) => {
                self.cache_hardware(handle, mesh);
                load_msg!(self, "Finish load studiomdl {}", header.name);
                self.notify_loaded(DataKind::HardwareMesh, handle);
                true
            }
            None => {
                self.set_flags(handle, RecordFlags::NO_MESH);
                if header.num_body_parts > 0 {
                    warn!("Failed to load hardware data for {}", header.name);
                }
                false
            }
        };

        if let Some(vertexes) = self.registry.with_record(handle, |record| record.vertexes).flatten() {
            self.mesh_section.unlock(vertexes);
            self.mesh_section.age(vertexes);
        }

        let compressed_vertexes = read(&self.settings).compressed_vertexes;
        if built && compressed_vertexes && !header.has_flexes() {
            self.replace_with_thin_vertexes(handle);
        }

        built
    }

    fn cache_hardware(&self, handle: ModelHandle, mesh: HardwareMesh) {
        let mesh = Arc::new(mesh);
        let entry = self.mesh_section.add(
            DataKey::new(handle, DataKind::HardwareMesh),
            MeshData::Hardware(mesh.clone()),
            mesh.memory_size(),
        );

        let stale = self
            .registry
            .with_record_mut(handle, |record| {
                record.flags |= RecordFlags::MESH_LOADED;
                record.hardware.replace(entry)
            })
            .flatten();

        if let Some(stale) = stale.filter(|stale| *stale != entry) {
            self.mesh_section.break_lock(stale);
            if let Some(MeshData::Hardware(old)) = self.mesh_section.remove(stale) {
                self.mesh_builder.unload(&old);
            }
        }
    }

    /// Swaps the full vertex entry for its thin form; the full form is not kept alongside.
    fn replace_with_thin_vertexes(&self, handle: ModelHandle) {
        let Some(vertexes) = self.cached_vertexes(handle, false) else {
            return;
        };

        let VertexPayload::Full(full) = vertexes.as_ref() else {
            return;
        };

        let thin = full.to_thin();
        load_msg!(self, "Thinning vertex data of {} ({} vertices)", handle, thin.vertex_count());
        // Consumers see `Unloaded(Vertexes)` here, although thin vertexes are resident right after.
        self.flush_model(handle, FlushFlags::VERTEXES | FlushFlags::IGNORE_LOCK);
        self.cache_vertexes(handle, VertexPayload::Thin(thin));
    }

    pub(super) fn unload_hardware_data(&self, handle: ModelHandle) {
        let entry = self
            .registry
            .with_record_mut(handle, |record| {
                if !record.flags.contains(RecordFlags::MESH_LOADED) {
                    return None;
                }
                record.flags -= RecordFlags::MESH_LOADED;
                record.hardware.take()
            })
            .flatten();

        let Some(entry) = entry else {
            return;
        };

        load_msg!(self, "Unload studiomdl {}", handle);
        if let Some(MeshData::Hardware(mesh)) = self.uncache(self.mesh_section.as_ref(), Some(entry), true) {
            self.mesh_builder.unload(&mesh);
        }
        self.notify_unloaded(DataKind::HardwareMesh, handle);
    }

    /// Loads collision synchronously if needed.
    pub fn get_collision(&self, handle: ModelHandle) -> Option<Arc<CollisionSet>> {
        self.get_collision_ex(handle, true)
    }

    /// With `synchronous` off, a missing collision may be read in the background and `None` is
    /// returned until a later call or drain finds it completed.
    pub fn get_collision_ex(&self, handle: ModelHandle, synchronous: bool) -> Option<Arc<CollisionSet>> {
        if read(&self.settings).test_not_available || !self.registry.is_valid(handle) {
            return None;
        }

        if !self.flags(handle).contains(RecordFlags::COLLISION_LOADED) {
            self.unserialize_collision(handle, synchronous, true);
        }

        self.registry
            .with_record(handle, |record| record.collision.clone())
            .flatten()
    }

    /// Size of the loaded collision, `None` when it is not loaded.
    pub fn get_collision_size(&self, handle: ModelHandle) -> Option<usize> {
        self.registry
            .with_record(handle, |record| {
                if !record.flags.contains(RecordFlags::COLLISION_LOADED) {
                    return None;
                }
                Some(record.collision.as_ref().map(|set| set.memory_size()).unwrap_or(0))
            })
            .flatten()
    }

    /// Included models only ever load their own file; the flattened include list already covers
    /// nested includes.
    fn unserialize_collision(&self, handle: ModelHandle, synchronous: bool, share: bool) {
        let key = DataKey::new(handle, DataKind::Collision);
        let id = match self.tracker.index_for(key) {
            Some(id) => {
                if synchronous {
                    self.tracker.finish(key, self.file_system.as_ref());
                }
                id
            }
            None => {
                self.registry.with_record_mut(handle, |record| {
                    record.flags -= RecordFlags::COLLISION_LOADED | RecordFlags::COLLISION_SHARED;
                    record.collision = None;
                });

                if share && self.share_included_collision(handle, synchronous) {
                    return;
                }

                let Some(path) = self.model_path(handle, ".phy") else {
                    return;
                };
                let asynchronous = read(&self.settings).async_collision && !synchronous;
                load_msg!(self, "{} load vcollide {}", if asynchronous { "Async" } else { "Sync" }, path);
                match self.request(key, AsyncReadRequest::whole_file(&path), asynchronous) {
                    Some(id) => id,
                    None => return,
                }
            }
        };

        self.process_pending_async(id);
    }

    /// Borrows the collision of the first included model that has solids.
    fn share_included_collision(&self, handle: ModelHandle, synchronous: bool) -> bool {
        let Some(virtual_model) = self.get_virtual_model(handle) else {
            return false;
        };

        for group in virtual_model.included().filter(|group| group.handle != handle) {
            let child = group.handle;
            if !self.flags(child).contains(RecordFlags::COLLISION_LOADED) {
                self.unserialize_collision(child, synchronous, false);
            }

            let shared = self
                .registry
                .with_record(child, |record| record.collision.clone())
                .flatten()
                .filter(|collision| collision.solid_count() > 0);

            if let Some(collision) = shared {
                load_msg!(self, "Sharing vcollide of {} with {}", child, handle);
                self.registry.with_record_mut(handle, |record| {
                    record.collision = Some(collision);
                    record.flags |= RecordFlags::COLLISION_LOADED | RecordFlags::COLLISION_SHARED;
                });
                return true;
            }
        }

        false
    }

    fn process_collision(&self, handle: ModelHandle, data: Option<Vec<u8>>) -> bool {
        let collision = data
            .filter(|bytes| PhyReader::parse_header(bytes).is_ok_and(|header| header.is_valid()))
            .and_then(|bytes| self.collision_decoder.decode(&bytes))
            .filter(|collision| collision.solid_count() > 0);

        let loaded = collision.is_some();
        let solids = collision.as_ref().map(CollisionSet::solid_count).unwrap_or(0);
        self.registry.with_record_mut(handle, |record| {
            record.flags |= RecordFlags::COLLISION_LOADED;
            record.collision = collision.map(Arc::new);
        });

        if loaded {
            load_msg!(self, "Finish load vcollide {} ({} solids)", handle, solids);
            self.notify_loaded(DataKind::Collision, handle);
        } else {
            debug!("{} has no collision", handle);
        }
        loaded
    }

    pub(super) fn destroy_collision(&self, handle: ModelHandle) {
        let owned = self
            .registry
            .with_record_mut(handle, |record| {
                if !record.flags.contains(RecordFlags::COLLISION_LOADED) {
                    return None;
                }

                let shared = record.flags.contains(RecordFlags::COLLISION_SHARED);
                record.flags -= RecordFlags::COLLISION_LOADED | RecordFlags::COLLISION_SHARED;
                let collision = record.collision.take();
                if shared { None } else { collision }
            })
            .flatten();

        if let Some(collision) = owned.filter(|collision| collision.solid_count() > 0) {
            load_msg!(self, "Unload vcollide {}", handle);
            self.collision_decoder.unload(&collision);
            self.notify_unloaded(DataKind::Collision, handle);
        }
    }

    /// Block 0 is reserved and never has data.
    pub fn get_anim_block(&self, handle: ModelHandle, block: usize) -> Option<Arc<Vec<u8>>> {
        let (test_not_available, fake_stall_ms, asynchronous) = {
            let settings = read(&self.settings);
            (settings.test_not_available, settings.fake_stall_ms, settings.async_anims)
        };
        if test_not_available || !self.registry.is_valid(handle) {
            return None;
        }

        let header = self.get_studio_header(handle).ok()?;
        let slot = self.registry.with_record_mut(handle, |record| {
            let slots = record
                .anim_blocks
                .get_or_insert_with(|| vec![AnimBlockSlot::default(); header.num_anim_blocks()]);
            let slot = slots.get_mut(block).filter(|_| block > 0)?;
            if fake_stall_ms > 0 {
                slot.stall_started.get_or_insert_with(Instant::now);
            }
            Some(*slot)
        })??;

        if let Some(started) = slot.stall_started {
            if started.elapsed() < Duration::from_millis(fake_stall_ms) {
                return None;
            }
        }

        if let Some(data) = slot.entry.and_then(|entry| self.anim_section.get(entry)) {
            return Some(data);
        }

        let key = DataKey::anim_block(handle, block as u32);
        let id = match self.tracker.index_for(key) {
            Some(id) => id,
            None => {
                let range = header.anim_blocks.get(block).filter(|range| !range.is_empty())?;
                let file = header.anim_block_name.as_deref()?;
                load_msg!(self, "Begin load anim block {} (block {})", file, block);
                let request = AsyncReadRequest::range(file, range.data_start.max(0) as u64, range.len());
                self.request(key, request, asynchronous)?
            }
        };

        if self.process_pending_async(id) != AsyncOutcome::Done {
            return None;
        }

        let entry = self
            .registry
            .with_record(handle, |record| record.anim_block_entry(block))
            .flatten()?;
        self.anim_section.get(entry)
    }

    fn process_anim_block(&self, handle: ModelHandle, block: usize, data: Option<Vec<u8>>) -> bool {
        let Some(bytes) = data else {
            debug!("Failed to load anim block {} of {}", block, handle);
            self.registry.with_record_mut(handle, |record| {
                if let Some(slot) = record.anim_blocks.as_mut().and_then(|slots| slots.get_mut(block)) {
                    slot.entry = None;
                }
            });
            return false;
        };

        let size = bytes.len();
        let entry = self
            .anim_section
            .add(DataKey::anim_block(handle, block as u32), Arc::new(bytes), size);

        let stored = self
            .registry
            .with_record_mut(handle, |record| {
                let slot = record.anim_blocks.as_mut()?.get_mut(block)?;
                Some(slot.entry.replace(entry))
            })
            .flatten();

        match stored {
            Some(stale) => {
                if let Some(stale) = stale.filter(|stale| *stale != entry) {
                    self.anim_section.remove(stale);
                }
                load_msg!(self, "Finish load anim block {} of {} ({} bytes)", block, handle, size);
                true
            }
            None => {
                self.anim_section.remove(entry);
                false
            }
        }
    }

    pub(super) fn free_anim_blocks(&self, handle: ModelHandle) {
        let Some(slots) = self
            .registry
            .with_record_mut(handle, |record| record.anim_blocks.take())
            .flatten()
        else {
            return;
        };

        for (block, slot) in slots.into_iter().enumerate() {
            self.tracker.clear(
                DataKey::anim_block(handle, block as u32),
                true,
                self.file_system.as_ref(),
            );
            self.uncache(self.anim_section.as_ref(), slot.entry, true);
        }
    }

    /// Built on first use for models that include others. Every included model, nested includes
    /// too, is referenced by the graph until it is freed.
    pub fn get_virtual_model(&self, handle: ModelHandle) -> Option<Arc<VirtualModel>> {
        if read(&self.settings).test_not_available {
            return None;
        }

        let header = self.get_studio_header(handle).ok()?;
        if header.include_models.is_empty() {
            return None;
        }

        if let Some(existing) = self
            .registry
            .with_record(handle, |record| record.virtual_model.clone())
            .flatten()
        {
            return Some(existing);
        }

        let mut virtual_model = VirtualModel::new(handle, header.sequences.len(), &header.autoplay_sequences());
        self.append_includes(&mut virtual_model, &header);
        let virtual_model = Arc::new(virtual_model);

        let existing = self
            .registry
            .with_record_mut(handle, |record| match &record.virtual_model {
                Some(existing) => Some(existing.clone()),
                None => {
                    record.virtual_model = Some(virtual_model.clone());
                    None
                }
            })
            .flatten();

        if let Some(existing) = existing {
            for group in virtual_model.included() {
                self.release(group.handle);
            }
            return Some(existing);
        }

        load_msg!(
            self,
            "Built virtual model of {} ({} groups, {} sequences)",
            header.name,
            virtual_model.groups().len(),
            virtual_model.num_sequences()
        );
        self.notify_loaded(DataKind::VirtualModel, handle);
        Some(virtual_model)
    }

    fn append_includes(&self, virtual_model: &mut VirtualModel, header: &StudioHeader) {
        for include in &header.include_models {
            let child = self.find_model(&include.name);
            if virtual_model.groups().iter().any(|group| group.handle == child) {
                self.release(child);
                continue;
            }

            let child_header = self.get_studio_header(child).ok();
            let (sequences, autoplay) = child_header
                .as_ref()
                .map(|child_header| (child_header.sequences.len(), child_header.autoplay_sequences()))
                .unwrap_or_default();
            virtual_model.include(child, &include.label, &include.name, sequences, &autoplay);

            if let Some(child_header) = child_header {
                self.append_includes(virtual_model, &child_header);
            }
        }
    }

    pub(super) fn free_virtual_model(&self, handle: ModelHandle) {
        let Some(virtual_model) = self
            .registry
            .with_record_mut(handle, |record| record.virtual_model.take())
            .flatten()
        else {
            return;
        };

        load_msg!(self, "Free virtual model of {}", handle);
        for group in virtual_model.included() {
            self.free_virtual_model(group.handle);
            self.release(group.handle);
        }
        self.notify_unloaded(DataKind::VirtualModel, handle);
    }
}
