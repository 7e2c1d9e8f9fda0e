use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use super::ModelCache;
use crate::cache::handle::{DataKey, DataKind, ModelHandle, RecordFlags};
use crate::io::queued::{LoaderCompletion, LoaderJob};
use crate::util::{lock, read, with_extension};

/// The files of one model a queued preload reads.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModelPart {
    Header = 0,
    MeshIndex = 1,
    Vertexes = 2,
    Collision = 3,
}

impl ModelPart {
    pub const ALL: [ModelPart; 4] = [
        ModelPart::Header,
        ModelPart::MeshIndex,
        ModelPart::Vertexes,
        ModelPart::Collision,
    ];

    fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Scratch space collecting the parts of one model as they arrive on loader threads.
pub(super) struct QueuedModel {
    handle: ModelHandle,
    expected: u32,
    arrived: AtomicU32,
    buffers: Mutex<[Option<Vec<u8>>; 4]>,
}

impl QueuedModel {
    /// Returns whether this arrival completed the set. Exactly one caller observes that.
    fn journal(&self, completion: LoaderCompletion) -> bool {
        {
            let mut buffers = lock(&self.buffers);
            let Some(slot) = buffers.get_mut(completion.part as usize) else {
                return false;
            };
            *slot = completion.data.filter(|data| !data.is_empty());
        }

        let bit = 1 << completion.part;
        let before = self.arrived.fetch_or(bit, Ordering::AcqRel);
        before != self.expected && before | bit == self.expected
    }

    fn take(&self, part: ModelPart) -> Option<Vec<u8>> {
        lock(&self.buffers)[part as usize].take()
    }

    fn expects(&self, part: ModelPart) -> bool {
        self.expected & part.bit() != 0
    }
}

impl ModelCache {
    /// Hands every missing file of the model to the batching queued loader. Completed models are
    /// processed on the main thread by [`ModelCache::process_queued_loads`].
    pub fn preload_model(&self, handle: ModelHandle) -> bool {
        let Some(loader) = read(&self.queued_loader).clone() else {
            return false;
        };

        if !loader.is_batching() || !self.registry.is_valid(handle) {
            return false;
        }

        let flags = self.flags(handle);
        let needed: Vec<ModelPart> = ModelPart::ALL
            .into_iter()
            .filter(|part| match part {
                ModelPart::Header => !self.is_data_loaded(handle, DataKind::StudioHeader),
                ModelPart::MeshIndex => !flags.intersects(RecordFlags::MESH_LOADED | RecordFlags::NO_MESH),
                ModelPart::Vertexes => {
                    !flags.contains(RecordFlags::NO_VERTEX_DATA) && !self.is_data_loaded(handle, DataKind::Vertexes)
                }
                ModelPart::Collision => !flags.contains(RecordFlags::COLLISION_LOADED),
            })
            .collect();

        if needed.is_empty() {
            return true;
        }

        let Some(name) = self.get_actual_model_name(handle) else {
            return false;
        };

        // Keeps the handle alive until the parts were processed.
        self.registry.add_ref(handle);

        let model = Arc::new(QueuedModel {
            handle,
            expected: needed.iter().fold(0, |mask, part| mask | part.bit()),
            arrived: AtomicU32::new(0),
            buffers: Mutex::new(Default::default()),
        });

        let ready = self.queued_models.clone();
        let journal = model.clone();
        let callback = Arc::new(move |completion: LoaderCompletion| {
            if journal.journal(completion) {
                lock(&ready).push(journal.clone());
            }
        });

        for part in needed {
            let extension = match part {
                ModelPart::Header => ".mdl",
                ModelPart::MeshIndex => self.vtx_extension(),
                ModelPart::Vertexes => ".vvd",
                ModelPart::Collision => ".phy",
            };

            let job = LoaderJob {
                path: with_extension(&name, extension),
                priority: 0,
                part: part as u32,
                callback: callback.clone(),
            };

            if !loader.add_job(job) {
                callback(LoaderCompletion {
                    part: part as u32,
                    data: None,
                });
            }
        }

        debug!("Queued preload of {}", name);
        true
    }

    /// Processes the models whose parts all arrived. Main thread only; returns how many there were.
    pub fn process_queued_loads(&self) -> usize {
        if !self.tracker.is_main_thread() {
            return 0;
        }

        let ready = std::mem::take(&mut *lock(&self.queued_models));
        let count = ready.len();
        for model in ready {
            self.process_queued_model(&model);
        }
        count
    }

    /// Header first, pinned for the rest; then collision, vertexes and finally the mesh.
    fn process_queued_model(&self, model: &QueuedModel) {
        profiling::scope!("ModelCache::process_queued_model");
        let handle = model.handle;
        let name = self.get_actual_model_name(handle).unwrap_or_default();

        let mut header_valid = true;
        if model.expects(ModelPart::Header) {
            let header = model
                .take(ModelPart::Header)
                .and_then(|bytes| self.decode_studio_header(&name, bytes));

            match header {
                Some(header) if !self.is_data_loaded(handle, DataKind::StudioHeader) => {
                    self.cache_studio_header(handle, header);
                }
                Some(_) => {}
                None => {
                    warn!("MDLCache: header of {} did not arrive, dropping its queued parts", name);
                    header_valid = false;
                }
            }
        }

        let locked = self.lock_studio_header(handle).is_some();
        let part_data = |part: ModelPart, key: DataKey| {
            model
                .take(part)
                .filter(|_| header_valid)
                .and_then(|bytes| self.decode_payload(key, bytes))
        };

        if model.expects(ModelPart::Collision) {
            let key = DataKey::new(handle, DataKind::Collision);
            self.process_data_into_cache(key, part_data(ModelPart::Collision, key));
        }

        if model.expects(ModelPart::Vertexes) {
            let key = DataKey::new(handle, DataKind::Vertexes);
            self.process_data_into_cache(key, part_data(ModelPart::Vertexes, key));
        }

        if model.expects(ModelPart::MeshIndex) {
            let key = DataKey::new(handle, DataKind::HardwareMesh);
            let data = part_data(ModelPart::MeshIndex, key);
            // Released once the mesh is built.
            if let Some(vertexes) = self.registry.with_record(handle, |record| record.vertexes).flatten() {
                self.mesh_section.lock(vertexes);
            }
            self.process_data_into_cache(key, data);
        }

        if locked {
            self.unlock_studio_header(handle);
        }
        self.release(handle);
    }
}
