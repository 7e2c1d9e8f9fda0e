use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::trace;

use crate::cache::handle::ModelHandle;
use crate::cache::record::AssetRecord;
use crate::util::{lock, normalize_path};

struct Slot {
    generation: u32,
    record: Option<AssetRecord>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Slots {
    fn get(&self, handle: ModelHandle) -> Option<&AssetRecord> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.record.as_ref()
    }

    fn get_mut(&mut self, handle: ModelHandle) -> Option<&mut AssetRecord> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.record.as_mut()
    }

    fn allocate(&mut self, record: AssetRecord) -> ModelHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(record);
            return ModelHandle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            record: Some(record),
        });
        ModelHandle::new(index, 0)
    }
}

fn name_key(name: &str) -> String {
    normalize_path(name).to_ascii_lowercase()
}

/// Maps model names to handles and owns the per-model records.
///
/// Records are only reachable through closures, which must not call back into cache sections:
/// section listeners take the registry lock themselves.
pub struct HandleRegistry {
    names: DashMap<String, ModelHandle>,
    slots: Mutex<Slots>,
    initialized: AtomicBool,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            names: DashMap::with_capacity(100),
            slots: Mutex::new(Slots::default()),
            initialized: AtomicBool::new(true),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Turns every query into its safe default. Records are kept so late releases stay harmless.
    pub fn shutdown(&self) {
        self.initialized.store(false, Ordering::Release);
    }

    /// Resolves `name` case-insensitively and takes a reference. Returns whether the record is new.
    pub fn find_or_create(&self, name: &str) -> (ModelHandle, bool) {
        match self.names.entry(name_key(name)) {
            Entry::Occupied(occupied) => {
                let handle = *occupied.get();
                if let Some(record) = lock(&self.slots).get_mut(handle) {
                    record.ref_count += 1;
                }
                (handle, false)
            }
            Entry::Vacant(vacant) => {
                let handle = lock(&self.slots).allocate(AssetRecord::new(normalize_path(name)));
                trace!("Registered {} as {}", name, handle);
                vacant.insert(handle);
                (handle, true)
            }
        }
    }

    /// Looks up without taking a reference.
    pub fn find(&self, name: &str) -> Option<ModelHandle> {
        self.names.get(&name_key(name)).map(|handle| *handle)
    }

    pub fn add_ref(&self, handle: ModelHandle) -> u32 {
        if !self.is_initialized() {
            return 0;
        }

        self.with_record_mut(handle, |record| {
            record.ref_count += 1;
            record.ref_count
        })
        .unwrap_or(0)
    }

    /// Returns the remaining count; the caller tears the record down once it reaches zero.
    pub fn release(&self, handle: ModelHandle) -> u32 {
        if !self.is_initialized() {
            return 0;
        }

        self.with_record_mut(handle, |record| {
            record.ref_count = record.ref_count.saturating_sub(1);
            record.ref_count
        })
        .unwrap_or(0)
    }

    pub fn get_ref(&self, handle: ModelHandle) -> u32 {
        if !self.is_initialized() {
            return 0;
        }

        self.with_record(handle, |record| record.ref_count).unwrap_or(0)
    }

    pub fn is_valid(&self, handle: ModelHandle) -> bool {
        self.is_initialized() && lock(&self.slots).get(handle).is_some()
    }

    pub fn name(&self, handle: ModelHandle) -> Option<String> {
        self.with_record(handle, |record| record.name.clone())
    }

    pub fn with_record<R>(&self, handle: ModelHandle, f: impl FnOnce(&AssetRecord) -> R) -> Option<R> {
        lock(&self.slots).get(handle).map(f)
    }

    pub fn with_record_mut<R>(&self, handle: ModelHandle, f: impl FnOnce(&mut AssetRecord) -> R) -> Option<R> {
        lock(&self.slots).get_mut(handle).map(f)
    }

    pub fn handles(&self) -> Vec<ModelHandle> {
        lock(&self.slots)
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.record.is_some())
            .map(|(index, slot)| ModelHandle::new(index as u32, slot.generation))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Invalidates `handle` if nobody re-referenced it in the meantime, handing back the record.
    pub fn destroy(&self, handle: ModelHandle) -> Option<AssetRecord> {
        let key = name_key(&self.name(handle)?);
        let removed = self
            .names
            .remove_if(&key, |_, mapped| *mapped == handle && self.get_ref(handle) == 0);
        removed?;

        let mut slots = lock(&self.slots);
        let slot = slots.slots.get_mut(handle.index())?;
        let record = slot.record.take();
        slot.generation = slot.generation.wrapping_add(1);
        slots.free.push(handle.index() as u32);
        trace!("Destroyed {}", handle);
        record
    }
}
