use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, trace};

use crate::cache::handle::DataKey;
use crate::util::{lock, read, write};

/// Reference to one entry of a [`CacheSection`]. Never reused within a section.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EntryRef(u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EvictionReason {
    /// Made room for new data or a lowered budget.
    Budget,
    Flush,
    Purge,
}

/// Handed to the section listener for every entry the section dropped on its own.
pub struct EvictionNotice<T> {
    pub entry: EntryRef,
    pub client: DataKey,
    pub data: T,
    pub size: usize,
    pub reason: EvictionReason,
}

pub type EvictionListener<T> = Box<dyn Fn(EvictionNotice<T>) + Send + Sync>;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SectionLimits {
    pub max_bytes: Option<usize>,
    pub max_items: Option<usize>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SectionStatus {
    pub bytes: usize,
    pub items: usize,
    pub locked_bytes: usize,
    pub locked_items: usize,
    pub find_hits: u64,
}

struct Entry<T> {
    id: EntryRef,
    client: DataKey,
    data: T,
    size: usize,
    locks: u32,
    last_touch: u64,
    frame_locked: bool,
    pins: Arc<AtomicU32>,
}

impl<T> Entry<T> {
    fn is_locked(&self) -> bool {
        self.locks > 0 || self.frame_locked
    }

    fn is_evictable(&self) -> bool {
        !self.is_locked() && self.pins.load(Ordering::Acquire) == 0
    }
}

struct SectionInner<T> {
    entries: HashMap<EntryRef, Entry<T>>,
    next_ref: u64,
    tick: u64,
    bytes: usize,
    frame_depth: u32,
    find_hits: u64,
    limits: SectionLimits,
}

impl<T> SectionInner<T> {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn over_budget(&self, incoming_bytes: usize, incoming_items: usize) -> bool {
        let bytes = self
            .limits
            .max_bytes
            .is_some_and(|max| self.bytes + incoming_bytes > max);
        let items = self
            .limits
            .max_items
            .is_some_and(|max| self.entries.len() + incoming_items > max);
        bytes || items
    }

    fn least_recently_used(&self) -> Option<EntryRef> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_evictable())
            .min_by_key(|(_, entry)| entry.last_touch)
            .map(|(entry_ref, _)| *entry_ref)
    }

    fn take(&mut self, entry_ref: EntryRef) -> Option<Entry<T>> {
        let entry = self.entries.remove(&entry_ref)?;
        self.bytes -= entry.size;
        Some(entry)
    }

    /// Evicts least recently used entries until `incoming` fits. Locked and pinned entries are
    /// never selected, so the section may stay over budget.
    fn ensure_capacity(&mut self, incoming_bytes: usize, incoming_items: usize) -> Vec<Entry<T>> {
        let mut evicted = Vec::new();
        while self.over_budget(incoming_bytes, incoming_items) {
            let Some(victim) = self.least_recently_used() else {
                break;
            };

            if let Some(entry) = self.take(victim) {
                evicted.push(entry);
            }
        }
        evicted
    }
}

/// Pins an entry against eviction while alive and dereferences to its data.
pub struct PinnedItem<T> {
    data: T,
    pins: Arc<AtomicU32>,
}

impl<T> Deref for PinnedItem<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<T> Drop for PinnedItem<T> {
    fn drop(&mut self) {
        self.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A budgeted LRU store. Data handed out stays valid as a value, but the entry itself may be
/// evicted by the next mutation unless it is locked, pinned or frame locked.
pub struct CacheSection<T> {
    name: &'static str,
    inner: Mutex<SectionInner<T>>,
    listener: RwLock<Option<EvictionListener<T>>>,
}

impl<T> Debug for CacheSection<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSection").field("name", &self.name).finish()
    }
}

impl<T: Clone> CacheSection<T> {
    pub fn new(name: &'static str, limits: SectionLimits) -> Self {
        Self {
            name,
            inner: Mutex::new(SectionInner {
                entries: HashMap::new(),
                next_ref: 1,
                tick: 0,
                bytes: 0,
                frame_depth: 0,
                find_hits: 0,
                limits,
            }),
            listener: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The listener runs without the section lock held and may call back into the section.
    pub fn set_listener(&self, listener: EvictionListener<T>) {
        *write(&self.listener) = Some(listener);
    }

    fn notify(&self, evicted: Vec<Entry<T>>, reason: EvictionReason) {
        if evicted.is_empty() {
            return;
        }

        let listener = read(&self.listener);
        for entry in evicted {
            trace!(
                "{}: dropping {:?} {} ({} bytes, {:?})",
                self.name, entry.client.handle, entry.client.kind, entry.size, reason
            );

            if let Some(listener) = listener.as_ref() {
                listener(EvictionNotice {
                    entry: entry.id,
                    client: entry.client,
                    data: entry.data,
                    size: entry.size,
                    reason,
                });
            }
        }
    }

    pub fn add(&self, client: DataKey, data: T, size: usize) -> EntryRef {
        profiling::scope!("CacheSection::add");
        let (entry_ref, evicted) = {
            let mut inner = lock(&self.inner);
            let evicted = inner.ensure_capacity(size, 1);
            if inner.over_budget(size, 1) {
                debug!("{}: over budget, everything left is locked", self.name);
            }

            let entry_ref = EntryRef(inner.next_ref);
            inner.next_ref += 1;
            let last_touch = inner.touch();
            let frame_locked = inner.frame_depth > 0;
            inner.entries.insert(
                entry_ref,
                Entry {
                    id: entry_ref,
                    client,
                    data,
                    size,
                    locks: 0,
                    last_touch,
                    frame_locked,
                    pins: Arc::new(AtomicU32::new(0)),
                },
            );
            inner.bytes += size;
            (entry_ref, evicted)
        };

        self.notify(evicted, EvictionReason::Budget);
        entry_ref
    }

    /// Marks the entry most recently used. While frame locking, the entry joins the frame lock.
    pub fn get(&self, entry_ref: EntryRef) -> Option<T> {
        let mut inner = lock(&self.inner);
        let tick = inner.touch();
        let framing = inner.frame_depth > 0;
        let entry = inner.entries.get_mut(&entry_ref)?;
        entry.last_touch = tick;
        entry.frame_locked |= framing;
        Some(entry.data.clone())
    }

    pub fn get_no_touch(&self, entry_ref: EntryRef) -> Option<T> {
        lock(&self.inner)
            .entries
            .get(&entry_ref)
            .map(|entry| entry.data.clone())
    }

    pub fn pin(&self, entry_ref: EntryRef) -> Option<PinnedItem<T>> {
        let inner = lock(&self.inner);
        let entry = inner.entries.get(&entry_ref)?;
        entry.pins.fetch_add(1, Ordering::AcqRel);
        Some(PinnedItem {
            data: entry.data.clone(),
            pins: entry.pins.clone(),
        })
    }

    /// Hands the data back to the caller. Entries with explicit locks are not removed.
    pub fn remove(&self, entry_ref: EntryRef) -> Option<T> {
        let mut inner = lock(&self.inner);
        if inner.entries.get(&entry_ref)?.locks > 0 {
            debug!("{}: refusing to remove a locked entry", self.name);
            return None;
        }

        inner.take(entry_ref).map(|entry| entry.data)
    }

    pub fn lock(&self, entry_ref: EntryRef) -> bool {
        let mut inner = lock(&self.inner);
        match inner.entries.get_mut(&entry_ref) {
            Some(entry) => {
                entry.locks += 1;
                true
            }
            None => false,
        }
    }

    /// Returns the remaining lock count. Releasing the last lock may evict over-budget entries.
    pub fn unlock(&self, entry_ref: EntryRef) -> Option<u32> {
        let (remaining, evicted) = {
            let mut inner = lock(&self.inner);
            let entry = inner.entries.get_mut(&entry_ref)?;
            entry.locks = entry.locks.saturating_sub(1);
            let remaining = entry.locks;
            let evicted = if remaining == 0 {
                inner.ensure_capacity(0, 0)
            } else {
                Vec::new()
            };
            (remaining, evicted)
        };

        self.notify(evicted, EvictionReason::Budget);
        Some(remaining)
    }

    pub fn lock_count(&self, entry_ref: EntryRef) -> u32 {
        lock(&self.inner)
            .entries
            .get(&entry_ref)
            .map(|entry| entry.locks)
            .unwrap_or(0)
    }

    /// Drops every explicit lock and the frame lock of the entry, returning the previous lock count.
    pub fn break_lock(&self, entry_ref: EntryRef) -> u32 {
        let mut inner = lock(&self.inner);
        match inner.entries.get_mut(&entry_ref) {
            Some(entry) => {
                entry.frame_locked = false;
                std::mem::take(&mut entry.locks)
            }
            None => 0,
        }
    }

    pub fn is_present(&self, entry_ref: EntryRef) -> bool {
        lock(&self.inner).entries.contains_key(&entry_ref)
    }

    /// Makes the entry the first eviction candidate.
    pub fn age(&self, entry_ref: EntryRef) {
        if let Some(entry) = lock(&self.inner).entries.get_mut(&entry_ref) {
            entry.last_touch = 0;
        }
    }

    pub fn update_size(&self, entry_ref: EntryRef, size: usize) {
        let evicted = {
            let mut inner = lock(&self.inner);
            let Some(entry) = inner.entries.get_mut(&entry_ref) else {
                return;
            };

            let previous = std::mem::replace(&mut entry.size, size);
            inner.bytes = inner.bytes - previous + size;
            inner.ensure_capacity(0, 0)
        };

        self.notify(evicted, EvictionReason::Budget);
    }

    /// Looks up the entry stored for `client`.
    pub fn find(&self, client: DataKey) -> Option<EntryRef> {
        let mut inner = lock(&self.inner);
        let found = inner
            .entries
            .iter()
            .find(|(_, entry)| entry.client == client)
            .map(|(entry_ref, _)| *entry_ref)?;
        inner.find_hits += 1;
        Some(found)
    }

    /// Drops entries and reports each of them to the listener. Returns how many were dropped.
    pub fn flush(&self, unlocked_only: bool) -> usize {
        let evicted = {
            let mut inner = lock(&self.inner);
            let victims: Vec<EntryRef> = inner
                .entries
                .iter()
                .filter(|(_, entry)| !unlocked_only || entry.is_evictable())
                .map(|(entry_ref, _)| *entry_ref)
                .collect();
            victims
                .into_iter()
                .filter_map(|victim| inner.take(victim))
                .collect::<Vec<_>>()
        };

        let count = evicted.len();
        self.notify(evicted, EvictionReason::Flush);
        count
    }

    /// Evicts least recently used entries until at least `bytes` were freed, returning the
    /// amount actually freed.
    pub fn purge(&self, bytes: usize) -> usize {
        profiling::scope!("CacheSection::purge");
        let evicted = {
            let mut inner = lock(&self.inner);
            let mut freed = 0;
            let mut evicted = Vec::new();
            while freed < bytes {
                let Some(victim) = inner.least_recently_used() else {
                    break;
                };

                if let Some(entry) = inner.take(victim) {
                    freed += entry.size;
                    evicted.push(entry);
                }
            }
            evicted
        };

        let freed = evicted.iter().map(|entry| entry.size).sum();
        self.notify(evicted, EvictionReason::Purge);
        freed
    }

    pub fn set_limits(&self, limits: SectionLimits) {
        let evicted = {
            let mut inner = lock(&self.inner);
            inner.limits = limits;
            inner.ensure_capacity(0, 0)
        };

        self.notify(evicted, EvictionReason::Budget);
    }

    pub fn limits(&self) -> SectionLimits {
        lock(&self.inner).limits
    }

    pub fn status(&self) -> SectionStatus {
        let inner = lock(&self.inner);
        let (locked_items, locked_bytes) = inner
            .entries
            .values()
            .filter(|entry| entry.is_locked())
            .fold((0, 0), |(items, bytes), entry| (items + 1, bytes + entry.size));

        SectionStatus {
            bytes: inner.bytes,
            items: inner.entries.len(),
            locked_bytes,
            locked_items,
            find_hits: inner.find_hits,
        }
    }

    /// Nested. The outermost call frame locks everything resident; entries added or fetched
    /// while framing join the frame lock.
    pub fn begin_frame_locking(&self) -> u32 {
        let mut inner = lock(&self.inner);
        inner.frame_depth += 1;
        if inner.frame_depth == 1 {
            inner
                .entries
                .values_mut()
                .for_each(|entry| entry.frame_locked = true);
        }
        inner.frame_depth
    }

    /// Returns whether this released the outermost frame lock.
    pub fn end_frame_locking(&self) -> bool {
        let evicted = {
            let mut inner = lock(&self.inner);
            if inner.frame_depth > 1 {
                inner.frame_depth -= 1;
                return false;
            }

            inner.frame_depth = 0;
            inner
                .entries
                .values_mut()
                .for_each(|entry| entry.frame_locked = false);
            inner.ensure_capacity(0, 0)
        };

        self.notify(evicted, EvictionReason::Budget);
        true
    }

    pub fn is_frame_locking(&self) -> bool {
        self.frame_lock_depth() > 0
    }

    pub fn frame_lock_depth(&self) -> u32 {
        lock(&self.inner).frame_depth
    }

    /// Every entry with its owner, for walks over the whole section.
    pub fn entries(&self) -> Vec<(EntryRef, DataKey)> {
        lock(&self.inner)
            .entries
            .iter()
            .map(|(entry_ref, entry)| (*entry_ref, entry.client))
            .collect()
    }
}
