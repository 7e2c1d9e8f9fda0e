use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::thread::ThreadId;

use log::trace;
use thiserror::Error;

use crate::cache::handle::{DataKey, DataKind, ModelHandle};
use crate::io::common::loader::{AsyncControl, AsyncReadRequest, AsyncStatus, FileSystem};
use crate::util::lock;

/// Issue order of an async request. Draining in id order drains oldest first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TrackerError {
    #[error("{} {} of {} already has a request in flight", .key.kind, .key.block, .key.handle)]
    Duplicate { key: DataKey },
}

#[derive(Debug)]
pub enum PollResult {
    /// Not on the main thread, or the request is unknown.
    Indeterminate,
    Pending,
    /// The request left the tracker. `data` is `None` for failed, short or aborted reads.
    Completed { key: DataKey, data: Option<Vec<u8>> },
}

#[derive(Debug)]
struct AsyncRequest {
    key: DataKey,
    control: AsyncControl,
    path: String,
}

#[derive(Default)]
struct TrackerInner {
    index: HashMap<DataKey, RequestId>,
    pending: BTreeMap<RequestId, AsyncRequest>,
    next_id: u64,
}

/// At most one request per key. Completion is only observed on the thread that created the
/// tracker; the I/O side merely completes the control.
pub struct AsyncTracker {
    inner: Mutex<TrackerInner>,
    main_thread: ThreadId,
}

impl Default for AsyncTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner::default()),
            main_thread: std::thread::current().id(),
        }
    }

    pub fn is_main_thread(&self) -> bool {
        std::thread::current().id() == self.main_thread
    }

    pub fn index_for(&self, key: DataKey) -> Option<RequestId> {
        lock(&self.inner).index.get(&key).copied()
    }

    /// Setting an index is only allowed while the key has none; `None` clears it.
    pub fn set_index(&self, key: DataKey, index: Option<RequestId>) -> Result<(), TrackerError> {
        let mut inner = lock(&self.inner);
        match index {
            Some(id) => {
                if inner.index.contains_key(&key) {
                    return Err(TrackerError::Duplicate { key });
                }
                inner.index.insert(key, id);
            }
            None => {
                inner.index.remove(&key);
            }
        }
        Ok(())
    }

    /// Issues the read outside the tracker lock. A synchronous load is finished before
    /// returning, so its first poll completes.
    pub fn begin_load(
        &self,
        key: DataKey,
        request: AsyncReadRequest,
        asynchronous: bool,
        file_system: &dyn FileSystem,
    ) -> Result<RequestId, TrackerError> {
        if self.index_for(key).is_some() {
            return Err(TrackerError::Duplicate { key });
        }

        let path = request.path.clone();
        let control = file_system.read_async(request);
        if !asynchronous {
            file_system.finish(&control);
        }

        let mut inner = lock(&self.inner);
        if inner.index.contains_key(&key) {
            file_system.abort(&control);
            return Err(TrackerError::Duplicate { key });
        }

        let id = RequestId(inner.next_id);
        inner.next_id += 1;
        inner.index.insert(key, id);
        inner.pending.insert(id, AsyncRequest { key, control, path });
        trace!("Async request {:?} for {} {} of {}", id, key.kind, key.block, key.handle);
        Ok(id)
    }

    pub fn poll(&self, id: RequestId) -> PollResult {
        if !self.is_main_thread() {
            return PollResult::Indeterminate;
        }

        let mut inner = lock(&self.inner);
        let Some(request) = inner.pending.get(&id) else {
            return PollResult::Indeterminate;
        };

        let status = request.control.status();
        if status == AsyncStatus::Pending {
            return PollResult::Pending;
        }

        let Some(request) = inner.pending.remove(&id) else {
            return PollResult::Indeterminate;
        };
        inner.index.remove(&request.key);

        let data = match status {
            AsyncStatus::Ok => request.control.take(),
            _ => None,
        };
        PollResult::Completed { key: request.key, data }
    }

    /// Outstanding requests, oldest first, optionally only those of `filter`.
    pub fn pending_in_order(&self, filter: Option<DataKind>) -> Vec<(RequestId, DataKey)> {
        lock(&self.inner)
            .pending
            .iter()
            .filter(|(_, request)| filter.is_none_or(|kind| request.key.kind == kind))
            .map(|(id, request)| (*id, request.key))
            .collect()
    }

    /// Drops the request of `key`, aborting it if asked. A buffer the read already produced is
    /// handed back to the file system.
    pub fn clear(&self, key: DataKey, abort: bool, file_system: &dyn FileSystem) -> bool {
        let request = {
            let mut inner = lock(&self.inner);
            let Some(id) = inner.index.remove(&key) else {
                return false;
            };
            inner.pending.remove(&id)
        };

        let Some(request) = request else {
            return true;
        };

        trace!("Clearing async request for {} ({})", request.path, key.kind);
        if abort {
            file_system.abort(&request.control);
        }

        if request.control.status() == AsyncStatus::Ok {
            if let Some(buffer) = request.control.take() {
                file_system.free_optimal_read_buffer(buffer);
            }
        }
        true
    }

    /// Clears every request of `handle`, returning how many there were.
    pub fn clear_handle(&self, handle: ModelHandle, file_system: &dyn FileSystem) -> usize {
        let keys: Vec<DataKey> = lock(&self.inner)
            .index
            .keys()
            .filter(|key| key.handle == handle)
            .copied()
            .collect();

        keys.into_iter()
            .filter(|key| self.clear(*key, true, file_system))
            .count()
    }

    /// Blocks until the read of `key` completed. Returns `false` if there is none.
    pub fn finish(&self, key: DataKey, file_system: &dyn FileSystem) -> bool {
        let control = {
            let inner = lock(&self.inner);
            let Some(id) = inner.index.get(&key) else {
                return false;
            };
            inner.pending.get(id).map(|request| request.control.clone())
        };

        match control {
            Some(control) => {
                file_system.finish(&control);
                true
            }
            None => false,
        }
    }

    /// Forces every outstanding read to complete. The tracker lock is not held while waiting.
    pub fn finish_all(&self, file_system: &dyn FileSystem) {
        let controls: Vec<AsyncControl> = lock(&self.inner)
            .pending
            .values()
            .map(|request| request.control.clone())
            .collect();

        for control in controls {
            file_system.finish(&control);
        }
    }

    pub fn count(&self) -> usize {
        lock(&self.inner).pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory::{AsyncMode, MemoryFileSystem};

    fn block_key(block: u32) -> DataKey {
        DataKey::anim_block(ModelHandle::new(0, 0), block)
    }

    #[test]
    fn second_request_for_a_key_is_rejected() {
        let fs = MemoryFileSystem::with_mode(AsyncMode::Manual);
        fs.insert("a.ani", vec![0; 16]);
        let tracker = AsyncTracker::new();

        let first = tracker.begin_load(block_key(3), AsyncReadRequest::range("a.ani", 0, 8), true, &fs);
        assert!(first.is_ok());
        let second = tracker.begin_load(block_key(3), AsyncReadRequest::range("a.ani", 0, 8), true, &fs);
        assert_eq!(second, Err(TrackerError::Duplicate { key: block_key(3) }));
        assert_eq!(tracker.count(), 1);
        assert_eq!(fs.pending_count(), 1);
    }

    #[test]
    fn set_index_is_exclusive() {
        let tracker = AsyncTracker::new();
        assert!(tracker.set_index(block_key(1), Some(RequestId(4))).is_ok());
        assert!(tracker.set_index(block_key(1), Some(RequestId(5))).is_err());
        assert!(tracker.set_index(block_key(1), None).is_ok());
        assert_eq!(tracker.index_for(block_key(1)), None);
    }

    #[test]
    fn poll_reports_pending_then_completion() {
        let fs = MemoryFileSystem::with_mode(AsyncMode::Manual);
        fs.insert("a.ani", vec![1, 2, 3, 4]);
        let tracker = AsyncTracker::new();

        let id = tracker
            .begin_load(block_key(1), AsyncReadRequest::range("a.ani", 2, 2), true, &fs)
            .unwrap();
        assert!(matches!(tracker.poll(id), PollResult::Pending));

        fs.release_pending();
        match tracker.poll(id) {
            PollResult::Completed { key, data } => {
                assert_eq!(key, block_key(1));
                assert_eq!(data, Some(vec![3, 4]));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(tracker.index_for(block_key(1)), None);
        assert!(matches!(tracker.poll(id), PollResult::Indeterminate));
    }

    #[test]
    fn polling_off_the_main_thread_is_indeterminate() {
        let fs = MemoryFileSystem::new();
        fs.insert("a.ani", vec![1]);
        let tracker = AsyncTracker::new();
        let id = tracker
            .begin_load(block_key(1), AsyncReadRequest::whole_file("a.ani"), false, &fs)
            .unwrap();

        std::thread::scope(|scope| {
            let polled = scope.spawn(|| matches!(tracker.poll(id), PollResult::Indeterminate));
            assert!(polled.join().unwrap());
        });
        assert!(matches!(tracker.poll(id), PollResult::Completed { .. }));
    }

    #[test]
    fn pending_requests_drain_oldest_first() {
        let fs = MemoryFileSystem::with_mode(AsyncMode::Manual);
        let tracker = AsyncTracker::new();
        for block in [5, 2, 9] {
            tracker
                .begin_load(block_key(block), AsyncReadRequest::whole_file("a.ani"), true, &fs)
                .unwrap();
        }

        let order: Vec<u32> = tracker
            .pending_in_order(Some(DataKind::AnimBlock))
            .into_iter()
            .map(|(_, key)| key.block)
            .collect();
        assert_eq!(order, vec![5, 2, 9]);
        assert!(tracker.pending_in_order(Some(DataKind::Collision)).is_empty());
    }

    #[test]
    fn clearing_a_finished_read_frees_its_buffer() {
        let fs = MemoryFileSystem::new();
        fs.insert("a.ani", vec![1, 2]);
        let tracker = AsyncTracker::new();
        tracker
            .begin_load(block_key(1), AsyncReadRequest::whole_file("a.ani"), true, &fs)
            .unwrap();

        assert!(tracker.clear(block_key(1), true, &fs));
        assert_eq!(fs.freed_buffers(), 1);
        assert!(!tracker.clear(block_key(1), true, &fs));
        assert_eq!(tracker.count(), 0);
    }
}
