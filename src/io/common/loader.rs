use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::util::lock;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AsyncStatus {
    Pending,
    Ok,
    /// Missing file or a short read.
    Failed,
    Aborted,
}

/// A read of `size` bytes at `offset`, `None` reading to the end of the file.
#[derive(Debug, Clone)]
pub struct AsyncReadRequest {
    pub path: String,
    pub offset: u64,
    pub size: Option<usize>,
    /// Caller provided destination. Without one, the file system allocates the buffer itself.
    pub dest: Option<Vec<u8>>,
    pub priority: i32,
}

impl AsyncReadRequest {
    pub fn whole_file(path: &str) -> Self {
        Self {
            path: path.to_string(),
            offset: 0,
            size: None,
            dest: None,
            priority: 0,
        }
    }

    pub fn range(path: &str, offset: u64, size: usize) -> Self {
        Self {
            path: path.to_string(),
            offset,
            size: Some(size),
            dest: None,
            priority: 0,
        }
    }
}

struct ControlState {
    status: AsyncStatus,
    data: Option<Vec<u8>>,
}

struct ControlSlot {
    state: Mutex<ControlState>,
    done: Condvar,
    aborted: AtomicBool,
}

/// Shared completion slot of one asynchronous read. Clones observe the same read.
#[derive(Clone)]
pub struct AsyncControl {
    slot: Arc<ControlSlot>,
}

impl Debug for AsyncControl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncControl").field("status", &self.status()).finish()
    }
}

impl PartialEq for AsyncControl {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl Default for AsyncControl {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncControl {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(ControlSlot {
                state: Mutex::new(ControlState {
                    status: AsyncStatus::Pending,
                    data: None,
                }),
                done: Condvar::new(),
                aborted: AtomicBool::new(false),
            }),
        }
    }

    /// A control that has already finished with `result`.
    pub fn completed(result: Option<Vec<u8>>) -> Self {
        let control = Self::new();
        control.complete(result);
        control
    }

    /// Called by the reading side. Data arriving after an abort is dropped.
    pub fn complete(&self, result: Option<Vec<u8>>) {
        let mut state = lock(&self.slot.state);
        if state.status != AsyncStatus::Pending {
            return;
        }

        if self.is_aborted() {
            state.status = AsyncStatus::Aborted;
        } else {
            state.status = if result.is_some() {
                AsyncStatus::Ok
            } else {
                AsyncStatus::Failed
            };
            state.data = result;
        }
        self.slot.done.notify_all();
    }

    pub fn status(&self) -> AsyncStatus {
        lock(&self.slot.state).status
    }

    pub fn is_done(&self) -> bool {
        self.status() != AsyncStatus::Pending
    }

    /// Blocks until the read is no longer pending.
    pub fn wait(&self) -> AsyncStatus {
        let mut state = lock(&self.slot.state);
        while state.status == AsyncStatus::Pending {
            state = self
                .slot
                .done
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        state.status
    }

    /// Takes the buffer of a successful read. Subsequent calls return `None`.
    pub fn take(&self) -> Option<Vec<u8>> {
        lock(&self.slot.state).data.take()
    }

    /// Marks the read as aborted. A read that already produced data keeps its status so the
    /// buffer can still be drained.
    pub fn abort(&self) {
        self.slot.aborted.store(true, Ordering::Release);
        let mut state = lock(&self.slot.state);
        if state.status == AsyncStatus::Pending {
            state.status = AsyncStatus::Aborted;
            self.slot.done.notify_all();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.slot.aborted.load(Ordering::Acquire)
    }
}

/// Where the cache reads model files from.
pub trait FileSystem: Send + Sync {
    fn read_file(&self, path: &str) -> std::io::Result<Vec<u8>>;

    /// Reading past the end of the file is an error.
    fn read_range(&self, path: &str, offset: u64, size: usize) -> std::io::Result<Vec<u8>>;

    fn file_exists(&self, path: &str) -> bool;

    fn read_async(&self, request: AsyncReadRequest) -> AsyncControl;

    fn abort(&self, control: &AsyncControl) {
        control.abort();
    }

    /// Forces the read to complete, blocking the caller.
    fn finish(&self, control: &AsyncControl) -> AsyncStatus {
        control.wait()
    }

    /// Returns a buffer the file system allocated for a read without a destination.
    fn free_optimal_read_buffer(&self, _buffer: Vec<u8>) {}

    /// The cache no longer holds any data that was read from `path`.
    fn notify_unloaded(&self, _path: &str) {}
}

/// Fills `dest` (or a fresh buffer) with the requested range of `source`.
pub(crate) fn copy_range(source: &[u8], offset: u64, size: Option<usize>, dest: Option<Vec<u8>>) -> std::io::Result<Vec<u8>> {
    let start = usize::try_from(offset).map_err(|_| std::io::ErrorKind::InvalidInput)?;
    let end = match size {
        Some(size) => start.checked_add(size).ok_or(std::io::ErrorKind::InvalidInput)?,
        None => source.len(),
    };

    if start > end || end > source.len() {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }

    let mut buffer = dest.unwrap_or_default();
    buffer.clear();
    buffer.extend_from_slice(&source[start..end]);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_wakes_waiters() {
        let control = AsyncControl::new();
        let remote = control.clone();
        let handle = std::thread::spawn(move || remote.wait());
        control.complete(Some(vec![1, 2, 3]));
        assert_eq!(handle.join().unwrap(), AsyncStatus::Ok);
        assert_eq!(control.take(), Some(vec![1, 2, 3]));
        assert_eq!(control.take(), None);
    }

    #[test]
    fn abort_discards_late_data() {
        let control = AsyncControl::new();
        control.abort();
        control.complete(Some(vec![1]));
        assert_eq!(control.status(), AsyncStatus::Aborted);
        assert_eq!(control.take(), None);
    }

    #[test]
    fn abort_after_completion_keeps_buffer() {
        let control = AsyncControl::completed(Some(vec![7]));
        control.abort();
        assert_eq!(control.status(), AsyncStatus::Ok);
        assert!(control.is_aborted());
        assert_eq!(control.take(), Some(vec![7]));
    }

    #[test]
    fn short_range_is_an_error() {
        let source = [1u8, 2, 3, 4];
        assert_eq!(copy_range(&source, 1, Some(2), None).unwrap(), vec![2, 3]);
        assert_eq!(copy_range(&source, 2, None, Some(vec![9; 8])).unwrap(), vec![3, 4]);
        assert!(copy_range(&source, 3, Some(2), None).is_err());
    }
}
