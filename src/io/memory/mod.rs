use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use log::trace;

use crate::io::common::loader::{AsyncControl, AsyncReadRequest, AsyncStatus, FileSystem, copy_range};
use crate::util::{lock, normalize_path};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AsyncMode {
    /// Asynchronous reads complete before `read_async` returns.
    Immediate,
    /// Asynchronous reads stay pending until released or finished.
    Manual,
}

/// Model files kept in memory, keyed case-insensitively.
pub struct MemoryFileSystem {
    files: DashMap<String, Arc<Vec<u8>>>,
    mode: Mutex<AsyncMode>,
    held: Mutex<Vec<(AsyncReadRequest, AsyncControl)>>,
    reads: DashMap<String, usize>,
    unloaded: Mutex<Vec<String>>,
    freed_buffers: AtomicUsize,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn file_key(path: &str) -> String {
    normalize_path(path).to_ascii_lowercase()
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::with_mode(AsyncMode::Immediate)
    }

    pub fn with_mode(mode: AsyncMode) -> Self {
        Self {
            files: DashMap::new(),
            mode: Mutex::new(mode),
            held: Mutex::new(Vec::new()),
            reads: DashMap::new(),
            unloaded: Mutex::new(Vec::new()),
            freed_buffers: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, path: &str, data: Vec<u8>) {
        self.files.insert(file_key(path), Arc::new(data));
    }

    pub fn remove(&self, path: &str) -> bool {
        self.files.remove(&file_key(path)).is_some()
    }

    pub fn set_mode(&self, mode: AsyncMode) {
        *lock(&self.mode) = mode;
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.held).len()
    }

    /// Completes every held read, returning how many there were.
    pub fn release_pending(&self) -> usize {
        let held = std::mem::take(&mut *lock(&self.held));
        let count = held.len();
        for (request, control) in held {
            self.complete(request, &control);
        }
        count
    }

    /// How often `path` was read, synchronously or not.
    pub fn read_count(&self, path: &str) -> usize {
        self.reads.get(&file_key(path)).map(|count| *count).unwrap_or(0)
    }

    pub fn unloaded_paths(&self) -> Vec<String> {
        lock(&self.unloaded).clone()
    }

    pub fn freed_buffers(&self) -> usize {
        self.freed_buffers.load(Ordering::Acquire)
    }

    fn lookup(&self, path: &str) -> std::io::Result<Arc<Vec<u8>>> {
        let key = file_key(path);
        *self.reads.entry(key.clone()).or_insert(0) += 1;
        self.files
            .get(&key)
            .map(|file| file.clone())
            .ok_or_else(|| std::io::ErrorKind::NotFound.into())
    }

    fn complete(&self, request: AsyncReadRequest, control: &AsyncControl) {
        let result = self
            .lookup(&request.path)
            .and_then(|file| copy_range(&file, request.offset, request.size, request.dest));
        trace!("MemoryFileSystem: completing {} (ok: {})", request.path, result.is_ok());
        control.complete(result.ok());
    }

    fn take_held(&self, control: &AsyncControl) -> Option<AsyncReadRequest> {
        let mut held = lock(&self.held);
        let position = held.iter().position(|(_, other)| other == control)?;
        Some(held.remove(position).0)
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_file(&self, path: &str) -> std::io::Result<Vec<u8>> {
        Ok(self.lookup(path)?.as_ref().clone())
    }

    fn read_range(&self, path: &str, offset: u64, size: usize) -> std::io::Result<Vec<u8>> {
        copy_range(&self.lookup(path)?, offset, Some(size), None)
    }

    fn file_exists(&self, path: &str) -> bool {
        self.files.contains_key(&file_key(path))
    }

    fn read_async(&self, request: AsyncReadRequest) -> AsyncControl {
        let control = AsyncControl::new();
        match *lock(&self.mode) {
            AsyncMode::Immediate => self.complete(request, &control),
            AsyncMode::Manual => lock(&self.held).push((request, control.clone())),
        }
        control
    }

    fn abort(&self, control: &AsyncControl) {
        self.take_held(control);
        control.abort();
    }

    fn finish(&self, control: &AsyncControl) -> AsyncStatus {
        if let Some(request) = self.take_held(control) {
            self.complete(request, control);
        }
        control.wait()
    }

    fn free_optimal_read_buffer(&self, _buffer: Vec<u8>) {
        self.freed_buffers.fetch_add(1, Ordering::AcqRel);
    }

    fn notify_unloaded(&self, path: &str) {
        lock(&self.unloaded).push(file_key(path));
    }
}
