use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{trace, warn};
use tokio::runtime::Runtime;

use crate::io::common::loader::{AsyncControl, AsyncReadRequest, FileSystem};
use crate::util::normalize_path;

/// Reads model files from a list of directories, the first root containing a file wins.
pub struct DirectoryFileSystem {
    prioritized_roots: Vec<PathBuf>,
    runtime: Runtime,
}

impl DirectoryFileSystem {
    pub fn new(prioritized_roots: Vec<PathBuf>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(4)
            .thread_name("mdlcache-io")
            .build()?;

        Ok(Self {
            prioritized_roots,
            runtime,
        })
    }

    /// The data folder itself, followed by its direct subfolders in name order.
    pub fn from_data_dir(data_folder: &Path) -> std::io::Result<Self> {
        let subfolders = fs::read_dir(data_folder)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .sorted()
            .collect_vec();

        let mut roots = vec![data_folder.to_path_buf()];
        roots.extend(subfolders);
        DirectoryFileSystem::new(roots)
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.prioritized_roots
    }

    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = normalize_path(path);
        self.prioritized_roots
            .iter()
            .find_map(|root| resolve_in(root, &relative))
    }

    fn read_resolved(path: &Path, offset: u64, size: Option<usize>, dest: Option<Vec<u8>>) -> std::io::Result<Vec<u8>> {
        let mut file = fs::File::open(path)?;
        let mut buffer = dest.unwrap_or_default();
        buffer.clear();

        file.seek(SeekFrom::Start(offset))?;
        match size {
            Some(size) => {
                buffer.resize(size, 0);
                file.read_exact(&mut buffer)?;
            }
            None => {
                file.read_to_end(&mut buffer)?;
            }
        }
        Ok(buffer)
    }

    fn read(&self, path: &str, offset: u64, size: Option<usize>) -> std::io::Result<Vec<u8>> {
        let Some(resolved) = self.resolve(path) else {
            warn!("Could not locate {}!", path);
            return Err(std::io::ErrorKind::NotFound.into());
        };

        trace!("Loading {} from {}", path, resolved.display());
        DirectoryFileSystem::read_resolved(&resolved, offset, size, None)
    }
}

fn resolve_in(root: &Path, relative: &str) -> Option<PathBuf> {
    let direct = root.join(relative);
    if direct.is_file() {
        return Some(direct);
    }

    // Archives are authored on case-insensitive systems, so walk the segments ignoring case.
    let mut current = root.to_path_buf();
    for segment in relative.split('/') {
        let exact = current.join(segment);
        if exact.exists() {
            current = exact;
            continue;
        }

        current = fs::read_dir(&current)
            .ok()?
            .filter_map(|entry| entry.ok())
            .find(|entry| entry.file_name().to_string_lossy().eq_ignore_ascii_case(segment))?
            .path();
    }

    current.is_file().then_some(current)
}

impl FileSystem for DirectoryFileSystem {
    fn read_file(&self, path: &str) -> std::io::Result<Vec<u8>> {
        self.read(path, 0, None)
    }

    fn read_range(&self, path: &str, offset: u64, size: usize) -> std::io::Result<Vec<u8>> {
        self.read(path, offset, Some(size))
    }

    fn file_exists(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    fn read_async(&self, request: AsyncReadRequest) -> AsyncControl {
        let control = AsyncControl::new();
        let Some(resolved) = self.resolve(&request.path) else {
            warn!("Could not locate {}!", request.path);
            control.complete(None);
            return control;
        };

        let remote = control.clone();
        self.runtime.spawn_blocking(move || {
            if remote.is_aborted() {
                return;
            }

            let result = DirectoryFileSystem::read_resolved(&resolved, request.offset, request.size, request.dest);
            if let Err(err) = &result {
                warn!("Reading {} failed: {}", request.path, err);
            }
            remote.complete(result.ok());
        });

        control
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::common::loader::AsyncStatus;

    #[test]
    fn earlier_roots_take_priority() -> Result<(), anyhow::Error> {
        let data = tempfile::tempdir()?;
        fs::create_dir_all(data.path().join("base/models"))?;
        fs::create_dir_all(data.path().join("patch/models"))?;
        fs::write(data.path().join("base/models/a.mdl"), b"base")?;
        fs::write(data.path().join("patch/models/a.mdl"), b"patch")?;

        let fs = DirectoryFileSystem::new(vec![data.path().join("patch"), data.path().join("base")])?;
        assert_eq!(fs.read_file("models/a.mdl")?, b"patch");
        Ok(())
    }

    #[test]
    fn lookup_falls_back_to_case_insensitive() -> Result<(), anyhow::Error> {
        let data = tempfile::tempdir()?;
        fs::create_dir_all(data.path().join("Models/Props"))?;
        fs::write(data.path().join("Models/Props/Crate.MDL"), b"0123456789")?;

        let fs = DirectoryFileSystem::from_data_dir(data.path())?;
        assert!(fs.file_exists("models\\props\\crate.mdl"));
        assert_eq!(fs.read_range("models/props/crate.mdl", 2, 3)?, b"234");
        assert!(fs.read_range("models/props/crate.mdl", 8, 4).is_err());
        Ok(())
    }

    #[test]
    fn parent_segments_stay_inside_the_root() -> Result<(), anyhow::Error> {
        let data = tempfile::tempdir()?;
        fs::create_dir_all(data.path().join("game/models"))?;
        fs::write(data.path().join("secret.mdl"), b"outside")?;
        fs::write(data.path().join("game/secret.mdl"), b"inside")?;

        let fs = DirectoryFileSystem::new(vec![data.path().join("game")])?;
        assert_eq!(fs.read_file("../secret.mdl")?, b"inside");
        assert_eq!(fs.read_file("models/../../secret.mdl")?, b"inside");
        Ok(())
    }

    #[test]
    fn async_reads_complete_on_the_blocking_pool() -> Result<(), anyhow::Error> {
        let data = tempfile::tempdir()?;
        fs::write(data.path().join("blocks.ani"), b"abcdef")?;

        let fs = DirectoryFileSystem::new(vec![data.path().to_path_buf()])?;
        let control = fs.read_async(AsyncReadRequest::range("blocks.ani", 1, 3));
        assert_eq!(fs.finish(&control), AsyncStatus::Ok);
        assert_eq!(control.take(), Some(b"bcd".to_vec()));

        let missing = fs.read_async(AsyncReadRequest::whole_file("nope.ani"));
        assert_eq!(missing.status(), AsyncStatus::Failed);
        Ok(())
    }
}
