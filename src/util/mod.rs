use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Locks `mutex`, carrying on with the inner value if a previous holder panicked.
#[inline]
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Fixes slashes and removes `.` and `..` segments, e.g. `models\./props/../a.mdl` -> `models/a.mdl`.
/// The result never climbs above its root: a `..` with nothing left to pop is dropped.
pub fn normalize_path(path: &str) -> String {
    let fixed = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in fixed.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Extensions spanning two dots, replaced as a whole.
const MESH_INDEX_EXTENSIONS: [&str; 3] = [".dx90.vtx", ".dx80.vtx", ".sw.vtx"];

/// Replaces the last extension of the file name; `extension` carries its leading dot.
pub fn with_extension(path: &str, extension: &str) -> String {
    let file_start = path.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    let file = &path[file_start..];
    let stem_len = MESH_INDEX_EXTENSIONS
        .iter()
        .find(|suffix| file.len() > suffix.len() && file.to_ascii_lowercase().ends_with(*suffix))
        .map(|suffix| file.len() - suffix.len())
        .or_else(|| file.rfind('.').filter(|idx| *idx > 0))
        .unwrap_or(file.len());
    format!("{}{}", &path[..file_start + stem_len], extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_removes_dot_segments() {
        assert_eq!(normalize_path("models/./props/../a.mdl"), "models/a.mdl");
        assert_eq!(normalize_path("./models\\b.mdl"), "models/b.mdl");
        assert_eq!(normalize_path("../up.mdl"), "up.mdl");
        assert_eq!(normalize_path("models/../../../etc/passwd"), "etc/passwd");
        assert_eq!(normalize_path("/models/a.mdl"), "models/a.mdl");
    }

    #[test]
    fn extension_is_replaced_on_the_file_name_only() {
        assert_eq!(with_extension("models/a.mdl", ".vvd"), "models/a.vvd");
        assert_eq!(with_extension("models/a.mdl", ".dx90.vtx"), "models/a.dx90.vtx");
        assert_eq!(with_extension("models.v2/a", ".phy"), "models.v2/a.phy");
        assert_eq!(with_extension("models/props.v2/a.b.mdl", ".vvd"), "models/props.v2/a.b.vvd");
        assert_eq!(with_extension("models/a.dx90.vtx", ".phy"), "models/a.phy");
        assert_eq!(with_extension("models/.hidden", ".phy"), "models/.hidden.phy");
    }
}
