//! Read/write-by-path access to the repository being fixed

use crate::error::StorageError;
use crate::util::{check_relative_path, resolve_repo_path_allow_new};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Persistent storage keyed by repository-relative path.
pub trait Storage: Send + Sync {
    fn read(&self, path: &Path) -> Result<String, StorageError>;
    fn write(&self, path: &Path, content: &str) -> Result<(), StorageError>;
}

/// Storage backed by a repository checkout on disk.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf, StorageError> {
        check_relative_path(path).map_err(StorageError::InvalidPath)?;
        resolve_repo_path_allow_new(&self.root, path)
            .map(|resolved| resolved.absolute)
            .map_err(StorageError::InvalidPath)
    }
}

impl Storage for FsStorage {
    fn read(&self, path: &Path) -> Result<String, StorageError> {
        let absolute = self.resolve(path)?;
        let bytes = fs::read(&absolute).map_err(|e| StorageError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        match String::from_utf8(bytes) {
            Ok(content) => Ok(content),
            Err(err) => {
                tracing::warn!(file = %path.display(), "file is not valid UTF-8; refusing to edit it");
                Err(StorageError::Read {
                    path: path.to_path_buf(),
                    reason: format!("not valid UTF-8 ({})", err.utf8_error()),
                })
            }
        }
    }

    fn write(&self, path: &Path, content: &str) -> Result<(), StorageError> {
        let absolute = self.resolve(path)?;
        write_atomic(&absolute, content).map_err(|e| StorageError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Write through a sibling temp file and rename, keeping the target's permissions.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.remedy.tmp", file_name));

    let existing_permissions = fs::metadata(path).ok().map(|m| m.permissions());

    let result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);
        if let Some(perms) = existing_permissions {
            fs::set_permissions(&tmp_path, perms)?;
        }
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    /// In-memory storage with injectable write and read failures.
    #[derive(Default)]
    pub struct MemoryStorage {
        files: Mutex<BTreeMap<PathBuf, String>>,
        failing_writes: Mutex<BTreeSet<PathBuf>>,
        failing_reads: Mutex<BTreeSet<PathBuf>>,
        writes: Mutex<Vec<PathBuf>>,
    }

    impl MemoryStorage {
        pub fn with_files(files: &[(&str, &str)]) -> Self {
            let storage = MemoryStorage::default();
            {
                let mut map = storage.files.lock().unwrap();
                for (path, content) in files {
                    map.insert(PathBuf::from(path), content.to_string());
                }
            }
            storage
        }

        pub fn fail_writes_to(&self, path: &str) {
            self.failing_writes.lock().unwrap().insert(PathBuf::from(path));
        }

        pub fn fail_reads_of(&self, path: &str) {
            self.failing_reads.lock().unwrap().insert(PathBuf::from(path));
        }

        pub fn get(&self, path: &str) -> Option<String> {
            self.files.lock().unwrap().get(Path::new(path)).cloned()
        }

        /// Paths written successfully, in order.
        pub fn writes(&self) -> Vec<PathBuf> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl Storage for MemoryStorage {
        fn read(&self, path: &Path) -> Result<String, StorageError> {
            if self.failing_reads.lock().unwrap().contains(path) {
                return Err(StorageError::Read {
                    path: path.to_path_buf(),
                    reason: "injected read failure".to_string(),
                });
            }
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| StorageError::Read {
                    path: path.to_path_buf(),
                    reason: "no such file".to_string(),
                })
        }

        fn write(&self, path: &Path, content: &str) -> Result<(), StorageError> {
            if self.failing_writes.lock().unwrap().contains(path) {
                return Err(StorageError::Write {
                    path: path.to_path_buf(),
                    reason: "injected write failure".to_string(),
                });
            }
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), content.to_string());
            self.writes.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        storage.write(Path::new("pkg/mod.py"), "x = 1\n").unwrap();
        assert_eq!(storage.read(Path::new("pkg/mod.py")).unwrap(), "x = 1\n");
        assert!(!dir.path().join("pkg/.mod.py.remedy.tmp").exists());
    }

    #[test]
    fn fs_storage_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        assert!(matches!(
            storage.write(Path::new("../outside.py"), "x"),
            Err(StorageError::InvalidPath(_))
        ));
        assert!(matches!(
            storage.read(Path::new("/etc/hosts")),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn non_utf8_file_is_a_read_error_and_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let raw: &[u8] = b"# caf\xe9 latin-1 comment\nimport os\nx = 1\n";
        fs::write(dir.path().join("legacy.py"), raw).unwrap();
        let storage = FsStorage::new(dir.path());

        let err = storage.read(Path::new("legacy.py")).unwrap_err();
        match err {
            StorageError::Read { reason, .. } => assert!(reason.contains("UTF-8")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fs::read(dir.path().join("legacy.py")).unwrap(), raw);
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        assert!(matches!(
            storage.read(Path::new("nope.py")),
            Err(StorageError::Read { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn write_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.py");
        fs::write(&script, "print(1)\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        FsStorage::new(dir.path())
            .write(Path::new("run.py"), "print(2)\n")
            .unwrap();
        let mode = fs::metadata(&script).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }
}
