//! File access port.
//!
//! The engine owns open-file handles but never touches the filesystem
//! directly; everything goes through the [Filestore] trait. Two
//! implementations are provided: [NativeFilestore] over `std::fs` and
//! [InMemoryFilestore] for host-side testing of the state machines without
//! disk access.
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Opaque handle to an open file, owned by exactly one transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FileHandle(u32);

#[derive(Debug, thiserror::Error)]
pub enum FilestoreError {
    #[error("io error during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("stale or unknown file handle")]
    InvalidHandle,
    #[error("file {0} does not exist")]
    NotFound(PathBuf),
}

impl FilestoreError {
    fn io(operation: &'static str, source: std::io::Error) -> Self {
        Self::Io { operation, source }
    }
}

/// Narrow filesystem interface used by the engine.
///
/// All operations are expected to complete (or fail) within one wakeup for
/// the byte counts the engine is budgeted for; there is no asynchronous
/// completion path.
pub trait Filestore {
    fn open_read(&mut self, path: &Path) -> Result<FileHandle, FilestoreError>;
    /// Open for writing, creating or truncating the file.
    fn open_write(&mut self, path: &Path) -> Result<FileHandle, FilestoreError>;
    /// Create a uniquely-named temporary file below `tmp_dir`.
    fn open_tempfile(&mut self, tmp_dir: &Path) -> Result<(FileHandle, PathBuf), FilestoreError>;
    fn read_at(
        &mut self,
        handle: FileHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, FilestoreError>;
    fn write_at(
        &mut self,
        handle: FileHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<usize, FilestoreError>;
    /// Closing is infallible from the engine's point of view; errors on
    /// close are the implementation's concern.
    fn close(&mut self, handle: FileHandle);
    fn rename(&mut self, from: &Path, to: &Path) -> Result<(), FilestoreError>;
    fn remove(&mut self, path: &Path) -> Result<(), FilestoreError>;
}

/// [Filestore] implementation over the real filesystem.
#[derive(Debug, Default)]
pub struct NativeFilestore {
    files: HashMap<u32, File>,
    next_handle: u32,
    tmp_counter: u32,
}

impl NativeFilestore {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, file: File) -> FileHandle {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.files.insert(handle, file);
        FileHandle(handle)
    }

    fn file_mut(&mut self, handle: FileHandle) -> Result<&mut File, FilestoreError> {
        self.files
            .get_mut(&handle.0)
            .ok_or(FilestoreError::InvalidHandle)
    }
}

impl Filestore for NativeFilestore {
    fn open_read(&mut self, path: &Path) -> Result<FileHandle, FilestoreError> {
        let file = File::open(path).map_err(|e| FilestoreError::io("open_read", e))?;
        Ok(self.register(file))
    }

    fn open_write(&mut self, path: &Path) -> Result<FileHandle, FilestoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| FilestoreError::io("open_write", e))?;
        Ok(self.register(file))
    }

    fn open_tempfile(&mut self, tmp_dir: &Path) -> Result<(FileHandle, PathBuf), FilestoreError> {
        std::fs::create_dir_all(tmp_dir).map_err(|e| FilestoreError::io("open_tempfile", e))?;
        // Unique within the process; the engine has no wall clock to mix in.
        let path = loop {
            let candidate = tmp_dir.join(format!("cf_tmp_{:08}", self.tmp_counter));
            self.tmp_counter = self.tmp_counter.wrapping_add(1);
            if !candidate.exists() {
                break candidate;
            }
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| FilestoreError::io("open_tempfile", e))?;
        Ok((self.register(file), path))
    }

    fn read_at(
        &mut self,
        handle: FileHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, FilestoreError> {
        let file = self.file_mut(handle)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| FilestoreError::io("seek", e))?;
        file.read(buf).map_err(|e| FilestoreError::io("read", e))
    }

    fn write_at(
        &mut self,
        handle: FileHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<usize, FilestoreError> {
        let file = self.file_mut(handle)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| FilestoreError::io("seek", e))?;
        file.write_all(data)
            .map_err(|e| FilestoreError::io("write", e))?;
        Ok(data.len())
    }

    fn close(&mut self, handle: FileHandle) {
        self.files.remove(&handle.0);
    }

    fn rename(&mut self, from: &Path, to: &Path) -> Result<(), FilestoreError> {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FilestoreError::io("rename", e))?;
        }
        std::fs::rename(from, to).map_err(|e| FilestoreError::io("rename", e))
    }

    fn remove(&mut self, path: &Path) -> Result<(), FilestoreError> {
        std::fs::remove_file(path).map_err(|e| FilestoreError::io("remove", e))
    }
}

/// [Filestore] implementation backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryFilestore {
    files: HashMap<PathBuf, Vec<u8>>,
    open: HashMap<u32, PathBuf>,
    next_handle: u32,
    tmp_counter: u32,
}

impl InMemoryFilestore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file, for test arrangement.
    pub fn put(&mut self, path: impl Into<PathBuf>, content: &[u8]) {
        self.files.insert(path.into(), content.to_vec());
    }

    /// Content lookup, for test assertions.
    pub fn contents(&self, path: &Path) -> Option<&[u8]> {
        self.files.get(path).map(|v| v.as_slice())
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn path_for(&self, handle: FileHandle) -> Result<PathBuf, FilestoreError> {
        self.open
            .get(&handle.0)
            .cloned()
            .ok_or(FilestoreError::InvalidHandle)
    }

    fn register(&mut self, path: PathBuf) -> FileHandle {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.open.insert(handle, path);
        FileHandle(handle)
    }
}

impl Filestore for InMemoryFilestore {
    fn open_read(&mut self, path: &Path) -> Result<FileHandle, FilestoreError> {
        if !self.files.contains_key(path) {
            return Err(FilestoreError::NotFound(path.to_path_buf()));
        }
        Ok(self.register(path.to_path_buf()))
    }

    fn open_write(&mut self, path: &Path) -> Result<FileHandle, FilestoreError> {
        self.files.entry(path.to_path_buf()).or_default();
        Ok(self.register(path.to_path_buf()))
    }

    fn open_tempfile(&mut self, tmp_dir: &Path) -> Result<(FileHandle, PathBuf), FilestoreError> {
        let path = tmp_dir.join(format!("cf_tmp_{:08}", self.tmp_counter));
        self.tmp_counter = self.tmp_counter.wrapping_add(1);
        self.files.insert(path.clone(), Vec::new());
        Ok((self.register(path.clone()), path))
    }

    fn read_at(
        &mut self,
        handle: FileHandle,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, FilestoreError> {
        let path = self.path_for(handle)?;
        let content = self
            .files
            .get(&path)
            .ok_or(FilestoreError::NotFound(path))?;
        let offset = offset as usize;
        if offset >= content.len() {
            return Ok(0);
        }
        let n = buf.len().min(content.len() - offset);
        buf[..n].copy_from_slice(&content[offset..offset + n]);
        Ok(n)
    }

    fn write_at(
        &mut self,
        handle: FileHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<usize, FilestoreError> {
        let path = self.path_for(handle)?;
        let content = self
            .files
            .get_mut(&path)
            .ok_or(FilestoreError::NotFound(path))?;
        let offset = offset as usize;
        if content.len() < offset + data.len() {
            content.resize(offset + data.len(), 0);
        }
        content[offset..offset + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn close(&mut self, handle: FileHandle) {
        self.open.remove(&handle.0);
    }

    fn rename(&mut self, from: &Path, to: &Path) -> Result<(), FilestoreError> {
        let content = self
            .files
            .remove(from)
            .ok_or_else(|| FilestoreError::NotFound(from.to_path_buf()))?;
        self.files.insert(to.to_path_buf(), content);
        // Open handles follow the file to its new name.
        for path in self.open.values_mut() {
            if path == from {
                *path = to.to_path_buf();
            }
        }
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> Result<(), FilestoreError> {
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| FilestoreError::NotFound(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_write_read_roundtrip() {
        let mut fs = InMemoryFilestore::new();
        let handle = fs.open_write(Path::new("/dst/a.bin")).unwrap();
        fs.write_at(handle, 0, b"hello").unwrap();
        fs.write_at(handle, 5, b" world").unwrap();
        let mut buf = [0u8; 16];
        let n = fs.read_at(handle, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");
        fs.close(handle);
        assert_eq!(fs.contents(Path::new("/dst/a.bin")).unwrap(), b"hello world");
    }

    #[test]
    fn test_in_memory_sparse_write() {
        let mut fs = InMemoryFilestore::new();
        let handle = fs.open_write(Path::new("/dst/sparse")).unwrap();
        fs.write_at(handle, 4, b"abcd").unwrap();
        fs.write_at(handle, 0, b"0123").unwrap();
        assert_eq!(fs.contents(Path::new("/dst/sparse")).unwrap(), b"0123abcd");
    }

    #[test]
    fn test_in_memory_tempfile_and_rename() {
        let mut fs = InMemoryFilestore::new();
        let (handle, temp_path) = fs.open_tempfile(Path::new("/tmp")).unwrap();
        fs.write_at(handle, 0, b"data").unwrap();
        fs.rename(&temp_path, Path::new("/dst/final")).unwrap();
        assert!(!fs.exists(&temp_path));
        // The open handle survives the rename.
        fs.write_at(handle, 4, b"!").unwrap();
        assert_eq!(fs.contents(Path::new("/dst/final")).unwrap(), b"data!");
    }

    #[test]
    fn test_in_memory_distinct_tempfiles() {
        let mut fs = InMemoryFilestore::new();
        let (_, first) = fs.open_tempfile(Path::new("/tmp")).unwrap();
        let (_, second) = fs.open_tempfile(Path::new("/tmp")).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_in_memory_stale_handle() {
        let mut fs = InMemoryFilestore::new();
        let handle = fs.open_write(Path::new("/f")).unwrap();
        fs.close(handle);
        let mut buf = [0u8; 4];
        assert!(matches!(
            fs.read_at(handle, 0, &mut buf),
            Err(FilestoreError::InvalidHandle)
        ));
    }

    #[test]
    fn test_in_memory_open_read_missing() {
        let mut fs = InMemoryFilestore::new();
        assert!(matches!(
            fs.open_read(Path::new("/missing")),
            Err(FilestoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_native_filestore_roundtrip() {
        let dir = std::env::temp_dir().join("cfdp-engine-fs-test");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let mut fs = NativeFilestore::new();
        let path = dir.join("native.bin");
        let handle = fs.open_write(&path).unwrap();
        fs.write_at(handle, 2, b"cd").unwrap();
        fs.write_at(handle, 0, b"ab").unwrap();
        let mut buf = [0u8; 8];
        let n = fs.read_at(handle, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"abcd");
        fs.close(handle);
        let renamed = dir.join("renamed.bin");
        fs.rename(&path, &renamed).unwrap();
        assert!(renamed.exists());
        fs.remove(&renamed).unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
