// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The file system abstraction used to materialize attachments.
//!
//! Writers never touch the file system directly. [`RealFileSystem`] is used in production, and
//! [`InMemoryFileSystem`] lets tests inspect exactly what was written.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use std::{
    io,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// File system operations needed by result writers.
pub trait FileSystem: Send + Sync {
    /// Returns true if a file or directory exists at the path.
    fn exists(&self, path: &Utf8Path) -> bool;

    /// Reads the whole file as bytes.
    fn read_all_bytes(&self, path: &Utf8Path) -> io::Result<Vec<u8>>;

    /// Reads the whole file as UTF-8 text.
    fn read_all_text(&self, path: &Utf8Path) -> io::Result<String>;

    /// Creates or truncates the file, and writes the bytes to it.
    fn write_all_bytes(&self, path: &Utf8Path, bytes: &[u8]) -> io::Result<()>;

    /// Creates or truncates the file, and writes the text to it as UTF-8.
    fn write_all_text(&self, path: &Utf8Path, text: &str) -> io::Result<()> {
        self.write_all_bytes(path, text.as_bytes())
    }

    /// Creates the directory and all of its missing parents.
    fn create_dir_all(&self, path: &Utf8Path) -> io::Result<()>;
}

/// The real file system, backed by `std::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn exists(&self, path: &Utf8Path) -> bool {
        path.exists()
    }

    fn read_all_bytes(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn read_all_text(&self, path: &Utf8Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn write_all_bytes(&self, path: &Utf8Path, bytes: &[u8]) -> io::Result<()> {
        std::fs::write(path, bytes)
    }

    fn create_dir_all(&self, path: &Utf8Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }
}

/// A file system that lives entirely in memory.
///
/// Directories must be created before files can be written into them, mirroring the behavior of
/// the real file system.
#[derive(Debug, Default)]
pub struct InMemoryFileSystem {
    inner: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    dirs: IndexSet<Utf8PathBuf>,
    files: IndexMap<Utf8PathBuf, Vec<u8>>,
}

impl InMemoryFileSystem {
    /// Creates a new, empty file system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the paths of all files, in the order they were first written.
    pub fn file_paths(&self) -> Vec<Utf8PathBuf> {
        self.lock().files.keys().cloned().collect()
    }

    // A panic while holding the lock can't leave the maps in an inconsistent state, so poisoning
    // is ignored.
    fn lock(&self) -> MutexGuard<'_, InMemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FileSystem for InMemoryFileSystem {
    fn exists(&self, path: &Utf8Path) -> bool {
        let state = self.lock();
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    fn read_all_bytes(&self, path: &Utf8Path) -> io::Result<Vec<u8>> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn read_all_text(&self, path: &Utf8Path) -> io::Result<String> {
        let bytes = self.read_all_bytes(path)?;
        String::from_utf8(bytes).map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
    }

    fn write_all_bytes(&self, path: &Utf8Path, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            if !state.dirs.contains(parent) {
                return Err(not_found(parent));
            }
        }
        if state.dirs.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{path} is a directory"),
            ));
        }
        state.files.insert(path.to_owned(), bytes.to_vec());
        Ok(())
    }

    fn create_dir_all(&self, path: &Utf8Path) -> io::Result<()> {
        let mut state = self.lock();
        for ancestor in path.ancestors() {
            if ancestor.as_str().is_empty() {
                continue;
            }
            if state.files.contains_key(ancestor) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{ancestor} is a file"),
                ));
            }
            state.dirs.insert(ancestor.to_owned());
        }
        Ok(())
    }
}

fn not_found(path: &Utf8Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{path} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    fn exercise(fs: &dyn FileSystem, root: &Utf8Path) {
        let dir = root.join("nested").join("dir");
        let file = dir.join("file.txt");

        assert!(!fs.exists(&file));
        fs.write_all_text(&file, "hello")
            .expect_err("parent directory doesn't exist yet");

        fs.create_dir_all(&dir).expect("directory created");
        assert!(fs.exists(&dir));

        fs.write_all_text(&file, "hello").expect("file written");
        assert!(fs.exists(&file));
        assert_eq!(fs.read_all_text(&file).expect("file read"), "hello");

        fs.write_all_bytes(&file, &[0xff, 0x00]).expect("file overwritten");
        assert_eq!(fs.read_all_bytes(&file).expect("file read"), vec![0xff, 0x00]);
        fs.read_all_text(&file).expect_err("file isn't UTF-8");

        fs.read_all_bytes(&dir.join("missing"))
            .expect_err("missing file errors");
    }

    #[test]
    fn in_memory() {
        let fs = InMemoryFileSystem::new();
        exercise(&fs, Utf8Path::new("/virtual"));
        assert_eq!(
            fs.file_paths(),
            vec![Utf8PathBuf::from("/virtual/nested/dir/file.txt")]
        );
    }

    #[test]
    fn real() {
        let temp = Utf8TempDir::new().expect("temp dir created");
        exercise(&RealFileSystem, temp.path());
    }
}
