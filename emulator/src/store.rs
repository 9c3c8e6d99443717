//! [`Storage`] backed by a host directory.
//!
//! Every device path maps to a file directly under the data directory, so
//! the emulated flash can be inspected with ordinary tools between runs.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use meter_core::store::{
    OpenMode, Storage, StorageFile, StorageUnavailable, StorageUsage, StoreError, validate_path,
};

pub struct DirStore {
    root: PathBuf,
    capacity: usize,
}

impl DirStore {
    /// Creates the data directory if needed. `capacity` emulates the size of
    /// the device's flash partition.
    pub fn open(root: impl Into<PathBuf>, capacity: usize) -> Result<Self, StorageUnavailable> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|_| StorageUnavailable)?;
        if !root.is_dir() {
            return Err(StorageUnavailable);
        }
        Ok(Self { root, capacity })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &str) -> Result<PathBuf, StoreError> {
        validate_path(path)?;
        Ok(self.root.join(&path[1..]))
    }

    fn used(&self) -> Result<usize, StoreError> {
        let mut used = 0;
        for entry in fs::read_dir(&self.root).map_err(map_io)? {
            let metadata = entry.map_err(map_io)?.metadata().map_err(map_io)?;
            if metadata.is_file() {
                used += usize::try_from(metadata.len()).map_err(|_| StoreError::Io)?;
            }
        }
        Ok(used)
    }
}

fn map_io(err: io::Error) -> StoreError {
    match err.kind() {
        ErrorKind::NotFound => StoreError::NotFound,
        ErrorKind::StorageFull => StoreError::NoSpace,
        _ => StoreError::Io,
    }
}

pub struct DirFile<'s> {
    store: &'s DirStore,
    file: File,
    mode: OpenMode,
}

impl StorageFile for DirFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        if self.mode != OpenMode::Read {
            return Err(StoreError::WrongMode);
        }
        self.file.read(buf).map_err(map_io)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), StoreError> {
        if !self.mode.is_write() {
            return Err(StoreError::WrongMode);
        }
        if self.store.used()? + data.len() > self.store.capacity {
            return Err(StoreError::NoSpace);
        }
        self.file.write_all(data).map_err(map_io)
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.file.flush().map_err(map_io)?;
        if self.mode.is_write() {
            self.file.sync_data().map_err(map_io)?;
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.file
            .metadata()
            .ok()
            .and_then(|metadata| usize::try_from(metadata.len()).ok())
            .unwrap_or(0)
    }
}

impl Storage for DirStore {
    type File<'a>
        = DirFile<'a>
    where
        Self: 'a;

    fn open(&self, path: &str, mode: OpenMode) -> Result<Self::File<'_>, StoreError> {
        let host = self.host_path(path)?;
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Append => options.append(true).create(true),
            OpenMode::Truncate => options.write(true).create(true).truncate(true),
        };
        let file = options.open(host).map_err(map_io)?;
        Ok(DirFile {
            store: self,
            file,
            mode,
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.host_path(path).is_ok_and(|host| host.is_file())
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        fs::remove_file(self.host_path(path)?).map_err(map_io)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let from = self.host_path(from)?;
        let to = self.host_path(to)?;
        fs::rename(from, to).map_err(map_io)
    }

    fn list(&self, visit: &mut dyn FnMut(&str, usize)) -> Result<(), StoreError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(map_io)? {
            let entry = entry.map_err(map_io)?;
            let metadata = entry.metadata().map_err(map_io)?;
            if !metadata.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                let size = usize::try_from(metadata.len()).map_err(|_| StoreError::Io)?;
                files.push((format!("/{name}"), size));
            }
        }
        files.sort();
        for (name, size) in &files {
            visit(name, *size);
        }
        Ok(())
    }

    fn usage(&self) -> Result<StorageUsage, StoreError> {
        Ok(StorageUsage::new(self.used()?, self.capacity))
    }

    fn max_file_size(&self) -> Option<usize> {
        Some(self.capacity)
    }
}
