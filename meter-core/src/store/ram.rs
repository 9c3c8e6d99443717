//! Fixed-capacity in-memory [`Storage`] used by tests and scripted scenarios.

use core::cell::{Cell, RefCell};

use heapless::{String, Vec};

use super::{
    MAX_PATH_LEN, OpenMode, Storage, StorageFile, StorageUsage, StoreError, validate_path,
};

type FileName = String<MAX_PATH_LEN>;

struct RamFile<const CAP: usize> {
    name: FileName,
    data: Vec<u8, CAP>,
}

/// Up to `FILES` files of at most `CAP` bytes each.
pub struct RamStore<const FILES: usize, const CAP: usize> {
    files: RefCell<Vec<RamFile<CAP>, FILES>>,
    read_only: Cell<bool>,
}

impl<const FILES: usize, const CAP: usize> RamStore<FILES, CAP> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            files: RefCell::new(Vec::new()),
            read_only: Cell::new(false),
        }
    }

    /// Makes every mutating operation fail with [`StoreError::Io`].
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.set(read_only);
    }

    /// Copies the contents of `path` into `out`, returning the number of bytes.
    pub fn read_into(&self, path: &str, out: &mut [u8]) -> Result<usize, StoreError> {
        let files = self.files.borrow();
        let file = find(&files, path).ok_or(StoreError::NotFound)?;
        let len = file.data.len().min(out.len());
        out[..len].copy_from_slice(&file.data[..len]);
        Ok(len)
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.read_only.get() {
            Err(StoreError::Io)
        } else {
            Ok(())
        }
    }

    fn create(&self, path: &str, truncate: bool) -> Result<(), StoreError> {
        let mut files = self.files.borrow_mut();
        if let Some(file) = find_mut(&mut files, path) {
            if truncate {
                file.data.clear();
            }
            return Ok(());
        }

        let name = FileName::try_from(path).map_err(|_| StoreError::InvalidPath)?;
        files
            .push(RamFile {
                name,
                data: Vec::new(),
            })
            .map_err(|_| StoreError::TooManyFiles)
    }
}

impl<const FILES: usize, const CAP: usize> Default for RamStore<FILES, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

fn find<'f, const CAP: usize>(files: &'f [RamFile<CAP>], path: &str) -> Option<&'f RamFile<CAP>> {
    files.iter().find(|file| file.name == path)
}

fn find_mut<'f, const CAP: usize>(
    files: &'f mut [RamFile<CAP>],
    path: &str,
) -> Option<&'f mut RamFile<CAP>> {
    files.iter_mut().find(|file| file.name == path)
}

/// Handle into a [`RamStore`]. Looks its file up by name on every call, so
/// a file renamed or removed underneath it reports [`StoreError::NotFound`].
pub struct RamFileHandle<'s, const FILES: usize, const CAP: usize> {
    store: &'s RamStore<FILES, CAP>,
    name: FileName,
    mode: OpenMode,
    position: usize,
}

impl<const FILES: usize, const CAP: usize> StorageFile for RamFileHandle<'_, FILES, CAP> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        if self.mode != OpenMode::Read {
            return Err(StoreError::WrongMode);
        }
        let files = self.store.files.borrow();
        let file = find(&files, &self.name).ok_or(StoreError::NotFound)?;
        let remaining = file.data.get(self.position..).unwrap_or_default();
        let len = remaining.len().min(buf.len());
        buf[..len].copy_from_slice(&remaining[..len]);
        self.position += len;
        Ok(len)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), StoreError> {
        if !self.mode.is_write() {
            return Err(StoreError::WrongMode);
        }
        self.store.ensure_writable()?;
        let mut files = self.store.files.borrow_mut();
        let file = find_mut(&mut files, &self.name).ok_or(StoreError::NotFound)?;
        file.data
            .extend_from_slice(data)
            .map_err(|_| StoreError::NoSpace)
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.mode.is_write() {
            self.store.ensure_writable()?;
        }
        Ok(())
    }

    fn size(&self) -> usize {
        let files = self.store.files.borrow();
        find(&files, &self.name).map_or(0, |file| file.data.len())
    }
}

impl<const FILES: usize, const CAP: usize> Storage for RamStore<FILES, CAP> {
    type File<'a>
        = RamFileHandle<'a, FILES, CAP>
    where
        Self: 'a;

    fn open(&self, path: &str, mode: OpenMode) -> Result<Self::File<'_>, StoreError> {
        validate_path(path)?;
        match mode {
            OpenMode::Read => {
                if !self.exists(path) {
                    return Err(StoreError::NotFound);
                }
            }
            OpenMode::Append => {
                self.ensure_writable()?;
                self.create(path, false)?;
            }
            OpenMode::Truncate => {
                self.ensure_writable()?;
                self.create(path, true)?;
            }
        }

        Ok(RamFileHandle {
            store: self,
            name: FileName::try_from(path).map_err(|_| StoreError::InvalidPath)?,
            mode,
            position: 0,
        })
    }

    fn exists(&self, path: &str) -> bool {
        find(&self.files.borrow(), path).is_some()
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let mut files = self.files.borrow_mut();
        let index = files
            .iter()
            .position(|file| file.name == path)
            .ok_or(StoreError::NotFound)?;
        files.swap_remove(index);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        validate_path(to)?;
        self.ensure_writable()?;
        if from == to {
            return if self.exists(from) {
                Ok(())
            } else {
                Err(StoreError::NotFound)
            };
        }

        let mut files = self.files.borrow_mut();
        if find(&files, from).is_none() {
            return Err(StoreError::NotFound);
        }
        if let Some(index) = files.iter().position(|file| file.name == to) {
            files.swap_remove(index);
        }
        let file = find_mut(&mut files, from).ok_or(StoreError::NotFound)?;
        file.name = FileName::try_from(to).map_err(|_| StoreError::InvalidPath)?;
        Ok(())
    }

    fn list(&self, visit: &mut dyn FnMut(&str, usize)) -> Result<(), StoreError> {
        for file in self.files.borrow().iter() {
            visit(&file.name, file.data.len());
        }
        Ok(())
    }

    fn usage(&self) -> Result<StorageUsage, StoreError> {
        let used = self.files.borrow().iter().map(|file| file.data.len()).sum();
        Ok(StorageUsage::new(used, FILES * CAP))
    }

    fn max_file_size(&self) -> Option<usize> {
        Some(CAP)
    }
}
