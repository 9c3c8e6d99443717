//! Storage primitives the usage log and config loader are written against.
//!
//! The firmware backs these traits with NOR flash, the emulator with a host
//! directory and the tests with [`ram::RamStore`]. Every implementation takes
//! `&self` and keeps its own interior mutability, so a file handle can borrow
//! the store while the caller still holds a shared reference to it.
//!
//! Handles close on `Drop`. A failed write therefore never leaks an open file.

use core::fmt;
use core::ops::Range;

pub mod ram;

/// Longest path accepted by any store.
pub const MAX_PATH_LEN: usize = 24;

/// How a file is opened.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OpenMode {
    /// Read from the start. Missing files are [`StoreError::NotFound`].
    Read,
    /// Write at the end, creating the file when missing.
    Append,
    /// Create or empty the file, then write from the start.
    Truncate,
}

impl OpenMode {
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, OpenMode::Append | OpenMode::Truncate)
    }
}

/// Failure reported by a store after it has been mounted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StoreError {
    NotFound,
    NoSpace,
    TooManyFiles,
    InvalidPath,
    WrongMode,
    Io,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreError::NotFound => "file not found",
            StoreError::NoSpace => "no space left",
            StoreError::TooManyFiles => "file table full",
            StoreError::InvalidPath => "invalid path",
            StoreError::WrongMode => "operation not allowed in this open mode",
            StoreError::Io => "i/o failure",
        })
    }
}

/// The backing medium could not be mounted. Nothing can be persisted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StorageUnavailable;

impl fmt::Display for StorageUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("storage unavailable")
    }
}

/// Bytes consumed and offered by a store.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StorageUsage {
    pub used: usize,
    pub total: usize,
}

impl StorageUsage {
    #[must_use]
    pub const fn new(used: usize, total: usize) -> Self {
        Self { used, total }
    }

    #[must_use]
    pub const fn free(&self) -> usize {
        self.total.saturating_sub(self.used)
    }
}

/// An open file. Closing happens when the handle is dropped.
pub trait StorageFile {
    /// Reads up to `buf.len()` bytes, returning `0` at end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StoreError>;

    /// Writes all of `data` or fails without a partial guarantee.
    fn write_all(&mut self, data: &[u8]) -> Result<(), StoreError>;

    /// Pushes buffered bytes down to the medium.
    fn flush(&mut self) -> Result<(), StoreError>;

    /// Current length of the file in bytes.
    fn size(&self) -> usize;
}

/// Flat file store.
pub trait Storage {
    type File<'a>: StorageFile
    where
        Self: 'a;

    fn open(&self, path: &str, mode: OpenMode) -> Result<Self::File<'_>, StoreError>;

    fn exists(&self, path: &str) -> bool;

    fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Renames `from` to `to`, replacing `to` when it already exists.
    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError>;

    /// Calls `visit` with the name and size of every file.
    fn list(&self, visit: &mut dyn FnMut(&str, usize)) -> Result<(), StoreError>;

    fn usage(&self) -> Result<StorageUsage, StoreError>;

    /// Largest size a single file can grow to, when the medium bounds it.
    fn max_file_size(&self) -> Option<usize> {
        None
    }
}

/// Rejects empty, overlong or non-absolute paths.
pub fn validate_path(path: &str) -> Result<(), StoreError> {
    if path.len() < 2 || path.len() > MAX_PATH_LEN || !path.starts_with('/') {
        return Err(StoreError::InvalidPath);
    }
    if path[1..].contains('/') || path.contains(['\n', '\0']) {
        return Err(StoreError::InvalidPath);
    }
    Ok(())
}

/// One line handed out by [`LineReader`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Line<'b> {
    /// UTF-8 text without the line terminator.
    Text(&'b str),
    /// Overlong or not valid UTF-8.
    Unreadable,
}

/// Splits a file into lines using a fixed buffer of `N` bytes.
pub struct LineReader<F, const N: usize> {
    file: F,
    buf: [u8; N],
    start: usize,
    end: usize,
    eof: bool,
    discarding: bool,
}

impl<F: StorageFile, const N: usize> LineReader<F, N> {
    #[must_use]
    pub const fn new(file: F) -> Self {
        Self {
            file,
            buf: [0; N],
            start: 0,
            end: 0,
            eof: false,
            discarding: false,
        }
    }

    /// Returns the next line, or `None` once the file is exhausted.
    pub fn next_line(&mut self) -> Result<Option<Line<'_>>, StoreError> {
        let Some((range, readable)) = self.fill_line()? else {
            return Ok(None);
        };
        if !readable {
            return Ok(Some(Line::Unreadable));
        }

        let bytes = &self.buf[range];
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        Ok(Some(
            core::str::from_utf8(bytes).map_or(Line::Unreadable, Line::Text),
        ))
    }

    pub fn into_inner(self) -> F {
        self.file
    }

    // Locates the next line inside `buf`, refilling from the file as needed.
    fn fill_line(&mut self) -> Result<Option<(Range<usize>, bool)>, StoreError> {
        loop {
            let pending = &self.buf[self.start..self.end];
            if let Some(newline) = pending.iter().position(|byte| *byte == b'\n') {
                let line = self.start..self.start + newline;
                self.start += newline + 1;
                if self.discarding {
                    self.discarding = false;
                    return Ok(Some((0..0, false)));
                }
                return Ok(Some((line, true)));
            }

            if self.eof {
                if self.discarding {
                    self.discarding = false;
                    self.start = self.end;
                    return Ok(Some((0..0, false)));
                }
                if self.start == self.end {
                    return Ok(None);
                }
                let line = self.start..self.end;
                self.start = self.end;
                return Ok(Some((line, true)));
            }

            if self.start > 0 {
                self.buf.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            }

            if self.end == N {
                self.discarding = true;
                self.end = 0;
            }

            let read = self.file.read(&mut self.buf[self.end..])?;
            if read == 0 {
                self.eof = true;
            } else {
                self.end += read;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ram::RamStore;
    use super::*;

    fn store_with(contents: &[u8]) -> RamStore<2, 512> {
        let store = RamStore::new();
        let mut file = store.open("/lines.txt", OpenMode::Truncate).unwrap();
        file.write_all(contents).unwrap();
        drop(file);
        store
    }

    #[test]
    fn splits_lines_and_trims_carriage_returns() {
        let store = store_with(b"alpha\r\nbeta\ngamma");
        let file = store.open("/lines.txt", OpenMode::Read).unwrap();
        let mut reader: LineReader<_, 16> = LineReader::new(file);

        assert_eq!(reader.next_line().unwrap(), Some(Line::Text("alpha")));
        assert_eq!(reader.next_line().unwrap(), Some(Line::Text("beta")));
        assert_eq!(reader.next_line().unwrap(), Some(Line::Text("gamma")));
        assert_eq!(reader.next_line().unwrap(), None);
    }

    #[test]
    fn overlong_lines_are_reported_once_and_skipped() {
        let store = store_with(b"short\nthis line is far too long for the buffer\nok\n");
        let file = store.open("/lines.txt", OpenMode::Read).unwrap();
        let mut reader: LineReader<_, 8> = LineReader::new(file);

        assert_eq!(reader.next_line().unwrap(), Some(Line::Text("short")));
        assert_eq!(reader.next_line().unwrap(), Some(Line::Unreadable));
        assert_eq!(reader.next_line().unwrap(), Some(Line::Text("ok")));
        assert_eq!(reader.next_line().unwrap(), None);
    }

    #[test]
    fn invalid_utf8_is_unreadable() {
        let store = store_with(b"\xff\xfe\nfine\n");
        let file = store.open("/lines.txt", OpenMode::Read).unwrap();
        let mut reader: LineReader<_, 16> = LineReader::new(file);

        assert_eq!(reader.next_line().unwrap(), Some(Line::Unreadable));
        assert_eq!(reader.next_line().unwrap(), Some(Line::Text("fine")));
    }

    #[test]
    fn empty_lines_are_preserved() {
        let store = store_with(b"\n\nx\n");
        let file = store.open("/lines.txt", OpenMode::Read).unwrap();
        let mut reader: LineReader<_, 16> = LineReader::new(file);

        assert_eq!(reader.next_line().unwrap(), Some(Line::Text("")));
        assert_eq!(reader.next_line().unwrap(), Some(Line::Text("")));
        assert_eq!(reader.next_line().unwrap(), Some(Line::Text("x")));
        assert_eq!(reader.next_line().unwrap(), None);
    }

    #[test]
    fn path_validation() {
        assert!(validate_path("/meter.log").is_ok());
        assert_eq!(validate_path("meter.log"), Err(StoreError::InvalidPath));
        assert_eq!(validate_path("/"), Err(StoreError::InvalidPath));
        assert_eq!(validate_path("/a/b"), Err(StoreError::InvalidPath));
        assert_eq!(
            validate_path("/an-extremely-long-file-name.log"),
            Err(StoreError::InvalidPath)
        );
    }
}
