//! Flat file store on a NOR flash partition.
//!
//! The partition is split into [`SLOT_COUNT`] equal slots, one file per slot.
//! Each slot starts with a small directory of name entries followed by the
//! data area:
//!
//! ```text
//!  slot base
//!  ├─ entry 0  [name: 12 bytes, NUL padded][sequence: u32 LE]
//!  ├─ entry 1  (0xFF until the file is renamed)
//!  ├─ entry 2
//!  ├─ entry 3
//!  └─ data     appended in WRITE_SIZE units, tail padded with 0xFF
//! ```
//!
//! The last written entry is the slot's current name. Renaming writes a new
//! entry with a higher sequence number and only then erases the slot that
//! held the target name, so a reset between the two steps leaves two slots
//! with the same name; mount keeps the higher sequence and erases the other.
//!
//! Text never contains `0xFF`, so readers drop padding bytes and the data
//! end is the first erased write unit.

use core::cell::{Cell, RefCell};

use embedded_storage::nor_flash::{ErrorType, NorFlash, ReadNorFlash};
use heapless::{String, Vec};
use meter_core::store::{
    OpenMode, Storage, StorageFile, StorageUnavailable, StorageUsage, StoreError, validate_path,
};

/// Number of files the partition can hold at once.
pub const SLOT_COUNT: usize = 4;
/// Name entries per slot.
pub const ENTRIES_PER_SLOT: usize = 4;

const NAME_LEN: usize = 12;
const ENTRY_LEN: usize = NAME_LEN + 4;
const HEADER_LEN: u32 = (ENTRIES_PER_SLOT * ENTRY_LEN) as u32;
const MAX_WRITE_SIZE: usize = 16;
const SCAN_CHUNK: usize = 64;
const ERASED: u8 = 0xFF;

type SlotName = String<NAME_LEN>;

#[derive(Clone, Debug, Default)]
struct SlotInfo {
    name: Option<SlotName>,
    entries_used: usize,
    sequence: u32,
    data_end: u32,
    size: usize,
}

/// Contiguous window of a larger flash, addressed from zero.
pub struct FlashPartition<F> {
    flash: F,
    offset: u32,
    len: u32,
}

impl<F: NorFlash> FlashPartition<F> {
    /// Returns `None` unless the window is erase-aligned and inside `flash`.
    pub fn new(flash: F, offset: u32, len: u32) -> Option<Self> {
        let erase = u32::try_from(F::ERASE_SIZE).ok()?;
        let end = offset.checked_add(len)?;
        if offset % erase != 0 || len % erase != 0 || end as usize > flash.capacity() {
            return None;
        }
        Some(Self { flash, offset, len })
    }
}

impl<F: ErrorType> ErrorType for FlashPartition<F> {
    type Error = F::Error;
}

impl<F: ReadNorFlash> ReadNorFlash for FlashPartition<F> {
    const READ_SIZE: usize = F::READ_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.flash.read(self.offset + offset, bytes)
    }

    fn capacity(&self) -> usize {
        self.len as usize
    }
}

impl<F: NorFlash> NorFlash for FlashPartition<F> {
    const WRITE_SIZE: usize = F::WRITE_SIZE;
    const ERASE_SIZE: usize = F::ERASE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.flash.erase(self.offset + from, self.offset + to)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.flash.write(self.offset + offset, bytes)
    }
}

/// [`Storage`] implementation over a NOR flash.
pub struct FlashStore<F: NorFlash> {
    flash: RefCell<F>,
    slots: RefCell<[SlotInfo; SLOT_COUNT]>,
    next_sequence: Cell<u32>,
    slot_len: u32,
}

impl<F: NorFlash> FlashStore<F> {
    /// Reads the slot directories and repairs an interrupted rename.
    pub fn mount(flash: F) -> Result<Self, StorageUnavailable> {
        if F::WRITE_SIZE > MAX_WRITE_SIZE
            || ENTRY_LEN % F::WRITE_SIZE != 0
            || F::READ_SIZE != 1
        {
            return Err(StorageUnavailable);
        }
        let erase = F::ERASE_SIZE;
        let slot_len = flash.capacity() / SLOT_COUNT / erase * erase;
        let slot_len = u32::try_from(slot_len).map_err(|_| StorageUnavailable)?;
        if slot_len <= HEADER_LEN {
            return Err(StorageUnavailable);
        }

        let store = Self {
            flash: RefCell::new(flash),
            slots: RefCell::new(Default::default()),
            next_sequence: Cell::new(1),
            slot_len,
        };

        for slot in 0..SLOT_COUNT {
            let info = store.load_slot(slot).map_err(|_| StorageUnavailable)?;
            store.bump_sequence(info.sequence);
            store.slots.borrow_mut()[slot] = info;
        }
        store.repair_duplicates().map_err(|_| StorageUnavailable)?;
        Ok(store)
    }

    fn slot_base(&self, slot: usize) -> u32 {
        // `slot < SLOT_COUNT`, and SLOT_COUNT * slot_len fits the capacity.
        self.slot_len * slot as u32
    }

    fn data_capacity(&self) -> u32 {
        self.slot_len - HEADER_LEN
    }

    fn bump_sequence(&self, seen: u32) {
        if seen >= self.next_sequence.get() {
            self.next_sequence.set(seen.wrapping_add(1));
        }
    }

    fn take_sequence(&self) -> u32 {
        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence.wrapping_add(1));
        sequence
    }

    fn read_raw(&self, offset: u32, bytes: &mut [u8]) -> Result<(), StoreError> {
        self.flash
            .borrow_mut()
            .read(offset, bytes)
            .map_err(|_| StoreError::Io)
    }

    fn write_raw(&self, offset: u32, bytes: &[u8]) -> Result<(), StoreError> {
        self.flash
            .borrow_mut()
            .write(offset, bytes)
            .map_err(|_| StoreError::Io)
    }

    fn load_slot(&self, slot: usize) -> Result<SlotInfo, StoreError> {
        let base = self.slot_base(slot);
        let mut info = SlotInfo::default();

        for entry in 0..ENTRIES_PER_SLOT {
            let mut raw = [0u8; ENTRY_LEN];
            self.read_raw(base + (entry * ENTRY_LEN) as u32, &mut raw)?;
            if raw.iter().all(|byte| *byte == ERASED) {
                break;
            }
            let (name, sequence) = decode_entry(&raw).ok_or(StoreError::Io)?;
            info.name = Some(name);
            info.sequence = sequence;
            info.entries_used = entry + 1;
        }

        if info.name.is_none() {
            return Ok(SlotInfo::default());
        }

        // Data ends at the first fully erased write unit.
        let unit = F::WRITE_SIZE as u32;
        let data_base = base + HEADER_LEN;
        let mut offset = 0u32;
        let mut chunk = [0u8; SCAN_CHUNK];
        'scan: while offset < self.data_capacity() {
            let len = (self.data_capacity() - offset).min(SCAN_CHUNK as u32);
            let chunk = &mut chunk[..len as usize];
            self.read_raw(data_base + offset, chunk)?;
            for unit_bytes in chunk.chunks(unit as usize) {
                if unit_bytes.iter().all(|byte| *byte == ERASED) {
                    break 'scan;
                }
                info.size += unit_bytes.iter().filter(|byte| **byte != ERASED).count();
                offset += unit;
            }
        }
        info.data_end = offset;
        Ok(info)
    }

    fn repair_duplicates(&self) -> Result<(), StoreError> {
        for first in 0..SLOT_COUNT {
            for second in first + 1..SLOT_COUNT {
                let stale = {
                    let slots = self.slots.borrow();
                    match (&slots[first].name, &slots[second].name) {
                        (Some(a), Some(b)) if a == b => Some(
                            if slots[first].sequence < slots[second].sequence {
                                first
                            } else {
                                second
                            },
                        ),
                        _ => None,
                    }
                };
                if let Some(stale) = stale {
                    self.erase_slot(stale)?;
                }
            }
        }
        Ok(())
    }

    fn find(&self, path: &str) -> Option<usize> {
        self.slots
            .borrow()
            .iter()
            .position(|slot| slot.name.as_deref() == Some(path))
    }

    fn erase_slot(&self, slot: usize) -> Result<(), StoreError> {
        let base = self.slot_base(slot);
        self.flash
            .borrow_mut()
            .erase(base, base + self.slot_len)
            .map_err(|_| StoreError::Io)?;
        self.slots.borrow_mut()[slot] = SlotInfo::default();
        Ok(())
    }

    fn write_entry(&self, slot: usize, name: &str) -> Result<(), StoreError> {
        let entry = self.slots.borrow()[slot].entries_used;
        if entry >= ENTRIES_PER_SLOT {
            return Err(StoreError::NoSpace);
        }
        let sequence = self.take_sequence();
        let raw = encode_entry(name, sequence)?;
        self.write_raw(self.slot_base(slot) + (entry * ENTRY_LEN) as u32, &raw)?;

        let mut slots = self.slots.borrow_mut();
        let info = &mut slots[slot];
        info.name = Some(SlotName::try_from(name).map_err(|_| StoreError::InvalidPath)?);
        info.entries_used = entry + 1;
        info.sequence = sequence;
        Ok(())
    }

    fn create(&self, path: &str) -> Result<usize, StoreError> {
        let slot = self
            .slots
            .borrow()
            .iter()
            .position(|slot| slot.name.is_none())
            .ok_or(StoreError::TooManyFiles)?;
        self.write_entry(slot, path)?;
        Ok(slot)
    }

    // Appends whole write units to the slot's data area.
    fn program(&self, slot: usize, unit: &[u8]) -> Result<(), StoreError> {
        let data_end = self.slots.borrow()[slot].data_end;
        let offset = self.slot_base(slot) + HEADER_LEN + data_end;
        self.write_raw(offset, unit)?;

        let mut slots = self.slots.borrow_mut();
        let info = &mut slots[slot];
        info.data_end += unit.len() as u32;
        info.size += unit.iter().filter(|byte| **byte != ERASED).count();
        Ok(())
    }
}

fn encode_entry(name: &str, sequence: u32) -> Result<[u8; ENTRY_LEN], StoreError> {
    if name.len() > NAME_LEN {
        return Err(StoreError::InvalidPath);
    }
    let mut raw = [0u8; ENTRY_LEN];
    raw[..name.len()].copy_from_slice(name.as_bytes());
    raw[NAME_LEN..].copy_from_slice(&sequence.to_le_bytes());
    Ok(raw)
}

fn decode_entry(raw: &[u8; ENTRY_LEN]) -> Option<(SlotName, u32)> {
    let name = &raw[..NAME_LEN];
    let len = name.iter().position(|byte| *byte == 0).unwrap_or(NAME_LEN);
    let name = core::str::from_utf8(&name[..len]).ok()?;
    let sequence = u32::from_le_bytes(raw[NAME_LEN..].try_into().ok()?);
    Some((SlotName::try_from(name).ok()?, sequence))
}

/// Open file on a [`FlashStore`]. Pending bytes are flushed on drop.
pub struct FlashFile<'s, F: NorFlash> {
    store: &'s FlashStore<F>,
    slot: usize,
    sequence: u32,
    mode: OpenMode,
    position: u32,
    pending: Vec<u8, MAX_WRITE_SIZE>,
}

impl<F: NorFlash> FlashFile<'_, F> {
    // The slot must still hold the file this handle was opened on.
    fn check_slot(&self) -> Result<SlotInfo, StoreError> {
        let slots = self.store.slots.borrow();
        let info = &slots[self.slot];
        if info.name.is_none() || info.sequence != self.sequence {
            return Err(StoreError::NotFound);
        }
        Ok(info.clone())
    }

    fn write_pending(&mut self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        while self.pending.len() < F::WRITE_SIZE {
            self.pending.push(ERASED).map_err(|_| StoreError::Io)?;
        }
        self.store.program(self.slot, &self.pending)?;
        self.pending.clear();
        Ok(())
    }
}

impl<F: NorFlash> StorageFile for FlashFile<'_, F> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        if self.mode != OpenMode::Read {
            return Err(StoreError::WrongMode);
        }
        let info = self.check_slot()?;
        let data_base = self.store.slot_base(self.slot) + HEADER_LEN;

        loop {
            let remaining = info.data_end.saturating_sub(self.position) as usize;
            let len = remaining.min(buf.len());
            if len == 0 {
                return Ok(0);
            }
            self.store.read_raw(data_base + self.position, &mut buf[..len])?;
            self.position += len as u32;

            let mut kept = 0;
            for index in 0..len {
                if buf[index] != ERASED {
                    buf[kept] = buf[index];
                    kept += 1;
                }
            }
            if kept > 0 {
                return Ok(kept);
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), StoreError> {
        if !self.mode.is_write() {
            return Err(StoreError::WrongMode);
        }
        let info = self.check_slot()?;

        let unit = F::WRITE_SIZE;
        let needed = (self.pending.len() + data.len()).div_ceil(unit) * unit;
        if info.data_end as usize + needed > self.store.data_capacity() as usize {
            return Err(StoreError::NoSpace);
        }

        for byte in data {
            self.pending.push(*byte).map_err(|_| StoreError::Io)?;
            if self.pending.len() == unit {
                self.store.program(self.slot, &self.pending)?;
                self.pending.clear();
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.mode.is_write() {
            self.check_slot()?;
            self.write_pending()?;
        }
        Ok(())
    }

    fn size(&self) -> usize {
        let slots = self.store.slots.borrow();
        slots[self.slot].size + self.pending.len()
    }
}

impl<F: NorFlash> Drop for FlashFile<'_, F> {
    fn drop(&mut self) {
        if self.mode.is_write() && self.check_slot().is_ok() {
            // Nothing left to report the error to.
            let _ = self.write_pending();
        }
    }
}

impl<F: NorFlash> Storage for FlashStore<F> {
    type File<'a>
        = FlashFile<'a, F>
    where
        Self: 'a;

    fn open(&self, path: &str, mode: OpenMode) -> Result<Self::File<'_>, StoreError> {
        validate_path(path)?;
        if path.len() > NAME_LEN {
            return Err(StoreError::InvalidPath);
        }

        let slot = match (mode, self.find(path)) {
            (OpenMode::Read, None) => return Err(StoreError::NotFound),
            (OpenMode::Read | OpenMode::Append, Some(slot)) => slot,
            (OpenMode::Append | OpenMode::Truncate, None) => self.create(path)?,
            (OpenMode::Truncate, Some(slot)) => {
                self.erase_slot(slot)?;
                self.write_entry(slot, path)?;
                slot
            }
        };

        Ok(FlashFile {
            store: self,
            slot,
            sequence: self.slots.borrow()[slot].sequence,
            mode,
            position: 0,
            pending: Vec::new(),
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        let slot = self.find(path).ok_or(StoreError::NotFound)?;
        self.erase_slot(slot)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        validate_path(to)?;
        if to.len() > NAME_LEN {
            return Err(StoreError::InvalidPath);
        }
        let source = self.find(from).ok_or(StoreError::NotFound)?;
        if from == to {
            return Ok(());
        }
        let replaced = self.find(to);

        self.write_entry(source, to)?;
        if let Some(replaced) = replaced {
            self.erase_slot(replaced)?;
        }
        Ok(())
    }

    fn list(&self, visit: &mut dyn FnMut(&str, usize)) -> Result<(), StoreError> {
        for slot in self.slots.borrow().iter() {
            if let Some(name) = &slot.name {
                visit(name, slot.size);
            }
        }
        Ok(())
    }

    fn usage(&self) -> Result<StorageUsage, StoreError> {
        let used = self
            .slots
            .borrow()
            .iter()
            .filter(|slot| slot.name.is_some())
            .map(|slot| (HEADER_LEN + slot.data_end) as usize)
            .sum();
        Ok(StorageUsage::new(used, self.flash.borrow().capacity()))
    }

    fn max_file_size(&self) -> Option<usize> {
        Some(self.data_capacity() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};
    use meter_core::clock::{Date, DateTime, ManualClock, Time};
    use meter_core::counter::PulseTally;
    use meter_core::diagnostics::{DiagnosticEvent, DiagnosticsRecorder};
    use meter_core::meter::{Meter, NoopConnectivity};
    use meter_core::record::LogRecord;
    use meter_core::usage_log::{DAILY_LOG_PATH, MAIN_LOG_PATH, UsageLog};

    const ERASE: usize = 256;
    const CAPACITY: usize = ERASE * 8 * SLOT_COUNT;

    #[derive(Debug)]
    struct RamFlashError(NorFlashErrorKind);

    impl NorFlashError for RamFlashError {
        fn kind(&self) -> NorFlashErrorKind {
            self.0
        }
    }

    /// NOR semantics in RAM: erase sets bytes to 0xFF, writes only land on
    /// erased bytes.
    struct RamFlash {
        bytes: std::vec::Vec<u8>,
    }

    impl RamFlash {
        fn new() -> Self {
            Self::with_capacity(CAPACITY)
        }

        fn with_capacity(capacity: usize) -> Self {
            Self {
                bytes: std::vec![ERASED; capacity],
            }
        }
    }

    /// Same medium programmed in 32-byte units.
    struct WideFlash(RamFlash);

    impl ErrorType for WideFlash {
        type Error = RamFlashError;
    }

    impl ReadNorFlash for WideFlash {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            self.0.read(offset, bytes)
        }

        fn capacity(&self) -> usize {
            self.0.capacity()
        }
    }

    impl NorFlash for WideFlash {
        const WRITE_SIZE: usize = 32;
        const ERASE_SIZE: usize = ERASE;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            self.0.erase(from, to)
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            self.0.write(offset, bytes)
        }
    }

    impl ErrorType for RamFlash {
        type Error = RamFlashError;
    }

    impl ReadNorFlash for RamFlash {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            let source = self
                .bytes
                .get(start..start + bytes.len())
                .ok_or(RamFlashError(NorFlashErrorKind::OutOfBounds))?;
            bytes.copy_from_slice(source);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.bytes.len()
        }
    }

    impl NorFlash for RamFlash {
        const WRITE_SIZE: usize = 8;
        const ERASE_SIZE: usize = ERASE;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            let (from, to) = (from as usize, to as usize);
            if from % ERASE != 0 || to % ERASE != 0 || to > self.bytes.len() {
                return Err(RamFlashError(NorFlashErrorKind::NotAligned));
            }
            self.bytes[from..to].fill(ERASED);
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            if start % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
                return Err(RamFlashError(NorFlashErrorKind::NotAligned));
            }
            let target = self
                .bytes
                .get_mut(start..start + bytes.len())
                .ok_or(RamFlashError(NorFlashErrorKind::OutOfBounds))?;
            if target.iter().any(|byte| *byte != ERASED) {
                return Err(RamFlashError(NorFlashErrorKind::Other));
            }
            target.copy_from_slice(bytes);
            Ok(())
        }
    }

    fn into_flash(store: FlashStore<RamFlash>) -> RamFlash {
        store.flash.into_inner()
    }

    fn read_all(store: &FlashStore<RamFlash>, path: &str) -> std::string::String {
        let mut file = store.open(path, OpenMode::Read).unwrap();
        let mut out = std::vec::Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let read = file.read(&mut buf).unwrap();
            if read == 0 {
                break;
            }
            out.extend_from_slice(&buf[..read]);
        }
        std::string::String::from_utf8(out).unwrap()
    }

    #[test]
    fn appends_survive_remount() {
        let store = FlashStore::mount(RamFlash::new()).unwrap();
        {
            let mut file = store.open("/meter.log", OpenMode::Append).unwrap();
            file.write_all(b"first line\n").unwrap();
            file.flush().unwrap();
        }
        {
            let mut file = store.open("/meter.log", OpenMode::Append).unwrap();
            file.write_all(b"second\n").unwrap();
        }

        let store = FlashStore::mount(into_flash(store)).unwrap();
        assert_eq!(read_all(&store, "/meter.log"), "first line\nsecond\n");
        let file = store.open("/meter.log", OpenMode::Read).unwrap();
        assert_eq!(file.size(), "first line\nsecond\n".len());
    }

    #[test]
    fn rename_replaces_and_frees_target() {
        let store = FlashStore::mount(RamFlash::new()).unwrap();
        for (path, text) in [("/meter.log", "old\n"), ("/daily.log", "new\n")] {
            let mut file = store.open(path, OpenMode::Truncate).unwrap();
            file.write_all(text.as_bytes()).unwrap();
        }

        store.rename("/daily.log", "/meter.log").unwrap();
        assert!(!store.exists("/daily.log"));
        assert_eq!(read_all(&store, "/meter.log"), "new\n");

        let store = FlashStore::mount(into_flash(store)).unwrap();
        assert_eq!(read_all(&store, "/meter.log"), "new\n");
        let mut files = 0;
        store.list(&mut |_, _| files += 1).unwrap();
        assert_eq!(files, 1);
    }

    #[test]
    fn interrupted_rename_is_repaired_on_mount() {
        let store = FlashStore::mount(RamFlash::new()).unwrap();
        for (path, text) in [("/meter.log", "old\n"), ("/daily.log", "new\n")] {
            let mut file = store.open(path, OpenMode::Truncate).unwrap();
            file.write_all(text.as_bytes()).unwrap();
        }
        // Simulate a reset after the new name entry but before the erase.
        let daily = store.find("/daily.log").unwrap();
        store.write_entry(daily, "/meter.log").unwrap();

        let store = FlashStore::mount(into_flash(store)).unwrap();
        assert_eq!(read_all(&store, "/meter.log"), "new\n");
        assert!(!store.exists("/daily.log"));
    }

    #[test]
    fn full_slot_reports_no_space() {
        let store = FlashStore::mount(RamFlash::new()).unwrap();
        let mut file = store.open("/meter.log", OpenMode::Append).unwrap();
        let chunk = [b'x'; 64];
        let mut result = Ok(());
        for _ in 0..64 {
            result = file.write_all(&chunk);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(StoreError::NoSpace));
    }

    #[test]
    fn too_many_files() {
        let store = FlashStore::mount(RamFlash::new()).unwrap();
        for path in ["/a", "/b", "/c", "/d"] {
            drop(store.open(path, OpenMode::Append).unwrap());
        }
        assert!(matches!(
            store.open("/e", OpenMode::Append),
            Err(StoreError::TooManyFiles)
        ));
    }

    #[test]
    fn unsupported_geometry_is_unavailable() {
        assert_eq!(
            FlashStore::mount(WideFlash(RamFlash::new())).err(),
            Some(StorageUnavailable)
        );
        // Two erase blocks split four ways leave no room for a slot header.
        assert_eq!(
            FlashStore::mount(RamFlash::with_capacity(ERASE * 2)).err(),
            Some(StorageUnavailable)
        );
        assert_eq!(
            FlashStore::mount(RamFlash::with_capacity(ERASE * SLOT_COUNT)).err(),
            None
        );
    }

    #[test]
    fn corrupt_name_entry_is_unavailable() {
        let store = FlashStore::mount(RamFlash::new()).unwrap();
        drop(store.open("/meter.log", OpenMode::Append).unwrap());
        let slot = store.find("/meter.log").unwrap();
        let entry = store.slot_base(slot) as usize;
        let mut flash = into_flash(store);

        // Overwrite the name entry with bytes that are not valid UTF-8.
        flash.bytes[entry..entry + 2].copy_from_slice(&[0xC3, 0x28]);
        flash.bytes[entry + 2..entry + NAME_LEN].fill(0);
        flash.bytes[entry + NAME_LEN..entry + ENTRY_LEN].copy_from_slice(&9u32.to_le_bytes());

        assert_eq!(FlashStore::mount(flash).err(), Some(StorageUnavailable));
    }

    #[test]
    fn file_size_is_bounded_by_slot() {
        let store = FlashStore::mount(RamFlash::new()).unwrap();
        assert_eq!(store.max_file_size(), Some(ERASE * 8 - HEADER_LEN as usize));
    }

    #[test]
    fn meter_compacts_a_full_slot() {
        let store = FlashStore::mount(RamFlash::new()).unwrap();
        let tally = PulseTally::new();
        let start = DateTime::new(Date::new(2024, 2, 1), Time::new(0, 0, 0));
        let mut meter = Meter::boot(
            &store,
            ManualClock::new(start),
            DiagnosticsRecorder::<64>::new(),
            &tally,
        );

        for day in 1..=3u8 {
            for hour in 0..24u8 {
                tally.record_pulse();
                let now = DateTime::new(Date::new(2024, 2, day), Time::new(hour, 0, 0));
                meter.clock_mut().set(now);
                meter.poll(&mut NoopConnectivity);
            }
        }

        let events = || meter.diagnostics().oldest_first().map(|record| record.event);
        assert!(!events().any(|event| event.is_fault()));
        assert!(events().any(|event| matches!(event, DiagnosticEvent::Rotated { .. })));
        assert_eq!(meter.usage_log().scan_latest_reading(), Ok(Some(720)));
    }

    #[test]
    fn usage_log_rotates_on_flash() {
        let store = FlashStore::mount(RamFlash::new()).unwrap();
        let log = UsageLog::new(&store);
        for day in 1..=2u8 {
            for hour in 0..4u8 {
                let stamp = DateTime::new(Date::new(2024, 2, day), Time::new(hour, 0, 0));
                log.append(&LogRecord::periodic(stamp, i64::from(day * 10 + hour)))
                    .unwrap();
            }
        }

        assert_eq!(log.rotate(), Ok(2));
        assert!(!store.exists(DAILY_LOG_PATH));
        assert_eq!(
            read_all(&store, MAIN_LOG_PATH),
            "2024/02/01,02:00:00,12,gal.\n2024/02/02,02:00:00,22,gal.\n"
        );
    }
}
