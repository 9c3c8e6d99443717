//! Status surface shared by the firmware and emulator front-ends.
//!
//! [`StatusSnapshot`] is what display and HTTP collaborators consume;
//! [`StatusFormatter`] keeps the textual rendering identical everywhere.

use core::fmt;

use crate::clock::DateTime;
use crate::counter::Reading;
use crate::store::StorageUsage;

/// Point-in-time view of the meter.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusSnapshot {
    pub reading: Reading,
    pub timestamp: DateTime,
    pub clock_synchronized: bool,
    pub pulses: u32,
    /// `None` when the store could not report its usage.
    pub storage: Option<StorageUsage>,
    pub log_size: usize,
}

/// Renders a [`StatusSnapshot`] as human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the reading line (e.g. `reading 12340 gal. at 2024/05/06,14:00:00 pulses=12`).
    pub fn write_reading_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "reading {} gal. at {} pulses={}",
            self.snapshot.reading, self.snapshot.timestamp, self.snapshot.pulses
        )?;
        if !self.snapshot.clock_synchronized {
            writer.write_str(" (clock not set)")?;
        }
        Ok(())
    }

    /// Writes the storage line (e.g. `storage used=2048B total=65536B log=1800B`).
    pub fn write_storage_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writer.write_str("storage ")?;
        match self.snapshot.storage {
            Some(usage) => write!(writer, "used={}B total={}B", usage.used, usage.total)?,
            None => writer.write_str("used=unknown")?,
        }
        write!(writer, " log={}B", self.snapshot.log_size)
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatter = StatusFormatter::new(self);
        formatter.write_reading_line(f)?;
        f.write_str("\n")?;
        formatter.write_storage_line(f)
    }
}
