//! Diagnostic event catalog and the fixed-capacity ring that retains them.
//!
//! The orchestrator never logs directly. It reports what happened to a
//! [`DiagnosticSink`] supplied by the platform: the firmware mirrors events
//! to `defmt`, the emulator to `tracing`, and both keep the most recent ones
//! in a [`DiagnosticsRecorder`] so an operator can inspect them later.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::clock::DateTime;
use crate::counter::Reading;
use crate::store::StoreError;
use crate::usage_log::LogError;

/// Number of diagnostic records retained in memory.
pub const DIAGNOSTICS_RING_CAPACITY: usize = 32;

/// Monotonic identifier assigned to every recorded event.
pub type EventId = u32;

/// Something worth telling an operator about.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiagnosticEvent {
    /// Boot-time recovery finished and seeded the counter.
    Recovered {
        configured: Reading,
        scanned: Option<Reading>,
        seeded: Reading,
    },
    /// No configuration file; defaults are in effect.
    ConfigMissing,
    /// Configuration exists but could not be read; defaults are in effect.
    ConfigUnreadable(StoreError),
    /// A log operation failed and was skipped.
    WriteFailure(LogError),
    /// The log could not be scanned at boot; recovery fell back to the
    /// configured offset.
    LogUnreadable(LogError),
    /// The main log was compacted to one record per day.
    Rotated { days: usize },
    /// The wall clock has not been set; timestamps are suspect.
    ClockUnset,
    /// The wall clock became trustworthy again.
    ClockRestored,
    /// The offset was corrected by hand.
    Corrected { delta: Reading, reading: Reading },
    /// The reading was replaced and the log restarted.
    ReadingReset { reading: Reading },
    /// The daily restart is about to happen.
    RestartScheduled,
}

impl DiagnosticEvent {
    /// `true` for events that indicate lost or suspect data.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(
            self,
            DiagnosticEvent::ConfigUnreadable(_)
                | DiagnosticEvent::WriteFailure(_)
                | DiagnosticEvent::LogUnreadable(_)
                | DiagnosticEvent::ClockUnset
        )
    }
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticEvent::Recovered {
                configured,
                scanned: Some(scanned),
                seeded,
            } => write!(
                f,
                "recovered reading={seeded} (config={configured} log={scanned})"
            ),
            DiagnosticEvent::Recovered {
                configured,
                scanned: None,
                seeded,
            } => write!(f, "recovered reading={seeded} (config={configured} log=empty)"),
            DiagnosticEvent::ConfigMissing => f.write_str("config missing, using defaults"),
            DiagnosticEvent::ConfigUnreadable(err) => {
                write!(f, "config unreadable ({err}), using defaults")
            }
            DiagnosticEvent::WriteFailure(err) => write!(f, "log failure: {err}"),
            DiagnosticEvent::LogUnreadable(err) => write!(f, "log unreadable: {err}"),
            DiagnosticEvent::Rotated { days } => write!(f, "log rotated, {days} day(s) kept"),
            DiagnosticEvent::ClockUnset => f.write_str("clock not set"),
            DiagnosticEvent::ClockRestored => f.write_str("clock set"),
            DiagnosticEvent::Corrected { delta, reading } => {
                write!(f, "corrected by {delta:+}, reading={reading}")
            }
            DiagnosticEvent::ReadingReset { reading } => write!(f, "reading reset to {reading}"),
            DiagnosticEvent::RestartScheduled => f.write_str("daily restart"),
        }
    }
}

/// Receiver for diagnostic events.
pub trait DiagnosticSink {
    fn record(&mut self, timestamp: DateTime, event: DiagnosticEvent);
}

/// Sink that drops everything.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopDiagnostics;

impl NoopDiagnostics {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DiagnosticSink for NoopDiagnostics {
    fn record(&mut self, _: DateTime, _: DiagnosticEvent) {}
}

/// Diagnostic record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DiagnosticRecord {
    pub id: EventId,
    pub timestamp: DateTime,
    pub event: DiagnosticEvent,
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.id, self.timestamp, self.event)
    }
}

/// Diagnostic ring buffer type alias.
pub type DiagnosticsRing<const CAPACITY: usize = DIAGNOSTICS_RING_CAPACITY> =
    HistoryBuf<DiagnosticRecord, CAPACITY>;

/// Keeps the most recent `CAPACITY` diagnostic events.
pub struct DiagnosticsRecorder<const CAPACITY: usize = DIAGNOSTICS_RING_CAPACITY> {
    ring: DiagnosticsRing<CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> DiagnosticsRecorder<CAPACITY> {
    /// Creates a recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded events in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, DiagnosticRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent record, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&DiagnosticRecord> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Total number of events recorded, including those already evicted.
    #[must_use]
    pub const fn total(&self) -> EventId {
        self.next_event_id
    }

    /// Stores `event` and returns its identifier.
    pub fn push(&mut self, timestamp: DateTime, event: DiagnosticEvent) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(DiagnosticRecord {
            id,
            timestamp,
            event,
        });
        id
    }
}

impl<const CAPACITY: usize> Default for DiagnosticsRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAPACITY: usize> DiagnosticSink for DiagnosticsRecorder<CAPACITY> {
    fn record(&mut self, timestamp: DateTime, event: DiagnosticEvent) {
        self.push(timestamp, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Date, Time};
    use crate::usage_log::{LogOp, MAIN_LOG_PATH};

    fn at(second: u8) -> DateTime {
        DateTime::new(Date::new(2024, 1, 1), Time::new(0, 0, second))
    }

    #[test]
    fn assigns_sequential_ids() {
        let mut recorder: DiagnosticsRecorder<4> = DiagnosticsRecorder::new();
        assert_eq!(recorder.push(at(0), DiagnosticEvent::ConfigMissing), 0);
        assert_eq!(recorder.push(at(1), DiagnosticEvent::ClockUnset), 1);

        let latest = recorder.latest().copied().unwrap();
        assert_eq!(latest.id, 1);
        assert_eq!(latest.event, DiagnosticEvent::ClockUnset);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut recorder: DiagnosticsRecorder<2> = DiagnosticsRecorder::new();
        for second in 0..5 {
            recorder.record(at(second), DiagnosticEvent::RestartScheduled);
        }

        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.total(), 5);
        let ids: heapless::Vec<EventId, 2> = recorder.oldest_first().map(|r| r.id).collect();
        assert_eq!(ids.as_slice(), &[3, 4]);
    }

    #[test]
    fn renders_failures_with_context() {
        let record = DiagnosticRecord {
            id: 7,
            timestamp: at(9),
            event: DiagnosticEvent::WriteFailure(LogError::new(
                LogOp::Append,
                MAIN_LOG_PATH,
                StoreError::NoSpace,
            )),
        };
        let mut out: heapless::String<96> = heapless::String::new();
        core::fmt::write(&mut out, format_args!("{record}")).unwrap();
        assert_eq!(
            out.as_str(),
            "#7 2024/01/01,00:00:09 log failure: append /meter.log: no space left"
        );
        assert!(record.event.is_fault());
    }

    #[test]
    fn scan_failures_are_not_write_failures() {
        let event = DiagnosticEvent::LogUnreadable(LogError::new(
            LogOp::Scan,
            MAIN_LOG_PATH,
            StoreError::Io,
        ));
        let mut out: heapless::String<64> = heapless::String::new();
        core::fmt::write(&mut out, format_args!("{event}")).unwrap();
        assert_eq!(out.as_str(), "log unreadable: scan /meter.log: i/o failure");
        assert!(event.is_fault());
    }
}
