//! Diagnostic sink for the firmware target.
//!
//! Events land in the shared ring and are mirrored to defmt (stdout on the
//! host) so a debugger attached during bring-up sees them as they happen.

use meter_core::clock::DateTime;
use meter_core::diagnostics::{
    DiagnosticEvent, DiagnosticRecord, DiagnosticSink, DiagnosticsRecorder,
};

pub struct FirmwareDiagnostics {
    recorder: DiagnosticsRecorder,
}

impl FirmwareDiagnostics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            recorder: DiagnosticsRecorder::new(),
        }
    }

    pub fn recorder(&self) -> &DiagnosticsRecorder {
        &self.recorder
    }
}

impl Default for FirmwareDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticSink for FirmwareDiagnostics {
    fn record(&mut self, timestamp: DateTime, event: DiagnosticEvent) {
        let id = self.recorder.push(timestamp, event);
        emit_log(&DiagnosticRecord {
            id,
            timestamp,
            event,
        });
    }
}

#[cfg(target_os = "none")]
fn emit_log(record: &DiagnosticRecord) {
    if record.event.is_fault() {
        defmt::warn!("diag {}", defmt::Display2Format(record));
    } else {
        defmt::info!("diag {}", defmt::Display2Format(record));
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(record: &DiagnosticRecord) {
    if record.event.is_fault() {
        println!("diag WARN {record}");
    } else {
        println!("diag {record}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_core::clock::{Date, Time};
    use meter_core::store::StoreError;
    use meter_core::usage_log::{LogError, LogOp, MAIN_LOG_PATH};

    #[test]
    fn mirrors_events_into_ring() {
        let mut diagnostics = FirmwareDiagnostics::new();
        let stamp = DateTime::new(Date::new(2024, 6, 1), Time::new(2, 0, 0));

        diagnostics.record(stamp, DiagnosticEvent::ClockUnset);
        diagnostics.record(
            stamp,
            DiagnosticEvent::WriteFailure(LogError::new(
                LogOp::Append,
                MAIN_LOG_PATH,
                StoreError::NoSpace,
            )),
        );

        let recorder = diagnostics.recorder();
        assert_eq!(recorder.len(), 2);
        let latest = recorder.latest().copied().unwrap();
        assert_eq!(latest.id, 1);
        assert!(latest.event.is_fault());
    }
}
