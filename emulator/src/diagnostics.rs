use meter_core::clock::DateTime;
use meter_core::diagnostics::{DiagnosticEvent, DiagnosticSink, DiagnosticsRecorder};
use tracing::{info, warn};

/// Keeps recent events for the `diag` command and mirrors each to `tracing`.
#[derive(Default)]
pub struct TracingDiagnostics {
    recorder: DiagnosticsRecorder,
}

impl TracingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self) -> &DiagnosticsRecorder {
        &self.recorder
    }
}

impl DiagnosticSink for TracingDiagnostics {
    fn record(&mut self, timestamp: DateTime, event: DiagnosticEvent) {
        let id = self.recorder.push(timestamp, event);
        if event.is_fault() {
            warn!(id, %timestamp, "{event}");
        } else {
            info!(id, %timestamp, "{event}");
        }
    }
}
