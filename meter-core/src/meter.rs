//! The cooperative meter loop.
//!
//! [`Meter`] owns everything the main context needs: the usage counter, the
//! log, the schedule detectors and the platform's clock and diagnostics sink.
//! The platform calls [`Meter::poll`] continuously and yields to its own I/O
//! between passes. A pass never blocks and never fails; storage problems are
//! reported to the diagnostics sink and the affected record is dropped. A
//! full log is compacted once before a record is given up on.

use crate::clock::{DateTime, WallClock};
use crate::config::{CONFIG_PATH, Config};
use crate::counter::{PulseTally, Reading, UsageCounter};
use crate::diagnostics::{DiagnosticEvent, DiagnosticSink};
use crate::record::{LogRecord, RecordTag};
use crate::schedule::{DAY_ROLLOVER_AT, ScheduleDetectors, ScheduleEvents};
use crate::status::StatusSnapshot;
use crate::store::{Storage, StoreError};
use crate::usage_log::{LogError, LogOp, LogStats, UsageLog};

/// What the platform should do after a poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome {
    Continue,
    /// The daily rollover fired. The platform restarts the device.
    Restart,
}

/// Once-per-second hook for network upkeep (reconnects, request servicing).
pub trait Connectivity {
    fn housekeeping(&mut self, now: DateTime);
}

/// Connectivity that does nothing.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopConnectivity;

impl NoopConnectivity {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Connectivity for NoopConnectivity {
    fn housekeeping(&mut self, _: DateTime) {}
}

/// Values established by boot-time recovery.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Recovery {
    pub configured: Reading,
    pub scanned: Option<Reading>,
    pub seeded: Reading,
    pub rotated_days: Option<usize>,
}

/// Main-context state of the meter.
pub struct Meter<'t, S: Storage, C: WallClock, D: DiagnosticSink> {
    log: UsageLog<'t, S>,
    counter: UsageCounter<'t>,
    detectors: ScheduleDetectors,
    config: Config,
    clock: C,
    diagnostics: D,
    recovery: Recovery,
    clock_unset_reported: bool,
}

impl<'t, S: Storage, C: WallClock, D: DiagnosticSink> Meter<'t, S, C, D> {
    /// Runs startup recovery and returns a meter ready to be polled.
    ///
    /// The configuration is loaded (defaults when missing), the log is scanned
    /// and the counter seeded with `max(configured offset, highest logged
    /// reading)`. A log over the effective size limit is rotated when that
    /// would shrink it, then a startup record carrying the recovered reading
    /// is appended.
    pub fn boot(store: &'t S, clock: C, diagnostics: D, tally: &'t PulseTally) -> Self {
        let mut meter = Self {
            log: UsageLog::new(store),
            counter: UsageCounter::new(tally),
            detectors: ScheduleDetectors::new(DAY_ROLLOVER_AT),
            config: Config::default(),
            clock,
            diagnostics,
            recovery: Recovery {
                configured: 0,
                scanned: None,
                seeded: 0,
                rotated_days: None,
            },
            clock_unset_reported: false,
        };

        let now = meter.clock.now();
        meter.track_clock(now);
        meter.config = meter.load_config(now);

        let configured = meter.config.meter_offset;
        let stats = match meter.log.stats() {
            Ok(stats) => stats,
            Err(err) => {
                meter.report(now, DiagnosticEvent::LogUnreadable(err));
                LogStats::default()
            }
        };
        let scanned = stats.latest;
        let seeded = scanned.map_or(configured, |scanned| scanned.max(configured));
        meter.counter.seed_offset(seeded);
        meter.recovery = Recovery {
            configured,
            scanned,
            seeded,
            rotated_days: None,
        };
        meter.report(
            now,
            DiagnosticEvent::Recovered {
                configured,
                scanned,
                seeded,
            },
        );

        let limit = meter.log_limit();
        if stats.compactable() && meter.log.size().is_ok_and(|size| size > limit) {
            meter.recovery.rotated_days = meter.compact(now).ok();
        }

        let startup = LogRecord::new(now, meter.counter.current_reading(), RecordTag::Startup);
        meter.append(now, &startup);
        meter
    }

    /// One pass of the cooperative loop.
    ///
    /// The hourly sample is logged first, then connectivity gets its
    /// once-per-second turn, then the daily rollover is checked.
    pub fn poll<N: Connectivity>(&mut self, connectivity: &mut N) -> PollOutcome {
        let now = self.clock.now();
        self.track_clock(now);
        let ScheduleEvents {
            second,
            hour,
            day_rollover,
        } = self.detectors.poll(now);

        if hour {
            let record = LogRecord::periodic(now, self.counter.current_reading());
            self.append(now, &record);
        }

        if second {
            connectivity.housekeeping(now);
        }

        if day_rollover {
            self.report(now, DiagnosticEvent::RestartScheduled);
            return PollOutcome::Restart;
        }

        PollOutcome::Continue
    }

    #[must_use]
    pub fn current_reading(&self) -> Reading {
        self.counter.current_reading()
    }

    /// Shifts the reading by `delta` and logs the correction.
    pub fn apply_correction(&mut self, delta: Reading) -> Reading {
        let now = self.clock.now();
        let reading = self.counter.apply_correction(delta);
        let record = LogRecord::new(now, reading, RecordTag::Correction { delta });
        self.append(now, &record);
        self.report(now, DiagnosticEvent::Corrected { delta, reading });
        reading
    }

    /// Sets the reading to `reading` and restarts the log from it.
    ///
    /// A configured offset above the new reading is lowered to it and the
    /// configuration rewritten, otherwise the next boot would seed from it.
    pub fn reset_reading(&mut self, reading: Reading) -> Result<Reading, LogError> {
        let now = self.clock.now();
        let reading = self.counter.set_reading(reading);
        let record = LogRecord::new(now, reading, RecordTag::Reset);
        if let Err(err) = self.log.reset(&record) {
            self.report(now, DiagnosticEvent::WriteFailure(err));
            return Err(err);
        }

        if self.config.meter_offset > reading {
            let mut config = self.config.clone();
            config.meter_offset = reading;
            if let Err(source) = config.write_to(self.log.store()) {
                let err = LogError::new(LogOp::Reset, CONFIG_PATH, source);
                self.report(now, DiagnosticEvent::WriteFailure(err));
                return Err(err);
            }
            self.config = config;
        }

        self.report(now, DiagnosticEvent::ReadingReset { reading });
        Ok(reading)
    }

    /// Compacts the log to one record per day, then logs the live reading.
    /// Returns the number of days kept.
    pub fn rotate(&mut self) -> Result<usize, LogError> {
        let now = self.clock.now();
        let days = self.compact(now)?;
        // Compaction keeps marker-hour samples only; later usage must stay on record.
        let record = LogRecord::periodic(now, self.counter.current_reading());
        self.append(now, &record);
        Ok(days)
    }

    /// Size above which the log is rotated at boot: the configured limit,
    /// capped at three quarters of the largest file the store can hold.
    #[must_use]
    pub fn log_limit(&self) -> usize {
        let limit = self.config.log_limit;
        match self.log.store().max_file_size() {
            Some(max) => limit.min(max - max / 4),
            None => limit,
        }
    }

    pub fn status_snapshot(&mut self) -> StatusSnapshot {
        StatusSnapshot {
            reading: self.counter.current_reading(),
            timestamp: self.clock.now(),
            clock_synchronized: self.clock.is_synchronized(),
            pulses: self.counter.pulses(),
            storage: self.log.store().usage().ok(),
            log_size: self.log.size().unwrap_or(0),
        }
    }

    #[must_use]
    pub const fn recovery(&self) -> Recovery {
        self.recovery
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn usage_log(&self) -> &UsageLog<'t, S> {
        &self.log
    }

    #[must_use]
    pub const fn store(&self) -> &'t S {
        self.log.store()
    }

    #[must_use]
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    #[must_use]
    pub const fn diagnostics(&self) -> &D {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut D {
        &mut self.diagnostics
    }

    fn load_config(&mut self, now: DateTime) -> Config {
        match Config::load(self.log.store()) {
            Ok(Some(config)) => config,
            Ok(None) => {
                self.report(now, DiagnosticEvent::ConfigMissing);
                Config::default()
            }
            Err(err) => {
                self.report(now, DiagnosticEvent::ConfigUnreadable(err));
                Config::default()
            }
        }
    }

    // Every appended record carries the live reading, so compacting before
    // the retry cannot lower what recovery finds.
    fn append(&mut self, now: DateTime, record: &LogRecord) {
        let result = match self.log.append(record) {
            Err(LogError {
                source: StoreError::NoSpace,
                ..
            }) if self.log.stats().is_ok_and(|stats| stats.compactable()) => {
                if self.compact(now).is_err() {
                    return;
                }
                self.log.append(record)
            }
            other => other,
        };
        if let Err(err) = result {
            self.report(now, DiagnosticEvent::WriteFailure(err));
        }
    }

    fn compact(&mut self, now: DateTime) -> Result<usize, LogError> {
        match self.log.rotate() {
            Ok(days) => {
                self.report(now, DiagnosticEvent::Rotated { days });
                Ok(days)
            }
            Err(err) => {
                self.report(now, DiagnosticEvent::WriteFailure(err));
                Err(err)
            }
        }
    }

    // Reports `ClockUnset` once per unsynchronized stretch.
    fn track_clock(&mut self, now: DateTime) {
        let synchronized = self.clock.is_synchronized();
        if !synchronized && !self.clock_unset_reported {
            self.clock_unset_reported = true;
            self.report(now, DiagnosticEvent::ClockUnset);
        } else if synchronized && self.clock_unset_reported {
            self.clock_unset_reported = false;
            self.report(now, DiagnosticEvent::ClockRestored);
        }
    }

    fn report(&mut self, now: DateTime, event: DiagnosticEvent) {
        self.diagnostics.record(now, event);
    }
}
