//! Pulse tally and the usage reading derived from it.
//!
//! [`PulseTally`] is the only value shared between the sampling context and
//! the cooperative loop. It is written exclusively by the sampler (through
//! [`PulseSampler`]) and read exclusively by the loop (through
//! [`UsageCounter`]). Access goes through a `portable_atomic` integer so
//! Cortex-M0+ targets, which lack native read-modify-write atomics, still see
//! untorn values.

use portable_atomic::{AtomicU32, Ordering};

use crate::debounce::{Edge, Level, PulseDebouncer};

/// Cumulative volume in meter units.
pub type Reading = i64;

/// Volume represented by one debounced pulse.
pub const UNIT_VOLUME: Reading = 10;

/// Pulse count shared between the sampling context and the main loop.
///
/// `u32` pulses at [`UNIT_VOLUME`] each covers more than forty billion units,
/// beyond anything the meter will register in its service life.
#[derive(Debug, Default)]
pub struct PulseTally {
    pulses: AtomicU32,
}

impl PulseTally {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pulses: AtomicU32::new(0),
        }
    }

    /// Adds one pulse. Sampling context only.
    pub fn record_pulse(&self) {
        self.pulses.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of pulses seen since boot.
    pub fn pulses(&self) -> u32 {
        self.pulses.load(Ordering::Relaxed)
    }
}

/// Sampling-context half of the meter: debounces the line and feeds the tally.
pub struct PulseSampler<'a> {
    debouncer: PulseDebouncer,
    tally: &'a PulseTally,
}

impl<'a> PulseSampler<'a> {
    #[must_use]
    pub const fn new(debouncer: PulseDebouncer, tally: &'a PulseTally) -> Self {
        Self { debouncer, tally }
    }

    /// Processes one sample. Falling edges are counted, rising edges only reported.
    pub fn tick(&mut self, level: Level) -> Option<Edge> {
        let edge = self.debouncer.step(level);
        if edge == Some(Edge::Falling) {
            self.tally.record_pulse();
        }
        edge
    }

    #[must_use]
    pub const fn debouncer(&self) -> &PulseDebouncer {
        &self.debouncer
    }
}

/// Main-loop half of the meter: the calibration offset plus the shared tally.
#[derive(Debug)]
pub struct UsageCounter<'a> {
    tally: &'a PulseTally,
    offset: Reading,
}

impl<'a> UsageCounter<'a> {
    #[must_use]
    pub const fn new(tally: &'a PulseTally) -> Self {
        Self { tally, offset: 0 }
    }

    /// Installs the startup offset, normally `max(configured, scanned)`.
    pub fn seed_offset(&mut self, initial: Reading) {
        self.offset = initial;
    }

    /// Shifts the offset by `delta` and returns the corrected reading.
    pub fn apply_correction(&mut self, delta: Reading) -> Reading {
        self.offset = self.offset.saturating_add(delta);
        self.current_reading()
    }

    /// Moves the offset so the current reading equals `target`.
    pub fn set_reading(&mut self, target: Reading) -> Reading {
        self.offset = target.saturating_sub(self.pulse_volume());
        self.current_reading()
    }

    #[must_use]
    pub fn current_reading(&self) -> Reading {
        self.offset.saturating_add(self.pulse_volume())
    }

    #[must_use]
    pub const fn offset(&self) -> Reading {
        self.offset
    }

    #[must_use]
    pub fn pulses(&self) -> u32 {
        self.tally.pulses()
    }

    fn pulse_volume(&self) -> Reading {
        Reading::from(self.tally.pulses()) * UNIT_VOLUME
    }
}
