//! Simulated reed line and the bouncy pulse trains that drive it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use meter_core::debounce::Level;

/// Idle-high line shared between the pulse generator and the sampler.
#[derive(Debug)]
pub struct SimulatedLine {
    high: AtomicBool,
}

impl SimulatedLine {
    pub fn new() -> Self {
        Self {
            high: AtomicBool::new(true),
        }
    }

    pub fn level(&self) -> Level {
        Level::from_high(self.high.load(Ordering::Acquire))
    }

    pub fn set(&self, level: Level) {
        self.high.store(level.is_high(), Ordering::Release);
    }
}

impl Default for SimulatedLine {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape of one emulated reed closure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PulseShape {
    /// Number of contact bounces on make and on break.
    pub bounces: u32,
    pub bounce: Duration,
    /// How long each settled level is held.
    pub hold: Duration,
}

impl PulseShape {
    /// A closure that comfortably outlasts a debounce window of `window`.
    pub fn for_window(window: Duration) -> Self {
        Self {
            bounces: 3,
            bounce: Duration::from_millis(1),
            hold: window * 2,
        }
    }

    /// Level changes for one closure, each held for the given duration.
    pub fn steps(&self) -> Vec<(Level, Duration)> {
        let mut steps = Vec::new();
        for settled in [Level::Low, Level::High] {
            let other = if settled == Level::Low {
                Level::High
            } else {
                Level::Low
            };
            for _ in 0..self.bounces {
                steps.push((settled, self.bounce));
                steps.push((other, self.bounce));
            }
            steps.push((settled, self.hold));
        }
        steps
    }
}

/// Drives `count` closures onto `line` from a background thread.
pub fn spawn_pulse_train(
    line: Arc<SimulatedLine>,
    count: u32,
    shape: PulseShape,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let steps = shape.steps();
        for _ in 0..count {
            for (level, hold) in &steps {
                line.set(*level);
                thread::sleep(*hold);
            }
        }
    })
}
