//! Reed-switch debouncer executed from the fixed-period sampling context.
//!
//! The reed contact bounces for several milliseconds every time the meter's
//! magnet passes. The sampler calls [`PulseDebouncer::step`] once per tick
//! with the raw line level and receives a clean [`Edge`] once a transition
//! has survived the debounce window.
//!
//! ```text
//!               level != last                 countdown hits 0, level != last
//!  WaitForEdge ───────────────► Debounce ──────────────────────────────► HandleEdge
//!      ▲                           │                                         │
//!      │   countdown hits 0,       │                                         │
//!      │   level == last (noise)   │                                         │
//!      └───────────────────────────┘◄──────────── next tick ─────────────────┘
//! ```
//!
//! The detecting sample counts as the first tick of the window. While the
//! countdown runs the line is not looked at, so a bounce storm collapses into
//! a single re-sample. The tick after a confirmed edge is a holdoff, which
//! spaces reported edges at least `window + 1` ticks apart.
//!
//! Every call is O(1), takes no locks and never allocates.

use core::time::Duration;

/// Reference sampling period.
pub const DEFAULT_TICK: Duration = Duration::from_millis(1);

/// Reference debounce window, in ticks of [`DEFAULT_TICK`].
pub const DEFAULT_WINDOW_TICKS: u16 = 100;

/// Binary level of the monitored line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    #[must_use]
    pub const fn from_high(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }

    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

/// Debounced transition reported by the state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Edge {
    /// High to low: the reed contact closed. One pulse.
    Falling,
    /// Low to high: the contact opened again. Observed, never counted.
    Rising,
}

impl Edge {
    const fn between(old: Level, new: Level) -> Option<Self> {
        match (old, new) {
            (Level::High, Level::Low) => Some(Edge::Falling),
            (Level::Low, Level::High) => Some(Edge::Rising),
            _ => None,
        }
    }
}

/// Phase of the debounce state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DebounceState {
    WaitForEdge,
    Debounce { remaining: u16 },
    HandleEdge,
}

/// Three-state debouncer for a single digital line.
#[derive(Copy, Clone, Debug)]
pub struct PulseDebouncer {
    window: u16,
    last_level: Level,
    state: DebounceState,
}

impl PulseDebouncer {
    /// Creates a debouncer that trusts `initial` as the settled line level.
    ///
    /// A `window` of zero is treated as one tick.
    #[must_use]
    pub const fn new(window: u16, initial: Level) -> Self {
        Self {
            window: if window == 0 { 1 } else { window },
            last_level: initial,
            state: DebounceState::WaitForEdge,
        }
    }

    /// Debounce window length in ticks.
    #[must_use]
    pub const fn window(&self) -> u16 {
        self.window
    }

    /// Level the debouncer currently trusts.
    #[must_use]
    pub const fn settled_level(&self) -> Level {
        self.last_level
    }

    #[must_use]
    pub const fn state(&self) -> DebounceState {
        self.state
    }

    /// Advances the state machine by one tick with the freshly sampled level.
    pub fn step(&mut self, level: Level) -> Option<Edge> {
        match self.state {
            DebounceState::WaitForEdge => {
                if level != self.last_level {
                    return self.countdown(self.window, level);
                }
                None
            }
            DebounceState::Debounce { remaining } => self.countdown(remaining, level),
            DebounceState::HandleEdge => {
                self.state = DebounceState::WaitForEdge;
                None
            }
        }
    }

    // Consumes one tick of the countdown and re-samples when it expires.
    fn countdown(&mut self, remaining: u16, level: Level) -> Option<Edge> {
        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            self.state = DebounceState::Debounce { remaining };
            return None;
        }

        match Edge::between(self.last_level, level) {
            Some(edge) => {
                self.last_level = level;
                self.state = DebounceState::HandleEdge;
                Some(edge)
            }
            None => {
                self.state = DebounceState::WaitForEdge;
                None
            }
        }
    }
}

impl Default for PulseDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_TICKS, Level::High)
    }
}
