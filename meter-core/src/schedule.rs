//! Wall-clock edge detectors polled from the cooperative loop.
//!
//! Each detector remembers the last value it saw and reports `true` the
//! first time a new value shows up. They may be polled at any rate; polling
//! faster than once per second only repeats `false`.
//!
//! The detectors assume the clock moves forward. A backwards step simply
//! looks like a new value to the second and hour detectors.

use crate::clock::{Date, DateTime, Time};

/// Time of day at which the daily restart and rotation happen.
pub const DAY_ROLLOVER_AT: Time = Time::new(2, 0, 0);

/// Fires whenever the observed value differs from the previous observation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChangeDetector<T> {
    last: Option<T>,
}

impl<T> Default for ChangeDetector<T> {
    fn default() -> Self {
        Self { last: None }
    }
}

impl<T: Copy + PartialEq> ChangeDetector<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Records `value`, returning `true` when it differs from the last one.
    pub fn observe(&mut self, value: T) -> bool {
        if self.last == Some(value) {
            return false;
        }
        self.last = Some(value);
        true
    }

    #[must_use]
    pub const fn last(&self) -> Option<T> {
        self.last
    }
}

/// Fires once per wall-clock second.
#[derive(Copy, Clone, Debug, Default)]
pub struct SecondDetector {
    inner: ChangeDetector<DateTime>,
}

impl SecondDetector {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: ChangeDetector::new(),
        }
    }

    pub fn observe(&mut self, now: DateTime) -> bool {
        self.inner.observe(now)
    }
}

/// Fires once per hour, including the first hour observed after boot.
#[derive(Copy, Clone, Debug, Default)]
pub struct HourDetector {
    inner: ChangeDetector<(Date, u8)>,
}

impl HourDetector {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: ChangeDetector::new(),
        }
    }

    pub fn observe(&mut self, now: DateTime) -> bool {
        self.inner.observe((now.date, now.time.hour))
    }
}

/// Fires once per calendar day at the marker time, never on the boot day.
#[derive(Copy, Clone, Debug)]
pub struct DayRolloverDetector {
    marker: Time,
    boot_day: Option<Date>,
    fired_on: Option<Date>,
}

impl DayRolloverDetector {
    #[must_use]
    pub const fn new(marker: Time) -> Self {
        Self {
            marker,
            boot_day: None,
            fired_on: None,
        }
    }

    #[must_use]
    pub const fn marker(&self) -> Time {
        self.marker
    }

    pub fn observe(&mut self, now: DateTime) -> bool {
        let boot_day = *self.boot_day.get_or_insert(now.date);
        if now.date == boot_day || now.time != self.marker {
            return false;
        }
        if self.fired_on == Some(now.date) {
            return false;
        }
        self.fired_on = Some(now.date);
        true
    }
}

impl Default for DayRolloverDetector {
    fn default() -> Self {
        Self::new(DAY_ROLLOVER_AT)
    }
}

/// Detector outputs for one poll.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ScheduleEvents {
    pub second: bool,
    pub hour: bool,
    pub day_rollover: bool,
}

impl ScheduleEvents {
    #[must_use]
    pub const fn any(&self) -> bool {
        self.second || self.hour || self.day_rollover
    }
}

/// The three detectors the orchestrator polls together.
#[derive(Copy, Clone, Debug, Default)]
pub struct ScheduleDetectors {
    second: SecondDetector,
    hour: HourDetector,
    day: DayRolloverDetector,
}

impl ScheduleDetectors {
    #[must_use]
    pub const fn new(day_rollover_at: Time) -> Self {
        Self {
            second: SecondDetector::new(),
            hour: HourDetector::new(),
            day: DayRolloverDetector::new(day_rollover_at),
        }
    }

    pub fn poll(&mut self, now: DateTime) -> ScheduleEvents {
        ScheduleEvents {
            second: self.second.observe(now),
            hour: self.hour.observe(now),
            day_rollover: self.day.observe(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u8, hour: u8, minute: u8, second: u8) -> DateTime {
        DateTime::new(Date::new(2024, 4, day), Time::new(hour, minute, second))
    }

    #[test]
    fn second_detector_fires_once_per_second() {
        let mut detector = SecondDetector::new();
        assert!(detector.observe(at(1, 10, 0, 0)));
        assert!(!detector.observe(at(1, 10, 0, 0)));
        assert!(detector.observe(at(1, 10, 0, 1)));
        // Same second field a minute later is still a new second.
        assert!(detector.observe(at(1, 10, 1, 1)));
    }

    #[test]
    fn hour_detector_fires_on_boot_hour() {
        let mut detector = HourDetector::new();
        assert!(detector.observe(at(1, 10, 42, 7)));
        assert!(!detector.observe(at(1, 10, 59, 59)));
        assert!(detector.observe(at(1, 11, 0, 0)));
        assert!(!detector.observe(at(1, 11, 0, 1)));
    }

    #[test]
    fn day_rollover_skips_boot_day() {
        let mut detector = DayRolloverDetector::default();
        assert!(!detector.observe(at(1, 1, 59, 59)));
        assert!(!detector.observe(at(1, 2, 0, 0)));
        assert!(!detector.observe(at(1, 23, 0, 0)));
        assert!(detector.observe(at(2, 2, 0, 0)));
    }

    #[test]
    fn day_rollover_fires_once_per_qualifying_second() {
        let mut detector = DayRolloverDetector::default();
        detector.observe(at(1, 12, 0, 0));

        let mut fired = 0;
        for _ in 0..20 {
            if detector.observe(at(2, 2, 0, 0)) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert!(!detector.observe(at(2, 2, 0, 1)));
        assert!(detector.observe(at(3, 2, 0, 0)));
    }

    #[test]
    fn day_rollover_ignores_other_times() {
        let mut detector = DayRolloverDetector::default();
        detector.observe(at(1, 12, 0, 0));
        assert!(!detector.observe(at(2, 0, 0, 0)));
        assert!(!detector.observe(at(2, 2, 0, 1)));
        assert!(!detector.observe(at(2, 3, 0, 0)));
    }

    #[test]
    fn combined_poll() {
        let mut detectors = ScheduleDetectors::new(DAY_ROLLOVER_AT);
        let first = detectors.poll(at(1, 9, 0, 0));
        assert!(first.second && first.hour && !first.day_rollover);

        let repeat = detectors.poll(at(1, 9, 0, 0));
        assert!(!repeat.any());
    }
}
