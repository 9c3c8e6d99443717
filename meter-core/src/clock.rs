//! Wall-clock types shared by the log format and the schedule detectors.
//!
//! The meter never does calendar arithmetic itself: the platform delivers
//! broken-down date and time fields (RTC registers on the MCU, `chrono` on the
//! host) and the core only compares and formats them.

use core::fmt;

/// Calendar date as reported by the wall clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Date {
    #[must_use]
    pub const fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// Builds a date when the fields are in range.
    #[must_use]
    pub const fn checked(year: u16, month: u8, day: u8) -> Option<Self> {
        if month == 0 || month > 12 || day == 0 || day > 31 {
            None
        } else {
            Some(Self::new(year, month, day))
        }
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}/{:02}/{:02}", self.year, self.month, self.day)
    }
}

/// Time of day with one-second resolution.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Time {
    pub const MIDNIGHT: Time = Time::new(0, 0, 0);

    #[must_use]
    pub const fn new(hour: u8, minute: u8, second: u8) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }

    /// Builds a time when the fields are in range. Leap seconds are accepted.
    #[must_use]
    pub const fn checked(hour: u8, minute: u8, second: u8) -> Option<Self> {
        if hour > 23 || minute > 59 || second > 60 {
            None
        } else {
            Some(Self::new(hour, minute, second))
        }
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hour, self.minute, self.second
        )
    }
}

/// Broken-down wall-clock instant.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
}

impl DateTime {
    #[must_use]
    pub const fn new(date: Date, time: Time) -> Self {
        Self { date, time }
    }
}

/// Renders as `YYYY/MM/DD,HH:MM:SS`, the prefix of every log line.
impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.date, self.time)
    }
}

/// Source of calendar time for the cooperative loop.
pub trait WallClock {
    /// Returns the current local time.
    fn now(&mut self) -> DateTime;

    /// Returns `false` while the clock has not been set from a trusted source.
    ///
    /// Readings keep counting and records keep being written while this is
    /// `false`; only their timestamps are suspect.
    fn is_synchronized(&self) -> bool {
        true
    }
}

/// Clock whose value only changes when told to. Used by tests and by the
/// emulator when replaying scripted scenarios.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ManualClock {
    now: DateTime,
    synchronized: bool,
}

impl ManualClock {
    #[must_use]
    pub const fn new(now: DateTime) -> Self {
        Self {
            now,
            synchronized: true,
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&mut self, now: DateTime) {
        self.now = now;
    }

    /// Marks the clock as (un)synchronized.
    pub fn set_synchronized(&mut self, synchronized: bool) {
        self.synchronized = synchronized;
    }
}

impl WallClock for ManualClock {
    fn now(&mut self) -> DateTime {
        self.now
    }

    fn is_synchronized(&self) -> bool {
        self.synchronized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;
    use heapless::String;

    #[test]
    fn renders_log_prefix() {
        let stamp = DateTime::new(Date::new(2024, 3, 9), Time::new(2, 0, 7));
        let mut out: String<32> = String::new();
        write!(out, "{stamp}").unwrap();
        assert_eq!(out.as_str(), "2024/03/09,02:00:07");
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert!(Date::checked(2024, 13, 1).is_none());
        assert!(Date::checked(2024, 0, 1).is_none());
        assert!(Date::checked(2024, 2, 0).is_none());
        assert!(Time::checked(24, 0, 0).is_none());
        assert!(Time::checked(23, 60, 0).is_none());
        assert_eq!(Time::checked(23, 59, 59), Some(Time::new(23, 59, 59)));
    }

    #[test]
    fn ordering_follows_calendar() {
        let earlier = DateTime::new(Date::new(2024, 1, 31), Time::new(23, 59, 59));
        let later = DateTime::new(Date::new(2024, 2, 1), Time::MIDNIGHT);
        assert!(earlier < later);
    }
}
