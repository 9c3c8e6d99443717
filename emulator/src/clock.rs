//! Host wall clocks.

use std::time::Instant;

use chrono::{Datelike, FixedOffset, NaiveDateTime, TimeDelta, Timelike, Utc};
use meter_core::clock::{Date, DateTime, Time, WallClock};

const SECONDS_PER_HOUR: i32 = 3_600;

/// Host time shifted by the configured timezone offset.
#[derive(Copy, Clone, Debug)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// Returns `None` for offsets chrono cannot represent.
    pub fn new(offset_hours: i32) -> Option<Self> {
        let offset = FixedOffset::east_opt(offset_hours.checked_mul(SECONDS_PER_HOUR)?)?;
        Some(Self { offset })
    }
}

impl WallClock for SystemClock {
    fn now(&mut self) -> DateTime {
        let local = Utc::now().with_timezone(&self.offset).naive_local();
        from_naive(local).unwrap_or(FALLBACK)
    }
}

/// Scripted clock running `speed` times faster than real time.
///
/// Each call advances by at most one second so the schedule detectors see
/// every second, however fast the clock runs.
#[derive(Copy, Clone, Debug)]
pub struct SimulatedClock {
    start: NaiveDateTime,
    origin: Instant,
    speed: u32,
    current: NaiveDateTime,
}

impl SimulatedClock {
    pub fn new(start: NaiveDateTime, speed: u32) -> Self {
        Self {
            start,
            origin: Instant::now(),
            speed: speed.max(1),
            current: start,
        }
    }

    fn target(&self) -> NaiveDateTime {
        let elapsed = self.origin.elapsed().as_millis() * u128::from(self.speed);
        let elapsed = i64::try_from(elapsed).unwrap_or(i64::MAX);
        TimeDelta::try_milliseconds(elapsed)
            .and_then(|delta| self.start.checked_add_signed(delta))
            .unwrap_or(NaiveDateTime::MAX)
    }

    fn advance(&mut self, target: NaiveDateTime) -> NaiveDateTime {
        let next = self
            .current
            .checked_add_signed(TimeDelta::seconds(1))
            .unwrap_or(self.current);
        self.current = if target > next { next } else { target.max(self.current) };
        self.current
    }
}

impl WallClock for SimulatedClock {
    fn now(&mut self) -> DateTime {
        let target = self.target();
        from_naive(self.advance(target)).unwrap_or(FALLBACK)
    }
}

/// The clock selected on the command line.
#[derive(Copy, Clone, Debug)]
pub enum HostClock {
    System(SystemClock),
    Simulated(SimulatedClock),
}

impl WallClock for HostClock {
    fn now(&mut self) -> DateTime {
        match self {
            HostClock::System(clock) => clock.now(),
            HostClock::Simulated(clock) => clock.now(),
        }
    }
}

const FALLBACK: DateTime = DateTime::new(Date::new(2000, 1, 1), Time::new(0, 0, 0));

/// Converts a chrono timestamp; `None` outside the years a log line can hold.
pub fn from_naive(value: NaiveDateTime) -> Option<DateTime> {
    let year = u16::try_from(value.year()).ok()?;
    let date = Date::checked(
        year,
        u8::try_from(value.month()).ok()?,
        u8::try_from(value.day()).ok()?,
    )?;
    let time = Time::checked(
        u8::try_from(value.hour()).ok()?,
        u8::try_from(value.minute()).ok()?,
        u8::try_from(value.second()).ok()?,
    )?;
    Some(DateTime::new(date, time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn naive(day: u32, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 8, day)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    #[test]
    fn converts_chrono_timestamps() {
        assert_eq!(
            from_naive(naive(31, 23, 59, 58)),
            Some(DateTime::new(Date::new(2024, 8, 31), Time::new(23, 59, 58)))
        );
    }

    #[test]
    fn simulated_clock_never_skips_a_second() {
        let mut clock = SimulatedClock::new(naive(1, 1, 59, 58), 1_000);
        let far_ahead = naive(1, 3, 0, 0);

        assert_eq!(clock.advance(far_ahead), naive(1, 1, 59, 59));
        assert_eq!(clock.advance(far_ahead), naive(1, 2, 0, 0));
        assert_eq!(clock.advance(far_ahead), naive(1, 2, 0, 1));
    }

    #[test]
    fn simulated_clock_does_not_run_backwards() {
        let mut clock = SimulatedClock::new(naive(1, 12, 0, 0), 1);
        clock.advance(naive(1, 12, 0, 1));
        assert_eq!(clock.advance(naive(1, 12, 0, 0)), naive(1, 12, 0, 1));
    }

    #[test]
    fn system_clock_rejects_impossible_offsets() {
        assert!(SystemClock::new(5).is_some());
        assert!(SystemClock::new(30).is_none());
    }
}
