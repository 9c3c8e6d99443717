//! Wall clock backed by the on-chip RTC.

use embassy_stm32::rtc::{DateTime as RtcDateTime, Rtc, RtcConfig, RtcTimeProvider};
use embassy_stm32::Peri;
use embassy_stm32::peripherals::RTC;
use meter_core::clock::{Date, DateTime, Time, WallClock};

/// The RTC resets to 2000-01-01 without backup power; anything older than
/// this year has never been set.
const MIN_TRUSTED_YEAR: u16 = 2024;

const EPOCH: DateTime = DateTime::new(Date::new(2000, 1, 1), Time::new(0, 0, 0));

pub struct RtcClock {
    _rtc: Rtc,
    time: RtcTimeProvider,
    last: DateTime,
    synchronized: bool,
}

impl RtcClock {
    pub fn new(rtc: Peri<'static, RTC>) -> Self {
        let (rtc, time) = Rtc::new(rtc, RtcConfig::default());
        Self {
            _rtc: rtc,
            time,
            last: EPOCH,
            synchronized: false,
        }
    }
}

impl WallClock for RtcClock {
    fn now(&mut self) -> DateTime {
        match self.time.now().ok().and_then(convert) {
            Some(now) => {
                self.synchronized = now.date.year >= MIN_TRUSTED_YEAR;
                self.last = now;
            }
            // Keep the previous value so schedules do not jump backwards.
            None => self.synchronized = false,
        }
        self.last
    }

    fn is_synchronized(&self) -> bool {
        self.synchronized
    }
}

fn convert(now: RtcDateTime) -> Option<DateTime> {
    Some(DateTime::new(
        Date::checked(now.year(), now.month(), now.day())?,
        Time::checked(now.hour(), now.minute(), now.second())?,
    ))
}
