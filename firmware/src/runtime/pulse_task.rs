use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::gpio::{Input, Pull};
use embassy_time::{Duration, Ticker};
use meter_core::counter::{PulseSampler, PulseTally};
use meter_core::debounce::{DEFAULT_TICK, DEFAULT_WINDOW_TICKS, Level, PulseDebouncer};

/// Samples the reed line once per tick and feeds the debouncer.
#[embassy_executor::task]
pub async fn run(pin: Peri<'static, hal::peripherals::PA0>, tally: &'static PulseTally) -> ! {
    let line = Input::new(pin, Pull::Up);
    let debouncer = PulseDebouncer::new(DEFAULT_WINDOW_TICKS, Level::from_high(line.is_high()));
    let mut sampler = PulseSampler::new(debouncer, tally);

    let period = Duration::try_from(DEFAULT_TICK).unwrap_or(Duration::from_millis(1));
    let mut ticker = Ticker::every(period);
    loop {
        sampler.tick(Level::from_high(line.is_high()));
        ticker.next().await;
    }
}
