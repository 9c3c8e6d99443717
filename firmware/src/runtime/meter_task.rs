use cortex_m::peripheral::SCB;
use embassy_time::{Duration, Ticker, Timer};
use meter_core::counter::PulseTally;
use meter_core::meter::{Meter, NoopConnectivity, PollOutcome};

use super::FirmwareStore;
use crate::diagnostics::FirmwareDiagnostics;
use crate::hw::rtc::RtcClock;

const POLL_PERIOD: Duration = Duration::from_millis(50);
/// Lets RTT drain before the reset.
const RESTART_GRACE: Duration = Duration::from_millis(100);

#[embassy_executor::task]
pub async fn run(
    store: &'static FirmwareStore,
    clock: RtcClock,
    tally: &'static PulseTally,
) -> ! {
    let mut meter = Meter::boot(store, clock, FirmwareDiagnostics::new(), tally);
    defmt::info!("meter up, reading={}", meter.current_reading());

    let mut connectivity = NoopConnectivity::new();
    let mut ticker = Ticker::every(POLL_PERIOD);
    loop {
        if meter.poll(&mut connectivity) == PollOutcome::Restart {
            defmt::info!("daily restart at reading={}", meter.current_reading());
            Timer::after(RESTART_GRACE).await;
            SCB::sys_reset();
        }
        ticker.next().await;
    }
}
