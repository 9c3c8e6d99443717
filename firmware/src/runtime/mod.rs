use cortex_m::interrupt as cortex_interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32 as hal;
use embassy_stm32::flash::{Blocking, Flash};
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use meter_core::counter::PulseTally;
use static_cell::StaticCell;

use crate::hw::rtc::RtcClock;
use crate::hw::{STORE_PARTITION_LEN, STORE_PARTITION_OFFSET};
use crate::storage::{FlashPartition, FlashStore};

mod meter_task;
mod pulse_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        cortex_interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                cortex_interrupt::enable();
            }
        }
    }
}

pub(super) type FirmwareStore = FlashStore<FlashPartition<Flash<'static, Blocking>>>;

/// Debounced pulses since boot. Written by the sampler, read by the meter.
pub(super) static PULSE_TALLY: PulseTally = PulseTally::new();

static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();
static STORE: StaticCell<FirmwareStore> = StaticCell::new();

#[interrupt]
unsafe fn SPI1() {
    unsafe { EXECUTOR_HIGH.on_interrupt() }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0, FLASH, RTC, ..
    } = hal::init(config);

    let flash = Flash::new_blocking(FLASH);
    let Some(partition) = FlashPartition::new(flash, STORE_PARTITION_OFFSET, STORE_PARTITION_LEN)
    else {
        defmt::error!("store partition does not fit the flash, halting");
        halt();
    };
    let store = match FlashStore::mount(partition) {
        Ok(store) => STORE.init(store),
        Err(err) => {
            defmt::error!("{}, halting", defmt::Display2Format(&err));
            halt();
        }
    };

    // The sampler preempts the meter loop, including its blocking flash work.
    interrupt::SPI1.set_priority(Priority::P1);
    let sampler_spawner = EXECUTOR_HIGH.start(interrupt::SPI1);
    sampler_spawner.spawn(pulse_task::run(PA0, &PULSE_TALLY).expect("pulse task"));

    spawner.spawn(meter_task::run(store, RtcClock::new(RTC), &PULSE_TALLY).expect("meter task"));
}

/// Parks the core for good. Called before any task is spawned.
fn halt() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}
