#![no_std]

// Shared logic for the reed-switch water meter.
//
// Everything here compiles without the Rust standard library so the firmware
// and the host emulator drive the exact same debouncer, log format, recovery
// and scheduling code.

pub mod clock;
pub mod config;
pub mod counter;
pub mod debounce;
pub mod diagnostics;
pub mod meter;
pub mod record;
pub mod schedule;
pub mod status;
pub mod store;
pub mod usage_log;
