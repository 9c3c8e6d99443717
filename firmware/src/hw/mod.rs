//! Board wiring for the STM32G0B1 meter node.
//!
//! The reed switch pulls PA0 to ground while the magnet is near; the pin
//! uses the internal pull-up. The usage log lives in the upper half of the
//! 512 KiB flash, well clear of the firmware image.

pub mod rtc;

/// Start of the file store, relative to the flash base.
pub const STORE_PARTITION_OFFSET: u32 = 256 * 1024;
/// Length of the file store partition.
pub const STORE_PARTITION_LEN: u32 = 256 * 1024;
