//! ADB (Android Debug Bridge) module for device interaction.
//!
//! Talks to the ADB server directly over its TCP socket protocol; no `adb`
//! binary is spawned.

mod address;
mod client;
pub mod protocol;
mod status;

pub use address::{DeviceAddress, DEFAULT_DEVICE_PORT};
pub use client::{
    screenshot_file_name, split_output_lines, AdbClient, DEFAULT_ADB_HOST, DEFAULT_ADB_PORT,
};
pub use protocol::AdbError;
pub use status::{parse_device_list, DeviceStatus};
