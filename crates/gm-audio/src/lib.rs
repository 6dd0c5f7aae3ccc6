//! gm-audio: Hardware driver interface for Gridmix
//!
//! The engine talks to low-latency audio hardware through the
//! [`DriverBridge`] contract: the driver delivers blocks in double-buffer
//! fashion, alternating between two equal halves of each channel's native
//! memory. This crate defines that contract, the native sample
//! conversions the bridge nodes use, and a full in-memory mock driver for
//! tests and driverless operation.

mod bridge;
mod error;
mod mock;
mod native;

pub use bridge::*;
pub use error::*;
pub use mock::*;
pub use native::*;
