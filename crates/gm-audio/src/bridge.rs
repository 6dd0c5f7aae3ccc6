//! The driver bridge contract
//!
//! A [`DriverBridge`] abstracts one piece of audio hardware: it
//! negotiates sample rate and block size, owns the double-buffered native
//! channel memory, and invokes the block callback with the half index
//! that just became available. The callback borrows channel memory
//! through [`DriverBuffers`], so no copies or allocations happen on the
//! way in or out.

use std::any::Any;

use crate::error::DriverResult;
use crate::native::NativeSampleType;

/// Channel direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverDirection {
    Input,
    Output,
}

/// Borrowed view of one native input channel half
pub struct NativeChannel<'a> {
    pub channel: usize,
    pub format: NativeSampleType,
    pub bytes: &'a [u8],
}

/// Borrowed writable view of one native output channel half
pub struct NativeChannelMut<'a> {
    pub channel: usize,
    pub format: NativeSampleType,
    pub bytes: &'a mut [u8],
}

/// Access to the driver's double-buffer halves during one callback.
///
/// `channel` indices are the driver's own channel numbering; only
/// channels opened through `create_buffers` resolve.
pub trait DriverBuffers {
    fn input(&self, channel: usize, half: u32) -> Option<NativeChannel<'_>>;
    fn output(&mut self, channel: usize, half: u32) -> Option<NativeChannelMut<'_>>;
}

/// Block callback: half index plus the buffers for that block.
pub type DriverCallback = Box<dyn FnMut(u32, &mut dyn DriverBuffers) + Send + 'static>;

/// Contract every hardware backend implements.
///
/// Call order: `load` → `init` → `create_buffers` → `set_callback` →
/// `start` → ... → `stop`.
pub trait DriverBridge: Send {
    /// Bind to a device by name.
    fn load(&mut self, device: &str) -> DriverResult<()>;

    /// Negotiate sample rate and block size; returns what the hardware
    /// actually granted.
    fn init(&mut self, preferred_rate: u32, preferred_block: usize) -> DriverResult<(u32, usize)>;

    /// Total (input, output) channel counts of the device.
    fn channel_counts(&self) -> (usize, usize);

    /// Native sample descriptor of one channel.
    fn channel_format(
        &self,
        dir: DriverDirection,
        channel: usize,
    ) -> DriverResult<NativeSampleType>;

    /// Allocate double-buffer halves for the listed channels.
    fn create_buffers(&mut self, in_channels: &[usize], out_channels: &[usize])
        -> DriverResult<()>;

    /// Install the block callback.
    fn set_callback(&mut self, callback: DriverCallback);

    fn start(&mut self) -> DriverResult<()>;

    fn stop(&mut self) -> DriverResult<()>;

    /// Downcast seam (mock drivers in tests, backend-specific control).
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
