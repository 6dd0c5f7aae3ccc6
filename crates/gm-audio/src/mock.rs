//! In-memory mock driver
//!
//! Implements the full [`DriverBridge`] contract over heap-allocated
//! double buffers. Tests prefill input halves, fire blocks synchronously
//! and inspect output halves; no hardware or platform API involved.

use std::any::Any;

use crate::bridge::{
    DriverBridge, DriverBuffers, DriverCallback, DriverDirection, NativeChannel, NativeChannelMut,
};
use crate::error::{DriverError, DriverResult};
use crate::native::{decode_channel, encode_channel, NativeSampleType};

struct MockChannel {
    channel: usize,
    halves: [Vec<u8>; 2],
}

/// Double-buffer memory of an opened mock device
pub struct MockBuffers {
    format: NativeSampleType,
    inputs: Vec<MockChannel>,
    outputs: Vec<MockChannel>,
}

impl MockBuffers {
    fn empty(format: NativeSampleType) -> Self {
        Self {
            format,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl DriverBuffers for MockBuffers {
    fn input(&self, channel: usize, half: u32) -> Option<NativeChannel<'_>> {
        let ch = self.inputs.iter().find(|c| c.channel == channel)?;
        Some(NativeChannel {
            channel,
            format: self.format,
            bytes: &ch.halves[(half & 1) as usize],
        })
    }

    fn output(&mut self, channel: usize, half: u32) -> Option<NativeChannelMut<'_>> {
        let format = self.format;
        let ch = self.outputs.iter_mut().find(|c| c.channel == channel)?;
        Some(NativeChannelMut {
            channel,
            format,
            bytes: &mut ch.halves[(half & 1) as usize],
        })
    }
}

/// Mock hardware driver with prefillable inputs and inspectable outputs
pub struct MockDriver {
    device: Option<String>,
    format: NativeSampleType,
    in_count: usize,
    out_count: usize,
    sample_rate: u32,
    block_frames: usize,
    buffers: MockBuffers,
    callback: Option<DriverCallback>,
    running: bool,
}

impl MockDriver {
    pub fn new(
        in_count: usize,
        out_count: usize,
        sample_rate: u32,
        block_frames: usize,
        format: NativeSampleType,
    ) -> Self {
        Self {
            device: None,
            format,
            in_count,
            out_count,
            sample_rate,
            block_frames,
            buffers: MockBuffers::empty(format),
            callback: None,
            running: false,
        }
    }

    /// Invoke the callback for one half, as the hardware would.
    pub fn fire_block(&mut self, half: u32) -> DriverResult<()> {
        if !self.running {
            return Err(DriverError::NotRunning);
        }
        let callback = self.callback.as_mut().ok_or(DriverError::NoBuffers)?;
        callback(half, &mut self.buffers);
        Ok(())
    }

    /// Prefill an input channel half with samples.
    pub fn fill_input_f32(&mut self, channel: usize, half: u32, samples: &[f32]) -> DriverResult<()> {
        let ch = self
            .buffers
            .inputs
            .iter_mut()
            .find(|c| c.channel == channel)
            .ok_or(DriverError::NoSuchChannel {
                dir: "input",
                channel,
            })?;
        encode_channel(samples, self.format, &mut ch.halves[(half & 1) as usize]);
        Ok(())
    }

    /// Read back an output channel half as samples.
    pub fn output_f32(&self, channel: usize, half: u32) -> DriverResult<Vec<f32>> {
        let ch = self
            .buffers
            .outputs
            .iter()
            .find(|c| c.channel == channel)
            .ok_or(DriverError::NoSuchChannel {
                dir: "output",
                channel,
            })?;
        let mut out = vec![0.0; self.block_frames];
        decode_channel(&ch.halves[(half & 1) as usize], self.format, &mut out);
        Ok(out)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl DriverBridge for MockDriver {
    fn load(&mut self, device: &str) -> DriverResult<()> {
        self.device = Some(device.to_string());
        Ok(())
    }

    fn init(&mut self, preferred_rate: u32, preferred_block: usize) -> DriverResult<(u32, usize)> {
        if self.device.is_none() {
            return Err(DriverError::NotLoaded);
        }
        // The mock grants whatever was asked unless constructed with
        // explicit values, mirroring a driver that negotiates.
        if preferred_rate != 0 {
            self.sample_rate = preferred_rate;
        }
        if preferred_block != 0 {
            self.block_frames = preferred_block;
        }
        Ok((self.sample_rate, self.block_frames))
    }

    fn channel_counts(&self) -> (usize, usize) {
        (self.in_count, self.out_count)
    }

    fn channel_format(
        &self,
        dir: DriverDirection,
        channel: usize,
    ) -> DriverResult<NativeSampleType> {
        let count = match dir {
            DriverDirection::Input => self.in_count,
            DriverDirection::Output => self.out_count,
        };
        if channel >= count {
            return Err(DriverError::NoSuchChannel {
                dir: match dir {
                    DriverDirection::Input => "input",
                    DriverDirection::Output => "output",
                },
                channel,
            });
        }
        Ok(self.format)
    }

    fn create_buffers(
        &mut self,
        in_channels: &[usize],
        out_channels: &[usize],
    ) -> DriverResult<()> {
        for &ch in in_channels {
            if ch >= self.in_count {
                return Err(DriverError::NoSuchChannel {
                    dir: "input",
                    channel: ch,
                });
            }
        }
        for &ch in out_channels {
            if ch >= self.out_count {
                return Err(DriverError::NoSuchChannel {
                    dir: "output",
                    channel: ch,
                });
            }
        }
        let half_len = self.block_frames * self.format.bytes();
        let make = |channel: usize| MockChannel {
            channel,
            halves: [vec![0u8; half_len], vec![0u8; half_len]],
        };
        self.buffers = MockBuffers {
            format: self.format,
            inputs: in_channels.iter().copied().map(make).collect(),
            outputs: out_channels.iter().copied().map(make).collect(),
        };
        Ok(())
    }

    fn set_callback(&mut self, callback: DriverCallback) {
        self.callback = Some(callback);
    }

    fn start(&mut self) -> DriverResult<()> {
        if self.device.is_none() {
            return Err(DriverError::NotLoaded);
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> DriverResult<()> {
        self.running = false;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
