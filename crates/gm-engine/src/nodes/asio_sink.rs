//! Driver-bridge sink node
//!
//! Holds the most recent input block and writes it into the driver's
//! outgoing half in native format. A block boundary with no fresh input
//! writes silence and reports an underrun (non-fatal).

use std::any::Any;

use gm_audio::{encode_channel, silence_channel, DriverBuffers};
use gm_core::{
    AudioBuffer, ChannelLayout, EngineError, EngineResult, SampleElement, SampleFormat,
};

use crate::node::{
    check_pad_buffer, ControlOutcome, GraphContext, Node, NodeParams, NodeState, NodeStatus,
};
use crate::nodes::{parse_channel_list, reject_unknown_params, StatusSlots};

pub struct AsioSinkNode {
    state: NodeState,
    ctx: Option<GraphContext>,
    format: Option<SampleFormat>,
    /// Driver output channel indices, in pad channel order.
    channels: Vec<usize>,
    latest: Option<AudioBuffer>,
    scratch: Vec<f32>,
    statuses: StatusSlots,
}

impl AsioSinkNode {
    pub fn new() -> Self {
        Self {
            state: NodeState::Unconfigured,
            ctx: None,
            format: None,
            channels: Vec::new(),
            latest: None,
            scratch: Vec::new(),
            statuses: StatusSlots::default(),
        }
    }

    /// Driver channels this node writes.
    pub fn driver_channels(&self) -> &[usize] {
        &self.channels
    }

    /// Driver-thread entry point: write the most recent input (or
    /// silence) into the outgoing half.
    pub fn produce_driver_block(&mut self, half: u32, buffers: &mut dyn DriverBuffers) {
        if self.state != NodeState::Running {
            return;
        }
        match self.latest.take() {
            Some(buf) => {
                for (pad_channel, &driver_channel) in self.channels.iter().enumerate() {
                    // Tail blocks cover fewer frames; the rest stays
                    // silent.
                    self.scratch.fill(0.0);
                    let _ = buf.copy_channel_into(pad_channel, &mut self.scratch);
                    if let Some(out) = buffers.output(driver_channel, half) {
                        encode_channel(&self.scratch, out.format, out.bytes);
                    }
                }
            }
            None => {
                for &driver_channel in &self.channels {
                    if let Some(out) = buffers.output(driver_channel, half) {
                        silence_channel(out.format, out.bytes);
                    }
                }
                self.statuses.push(NodeStatus::SinkUnderrun);
            }
        }
    }
}

impl Default for AsioSinkNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for AsioSinkNode {
    fn type_name(&self) -> &'static str {
        "asio_sink"
    }

    fn state(&self) -> NodeState {
        self.state
    }

    fn configure(&mut self, params: &NodeParams, ctx: &GraphContext) -> EngineResult<()> {
        self.state
            .ensure(&[NodeState::Unconfigured, NodeState::Stopped], "configure")?;
        reject_unknown_params("asio_sink", params, &["channels"])?;
        let channels = params
            .get("channels")
            .ok_or_else(|| EngineError::Config("asio_sink: missing 'channels'".into()))?;
        self.channels = parse_channel_list("asio_sink", channels)?;

        if ctx.format.element != SampleElement::F32 {
            return Err(EngineError::Config(format!(
                "asio_sink: unsupported internal element '{}'",
                ctx.format.element.name()
            )));
        }
        self.format = Some(SampleFormat::new(
            SampleElement::F32,
            ctx.format.layout,
            ChannelLayout::from_count(self.channels.len()),
        ));
        self.scratch = vec![0.0; ctx.block_frames];
        self.ctx = Some(ctx.clone());
        self.state = NodeState::Configured;
        Ok(())
    }

    fn start(&mut self) -> EngineResult<()> {
        if self.state == NodeState::Running {
            return Ok(());
        }
        self.state
            .ensure(&[NodeState::Configured, NodeState::Stopped], "start")?;
        self.state = NodeState::Running;
        Ok(())
    }

    fn process(&mut self) -> EngineResult<()> {
        // The sink's work happens in produce_driver_block; process only
        // validates lifecycle.
        self.state.ensure(&[NodeState::Running], "process")
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.state.ensure(&[NodeState::Running], "stop")?;
        self.latest = None;
        self.state = NodeState::Stopped;
        Ok(())
    }

    fn reset(&mut self) -> EngineResult<()> {
        self.state
            .ensure(&[NodeState::Configured, NodeState::Stopped], "reset")?;
        self.latest = None;
        self.statuses.clear();
        self.state = NodeState::Configured;
        Ok(())
    }

    fn input_count(&self) -> usize {
        1
    }

    fn output_count(&self) -> usize {
        0
    }

    fn input_format(&self, pad: usize) -> Option<SampleFormat> {
        (pad == 0).then(|| self.format.clone()).flatten()
    }

    fn output_format(&self, _pad: usize) -> Option<SampleFormat> {
        None
    }

    fn set_input(&mut self, buffer: AudioBuffer, pad: usize) -> EngineResult<()> {
        if pad != 0 {
            return Err(EngineError::FormatMismatch(format!(
                "asio_sink has no input pad {pad}"
            )));
        }
        self.state.ensure(&[NodeState::Running], "set_input")?;
        let (Some(format), Some(ctx)) = (self.format.as_ref(), self.ctx.as_ref()) else {
            return Err(EngineError::InvalidState("asio_sink unconfigured".into()));
        };
        check_pad_buffer(&buffer, format, ctx.sample_rate, ctx.block_frames)?;
        self.latest = Some(buffer);
        Ok(())
    }

    fn take_output(&mut self, _pad: usize) -> Option<AudioBuffer> {
        None
    }

    fn control_message(&mut self, _kind: &str, _params: &NodeParams) -> EngineResult<ControlOutcome> {
        Ok(ControlOutcome::Unhandled)
    }

    fn take_status(&mut self) -> Option<NodeStatus> {
        self.statuses.pop()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gm_audio::{DriverBridge, MockDriver, NativeSampleType};

    fn ctx() -> GraphContext {
        GraphContext {
            sample_rate: 48000,
            block_frames: 64,
            format: SampleFormat::planar_f32(ChannelLayout::stereo()),
        }
    }

    fn params(channels: &str) -> NodeParams {
        let mut p = NodeParams::new();
        p.insert("channels".into(), channels.into());
        p
    }

    fn ready_driver() -> MockDriver {
        let mut driver = MockDriver::new(0, 2, 48000, 64, NativeSampleType::S32Le);
        driver.load("mock").unwrap();
        driver.init(48000, 64).unwrap();
        driver.create_buffers(&[], &[0, 1]).unwrap();
        driver
    }

    #[test]
    fn test_input_round_trips_to_driver_half() {
        let mut driver = ready_driver();
        let mut node = AsioSinkNode::new();
        node.configure(&params("0,1"), &ctx()).unwrap();
        node.start().unwrap();

        let fmt = SampleFormat::planar_f32(ChannelLayout::stereo());
        let mut buf = AudioBuffer::new(64, 48000, fmt).unwrap();
        for c in 0..2 {
            let plane = buf.plane_f32_mut(c).unwrap();
            for (i, s) in plane.iter_mut().enumerate() {
                *s = (i as f32 / 64.0) * if c == 0 { 1.0 } else { -1.0 };
            }
        }
        node.set_input(buf, 0).unwrap();
        node.process().unwrap();

        let node = std::sync::Arc::new(parking_lot::Mutex::new(node));
        let node_cb = std::sync::Arc::clone(&node);
        driver.set_callback(Box::new(move |half, buffers| {
            node_cb.lock().produce_driver_block(half, buffers);
        }));
        driver.start().unwrap();
        driver.fire_block(1).unwrap();

        let left = driver.output_f32(0, 1).unwrap();
        let right = driver.output_f32(1, 1).unwrap();
        for i in 0..64 {
            assert!((left[i] - i as f32 / 64.0).abs() < 1e-6);
            assert!((right[i] + i as f32 / 64.0).abs() < 1e-6);
        }
        assert_eq!(node.lock().take_status(), None);
    }

    #[test]
    fn test_missing_input_writes_silence_and_reports() {
        let mut driver = ready_driver();
        // Prefill output with garbage so silence is observable.
        driver.set_callback(Box::new(|_, _| {}));

        let mut node = AsioSinkNode::new();
        node.configure(&params("0,1"), &ctx()).unwrap();
        node.start().unwrap();

        let node = std::sync::Arc::new(parking_lot::Mutex::new(node));
        let node_cb = std::sync::Arc::clone(&node);
        driver.set_callback(Box::new(move |half, buffers| {
            node_cb.lock().produce_driver_block(half, buffers);
        }));
        driver.start().unwrap();
        driver.fire_block(0).unwrap();

        let out = driver.output_f32(0, 0).unwrap();
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(node.lock().take_status(), Some(NodeStatus::SinkUnderrun));
    }

    #[test]
    fn test_set_input_rejects_wrong_format() {
        let mut node = AsioSinkNode::new();
        node.configure(&params("0,1"), &ctx()).unwrap();
        node.start().unwrap();

        let mono = SampleFormat::planar_f32(ChannelLayout::mono());
        let buf = AudioBuffer::new(64, 48000, mono).unwrap();
        let err = node.set_input(buf, 0).unwrap_err();
        assert!(matches!(err, EngineError::FormatMismatch(_)));
    }
}
