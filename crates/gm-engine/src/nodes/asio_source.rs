//! Driver-bridge source node
//!
//! Converts native driver samples into internal-format buffers. The
//! driver thread deposits each half into a recycled pool buffer via
//! [`AsioSourceNode::accept_driver_block`]; `process()` promotes the
//! deposited block to the output pad. Both run on the same thread when a
//! hardware driver is active, so the handoff is a plain field swap.

use std::any::Any;

use gm_audio::{decode_channel, DriverBuffers};
use gm_core::{
    AudioBuffer, BufferPool, ChannelLayout, EngineError, EngineResult, SampleElement, SampleFormat,
};

use crate::node::{ControlOutcome, GraphContext, Node, NodeParams, NodeState, NodeStatus};
use crate::nodes::{parse_channel_list, reject_unknown_params, StatusSlots, POOL_SLOTS};

pub struct AsioSourceNode {
    state: NodeState,
    ctx: Option<GraphContext>,
    format: Option<SampleFormat>,
    /// Driver input channel indices, in pad channel order.
    channels: Vec<usize>,
    pool: Option<BufferPool>,
    scratch: Vec<f32>,
    /// Block deposited by the driver thread, awaiting `process()`.
    pending: Option<AudioBuffer>,
    out: Option<AudioBuffer>,
    silence: Option<AudioBuffer>,
    statuses: StatusSlots,
}

impl AsioSourceNode {
    pub fn new() -> Self {
        Self {
            state: NodeState::Unconfigured,
            ctx: None,
            format: None,
            channels: Vec::new(),
            pool: None,
            scratch: Vec::new(),
            pending: None,
            out: None,
            silence: None,
            statuses: StatusSlots::default(),
        }
    }

    /// Driver channels this node reads.
    pub fn driver_channels(&self) -> &[usize] {
        &self.channels
    }

    /// Driver-thread entry point: convert the current half into an
    /// internal buffer.
    pub fn accept_driver_block(&mut self, half: u32, buffers: &mut dyn DriverBuffers) {
        if self.state != NodeState::Running {
            return;
        }
        let (Some(pool), Some(ctx)) = (self.pool.as_mut(), self.ctx.as_ref()) else {
            return;
        };
        let frames = ctx.block_frames;

        let mut fallback;
        let slot = match pool.acquire() {
            Some(slot) => slot,
            None => {
                // Downstream is holding every pool slot; allocate off
                // the steady path rather than overwrite shared memory.
                self.statuses.push(NodeStatus::PoolExhausted);
                let Some(format) = self.format.clone() else {
                    return;
                };
                match AudioBuffer::new(frames, ctx.sample_rate, format) {
                    Ok(buf) => {
                        fallback = buf;
                        &mut fallback
                    }
                    Err(_) => return,
                }
            }
        };

        for (pad_channel, &driver_channel) in self.channels.iter().enumerate() {
            match buffers.input(driver_channel, half) {
                Some(native) => {
                    decode_channel(native.bytes, native.format, &mut self.scratch[..frames]);
                }
                None => self.scratch[..frames].fill(0.0),
            }
            let _ = slot.copy_into_channel(pad_channel, &self.scratch[..frames]);
        }
        self.pending = Some(slot.share());
    }
}

impl Default for AsioSourceNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for AsioSourceNode {
    fn type_name(&self) -> &'static str {
        "asio_source"
    }

    fn state(&self) -> NodeState {
        self.state
    }

    fn configure(&mut self, params: &NodeParams, ctx: &GraphContext) -> EngineResult<()> {
        self.state
            .ensure(&[NodeState::Unconfigured, NodeState::Stopped], "configure")?;
        reject_unknown_params("asio_source", params, &["channels"])?;
        let channels = params
            .get("channels")
            .ok_or_else(|| EngineError::Config("asio_source: missing 'channels'".into()))?;
        self.channels = parse_channel_list("asio_source", channels)?;

        if ctx.format.element != SampleElement::F32 {
            return Err(EngineError::Config(format!(
                "asio_source: unsupported internal element '{}'",
                ctx.format.element.name()
            )));
        }
        let format = SampleFormat::new(
            SampleElement::F32,
            ctx.format.layout,
            ChannelLayout::from_count(self.channels.len()),
        );

        self.pool = Some(BufferPool::new(
            POOL_SLOTS,
            ctx.block_frames,
            ctx.sample_rate,
            &format,
        )?);
        self.silence = Some(AudioBuffer::new(
            ctx.block_frames,
            ctx.sample_rate,
            format.clone(),
        )?);
        self.scratch = vec![0.0; ctx.block_frames];
        self.format = Some(format);
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
        self.state.ensure(&[NodeState::Running], "process")?;
        self.out = match self.pending.take() {
            Some(buf) => Some(buf),
            None => {
                // No driver block arrived since the last process pass.
                self.statuses.push(NodeStatus::SourceUnderrun);
                self.silence.as_ref().map(AudioBuffer::share)
            }
        };
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.state.ensure(&[NodeState::Running], "stop")?;
        self.pending = None;
        self.out = None;
        self.state = NodeState::Stopped;
        Ok(())
    }

    fn reset(&mut self) -> EngineResult<()> {
        self.state
            .ensure(&[NodeState::Configured, NodeState::Stopped], "reset")?;
        self.pending = None;
        self.out = None;
        self.statuses.clear();
        self.state = NodeState::Configured;
        Ok(())
    }

    fn input_count(&self) -> usize {
        0
    }

    fn output_count(&self) -> usize {
        1
    }

    fn input_format(&self, _pad: usize) -> Option<SampleFormat> {
        None
    }

    fn output_format(&self, pad: usize) -> Option<SampleFormat> {
        (pad == 0).then(|| self.format.clone()).flatten()
    }

    fn set_input(&mut self, _buffer: AudioBuffer, pad: usize) -> EngineResult<()> {
        Err(EngineError::FormatMismatch(format!(
            "asio_source has no input pad {pad}"
        )))
    }

    fn take_output(&mut self, pad: usize) -> Option<AudioBuffer> {
        (pad == 0).then(|| self.out.take()).flatten()
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
