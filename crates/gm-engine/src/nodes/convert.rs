//! Implicit format conversion node
//!
//! Inserted by the engine during initialization when a connection's pad
//! formats disagree and `allow_format_convert` is set. Converts element
//! type and plane layout; the channel count and rate must already match.

use std::any::Any;

use gm_core::{
    AudioBuffer, BufferPool, EngineError, EngineResult, SampleElement, SampleFormat, SampleLayout,
};

use crate::node::{
    check_pad_buffer, ControlOutcome, GraphContext, Node, NodeParams, NodeState, NodeStatus,
};
use crate::nodes::{reject_unknown_params, StatusSlots, POOL_SLOTS};

pub struct ConvertNode {
    state: NodeState,
    ctx: Option<GraphContext>,
    in_format: SampleFormat,
    out_format: SampleFormat,
    pool: Option<BufferPool>,
    scratch: Vec<f32>,
    input: Option<AudioBuffer>,
    out: Option<AudioBuffer>,
    statuses: StatusSlots,
}

impl ConvertNode {
    /// A converter between two concrete pad formats.
    pub fn between(in_format: SampleFormat, out_format: SampleFormat) -> Self {
        Self {
            state: NodeState::Unconfigured,
            ctx: None,
            in_format,
            out_format,
            pool: None,
            scratch: Vec::new(),
            input: None,
            out: None,
            statuses: StatusSlots::default(),
        }
    }
}

/// Read channel `c` of any supported element as f32.
fn read_channel(buffer: &AudioBuffer, c: usize, out: &mut [f32]) -> EngineResult<()> {
    let format = buffer.format();
    let channels = format.channel_count();
    let elem = format.element;
    let (plane_idx, offset, stride) = match format.layout {
        SampleLayout::Planar => (c, 0usize, 1usize),
        SampleLayout::Interleaved => (0, c, channels),
    };
    let bytes = buffer.plane(plane_idx)?;
    let size = elem.bytes();
    for (i, dst) in out.iter_mut().enumerate().take(buffer.frames()) {
        let at = (offset + i * stride) * size;
        *dst = match elem {
            SampleElement::U8 => (bytes[at] as f32 - 128.0) / 128.0,
            SampleElement::S16 => {
                i16::from_ne_bytes([bytes[at], bytes[at + 1]]) as f32 / 32768.0
            }
            SampleElement::S32 => {
                i32::from_ne_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
                    as f32
                    / 2147483648.0
            }
            SampleElement::F32 => {
                f32::from_ne_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
            }
            SampleElement::F64 => f64::from_ne_bytes([
                bytes[at],
                bytes[at + 1],
                bytes[at + 2],
                bytes[at + 3],
                bytes[at + 4],
                bytes[at + 5],
                bytes[at + 6],
                bytes[at + 7],
            ]) as f32,
        };
    }
    Ok(())
}

/// Write f32 samples into channel `c` of any supported element.
fn write_channel(buffer: &mut AudioBuffer, c: usize, samples: &[f32]) -> EngineResult<()> {
    let format = buffer.format().clone();
    let channels = format.channel_count();
    let elem = format.element;
    let frames = buffer.frames();
    let (plane_idx, offset, stride) = match format.layout {
        SampleLayout::Planar => (c, 0usize, 1usize),
        SampleLayout::Interleaved => (0, c, channels),
    };
    let bytes = buffer.plane_mut(plane_idx)?;
    let size = elem.bytes();
    for (i, &sample) in samples.iter().enumerate().take(frames) {
        let clamped = sample.clamp(-1.0, 1.0);
        let at = (offset + i * stride) * size;
        match elem {
            SampleElement::U8 => {
                bytes[at] = (clamped * 127.0 + 128.0) as u8;
            }
            SampleElement::S16 => {
                bytes[at..at + 2].copy_from_slice(&((clamped * 32767.0) as i16).to_ne_bytes());
            }
            SampleElement::S32 => {
                bytes[at..at + 4]
                    .copy_from_slice(&((clamped * 2147483647.0) as i32).to_ne_bytes());
            }
            SampleElement::F32 => {
                bytes[at..at + 4].copy_from_slice(&sample.to_ne_bytes());
            }
            SampleElement::F64 => {
                bytes[at..at + 8].copy_from_slice(&(sample as f64).to_ne_bytes());
            }
        }
    }
    Ok(())
}

impl Node for ConvertNode {
    fn type_name(&self) -> &'static str {
        "convert"
    }

    fn state(&self) -> NodeState {
        self.state
    }

    fn configure(&mut self, params: &NodeParams, ctx: &GraphContext) -> EngineResult<()> {
        self.state
            .ensure(&[NodeState::Unconfigured, NodeState::Stopped], "configure")?;
        reject_unknown_params("convert", params, &[])?;
        if self.in_format.channel_count() != self.out_format.channel_count() {
            return Err(EngineError::FormatMismatch(format!(
                "convert cannot change channel count ({} vs {})",
                self.in_format.channel_count(),
                self.out_format.channel_count()
            )));
        }
        self.pool = Some(BufferPool::new(
            POOL_SLOTS,
            ctx.block_frames,
            ctx.sample_rate,
            &self.out_format,
        )?);
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
        self.state.ensure(&[NodeState::Running], "process")?;
        let Some(buffer) = self.input.take() else {
            self.out = None;
            return Ok(());
        };
        let (Some(pool), Some(ctx)) = (self.pool.as_mut(), self.ctx.as_ref()) else {
            return Err(EngineError::InvalidState("convert unconfigured".into()));
        };
        let frames = buffer.frames();
        let channels = self.out_format.channel_count();

        let mut fallback;
        let slot = if frames == ctx.block_frames {
            match pool.acquire() {
                Some(slot) => slot,
                None => {
                    self.statuses.push(NodeStatus::PoolExhausted);
                    fallback =
                        AudioBuffer::new(frames, ctx.sample_rate, self.out_format.clone())?;
                    &mut fallback
                }
            }
        } else {
            fallback = AudioBuffer::new(frames, ctx.sample_rate, self.out_format.clone())?;
            &mut fallback
        };

        for c in 0..channels {
            read_channel(&buffer, c, &mut self.scratch[..frames])?;
            write_channel(slot, c, &self.scratch[..frames])?;
        }
        self.out = Some(slot.share());
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.state.ensure(&[NodeState::Running], "stop")?;
        self.input = None;
        self.out = None;
        self.state = NodeState::Stopped;
        Ok(())
    }

    fn reset(&mut self) -> EngineResult<()> {
        self.state
            .ensure(&[NodeState::Configured, NodeState::Stopped], "reset")?;
        self.input = None;
        self.out = None;
        self.statuses.clear();
        self.state = NodeState::Configured;
        Ok(())
    }

    fn input_count(&self) -> usize {
        1
    }

    fn output_count(&self) -> usize {
        1
    }

    fn input_format(&self, pad: usize) -> Option<SampleFormat> {
        (pad == 0).then(|| self.in_format.clone())
    }

    fn output_format(&self, pad: usize) -> Option<SampleFormat> {
        (pad == 0).then(|| self.out_format.clone())
    }

    fn set_input(&mut self, buffer: AudioBuffer, pad: usize) -> EngineResult<()> {
        if pad != 0 {
            return Err(EngineError::FormatMismatch(format!(
                "convert has no input pad {pad}"
            )));
        }
        self.state.ensure(&[NodeState::Running], "set_input")?;
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| EngineError::InvalidState("convert unconfigured".into()))?;
        check_pad_buffer(&buffer, &self.in_format, ctx.sample_rate, ctx.block_frames)?;
        self.input = Some(buffer);
        Ok(())
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
