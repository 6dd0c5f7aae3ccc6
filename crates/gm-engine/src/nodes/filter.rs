//! Filter processor node
//!
//! Wraps a [`gm_dsp::FilterPipeline`] built from the
//! `filter_description` parameter. Each block, the input pad's buffer is
//! pushed through the pipeline and the pulled result deposited on the
//! output pad. Live updates arrive through `control_message` and apply
//! at the next block boundary.

use std::any::Any;

use gm_core::{AudioBuffer, BufferPool, EngineError, EngineResult, SampleElement, SampleFormat};
use gm_dsp::{FilterPipeline, Frame, PullStatus, UpdateOutcome};

use crate::node::{
    check_pad_buffer, ControlOutcome, GraphContext, Node, NodeParams, NodeState, NodeStatus,
};
use crate::nodes::StatusSlots;

pub struct FilterProcessorNode {
    state: NodeState,
    ctx: Option<GraphContext>,
    format: Option<SampleFormat>,
    pipeline: Option<FilterPipeline>,
    frame_in: Option<Frame>,
    frame_out: Option<Frame>,
    pool: Option<BufferPool>,
    input: Option<AudioBuffer>,
    out: Option<AudioBuffer>,
    statuses: StatusSlots,
}

impl FilterProcessorNode {
    pub fn new() -> Self {
        Self {
            state: NodeState::Unconfigured,
            ctx: None,
            format: None,
            pipeline: None,
            frame_in: None,
            frame_out: None,
            pool: None,
            input: None,
            out: None,
            statuses: StatusSlots::default(),
        }
    }
}

impl Default for FilterProcessorNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for FilterProcessorNode {
    fn type_name(&self) -> &'static str {
        "filter_processor"
    }

    fn state(&self) -> NodeState {
        self.state
    }

    fn configure(&mut self, params: &NodeParams, ctx: &GraphContext) -> EngineResult<()> {
        self.state
            .ensure(&[NodeState::Unconfigured, NodeState::Stopped], "configure")?;
        let description = params.get("filter_description").ok_or_else(|| {
            EngineError::Config("filter_processor: missing 'filter_description'".into())
        })?;
        if ctx.format.element != SampleElement::F32 {
            return Err(EngineError::Config(format!(
                "filter_processor: unsupported internal element '{}'",
                ctx.format.element.name()
            )));
        }

        let channels = ctx.format.channel_count();
        let mut pipeline =
            FilterPipeline::parse(description, ctx.sample_rate, channels, ctx.block_frames)?;

        // Remaining parameters are initial sub-filter values keyed
        // `<label>.<param>`.
        for (key, value) in params {
            if key == "filter_description" {
                continue;
            }
            let Some((label, param)) = key.split_once('.') else {
                return Err(EngineError::Config(format!(
                    "filter_processor: unknown parameter '{key}'"
                )));
            };
            match pipeline.set_parameter_immediate(label, param, value)? {
                UpdateOutcome::UnknownFilter => {
                    return Err(EngineError::Config(format!(
                        "filter_processor: no sub-filter '{label}'"
                    )));
                }
                UpdateOutcome::Applied | UpdateOutcome::Queued => {}
            }
        }

        self.frame_in = Some(Frame::new(channels, ctx.block_frames, ctx.sample_rate));
        self.frame_out = Some(Frame::new(channels, ctx.block_frames, ctx.sample_rate));
        self.pool = Some(BufferPool::new(
            crate::nodes::POOL_SLOTS,
            ctx.block_frames,
            ctx.sample_rate,
            &ctx.format,
        )?);
        self.pipeline = Some(pipeline);
        self.format = Some(ctx.format.clone());
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
            // Upstream produced nothing this block; neither do we.
            self.out = None;
            return Ok(());
        };

        let (Some(pipeline), Some(frame_in), Some(frame_out), Some(pool), Some(ctx)) = (
            self.pipeline.as_mut(),
            self.frame_in.as_mut(),
            self.frame_out.as_mut(),
            self.pool.as_mut(),
            self.ctx.as_ref(),
        ) else {
            return Err(EngineError::InvalidState("filter_processor unconfigured".into()));
        };

        frame_in.copy_from_buffer(&buffer)?;
        drop(buffer);
        pipeline.push_frame(frame_in)?;

        match pipeline.pull_frame(frame_out) {
            PullStatus::Ready => {
                let frames = frame_out.len();
                if frames == ctx.block_frames {
                    match pool.acquire() {
                        Some(slot) => {
                            frame_out.write_to_buffer(slot)?;
                            self.out = Some(slot.share());
                        }
                        None => {
                            self.statuses.push(NodeStatus::PoolExhausted);
                            let mut fresh = AudioBuffer::new(
                                frames,
                                ctx.sample_rate,
                                self.format.clone().expect("configured"),
                            )?;
                            frame_out.write_to_buffer(&mut fresh)?;
                            self.out = Some(fresh);
                        }
                    }
                } else {
                    // Tail block: exact-size buffer off the steady path.
                    let mut fresh = AudioBuffer::new(
                        frames,
                        ctx.sample_rate,
                        self.format.clone().expect("configured"),
                    )?;
                    frame_out.write_to_buffer(&mut fresh)?;
                    self.out = Some(fresh);
                }
            }
            PullStatus::NeedMore => {
                self.out = None;
            }
            PullStatus::Eos => {
                self.out = None;
                self.statuses.push(NodeStatus::EndOfStream);
                self.state = NodeState::Stopped;
            }
        }
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
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.reset();
        }
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
        (pad == 0).then(|| self.format.clone()).flatten()
    }

    fn output_format(&self, pad: usize) -> Option<SampleFormat> {
        (pad == 0).then(|| self.format.clone()).flatten()
    }

    fn set_input(&mut self, buffer: AudioBuffer, pad: usize) -> EngineResult<()> {
        if pad != 0 {
            return Err(EngineError::FormatMismatch(format!(
                "filter_processor has no input pad {pad}"
            )));
        }
        self.state.ensure(&[NodeState::Running], "set_input")?;
        let (Some(format), Some(ctx)) = (self.format.as_ref(), self.ctx.as_ref()) else {
            return Err(EngineError::InvalidState(
                "filter_processor unconfigured".into(),
            ));
        };
        check_pad_buffer(&buffer, format, ctx.sample_rate, ctx.block_frames)?;
        self.input = Some(buffer);
        Ok(())
    }

    fn take_output(&mut self, pad: usize) -> Option<AudioBuffer> {
        (pad == 0).then(|| self.out.take()).flatten()
    }

    fn control_message(&mut self, kind: &str, params: &NodeParams) -> EngineResult<ControlOutcome> {
        if kind != "update" {
            return Ok(ControlOutcome::Unhandled);
        }
        let pipeline = self
            .pipeline
            .as_mut()
            .ok_or_else(|| EngineError::InvalidState("filter_processor unconfigured".into()))?;
        let filter = params
            .get("filter")
            .ok_or_else(|| EngineError::Config("update: missing 'filter'".into()))?;
        let param = params
            .get("param")
            .ok_or_else(|| EngineError::Config("update: missing 'param'".into()))?;
        let value = params
            .get("value")
            .ok_or_else(|| EngineError::Config("update: missing 'value'".into()))?;
        match pipeline.update_parameter(filter, param, value)? {
            UpdateOutcome::Queued | UpdateOutcome::Applied => Ok(ControlOutcome::Handled),
            UpdateOutcome::UnknownFilter => Err(EngineError::Config(format!(
                "update: no sub-filter '{filter}'"
            ))),
        }
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
    use gm_core::ChannelLayout;

    fn ctx() -> GraphContext {
        GraphContext {
            sample_rate: 48000,
            block_frames: 512,
            format: SampleFormat::planar_f32(ChannelLayout::stereo()),
        }
    }

    fn configured(description: &str) -> FilterProcessorNode {
        let mut node = FilterProcessorNode::new();
        let mut params = NodeParams::new();
        params.insert("filter_description".into(), description.into());
        node.configure(&params, &ctx()).unwrap();
        node
    }

    fn dc_block(value: f32) -> AudioBuffer {
        let fmt = SampleFormat::planar_f32(ChannelLayout::stereo());
        let mut buf = AudioBuffer::new(512, 48000, fmt).unwrap();
        for c in 0..2 {
            buf.plane_f32_mut(c).unwrap().fill(value);
        }
        buf
    }

    #[test]
    fn test_volume_half() {
        let mut node = configured("volume=0.5");
        node.start().unwrap();
        node.set_input(dc_block(0.8), 0).unwrap();
        node.process().unwrap();
        let out = node.take_output(0).unwrap();
        assert!((out.plane_f32(0).unwrap()[100] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_no_input_yields_no_output() {
        let mut node = configured("volume=1.0");
        node.start().unwrap();
        node.process().unwrap();
        assert!(node.take_output(0).is_none());
    }

    #[test]
    fn test_initial_subfilter_params() {
        let mut node = FilterProcessorNode::new();
        let mut params = NodeParams::new();
        params.insert("filter_description".into(), "eq@low f=120, volume@v".into());
        params.insert("v.g".into(), "0.25".into());
        node.configure(&params, &ctx()).unwrap();
        node.start().unwrap();
        node.set_input(dc_block(1.0), 0).unwrap();
        node.process().unwrap();
        let out = node.take_output(0).unwrap();
        // The eq at 120 Hz barely touches DC settling; the volume
        // dominates.
        assert!((out.plane_f32(0).unwrap()[511] - 0.25).abs() < 0.1);
    }

    #[test]
    fn test_configure_rejects_bad_params() {
        let mut node = FilterProcessorNode::new();
        assert!(node.configure(&NodeParams::new(), &ctx()).is_err());

        let mut params = NodeParams::new();
        params.insert("filter_description".into(), "volume=0.5".into());
        params.insert("nosuch.g".into(), "1".into());
        assert!(node.configure(&params, &ctx()).is_err());
    }

    #[test]
    fn test_live_update_applies_next_block() {
        let mut node = configured("volume@main g=1.0");
        node.start().unwrap();

        node.set_input(dc_block(0.5), 0).unwrap();
        node.process().unwrap();
        let first = node.take_output(0).unwrap();
        assert!((first.plane_f32(0).unwrap()[511] - 0.5).abs() < 1e-6);

        let mut update = NodeParams::new();
        update.insert("filter".into(), "main".into());
        update.insert("param".into(), "g".into());
        update.insert("value".into(), "0.5".into());
        assert_eq!(
            node.control_message("update", &update).unwrap(),
            ControlOutcome::Handled
        );

        // One block of transition latency is allowed; by block end the
        // ramp has settled.
        node.set_input(dc_block(0.5), 0).unwrap();
        node.process().unwrap();
        let second = node.take_output(0).unwrap();
        assert!((second.plane_f32(0).unwrap()[511] - 0.25).abs() < 1e-3);

        update.insert("filter".into(), "ghost".into());
        assert!(node.control_message("update", &update).is_err());

        assert_eq!(
            node.control_message("ping", &NodeParams::new()).unwrap(),
            ControlOutcome::Unhandled
        );
    }

    #[test]
    fn test_tail_block_passes_through() {
        let mut node = configured("volume=1.0");
        node.start().unwrap();
        let fmt = SampleFormat::planar_f32(ChannelLayout::stereo());
        let tail = AudioBuffer::new(100, 48000, fmt).unwrap();
        node.set_input(tail, 0).unwrap();
        node.process().unwrap();
        let out = node.take_output(0).unwrap();
        assert_eq!(out.frames(), 100);
    }
}
