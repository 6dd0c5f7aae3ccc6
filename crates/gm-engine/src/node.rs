//! The node contract
//!
//! Every processing stage in the graph is a [`Node`]: configured from
//! string parameters, advanced one block per `process()`, exchanging
//! [`AudioBuffer`] handles through its pads. The lifecycle is a strict
//! state machine; operations outside their legal states fail with
//! `InvalidState`.

use std::any::Any;
use std::collections::BTreeMap;

use gm_core::{AudioBuffer, EngineError, EngineResult, SampleFormat};

/// Node configuration parameters: string key/value pairs from the
/// configuration object. Ordered map so error reporting is
/// deterministic.
pub type NodeParams = BTreeMap<String, String>;

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unconfigured,
    Configured,
    Running,
    Stopped,
}

impl NodeState {
    /// Guard an operation against the states it is legal in.
    pub fn ensure(self, allowed: &[NodeState], op: &str) -> EngineResult<()> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(EngineError::InvalidState(format!(
                "{op} not legal in state {self:?}"
            )))
        }
    }
}

/// Per-node processing context fixed at engine initialization.
///
/// `format` carries the engine's internal element and layout with the
/// channel layout resolved for this node (sources derive it from their
/// own parameters, downstream nodes inherit it from their upstream pad).
#[derive(Debug, Clone)]
pub struct GraphContext {
    pub sample_rate: u32,
    pub block_frames: usize,
    pub format: SampleFormat,
}

/// Result of a control message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Handled,
    Unhandled,
}

/// Compact status record a node leaves for the engine to collect.
///
/// Process-path statuses must not allocate, so the payload is just a
/// discriminant; the reporter thread attaches node name and prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// A source's queue was empty at process time; silence substituted.
    SourceUnderrun,
    /// A sink had no input since the previous driver block.
    SinkUnderrun,
    /// A full writer queue dropped its oldest block.
    QueueOverrun,
    /// Output buffer pool exhausted; fell back to allocation.
    PoolExhausted,
    /// The node's worker thread failed; silence until reset.
    WorkerFailed,
    /// `process()` returned an error; the block completed without this
    /// node's output.
    ProcessFailed,
    /// A pad transfer was rejected mid-block.
    TransferFailed,
    /// A worker missed the join deadline on stop.
    StopTimeout,
    /// Queued blocks were dropped when the flush deadline passed.
    FlushDropped,
    /// The node reached end of stream.
    EndOfStream,
}

/// Polymorphic audio graph node
pub trait Node: Send {
    /// Registry type string (`"asio_source"`, `"file_sink"`, ...)
    fn type_name(&self) -> &'static str;

    fn state(&self) -> NodeState;

    /// Validate parameters and allocate internal buffers. Legal from
    /// Unconfigured or Stopped. Unknown parameter keys are errors unless
    /// a node documents them as ignored.
    fn configure(&mut self, params: &NodeParams, ctx: &GraphContext) -> EngineResult<()>;

    /// Transition to Running. Legal from Configured or Stopped;
    /// idempotent when already Running.
    fn start(&mut self) -> EngineResult<()>;

    /// Advance one block. Legal only in Running. Must not allocate or
    /// block on contended locks: this runs on the realtime path.
    fn process(&mut self) -> EngineResult<()>;

    /// Transition to Stopped, releasing runtime resources but keeping
    /// configuration.
    fn stop(&mut self) -> EngineResult<()>;

    /// Clear internal state (DSP memory, queues) without changing
    /// configuration. Legal from Configured or Stopped; returns the
    /// node to Configured.
    fn reset(&mut self) -> EngineResult<()>;

    fn input_count(&self) -> usize;

    fn output_count(&self) -> usize;

    /// Format of input pad `pad`, once configured.
    fn input_format(&self, pad: usize) -> Option<SampleFormat>;

    /// Format of output pad `pad`, once configured.
    fn output_format(&self, pad: usize) -> Option<SampleFormat>;

    /// Hand an input buffer to pad `pad` (ownership transfer).
    fn set_input(&mut self, buffer: AudioBuffer, pad: usize) -> EngineResult<()>;

    /// Take this block's output from pad `pad`, if any.
    fn take_output(&mut self, pad: usize) -> Option<AudioBuffer>;

    /// Generic side-channel for live parameter updates.
    fn control_message(&mut self, _kind: &str, _params: &NodeParams) -> EngineResult<ControlOutcome> {
        Ok(ControlOutcome::Unhandled)
    }

    /// Whether this node writes into buffers received on its input pads.
    /// Feeds the Auto buffer-policy resolution.
    fn mutates_input(&self) -> bool {
        false
    }

    /// End-of-stream hint: true once a source will produce no further
    /// blocks. The file-only run loop stops when every source reports
    /// finished.
    fn is_finished(&self) -> bool {
        false
    }

    /// Drain one pending status record, if any.
    fn take_status(&mut self) -> Option<NodeStatus> {
        None
    }

    /// Downcast seam; the engine uses it to reach driver-node entry
    /// points.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Validate a buffer arriving on a pad against the pad's configured
/// format.
///
/// A shorter final block is allowed so file round trips preserve exact
/// sample counts; anything longer than the block size, or any format or
/// rate disagreement, is a mismatch.
pub fn check_pad_buffer(
    buffer: &AudioBuffer,
    format: &SampleFormat,
    sample_rate: u32,
    block_frames: usize,
) -> EngineResult<()> {
    if buffer.format() != format {
        return Err(EngineError::FormatMismatch(format!(
            "buffer format {:?} does not match pad format {:?}",
            buffer.format(),
            format
        )));
    }
    if buffer.frames() > block_frames {
        return Err(EngineError::FormatMismatch(format!(
            "buffer of {} frames exceeds block size {}",
            buffer.frames(),
            block_frames
        )));
    }
    if buffer.sample_rate() != sample_rate {
        return Err(EngineError::FormatMismatch(format!(
            "buffer rate {} does not match graph rate {}",
            buffer.sample_rate(),
            sample_rate
        )));
    }
    Ok(())
}
