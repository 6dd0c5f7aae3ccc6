//! Filter pipeline: textual description → running DSP chain
//!
//! A pipeline is described as a comma-separated chain of primitives,
//! each optionally labeled and parameterized:
//!
//! ```text
//! eq@low f=120 g=-3, compressor@c1 ratio=4, volume g=-1.5dB
//! ```
//!
//! Unlabeled stages get `<kind><index>` labels. Parameter updates target
//! a label and are queued; the queue drains at the next block boundary,
//! so the realtime thread never sees a half-applied update.

use gm_core::{EngineError, EngineResult};

use crate::filters::{create_stage, primary_param, validate_param, FilterStage};
use crate::frame::Frame;

/// Result of pulling a block from the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    /// A block was written into the output frame.
    Ready,
    /// No block buffered; push input first.
    NeedMore,
    /// The stream has ended; no further blocks will be produced.
    Eos,
}

/// Result of a parameter update request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Validated and queued; applies at the next block boundary.
    Queued,
    /// Applied immediately (configure-time path).
    Applied,
    /// No sub-filter carries that label.
    UnknownFilter,
}

struct Stage {
    label: String,
    kind: &'static str,
    filter: Box<dyn FilterStage>,
}

struct PendingUpdate {
    stage: usize,
    key: String,
    value: String,
}

/// A compiled chain of [`FilterStage`]s processing one block at a time
pub struct FilterPipeline {
    stages: Vec<Stage>,
    pending: Vec<PendingUpdate>,
    scratch: Frame,
    loaded: bool,
    eos: bool,
}

impl FilterPipeline {
    /// Build a pipeline from its textual description.
    pub fn parse(
        description: &str,
        sample_rate: u32,
        channels: usize,
        block_frames: usize,
    ) -> EngineResult<Self> {
        if description.trim().is_empty() {
            return Err(EngineError::Config("empty filter description".into()));
        }
        let mut stages = Vec::new();
        for (index, part) in description.split(',').enumerate() {
            let part = part.trim();
            if part.is_empty() {
                return Err(EngineError::Config(format!(
                    "empty stage at position {index} in '{description}'"
                )));
            }
            let mut tokens = part.split_whitespace();
            let head = tokens.next().unwrap();
            // `volume=0.5` shorthand assigns the primitive's primary
            // parameter.
            let (head, shorthand) = match head.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (head, None),
            };
            let (kind_name, label) = match head.split_once('@') {
                Some((kind, label)) if !label.is_empty() => (kind, label.to_string()),
                Some((_, _)) => {
                    return Err(EngineError::Config(format!("empty label in '{head}'")));
                }
                None => (head, format!("{head}{index}")),
            };
            let mut filter = create_stage(kind_name, sample_rate, channels)?;
            let kind = filter.kind();
            if let Some(value) = shorthand {
                let key = primary_param(kind).ok_or_else(|| {
                    EngineError::Config(format!("filter '{kind}' takes no shorthand value"))
                })?;
                filter.set_param_immediate(key, value)?;
            }
            for token in tokens {
                let (key, value) = token.split_once('=').ok_or_else(|| {
                    EngineError::Config(format!("expected key=value, got '{token}'"))
                })?;
                filter.set_param_immediate(key, value)?;
            }
            if stages.iter().any(|s: &Stage| s.label == label) {
                return Err(EngineError::Config(format!(
                    "duplicate filter label '{label}'"
                )));
            }
            stages.push(Stage {
                label,
                kind,
                filter,
            });
        }
        Ok(Self {
            stages,
            pending: Vec::new(),
            scratch: Frame::new(channels, block_frames, sample_rate),
            loaded: false,
            eos: false,
        })
    }

    /// Labels of all sub-filters, in chain order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.label.as_str())
    }

    /// Queue a live parameter update for the labeled sub-filter.
    ///
    /// The value is validated now; application happens at the next
    /// `push_frame`.
    pub fn update_parameter(
        &mut self,
        label: &str,
        key: &str,
        value: &str,
    ) -> EngineResult<UpdateOutcome> {
        let Some(stage) = self.stages.iter().position(|s| s.label == label) else {
            return Ok(UpdateOutcome::UnknownFilter);
        };
        validate_param(self.stages[stage].kind, key, value)?;
        self.pending.push(PendingUpdate {
            stage,
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(UpdateOutcome::Queued)
    }

    /// Apply a configure-time parameter directly, with no transition
    /// ramp. Not for use while the pipeline is processing.
    pub fn set_parameter_immediate(
        &mut self,
        label: &str,
        key: &str,
        value: &str,
    ) -> EngineResult<UpdateOutcome> {
        let Some(stage) = self.stages.iter().position(|s| s.label == label) else {
            return Ok(UpdateOutcome::UnknownFilter);
        };
        self.stages[stage].filter.set_param_immediate(key, value)?;
        Ok(UpdateOutcome::Applied)
    }

    /// Feed one block into the chain.
    ///
    /// Fails with `InvalidState` if the previous block has not been
    /// pulled yet, and after end-of-stream.
    pub fn push_frame(&mut self, frame: &Frame) -> EngineResult<()> {
        if self.eos {
            return Err(EngineError::InvalidState(
                "push after end of stream".into(),
            ));
        }
        if self.loaded {
            return Err(EngineError::InvalidState(
                "previous block not yet pulled".into(),
            ));
        }
        self.apply_pending();
        self.scratch.copy_from(frame)?;
        for stage in &mut self.stages {
            stage.filter.process(&mut self.scratch);
        }
        self.loaded = true;
        Ok(())
    }

    /// Pull the processed block into `out`.
    pub fn pull_frame(&mut self, out: &mut Frame) -> PullStatus {
        if self.loaded {
            // Capacities match by construction; copy cannot fail.
            if out.copy_from(&self.scratch).is_err() {
                return PullStatus::NeedMore;
            }
            self.loaded = false;
            PullStatus::Ready
        } else if self.eos {
            PullStatus::Eos
        } else {
            PullStatus::NeedMore
        }
    }

    /// Mark the input stream finished; a buffered block can still be
    /// pulled, after which `pull_frame` reports `Eos`.
    pub fn mark_eos(&mut self) {
        self.eos = true;
    }

    /// Clear all DSP state and buffered blocks, keeping the chain and
    /// its parameters.
    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.filter.reset();
        }
        self.loaded = false;
        self.eos = false;
        self.pending.clear();
    }

    fn apply_pending(&mut self) {
        for update in self.pending.drain(..) {
            let stage = &mut self.stages[update.stage];
            // Validated at queue time; a failure here means the stage
            // rejected a value transiently. Drop it rather than stall
            // the block.
            if let Err(err) = stage.filter.set_param(&update.key, &update.value) {
                log::warn!("filter '{}' rejected queued update: {err}", stage.label);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dc_frame(channels: usize, len: usize, value: f32) -> Frame {
        let mut frame = Frame::new(channels, len, 48000);
        for c in 0..channels {
            frame.channel_mut(c).fill(value);
        }
        frame
    }

    #[test]
    fn test_parse_chain() {
        let p = FilterPipeline::parse("eq@low f=120 g=-3, compressor@c1 ratio=4", 48000, 2, 512)
            .unwrap();
        let labels: Vec<&str> = p.labels().collect();
        assert_eq!(labels, vec!["low", "c1"]);
    }

    #[test]
    fn test_parse_shorthand() {
        let mut p = FilterPipeline::parse("volume=0.5", 48000, 2, 64).unwrap();
        let mut out = Frame::new(2, 64, 48000);
        p.push_frame(&dc_frame(2, 64, 1.0)).unwrap();
        assert_eq!(p.pull_frame(&mut out), PullStatus::Ready);
        assert_eq!(out.sample(0, 0), 0.5);
    }

    #[test]
    fn test_parse_default_labels() {
        let p = FilterPipeline::parse("volume g=0.5, volume g=2", 48000, 2, 512).unwrap();
        let labels: Vec<&str> = p.labels().collect();
        assert_eq!(labels, vec!["volume0", "volume1"]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(FilterPipeline::parse("", 48000, 2, 512).is_err());
        assert!(FilterPipeline::parse("volume gain", 48000, 2, 512).is_err());
        assert!(FilterPipeline::parse("volume@ g=1", 48000, 2, 512).is_err());
        assert!(FilterPipeline::parse("wobble@w a=1", 48000, 2, 512).is_err());
        assert!(FilterPipeline::parse("volume@v g=1, eq@v f=100", 48000, 2, 512).is_err());
    }

    #[test]
    fn test_push_pull_volume() {
        let mut p = FilterPipeline::parse("volume@v g=0.5", 48000, 2, 512).unwrap();
        let mut out = Frame::new(2, 512, 48000);

        assert_eq!(p.pull_frame(&mut out), PullStatus::NeedMore);

        // Configure-time gain snaps, no ramp on the first block.
        p.push_frame(&dc_frame(2, 512, 0.8)).unwrap();
        assert_eq!(p.pull_frame(&mut out), PullStatus::Ready);
        assert!((out.sample(0, 0) - 0.4).abs() < 1e-6);
        assert!((out.sample(1, 511) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_double_push_rejected() {
        let mut p = FilterPipeline::parse("volume@v g=1", 48000, 1, 64).unwrap();
        p.push_frame(&dc_frame(1, 64, 0.1)).unwrap();
        assert!(p.push_frame(&dc_frame(1, 64, 0.1)).is_err());
    }

    #[test]
    fn test_eos() {
        let mut p = FilterPipeline::parse("volume@v g=1", 48000, 1, 64).unwrap();
        let mut out = Frame::new(1, 64, 48000);

        p.push_frame(&dc_frame(1, 64, 0.1)).unwrap();
        p.mark_eos();
        assert_eq!(p.pull_frame(&mut out), PullStatus::Ready);
        assert_eq!(p.pull_frame(&mut out), PullStatus::Eos);
        assert!(p.push_frame(&dc_frame(1, 64, 0.1)).is_err());
    }

    #[test]
    fn test_update_parameter_applies_next_block() {
        let mut p = FilterPipeline::parse("volume@v g=1", 48000, 1, 2048).unwrap();
        let mut out = Frame::new(1, 2048, 48000);

        p.push_frame(&dc_frame(1, 2048, 0.5)).unwrap();
        p.pull_frame(&mut out);
        assert!((out.sample(0, 2047) - 0.5).abs() < 1e-5);

        assert_eq!(
            p.update_parameter("v", "g", "0.5").unwrap(),
            UpdateOutcome::Queued
        );
        assert_eq!(
            p.update_parameter("nope", "g", "0.5").unwrap(),
            UpdateOutcome::UnknownFilter
        );
        assert!(p.update_parameter("v", "g", "soft").is_err());

        // The 2048-frame block gives the ramp room to settle.
        p.push_frame(&dc_frame(1, 2048, 0.5)).unwrap();
        p.pull_frame(&mut out);
        assert!((out.sample(0, 2047) - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_reset_clears_buffered_block() {
        let mut p = FilterPipeline::parse("volume@v g=1", 48000, 1, 64).unwrap();
        let mut out = Frame::new(1, 64, 48000);
        p.push_frame(&dc_frame(1, 64, 0.3)).unwrap();
        p.reset();
        assert_eq!(p.pull_frame(&mut out), PullStatus::NeedMore);
    }
}
