//! gm-dsp: Sample-domain DSP pipeline for Gridmix
//!
//! Provides the filter pipeline behind the engine's `filter_processor`
//! node: a chain of DSP primitives built from a textual description
//! (`"eq@low f=120 g=-3, compressor@c1 ratio=4"`), processing one block
//! at a time with live, block-boundary parameter updates.

mod biquad;
mod delay;
mod dynamics;
mod filters;
mod frame;
mod pipeline;
mod smoothing;

pub use biquad::{Biquad, BiquadCoeffs};
pub use delay::DelayLine;
pub use dynamics::{Compressor, EnvelopeFollower};
pub use filters::{create_stage, primary_param, validate_param, FilterStage};
pub use frame::Frame;
pub use pipeline::{FilterPipeline, PullStatus, UpdateOutcome};
pub use smoothing::ParamSmoother;
