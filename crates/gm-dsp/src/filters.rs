//! Filter pipeline stages
//!
//! Each primitive the pipeline description can name is a [`FilterStage`]:
//! it consumes one [`Frame`] in place and accepts string-keyed parameter
//! updates. [`create_stage`] is the factory behind the description
//! parser; [`validate_param`] lets the pipeline reject a bad live update
//! before queuing it.

use gm_core::{Decibels, EngineError, EngineResult};

use crate::biquad::{Biquad, BiquadCoeffs};
use crate::delay::DelayLine;
use crate::dynamics::Compressor;
use crate::frame::Frame;
use crate::smoothing::ParamSmoother;

/// One stage of the filter pipeline
pub trait FilterStage: Send {
    /// Registry name of the primitive (`"volume"`, `"eq"`, ...)
    fn kind(&self) -> &'static str;

    /// Apply a parameter update. Unknown key or malformed value is a
    /// `Config` error.
    fn set_param(&mut self, key: &str, value: &str) -> EngineResult<()>;

    /// Apply a configure-time parameter with no transition ramp.
    ///
    /// Live updates ramp where a stage smooths (volume); initial values
    /// must not.
    fn set_param_immediate(&mut self, key: &str, value: &str) -> EngineResult<()> {
        self.set_param(key, value)
    }

    /// Process one block in place.
    fn process(&mut self, frame: &mut Frame);

    /// Clear DSP state (filter memory, envelopes) without touching
    /// parameters.
    fn reset(&mut self);
}

/// Construct a stage by primitive name.
pub fn create_stage(
    kind: &str,
    sample_rate: u32,
    channels: usize,
) -> EngineResult<Box<dyn FilterStage>> {
    match kind {
        "volume" => Ok(Box::new(VolumeStage::new(sample_rate))),
        "eq" => Ok(Box::new(BiquadStage::new(
            BiquadKind::Peaking,
            sample_rate,
            channels,
        ))),
        "lowpass" => Ok(Box::new(BiquadStage::new(
            BiquadKind::Lowpass,
            sample_rate,
            channels,
        ))),
        "highpass" => Ok(Box::new(BiquadStage::new(
            BiquadKind::Highpass,
            sample_rate,
            channels,
        ))),
        "compressor" => Ok(Box::new(CompressorStage::new(sample_rate))),
        "delay" => Ok(Box::new(DelayStage::new(sample_rate, channels))),
        _ => Err(EngineError::Config(format!("unknown filter '{kind}'"))),
    }
}

/// The parameter a bare `kind=value` shorthand assigns
/// (`"volume=0.5"` is `volume g=0.5`).
pub fn primary_param(kind: &str) -> Option<&'static str> {
    match kind {
        "volume" => Some("g"),
        "eq" | "lowpass" | "highpass" => Some("f"),
        "compressor" => Some("ratio"),
        "delay" => Some("time"),
        _ => None,
    }
}

/// Check a parameter update against a primitive's recognized keys
/// without touching any stage state.
pub fn validate_param(kind: &str, key: &str, value: &str) -> EngineResult<()> {
    let keys: &[&str] = match kind {
        "volume" => &["g"],
        "eq" => &["f", "g", "q"],
        "lowpass" | "highpass" => &["f", "q"],
        "compressor" => &["threshold", "ratio", "attack", "release", "makeup"],
        "delay" => &["time"],
        _ => return Err(EngineError::Config(format!("unknown filter '{kind}'"))),
    };
    if !keys.contains(&key) {
        return Err(EngineError::Config(format!(
            "filter '{kind}' has no parameter '{key}'"
        )));
    }
    if kind == "volume" {
        parse_gain(value).map(|_| ())
    } else {
        parse_f32(kind, key, value).map(|_| ())
    }
}

fn parse_f32(kind: &str, key: &str, value: &str) -> EngineResult<f32> {
    value.parse::<f32>().map_err(|_| {
        EngineError::Config(format!("filter '{kind}': {key}={value} is not a number"))
    })
}

/// Parse a gain value: plain linear (`"0.5"`) or decibels (`"-6dB"`).
fn parse_gain(value: &str) -> EngineResult<f32> {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();
    if let Some(db) = lower.strip_suffix("db") {
        let db: f64 = db
            .trim()
            .parse()
            .map_err(|_| EngineError::Config(format!("bad gain value '{value}'")))?;
        Ok(Decibels(db).to_gain() as f32)
    } else {
        trimmed
            .parse()
            .map_err(|_| EngineError::Config(format!("bad gain value '{value}'")))
    }
}

// ─── volume ──────────────────────────────────────────────────────────────

/// Smoothed broadband gain
struct VolumeStage {
    gain: ParamSmoother,
}

impl VolumeStage {
    fn new(sample_rate: u32) -> Self {
        Self {
            gain: ParamSmoother::new(sample_rate as f32, 1.0),
        }
    }
}

impl FilterStage for VolumeStage {
    fn kind(&self) -> &'static str {
        "volume"
    }

    fn set_param(&mut self, key: &str, value: &str) -> EngineResult<()> {
        match key {
            "g" => {
                self.gain.ramp_to(parse_gain(value)?);
                Ok(())
            }
            _ => Err(EngineError::Config(format!(
                "filter 'volume' has no parameter '{key}'"
            ))),
        }
    }

    fn set_param_immediate(&mut self, key: &str, value: &str) -> EngineResult<()> {
        match key {
            "g" => {
                self.gain.snap_to(parse_gain(value)?);
                Ok(())
            }
            _ => Err(EngineError::Config(format!(
                "filter 'volume' has no parameter '{key}'"
            ))),
        }
    }

    fn process(&mut self, frame: &mut Frame) {
        let channels = frame.channel_count();
        for i in 0..frame.len() {
            let g = self.gain.tick();
            for c in 0..channels {
                frame.set_sample(c, i, frame.sample(c, i) * g);
            }
        }
    }

    fn reset(&mut self) {
        // Gain is a parameter, not DSP state; nothing to clear.
    }
}

// ─── biquad family: eq / lowpass / highpass ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BiquadKind {
    Peaking,
    Lowpass,
    Highpass,
}

struct BiquadStage {
    kind: BiquadKind,
    freq: f64,
    gain_db: f64,
    q: f64,
    sample_rate: f64,
    sections: Vec<Biquad>,
}

impl BiquadStage {
    fn new(kind: BiquadKind, sample_rate: u32, channels: usize) -> Self {
        let mut stage = Self {
            kind,
            freq: 1000.0,
            gain_db: 0.0,
            q: 0.707,
            sample_rate: sample_rate as f64,
            sections: vec![Biquad::default(); channels],
        };
        stage.rebuild();
        stage
    }

    fn rebuild(&mut self) {
        let coeffs = match self.kind {
            BiquadKind::Peaking => {
                BiquadCoeffs::peaking(self.freq, self.gain_db, self.q, self.sample_rate)
            }
            BiquadKind::Lowpass => BiquadCoeffs::lowpass(self.freq, self.q, self.sample_rate),
            BiquadKind::Highpass => BiquadCoeffs::highpass(self.freq, self.q, self.sample_rate),
        };
        for section in &mut self.sections {
            section.set_coeffs(coeffs);
        }
    }
}

impl FilterStage for BiquadStage {
    fn kind(&self) -> &'static str {
        match self.kind {
            BiquadKind::Peaking => "eq",
            BiquadKind::Lowpass => "lowpass",
            BiquadKind::Highpass => "highpass",
        }
    }

    fn set_param(&mut self, key: &str, value: &str) -> EngineResult<()> {
        let name = self.kind();
        match key {
            "f" => self.freq = parse_f32(name, key, value)? as f64,
            "q" => self.q = parse_f32(name, key, value)? as f64,
            "g" if self.kind == BiquadKind::Peaking => {
                self.gain_db = parse_f32(name, key, value)? as f64;
            }
            _ => {
                return Err(EngineError::Config(format!(
                    "filter '{name}' has no parameter '{key}'"
                )));
            }
        }
        self.rebuild();
        Ok(())
    }

    fn process(&mut self, frame: &mut Frame) {
        for (c, section) in self.sections.iter_mut().enumerate() {
            section.process_block(frame.channel_mut(c));
        }
    }

    fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }
}

// ─── compressor ──────────────────────────────────────────────────────────

struct CompressorStage {
    comp: Compressor,
    attack_ms: f32,
    release_ms: f32,
}

impl CompressorStage {
    fn new(sample_rate: u32) -> Self {
        Self {
            comp: Compressor::new(sample_rate as f32),
            attack_ms: 10.0,
            release_ms: 100.0,
        }
    }
}

impl FilterStage for CompressorStage {
    fn kind(&self) -> &'static str {
        "compressor"
    }

    fn set_param(&mut self, key: &str, value: &str) -> EngineResult<()> {
        let v = parse_f32("compressor", key, value)?;
        match key {
            "threshold" => self.comp.set_threshold_db(v),
            "ratio" => self.comp.set_ratio(v),
            "attack" => {
                self.attack_ms = v;
                self.comp.set_times(self.attack_ms, self.release_ms);
            }
            "release" => {
                self.release_ms = v;
                self.comp.set_times(self.attack_ms, self.release_ms);
            }
            "makeup" => self.comp.set_makeup_db(v),
            _ => {
                return Err(EngineError::Config(format!(
                    "filter 'compressor' has no parameter '{key}'"
                )));
            }
        }
        Ok(())
    }

    fn process(&mut self, frame: &mut Frame) {
        let channels = frame.channel_count();
        for i in 0..frame.len() {
            // Channel-linked detection: one gain for the whole frame.
            let mut peak = 0.0f32;
            for c in 0..channels {
                peak = peak.max(frame.sample(c, i).abs());
            }
            let gain = self.comp.gain_for(peak);
            for c in 0..channels {
                frame.set_sample(c, i, frame.sample(c, i) * gain);
            }
        }
    }

    fn reset(&mut self) {
        self.comp.reset();
    }
}

// ─── delay ───────────────────────────────────────────────────────────────

struct DelayStage {
    sample_rate: u32,
    lines: Vec<DelayLine>,
}

impl DelayStage {
    fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            lines: vec![DelayLine::new(0); channels],
        }
    }
}

impl FilterStage for DelayStage {
    fn kind(&self) -> &'static str {
        "delay"
    }

    fn set_param(&mut self, key: &str, value: &str) -> EngineResult<()> {
        match key {
            "time" => {
                let ms = parse_f32("delay", key, value)?;
                if ms < 0.0 {
                    return Err(EngineError::Config(format!(
                        "filter 'delay': negative time {ms}"
                    )));
                }
                let samples = (ms * 0.001 * self.sample_rate as f32).round() as usize;
                for line in &mut self.lines {
                    *line = DelayLine::new(samples);
                }
                Ok(())
            }
            _ => Err(EngineError::Config(format!(
                "filter 'delay' has no parameter '{key}'"
            ))),
        }
    }

    fn process(&mut self, frame: &mut Frame) {
        for (c, line) in self.lines.iter_mut().enumerate() {
            line.process_block(frame.channel_mut(c));
        }
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.reset();
        }
    }
}
