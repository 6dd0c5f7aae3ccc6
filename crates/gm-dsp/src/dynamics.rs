//! Dynamics processing: envelope follower and compressor

/// Envelope follower with independent attack and release coefficients
#[derive(Debug, Clone)]
pub struct EnvelopeFollower {
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
    sample_rate: f32,
}

impl EnvelopeFollower {
    pub fn new(sample_rate: f32) -> Self {
        let mut follower = Self {
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
            sample_rate,
        };
        follower.set_times(10.0, 100.0);
        follower
    }

    /// Set attack and release times in milliseconds
    pub fn set_times(&mut self, attack_ms: f32, release_ms: f32) {
        self.attack_coeff = (-1.0 / (attack_ms * 0.001 * self.sample_rate)).exp();
        self.release_coeff = (-1.0 / (release_ms * 0.001 * self.sample_rate)).exp();
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let abs_input = input.abs();
        let coeff = if abs_input > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = abs_input + coeff * (self.envelope - abs_input);
        self.envelope
    }

    #[inline]
    pub fn envelope(&self) -> f32 {
        self.envelope
    }
}

/// Feed-forward compressor.
///
/// The caller feeds the per-frame peak (channel-linked detection) into
/// [`Compressor::gain_for`] and applies the returned gain to every
/// channel, so stereo images do not shift under compression.
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    makeup_gain: f32,
    follower: EnvelopeFollower,
}

impl Compressor {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            threshold_db: -18.0,
            ratio: 4.0,
            makeup_gain: 1.0,
            follower: EnvelopeFollower::new(sample_rate),
        }
    }

    pub fn set_threshold_db(&mut self, threshold_db: f32) {
        self.threshold_db = threshold_db;
    }

    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio.max(1.0);
    }

    pub fn set_makeup_db(&mut self, makeup_db: f32) {
        self.makeup_gain = 10.0_f32.powf(makeup_db / 20.0);
    }

    pub fn set_times(&mut self, attack_ms: f32, release_ms: f32) {
        self.follower.set_times(attack_ms, release_ms);
    }

    pub fn reset(&mut self) {
        self.follower.reset();
    }

    /// Gain to apply for one frame, given the frame's peak level.
    #[inline]
    pub fn gain_for(&mut self, peak: f32) -> f32 {
        let env = self.follower.process(peak);
        if env <= 1e-10 {
            return self.makeup_gain;
        }
        let env_db = 20.0 * env.log10();
        let over_db = env_db - self.threshold_db;
        if over_db <= 0.0 {
            return self.makeup_gain;
        }
        let reduction_db = over_db * (1.0 - 1.0 / self.ratio);
        10.0_f32.powf(-reduction_db / 20.0) * self.makeup_gain
    }
}
