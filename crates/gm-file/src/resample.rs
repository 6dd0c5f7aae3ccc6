//! Sample-rate conversion for file streaming
//!
//! Wraps `rubato`'s sinc resampler behind a feed/flush interface: the
//! file-source worker feeds decoded blocks of any size, the converter
//! buffers to the resampler's fixed input chunk and returns whatever
//! output is ready. Runs on worker threads only, never on the realtime
//! path.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::{FileError, FileResult};

const CHUNK_FRAMES: usize = 1024;

/// Planar f32 rate converter
pub struct RateConverter {
    inner: SincFixedIn<f32>,
    /// Input accumulation, one Vec per channel.
    staging: Vec<Vec<f32>>,
    channels: usize,
}

impl RateConverter {
    pub fn new(in_rate: u32, out_rate: u32, channels: usize) -> FileResult<Self> {
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(
            out_rate as f64 / in_rate as f64,
            2.0,
            params,
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| FileError::Resample(e.to_string()))?;
        Ok(Self {
            inner,
            staging: vec![Vec::new(); channels],
            channels,
        })
    }

    /// Feed `frames` frames; returns converted output (possibly empty
    /// until a full input chunk has accumulated).
    pub fn process(&mut self, input: &[Vec<f32>], frames: usize) -> FileResult<Vec<Vec<f32>>> {
        for (stage, channel) in self.staging.iter_mut().zip(input) {
            stage.extend_from_slice(&channel[..frames]);
        }

        let mut output: Vec<Vec<f32>> = vec![Vec::new(); self.channels];
        while self.staging[0].len() >= self.inner.input_frames_next() {
            let take = self.inner.input_frames_next();
            let chunk: Vec<Vec<f32>> = self
                .staging
                .iter_mut()
                .map(|stage| stage.drain(..take).collect())
                .collect();
            let converted = self
                .inner
                .process(&chunk, None)
                .map_err(|e| FileError::Resample(e.to_string()))?;
            for (out, conv) in output.iter_mut().zip(converted) {
                out.extend_from_slice(&conv);
            }
        }
        Ok(output)
    }

    /// Convert whatever input remains buffered (end of stream).
    pub fn flush(&mut self) -> FileResult<Vec<Vec<f32>>> {
        if self.staging[0].is_empty() {
            return Ok(vec![Vec::new(); self.channels]);
        }
        let chunk: Vec<Vec<f32>> = self
            .staging
            .iter_mut()
            .map(std::mem::take)
            .collect();
        let converted = self
            .inner
            .process_partial(Some(chunk.as_slice()), None)
            .map_err(|e| FileError::Resample(e.to_string()))?;
        Ok(converted)
    }
}
