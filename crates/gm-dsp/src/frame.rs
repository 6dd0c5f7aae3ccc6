//! Pipeline working frames
//!
//! A [`Frame`] is the pipeline's native block: planar f32 channel data
//! with a capacity fixed at construction and a valid length that may be
//! shorter for the final block of a stream. Frames are pre-allocated and
//! reused; the bridge methods to [`AudioBuffer`] never allocate.

use gm_core::{AudioBuffer, EngineError, EngineResult, SampleElement, SampleLayout};

/// Planar f32 working block
pub struct Frame {
    channels: Vec<Vec<f32>>,
    len: usize,
    sample_rate: u32,
}

impl Frame {
    /// Pre-allocate a frame for `channels` channels of up to `capacity`
    /// frames.
    pub fn new(channels: usize, capacity: usize, sample_rate: u32) -> Self {
        Self {
            channels: vec![vec![0.0; capacity]; channels],
            len: capacity,
            sample_rate,
        }
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Set the valid frame count (tail blocks); clamped to capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.capacity());
    }

    #[inline]
    pub fn channel(&self, c: usize) -> &[f32] {
        &self.channels[c][..self.len]
    }

    #[inline]
    pub fn channel_mut(&mut self, c: usize) -> &mut [f32] {
        let len = self.len;
        &mut self.channels[c][..len]
    }

    #[inline]
    pub fn sample(&self, c: usize, i: usize) -> f32 {
        self.channels[c][i]
    }

    #[inline]
    pub fn set_sample(&mut self, c: usize, i: usize, value: f32) {
        self.channels[c][i] = value;
    }

    pub fn clear(&mut self) {
        for ch in &mut self.channels {
            ch.fill(0.0);
        }
    }

    /// Allocate a frame holding a copy of `buf`.
    pub fn from_buffer(buf: &AudioBuffer) -> EngineResult<Self> {
        let mut frame = Self::new(
            buf.format().channel_count(),
            buf.frames(),
            buf.sample_rate(),
        );
        frame.copy_from_buffer(buf)?;
        Ok(frame)
    }

    /// Copy `buf` into this frame without allocating.
    ///
    /// The buffer must be f32 with a matching channel count and no more
    /// frames than this frame's capacity; interleaved buffers are
    /// deinterleaved.
    pub fn copy_from_buffer(&mut self, buf: &AudioBuffer) -> EngineResult<()> {
        if buf.format().element != SampleElement::F32 {
            return Err(EngineError::FormatMismatch(format!(
                "pipeline frame from {} buffer",
                buf.format().element.name()
            )));
        }
        if buf.format().channel_count() != self.channels.len() {
            return Err(EngineError::FormatMismatch(format!(
                "buffer has {} channels, frame has {}",
                buf.format().channel_count(),
                self.channels.len()
            )));
        }
        if buf.frames() > self.capacity() {
            return Err(EngineError::FormatMismatch(format!(
                "buffer of {} frames exceeds frame capacity {}",
                buf.frames(),
                self.capacity()
            )));
        }
        self.len = buf.frames();
        self.sample_rate = buf.sample_rate();
        match buf.format().layout {
            SampleLayout::Planar => {
                for (c, ch) in self.channels.iter_mut().enumerate() {
                    ch[..self.len].copy_from_slice(buf.plane_f32(c)?);
                }
            }
            SampleLayout::Interleaved => {
                let plane = buf.plane_f32(0)?;
                let stride = self.channels.len();
                for (c, ch) in self.channels.iter_mut().enumerate() {
                    for (i, dst) in ch[..self.len].iter_mut().enumerate() {
                        *dst = plane[i * stride + c];
                    }
                }
            }
        }
        Ok(())
    }

    /// Copy this frame's valid samples into `buf`.
    ///
    /// The buffer must be uniquely held, f32, and sized exactly to the
    /// frame's valid length.
    pub fn write_to_buffer(&self, buf: &mut AudioBuffer) -> EngineResult<()> {
        if buf.format().channel_count() != self.channels.len() {
            return Err(EngineError::FormatMismatch(format!(
                "buffer has {} channels, frame has {}",
                buf.format().channel_count(),
                self.channels.len()
            )));
        }
        if buf.frames() != self.len {
            return Err(EngineError::FormatMismatch(format!(
                "buffer of {} frames, frame holds {}",
                buf.frames(),
                self.len
            )));
        }
        match buf.format().layout {
            SampleLayout::Planar => {
                for (c, ch) in self.channels.iter().enumerate() {
                    buf.plane_f32_mut(c)?.copy_from_slice(&ch[..self.len]);
                }
            }
            SampleLayout::Interleaved => {
                let stride = self.channels.len();
                let plane = buf.plane_f32_mut(0)?;
                for (c, ch) in self.channels.iter().enumerate() {
                    for (i, &s) in ch[..self.len].iter().enumerate() {
                        plane[i * stride + c] = s;
                    }
                }
            }
        }
        Ok(())
    }

    /// Copy another frame's contents into this one without allocating.
    pub fn copy_from(&mut self, other: &Frame) -> EngineResult<()> {
        if other.channel_count() != self.channel_count() {
            return Err(EngineError::FormatMismatch(format!(
                "frame has {} channels, source has {}",
                self.channel_count(),
                other.channel_count()
            )));
        }
        if other.len() > self.capacity() {
            return Err(EngineError::FormatMismatch(format!(
                "source of {} frames exceeds capacity {}",
                other.len(),
                self.capacity()
            )));
        }
        self.len = other.len;
        self.sample_rate = other.sample_rate;
        for (dst, src) in self.channels.iter_mut().zip(&other.channels) {
            dst[..self.len].copy_from_slice(&src[..self.len]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gm_core::{ChannelLayout, SampleFormat};

    #[test]
    fn test_buffer_round_trip_planar() {
        let fmt = SampleFormat::planar_f32(ChannelLayout::stereo());
        let mut buf = AudioBuffer::new(8, 48000, fmt.clone()).unwrap();
        for c in 0..2 {
            let plane = buf.plane_f32_mut(c).unwrap();
            for (i, s) in plane.iter_mut().enumerate() {
                *s = (c * 100 + i) as f32;
            }
        }

        let mut frame = Frame::new(2, 8, 48000);
        frame.copy_from_buffer(&buf).unwrap();
        assert_eq!(frame.channel(1)[3], 103.0);

        let mut out = AudioBuffer::new(8, 48000, fmt).unwrap();
        frame.write_to_buffer(&mut out).unwrap();
        assert_eq!(out.plane_f32(0).unwrap()[7], 7.0);
    }

    #[test]
    fn test_deinterleave() {
        let fmt = SampleFormat::new(
            SampleElement::F32,
            SampleLayout::Interleaved,
            ChannelLayout::stereo(),
        );
        let mut buf = AudioBuffer::new(4, 48000, fmt).unwrap();
        {
            let plane = buf.plane_f32_mut(0).unwrap();
            for (i, s) in plane.iter_mut().enumerate() {
                *s = i as f32;
            }
        }
        let frame = Frame::from_buffer(&buf).unwrap();
        assert_eq!(frame.channel(0), &[0.0, 2.0, 4.0, 6.0]);
        assert_eq!(frame.channel(1), &[1.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn test_tail_block_length() {
        let fmt = SampleFormat::planar_f32(ChannelLayout::mono());
        let buf = AudioBuffer::new(100, 48000, fmt).unwrap();
        let mut frame = Frame::new(1, 512, 48000);
        frame.copy_from_buffer(&buf).unwrap();
        assert_eq!(frame.len(), 100);
        assert_eq!(frame.channel(0).len(), 100);
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let fmt = SampleFormat::planar_f32(ChannelLayout::stereo());
        let buf = AudioBuffer::new(8, 48000, fmt).unwrap();
        let mut frame = Frame::new(1, 8, 48000);
        assert!(frame.copy_from_buffer(&buf).is_err());
    }
}
