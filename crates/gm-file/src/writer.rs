//! Block-streaming WAV encoder
//!
//! [`BlockWriter`] interleaves planar f32 blocks and writes them through
//! hound with the configured sample codec. The file-sink worker owns one
//! and calls `finalize` after draining its queue.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::{FileError, FileResult};

/// Sample codec inside the WAV container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavCodec {
    Pcm16,
    Pcm24,
    Pcm32,
    Float32,
}

impl WavCodec {
    /// Parse a configuration name (`"pcm16"`, `"f32"`, ...)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pcm16" | "s16" => Some(Self::Pcm16),
            "pcm24" | "s24" => Some(Self::Pcm24),
            "pcm32" | "s32" => Some(Self::Pcm32),
            "f32" | "float" | "float32" => Some(Self::Float32),
            _ => None,
        }
    }

    fn spec(self, sample_rate: u32, channels: u16) -> hound::WavSpec {
        let (bits, format) = match self {
            Self::Pcm16 => (16, hound::SampleFormat::Int),
            Self::Pcm24 => (24, hound::SampleFormat::Int),
            Self::Pcm32 => (32, hound::SampleFormat::Int),
            Self::Float32 => (32, hound::SampleFormat::Float),
        };
        hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: bits,
            sample_format: format,
        }
    }
}

/// Streaming WAV writer consuming planar f32 blocks
pub struct BlockWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    codec: WavCodec,
    channels: usize,
    frames_written: u64,
}

impl BlockWriter {
    pub fn create<P: AsRef<Path>>(
        path: P,
        sample_rate: u32,
        channels: usize,
        codec: WavCodec,
    ) -> FileResult<Self> {
        let spec = codec.spec(sample_rate, channels as u16);
        let writer = hound::WavWriter::create(path.as_ref(), spec)
            .map_err(|e| FileError::Encode(e.to_string()))?;
        Ok(Self {
            writer: Some(writer),
            codec,
            channels,
            frames_written: 0,
        })
    }

    #[inline]
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Interleave and encode one planar block; all planes must share a
    /// length.
    pub fn write_block(&mut self, planes: &[&[f32]]) -> FileResult<()> {
        debug_assert_eq!(planes.len(), self.channels);
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| FileError::Encode("writer finalized".into()))?;
        let frames = planes.first().map(|p| p.len()).unwrap_or(0);

        for i in 0..frames {
            for plane in planes {
                let sample = plane[i];
                match self.codec {
                    WavCodec::Pcm16 => {
                        let v = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                        writer
                            .write_sample(v)
                            .map_err(|e| FileError::Encode(e.to_string()))?;
                    }
                    WavCodec::Pcm24 => {
                        let v = (sample.clamp(-1.0, 1.0) * 8388607.0) as i32;
                        writer
                            .write_sample(v)
                            .map_err(|e| FileError::Encode(e.to_string()))?;
                    }
                    WavCodec::Pcm32 => {
                        let v = (sample.clamp(-1.0, 1.0) * 2147483647.0) as i32;
                        writer
                            .write_sample(v)
                            .map_err(|e| FileError::Encode(e.to_string()))?;
                    }
                    WavCodec::Float32 => {
                        writer
                            .write_sample(sample)
                            .map_err(|e| FileError::Encode(e.to_string()))?;
                    }
                }
            }
        }
        self.frames_written += frames as u64;
        Ok(())
    }

    /// Flush buffered samples and write the final header.
    pub fn finalize(&mut self) -> FileResult<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| FileError::Encode(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for BlockWriter {
    fn drop(&mut self) {
        if self.writer.is_some() {
            log::warn!("BlockWriter dropped without finalize; header may be stale");
        }
    }
}
