//! Block-streaming decoder
//!
//! [`BlockReader`] wraps a symphonia format reader + decoder pair and
//! hands out planar f32 blocks of a caller-chosen size, buffering the
//! decoder's packet-sized output in between. Supports every container
//! and codec the workspace symphonia build enables (wav, flac, mp3,
//! ogg/vorbis, aac/m4a, aiff, alac).

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{FileError, FileResult};

/// Streaming decoder producing planar f32 blocks
pub struct BlockReader {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    /// Decoded samples not yet handed out, one queue per channel.
    pending: Vec<VecDeque<f32>>,
    eof: bool,
}

impl BlockReader {
    /// Open a file and prepare its default audio track for decoding.
    pub fn open<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| FileError::Decode(format!("{}: {e}", path.display())))?;
        let reader = probed.format;

        let track = reader
            .default_track()
            .ok_or_else(|| FileError::Decode(format!("{}: no audio track", path.display())))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| FileError::Decode("unknown sample rate".into()))?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| FileError::Decode("unknown channel layout".into()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| FileError::Decode(format!("no decoder: {e}")))?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buf: None,
            pending: (0..channels).map(|_| VecDeque::new()).collect(),
            eof: false,
        })
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Read up to `frames` frames into `out` (one Vec per channel, each
    /// filled from index 0). Returns the frame count actually read;
    /// 0 means end of stream.
    pub fn read_block(&mut self, out: &mut [Vec<f32>], frames: usize) -> FileResult<usize> {
        debug_assert_eq!(out.len(), self.channels);

        while self.pending[0].len() < frames && !self.eof {
            self.decode_next()?;
        }

        let n = frames.min(self.pending[0].len());
        for (queue, channel) in self.pending.iter_mut().zip(out.iter_mut()) {
            channel.resize(frames, 0.0);
            for sample in channel.iter_mut().take(n) {
                *sample = queue.pop_front().unwrap_or(0.0);
            }
        }
        Ok(n)
    }

    /// Decode one packet into the pending queues.
    fn decode_next(&mut self) -> FileResult<()> {
        let packet = loop {
            match self.reader.next_packet() {
                Ok(packet) => {
                    if packet.track_id() == self.track_id {
                        break packet;
                    }
                }
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.eof = true;
                    return Ok(());
                }
                Err(e) => return Err(FileError::Decode(e.to_string())),
            }
        };

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A corrupt packet is skippable; the stream continues.
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("skipping undecodable packet: {e}");
                return Ok(());
            }
            Err(e) => return Err(FileError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let sample_buf = self
            .sample_buf
            .get_or_insert_with(|| SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        sample_buf.copy_interleaved_ref(decoded);

        let samples = sample_buf.samples();
        for frame in samples.chunks_exact(self.channels) {
            for (queue, &sample) in self.pending.iter_mut().zip(frame) {
                queue.push_back(sample);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(frames: usize, channels: u16) -> tempfile::TempPath {
        let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        let spec = hound::WavSpec {
            channels,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(file.path(), spec).unwrap();
        for i in 0..frames {
            for c in 0..channels {
                writer
                    .write_sample((i as f32 + c as f32 * 1000.0) / 100000.0)
                    .unwrap();
            }
        }
        writer.finalize().unwrap();
        file.into_temp_path()
    }

    #[test]
    fn test_open_reports_stream_parameters() {
        let path = write_test_wav(100, 2);
        let reader = BlockReader::open(&path).unwrap();
        assert_eq!(reader.sample_rate(), 48000);
        assert_eq!(reader.channels(), 2);
    }

    #[test]
    fn test_read_blocks_until_eof() {
        let path = write_test_wav(1000, 2);
        let mut reader = BlockReader::open(&path).unwrap();
        let mut out = vec![Vec::new(), Vec::new()];

        let mut total = 0;
        loop {
            let n = reader.read_block(&mut out, 512).unwrap();
            if n == 0 {
                break;
            }
            // Spot-check sample values against what was written.
            if total == 0 {
                assert!((out[0][3] - 3.0 / 100000.0).abs() < 1e-7);
                assert!((out[1][3] - 1003.0 / 100000.0).abs() < 1e-7);
            }
            total += n;
        }
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_tail_block_is_short() {
        let path = write_test_wav(700, 1);
        let mut reader = BlockReader::open(&path).unwrap();
        let mut out = vec![Vec::new()];
        assert_eq!(reader.read_block(&mut out, 512).unwrap(), 512);
        assert_eq!(reader.read_block(&mut out, 512).unwrap(), 188);
        assert_eq!(reader.read_block(&mut out, 512).unwrap(), 0);
    }

    #[test]
    fn test_open_missing_file_fails() {
        assert!(BlockReader::open("/nonexistent/audio.wav").is_err());
    }
}
