//! Reference-counted audio buffers
//!
//! [`AudioBuffer`] is the unit of transfer between graph pads: a
//! multi-plane sample container with shared ownership. Holders clone the
//! handle ([`AudioBuffer::share`]); memory is freed when the last handle
//! drops. Writing follows the unique-owner discipline: mutation is only
//! possible while exactly one handle exists, enforced through
//! `Arc::get_mut`.
//!
//! Plane storage is backed by 8-byte words so typed views of any element
//! width can be produced with `bytemuck` casts without alignment
//! hazards.

use std::sync::Arc;

use crate::{EngineError, EngineResult, Sample, SampleElement, SampleFormat, SampleLayout};

/// One plane of raw sample memory.
///
/// `len` is the logical byte length; the word backing may carry up to 7
/// bytes of padding at the tail.
#[derive(Clone)]
struct Plane {
    words: Box<[u64]>,
    len: usize,
}

impl Plane {
    fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(8)].into_boxed_slice(),
            len,
        }
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }
}

#[derive(Clone)]
struct PlaneSet {
    planes: Vec<Plane>,
}

/// Reference-counted multi-plane sample container
pub struct AudioBuffer {
    frames: usize,
    sample_rate: u32,
    format: SampleFormat,
    data: Arc<PlaneSet>,
}

impl AudioBuffer {
    /// Allocate a zeroed buffer.
    ///
    /// Fails with `Alloc` if `frames` or the channel count is zero.
    pub fn new(frames: usize, sample_rate: u32, format: SampleFormat) -> EngineResult<Self> {
        if frames == 0 {
            return Err(EngineError::Alloc("zero-frame buffer".into()));
        }
        if format.channel_count() == 0 {
            return Err(EngineError::Alloc("zero-channel buffer".into()));
        }
        let plane_len = format.plane_bytes(frames);
        let planes = (0..format.plane_count())
            .map(|_| Plane::zeroed(plane_len))
            .collect();
        Ok(Self {
            frames,
            sample_rate,
            format,
            data: Arc::new(PlaneSet { planes }),
        })
    }

    /// Share the buffer: a new handle over the same memory, O(1).
    #[inline]
    pub fn share(&self) -> Self {
        Self {
            frames: self.frames,
            sample_rate: self.sample_rate,
            format: self.format.clone(),
            data: Arc::clone(&self.data),
        }
    }

    /// Allocate fresh memory and copy all planes.
    pub fn deep_copy(&self) -> EngineResult<Self> {
        Ok(Self {
            frames: self.frames,
            sample_rate: self.sample_rate,
            format: self.format.clone(),
            data: Arc::new(PlaneSet::clone(&self.data)),
        })
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn format(&self) -> &SampleFormat {
        &self.format
    }

    #[inline]
    pub fn plane_count(&self) -> usize {
        self.data.planes.len()
    }

    /// Byte length of every plane
    #[inline]
    pub fn linesize(&self) -> usize {
        self.data.planes.first().map(|p| p.len).unwrap_or(0)
    }

    /// True while this is the only handle to the memory.
    ///
    /// The unique holder may write; everyone else reads.
    #[inline]
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.data) == 1
    }

    /// Read view of plane `i`
    pub fn plane(&self, i: usize) -> EngineResult<&[u8]> {
        self.data
            .planes
            .get(i)
            .map(Plane::bytes)
            .ok_or_else(|| EngineError::FormatMismatch(format!("no plane {i}")))
    }

    /// Write view of plane `i`; fails while the buffer is shared.
    pub fn plane_mut(&mut self, i: usize) -> EngineResult<&mut [u8]> {
        let set = Arc::get_mut(&mut self.data)
            .ok_or_else(|| EngineError::InvalidState("write to shared buffer".into()))?;
        set.planes
            .get_mut(i)
            .map(Plane::bytes_mut)
            .ok_or_else(|| EngineError::FormatMismatch(format!("no plane {i}")))
    }

    /// Typed f32 view of plane `i`
    pub fn plane_f32(&self, i: usize) -> EngineResult<&[f32]> {
        if self.format.element != SampleElement::F32 {
            return Err(EngineError::FormatMismatch(format!(
                "f32 view of {} buffer",
                self.format.element.name()
            )));
        }
        let plane = self
            .data
            .planes
            .get(i)
            .ok_or_else(|| EngineError::FormatMismatch(format!("no plane {i}")))?;
        Ok(&bytemuck::cast_slice(&plane.words)[..plane.len / 4])
    }

    /// Typed mutable f32 view of plane `i`; fails while shared.
    pub fn plane_f32_mut(&mut self, i: usize) -> EngineResult<&mut [f32]> {
        if self.format.element != SampleElement::F32 {
            return Err(EngineError::FormatMismatch(format!(
                "f32 view of {} buffer",
                self.format.element.name()
            )));
        }
        let set = Arc::get_mut(&mut self.data)
            .ok_or_else(|| EngineError::InvalidState("write to shared buffer".into()))?;
        let plane = set
            .planes
            .get_mut(i)
            .ok_or_else(|| EngineError::FormatMismatch(format!("no plane {i}")))?;
        let len = plane.len / 4;
        Ok(&mut bytemuck::cast_slice_mut(&mut plane.words)[..len])
    }

    /// Iterate channel `c` as f32 samples regardless of layout.
    ///
    /// For planar buffers this walks plane `c`; for interleaved buffers
    /// it strides over plane 0.
    pub fn channel_f32(&self, c: usize) -> EngineResult<impl Iterator<Item = f32> + '_> {
        let channels = self.format.channel_count();
        if c >= channels {
            return Err(EngineError::FormatMismatch(format!("no channel {c}")));
        }
        let (plane, offset, stride) = match self.format.layout {
            SampleLayout::Planar => (c, 0, 1),
            SampleLayout::Interleaved => (0, c, channels),
        };
        Ok(self
            .plane_f32(plane)?
            .iter()
            .skip(offset)
            .step_by(stride)
            .copied())
    }

    /// Copy channel `c` into `out` as f32 samples, up to `out.len()`
    /// frames. Returns the number of samples copied.
    pub fn copy_channel_into(&self, c: usize, out: &mut [Sample]) -> EngineResult<usize> {
        let channels = self.format.channel_count();
        if c >= channels {
            return Err(EngineError::FormatMismatch(format!("no channel {c}")));
        }
        let (plane, offset, stride) = match self.format.layout {
            SampleLayout::Planar => (c, 0, 1),
            SampleLayout::Interleaved => (0, c, channels),
        };
        let src = self.plane_f32(plane)?;
        let n = self.frames.min(out.len());
        for (i, dst) in out.iter_mut().enumerate().take(n) {
            *dst = src[offset + i * stride];
        }
        Ok(n)
    }

    /// Write f32 samples into channel `c`; fails while shared. Copies
    /// `min(samples.len(), frames)` frames.
    pub fn copy_into_channel(&mut self, c: usize, samples: &[Sample]) -> EngineResult<()> {
        let channels = self.format.channel_count();
        if c >= channels {
            return Err(EngineError::FormatMismatch(format!("no channel {c}")));
        }
        let (plane, offset, stride) = match self.format.layout {
            SampleLayout::Planar => (c, 0, 1),
            SampleLayout::Interleaved => (0, c, channels),
        };
        let frames = self.frames;
        let dst = self.plane_f32_mut(plane)?;
        for (i, &s) in samples.iter().enumerate().take(frames) {
            dst[offset + i * stride] = s;
        }
        Ok(())
    }

    /// Zero all planes; fails while shared.
    pub fn clear(&mut self) -> EngineResult<()> {
        let set = Arc::get_mut(&mut self.data)
            .ok_or_else(|| EngineError::InvalidState("write to shared buffer".into()))?;
        for plane in &mut set.planes {
            plane.bytes_mut().fill(0);
        }
        Ok(())
    }
}

impl std::fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("frames", &self.frames)
            .field("sample_rate", &self.sample_rate)
            .field("format", &self.format)
            .field("refs", &Arc::strong_count(&self.data))
            .finish()
    }
}

/// Fixed pool of recyclable output buffers.
///
/// Producing nodes write into the first slot whose memory is no longer
/// shared with any downstream holder, then hand a share out. Slot count
/// is sized to cover the longest downstream retention (queue bounds plus
/// in-flight blocks); [`BufferPool::acquire`] returns `None` on
/// exhaustion so callers can fall back to allocating off the steady
/// path.
pub struct BufferPool {
    slots: Vec<AudioBuffer>,
}

impl BufferPool {
    pub fn new(
        slots: usize,
        frames: usize,
        sample_rate: u32,
        format: &SampleFormat,
    ) -> EngineResult<Self> {
        let slots = (0..slots)
            .map(|_| AudioBuffer::new(frames, sample_rate, format.clone()))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self { slots })
    }

    /// First slot whose memory is uniquely held, ready for rewriting.
    pub fn acquire(&mut self) -> Option<&mut AudioBuffer> {
        let idx = self.slots.iter().position(AudioBuffer::is_unique)?;
        Some(&mut self.slots[idx])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
