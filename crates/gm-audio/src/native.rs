//! Native driver sample conversion
//!
//! Drivers expose channel memory in whatever width and endianness the
//! hardware negotiated. These helpers convert between that native layout
//! and the engine's internal f32 samples, one channel block at a time.

/// Sample type of a driver channel's native memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeSampleType {
    S16Le,
    S24Le,
    S32Le,
    F32Le,
    F64Le,
    // Big endian variants (rare)
    S16Be,
    S24Be,
    S32Be,
    F32Be,
    F64Be,
}

impl NativeSampleType {
    /// Size of one sample in bytes
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            Self::S16Le | Self::S16Be => 2,
            Self::S24Le | Self::S24Be => 3,
            Self::S32Le | Self::S32Be | Self::F32Le | Self::F32Be => 4,
            Self::F64Le | Self::F64Be => 8,
        }
    }
}

/// Convert one native sample to f32
#[inline]
pub fn native_to_f32(data: &[u8], ty: NativeSampleType) -> f32 {
    match ty {
        NativeSampleType::S16Le => i16::from_le_bytes([data[0], data[1]]) as f32 / 32768.0,
        NativeSampleType::S16Be => i16::from_be_bytes([data[0], data[1]]) as f32 / 32768.0,
        NativeSampleType::S24Le => {
            let ext = if data[2] & 0x80 != 0 { 0xFF } else { 0x00 };
            i32::from_le_bytes([data[0], data[1], data[2], ext]) as f32 / 8388608.0
        }
        NativeSampleType::S24Be => {
            let ext = if data[0] & 0x80 != 0 { 0xFF } else { 0x00 };
            i32::from_be_bytes([ext, data[0], data[1], data[2]]) as f32 / 8388608.0
        }
        NativeSampleType::S32Le => {
            i32::from_le_bytes([data[0], data[1], data[2], data[3]]) as f32 / 2147483648.0
        }
        NativeSampleType::S32Be => {
            i32::from_be_bytes([data[0], data[1], data[2], data[3]]) as f32 / 2147483648.0
        }
        NativeSampleType::F32Le => f32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        NativeSampleType::F32Be => f32::from_be_bytes([data[0], data[1], data[2], data[3]]),
        NativeSampleType::F64Le => f64::from_le_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ]) as f32,
        NativeSampleType::F64Be => f64::from_be_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ]) as f32,
    }
}

/// Convert one f32 sample to native bytes
#[inline]
pub fn f32_to_native(value: f32, ty: NativeSampleType, output: &mut [u8]) {
    let clamped = value.clamp(-1.0, 1.0);
    match ty {
        NativeSampleType::S16Le => {
            output[..2].copy_from_slice(&((clamped * 32767.0) as i16).to_le_bytes());
        }
        NativeSampleType::S16Be => {
            output[..2].copy_from_slice(&((clamped * 32767.0) as i16).to_be_bytes());
        }
        NativeSampleType::S24Le => {
            let bytes = ((clamped * 8388607.0) as i32).to_le_bytes();
            output[..3].copy_from_slice(&bytes[..3]);
        }
        NativeSampleType::S24Be => {
            let bytes = ((clamped * 8388607.0) as i32).to_be_bytes();
            output[..3].copy_from_slice(&bytes[1..]);
        }
        NativeSampleType::S32Le => {
            output[..4].copy_from_slice(&((clamped * 2147483647.0) as i32).to_le_bytes());
        }
        NativeSampleType::S32Be => {
            output[..4].copy_from_slice(&((clamped * 2147483647.0) as i32).to_be_bytes());
        }
        NativeSampleType::F32Le => {
            output[..4].copy_from_slice(&clamped.to_le_bytes());
        }
        NativeSampleType::F32Be => {
            output[..4].copy_from_slice(&clamped.to_be_bytes());
        }
        NativeSampleType::F64Le => {
            output[..8].copy_from_slice(&(clamped as f64).to_le_bytes());
        }
        NativeSampleType::F64Be => {
            output[..8].copy_from_slice(&(clamped as f64).to_be_bytes());
        }
    }
}

/// Convert a native channel block to f32 samples.
///
/// Converts `min(bytes / sample_size, out.len())` samples.
pub fn decode_channel(bytes: &[u8], ty: NativeSampleType, out: &mut [f32]) {
    let size = ty.bytes();
    for (chunk, sample) in bytes.chunks_exact(size).zip(out.iter_mut()) {
        *sample = native_to_f32(chunk, ty);
    }
}

/// Convert f32 samples into a native channel block.
pub fn encode_channel(samples: &[f32], ty: NativeSampleType, out: &mut [u8]) {
    let size = ty.bytes();
    for (&sample, chunk) in samples.iter().zip(out.chunks_exact_mut(size)) {
        f32_to_native(sample, ty, chunk);
    }
}

/// Fill a native channel block with silence.
pub fn silence_channel(ty: NativeSampleType, out: &mut [u8]) {
    let size = ty.bytes();
    for chunk in out.chunks_exact_mut(size) {
        f32_to_native(0.0, ty, chunk);
    }
}
