//! Sample format descriptors
//!
//! A [`SampleFormat`] fully describes how samples are laid out in an
//! [`AudioBuffer`](crate::AudioBuffer): element width, planar vs
//! interleaved storage, and the ordered channel layout. Two formats
//! compare equal iff all fields match; pad compatibility checks rely on
//! that.

/// Element type of a single sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleElement {
    U8,
    S16,
    S32,
    F32,
    F64,
}

impl SampleElement {
    /// Size of one sample in bytes
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Parse a configuration name (`"f32"`, `"s16"`, ...)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "u8" => Some(Self::U8),
            "s16" => Some(Self::S16),
            "s32" => Some(Self::S32),
            "f32" | "flt" => Some(Self::F32),
            "f64" | "dbl" => Some(Self::F64),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

/// Plane layout of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleLayout {
    /// One plane per channel
    Planar,
    /// Single plane, channels interleaved frame by frame
    Interleaved,
}

impl SampleLayout {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "planar" => Some(Self::Planar),
            "interleaved" | "packed" => Some(Self::Interleaved),
            _ => None,
        }
    }
}

/// Position tag for one channel in a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelTag {
    FrontLeft,
    FrontRight,
    Center,
    Lfe,
    BackLeft,
    BackRight,
    /// Untagged auxiliary channel (driver channel strips, stems)
    Aux(u8),
}

/// Ordered sequence of channel tags
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelLayout {
    tags: Vec<ChannelTag>,
}

impl ChannelLayout {
    pub fn new(tags: Vec<ChannelTag>) -> Self {
        Self { tags }
    }

    pub fn mono() -> Self {
        Self {
            tags: vec![ChannelTag::Center],
        }
    }

    pub fn stereo() -> Self {
        Self {
            tags: vec![ChannelTag::FrontLeft, ChannelTag::FrontRight],
        }
    }

    /// Mono, stereo, or N auxiliary channels for other counts
    pub fn from_count(count: usize) -> Self {
        match count {
            1 => Self::mono(),
            2 => Self::stereo(),
            n => Self {
                tags: (0..n).map(|i| ChannelTag::Aux(i as u8)).collect(),
            },
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.tags.len()
    }

    #[inline]
    pub fn tags(&self) -> &[ChannelTag] {
        &self.tags
    }
}

/// Full sample format descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleFormat {
    pub element: SampleElement,
    pub layout: SampleLayout,
    pub channels: ChannelLayout,
}

impl SampleFormat {
    pub fn new(element: SampleElement, layout: SampleLayout, channels: ChannelLayout) -> Self {
        Self {
            element,
            layout,
            channels,
        }
    }

    /// The engine's default internal format: planar f32
    pub fn planar_f32(channels: ChannelLayout) -> Self {
        Self {
            element: SampleElement::F32,
            layout: SampleLayout::Planar,
            channels,
        }
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.count()
    }

    /// Number of planes a buffer of this format carries
    #[inline]
    pub fn plane_count(&self) -> usize {
        match self.layout {
            SampleLayout::Planar => self.channels.count(),
            SampleLayout::Interleaved => 1,
        }
    }

    /// Bytes per plane for the given frame count
    #[inline]
    pub fn plane_bytes(&self, frames: usize) -> usize {
        match self.layout {
            SampleLayout::Planar => frames * self.element.bytes(),
            SampleLayout::Interleaved => frames * self.channels.count() * self.element.bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_equality() {
        let a = SampleFormat::planar_f32(ChannelLayout::stereo());
        let b = SampleFormat::planar_f32(ChannelLayout::stereo());
        assert_eq!(a, b);

        let c = SampleFormat::new(
            SampleElement::F32,
            SampleLayout::Interleaved,
            ChannelLayout::stereo(),
        );
        assert_ne!(a, c);

        let d = SampleFormat::planar_f32(ChannelLayout::mono());
        assert_ne!(a, d);
    }

    #[test]
    fn test_plane_geometry() {
        let planar = SampleFormat::planar_f32(ChannelLayout::stereo());
        assert_eq!(planar.plane_count(), 2);
        assert_eq!(planar.plane_bytes(512), 512 * 4);

        let inter = SampleFormat::new(
            SampleElement::S16,
            SampleLayout::Interleaved,
            ChannelLayout::stereo(),
        );
        assert_eq!(inter.plane_count(), 1);
        assert_eq!(inter.plane_bytes(512), 512 * 2 * 2);
    }

    #[test]
    fn test_element_names() {
        assert_eq!(SampleElement::from_name("F32"), Some(SampleElement::F32));
        assert_eq!(SampleElement::from_name("s16"), Some(SampleElement::S16));
        assert_eq!(SampleElement::from_name("s24"), None);
        assert_eq!(SampleElement::S32.bytes(), 4);
    }
}
