//! Audio format description and compatibility checks.

use std::fmt;
use std::time::Duration;

use crate::error::{AudioError, Result};

/// Arrangement of interleaved channels within a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    /// Single channel.
    Mono,
    /// Left, right.
    Stereo,
    /// Right, left.
    StereoRightLeft,
    /// Front left, front right, rear left, rear right.
    Quad,
    /// L, R, C, LFE, Ls, Rs.
    Surround51,
    /// `n` channels without positional meaning.
    Packed(u8),
}

impl ChannelLayout {
    /// Number of channels implied by the layout.
    pub fn channel_count(self) -> u8 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo | ChannelLayout::StereoRightLeft => 2,
            ChannelLayout::Quad => 4,
            ChannelLayout::Surround51 => 6,
            ChannelLayout::Packed(n) => n,
        }
    }

    /// Numeric code used in codec parameter strings.
    pub fn code(self) -> u8 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::StereoRightLeft => 3,
            ChannelLayout::Quad => 4,
            ChannelLayout::Surround51 => 5,
            ChannelLayout::Packed(_) => 6,
        }
    }

    /// Inverse of [`code`](Self::code). `channels` is only consulted for packed layouts.
    pub fn from_code(code: u8, channels: u8) -> Option<Self> {
        match code {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            3 => Some(ChannelLayout::StereoRightLeft),
            4 => Some(ChannelLayout::Quad),
            5 => Some(ChannelLayout::Surround51),
            6 if channels > 0 => Some(ChannelLayout::Packed(channels)),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelLayout::Mono => write!(f, "Mono"),
            ChannelLayout::Stereo => write!(f, "Stereo"),
            ChannelLayout::StereoRightLeft => write!(f, "StereoRL"),
            ChannelLayout::Quad => write!(f, "Quad"),
            ChannelLayout::Surround51 => write!(f, "5.1"),
            ChannelLayout::Packed(n) => write!(f, "Packed{}", n),
        }
    }
}

/// Immutable description of an interleaved `f32` sample stream.
///
/// Two formats are compatible iff sample rate, channel count and layout are
/// all equal, which is exactly what the derived `Eq` and `Hash` compare.
///
/// ```
/// use klangnetz::{AudioFormat, ChannelLayout};
///
/// let fmt = AudioFormat::new(48000, ChannelLayout::Stereo).unwrap();
/// assert_eq!(fmt, AudioFormat::stereo(48000));
/// assert_eq!(fmt.duration_to_frames(std::time::Duration::from_millis(10)), 480);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    sample_rate_hz: u32,
    channel_count: u8,
    layout: ChannelLayout,
}

impl AudioFormat {
    /// Create a validated format. The channel count is taken from the layout.
    pub fn new(sample_rate_hz: u32, layout: ChannelLayout) -> Result<Self> {
        let format = Self {
            sample_rate_hz,
            channel_count: layout.channel_count(),
            layout,
        };
        format.validate()?;
        Ok(format)
    }

    /// Mono format at the given rate.
    pub const fn mono(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            channel_count: 1,
            layout: ChannelLayout::Mono,
        }
    }

    /// Left/right stereo format at the given rate.
    pub const fn stereo(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            channel_count: 2,
            layout: ChannelLayout::Stereo,
        }
    }

    /// `channels` channels with no positional meaning.
    pub const fn packed(sample_rate_hz: u32, channels: u8) -> Self {
        Self {
            sample_rate_hz,
            channel_count: channels,
            layout: ChannelLayout::Packed(channels),
        }
    }

    /// Check the invariants every node relies on.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate_hz == 0 {
            return Err(AudioError::invalid_argument("sample rate must be > 0"));
        }
        if self.channel_count == 0 {
            return Err(AudioError::invalid_argument("channel count must be > 0"));
        }
        if self.channel_count != self.layout.channel_count() {
            return Err(AudioError::invalid_argument(format!(
                "layout {} does not have {} channels",
                self.layout, self.channel_count
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    #[inline]
    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// Channel count as a `usize`, for slice arithmetic.
    #[inline]
    pub fn channels(&self) -> usize {
        self.channel_count as usize
    }

    #[inline]
    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// Fail unless both formats are present and identical.
    ///
    /// A missing format is an argument error, not a mismatch.
    pub fn assert_formats_equal(a: Option<&AudioFormat>, b: Option<&AudioFormat>) -> Result<()> {
        match (a, b) {
            (Some(a), Some(b)) if a == b => Ok(()),
            (Some(a), Some(b)) => Err(AudioError::FormatMismatch {
                expected: *a,
                actual: *b,
            }),
            _ => Err(AudioError::invalid_argument("audio format is missing")),
        }
    }

    /// Number of frames covering `duration`, rounded to the nearest frame.
    pub fn duration_to_frames(&self, duration: Duration) -> usize {
        (duration.as_secs_f64() * self.sample_rate_hz as f64).round() as usize
    }

    /// Playback duration of `frames` frames.
    pub fn frames_to_duration(&self, frames: usize) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate_hz as f64)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz {}ch {}",
            self.sample_rate_hz, self.channel_count, self.layout
        )
    }
}
