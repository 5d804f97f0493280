//! Codec plug-in contract.
//!
//! Concrete codecs live outside this crate. An encoder is a target that
//! writes encoded bytes to a stream; a decoder is a source that reads them.
//! The two agree on format through a [`CodecParams`] string the encoder
//! produces and the decoder consumes.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use itertools::Itertools;

use crate::error::{AudioError, Result};
use crate::format::{AudioFormat, ChannelLayout};
use crate::node::{AudioSource, AudioTarget};

/// Ordered `key=value` parameters, rendered space separated:
/// `"samplerate=48000 q=10 framesize=5 channels=2 layout=2"`.
///
/// ```
/// use klangnetz::codec::CodecParams;
/// use klangnetz::AudioFormat;
///
/// let params: CodecParams = "samplerate=48000 q=10 channels=2 layout=2".parse().unwrap();
/// assert_eq!(params.get("q"), Some("10"));
/// assert_eq!(params.format().unwrap(), AudioFormat::stereo(48000));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodecParams {
    entries: Vec<(String, String)>,
}

impl CodecParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// The format keys (`samplerate`, `channels`, `layout`) for `format`.
    pub fn from_format(format: &AudioFormat) -> Self {
        Self::new()
            .with("samplerate", format.sample_rate_hz())
            .with("channels", format.channel_count())
            .with("layout", format.layout().code())
    }

    /// Set `key`, replacing an existing value in place (builder pattern).
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parse `key` as a number. Missing keys are `Ok(None)`.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                AudioError::invalid_argument(format!("codec parameter {}={} is not valid", key, raw))
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reconstruct the stream format.
    ///
    /// `samplerate` is required. `channels` defaults to 1; `layout` defaults
    /// to mono, stereo or packed depending on the channel count.
    pub fn format(&self) -> Result<AudioFormat> {
        let rate: u32 = self
            .get_parsed("samplerate")?
            .ok_or_else(|| AudioError::invalid_argument("codec parameters lack samplerate"))?;
        let channels: u8 = self.get_parsed("channels")?.unwrap_or(1);
        let layout = match self.get_parsed::<u8>("layout")? {
            Some(code) => ChannelLayout::from_code(code, channels).ok_or_else(|| {
                AudioError::invalid_argument(format!("unknown channel layout code {}", code))
            })?,
            None => match channels {
                1 => ChannelLayout::Mono,
                2 => ChannelLayout::Stereo,
                n => ChannelLayout::Packed(n),
            },
        };
        let format = AudioFormat::new(rate, layout)?;
        if format.channel_count() != channels {
            return Err(AudioError::invalid_argument(format!(
                "layout {} conflicts with channels={}",
                layout, channels
            )));
        }
        Ok(format)
    }
}

impl fmt::Display for CodecParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .join(" ");
        f.write_str(&rendered)
    }
}

impl FromStr for CodecParams {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self> {
        let mut params = CodecParams::new();
        for token in s.split_whitespace() {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                AudioError::invalid_argument(format!("malformed codec parameter '{}'", token))
            })?;
            if key.is_empty() {
                return Err(AudioError::invalid_argument(format!(
                    "codec parameter '{}' has no key",
                    token
                )));
            }
            params.set(key, value);
        }
        Ok(params)
    }
}

/// What a decoder learned while initializing.
#[derive(Clone, Debug, PartialEq)]
pub struct DecoderInit {
    /// Format of the decoded stream; must equal the decoder node's format.
    pub format: AudioFormat,
    /// Bytes of padding skipped before the encoded payload.
    pub skipped_bytes: usize,
}

/// Target that encodes the samples written to it into a byte stream.
pub trait AudioEncoder: AudioTarget {
    fn codec_name(&self) -> &str;

    /// Parameters the matching decoder needs.
    fn codec_params(&self) -> CodecParams;

    /// Attach the output stream. Must be called before the first write.
    fn initialize(&self, sink: Box<dyn Write + Send>) -> Result<()>;

    /// Flush pending samples and finalize the stream.
    fn finish(&self) -> Result<()>;
}

/// Source that decodes a byte stream into samples.
pub trait AudioDecoder: AudioSource {
    fn codec_name(&self) -> &str;

    /// Attach the input stream. Failure is reported as
    /// [`AudioError::CodecInit`], never as a read error.
    fn initialize(&self, stream: Box<dyn Read + Send>, params: &CodecParams) -> Result<DecoderInit>;
}
