//! Channel count/layout conversion

use std::sync::Arc;

use crate::error::{AudioError, Result};
use crate::format::{AudioFormat, ChannelLayout};
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, AudioTarget, NodeCore, ReadResult};
use crate::nodes::pipe_ports;
use crate::port::{InputPort, OutputPort};

/// How input channels map onto output channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mapping {
    /// Same arrangement; copy straight through.
    Copy,
    /// Left/right order flipped.
    Swap,
    /// One input channel repeated on every output channel.
    Broadcast,
    /// All input channels averaged into one.
    Average,
    /// Shared channels copied, extra output channels silent.
    CopyAndZero,
}

impl Mapping {
    fn between(input: ChannelLayout, output: ChannelLayout) -> Self {
        use ChannelLayout::*;
        match (input, output) {
            (a, b) if a == b => Mapping::Copy,
            (Stereo, StereoRightLeft) | (StereoRightLeft, Stereo) => Mapping::Swap,
            (Mono, _) => Mapping::Broadcast,
            (_, Mono) => Mapping::Average,
            _ => Mapping::CopyAndZero,
        }
    }

    fn apply(self, input: &[f32], in_channels: usize, output: &mut [f32], out_channels: usize) {
        let frames = input.len() / in_channels;
        let input = input.chunks_exact(in_channels);
        let output = output[..frames * out_channels].chunks_exact_mut(out_channels);
        for (src, dst) in input.zip(output) {
            match self {
                Mapping::Copy => dst.copy_from_slice(src),
                Mapping::Swap => {
                    dst[0] = src[1];
                    dst[1] = src[0];
                }
                Mapping::Broadcast => dst.fill(src[0]),
                Mapping::Average => dst[0] = src.iter().sum::<f32>() / in_channels as f32,
                Mapping::CopyAndZero => {
                    let shared = in_channels.min(out_channels);
                    dst[..shared].copy_from_slice(&src[..shared]);
                    dst[shared..].fill(0.0);
                }
            }
        }
    }
}

/// Pipe converting between channel layouts at the same sample rate.
///
/// Mono input is broadcast to every output channel, mono output is the
/// average of all input channels, stereo orders are swapped, and anything
/// else copies the channels both sides share and leaves the rest silent.
pub struct ChannelRemapper {
    core: NodeCore,
    input: InputPort,
    output: OutputPort,
    input_format: AudioFormat,
    mapping: Mapping,
}

impl ChannelRemapper {
    pub fn new(
        graph: &Arc<AudioGraph>,
        name: &str,
        input_format: AudioFormat,
        output_format: AudioFormat,
    ) -> Result<Arc<Self>> {
        input_format.validate()?;
        if input_format.sample_rate_hz() != output_format.sample_rate_hz() {
            return Err(AudioError::invalid_argument(format!(
                "channel remapper cannot change sample rate ({} -> {})",
                input_format.sample_rate_hz(),
                output_format.sample_rate_hz()
            )));
        }
        let mapping = Mapping::between(input_format.layout(), output_format.layout());
        let core = NodeCore::new(graph, name, output_format)?;
        Ok(Arc::new_cyclic(|me| {
            let (input, output) = pipe_ports(me);
            Self {
                core,
                input,
                output,
                input_format,
                mapping,
            }
        }))
    }
}

impl AudioNode for ChannelRemapper {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_source(&self) -> Option<&dyn AudioSource> {
        Some(self)
    }

    fn as_target(&self) -> Option<&dyn AudioTarget> {
        Some(self)
    }
}

impl AudioSource for ChannelRemapper {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let out_channels = self.core.channels();
        let in_channels = self.input_format.channels();
        if self.mapping == Mapping::Copy {
            return self.input.read(buffer);
        }
        let frames = buffer.len() / out_channels;
        let mut scratch = vec![0.0; frames * in_channels];
        let result = self.input.read(&mut scratch)?;
        if let ReadResult::Read(n) = result {
            self.mapping
                .apply(&scratch[..n * in_channels], in_channels, buffer, out_channels);
        }
        Ok(result)
    }
}

impl AudioTarget for ChannelRemapper {
    fn input(&self) -> &InputPort {
        &self.input
    }

    fn input_format(&self) -> AudioFormat {
        self.input_format
    }

    fn write_samples(&self, buffer: &[f32]) -> Result<usize> {
        let out_channels = self.core.channels();
        let in_channels = self.input_format.channels();
        let frames = buffer.len() / in_channels;
        let mut mapped = vec![0.0; frames * out_channels];
        self.mapping.apply(buffer, in_channels, &mut mapped, out_channels);
        self.output.write(&mapped)
    }

    fn flush_samples(&self) -> Result<()> {
        self.output.flush()
    }

    fn on_upstream_finished(&self) -> Result<()> {
        self.output.notify_finished()
    }
}
