//! Fan-in mixer for inputs already in the mixer's sample rate

use std::sync::{Arc, Weak};

use delegate::delegate;
use rtrb::Consumer;

use crate::error::{AudioError, Result};
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, NodeCore, ReadResult};
use crate::port::OutputPort;

use super::{ChannelFinished, ChannelToken, MixerCore, MixerNode, SlotId, SlotPlan};

/// Per-input channel routing: `(input_channel, output_channel, gain)`.
///
/// An input channel may feed several outputs and an output may receive
/// several inputs; the contributions add up.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelRouting {
    routes: Vec<(usize, usize, f32)>,
}

impl ChannelRouting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route from `input_channel` to `output_channel`.
    pub fn route(mut self, input_channel: usize, output_channel: usize, gain: f32) -> Self {
        self.routes.push((input_channel, output_channel, gain));
        self
    }

    /// Channel `n` to channel `n` at unity gain, for the first `channels`.
    pub fn identity(channels: usize) -> Self {
        Self {
            routes: (0..channels).map(|ch| (ch, ch, 1.0)).collect(),
        }
    }

    pub fn routes(&self) -> &[(usize, usize, f32)] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Check every route against the channel counts on both sides.
    pub fn validate(&self, input_channels: usize, output_channels: usize) -> Result<()> {
        for &(input_ch, output_ch, gain) in &self.routes {
            if input_ch >= input_channels {
                return Err(AudioError::invalid_argument(format!(
                    "route reads input channel {} of {}",
                    input_ch, input_channels
                )));
            }
            if output_ch >= output_channels {
                return Err(AudioError::invalid_argument(format!(
                    "route writes output channel {} of {}",
                    output_ch, output_channels
                )));
            }
            if !gain.is_finite() {
                return Err(AudioError::invalid_argument(format!(
                    "route {} -> {} has gain {}",
                    input_ch, output_ch, gain
                )));
            }
        }
        Ok(())
    }
}

/// Mixer whose inputs share its sample rate.
///
/// Without a routing an input must match the mixer's format exactly. With a
/// [`ChannelRouting`] any channel count is accepted and each input channel
/// lands wherever the routing sends it.
///
/// # Example
///
/// ```
/// use klangnetz::{AudioFormat, AudioGraph, AudioSource, ReadResult};
/// use klangnetz::nodes::{ChannelFaninMixer, FixedSampleSource};
///
/// let graph = AudioGraph::builder().build();
/// let format = AudioFormat::mono(8000);
/// let mixer = ChannelFaninMixer::new(&graph, "mix", format).unwrap();
/// let a = FixedSampleSource::new(&graph, "a", format, vec![0.25, 0.25]).unwrap();
/// let b = FixedSampleSource::new(&graph, "b", format, vec![0.5]).unwrap();
/// mixer.add_input(a, Some("a".into()), true).unwrap();
/// mixer.add_input(b, None, true).unwrap();
///
/// let mut out = [0.0; 4];
/// assert_eq!(mixer.read(&mut out).unwrap(), ReadResult::Read(2));
/// assert_eq!(out, [0.75, 0.25, 0.0, 0.0]);
/// ```
pub struct ChannelFaninMixer {
    core: NodeCore,
    output: OutputPort,
    mix: MixerCore,
}

impl ChannelFaninMixer {
    pub fn new(graph: &Arc<AudioGraph>, name: &str, format: AudioFormat) -> Result<Arc<Self>> {
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me: &Weak<Self>| {
            let source: Weak<dyn AudioSource> = me.clone();
            let host: Weak<dyn MixerNode> = me.clone();
            Self {
                core,
                output: OutputPort::new(source),
                mix: MixerCore::new(name, format, host),
            }
        }))
    }

    /// Keep producing silence after every input has finished.
    pub fn with_read_forever(self: Arc<Self>, forever: bool) -> Arc<Self> {
        self.mix.set_read_forever(forever);
        self
    }

    pub fn with_max_staged_frames(self: Arc<Self>, frames: usize) -> Arc<Self> {
        self.mix.set_max_staged_frames(frames);
        self
    }

    /// Mix `input` in unchanged. Its format must equal the mixer's.
    ///
    /// With `owns_input` the mixer disposes the input once it finishes, or
    /// when the mixer is cleared or disposed.
    pub fn add_input(
        &self,
        input: Arc<dyn AudioSource>,
        token: Option<ChannelToken>,
        owns_input: bool,
    ) -> Result<SlotId> {
        self.mix.ensure_accepting()?;
        self.check_rate(&*input)?;
        if input.format() != self.core.format() {
            return Err(AudioError::invalid_argument(format!(
                "input '{}' is {}, mixer '{}' is {}",
                input.name(),
                input.format(),
                self.core.name(),
                self.core.format()
            )));
        }
        let plan = SlotPlan {
            routing: None,
            format: input.format(),
            chain: Vec::new(),
        };
        self.mix.add_slot(input, token, owns_input, plan)
    }

    /// Mix `input` in through `routing`.
    pub fn add_routed_input(
        &self,
        input: Arc<dyn AudioSource>,
        token: Option<ChannelToken>,
        owns_input: bool,
        routing: ChannelRouting,
    ) -> Result<SlotId> {
        self.mix.ensure_accepting()?;
        self.check_rate(&*input)?;
        routing.validate(input.format().channels(), self.core.channels())?;
        let plan = SlotPlan {
            routing: Some(routing),
            format: input.format(),
            chain: Vec::new(),
        };
        self.mix.add_slot(input, token, owns_input, plan)
    }

    fn check_rate(&self, input: &dyn AudioSource) -> Result<()> {
        let rate = input.format().sample_rate_hz();
        if rate != self.core.format().sample_rate_hz() {
            return Err(AudioError::invalid_argument(format!(
                "input '{}' runs at {}Hz, mixer '{}' at {}Hz",
                input.name(),
                rate,
                self.core.name(),
                self.core.format().sample_rate_hz()
            )));
        }
        Ok(())
    }

    delegate! {
        to self.mix {
            /// Detach an input without disposing it, handing it back to the
            /// caller. Returns false if the slot is unknown.
            pub fn remove_input(&self, slot: SlotId) -> bool;
            /// Remove every input, disposing the owned ones.
            pub fn clear(&self);
            pub fn input_count(&self) -> usize;
            /// Subscribe to per-input exhaustion of tokened inputs.
            pub fn channel_finished_events(&self, capacity: usize) -> Consumer<ChannelFinished>;
            pub fn read_forever(&self) -> bool;
            pub fn set_read_forever(&self, forever: bool);
            pub fn max_staged_frames(&self) -> usize;
            pub fn set_max_staged_frames(&self, frames: usize);
            /// Emit everything staged by pushing inputs, then flush downstream.
            pub fn flush(&self) -> Result<()>;
        }
    }
}

impl AudioNode for ChannelFaninMixer {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_source(&self) -> Option<&dyn AudioSource> {
        Some(self)
    }

    fn on_dispose(&self) {
        self.mix.clear();
    }
}

impl AudioSource for ChannelFaninMixer {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        self.mix.read_mix(buffer)
    }
}

impl MixerNode for ChannelFaninMixer {
    fn mixer(&self) -> &MixerCore {
        &self.mix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{FixedSampleSource, SilenceSource};

    fn mono() -> AudioFormat {
        AudioFormat::mono(8000)
    }

    #[test]
    fn routing_validation() {
        let routing = ChannelRouting::new().route(0, 1, 1.0);
        assert!(routing.validate(1, 2).is_ok());
        assert!(matches!(routing.validate(1, 1), Err(AudioError::InvalidArgument(_))));
        let routing = ChannelRouting::new().route(2, 0, 1.0);
        assert!(matches!(routing.validate(2, 2), Err(AudioError::InvalidArgument(_))));
        let routing = ChannelRouting::new().route(0, 0, f32::NAN);
        assert!(routing.validate(1, 1).is_err());
    }

    #[test]
    fn rejects_other_rates_and_formats() {
        let graph = AudioGraph::builder().build();
        let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
        let fast = SilenceSource::new(&graph, "fast", AudioFormat::mono(16000)).unwrap();
        let wide = SilenceSource::new(&graph, "wide", AudioFormat::stereo(8000)).unwrap();
        assert!(matches!(
            mixer.add_input(fast, None, false),
            Err(AudioError::InvalidArgument(_))
        ));
        assert!(matches!(
            mixer.add_input(wide.clone(), None, false),
            Err(AudioError::InvalidArgument(_))
        ));
        let routing = ChannelRouting::new().route(0, 0, 0.5).route(1, 0, 0.5);
        assert!(mixer.add_routed_input(wide, None, false, routing).is_ok());
        assert_eq!(mixer.input_count(), 1);
    }

    #[test]
    fn routed_stereo_downmix() {
        let graph = AudioGraph::builder().build();
        let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
        let stereo =
            FixedSampleSource::new(&graph, "st", AudioFormat::stereo(8000), vec![1.0, 0.0, 0.5, 0.5])
                .unwrap();
        let routing = ChannelRouting::new().route(0, 0, 0.5).route(1, 0, 0.5);
        mixer.add_routed_input(stereo, None, true, routing).unwrap();

        let mut out = [0.0; 2];
        assert_eq!(mixer.read(&mut out).unwrap(), ReadResult::Read(2));
        assert_eq!(out, [0.5, 0.5]);
    }

    #[test]
    fn no_inputs_reads_empty() {
        let graph = AudioGraph::builder().build();
        let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
        let mut out = [1.0; 4];
        assert_eq!(mixer.read(&mut out).unwrap(), ReadResult::Empty);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn finished_mixer_refuses_inputs() {
        let graph = AudioGraph::builder().build();
        let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
        let a = FixedSampleSource::new(&graph, "a", mono(), vec![0.1]).unwrap();
        mixer.add_input(a, None, true).unwrap();

        let mut out = [0.0; 4];
        assert_eq!(mixer.read(&mut out).unwrap(), ReadResult::Read(1));
        assert_eq!(mixer.read(&mut out).unwrap(), ReadResult::Finished);

        let b = FixedSampleSource::new(&graph, "b", mono(), vec![0.1]).unwrap();
        assert!(matches!(
            mixer.add_input(b, None, true),
            Err(AudioError::InvalidState(_))
        ));
    }

    #[test]
    fn removed_input_is_returned_live() {
        let graph = AudioGraph::builder().build();
        let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
        let a = FixedSampleSource::new(&graph, "a", mono(), vec![0.1, 0.2]).unwrap();
        let slot = mixer.add_input(a.clone(), None, true).unwrap();
        assert!(a.output().is_connected());

        assert!(mixer.remove_input(slot));
        assert!(!mixer.remove_input(slot));
        assert!(!a.is_disposed());
        assert!(!a.output().is_connected());

        let mut out = [0.0; 2];
        assert_eq!(a.read(&mut out).unwrap(), ReadResult::Read(2));
        // removal alone never ends the mix
        assert_eq!(mixer.read(&mut out).unwrap(), ReadResult::Empty);
    }
}
