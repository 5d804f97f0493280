//! Mixer that converts every input to its own format

use std::sync::{Arc, Weak};

use delegate::delegate;
use rtrb::Consumer;

use crate::error::Result;
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, NodeCore, ReadResult};
use crate::nodes::effect::{ChannelRemapper, Resampler};
use crate::port::OutputPort;

use super::{ChannelFinished, ChannelToken, MixerCore, MixerNode, SlotId, SlotPlan};

/// Mixer accepting inputs of any valid format.
///
/// An input whose layout differs gets a [`ChannelRemapper`], one whose rate
/// differs gets a [`Resampler`] after that. The conformers belong to the
/// slot and are disposed with it. Mixing itself is a plain sum.
pub struct LinearMixerAutoConforming {
    core: NodeCore,
    output: OutputPort,
    mix: MixerCore,
}

impl LinearMixerAutoConforming {
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

    /// Mix `input` in, converting it to the mixer's format on the way.
    pub fn add_input(
        &self,
        input: Arc<dyn AudioSource>,
        token: Option<ChannelToken>,
        owns_input: bool,
    ) -> Result<SlotId> {
        self.mix.ensure_accepting()?;
        let plan = self.plan_for(&*input)?;
        self.mix.add_slot(input, token, owns_input, plan)
    }

    fn plan_for(&self, input: &dyn AudioSource) -> Result<SlotPlan> {
        let graph = self.core.graph()?;
        let target = self.core.format();
        let mut format = input.format();
        format.validate()?;
        let mut chain: Vec<Arc<dyn AudioNode>> = Vec::new();

        if format.layout() != target.layout() {
            let remapped = AudioFormat::new(format.sample_rate_hz(), target.layout())?;
            let name = format!("{}/{}/remap", self.core.name(), input.name());
            chain.push(ChannelRemapper::new(&graph, &name, format, remapped)?);
            format = remapped;
        }
        if format.sample_rate_hz() != target.sample_rate_hz() {
            let name = format!("{}/{}/resample", self.core.name(), input.name());
            chain.push(Resampler::new(&graph, &name, format, target)?);
            format = target;
        }

        Ok(SlotPlan {
            routing: None,
            format,
            chain,
        })
    }

    delegate! {
        to self.mix {
            /// Detach an input without disposing it. Its conformers are
            /// disposed. Returns false if the slot is unknown.
            pub fn remove_input(&self, slot: SlotId) -> bool;
            /// Remove every input, disposing the owned ones.
            pub fn clear(&self);
            pub fn input_count(&self) -> usize;
            pub fn channel_finished_events(&self, capacity: usize) -> Consumer<ChannelFinished>;
            pub fn read_forever(&self) -> bool;
            pub fn set_read_forever(&self, forever: bool);
            pub fn max_staged_frames(&self) -> usize;
            pub fn set_max_staged_frames(&self, frames: usize);
            pub fn flush(&self) -> Result<()>;
        }
    }
}

impl AudioNode for LinearMixerAutoConforming {
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

impl AudioSource for LinearMixerAutoConforming {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        self.mix.read_mix(buffer)
    }
}

impl MixerNode for LinearMixerAutoConforming {
    fn mixer(&self) -> &MixerCore {
        &self.mix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::FixedSampleSource;

    #[test]
    fn mono_input_is_spread_over_stereo() {
        let graph = AudioGraph::builder().build();
        let mixer = LinearMixerAutoConforming::new(&graph, "mix", AudioFormat::stereo(8000)).unwrap();
        let mono = FixedSampleSource::new(&graph, "m", AudioFormat::mono(8000), vec![0.5, -0.5]).unwrap();
        mixer.add_input(mono, None, true).unwrap();
        // mixer, slot target, remapper, source
        assert_eq!(graph.node_count(), 4);

        let mut out = [0.0; 4];
        assert_eq!(mixer.read(&mut out).unwrap(), ReadResult::Read(2));
        assert_eq!(out, [0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn half_rate_input_is_upsampled() {
        let graph = AudioGraph::builder().build();
        let mixer = LinearMixerAutoConforming::new(&graph, "mix", AudioFormat::mono(16000)).unwrap();
        let slow = FixedSampleSource::new(&graph, "s", AudioFormat::mono(8000), vec![0.0, 1.0, 2.0]).unwrap();
        mixer.add_input(slow, None, true).unwrap();

        let mut got = Vec::new();
        let mut out = [0.0; 4];
        loop {
            match mixer.read(&mut out).unwrap() {
                ReadResult::Read(n) => got.extend_from_slice(&out[..n]),
                ReadResult::Empty => {}
                ReadResult::Finished => break,
            }
        }
        assert_eq!(&got[..5], &[0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn conformers_are_disposed_with_the_slot() {
        let graph = AudioGraph::builder().build();
        let mixer = LinearMixerAutoConforming::new(&graph, "mix", AudioFormat::stereo(48000)).unwrap();
        let input = FixedSampleSource::new(&graph, "in", AudioFormat::mono(44100), vec![0.0; 64]).unwrap();
        let slot = mixer.add_input(input.clone(), None, false).unwrap();
        assert!(mixer.remove_input(slot));
        assert!(!input.is_disposed());
        assert!(!input.output().is_connected());
    }
}
