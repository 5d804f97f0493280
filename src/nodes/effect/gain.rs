//! Gain/volume control effect

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, AudioTarget, NodeCore, ReadResult};
use crate::nodes::pipe_ports;
use crate::port::{InputPort, OutputPort};

struct GainState {
    gain: f32,
    /// Smoothing to prevent clicks on rapid gain changes
    smoothed_gain: f32,
    /// Smoothing coefficient (0.0 = instant, 1.0 = no change)
    smooth_coeff: f32,
}

impl GainState {
    /// Scale interleaved frames in place. All channels of a frame share one
    /// gain value.
    fn apply(&mut self, samples: &mut [f32], channels: usize) {
        let target = self.gain;
        let coeff = self.smooth_coeff;
        let mut gain = self.smoothed_gain;
        for frame in samples.chunks_exact_mut(channels) {
            gain = target + coeff * (gain - target);
            frame.iter_mut().for_each(|s| *s *= gain);
        }
        self.smoothed_gain = gain;
    }
}

/// A gain (volume) pipe that scales every sample passing through it.
pub struct Gain {
    core: NodeCore,
    input: InputPort,
    output: OutputPort,
    state: Mutex<GainState>,
}

impl Gain {
    /// Create a new gain node with the specified gain value
    pub fn new(
        graph: &Arc<AudioGraph>,
        name: &str,
        format: AudioFormat,
        gain: f32,
    ) -> Result<Arc<Self>> {
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me| {
            let (input, output) = pipe_ports(me);
            Self {
                core,
                input,
                output,
                state: Mutex::new(GainState {
                    gain,
                    smoothed_gain: gain,
                    smooth_coeff: 0.995, // ~4ms at 48kHz
                }),
            }
        }))
    }

    /// Set the smoothing time in milliseconds
    pub fn with_smoothing_ms(self: Arc<Self>, ms: f32) -> Arc<Self> {
        // after `ms` milliseconds the gain has covered ~63% of a step
        let samples = (ms / 1000.0) * self.core.format().sample_rate_hz() as f32;
        self.state.lock().smooth_coeff = if samples > 0.0 {
            (-1.0 / samples).exp()
        } else {
            0.0
        };
        self
    }

    /// Disable smoothing for instant gain changes
    pub fn without_smoothing(self: Arc<Self>) -> Arc<Self> {
        self.state.lock().smooth_coeff = 0.0;
        self
    }

    pub fn set_gain(&self, gain: f32) {
        self.state.lock().gain = gain;
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.state.lock().gain
    }
}

impl AudioNode for Gain {
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

impl AudioSource for Gain {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let result = self.input.read(buffer)?;
        if let ReadResult::Read(n) = result {
            let channels = self.core.channels();
            self.state.lock().apply(&mut buffer[..n * channels], channels);
        }
        Ok(result)
    }
}

impl AudioTarget for Gain {
    fn input(&self) -> &InputPort {
        &self.input
    }

    fn write_samples(&self, buffer: &[f32]) -> Result<usize> {
        let mut scaled = buffer.to_vec();
        self.state.lock().apply(&mut scaled, self.core.channels());
        self.output.write(&scaled)
    }

    fn flush_samples(&self) -> Result<()> {
        self.output.flush()
    }

    fn on_upstream_finished(&self) -> Result<()> {
        self.output.notify_finished()
    }
}
