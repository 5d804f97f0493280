//! Sine wave oscillator

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{AudioError, Result};
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, NodeCore, ReadResult};
use crate::port::OutputPort;

struct SineState {
    frequency: f32,
    amplitude: f32,
    phase: f32,
    /// Frames left before finishing; `None` runs forever.
    remaining: Option<usize>,
}

/// A sine wave oscillator. Every channel carries the same signal.
pub struct SineSource {
    core: NodeCore,
    output: OutputPort,
    state: Mutex<SineState>,
}

impl SineSource {
    pub fn new(
        graph: &Arc<AudioGraph>,
        name: &str,
        format: AudioFormat,
        frequency: f32,
    ) -> Result<Arc<Self>> {
        check_frequency(frequency)?;
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me: &Weak<Self>| {
            let owner: Weak<dyn AudioSource> = me.clone();
            Self {
                core,
                output: OutputPort::new(owner),
                state: Mutex::new(SineState {
                    frequency,
                    amplitude: 0.25, // -12dB, safe default
                    phase: 0.0,
                    remaining: None,
                }),
            }
        }))
    }

    pub fn with_amplitude(self: Arc<Self>, amplitude: f32) -> Arc<Self> {
        self.set_amplitude(amplitude);
        self
    }

    /// Finish after `frames` frames instead of running forever.
    pub fn with_duration(self: Arc<Self>, frames: usize) -> Arc<Self> {
        self.state.lock().remaining = Some(frames);
        self
    }

    pub fn set_frequency(&self, frequency: f32) -> Result<()> {
        check_frequency(frequency)?;
        self.state.lock().frequency = frequency;
        Ok(())
    }

    pub fn set_amplitude(&self, amplitude: f32) {
        self.state.lock().amplitude = amplitude.clamp(0.0, 1.0);
    }

    #[inline]
    pub fn frequency(&self) -> f32 {
        self.state.lock().frequency
    }

    #[inline]
    pub fn amplitude(&self) -> f32 {
        self.state.lock().amplitude
    }
}

fn check_frequency(frequency: f32) -> Result<()> {
    if frequency.is_finite() && frequency >= 0.0 {
        Ok(())
    } else {
        Err(AudioError::invalid_argument(format!(
            "sine frequency {} is not a non-negative number",
            frequency
        )))
    }
}

impl AudioNode for SineSource {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_source(&self) -> Option<&dyn AudioSource> {
        Some(self)
    }
}

impl AudioSource for SineSource {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let channels = self.core.channels();
        let mut state = self.state.lock();

        let mut frames = buffer.len() / channels;
        if let Some(remaining) = state.remaining {
            if remaining == 0 {
                return Ok(ReadResult::Finished);
            }
            frames = frames.min(remaining);
            state.remaining = Some(remaining - frames);
        }

        let phase_inc = state.frequency / self.core.format().sample_rate_hz() as f32;
        let amplitude = state.amplitude;
        for frame in buffer[..frames * channels].chunks_exact_mut(channels) {
            let sample = (state.phase * core::f32::consts::TAU).sin() * amplitude;
            frame.fill(sample);

            state.phase += phase_inc;
            state.phase -= state.phase.floor();
        }
        Ok(ReadResult::from_frames(frames))
    }
}
