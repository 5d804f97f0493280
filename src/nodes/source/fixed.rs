//! Fixed block of samples

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{AudioError, Result};
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, NodeCore, ReadResult};
use crate::port::OutputPort;

/// Plays a fixed, pre-decoded block of interleaved samples once, then
/// finishes.
pub struct FixedSampleSource {
    core: NodeCore,
    output: OutputPort,
    samples: Vec<f32>,
    /// Sample index of the next frame to play.
    position: Mutex<usize>,
}

impl FixedSampleSource {
    pub fn new(
        graph: &Arc<AudioGraph>,
        name: &str,
        format: AudioFormat,
        samples: Vec<f32>,
    ) -> Result<Arc<Self>> {
        if samples.len() % format.channels() != 0 {
            return Err(AudioError::invalid_argument(format!(
                "{} samples do not make whole {}-channel frames",
                samples.len(),
                format.channels()
            )));
        }
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me: &Weak<Self>| {
            let owner: Weak<dyn AudioSource> = me.clone();
            Self {
                core,
                output: OutputPort::new(owner),
                samples,
                position: Mutex::new(0),
            }
        }))
    }

    /// Frames not yet played.
    pub fn remaining_frames(&self) -> usize {
        (self.samples.len() - *self.position.lock()) / self.core.channels()
    }

    pub fn total_frames(&self) -> usize {
        self.samples.len() / self.core.channels()
    }
}

impl AudioNode for FixedSampleSource {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_source(&self) -> Option<&dyn AudioSource> {
        Some(self)
    }
}

impl AudioSource for FixedSampleSource {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let mut position = self.position.lock();
        let remaining = &self.samples[*position..];
        if remaining.is_empty() {
            return Ok(ReadResult::Finished);
        }
        let len = remaining.len().min(buffer.len());
        buffer[..len].copy_from_slice(&remaining[..len]);
        *position += len;
        Ok(ReadResult::from_frames(len / self.core.channels()))
    }
}
