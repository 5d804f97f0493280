use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::Result;
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, NodeCore, ReadResult};
use crate::port::OutputPort;

/// Produces zeros, forever or for a fixed number of frames.
pub struct SilenceSource {
    core: NodeCore,
    output: OutputPort,
    remaining: Mutex<Option<usize>>,
}

impl SilenceSource {
    pub fn new(graph: &Arc<AudioGraph>, name: &str, format: AudioFormat) -> Result<Arc<Self>> {
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me: &Weak<Self>| {
            let owner: Weak<dyn AudioSource> = me.clone();
            Self {
                core,
                output: OutputPort::new(owner),
                remaining: Mutex::new(None),
            }
        }))
    }

    /// Finish after `frames` frames.
    pub fn with_duration(self: Arc<Self>, frames: usize) -> Arc<Self> {
        *self.remaining.lock() = Some(frames);
        self
    }
}

impl AudioNode for SilenceSource {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_source(&self) -> Option<&dyn AudioSource> {
        Some(self)
    }
}

impl AudioSource for SilenceSource {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let channels = self.core.channels();
        let mut frames = buffer.len() / channels;
        let mut remaining = self.remaining.lock();
        if let Some(left) = remaining.as_mut() {
            if *left == 0 {
                return Ok(ReadResult::Finished);
            }
            frames = frames.min(*left);
            *left -= frames;
        }
        buffer[..frames * channels].fill(0.0);
        Ok(ReadResult::from_frames(frames))
    }
}
