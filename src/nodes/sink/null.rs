//! Discarding sink

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioTarget, NodeCore};
use crate::port::InputPort;

/// Target that accepts and discards everything.
pub struct NullTarget {
    core: NodeCore,
    input: InputPort,
    frames_written: AtomicU64,
}

impl NullTarget {
    pub fn new(graph: &Arc<AudioGraph>, name: &str, format: AudioFormat) -> Result<Arc<Self>> {
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me: &Weak<Self>| {
            let owner: Weak<dyn AudioTarget> = me.clone();
            Self {
                core,
                input: InputPort::new(owner),
                frames_written: AtomicU64::new(0),
            }
        }))
    }

    /// Frames discarded so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }
}

impl AudioNode for NullTarget {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_target(&self) -> Option<&dyn AudioTarget> {
        Some(self)
    }
}

impl AudioTarget for NullTarget {
    fn input(&self) -> &InputPort {
        &self.input
    }

    fn write_samples(&self, buffer: &[f32]) -> Result<usize> {
        let frames = buffer.len() / self.core.channels();
        self.frames_written.fetch_add(frames as u64, Ordering::Relaxed);
        Ok(frames)
    }
}
