//! Private per-input target of a mixer

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::buffer::SampleRingBuffer;
use crate::error::{AudioError, Result};
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioTarget, NodeCore, ReadResult};
use crate::port::InputPort;

use super::{MixerNode, SlotId};

/// The node a mixer input is actually connected to.
///
/// Pulled by the mixer in pull mode; in push mode it stages what it
/// receives and lets the mixer decide when to emit.
pub(crate) struct SlotTarget {
    core: NodeCore,
    input: InputPort,
    slot: SlotId,
    staging: Mutex<SampleRingBuffer>,
    host: Weak<dyn MixerNode>,
}

impl SlotTarget {
    pub(crate) fn new(
        graph: &Arc<AudioGraph>,
        name: &str,
        format: AudioFormat,
        slot: SlotId,
        host: Weak<dyn MixerNode>,
    ) -> Result<Arc<Self>> {
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me: &Weak<Self>| {
            let owner: Weak<dyn AudioTarget> = me.clone();
            Self {
                core,
                input: InputPort::new(owner),
                slot,
                staging: Mutex::new(SampleRingBuffer::new(format.channels(), 1024)),
                host,
            }
        }))
    }

    fn host(&self) -> Result<Arc<dyn MixerNode>> {
        self.host
            .upgrade()
            .ok_or_else(|| AudioError::invalid_state(format!("mixer of '{}' is gone", self.core.name())))
    }

    pub(crate) fn staged_frames(&self) -> usize {
        self.staging.lock().available()
    }

    /// Move up to `buffer.len() / channels` staged frames into `buffer`.
    pub(crate) fn take_staged(&self, buffer: &mut [f32]) -> usize {
        self.staging.lock().read(buffer)
    }

    /// Copy up to `buffer.len() / channels` staged frames without consuming them.
    pub(crate) fn peek_staged(&self, buffer: &mut [f32]) -> usize {
        self.staging.lock().peek(buffer)
    }

    /// Drop up to `frames` staged frames once they have been emitted.
    pub(crate) fn skip_staged(&self, frames: usize) -> usize {
        self.staging.lock().skip(frames)
    }

    /// Fill `buffer` from staged frames, then from the input until it is
    /// full, runs dry or finishes. Returns frames filled and whether this
    /// slot is done for good.
    pub(crate) fn pull(&self, buffer: &mut [f32], upstream_done: bool) -> Result<(usize, bool)> {
        let channels = self.core.channels();
        let frames = buffer.len() / channels;
        let mut filled = self.take_staged(buffer);
        if upstream_done {
            return Ok((filled, self.staging.lock().is_empty()));
        }
        while filled < frames {
            match self.read_input(&mut buffer[filled * channels..])? {
                ReadResult::Read(n) => filled += n,
                ReadResult::Empty => return Ok((filled, false)),
                ReadResult::Finished => return Ok((filled, true)),
            }
        }
        Ok((filled, false))
    }
}

impl AudioNode for SlotTarget {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_target(&self) -> Option<&dyn AudioTarget> {
        Some(self)
    }

    fn on_dispose(&self) {
        self.staging.lock().clear();
    }
}

impl AudioTarget for SlotTarget {
    fn input(&self) -> &InputPort {
        &self.input
    }

    fn write_samples(&self, buffer: &[f32]) -> Result<usize> {
        self.staging.lock().write(buffer);
        self.host()?.mixer().emit_staged(false)?;
        Ok(buffer.len() / self.core.channels())
    }

    fn flush_samples(&self) -> Result<()> {
        self.host()?.mixer().emit_staged(true)
    }

    fn on_upstream_finished(&self) -> Result<()> {
        self.host()?.mixer().slot_upstream_finished(self.slot)
    }
}
