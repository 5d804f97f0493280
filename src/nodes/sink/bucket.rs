//! Capturing sink

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::buffer::{PeekResult, SampleRingBuffer};
use crate::error::{AudioError, Result};
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioTarget, NodeCore, ReadResult};
use crate::port::InputPort;
use crate::pump::{CancelToken, TimeProvider};

/// Frames requested per pull by [`SampleBucket::read_fully`].
const PULL_CHUNK_FRAMES: usize = 1024;

/// Terminal target that keeps everything it receives.
///
/// Samples arrive either by being pushed (`write`) or by the bucket pulling
/// its own input ([`read_from_input`](Self::read_from_input),
/// [`read_fully`](Self::read_fully)).
pub struct SampleBucket {
    core: NodeCore,
    input: InputPort,
    ring: Mutex<SampleRingBuffer>,
    upstream_finished: AtomicBool,
}

impl SampleBucket {
    pub fn new(graph: &Arc<AudioGraph>, name: &str, format: AudioFormat) -> Result<Arc<Self>> {
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me: &Weak<Self>| {
            let owner: Weak<dyn AudioTarget> = me.clone();
            Self {
                ring: Mutex::new(SampleRingBuffer::new(format.channels(), 4096)),
                core,
                input: InputPort::new(owner),
                upstream_finished: AtomicBool::new(false),
            }
        }))
    }

    /// Interleaved samples currently held.
    pub fn samples_buffered(&self) -> usize {
        self.frames_buffered() * self.core.channels()
    }

    pub fn frames_buffered(&self) -> usize {
        self.ring.lock().available()
    }

    /// Remove and return everything captured so far.
    pub fn take_all(&self) -> Vec<f32> {
        self.ring.lock().drain_all()
    }

    /// Non-destructive look at the newest `frames` frames.
    pub fn peek_latest(&self, frames: usize) -> PeekResult {
        self.ring.lock().peek_latest(frames)
    }

    /// Whether the input reported end-of-stream, pulled or pushed.
    pub fn is_upstream_finished(&self) -> bool {
        self.upstream_finished.load(Ordering::Acquire)
    }

    /// Pull up to `frames` frames from the input once and keep them.
    pub fn read_from_input(&self, frames: usize) -> Result<ReadResult> {
        let mut scratch = vec![0.0; frames * self.core.channels()];
        let result = self.read_input(&mut scratch)?;
        match result {
            ReadResult::Read(n) => self.ring.lock().write(&scratch[..n * self.core.channels()]),
            ReadResult::Finished => self.upstream_finished.store(true, Ordering::Release),
            ReadResult::Empty => {}
        }
        Ok(result)
    }

    /// Pull from the input until it finishes, sleeping on `time` whenever it
    /// has nothing. Returns the frames captured by this call.
    ///
    /// Cancellation returns [`AudioError::Cancelled`]; everything pulled so
    /// far stays in the bucket and the call can simply be repeated.
    pub fn read_fully(&self, time: &dyn TimeProvider, cancel: &CancelToken) -> Result<usize> {
        let mut total = 0;
        loop {
            cancel.check()?;
            match self.read_from_input(PULL_CHUNK_FRAMES)? {
                ReadResult::Read(n) => total += n,
                ReadResult::Finished => return Ok(total),
                ReadResult::Empty => {
                    if !time.sleep(Duration::from_millis(1), cancel) {
                        return Err(AudioError::Cancelled);
                    }
                }
            }
        }
    }
}

impl AudioNode for SampleBucket {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_target(&self) -> Option<&dyn AudioTarget> {
        Some(self)
    }

    fn on_dispose(&self) {
        self.ring.lock().clear();
    }
}

impl AudioTarget for SampleBucket {
    fn input(&self) -> &InputPort {
        &self.input
    }

    fn write_samples(&self, buffer: &[f32]) -> Result<usize> {
        self.ring.lock().write(buffer);
        Ok(buffer.len() / self.core.channels())
    }

    fn on_upstream_finished(&self) -> Result<()> {
        self.upstream_finished.store(true, Ordering::Release);
        Ok(())
    }
}
