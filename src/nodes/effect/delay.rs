//! Constant delay

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::buffer::SampleRingBuffer;
use crate::error::Result;
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, AudioTarget, NodeCore, ReadResult};
use crate::nodes::pipe_ports;
use crate::port::{InputPort, OutputPort};

struct DelayState {
    ring: SampleRingBuffer,
    /// Silence for the current run has been queued.
    primed: bool,
    upstream_done: bool,
    /// Reused for pulls from the input.
    scratch: Vec<f32>,
}

impl DelayState {
    fn admit(&mut self, samples: &[f32], delay_frames: usize) {
        if !self.primed {
            self.ring.write_silence(delay_frames);
            self.primed = true;
        }
        self.ring.write(samples);
    }
}

/// Shifts its input later by a constant number of frames.
///
/// The delay is realized as silence queued ahead of the first frame that
/// arrives, so a buffer that has never seen data reads as
/// [`ReadResult::Empty`]. When pushed into, the last `delay` frames are held
/// back until more input or a [`flush`](AudioTarget::flush) arrives; a flush
/// emits them and re-arms the delay for the next run.
pub struct FixedDelayBuffer {
    core: NodeCore,
    input: InputPort,
    output: OutputPort,
    delay_frames: usize,
    state: Mutex<DelayState>,
}

impl FixedDelayBuffer {
    pub fn new(
        graph: &Arc<AudioGraph>,
        name: &str,
        format: AudioFormat,
        delay: Duration,
    ) -> Result<Arc<Self>> {
        Self::with_frames(graph, name, format, format.duration_to_frames(delay))
    }

    /// Same as [`new`](Self::new) with the delay given in frames.
    pub fn with_frames(
        graph: &Arc<AudioGraph>,
        name: &str,
        format: AudioFormat,
        delay_frames: usize,
    ) -> Result<Arc<Self>> {
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me| {
            let (input, output) = pipe_ports(me);
            Self {
                core,
                input,
                output,
                delay_frames,
                state: Mutex::new(DelayState {
                    ring: SampleRingBuffer::new(format.channels(), delay_frames + 1024),
                    primed: false,
                    upstream_done: false,
                    scratch: Vec::new(),
                }),
            }
        }))
    }

    #[inline]
    pub fn delay_frames(&self) -> usize {
        self.delay_frames
    }

    pub fn delay(&self) -> Duration {
        self.core.format().frames_to_duration(self.delay_frames)
    }

    /// Frames queued, including pending silence.
    pub fn frames_buffered(&self) -> usize {
        self.state.lock().ring.available()
    }

    /// Write up to `frames` queued frames downstream. Returns frames accepted.
    fn emit(&self, frames: usize) -> Result<usize> {
        if frames == 0 {
            return Ok(0);
        }
        let pending = {
            let state = self.state.lock();
            let mut pending = vec![0.0; frames * self.core.channels()];
            let n = state.ring.peek(&mut pending);
            pending.truncate(n * self.core.channels());
            pending
        };
        let accepted = self.output.write(&pending)?;
        self.state.lock().ring.skip(accepted);
        Ok(accepted)
    }
}

impl AudioNode for FixedDelayBuffer {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_source(&self) -> Option<&dyn AudioSource> {
        Some(self)
    }

    fn as_target(&self) -> Option<&dyn AudioTarget> {
        Some(self)
    }

    fn on_dispose(&self) {
        self.state.lock().ring.clear();
    }
}

impl AudioSource for FixedDelayBuffer {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let channels = self.core.channels();
        let frames = buffer.len() / channels;

        let (have, done, mut scratch) = {
            let mut state = self.state.lock();
            let scratch = std::mem::take(&mut state.scratch);
            (state.ring.available(), state.upstream_done, scratch)
        };
        if have < frames && !done {
            scratch.clear();
            scratch.resize((frames - have) * channels, 0.0);
            let pulled = self.input.read(&mut scratch);
            let mut state = self.state.lock();
            match pulled {
                Ok(ReadResult::Read(n)) => state.admit(&scratch[..n * channels], self.delay_frames),
                Ok(ReadResult::Finished) => state.upstream_done = true,
                Ok(ReadResult::Empty) => {}
                Err(err) => {
                    state.scratch = scratch;
                    return Err(err);
                }
            }
            state.scratch = scratch;
        } else {
            self.state.lock().scratch = scratch;
        }

        let mut state = self.state.lock();
        let n = state.ring.read(buffer);
        if n > 0 {
            Ok(ReadResult::Read(n))
        } else if state.upstream_done {
            Ok(ReadResult::Finished)
        } else {
            Ok(ReadResult::Empty)
        }
    }
}

impl AudioTarget for FixedDelayBuffer {
    fn input(&self) -> &InputPort {
        &self.input
    }

    fn write_samples(&self, buffer: &[f32]) -> Result<usize> {
        self.output.ensure_connected()?;
        let ready = {
            let mut state = self.state.lock();
            state.admit(buffer, self.delay_frames);
            state.ring.available().saturating_sub(self.delay_frames)
        };
        self.emit(ready)?;
        Ok(buffer.len() / self.core.channels())
    }

    fn flush_samples(&self) -> Result<()> {
        let queued = self.frames_buffered();
        let accepted = self.emit(queued)?;
        if accepted == queued {
            self.state.lock().primed = false;
        }
        self.output.flush()
    }

    fn on_upstream_finished(&self) -> Result<()> {
        self.state.lock().upstream_done = true;
        if !self.output.is_connected() {
            // left for a puller to drain
            return Ok(());
        }
        self.emit(self.frames_buffered())?;
        self.output.notify_finished()
    }
}
