//! Push-to-pull bridge

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::SampleRingBuffer;
use crate::error::Result;
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, AudioTarget, NodeCore, ReadResult};
use crate::nodes::pipe_ports;
use crate::port::{InputPort, OutputPort};

struct BridgeState {
    ring: SampleRingBuffer,
    upstream_done: bool,
}

/// Buffers whatever is written into it until someone reads it.
///
/// A producer pushes at its own pace; a consumer pulls at its own pace. With
/// a high-water mark the buffer holds data back until that much has built
/// up, and again every time the consumer drains it empty.
///
/// Once the producer reports end-of-stream, reads drain what is left and
/// then report [`ReadResult::Finished`].
pub struct PushPullBuffer {
    core: NodeCore,
    input: InputPort,
    output: OutputPort,
    state: Mutex<BridgeState>,
}

impl PushPullBuffer {
    pub fn new(graph: &Arc<AudioGraph>, name: &str, format: AudioFormat) -> Result<Arc<Self>> {
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me| {
            let (input, output) = pipe_ports(me);
            Self {
                core,
                input,
                output,
                state: Mutex::new(BridgeState {
                    ring: SampleRingBuffer::new(format.channels(), 4096),
                    upstream_done: false,
                }),
            }
        }))
    }

    /// Hold data back until `frames` frames are buffered.
    pub fn with_high_water(self: Arc<Self>, frames: usize) -> Arc<Self> {
        {
            let mut state = self.state.lock();
            let channels = state.ring.channels();
            let mut ring = SampleRingBuffer::new(channels, frames.max(4096)).with_high_water(frames);
            ring.write(&state.ring.drain_all());
            state.ring = ring;
        }
        self
    }

    /// Frames waiting to be read.
    pub fn frames_buffered(&self) -> usize {
        self.state.lock().ring.available()
    }
}

impl AudioNode for PushPullBuffer {
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

impl AudioSource for PushPullBuffer {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let channels = self.core.channels();
        let frames = buffer.len() / channels;

        // top up from a pulled input, outside the state lock
        let (have, done) = {
            let state = self.state.lock();
            (state.ring.available(), state.upstream_done)
        };
        if have < frames && !done && self.input.is_connected() {
            let mut scratch = vec![0.0; (frames - have) * channels];
            let pulled = self.input.read(&mut scratch)?;
            let mut state = self.state.lock();
            match pulled {
                ReadResult::Read(n) => state.ring.write(&scratch[..n * channels]),
                ReadResult::Finished => {
                    state.upstream_done = true;
                    state.ring.release();
                }
                ReadResult::Empty => {}
            }
        }

        let mut state = self.state.lock();
        if !state.ring.is_released() && !state.upstream_done {
            return Ok(ReadResult::Empty);
        }
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

impl AudioTarget for PushPullBuffer {
    fn input(&self) -> &InputPort {
        &self.input
    }

    fn write_samples(&self, buffer: &[f32]) -> Result<usize> {
        self.state.lock().ring.write(buffer);
        Ok(buffer.len() / self.core.channels())
    }

    /// Push everything buffered downstream, ignoring the high-water mark.
    fn flush_samples(&self) -> Result<()> {
        let pending = {
            let state = self.state.lock();
            let mut pending = vec![0.0; state.ring.available() * state.ring.channels()];
            state.ring.peek(&mut pending);
            pending
        };
        if pending.is_empty() {
            return Ok(());
        }
        // only what downstream accepted leaves the buffer
        let accepted = self.output.write(&pending)?;
        self.state.lock().ring.skip(accepted);
        Ok(())
    }

    fn on_upstream_finished(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.upstream_done = true;
        state.ring.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_back_until_high_water() {
        let graph = AudioGraph::builder().build();
        let bridge = PushPullBuffer::new(&graph, "bridge", AudioFormat::mono(8000))
            .unwrap()
            .with_high_water(4);
        let mut out = [0.0; 8];

        bridge.write(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(bridge.read(&mut out).unwrap(), ReadResult::Empty);
        bridge.write(&[4.0]).unwrap();
        assert_eq!(bridge.read(&mut out).unwrap(), ReadResult::Read(4));
        assert_eq!(&out[..4], &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn drains_then_finishes() {
        let graph = AudioGraph::builder().build();
        let bridge = PushPullBuffer::new(&graph, "bridge", AudioFormat::mono(8000))
            .unwrap()
            .with_high_water(100);
        bridge.write(&[1.0, 2.0]).unwrap();
        bridge.upstream_finished().unwrap();

        let mut out = [0.0; 8];
        assert_eq!(bridge.read(&mut out).unwrap(), ReadResult::Read(2));
        assert_eq!(bridge.read(&mut out).unwrap(), ReadResult::Finished);
        assert_eq!(bridge.read(&mut out).unwrap(), ReadResult::Finished);
    }

    #[test]
    fn failed_flush_keeps_samples() {
        let graph = AudioGraph::builder().build();
        let bridge = PushPullBuffer::new(&graph, "bridge", AudioFormat::mono(8000)).unwrap();
        bridge.write(&[1.0, 2.0]).unwrap();
        assert!(bridge.flush().is_err(), "output is not connected");
        assert_eq!(bridge.frames_buffered(), 2);
    }
}
