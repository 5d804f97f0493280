//! Sample rate conversion
//!
//! Uses linear interpolation. Good enough for voice and for bridging
//! slightly different device rates; not a mastering-grade converter.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::SampleRingBuffer;
use crate::error::{AudioError, Result};
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, AudioTarget, NodeCore, ReadResult};
use crate::nodes::pipe_ports;
use crate::port::{InputPort, OutputPort};

const FRAC_EPSILON: f64 = 1e-9;
const PRODUCE_CHUNK_FRAMES: usize = 256;

struct Interpolator {
    channels: usize,
    /// Input frames still needed for interpolation.
    pending: SampleRingBuffer,
    /// Fractional position of the next output frame, relative to the
    /// oldest pending frame.
    position: f64,
    /// Input frames per output frame.
    ratio: f64,
}

impl Interpolator {
    fn admit(&mut self, samples: &[f32]) {
        self.pending.write(samples);
    }

    fn produce(&mut self, out: &mut [f32], drain: bool) -> usize {
        let channels = self.channels;
        let frames = out.len() / channels;
        let available = self.pending.available();
        let mut n = 0;
        while n < frames {
            let i = self.position.floor() as usize;
            let frac = self.position - i as f64;
            let ready = if drain || frac < FRAC_EPSILON {
                i < available
            } else {
                i + 1 < available
            };
            if !ready {
                break;
            }
            for c in 0..channels {
                let y1 = self.pending.sample(i, c);
                let y2 = if i + 1 < available {
                    self.pending.sample(i + 1, c)
                } else {
                    y1
                };
                out[n * channels + c] = y1 + (y2 - y1) * frac as f32;
            }
            n += 1;
            self.position += self.ratio;
        }

        let consumed = (self.position.floor() as usize).min(available);
        self.pending.skip(consumed);
        self.position -= consumed as f64;
        n
    }

    fn exhausted(&self) -> bool {
        self.position.floor() as usize >= self.pending.available()
    }
}

struct ResamplerState {
    interp: Interpolator,
    /// Produced frames not yet accepted downstream (push mode).
    out_pending: SampleRingBuffer,
    upstream_done: bool,
    /// Reused for input pulls and push-mode production.
    scratch: Vec<f32>,
}

impl ResamplerState {
    fn produce_pending(&mut self, drain: bool) {
        let channels = self.interp.channels;
        self.scratch.clear();
        self.scratch.resize(PRODUCE_CHUNK_FRAMES * channels, 0.0);
        loop {
            let n = self.interp.produce(&mut self.scratch, drain);
            self.out_pending.write(&self.scratch[..n * channels]);
            if n < PRODUCE_CHUNK_FRAMES {
                break;
            }
        }
    }
}

/// Pipe converting between two sample rates with the same channel layout.
///
/// The node's [`format`](AudioNode::format) is the output format; the input
/// side expects [`input_format`](AudioTarget::input_format).
pub struct Resampler {
    core: NodeCore,
    input: InputPort,
    output: OutputPort,
    input_format: AudioFormat,
    state: Mutex<ResamplerState>,
}

impl Resampler {
    pub fn new(
        graph: &Arc<AudioGraph>,
        name: &str,
        input_format: AudioFormat,
        output_format: AudioFormat,
    ) -> Result<Arc<Self>> {
        input_format.validate()?;
        if input_format.layout() != output_format.layout() {
            return Err(AudioError::invalid_argument(format!(
                "resampler cannot change layout ({} -> {})",
                input_format.layout(),
                output_format.layout()
            )));
        }
        let core = NodeCore::new(graph, name, output_format)?;
        let channels = output_format.channels();
        let ratio = input_format.sample_rate_hz() as f64 / output_format.sample_rate_hz() as f64;
        Ok(Arc::new_cyclic(|me| {
            let (input, output) = pipe_ports(me);
            Self {
                core,
                input,
                output,
                input_format,
                state: Mutex::new(ResamplerState {
                    interp: Interpolator {
                        channels,
                        pending: SampleRingBuffer::new(channels, 1024),
                        position: 0.0,
                        ratio,
                    },
                    out_pending: SampleRingBuffer::new(channels, 1024),
                    upstream_done: false,
                    scratch: Vec::new(),
                }),
            }
        }))
    }

    /// Input frames consumed per output frame.
    pub fn ratio(&self) -> f64 {
        self.state.lock().interp.ratio
    }

    fn emit_pending(&self) -> Result<()> {
        let pending = {
            let state = self.state.lock();
            let mut pending = vec![0.0; state.out_pending.available() * self.core.channels()];
            state.out_pending.peek(&mut pending);
            pending
        };
        if pending.is_empty() {
            return Ok(());
        }
        let accepted = self.output.write(&pending)?;
        self.state.lock().out_pending.skip(accepted);
        Ok(())
    }
}

impl AudioNode for Resampler {
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

impl AudioSource for Resampler {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let channels = self.core.channels();
        let frames = buffer.len() / channels;
        let mut produced = 0;
        let mut scratch = std::mem::take(&mut self.state.lock().scratch);

        let pulled = loop {
            let (done, ratio) = {
                let mut state = self.state.lock();
                let done = state.upstream_done;
                produced += state.interp.produce(&mut buffer[produced * channels..], done);
                (done, state.interp.ratio)
            };
            if produced == frames || done {
                break Ok(());
            }

            let wanted = ((frames - produced) as f64 * ratio).ceil() as usize + 2;
            scratch.clear();
            scratch.resize(wanted * channels, 0.0);
            match self.input.read(&mut scratch) {
                Ok(ReadResult::Read(n)) => self.state.lock().interp.admit(&scratch[..n * channels]),
                Ok(ReadResult::Finished) => self.state.lock().upstream_done = true,
                Ok(ReadResult::Empty) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.state.lock().scratch = scratch;
        pulled?;

        if produced > 0 {
            return Ok(ReadResult::Read(produced));
        }
        let state = self.state.lock();
        if state.upstream_done && state.interp.exhausted() {
            Ok(ReadResult::Finished)
        } else {
            Ok(ReadResult::Empty)
        }
    }
}

impl AudioTarget for Resampler {
    fn input(&self) -> &InputPort {
        &self.input
    }

    fn input_format(&self) -> AudioFormat {
        self.input_format
    }

    fn write_samples(&self, buffer: &[f32]) -> Result<usize> {
        self.output.ensure_connected()?;
        {
            let mut state = self.state.lock();
            state.interp.admit(buffer);
            state.produce_pending(false);
        }
        self.emit_pending()?;
        Ok(buffer.len() / self.input_format.channels())
    }

    fn flush_samples(&self) -> Result<()> {
        self.state.lock().produce_pending(true);
        self.emit_pending()?;
        self.output.flush()
    }

    fn on_upstream_finished(&self) -> Result<()> {
        self.state.lock().upstream_done = true;
        if !self.output.is_connected() {
            return Ok(());
        }
        self.state.lock().produce_pending(true);
        self.emit_pending()?;
        self.output.notify_finished()
    }
}
