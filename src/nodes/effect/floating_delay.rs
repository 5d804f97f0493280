//! Variable delay with glitch-free transitions
//!
//! Output frame `t` reads the input at the fractional position
//! `p(t) = t - d(t)`, where `d` is the current delay in frames. When the
//! target delay changes, `d` slews toward it with a bounded slope instead of
//! jumping, so the read position never skips or repeats samples: a longer
//! delay briefly stretches the signal (slightly lower pitch), a shorter one
//! briefly compresses it. Positions between input frames are interpolated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::buffer::SampleRingBuffer;
use crate::error::{AudioError, Result};
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, AudioTarget, NodeCore, ReadResult};
use crate::nodes::pipe_ports;
use crate::port::{InputPort, OutputPort};

/// Fractions below this count as sitting exactly on an input frame.
const FRAC_EPSILON: f64 = 1e-9;
/// Once the delay is this close to the target it snaps onto it.
const SNAP_FRAMES: f64 = 1e-4;
/// Proportional slew gain for the last stretch of a transition.
const TAIL_GAIN: f64 = 0.002;
const DEFAULT_MAX_RATE_DEVIATION: f64 = 0.05;
const PRODUCE_CHUNK_FRAMES: usize = 256;

/// Interpolation used between input frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Nearest earlier frame
    None,
    /// Linear between the two neighbouring frames
    Linear,
    /// 4-point cubic (smoother)
    #[default]
    Cubic,
}

/// Input history plus the read-position bookkeeping.
struct DelayLine {
    channels: usize,
    history: SampleRingBuffer,
    /// Absolute input index of the oldest frame in `history`.
    base: u64,
    /// Input frames admitted so far.
    written: u64,
    /// Output frames produced so far.
    produced: u64,
    /// Current delay in frames.
    current: f64,
    interpolation: Interpolation,
    max_rate_deviation: f64,
}

impl DelayLine {
    fn new(channels: usize, delay_frames: f64) -> Self {
        Self {
            channels,
            history: SampleRingBuffer::new(channels, 4096),
            base: 0,
            written: 0,
            produced: 0,
            current: delay_frames,
            interpolation: Interpolation::default(),
            max_rate_deviation: DEFAULT_MAX_RATE_DEVIATION,
        }
    }

    fn admit(&mut self, samples: &[f32]) {
        self.history.write(samples);
        self.written += (samples.len() / self.channels) as u64;
    }

    #[inline]
    fn position(&self) -> f64 {
        self.produced as f64 - self.current
    }

    /// Whether the next output frame can be computed. `drain` accepts a
    /// position past the last input frame's left neighbour.
    fn ready(&self, drain: bool) -> bool {
        if self.written == 0 {
            return false;
        }
        let p = self.position();
        let i = p.floor();
        let needed = if drain || p - i < FRAC_EPSILON { i } else { i + 1.0 };
        needed < self.written as f64
    }

    /// Every admitted frame has been passed by the read position.
    fn exhausted(&self) -> bool {
        self.written == 0 || self.position().floor() >= self.written as f64
    }

    /// Input sample at absolute frame `k`. Before the stream is silence;
    /// past the newest frame holds the newest frame.
    fn input(&self, k: i64, channel: usize) -> f32 {
        if k < 0 || self.written == 0 {
            return 0.0;
        }
        let k = (k as u64).min(self.written - 1);
        if k < self.base {
            return 0.0;
        }
        self.history.sample((k - self.base) as usize, channel)
    }

    fn interpolate(&self, p: f64, channel: usize) -> f32 {
        let i = p.floor();
        let frac = p - i;
        let i = i as i64;
        if frac < FRAC_EPSILON {
            return self.input(i, channel);
        }
        let t = frac as f32;
        match self.interpolation {
            Interpolation::None => self.input(i, channel),
            Interpolation::Linear => {
                let y1 = self.input(i, channel);
                let y2 = self.input(i + 1, channel);
                y1 + (y2 - y1) * t
            }
            Interpolation::Cubic => {
                let y0 = self.input(i - 1, channel);
                let y1 = self.input(i, channel);
                let y2 = self.input(i + 1, channel);
                let y3 = self.input(i + 2, channel);

                let t2 = t * t;
                let t3 = t2 * t;

                let a0 = y3 - y2 - y0 + y1;
                let a1 = y0 - y1 - a0;
                let a2 = y2 - y0;
                let a3 = y1;

                a0 * t3 + a1 * t2 + a2 * t + a3
            }
        }
    }

    fn step_toward(&mut self, target: f64) {
        let err = target - self.current;
        if err.abs() < SNAP_FRAMES {
            self.current = target;
        } else {
            let max = self.max_rate_deviation;
            self.current += (err * TAIL_GAIN).clamp(-max, max);
        }
    }

    /// Fill the front of `out` with as many frames as the input allows.
    fn produce(&mut self, out: &mut [f32], target: f64, drain: bool) -> usize {
        let channels = self.channels;
        let frames = out.len() / channels;
        let mut n = 0;
        while n < frames && self.ready(drain) {
            let p = self.position();
            for (c, sample) in out[n * channels..(n + 1) * channels].iter_mut().enumerate() {
                *sample = self.interpolate(p, c);
            }
            n += 1;
            self.produced += 1;
            self.step_toward(target);
        }
        self.trim();
        n
    }

    /// Drop history the read position can no longer reach.
    fn trim(&mut self) {
        let keep_from = (self.position().floor() as i64 - 1).max(0) as u64;
        if keep_from > self.base {
            let drop = ((keep_from - self.base) as usize).min(self.history.available());
            self.history.skip(drop);
            self.base += drop as u64;
        }
    }
}

struct FloatingState {
    line: DelayLine,
    /// Produced frames not yet accepted downstream (push mode).
    pending: SampleRingBuffer,
    upstream_done: bool,
    /// Reused for input pulls and push-mode production.
    scratch: Vec<f32>,
}

impl FloatingState {
    fn produce_pending(&mut self, target: f64, drain: bool) {
        self.scratch.clear();
        self.scratch.resize(PRODUCE_CHUNK_FRAMES * self.line.channels, 0.0);
        loop {
            let n = self.line.produce(&mut self.scratch, target, drain);
            self.pending.write(&self.scratch[..n * self.line.channels]);
            if n < PRODUCE_CHUNK_FRAMES {
                break;
            }
        }
    }
}

/// Delay pipe whose delay can be changed while audio is flowing.
///
/// ```
/// use std::time::Duration;
/// use klangnetz::{AudioFormat, AudioGraph};
/// use klangnetz::nodes::{FloatingDelayBuffer, Interpolation};
///
/// let graph = AudioGraph::builder().build();
/// let delay = FloatingDelayBuffer::new(&graph, "jitter", AudioFormat::mono(48000), Duration::from_millis(20))
///     .unwrap()
///     .with_interpolation(Interpolation::Linear)
///     .with_max_rate_deviation(0.02);
/// delay.set_target_delay(Duration::from_millis(60)).unwrap();
/// // nothing has streamed yet, so the delay has not moved
/// assert!((delay.current_delay_frames() - 960.0).abs() < 1e-6);
/// ```
pub struct FloatingDelayBuffer {
    core: NodeCore,
    input: InputPort,
    output: OutputPort,
    /// Target delay in frames, as `f64` bits.
    target: AtomicU64,
    state: Mutex<FloatingState>,
}

impl FloatingDelayBuffer {
    pub fn new(
        graph: &Arc<AudioGraph>,
        name: &str,
        format: AudioFormat,
        initial_delay: Duration,
    ) -> Result<Arc<Self>> {
        let frames = initial_delay.as_secs_f64() * format.sample_rate_hz() as f64;
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me| {
            let (input, output) = pipe_ports(me);
            Self {
                core,
                input,
                output,
                target: AtomicU64::new(frames.to_bits()),
                state: Mutex::new(FloatingState {
                    line: DelayLine::new(format.channels(), frames),
                    pending: SampleRingBuffer::new(format.channels(), 1024),
                    upstream_done: false,
                    scratch: Vec::new(),
                }),
            }
        }))
    }

    /// Maximum slope of the delay during a transition, as a fraction of
    /// real time. Clamped to `0.0001..=0.5`.
    pub fn with_max_rate_deviation(self: Arc<Self>, deviation: f64) -> Arc<Self> {
        self.state.lock().line.max_rate_deviation = deviation.clamp(0.0001, 0.5);
        self
    }

    pub fn with_interpolation(self: Arc<Self>, interpolation: Interpolation) -> Arc<Self> {
        self.state.lock().line.interpolation = interpolation;
        self
    }

    /// Request a new delay. Takes effect gradually.
    pub fn set_target_delay(&self, delay: Duration) -> Result<()> {
        self.set_target_delay_frames(delay.as_secs_f64() * self.core.format().sample_rate_hz() as f64)
    }

    pub fn set_target_delay_frames(&self, frames: f64) -> Result<()> {
        if !frames.is_finite() || frames < 0.0 {
            return Err(AudioError::invalid_argument(format!(
                "delay of {} frames is not a non-negative number",
                frames
            )));
        }
        self.target.store(frames.to_bits(), Ordering::Release);
        tracing::debug!(node = self.core.name(), frames, "target delay changed");
        Ok(())
    }

    #[inline]
    pub fn target_delay_frames(&self) -> f64 {
        f64::from_bits(self.target.load(Ordering::Acquire))
    }

    /// Delay currently applied, in frames.
    pub fn current_delay_frames(&self) -> f64 {
        self.state.lock().line.current
    }

    pub fn current_delay(&self) -> Duration {
        Duration::from_secs_f64(
            self.current_delay_frames() / self.core.format().sample_rate_hz() as f64,
        )
    }

    /// Push produced frames downstream; whatever is refused stays pending.
    fn emit_pending(&self) -> Result<()> {
        let pending = {
            let state = self.state.lock();
            let mut pending = vec![0.0; state.pending.available() * self.core.channels()];
            state.pending.peek(&mut pending);
            pending
        };
        if pending.is_empty() {
            return Ok(());
        }
        let accepted = self.output.write(&pending)?;
        self.state.lock().pending.skip(accepted);
        Ok(())
    }
}

impl AudioNode for FloatingDelayBuffer {
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

impl AudioSource for FloatingDelayBuffer {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let channels = self.core.channels();
        let frames = buffer.len() / channels;
        let mut produced = 0;
        let mut scratch = std::mem::take(&mut self.state.lock().scratch);

        let pulled = loop {
            let target = self.target_delay_frames();
            let done = {
                let mut state = self.state.lock();
                let done = state.upstream_done;
                produced += state
                    .line
                    .produce(&mut buffer[produced * channels..], target, done);
                done
            };
            if produced == frames || done {
                break Ok(());
            }

            scratch.clear();
            scratch.resize((frames - produced + 4) * channels, 0.0);
            match self.input.read(&mut scratch) {
                Ok(ReadResult::Read(n)) => self.state.lock().line.admit(&scratch[..n * channels]),
                Ok(ReadResult::Finished) => self.state.lock().upstream_done = true,
                Ok(ReadResult::Empty) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.state.lock().scratch = scratch;
        pulled?;

        // nothing stale survives past the produced frames
        buffer[produced * channels..].fill(0.0);

        if produced > 0 {
            return Ok(ReadResult::Read(produced));
        }
        let state = self.state.lock();
        if state.upstream_done && state.line.exhausted() {
            Ok(ReadResult::Finished)
        } else {
            Ok(ReadResult::Empty)
        }
    }
}

impl AudioTarget for FloatingDelayBuffer {
    fn input(&self) -> &InputPort {
        &self.input
    }

    fn write_samples(&self, buffer: &[f32]) -> Result<usize> {
        self.output.ensure_connected()?;
        let target = self.target_delay_frames();
        {
            let mut state = self.state.lock();
            state.line.admit(buffer);
            state.produce_pending(target, false);
        }
        self.emit_pending()?;
        Ok(buffer.len() / self.core.channels())
    }

    fn flush_samples(&self) -> Result<()> {
        let target = self.target_delay_frames();
        self.state.lock().produce_pending(target, true);
        self.emit_pending()?;
        self.output.flush()
    }

    fn on_upstream_finished(&self) -> Result<()> {
        self.state.lock().upstream_done = true;
        if !self.output.is_connected() {
            return Ok(());
        }
        let target = self.target_delay_frames();
        self.state.lock().produce_pending(target, true);
        self.emit_pending()?;
        self.output.notify_finished()
    }
}
