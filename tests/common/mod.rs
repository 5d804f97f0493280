#![allow(dead_code)]

use std::sync::{Arc, Weak};

use klangnetz::{
    AudioError, AudioFormat, AudioGraph, AudioNode, AudioSource, NodeCore, OutputPort, ReadResult,
    Result,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let len = a.len().min(b.len());
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a[..len].iter().zip(&b[..len]) {
        dot += *x as f64 * *y as f64;
        na += *x as f64 * *x as f64;
        nb += *y as f64 * *y as f64;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Longest run of exact zeros.
pub fn longest_zero_run(samples: &[f32]) -> usize {
    let mut longest = 0;
    let mut run = 0;
    for s in samples {
        if *s == 0.0 {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest
}

/// `frames` frames of a sine, first sample at phase zero.
pub fn sine_wave(frequency: f32, amplitude: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
    let step = std::f32::consts::TAU * frequency / sample_rate as f32;
    (0..frames)
        .map(|n| amplitude * (step * n as f32).sin())
        .collect()
}

/// Pull `source` in chunks until it finishes or `limit` frames arrived.
pub fn read_to_end(source: &dyn AudioSource, chunk_frames: usize, limit: usize) -> Vec<f32> {
    let channels = source.format().channels();
    let mut out = Vec::new();
    let mut buffer = vec![0.0; chunk_frames * channels];
    let mut idle = 0;
    while out.len() < limit * channels {
        match source.read(&mut buffer).unwrap() {
            ReadResult::Read(n) => {
                idle = 0;
                out.extend_from_slice(&buffer[..n * channels]);
            }
            ReadResult::Empty => {
                idle += 1;
                assert!(idle < 10_000, "source never finished");
            }
            ReadResult::Finished => break,
        }
    }
    out
}

/// Plays a fixed block of samples, but only hands out a random share of
/// each request and sometimes nothing at all.
pub struct UnreliableSource {
    core: NodeCore,
    output: OutputPort,
    samples: Vec<f32>,
    state: Mutex<(usize, StdRng)>,
}

impl UnreliableSource {
    pub fn new(
        graph: &Arc<AudioGraph>,
        name: &str,
        format: AudioFormat,
        samples: Vec<f32>,
        seed: u64,
    ) -> Arc<Self> {
        let core = NodeCore::new(graph, name, format).unwrap();
        Arc::new_cyclic(|me: &Weak<Self>| {
            let owner: Weak<dyn AudioSource> = me.clone();
            Self {
                core,
                output: OutputPort::new(owner),
                samples,
                state: Mutex::new((0, StdRng::seed_from_u64(seed))),
            }
        })
    }
}

impl AudioNode for UnreliableSource {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_source(&self) -> Option<&dyn AudioSource> {
        Some(self)
    }
}

impl AudioSource for UnreliableSource {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let channels = self.core.channels();
        let mut state = self.state.lock();
        let (position, rng) = &mut *state;
        if *position >= self.samples.len() {
            return Ok(ReadResult::Finished);
        }
        if rng.gen_bool(0.3) {
            return Ok(ReadResult::Empty);
        }
        let remaining = (self.samples.len() - *position) / channels;
        let wanted = rng.gen_range(1..=buffer.len() / channels);
        let frames = wanted.min(remaining);
        let len = frames * channels;
        buffer[..len].copy_from_slice(&self.samples[*position..*position + len]);
        *position += len;
        Ok(ReadResult::Read(frames))
    }
}

/// How a [`FaultySource`] misbehaves once its good reads are used up.
#[derive(Clone, Copy, Debug)]
pub enum Fault {
    Error,
    Panic,
}

/// Delivers a constant signal for a few reads, then fails.
pub struct FaultySource {
    core: NodeCore,
    output: OutputPort,
    good_reads: Mutex<usize>,
    fault: Fault,
}

impl FaultySource {
    pub fn new(
        graph: &Arc<AudioGraph>,
        name: &str,
        format: AudioFormat,
        good_reads: usize,
        fault: Fault,
    ) -> Arc<Self> {
        let core = NodeCore::new(graph, name, format).unwrap();
        Arc::new_cyclic(|me: &Weak<Self>| {
            let owner: Weak<dyn AudioSource> = me.clone();
            Self {
                core,
                output: OutputPort::new(owner),
                good_reads: Mutex::new(good_reads),
                fault,
            }
        })
    }
}

impl AudioNode for FaultySource {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_source(&self) -> Option<&dyn AudioSource> {
        Some(self)
    }
}

impl AudioSource for FaultySource {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        {
            let mut left = self.good_reads.lock();
            if *left > 0 {
                *left -= 1;
                buffer.fill(0.5);
                return Ok(ReadResult::Read(buffer.len() / self.core.channels()));
            }
        }
        match self.fault {
            Fault::Error => Err(AudioError::Upstream("decoder lost sync".to_string())),
            Fault::Panic => panic!("decoder blew up"),
        }
    }
}
