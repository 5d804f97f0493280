//! Growable ring buffer for interleaved samples.
//!
//! Used as private storage by every buffering node and directly by
//! [`SampleBucket`](crate::nodes::SampleBucket).

/// Result of [`SampleRingBuffer::peek_latest`].
#[derive(Clone, Debug, PartialEq)]
pub struct PeekResult {
    /// `frames × channels` samples. The newest frame is last; frames that
    /// were not available are zero padding at the front.
    pub samples: Vec<f32>,
    /// How many trailing frames of `samples` are real data.
    pub valid_frames: usize,
    /// Total frames ever written when the peek was taken.
    pub timestamp: u64,
}

/// Circular store of interleaved `f32` frames that grows when full.
///
/// Sizes passed to and returned from this type are in frames; slices are
/// interleaved samples and must hold whole frames.
#[derive(Debug, Clone)]
pub struct SampleRingBuffer {
    data: Vec<f32>,
    channels: usize,
    /// Sample index of the oldest unread sample.
    head: usize,
    /// Unread samples.
    len: usize,
    total_written: u64,
    high_water: usize,
    released: bool,
}

impl SampleRingBuffer {
    /// Create a buffer with room for `capacity_frames` before it first grows.
    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        let channels = channels.max(1);
        Self {
            data: vec![0.0; capacity_frames.max(1) * channels],
            channels,
            head: 0,
            len: 0,
            total_written: 0,
            high_water: 0,
            released: true,
        }
    }

    /// Hold data back until `frames` frames are buffered (builder pattern).
    ///
    /// See [`is_released`](Self::is_released).
    pub fn with_high_water(mut self, frames: usize) -> Self {
        self.high_water = frames;
        self.released = frames == 0;
        self
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames that fit before the next growth.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len() / self.channels
    }

    /// Frames currently buffered.
    #[inline]
    pub fn available(&self) -> usize {
        self.len / self.channels
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total frames written since creation or the last [`clear`](Self::clear).
    #[inline]
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Whether the high-water mark has been reached since the buffer last ran
    /// dry. Always true without a high-water mark.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release held data regardless of the high-water mark.
    pub fn release(&mut self) {
        self.released = true;
    }

    fn grow_for(&mut self, extra_samples: usize) {
        let needed = self.len + extra_samples;
        if needed <= self.data.len() {
            return;
        }
        let new_cap = needed.max(self.data.len() * 2);
        let mut data = vec![0.0; new_cap];
        self.copy_out(0, &mut data[..self.len]);
        self.data = data;
        self.head = 0;
    }

    /// Copy `out.len()` unread samples starting `offset` samples past the head.
    fn copy_out(&self, offset: usize, out: &mut [f32]) {
        let cap = self.data.len();
        let start = (self.head + offset) % cap;
        let first = out.len().min(cap - start);
        out[..first].copy_from_slice(&self.data[start..start + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&self.data[..rest]);
    }

    /// Append whole frames, growing if needed.
    pub fn write(&mut self, samples: &[f32]) {
        debug_assert_eq!(samples.len() % self.channels, 0);
        if samples.is_empty() {
            return;
        }
        self.grow_for(samples.len());
        let cap = self.data.len();
        let tail = (self.head + self.len) % cap;
        let first = samples.len().min(cap - tail);
        self.data[tail..tail + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        self.data[..rest].copy_from_slice(&samples[first..]);
        self.len += samples.len();
        self.total_written += (samples.len() / self.channels) as u64;
        if !self.released && self.available() >= self.high_water {
            self.released = true;
        }
    }

    /// Append `frames` frames of silence.
    pub fn write_silence(&mut self, frames: usize) {
        // chunked so a long silence does not allocate a matching vector
        const CHUNK: [f32; 256] = [0.0; 256];
        let mut remaining = frames * self.channels;
        while remaining > 0 {
            let step = (remaining / self.channels).min(CHUNK.len() / self.channels).max(1) * self.channels;
            let step = step.min(remaining);
            if step <= CHUNK.len() {
                self.write(&CHUNK[..step]);
            } else {
                self.write(&vec![0.0; step]);
            }
            remaining -= step;
        }
    }

    /// Consume up to `out.len() / channels` frames into the front of `out`.
    /// Returns the frames read.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let frames = self.peek(out);
        self.skip(frames);
        frames
    }

    /// Copy up to `out.len() / channels` frames without consuming them.
    pub fn peek(&self, out: &mut [f32]) -> usize {
        let frames = (out.len() / self.channels).min(self.available());
        self.copy_out(0, &mut out[..frames * self.channels]);
        frames
    }

    /// Drop up to `frames` frames from the front. Returns the frames dropped.
    pub fn skip(&mut self, frames: usize) -> usize {
        let frames = frames.min(self.available());
        let samples = frames * self.channels;
        self.head = (self.head + samples) % self.data.len();
        self.len -= samples;
        if self.len == 0 {
            self.head = 0;
            if self.high_water > 0 {
                self.released = false;
            }
        }
        frames
    }

    /// One sample of the unread region. `frame` counts from the read head.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        debug_assert!(frame < self.available());
        let idx = (self.head + frame * self.channels + channel) % self.data.len();
        self.data[idx]
    }

    /// Look at the newest `frames` unread frames without consuming anything.
    pub fn peek_latest(&self, frames: usize) -> PeekResult {
        let valid_frames = frames.min(self.available());
        let mut samples = vec![0.0; frames * self.channels];
        let pad = (frames - valid_frames) * self.channels;
        let offset = self.len - valid_frames * self.channels;
        self.copy_out(offset, &mut samples[pad..]);
        PeekResult {
            samples,
            valid_frames,
            timestamp: self.total_written,
        }
    }

    /// Consume everything buffered.
    pub fn drain_all(&mut self) -> Vec<f32> {
        let mut out = vec![0.0; self.len];
        self.read(&mut out);
        out
    }

    /// Drop all buffered data and reset the write counter.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
        self.total_written = 0;
        self.released = self.high_water == 0;
    }
}
