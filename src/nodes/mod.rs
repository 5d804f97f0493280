//! Built-in audio nodes.
//!
//! Nodes are organized into four categories:
//!
//! ## Sources ([`source`])
//!
//! Produce audio and have no input:
//! - [`SineSource`] - Sine oscillator with frequency/amplitude control
//! - [`FixedSampleSource`] - Plays a fixed block of samples, then finishes
//! - [`SilenceSource`] - Endless (or bounded) silence
//!
//! ## Effects ([`effect`])
//!
//! Pipes that sit between a source and a target:
//! - [`Passthrough`] - Forwards samples unchanged
//! - [`Gain`] - Volume control with smoothing
//! - [`CircuitBreaker`] - Turns upstream faults into a clean end-of-stream
//! - [`PushPullBuffer`] - Bridges a pushing producer to a pulling consumer
//! - [`FixedDelayBuffer`] / [`FloatingDelayBuffer`] - Constant and variable delay
//! - [`Resampler`] / [`ChannelRemapper`] - Format conversion
//!
//! ## Mixers ([`mixer`])
//!
//! Fan many inputs into one output:
//! - [`ChannelFaninMixer`] - Inputs must match the mixer format; optional routing
//! - [`LinearMixerAutoConforming`] - Converts each input to the mixer format
//!
//! ## Sinks ([`sink`])
//!
//! Consume audio and have no output:
//! - [`SampleBucket`] - Captures everything written to it
//! - [`NullTarget`] - Discards everything written to it

use std::sync::Weak;

use crate::node::{AudioSource, AudioTarget};
use crate::port::{InputPort, OutputPort};

pub mod effect;
pub mod mixer;
pub mod sink;
pub mod source;

// Re-export common types at the top level for convenience
pub use effect::{
    BreakerTripped, ChannelRemapper, CircuitBreaker, FixedDelayBuffer, FloatingDelayBuffer, Gain,
    Interpolation, Passthrough, PushPullBuffer, Resampler,
};
pub use mixer::{
    ChannelFaninMixer, ChannelFinished, ChannelRouting, ChannelToken, LinearMixerAutoConforming,
    SlotId,
};
pub use sink::{NullTarget, SampleBucket};
pub use source::{FixedSampleSource, SilenceSource, SineSource};

/// Both ports of a pipe, pointing back at the pipe itself.
pub(crate) fn pipe_ports<T>(me: &Weak<T>) -> (InputPort, OutputPort)
where
    T: AudioSource + AudioTarget + 'static,
{
    let target: Weak<dyn AudioTarget> = me.clone();
    let source: Weak<dyn AudioSource> = me.clone();
    (InputPort::new(target), OutputPort::new(source))
}
