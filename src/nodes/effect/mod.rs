//! Pipes: nodes with both an input and an output

mod circuit_breaker;
mod delay;
mod floating_delay;
mod gain;
mod passthrough;
mod push_pull;
mod remap;
mod resampler;

pub use circuit_breaker::{BreakerTripped, CircuitBreaker};
pub use delay::FixedDelayBuffer;
pub use floating_delay::{FloatingDelayBuffer, Interpolation};
pub use gain::Gain;
pub use passthrough::Passthrough;
pub use push_pull::PushPullBuffer;
pub use remap::ChannelRemapper;
pub use resampler::Resampler;
