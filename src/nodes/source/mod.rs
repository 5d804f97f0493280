//! Audio source nodes (no input)

mod fixed;
mod silence;
mod sine;

pub use fixed::FixedSampleSource;
pub use silence::SilenceSource;
pub use sine::SineSource;
