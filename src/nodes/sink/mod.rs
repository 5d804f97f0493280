//! Audio sink nodes (no output)

mod bucket;
mod null;

pub use bucket::SampleBucket;
pub use null::NullTarget;
