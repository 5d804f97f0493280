//! klangnetz - a push/pull audio node graph.
//!
//! Nodes are sources (can be read from), targets (can be written to) or
//! pipes (both). They are wired together with [`connect`] and then driven
//! either by pulling from the end of the chain or by pushing into its start.
//! Buffering, delay and mixing nodes behave the same in both directions.
//!
//! ```
//! use klangnetz::{AudioGraph, AudioFormat, AudioSource, ReadResult};
//! use klangnetz::nodes::{FixedSampleSource, Gain};
//!
//! let graph = AudioGraph::builder().name("example").build();
//! let format = AudioFormat::mono(8000);
//! let source = FixedSampleSource::new(&graph, "ramp", format, vec![1.0, 2.0, 3.0]).unwrap();
//! let gain = Gain::new(&graph, "half", format, 0.5).unwrap().without_smoothing();
//! klangnetz::connect(&*source, &*gain).unwrap();
//!
//! let mut out = [0.0; 4];
//! assert_eq!(gain.read(&mut out).unwrap(), ReadResult::Read(3));
//! assert_eq!(&out[..3], &[0.5, 1.0, 1.5]);
//! assert_eq!(gain.read(&mut out).unwrap(), ReadResult::Finished);
//! ```

pub mod buffer;
pub mod codec;
pub mod error;
pub mod events;
pub mod format;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod port;
pub mod pump;

pub use buffer::{PeekResult, SampleRingBuffer};
pub use error::{AudioError, Result};
pub use events::EventHub;
pub use format::{AudioFormat, ChannelLayout};
pub use graph::{AudioGraph, AudioGraphBuilder, GraphCapabilities};
pub use node::{AudioNode, AudioSource, AudioTarget, NodeCore, NodeId, ReadResult};
pub use port::{connect, disconnect, InputPort, OutputPort};
