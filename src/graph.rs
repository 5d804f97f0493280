//! Audio graph - coordinates nodes and serializes access to their edges

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::node::NodeId;

/// Threading model a graph is created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphCapabilities {
    /// Nodes are driven from one thread at a time. Reads and writes are not
    /// serialized; edge changes still are.
    SingleThreaded,
    /// Connect, disconnect, read and write may be called from any thread.
    /// Every public node operation takes the graph lock.
    Concurrent,
}

/// Coordinator for a set of nodes.
///
/// The graph never owns its nodes - each node keeps a weak handle back to the
/// graph it was created against, and the graph only tracks node names for
/// diagnostics. What the graph does own is the lock that makes edge changes
/// atomic, and (for [`GraphCapabilities::Concurrent`]) serializes streaming.
///
/// # Example
///
/// ```
/// use klangnetz::{AudioGraph, AudioFormat};
/// use klangnetz::nodes::{SineSource, NullTarget};
///
/// let graph = AudioGraph::builder().name("demo").concurrent(true).build();
/// let format = AudioFormat::mono(48000);
/// let sine = SineSource::new(&graph, "sine", format, 440.0).unwrap();
/// let sink = NullTarget::new(&graph, "sink", format).unwrap();
///
/// klangnetz::connect(&*sine, &*sink).unwrap();
/// assert_eq!(graph.node_count(), 2);
/// ```
pub struct AudioGraph {
    name: String,
    capabilities: GraphCapabilities,
    /// Guards every edge mutation; also taken around streaming when concurrent.
    lock: ReentrantMutex<()>,
    nodes: Mutex<HashMap<NodeId, String>>,
    next_node_id: AtomicU64,
}

impl AudioGraph {
    /// Create a graph with the given capabilities.
    pub fn new(capabilities: GraphCapabilities) -> Arc<Self> {
        Self::builder()
            .concurrent(capabilities == GraphCapabilities::Concurrent)
            .build()
    }

    /// Start configuring a graph.
    pub fn builder() -> AudioGraphBuilder {
        AudioGraphBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> GraphCapabilities {
        self.capabilities
    }

    /// Whether streaming operations are serialized by the graph lock.
    #[inline]
    pub fn is_concurrent(&self) -> bool {
        self.capabilities == GraphCapabilities::Concurrent
    }

    /// Number of live nodes created against this graph.
    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Names of the live nodes, sorted.
    pub fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.lock().values().cloned().collect();
        names.sort();
        names
    }

    /// Lock held for the duration of a read, write or flush.
    ///
    /// Returns `None` for single-threaded graphs.
    pub(crate) fn lock_stream(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        if self.is_concurrent() {
            Some(self.lock.lock())
        } else {
            None
        }
    }

    /// Lock held while edges are inspected or changed.
    pub(crate) fn lock_edges(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub(crate) fn register(&self, name: &str) -> NodeId {
        let id = NodeId(self.next_node_id.fetch_add(1, Ordering::Relaxed));
        self.nodes.lock().insert(id, name.to_string());
        tracing::trace!(graph = %self.name, node = name, id = id.0, "node registered");
        id
    }

    pub(crate) fn unregister(&self, id: NodeId) {
        self.nodes.lock().remove(&id);
    }
}

/// Builder for [`AudioGraph`].
pub struct AudioGraphBuilder {
    name: String,
    concurrent: bool,
}

impl Default for AudioGraphBuilder {
    fn default() -> Self {
        Self {
            name: "graph".to_string(),
            concurrent: false,
        }
    }
}

impl AudioGraphBuilder {
    /// Name used in log output.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Serialize connect/read/write across threads.
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn build(self) -> Arc<AudioGraph> {
        let capabilities = if self.concurrent {
            GraphCapabilities::Concurrent
        } else {
            GraphCapabilities::SingleThreaded
        };
        tracing::debug!(graph = %self.name, ?capabilities, "graph created");
        Arc::new(AudioGraph {
            name: self.name,
            capabilities,
            lock: ReentrantMutex::new(()),
            nodes: Mutex::new(HashMap::new()),
            next_node_id: AtomicU64::new(0),
        })
    }
}
