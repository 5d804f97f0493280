//! Core node traits, identity and the push/pull streaming contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{AudioError, Result};
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::port::{self, InputPort, OutputPort};

/// Identifier of a node, unique within its graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u64 {
        self.0
    }
}

/// Outcome of a pull read.
///
/// Mirrors the classic integer sentinels: a positive frame count, `0` for
/// "nothing yet, retry", `-1` for "permanently finished".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadResult {
    /// `n` frames (`n > 0`) were written to the front of the buffer.
    Read(usize),
    /// No data is available right now; the stream has not ended.
    Empty,
    /// The stream has ended. Every later read also returns `Finished`.
    Finished,
}

impl ReadResult {
    /// Integer sentinel form: `n`, `0` or `-1`.
    pub fn as_sentinel(self) -> i64 {
        match self {
            ReadResult::Read(n) => n as i64,
            ReadResult::Empty => 0,
            ReadResult::Finished => -1,
        }
    }

    /// Frames delivered, `0` for `Empty` and `Finished`.
    #[inline]
    pub fn frames(self) -> usize {
        match self {
            ReadResult::Read(n) => n,
            _ => 0,
        }
    }

    #[inline]
    pub fn is_finished(self) -> bool {
        self == ReadResult::Finished
    }

    /// `Read(n)` for `n > 0`, otherwise `Empty`.
    #[inline]
    pub(crate) fn from_frames(frames: usize) -> Self {
        if frames == 0 {
            ReadResult::Empty
        } else {
            ReadResult::Read(frames)
        }
    }
}

/// Frames held by `len` interleaved samples of `channels` channels.
pub(crate) fn whole_frames(len: usize, channels: usize) -> Result<usize> {
    if len % channels != 0 {
        return Err(AudioError::invalid_argument(format!(
            "buffer of {} samples is not a whole number of {}-channel frames",
            len, channels
        )));
    }
    Ok(len / channels)
}

/// State every node carries: identity, format, graph handle and disposal.
pub struct NodeCore {
    id: NodeId,
    name: String,
    format: AudioFormat,
    graph: Weak<AudioGraph>,
    disposed: AtomicBool,
}

impl NodeCore {
    /// Register a new node with `graph`. Fails if `format` is invalid.
    pub fn new(graph: &Arc<AudioGraph>, name: impl Into<String>, format: AudioFormat) -> Result<Self> {
        format.validate()?;
        let name = name.into();
        let id = graph.register(&name);
        Ok(Self {
            id,
            name,
            format,
            graph: Arc::downgrade(graph),
            disposed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Interleaved channel count of this node's format.
    #[inline]
    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    /// The owning graph, if it still exists.
    pub fn graph(&self) -> Result<Arc<AudioGraph>> {
        self.graph.upgrade().ok_or_else(|| {
            AudioError::invalid_state(format!("graph of '{}' has been torn down", self.name))
        })
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Fail with [`AudioError::Disposed`] once the node is disposed.
    #[inline]
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(AudioError::Disposed(self.name.clone()))
        } else {
            Ok(())
        }
    }

    /// Frames held by an interleaved slice of `len` samples.
    pub fn frames_in(&self, len: usize) -> Result<usize> {
        whole_frames(len, self.channels())
    }

    /// Returns true for the call that performed the transition.
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }
}

impl Drop for NodeCore {
    fn drop(&mut self) {
        if let Some(graph) = self.graph.upgrade() {
            graph.unregister(self.id);
        }
    }
}

/// A participant in an [`AudioGraph`].
///
/// Roles are capabilities rather than a hierarchy: a node that can be read
/// from returns itself from [`as_source`](Self::as_source), one that can be
/// written to from [`as_target`](Self::as_target), and a pipe does both.
pub trait AudioNode: Send + Sync {
    fn core(&self) -> &NodeCore;

    /// The pull side of this node, if it has one.
    fn as_source(&self) -> Option<&dyn AudioSource> {
        None
    }

    /// The push side of this node, if it has one.
    fn as_target(&self) -> Option<&dyn AudioTarget> {
        None
    }

    /// Node-specific cleanup, run once by [`dispose`](Self::dispose).
    fn on_dispose(&self) {}

    fn id(&self) -> NodeId {
        self.core().id()
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn format(&self) -> AudioFormat {
        self.core().format()
    }

    fn is_disposed(&self) -> bool {
        self.core().is_disposed()
    }

    /// Disconnect both ports and make every later operation fail with
    /// [`AudioError::Disposed`]. Idempotent.
    fn dispose(&self) {
        if !self.core().mark_disposed() {
            return;
        }
        if let Some(source) = self.as_source() {
            if let Err(err) = port::sever_output(source) {
                tracing::trace!(node = self.name(), %err, "output not severed on dispose");
            }
        }
        if let Some(target) = self.as_target() {
            if let Err(err) = port::sever_input(target) {
                tracing::trace!(node = self.name(), %err, "input not severed on dispose");
            }
        }
        self.on_dispose();
        tracing::debug!(node = self.name(), "disposed");
    }
}

/// A node that produces samples: it can be pulled from, and it can push
/// into whatever its output is connected to.
pub trait AudioSource: AudioNode {
    fn output(&self) -> &OutputPort;

    /// Node-specific pull. Called with a non-empty, frame-aligned buffer,
    /// with the graph lock held when the graph is concurrent.
    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult>;

    /// Pull up to `buffer.len() / channels` frames.
    fn read(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let core = self.core();
        core.ensure_live()?;
        let frames = core.frames_in(buffer.len())?;
        if self.output().is_finished() {
            return Ok(ReadResult::Finished);
        }
        if frames == 0 {
            return Ok(ReadResult::Empty);
        }

        let graph = core.graph()?;
        let _guard = graph.lock_stream();
        let result = self.read_samples(buffer)?;
        debug_assert!(result.frames() <= frames, "node over-read its buffer");
        if result.is_finished() {
            self.output().mark_finished();
            tracing::debug!(node = core.name(), "playback finished");
        }
        Ok(result)
    }

    /// Sticky end-of-stream flag.
    fn is_finished(&self) -> bool {
        self.output().is_finished()
    }

    /// Pull up to `frames` frames from this node and push them to its output.
    ///
    /// When the node reports end-of-stream, the downstream target is told via
    /// [`AudioTarget::upstream_finished`].
    fn push_to_output(&self, frames: usize) -> Result<ReadResult> {
        let channels = self.core().channels();
        let mut scratch = self.output().take_scratch(frames * channels);
        let pushed = self.read(&mut scratch).and_then(|result| {
            match result {
                ReadResult::Read(n) => {
                    self.output().write(&scratch[..n * channels])?;
                }
                ReadResult::Finished => self.output().notify_finished()?,
                ReadResult::Empty => {}
            }
            Ok(result)
        });
        self.output().return_scratch(scratch);
        pushed
    }

    /// Target currently connected to the output.
    fn output_target(&self) -> Option<Arc<dyn AudioTarget>> {
        let graph = self.core().graph().ok()?;
        let _edges = graph.lock_edges();
        self.output().peer()
    }

    /// Link this node's output to `target`, replacing any existing edges.
    fn connect_output(&self, target: &dyn AudioTarget) -> Result<()> {
        let me = self.output().owner()?;
        port::connect(&*me, target)
    }

    /// Remove the output edge. Disconnecting twice is a no-op.
    fn disconnect_output(&self) -> Result<()> {
        self.core().ensure_live()?;
        let me = self.output().owner()?;
        port::sever_output(&*me)
    }
}

/// A node that consumes samples: it can be pushed into, and it can pull from
/// whatever its input is connected to.
pub trait AudioTarget: AudioNode {
    fn input(&self) -> &InputPort;

    /// Format expected on the input. Differs from [`AudioNode::format`]
    /// only for converting pipes.
    fn input_format(&self) -> AudioFormat {
        self.core().format()
    }

    /// Node-specific push. Called with a non-empty, frame-aligned buffer.
    /// Returns the frames accepted.
    fn write_samples(&self, buffer: &[f32]) -> Result<usize>;

    /// Node-specific flush of internally held samples.
    fn flush_samples(&self) -> Result<()> {
        Ok(())
    }

    /// Node-specific reaction to the upstream source finishing in push mode.
    fn on_upstream_finished(&self) -> Result<()> {
        Ok(())
    }

    /// Push `buffer.len() / channels` frames, counted in the input format.
    /// Returns the frames accepted.
    fn write(&self, buffer: &[f32]) -> Result<usize> {
        let core = self.core();
        core.ensure_live()?;
        let frames = whole_frames(buffer.len(), self.input_format().channels())?;
        if frames == 0 {
            return Ok(0);
        }
        let graph = core.graph()?;
        let _guard = graph.lock_stream();
        self.write_samples(buffer)
    }

    /// Emit anything held internally to the next node now.
    fn flush(&self) -> Result<()> {
        let core = self.core();
        core.ensure_live()?;
        let graph = core.graph()?;
        let _guard = graph.lock_stream();
        self.flush_samples()
    }

    /// Called by the upstream source once it has finished in push mode.
    fn upstream_finished(&self) -> Result<()> {
        let core = self.core();
        core.ensure_live()?;
        let graph = core.graph()?;
        let _guard = graph.lock_stream();
        self.on_upstream_finished()
    }

    /// Pull from whatever is connected to the input.
    ///
    /// A disconnected input reads as [`ReadResult::Empty`].
    fn read_input(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let core = self.core();
        core.ensure_live()?;
        whole_frames(buffer.len(), self.input_format().channels())?;
        let graph = core.graph()?;
        let _guard = graph.lock_stream();
        self.input().read(buffer)
    }

    /// Source currently connected to the input.
    fn input_source(&self) -> Option<Arc<dyn AudioSource>> {
        let graph = self.core().graph().ok()?;
        let _edges = graph.lock_edges();
        self.input().peer()
    }

    /// Link `source`'s output to this node's input, replacing any existing edges.
    fn connect_input(&self, source: &dyn AudioSource) -> Result<()> {
        let me = self.input().owner()?;
        port::connect(source, &*me)
    }

    /// Remove the input edge. Disconnecting twice is a no-op.
    fn disconnect_input(&self) -> Result<()> {
        self.core().ensure_live()?;
        let me = self.input().owner()?;
        port::sever_input(&*me)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels() {
        assert_eq!(ReadResult::Read(12).as_sentinel(), 12);
        assert_eq!(ReadResult::Empty.as_sentinel(), 0);
        assert_eq!(ReadResult::Finished.as_sentinel(), -1);
        assert_eq!(ReadResult::from_frames(0), ReadResult::Empty);
    }

    #[test]
    fn frames_in_rejects_partial_frames() {
        let graph = AudioGraph::builder().build();
        let core = NodeCore::new(&graph, "x", AudioFormat::stereo(8000)).unwrap();
        assert_eq!(core.frames_in(8).unwrap(), 4);
        assert!(matches!(core.frames_in(7), Err(AudioError::InvalidArgument(_))));
    }

    #[test]
    fn core_unregisters_on_drop() {
        let graph = AudioGraph::builder().build();
        let core = NodeCore::new(&graph, "x", AudioFormat::mono(8000)).unwrap();
        assert_eq!(graph.node_count(), 1);
        drop(core);
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn push_reuses_its_scratch_buffer() {
        use crate::nodes::{FixedSampleSource, SampleBucket};

        let graph = AudioGraph::builder().build();
        let format = AudioFormat::mono(8000);
        let source = FixedSampleSource::new(&graph, "src", format, vec![0.5; 8]).unwrap();
        assert_eq!(source.output().take_scratch(0).capacity(), 0);

        // a failed push still hands the buffer back
        assert!(source.push_to_output(4).is_err());
        assert!(source.output().take_scratch(0).capacity() >= 4);

        let bucket = SampleBucket::new(&graph, "bucket", format).unwrap();
        crate::connect(&*source, &*bucket).unwrap();
        assert_eq!(source.push_to_output(4).unwrap(), ReadResult::Read(4));
        assert!(source.output().take_scratch(0).capacity() >= 4);
        assert_eq!(bucket.take_all(), vec![0.5; 4]);
    }

    #[test]
    fn invalid_format_rejected() {
        let graph = AudioGraph::builder().build();
        assert!(NodeCore::new(&graph, "x", AudioFormat::mono(0)).is_err());
    }
}
