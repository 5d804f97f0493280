//! Ports and the connection protocol.
//!
//! An edge is a pair of weak references: the source's [`OutputPort`] points
//! at the target and the target's [`InputPort`] points back. Both halves are
//! only ever changed together while the graph's edge lock is held, so no
//! caller that goes through the graph lock can see one half without the
//! other. Racing connects serialize on that lock; the last one wins and every
//! edge it replaces is removed from both of its ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{AudioError, Result};
use crate::format::AudioFormat;
use crate::node::{AudioSource, AudioTarget, NodeId, ReadResult};

type TargetLink = (NodeId, Weak<dyn AudioTarget>);
type SourceLink = (NodeId, Weak<dyn AudioSource>);

/// Output side of a source or pipe. Holds at most one edge.
pub struct OutputPort {
    owner: Weak<dyn AudioSource>,
    peer: Mutex<Option<TargetLink>>,
    finished: AtomicBool,
    finish_notified: AtomicBool,
    /// Reused by `push_to_output`.
    scratch: Mutex<Vec<f32>>,
}

impl OutputPort {
    /// `owner` is the node this port belongs to, usually obtained through
    /// `Arc::new_cyclic`.
    pub fn new(owner: Weak<dyn AudioSource>) -> Self {
        Self {
            owner,
            peer: Mutex::new(None),
            finished: AtomicBool::new(false),
            finish_notified: AtomicBool::new(false),
            scratch: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn owner(&self) -> Result<Arc<dyn AudioSource>> {
        self.owner
            .upgrade()
            .ok_or_else(|| AudioError::invalid_state("output port outlived its node"))
    }

    fn owner_name(&self) -> String {
        self.owner
            .upgrade()
            .map(|n| n.name().to_string())
            .unwrap_or_default()
    }

    /// Connected target, if the edge exists and the target is still alive.
    pub fn peer(&self) -> Option<Arc<dyn AudioTarget>> {
        self.peer.lock().as_ref().and_then(|(_, w)| w.upgrade())
    }

    /// Whether an edge exists (its target may since have been dropped).
    pub fn is_connected(&self) -> bool {
        self.peer().is_some()
    }

    /// Fail with [`AudioError::InvalidState`] unless a target is connected.
    ///
    /// Pipes that keep state call this before taking in samples, so a write
    /// that cannot go anywhere leaves them untouched.
    pub fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(self.not_connected())
        }
    }

    fn not_connected(&self) -> AudioError {
        AudioError::invalid_state(format!("output of '{}' is not connected", self.owner_name()))
    }

    /// Zeroed buffer of `len` samples, reusing an earlier allocation.
    pub(crate) fn take_scratch(&self, len: usize) -> Vec<f32> {
        let mut scratch = std::mem::take(&mut *self.scratch.lock());
        scratch.clear();
        scratch.resize(len, 0.0);
        scratch
    }

    pub(crate) fn return_scratch(&self, scratch: Vec<f32>) {
        *self.scratch.lock() = scratch;
    }

    fn peer_id(&self) -> Option<NodeId> {
        self.peer.lock().as_ref().map(|(id, _)| *id)
    }

    fn take(&self) -> Option<Arc<dyn AudioTarget>> {
        self.peer.lock().take().and_then(|(_, w)| w.upgrade())
    }

    fn clear_if(&self, id: NodeId) {
        let mut peer = self.peer.lock();
        if peer.as_ref().map(|(p, _)| *p) == Some(id) {
            *peer = None;
        }
    }

    fn set(&self, link: TargetLink) {
        *self.peer.lock() = Some(link);
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Set the sticky end-of-stream flag.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Push downstream. Fails with [`AudioError::InvalidState`] when nothing
    /// is connected rather than dropping the samples.
    pub fn write(&self, buffer: &[f32]) -> Result<usize> {
        match self.peer() {
            Some(target) => target.write(buffer),
            None => Err(self.not_connected()),
        }
    }

    /// Flush the downstream target, if any.
    pub fn flush(&self) -> Result<()> {
        match self.peer() {
            Some(target) => target.flush(),
            None => Ok(()),
        }
    }

    /// Mark finished and tell the downstream target, once.
    pub fn notify_finished(&self) -> Result<()> {
        self.mark_finished();
        if self.finish_notified.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.peer() {
            Some(target) => target.upstream_finished(),
            None => Ok(()),
        }
    }
}

/// Input side of a target or pipe. Holds at most one edge.
pub struct InputPort {
    owner: Weak<dyn AudioTarget>,
    peer: Mutex<Option<SourceLink>>,
}

impl InputPort {
    pub fn new(owner: Weak<dyn AudioTarget>) -> Self {
        Self {
            owner,
            peer: Mutex::new(None),
        }
    }

    pub(crate) fn owner(&self) -> Result<Arc<dyn AudioTarget>> {
        self.owner
            .upgrade()
            .ok_or_else(|| AudioError::invalid_state("input port outlived its node"))
    }

    /// Connected source, if the edge exists and the source is still alive.
    pub fn peer(&self) -> Option<Arc<dyn AudioSource>> {
        self.peer.lock().as_ref().and_then(|(_, w)| w.upgrade())
    }

    pub fn is_connected(&self) -> bool {
        self.peer().is_some()
    }

    fn peer_id(&self) -> Option<NodeId> {
        self.peer.lock().as_ref().map(|(id, _)| *id)
    }

    fn take(&self) -> Option<Arc<dyn AudioSource>> {
        self.peer.lock().take().and_then(|(_, w)| w.upgrade())
    }

    fn clear_if(&self, id: NodeId) {
        let mut peer = self.peer.lock();
        if peer.as_ref().map(|(p, _)| *p) == Some(id) {
            *peer = None;
        }
    }

    fn set(&self, link: SourceLink) {
        *self.peer.lock() = Some(link);
    }

    /// Pull from the upstream source. Disconnected reads as `Empty`.
    pub fn read(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        match self.peer() {
            Some(source) => {
                let result = source.read(buffer)?;
                #[cfg(feature = "warn_on_empty")]
                if result == ReadResult::Empty {
                    tracing::warn!(source = source.name(), "upstream returned no data");
                }
                Ok(result)
            }
            None => {
                #[cfg(feature = "warn_on_empty")]
                tracing::warn!("read from a disconnected input");
                Ok(ReadResult::Empty)
            }
        }
    }
}

/// Whether `target`, if it is also a source, has already finished.
fn target_finished(target: &dyn AudioTarget) -> bool {
    target.as_source().map_or(false, |s| s.is_finished())
}

/// Link `source` to `target`, severing whatever either port was linked to.
///
/// Fails without changing anything when the nodes live in different graphs
/// ([`AudioError::InvalidArgument`]), either is disposed
/// ([`AudioError::Disposed`]), their formats differ
/// ([`AudioError::FormatMismatch`]), or either has finished
/// ([`AudioError::InvalidState`]).
pub fn connect(source: &dyn AudioSource, target: &dyn AudioTarget) -> Result<()> {
    let graph = source.core().graph()?;
    let target_graph = target.core().graph()?;
    if !Arc::ptr_eq(&graph, &target_graph) {
        return Err(AudioError::invalid_argument(format!(
            "'{}' and '{}' belong to different graphs",
            source.name(),
            target.name()
        )));
    }

    let source_format = source.format();
    let target_format = target.input_format();
    AudioFormat::assert_formats_equal(Some(&source_format), Some(&target_format))?;

    let _edges = graph.lock_edges();
    source.core().ensure_live()?;
    target.core().ensure_live()?;
    if source.is_finished() {
        return Err(AudioError::invalid_state(format!(
            "'{}' has finished and cannot be connected",
            source.name()
        )));
    }
    if target_finished(target) {
        return Err(AudioError::invalid_state(format!(
            "'{}' has finished and cannot be connected",
            target.name()
        )));
    }

    let source_id = source.id();
    let target_id = target.id();
    if source.output().peer_id() == Some(target_id) && target.input().peer_id() == Some(source_id) {
        return Ok(());
    }

    if let Some(old_target) = source.output().take() {
        old_target.input().clear_if(source_id);
    }
    if let Some(old_source) = target.input().take() {
        old_source.output().clear_if(target_id);
    }
    source.output().set((target_id, target.input().owner.clone()));
    target.input().set((source_id, source.output().owner.clone()));

    tracing::debug!(
        graph = graph.name(),
        source = source.name(),
        target = target.name(),
        "connected"
    );
    Ok(())
}

/// Remove the edge leaving `source`, from both ends.
pub(crate) fn sever_output(source: &dyn AudioSource) -> Result<()> {
    let graph = source.core().graph()?;
    let _edges = graph.lock_edges();
    if let Some(target) = source.output().take() {
        target.input().clear_if(source.id());
        tracing::debug!(source = source.name(), target = target.name(), "disconnected");
    }
    Ok(())
}

/// Remove the edge entering `target`, from both ends.
pub(crate) fn sever_input(target: &dyn AudioTarget) -> Result<()> {
    let graph = target.core().graph()?;
    let _edges = graph.lock_edges();
    if let Some(source) = target.input().take() {
        source.output().clear_if(target.id());
        tracing::debug!(source = source.name(), target = target.name(), "disconnected");
    }
    Ok(())
}

/// Remove the edge between `source` and `target`, from either end.
pub fn disconnect(source: &dyn AudioSource, target: &dyn AudioTarget) -> Result<()> {
    let graph = source.core().graph()?;
    let _edges = graph.lock_edges();
    if source.output().peer_id() == Some(target.id()) {
        sever_output(source)?;
    }
    Ok(())
}
