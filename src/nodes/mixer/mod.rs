//! Fan-in mixers
//!
//! Both mixers share one lifecycle, implemented by [`MixerCore`]: every
//! input gets a slot with a private target node, inputs can be added and
//! removed while audio flows, and each input that runs out publishes a
//! [`ChannelFinished`] event if it was added with a token.
//!
//! Pulling a mixer reads every slot and sums the results. Pushing into a
//! mixer's inputs stages each slot's samples and emits the frames all live
//! slots have in common.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::Mutex;
use rtrb::Consumer;

use crate::error::{AudioError, Result};
use crate::events::EventHub;
use crate::format::AudioFormat;
use crate::node::{AudioNode, AudioSource, AudioTarget, ReadResult};
use crate::port;

mod channel_fanin;
mod linear;
mod slot;

pub use channel_fanin::{ChannelFaninMixer, ChannelRouting};
pub use linear::LinearMixerAutoConforming;

use slot::SlotTarget;

/// Handle to a mixer input, returned by `add_input`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl SlotId {
    #[inline]
    pub fn index(self) -> u64 {
        self.0
    }
}

/// Caller-chosen label for a mixer input, echoed in [`ChannelFinished`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelToken(String);

impl ChannelToken {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelToken {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for ChannelToken {
    fn from(label: String) -> Self {
        Self(label)
    }
}

impl fmt::Display for ChannelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An input that was added with a token has run out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelFinished {
    pub token: ChannelToken,
    pub slot: SlotId,
}

/// A mixer node, as seen by its slot targets.
pub(crate) trait MixerNode: AudioSource {
    fn mixer(&self) -> &MixerCore;
}

/// How a new slot is wired. Decided by the concrete mixer.
pub(crate) struct SlotPlan {
    pub routing: Option<ChannelRouting>,
    /// Format arriving at the slot target.
    pub format: AudioFormat,
    /// Conversion pipes between the input and the slot target, in order.
    pub chain: Vec<Arc<dyn AudioNode>>,
}

struct Slot {
    input: Arc<dyn AudioSource>,
    token: Option<ChannelToken>,
    owns_input: bool,
    routing: Option<ChannelRouting>,
    target: Arc<SlotTarget>,
    chain: Vec<Arc<dyn AudioNode>>,
    /// Input finished while pushing; staged frames may remain.
    upstream_done: bool,
}

impl Slot {
    /// The node the input itself is connected to.
    fn entry(&self) -> &dyn AudioTarget {
        self.chain
            .first()
            .and_then(|node| node.as_target())
            .unwrap_or(&*self.target as &dyn AudioTarget)
    }
}

#[derive(Default)]
struct SlotSet {
    slots: HashMap<SlotId, Slot>,
    ever_finished: bool,
    /// The mixer itself reported end-of-stream.
    finished: bool,
}

impl SlotSet {
    fn sorted_ids(&self) -> Vec<SlotId> {
        let mut ids: Vec<SlotId> = self.slots.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// State and lifecycle shared by every mixer.
pub(crate) struct MixerCore {
    name: String,
    format: AudioFormat,
    host: Weak<dyn MixerNode>,
    slots: Mutex<SlotSet>,
    events: EventHub<ChannelFinished>,
    read_forever: AtomicBool,
    max_staged_frames: AtomicUsize,
    next_slot: AtomicU64,
}

impl MixerCore {
    pub(crate) fn new(name: &str, format: AudioFormat, host: Weak<dyn MixerNode>) -> Self {
        Self {
            name: name.to_string(),
            format,
            host,
            slots: Mutex::new(SlotSet::default()),
            events: EventHub::new(),
            read_forever: AtomicBool::new(false),
            // one second
            max_staged_frames: AtomicUsize::new(format.sample_rate_hz() as usize),
            next_slot: AtomicU64::new(0),
        }
    }

    fn host(&self) -> Result<Arc<dyn MixerNode>> {
        self.host
            .upgrade()
            .ok_or_else(|| AudioError::invalid_state(format!("mixer '{}' is gone", self.name)))
    }

    pub(crate) fn read_forever(&self) -> bool {
        self.read_forever.load(Ordering::Acquire)
    }

    /// Never finish; emit silence once every input is exhausted.
    pub(crate) fn set_read_forever(&self, forever: bool) {
        self.read_forever.store(forever, Ordering::Release);
    }

    pub(crate) fn max_staged_frames(&self) -> usize {
        self.max_staged_frames.load(Ordering::Acquire)
    }

    /// How far one pushed input may run ahead of the slowest before its
    /// excess is emitted anyway.
    pub(crate) fn set_max_staged_frames(&self, frames: usize) {
        self.max_staged_frames.store(frames, Ordering::Release);
    }

    pub(crate) fn input_count(&self) -> usize {
        self.slots.lock().slots.len()
    }

    pub(crate) fn channel_finished_events(&self, capacity: usize) -> Consumer<ChannelFinished> {
        self.events.subscribe(capacity)
    }

    /// Fails once the mixer has reported end-of-stream.
    pub(crate) fn ensure_accepting(&self) -> Result<()> {
        if self.slots.lock().finished {
            Err(AudioError::invalid_state(format!(
                "mixer '{}' has finished and takes no new inputs",
                self.name
            )))
        } else {
            Ok(())
        }
    }

    pub(crate) fn add_slot(
        &self,
        input: Arc<dyn AudioSource>,
        token: Option<ChannelToken>,
        owns_input: bool,
        plan: SlotPlan,
    ) -> Result<SlotId> {
        let host = self.host()?;
        let graph = host.core().graph()?;
        let _edges = graph.lock_edges();
        host.core().ensure_live()?;
        input.core().ensure_live()?;
        self.ensure_accepting()?;

        let id = SlotId(self.next_slot.fetch_add(1, Ordering::Relaxed));
        let target = SlotTarget::new(
            &graph,
            &format!("{}/slot{}", self.name, id.0),
            plan.format,
            id,
            self.host.clone(),
        )?;
        if let Err(err) = wire(&*input, &plan.chain, &*target) {
            plan.chain.iter().for_each(|node| node.dispose());
            target.dispose();
            return Err(err);
        }

        tracing::debug!(
            mixer = %self.name,
            input = input.name(),
            slot = id.0,
            conformers = plan.chain.len(),
            "input added"
        );
        self.slots.lock().slots.insert(
            id,
            Slot {
                input,
                token,
                owns_input,
                routing: plan.routing,
                target,
                chain: plan.chain,
                upstream_done: false,
            },
        );
        Ok(id)
    }

    /// Detach an input without disposing it. Returns false for unknown ids.
    pub(crate) fn remove_input(&self, id: SlotId) -> bool {
        let Ok(host) = self.host() else {
            return false;
        };
        let Ok(graph) = host.core().graph() else {
            return false;
        };
        let _edges = graph.lock_edges();
        let slot = self.slots.lock().slots.remove(&id);
        match slot {
            Some(slot) => {
                self.release(id, slot, false, false);
                true
            }
            None => false,
        }
    }

    /// Remove every input, disposing the ones the mixer owns.
    pub(crate) fn clear(&self) {
        let graph = self.host().and_then(|h| h.core().graph()).ok();
        let _edges = graph.as_ref().map(|g| g.lock_edges());
        let drained: Vec<(SlotId, Slot)> = self.slots.lock().slots.drain().collect();
        for (id, slot) in drained {
            self.release(id, slot, false, true);
        }
    }

    /// Tear down a slot that is no longer in the set. Runs without the slot
    /// lock held.
    fn release(&self, id: SlotId, slot: Slot, finished: bool, dispose_owned: bool) {
        if let Err(err) = port::disconnect(&*slot.input, slot.entry()) {
            tracing::trace!(mixer = %self.name, slot = id.0, %err, "input edge not severed");
        }
        slot.chain.iter().for_each(|node| node.dispose());
        slot.target.dispose();

        if finished {
            if let Some(token) = slot.token.clone() {
                self.events.publish(ChannelFinished { token, slot: id });
            }
        }
        if slot.owns_input && dispose_owned {
            slot.input.dispose();
        }
        tracing::debug!(
            mixer = %self.name,
            input = slot.input.name(),
            slot = id.0,
            finished,
            "input released"
        );
    }

    /// Remove finished slots and release them.
    fn retire(&self, ids: &[SlotId]) {
        if ids.is_empty() {
            return;
        }
        let removed: Vec<(SlotId, Slot)> = {
            let mut set = self.slots.lock();
            let removed: Vec<_> = ids
                .iter()
                .filter_map(|id| set.slots.remove(id).map(|slot| (*id, slot)))
                .collect();
            if !removed.is_empty() {
                set.ever_finished = true;
            }
            removed
        };
        for (id, slot) in removed {
            self.release(id, slot, true, true);
        }
    }

    /// Pull-mode mix into `buffer`, which is fully overwritten.
    pub(crate) fn read_mix(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let channels = self.format.channels();
        let frames = buffer.len() / channels;
        buffer.fill(0.0);

        let active: Vec<(SlotId, Arc<SlotTarget>, Option<ChannelRouting>, bool)> = {
            let set = self.slots.lock();
            set.sorted_ids()
                .into_iter()
                .map(|id| {
                    let slot = &set.slots[&id];
                    (id, slot.target.clone(), slot.routing.clone(), slot.upstream_done)
                })
                .collect()
        };

        let mut longest = 0;
        let mut finished = Vec::new();
        let mut scratch = Vec::new();
        for (id, target, routing, upstream_done) in &active {
            let slot_channels = target.core().channels();
            scratch.clear();
            scratch.resize(frames * slot_channels, 0.0);
            let (filled, done) = target.pull(&mut scratch, *upstream_done)?;
            mix_into(
                buffer,
                &scratch[..filled * slot_channels],
                slot_channels,
                channels,
                routing.as_ref(),
            );
            longest = longest.max(filled);
            if done {
                finished.push(*id);
            }
        }
        self.retire(&finished);

        if self.read_forever() {
            return Ok(ReadResult::Read(frames));
        }
        if longest > 0 {
            return Ok(ReadResult::Read(longest));
        }
        let mut set = self.slots.lock();
        if set.slots.is_empty() && set.ever_finished {
            set.finished = true;
            return Ok(ReadResult::Finished);
        }
        Ok(ReadResult::Empty)
    }

    /// Push-mode emission of staged frames.
    ///
    /// Emits what every live slot has staged, or everything when `force` is
    /// set. A slot more than `max_staged_frames` ahead forces its excess out.
    /// Frames leave the slots only once downstream has accepted them.
    pub(crate) fn emit_staged(&self, force: bool) -> Result<()> {
        let host = self.host()?;
        if !host.output().is_connected() {
            // kept for a puller
            return Ok(());
        }
        let channels = self.format.channels();
        let limit = self.max_staged_frames();

        let (ids, mixed) = {
            let set = self.slots.lock();
            let ids = set.sorted_ids();
            let staged: Vec<(usize, bool)> = ids
                .iter()
                .map(|id| {
                    let slot = &set.slots[id];
                    (slot.target.staged_frames(), slot.upstream_done)
                })
                .collect();
            let most = staged.iter().map(|(n, _)| *n).max().unwrap_or(0);
            let common = staged.iter().filter(|(_, done)| !done).map(|(n, _)| *n).min();
            let mut frames = if force { most } else { common.unwrap_or(most) };
            frames = frames.max(most.saturating_sub(limit));

            let mut mixed = vec![0.0; frames * channels];
            if frames > 0 {
                let mut scratch = Vec::new();
                for id in &ids {
                    let slot = &set.slots[id];
                    let slot_channels = slot.target.core().channels();
                    scratch.clear();
                    scratch.resize(frames * slot_channels, 0.0);
                    let got = slot.target.peek_staged(&mut scratch);
                    mix_into(
                        &mut mixed,
                        &scratch[..got * slot_channels],
                        slot_channels,
                        channels,
                        slot.routing.as_ref(),
                    );
                }
            }
            (ids, mixed)
        };

        if !mixed.is_empty() {
            tracing::trace!(mixer = %self.name, frames = mixed.len() / channels, "emitting staged frames");
            let accepted = host.output().write(&mixed)?;
            let set = self.slots.lock();
            for id in &ids {
                if let Some(slot) = set.slots.get(id) {
                    slot.target.skip_staged(accepted);
                }
            }
        }

        let drained: Vec<SlotId> = {
            let set = self.slots.lock();
            set.sorted_ids()
                .into_iter()
                .filter(|id| {
                    let slot = &set.slots[id];
                    slot.upstream_done && slot.target.staged_frames() == 0
                })
                .collect()
        };
        self.retire(&drained);

        let end = {
            let mut set = self.slots.lock();
            let end = set.slots.is_empty() && set.ever_finished && !set.finished && !self.read_forever();
            if end {
                set.finished = true;
            }
            end
        };
        if end {
            host.output().notify_finished()?;
        }
        Ok(())
    }

    /// Emit everything staged, padding short inputs with silence, then flush
    /// downstream.
    pub(crate) fn flush(&self) -> Result<()> {
        self.emit_staged(true)?;
        self.host()?.output().flush()
    }

    pub(crate) fn slot_upstream_finished(&self, id: SlotId) -> Result<()> {
        if let Some(slot) = self.slots.lock().slots.get_mut(&id) {
            slot.upstream_done = true;
        }
        self.emit_staged(false)
    }
}

/// Connect `input` through `chain` into `target`.
fn wire(input: &dyn AudioSource, chain: &[Arc<dyn AudioNode>], target: &SlotTarget) -> Result<()> {
    let mut upstream: &dyn AudioSource = input;
    for node in chain {
        let pipe = node
            .as_target()
            .ok_or_else(|| AudioError::invalid_argument(format!("'{}' has no input", node.name())))?;
        port::connect(upstream, pipe)?;
        upstream = node
            .as_source()
            .ok_or_else(|| AudioError::invalid_argument(format!("'{}' has no output", node.name())))?;
    }
    port::connect(upstream, target)
}

/// Add `src` frames onto `out`, through `routing` when given.
fn mix_into(
    out: &mut [f32],
    src: &[f32],
    src_channels: usize,
    out_channels: usize,
    routing: Option<&ChannelRouting>,
) {
    match routing {
        None => out.iter_mut().zip(src).for_each(|(o, s)| *o += *s),
        Some(routing) => {
            let frames = out.chunks_exact_mut(out_channels).zip(src.chunks_exact(src_channels));
            for (out_frame, src_frame) in frames {
                for &(input_ch, output_ch, gain) in routing.routes() {
                    out_frame[output_ch] += src_frame[input_ch] * gain;
                }
            }
        }
    }
}
