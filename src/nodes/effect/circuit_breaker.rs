//! Upstream fault guard
//!
//! A misbehaving source (a broken decoder, say) must not take the rest of
//! the graph down with it. The breaker sits in front of it and turns the
//! first error or panic into a clean end-of-stream.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rtrb::Consumer;

use crate::error::Result;
use crate::events::EventHub;
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, AudioTarget, NodeCore, ReadResult};
use crate::nodes::pipe_ports;
use crate::port::{InputPort, OutputPort};

/// Published once when a breaker trips.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerTripped {
    /// Name of the breaker node.
    pub node: String,
    /// Error message or panic payload that tripped it.
    pub reason: String,
}

pub struct CircuitBreaker {
    core: NodeCore,
    input: InputPort,
    output: OutputPort,
    tripped: AtomicBool,
    events: EventHub<BreakerTripped>,
}

impl CircuitBreaker {
    pub fn new(graph: &Arc<AudioGraph>, name: &str, format: AudioFormat) -> Result<Arc<Self>> {
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me| {
            let (input, output) = pipe_ports(me);
            Self {
                core,
                input,
                output,
                tripped: AtomicBool::new(false),
                events: EventHub::new(),
            }
        }))
    }

    #[inline]
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Subscribe to trip notifications.
    pub fn trip_events(&self, capacity: usize) -> Consumer<BreakerTripped> {
        self.events.subscribe(capacity)
    }

    fn trip(&self, reason: String) {
        if self.tripped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.output.mark_finished();
        tracing::warn!(node = self.core.name(), %reason, "circuit breaker tripped");
        self.events.publish(BreakerTripped {
            node: self.core.name().to_string(),
            reason,
        });
    }

    /// Run `f`, converting an `Err` or a panic into a trip.
    fn guarded<T>(&self, f: impl FnOnce() -> Result<T>) -> Option<T> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                self.trip(err.to_string());
                None
            }
            Err(payload) => {
                self.trip(panic_message(payload.as_ref()));
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

impl AudioNode for CircuitBreaker {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_source(&self) -> Option<&dyn AudioSource> {
        Some(self)
    }

    fn as_target(&self) -> Option<&dyn AudioTarget> {
        Some(self)
    }
}

impl AudioSource for CircuitBreaker {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        if self.is_tripped() {
            return Ok(ReadResult::Finished);
        }
        Ok(self
            .guarded(|| self.input.read(buffer))
            .unwrap_or(ReadResult::Finished))
    }
}

impl AudioTarget for CircuitBreaker {
    fn input(&self) -> &InputPort {
        &self.input
    }

    /// Writes after a trip are refused with `0` accepted frames.
    fn write_samples(&self, buffer: &[f32]) -> Result<usize> {
        if self.is_tripped() {
            return Ok(0);
        }
        if !self.output.is_connected() {
            // InvalidState without tripping
            return self.output.write(buffer);
        }
        Ok(self.guarded(|| self.output.write(buffer)).unwrap_or(0))
    }

    fn flush_samples(&self) -> Result<()> {
        if !self.is_tripped() {
            self.guarded(|| self.output.flush());
        }
        Ok(())
    }

    fn on_upstream_finished(&self) -> Result<()> {
        if !self.is_tripped() {
            self.guarded(|| self.output.notify_finished());
        }
        Ok(())
    }
}
