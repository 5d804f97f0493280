use std::sync::Arc;

use crate::error::Result;
use crate::format::AudioFormat;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, AudioSource, AudioTarget, NodeCore, ReadResult};
use crate::nodes::pipe_ports;
use crate::port::{InputPort, OutputPort};

/// Forwards samples unchanged in either direction.
pub struct Passthrough {
    core: NodeCore,
    input: InputPort,
    output: OutputPort,
}

impl Passthrough {
    pub fn new(graph: &Arc<AudioGraph>, name: &str, format: AudioFormat) -> Result<Arc<Self>> {
        let core = NodeCore::new(graph, name, format)?;
        Ok(Arc::new_cyclic(|me| {
            let (input, output) = pipe_ports(me);
            Self {
                core,
                input,
                output,
            }
        }))
    }
}

impl AudioNode for Passthrough {
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

impl AudioSource for Passthrough {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        self.input.read(buffer)
    }
}

impl AudioTarget for Passthrough {
    fn input(&self) -> &InputPort {
        &self.input
    }

    fn write_samples(&self, buffer: &[f32]) -> Result<usize> {
        self.output.write(buffer)
    }

    fn flush_samples(&self) -> Result<()> {
        self.output.flush()
    }

    fn on_upstream_finished(&self) -> Result<()> {
        self.output.notify_finished()
    }
}
