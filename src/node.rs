//! Core node trait and context types.

use dasp_graph::Buffer;

use crate::error::{Error, Result};

/// Number of frames rendered per block.
pub const BLOCK_SIZE: usize = 64;

/// Upper bound on channels per bus.
pub const MAX_CHANNELS: usize = 32;

/// Upper bound on buses per direction.
pub const MAX_BUSES: usize = 16;

/// Information available during audio processing.
///
/// Passed to every [`AudioNode::process`] call.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the graph in Hz
    pub sample_rate: u32,
    /// Number of frames per buffer (always [`BLOCK_SIZE`])
    pub buffer_size: usize,
    /// Global time of the first frame in this block, in frames
    pub time: u64,
}

/// Unique identifier for a node within an engine's graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Processing state of a node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeState {
    Started,
    Stopped,
}

/// One bus worth of audio: a buffer per channel.
pub type Bus = Vec<Buffer>;

/// Channel counts of every input and output bus of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusLayout {
    inputs: Vec<usize>,
    outputs: Vec<usize>,
}

impl BusLayout {
    pub fn new(inputs: Vec<usize>, outputs: Vec<usize>) -> Self {
        Self { inputs, outputs }
    }

    /// A node with no inputs and one output bus.
    pub fn source(channels: usize) -> Self {
        Self::new(Vec::new(), vec![channels])
    }

    /// One input bus and one output bus with the same channel count.
    pub fn effect(channels: usize) -> Self {
        Self::new(vec![channels], vec![channels])
    }

    /// One input bus fanned out to `outputs` output buses.
    pub fn splitter(channels: usize, outputs: usize) -> Self {
        Self::new(vec![channels], vec![channels; outputs])
    }

    pub fn input_bus_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_bus_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_channels(&self, bus: usize) -> Option<usize> {
        self.inputs.get(bus).copied()
    }

    pub fn output_channels(&self, bus: usize) -> Option<usize> {
        self.outputs.get(bus).copied()
    }

    pub fn validate(&self) -> Result<()> {
        if self.inputs.len() > MAX_BUSES || self.outputs.len() > MAX_BUSES {
            return Err(Error::InvalidLayout(format!(
                "{} inputs / {} outputs exceeds the limit of {} buses",
                self.inputs.len(),
                self.outputs.len(),
                MAX_BUSES
            )));
        }
        for &channels in self.inputs.iter().chain(self.outputs.iter()) {
            if channels == 0 || channels > MAX_CHANNELS {
                return Err(Error::InvalidLayout(format!(
                    "bus channel count {channels} outside 1..={MAX_CHANNELS}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn allocate_inputs(&self) -> Vec<Bus> {
        allocate(&self.inputs)
    }

    pub(crate) fn allocate_outputs(&self) -> Vec<Bus> {
        allocate(&self.outputs)
    }
}

fn allocate(channels: &[usize]) -> Vec<Bus> {
    channels
        .iter()
        .map(|&n| vec![Buffer::default(); n])
        .collect()
}

/// The core trait for audio processing nodes.
///
/// Nodes can be:
/// - **Sources**: generate audio (no input buses), such as oscillators and sample players
/// - **Effects**: process audio (input and output buses), such as panners and attenuators
/// - **Taps**: observe audio and pass it on, such as the listener monitor
///
/// Every attached source feeding an input bus is summed into it before `process` runs,
/// scaled by the source's output bus volume. Unattached input buses are silent.
///
/// ```
/// use klangraum::{AudioNode, Bus, BusLayout, ProcessContext};
///
/// struct Invert;
///
/// impl AudioNode for Invert {
///     fn process(&mut self, _ctx: &ProcessContext, inputs: &[Bus], outputs: &mut [Bus]) {
///         for (out, input) in outputs[0].iter_mut().zip(inputs[0].iter()) {
///             for (o, i) in out.iter_mut().zip(input.iter()) {
///                 *o = -*i;
///             }
///         }
///     }
///
///     fn layout(&self) -> BusLayout {
///         BusLayout::effect(2)
///     }
/// }
/// ```
///
/// `process` runs on the real-time thread. It must not block, allocate, or touch the graph.
pub trait AudioNode: Send + 'static {
    /// Process one block of audio.
    ///
    /// `inputs` and `outputs` follow [`layout`](Self::layout): one [`Bus`] per bus, one
    /// buffer per channel, [`BLOCK_SIZE`] frames per buffer.
    fn process(&mut self, ctx: &ProcessContext, inputs: &[Bus], outputs: &mut [Bus]);

    /// Bus shape of this node. Read once when the node is added to a graph.
    fn layout(&self) -> BusLayout;

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "node"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_rejects_empty_and_oversized_buses() {
        assert!(BusLayout::effect(2).validate().is_ok());
        assert!(matches!(
            BusLayout::effect(0).validate(),
            Err(Error::InvalidLayout(_))
        ));
        assert!(BusLayout::source(MAX_CHANNELS + 1).validate().is_err());
        assert!(BusLayout::splitter(1, MAX_BUSES + 1).validate().is_err());
    }

    #[test]
    fn splitter_layout_repeats_channels() {
        let layout = BusLayout::splitter(2, 3);
        assert_eq!(layout.input_bus_count(), 1);
        assert_eq!(layout.output_bus_count(), 3);
        assert_eq!(layout.output_channels(2), Some(2));
        assert_eq!(layout.output_channels(3), None);
    }
}
